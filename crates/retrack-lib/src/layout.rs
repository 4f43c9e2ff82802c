use crate::error::{ReprocessError, Result};

/// Reserved names for the three derived channels.
pub const PSEUDO_GFP: &str = "GFP";
pub const PSEUDO_DIS: &str = "DIS";
pub const PSEUDO_AVG: &str = "AVG";

/// What one slot of the resolved layout holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTag {
    /// A channel of the input recording, by native index.
    Original(usize),
    /// A flat zero channel inserted on request.
    SyntheticNull,
    PseudoGfp,
    PseudoDis,
    PseudoAvg,
}

#[derive(Debug, Clone)]
pub struct ChannelSlot {
    pub tag: ChannelTag,
    pub name: String,
}

/// Resolved output channel ordering.
///
/// The slot table always covers `native + null + 3 pseudo` positions in
/// that order; `selected` marks the slots that actually reach the
/// output. Original positions therefore always precede null positions,
/// which precede pseudo positions.
#[derive(Debug, Clone)]
pub struct ChannelLayout {
    slots: Vec<ChannelSlot>,
    selected: Vec<bool>,
    native: usize,
    nulls: usize,
}

impl ChannelLayout {
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn native_count(&self) -> usize {
        self.native
    }

    pub fn null_count(&self) -> usize {
        self.nulls
    }

    pub fn slots(&self) -> &[ChannelSlot] {
        &self.slots
    }

    pub fn is_selected(&self, slot: usize) -> bool {
        self.selected[slot]
    }

    /// Indices of selected slots, in layout order.
    pub fn selected_slots(&self) -> Vec<usize> {
        (0..self.slots.len())
            .filter(|&i| self.selected[i])
            .collect()
    }

    pub fn output_count(&self) -> usize {
        self.selected.iter().filter(|&&s| s).count()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.selected_slots()
            .into_iter()
            .map(|i| self.slots[i].name.clone())
            .collect()
    }
}

/// One token of a selection expression.
enum Token {
    Star,
    Index(usize),
    Range(usize, usize),
    Name(String),
}

fn tokenize(text: &str) -> Vec<Token> {
    text.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| {
            if t == "*" {
                Token::Star
            } else if let Ok(idx) = t.parse::<usize>() {
                Token::Index(idx)
            } else if let Some((a, b)) = t.split_once('-') {
                match (a.parse::<usize>(), b.parse::<usize>()) {
                    (Ok(lo), Ok(hi)) => Token::Range(lo, hi),
                    _ => Token::Name(t.to_string()),
                }
            } else {
                Token::Name(t.to_string())
            }
        })
        .collect()
}

/// Parse a selection expression naming native channels only (used for
/// reference selections). `*` expands to every native channel.
pub fn parse_native_selection(native_names: &[String], text: &str) -> Result<Vec<usize>> {
    let native = native_names.len();
    let mut picked = vec![false; native];
    for token in tokenize(text) {
        match token {
            Token::Star => picked.iter_mut().for_each(|f| *f = true),
            Token::Index(idx) => {
                if idx == 0 || idx > native {
                    return Err(ReprocessError::InvalidParameters(format!(
                        "channel index {idx} outside 1..={native}"
                    )));
                }
                picked[idx - 1] = true;
            }
            Token::Range(lo, hi) => {
                if lo == 0 || lo > hi || hi > native {
                    return Err(ReprocessError::InvalidParameters(format!(
                        "channel range {lo}-{hi} outside 1..={native}"
                    )));
                }
                for flag in picked.iter_mut().take(hi).skip(lo - 1) {
                    *flag = true;
                }
            }
            Token::Name(name) => {
                let idx = native_names
                    .iter()
                    .position(|n| n.eq_ignore_ascii_case(&name))
                    .ok_or_else(|| {
                        ReprocessError::InvalidParameters(format!("unknown channel '{name}'"))
                    })?;
                picked[idx] = true;
            }
        }
    }
    Ok((0..native).filter(|&i| picked[i]).collect())
}

fn build_slots(native_names: &[String], null_names: &[String]) -> Vec<ChannelSlot> {
    let mut slots: Vec<ChannelSlot> = native_names
        .iter()
        .enumerate()
        .map(|(i, name)| ChannelSlot {
            tag: ChannelTag::Original(i),
            name: name.clone(),
        })
        .collect();
    slots.extend(null_names.iter().map(|name| ChannelSlot {
        tag: ChannelTag::SyntheticNull,
        name: name.clone(),
    }));
    for (tag, name) in [
        (ChannelTag::PseudoGfp, PSEUDO_GFP),
        (ChannelTag::PseudoDis, PSEUDO_DIS),
        (ChannelTag::PseudoAvg, PSEUDO_AVG),
    ] {
        slots.push(ChannelSlot {
            tag,
            name: name.to_string(),
        });
    }
    slots
}

/// Resolve a channel selection expression into the final output layout.
///
/// The grammar is whitespace/comma separated tokens: `*`, a channel
/// name (case-insensitive), a 1-based index, an inclusive index range
/// `a-b`, or one of the reserved pseudo names.
pub fn resolve_layout(
    native_names: &[String],
    selection: &str,
    null_names: &[String],
    roi_export: bool,
) -> Result<ChannelLayout> {
    let native = native_names.len();
    let nulls = if roi_export { 0 } else { null_names.len() };
    let slots = build_slots(native_names, if roi_export { &[] } else { null_names });
    let mut selected = vec![false; slots.len()];

    if roi_export {
        // ROI export works on the native channel range verbatim.
        for flag in selected.iter_mut().take(native) {
            *flag = true;
        }
        return finish(slots, selected, native, nulls);
    }

    let tokens = tokenize(selection);

    if tokens.is_empty() {
        // Blank selection: native range plus the null range if present.
        for flag in selected.iter_mut().take(native + nulls) {
            *flag = true;
        }
        return finish(slots, selected, native, nulls);
    }

    let mut saw_null = false;

    for token in &tokens {
        match token {
            Token::Star => {
                for flag in selected.iter_mut().take(native) {
                    *flag = true;
                }
            }
            Token::Index(idx) => {
                if *idx == 0 || *idx > native {
                    return Err(ReprocessError::InvalidParameters(format!(
                        "channel index {idx} outside 1..={native}"
                    )));
                }
                selected[idx - 1] = true;
            }
            Token::Range(lo, hi) => {
                if *lo == 0 || *lo > *hi || *hi > native {
                    return Err(ReprocessError::InvalidParameters(format!(
                        "channel range {lo}-{hi} outside 1..={native}"
                    )));
                }
                for flag in selected.iter_mut().take(*hi).skip(lo - 1) {
                    *flag = true;
                }
            }
            Token::Name(name) => {
                let slot = slots
                    .iter()
                    .position(|s| s.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| {
                        ReprocessError::InvalidParameters(format!("unknown channel '{name}'"))
                    })?;
                if slots[slot].tag == ChannelTag::SyntheticNull {
                    saw_null = true;
                }
                selected[slot] = true;
            }
        }
    }

    // Null channels ride along unless the expression named some of them
    // itself. With a star the whole null range follows the expansion;
    // with an explicit list it lands before any referenced pseudo slot,
    // which in slot order is the same range either way.
    if nulls > 0 && !saw_null {
        for flag in selected.iter_mut().skip(native).take(nulls) {
            *flag = true;
        }
    }

    finish(slots, selected, native, nulls)
}

fn finish(
    slots: Vec<ChannelSlot>,
    selected: Vec<bool>,
    native: usize,
    nulls: usize,
) -> Result<ChannelLayout> {
    if !selected.iter().any(|&s| s) {
        return Err(ReprocessError::EmptySelection);
    }
    Ok(ChannelLayout {
        slots,
        selected,
        native,
        nulls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn tags_of(layout: &ChannelLayout) -> Vec<ChannelTag> {
        layout
            .selected_slots()
            .into_iter()
            .map(|i| layout.slots()[i].tag)
            .collect()
    }

    #[test]
    fn blank_selection_takes_native_and_null_ranges() {
        let layout = resolve_layout(
            &names(&["Fp1", "Fp2"]),
            "  ",
            &names(&["N1"]),
            false,
        )
        .unwrap();
        assert_eq!(
            tags_of(&layout),
            vec![
                ChannelTag::Original(0),
                ChannelTag::Original(1),
                ChannelTag::SyntheticNull
            ]
        );
    }

    #[test]
    fn star_with_nulls_keeps_native_before_null_before_pseudo() {
        let layout = resolve_layout(
            &names(&["Fp1", "Fp2", "Cz"]),
            "* gfp",
            &names(&["N1", "N2"]),
            false,
        )
        .unwrap();
        let tags = tags_of(&layout);
        let first_null = tags
            .iter()
            .position(|t| *t == ChannelTag::SyntheticNull)
            .unwrap();
        let first_pseudo = tags.iter().position(|t| *t == ChannelTag::PseudoGfp).unwrap();
        let last_original = tags
            .iter()
            .rposition(|t| matches!(t, ChannelTag::Original(_)))
            .unwrap();
        assert!(last_original < first_null);
        assert!(first_null < first_pseudo);
        assert_eq!(tags.len(), 6);
    }

    #[test]
    fn explicit_null_reference_is_used_as_is() {
        let layout = resolve_layout(
            &names(&["Fp1", "Fp2"]),
            "Fp1 N2",
            &names(&["N1", "N2"]),
            false,
        )
        .unwrap();
        assert_eq!(
            tags_of(&layout),
            vec![ChannelTag::Original(0), ChannelTag::SyntheticNull]
        );
        assert_eq!(layout.output_names(), vec!["Fp1", "N2"]);
    }

    #[test]
    fn pseudo_only_reference_pulls_the_null_range_in() {
        let layout = resolve_layout(
            &names(&["Fp1", "Fp2"]),
            "Fp1 AVG",
            &names(&["N1"]),
            false,
        )
        .unwrap();
        assert_eq!(
            tags_of(&layout),
            vec![
                ChannelTag::Original(0),
                ChannelTag::SyntheticNull,
                ChannelTag::PseudoAvg
            ]
        );
    }

    #[test]
    fn index_ranges_are_one_based_inclusive() {
        let layout = resolve_layout(
            &names(&["a", "b", "c", "d"]),
            "2-3",
            &[],
            false,
        )
        .unwrap();
        assert_eq!(
            tags_of(&layout),
            vec![ChannelTag::Original(1), ChannelTag::Original(2)]
        );
    }

    #[test]
    fn roi_export_uses_native_range_verbatim() {
        let layout = resolve_layout(
            &names(&["a", "b"]),
            "ignored",
            &names(&["N1"]),
            true,
        )
        .unwrap();
        assert_eq!(
            tags_of(&layout),
            vec![ChannelTag::Original(0), ChannelTag::Original(1)]
        );
        assert_eq!(layout.null_count(), 0);
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = resolve_layout(&names(&["a"]), "bogus", &[], false).unwrap_err();
        assert!(matches!(err, ReprocessError::InvalidParameters(_)));
    }

    #[test]
    fn empty_recording_yields_empty_selection() {
        let err = resolve_layout(&[], "", &[], false).unwrap_err();
        assert!(matches!(err, ReprocessError::EmptySelection));
    }
}
