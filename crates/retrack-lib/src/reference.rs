use crate::error::{ReprocessError, Result};
use crate::layout::parse_native_selection;
use crate::signal::Block;
use serde::{Deserialize, Serialize};

/// How the output is re-referenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferencePolicy {
    /// Keep whatever reference the recording was acquired against.
    AsRecorded,
    /// Subtract the instantaneous mean of all valid channels.
    Average,
    /// Subtract the instantaneous mean of an explicit channel selection.
    Tracks(String),
}

/// Turn a reference policy into the concrete channel list to average,
/// or `None` for the as-recorded passthrough. Bad and auxiliary
/// channels never contribute to a reference.
pub fn resolve_reference(
    policy: &ReferencePolicy,
    native_names: &[String],
    valid: &[bool],
) -> Result<Option<Vec<usize>>> {
    match policy {
        ReferencePolicy::AsRecorded => Ok(None),
        ReferencePolicy::Average => {
            let channels: Vec<usize> = (0..native_names.len()).filter(|&i| valid[i]).collect();
            if channels.is_empty() {
                return Err(ReprocessError::InvalidParameters(
                    "average reference found no valid channels".into(),
                ));
            }
            Ok(Some(channels))
        }
        ReferencePolicy::Tracks(selection) => {
            let channels: Vec<usize> = parse_native_selection(native_names, selection)?
                .into_iter()
                .filter(|&i| valid[i])
                .collect();
            if channels.is_empty() {
                return Err(ReprocessError::InvalidParameters(format!(
                    "reference selection '{selection}' resolved to no valid channels"
                )));
            }
            Ok(Some(channels))
        }
    }
}

/// Subtract the per-sample mean of `reference` from every native
/// channel of the block.
pub fn apply_reference(block: &mut Block, reference: &[usize]) {
    if reference.is_empty() {
        return;
    }
    let samples = block.samples();
    let channels = block.channels();
    let inv = 1.0 / reference.len() as f64;
    for t in 0..samples {
        let mean: f64 = reference.iter().map(|&c| block.get(c, t)).sum::<f64>() * inv;
        for c in 0..channels {
            let v = block.get(c, t);
            block.set(c, t, v - mean);
        }
    }
}
