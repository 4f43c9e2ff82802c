use crate::error::{EmptyTimeReason, ReprocessError, Result};
use crate::signal::Marker;
use serde::{Deserialize, Serialize};

/// Name given to the synthetic markers inserted at excision cuts.
pub const SPLICE_MARKER: &str = "Splice";

/// Which part of the recording to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimePolicy {
    /// One explicit `[from, to]` interval, clipped to the file.
    Interval { from: usize, to: usize },
    /// Union of the spans of markers whose name is in the list.
    KeepTriggers { names: Vec<String> },
    /// Complement of the spans of markers whose name is in the list.
    ExcludeTriggers { names: Vec<String> },
}

/// Sequence keeps every (possibly downsampled) sample; Average reduces
/// the whole selection to one output sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Sequence { downsample: usize },
    Average,
}

impl OutputMode {
    pub fn downsample(&self) -> usize {
        match self {
            OutputMode::Sequence { downsample } => (*downsample).max(1),
            OutputMode::Average => 1,
        }
    }
}

/// A contiguous run of samples to read, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeChunk {
    pub from: usize,
    pub to: usize,
}

impl TimeChunk {
    pub fn len(&self) -> usize {
        self.to - self.from + 1
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }

    pub fn contains(&self, sample: usize) -> bool {
        sample >= self.from && sample <= self.to
    }
}

/// Resolved read plan for one invocation.
#[derive(Debug, Clone)]
pub struct TimePlan {
    pub chunks: Vec<TimeChunk>,
    /// Synthetic cut markers, in output coordinates (pre-downsampling).
    pub splices: Vec<Marker>,
    pub input_total: usize,
    pub output_total: usize,
}

impl TimePlan {
    /// Map an original sample index to its output index before
    /// downsampling. `None` when the sample was not kept.
    pub fn output_index(&self, original: usize) -> Option<usize> {
        let mut base = 0;
        for chunk in &self.chunks {
            if chunk.contains(original) {
                return Some(base + original - chunk.from);
            }
            base += chunk.len();
        }
        None
    }
}

/// Resolve a time policy into the concrete chunk list.
pub fn resolve_time(
    policy: &TimePolicy,
    last_sample: usize,
    mode: OutputMode,
    markers: &[Marker],
) -> Result<TimePlan> {
    match policy {
        TimePolicy::Interval { from, to } => resolve_interval(*from, *to, last_sample, mode),
        TimePolicy::KeepTriggers { names } => {
            let spans = matching_spans(markers, names, last_sample);
            if spans.is_empty() {
                return Err(ReprocessError::EmptyTimeRange(
                    EmptyTimeReason::NoMatchingTriggers,
                ));
            }
            build_plan(spans, Vec::new(), mode, EmptyTimeReason::NoMatchingTriggers)
        }
        TimePolicy::ExcludeTriggers { names } => {
            let excluded = matching_spans(markers, names, last_sample);
            let chunks = complement(&excluded, last_sample);
            if chunks.is_empty() {
                return Err(ReprocessError::EmptyTimeRange(
                    EmptyTimeReason::TriggersExcludeEverything,
                ));
            }
            let splices = splice_markers(&chunks);
            build_plan(
                chunks,
                splices,
                mode,
                EmptyTimeReason::TriggersExcludeEverything,
            )
        }
    }
}

fn resolve_interval(from: usize, to: usize, last: usize, mode: OutputMode) -> Result<TimePlan> {
    if from > last || to < from {
        return Err(ReprocessError::EmptyTimeRange(
            EmptyTimeReason::IntervalBelowOneSample,
        ));
    }
    let to = to.min(last);
    let mut len = to - from + 1;
    let ratio = mode.downsample();
    if ratio > 1 && len % ratio != 0 {
        // Round the length up to the next multiple by extending the
        // upper bound while the file has room, else shrink.
        let extended = len.div_ceil(ratio) * ratio;
        if from + extended - 1 <= last {
            len = extended;
        } else {
            len = (len / ratio) * ratio;
        }
        if len == 0 {
            return Err(ReprocessError::EmptyTimeRange(
                EmptyTimeReason::IntervalBelowOneSample,
            ));
        }
    }
    let chunk = TimeChunk {
        from,
        to: from + len - 1,
    };
    build_plan(
        vec![chunk],
        Vec::new(),
        mode,
        EmptyTimeReason::IntervalBelowOneSample,
    )
}

fn build_plan(
    chunks: Vec<TimeChunk>,
    splices: Vec<Marker>,
    mode: OutputMode,
    reason: EmptyTimeReason,
) -> Result<TimePlan> {
    let input_total: usize = chunks.iter().map(TimeChunk::len).sum();
    if input_total == 0 {
        return Err(ReprocessError::EmptyTimeRange(reason));
    }
    let output_total = match mode {
        OutputMode::Average => 1,
        OutputMode::Sequence { downsample } => {
            let ratio = downsample.max(1);
            chunks.iter().map(|c| c.len() / ratio).sum()
        }
    };
    if output_total == 0 {
        return Err(ReprocessError::EmptyTimeRange(reason));
    }
    Ok(TimePlan {
        chunks,
        splices,
        input_total,
        output_total,
    })
}

/// Clipped, merged union of the spans of markers matching `names`.
fn matching_spans(markers: &[Marker], names: &[String], last: usize) -> Vec<TimeChunk> {
    let mut spans: Vec<TimeChunk> = markers
        .iter()
        .filter(|m| names.iter().any(|n| n == &m.name))
        .filter(|m| m.from <= last && !m.is_empty())
        .map(|m| TimeChunk {
            from: m.from,
            to: m.to.min(last),
        })
        .collect();
    spans.sort_by_key(|s| s.from);
    let mut merged: Vec<TimeChunk> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(prev) if span.from <= prev.to + 1 => prev.to = prev.to.max(span.to),
            _ => merged.push(span),
        }
    }
    merged
}

/// Complement of a merged span list within `[0, last]`.
fn complement(spans: &[TimeChunk], last: usize) -> Vec<TimeChunk> {
    let mut out = Vec::new();
    let mut cursor = 0usize;
    for span in spans {
        if span.from > cursor {
            out.push(TimeChunk {
                from: cursor,
                to: span.from - 1,
            });
        }
        cursor = cursor.max(span.to + 1);
    }
    if cursor <= last {
        out.push(TimeChunk {
            from: cursor,
            to: last,
        });
    }
    out
}

/// One splice marker at each chunk boundary beyond the first, in output
/// coordinates, so downstream consumers can detect the cut.
fn splice_markers(chunks: &[TimeChunk]) -> Vec<Marker> {
    let mut out = Vec::new();
    let mut base = 0usize;
    for (i, chunk) in chunks.iter().enumerate() {
        if i > 0 {
            out.push(Marker::new(base, base, SPLICE_MARKER));
        }
        base += chunk.len();
    }
    out
}
