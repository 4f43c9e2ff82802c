use serde::{Deserialize, Serialize};

/// How sample values of a recording are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataKind {
    /// Plain signed potentials.
    Signed,
    /// Known non-negative data (e.g. power values); clamped after sharpening.
    Positive,
    /// Vectorial data, treated like signed scalars per component.
    Vector,
}

/// Recording subtype, resolved once instead of sniffed at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingKind {
    Continuous,
    FrequencyBands,
}

/// A named `[from, to]` span of samples (both ends inclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub from: usize,
    pub to: usize,
    pub name: String,
}

impl Marker {
    pub fn new(from: usize, to: usize, name: impl Into<String>) -> Self {
        Self {
            from,
            to,
            name: name.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.to.saturating_sub(self.from) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }
}

/// Channel-major sample buffer for one chunk of a recording.
///
/// Row `c` holds all samples of channel `c` contiguously.
#[derive(Debug, Clone)]
pub struct Block {
    channels: usize,
    samples: usize,
    data: Vec<f64>,
}

impl Block {
    pub fn zeros(channels: usize, samples: usize) -> Self {
        Self {
            channels,
            samples,
            data: vec![0.0; channels * samples],
        }
    }

    /// Wrap an existing channel-major buffer. `data.len()` must equal
    /// `channels * samples`.
    pub fn from_vec(channels: usize, samples: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), channels * samples);
        Self {
            channels,
            samples,
            data,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn get(&self, channel: usize, sample: usize) -> f64 {
        self.data[channel * self.samples + sample]
    }

    pub fn set(&mut self, channel: usize, sample: usize, value: f64) {
        self.data[channel * self.samples + sample] = value;
    }

    pub fn channel(&self, channel: usize) -> &[f64] {
        let start = channel * self.samples;
        &self.data[start..start + self.samples]
    }

    pub fn channel_mut(&mut self, channel: usize) -> &mut [f64] {
        let start = channel * self.samples;
        &mut self.data[start..start + self.samples]
    }

    /// Largest absolute value in the buffer, 0.0 when empty.
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_indexing_is_channel_major() {
        let mut block = Block::zeros(2, 3);
        block.set(1, 2, 7.5);
        assert_eq!(block.get(1, 2), 7.5);
        assert_eq!(block.channel(1), &[0.0, 0.0, 7.5]);
        assert_eq!(block.channel(0), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn marker_len_counts_inclusive_span() {
        assert_eq!(Marker::new(10, 19, "A").len(), 10);
        assert_eq!(Marker::new(5, 5, "B").len(), 1);
    }
}
