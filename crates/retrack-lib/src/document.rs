use crate::error::{ReprocessError, Result};
use crate::signal::{Block, DataKind, Marker, RecordingKind};

/// Read-only view over one input recording.
///
/// Everything the pipeline needs from a tracks file: channel table,
/// sample extent, markers, channel classification. Implementations are
/// expected to be cheap to query repeatedly; `read_block` is the only
/// potentially expensive call.
pub trait TracksDocument {
    /// Short name used in reports and concatenation markers.
    fn title(&self) -> &str;

    fn channel_names(&self) -> &[String];

    fn channel_count(&self) -> usize {
        self.channel_names().len()
    }

    /// Samples per channel.
    fn sample_count(&self) -> usize;

    /// Index of the last valid sample.
    fn last_sample(&self) -> usize {
        self.sample_count().saturating_sub(1)
    }

    /// `None` when the file does not carry one.
    fn sampling_frequency(&self) -> Option<f64>;

    fn markers(&self) -> &[Marker];

    /// Indices of auxiliary (non-scalp) channels.
    fn aux_channels(&self) -> &[usize] {
        &[]
    }

    /// Indices of channels marked bad.
    fn bad_channels(&self) -> &[usize] {
        &[]
    }

    fn data_kind(&self) -> DataKind {
        DataKind::Signed
    }

    fn kind(&self) -> RecordingKind {
        RecordingKind::Continuous
    }

    /// Raw samples for the inclusive range `[from, to]`, all channels.
    fn read_block(&self, from: usize, to: usize) -> Result<Block>;
}

/// Channels that are neither bad nor auxiliary.
pub fn valid_mask(doc: &dyn TracksDocument) -> Vec<bool> {
    let mut mask = vec![true; doc.channel_count()];
    for &c in doc.bad_channels().iter().chain(doc.aux_channels()) {
        if c < mask.len() {
            mask[c] = false;
        }
    }
    mask
}

/// In-memory recording, used by tests and synthetic inputs.
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    pub title: String,
    pub channel_names: Vec<String>,
    pub sampling_frequency: Option<f64>,
    pub markers: Vec<Marker>,
    pub aux_channels: Vec<usize>,
    pub bad_channels: Vec<usize>,
    pub data_kind: DataKind,
    pub kind: RecordingKind,
    data: Block,
}

impl MemoryDocument {
    pub fn new(title: impl Into<String>, channel_names: Vec<String>, data: Block) -> Self {
        debug_assert_eq!(channel_names.len(), data.channels());
        Self {
            title: title.into(),
            channel_names,
            sampling_frequency: None,
            markers: Vec::new(),
            aux_channels: Vec::new(),
            bad_channels: Vec::new(),
            data_kind: DataKind::Signed,
            kind: RecordingKind::Continuous,
            data,
        }
    }

    pub fn with_frequency(mut self, fs: f64) -> Self {
        self.sampling_frequency = Some(fs);
        self
    }

    pub fn with_markers(mut self, markers: Vec<Marker>) -> Self {
        self.markers = markers;
        self
    }
}

impl TracksDocument for MemoryDocument {
    fn title(&self) -> &str {
        &self.title
    }

    fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    fn sample_count(&self) -> usize {
        self.data.samples()
    }

    fn sampling_frequency(&self) -> Option<f64> {
        self.sampling_frequency
    }

    fn markers(&self) -> &[Marker] {
        &self.markers
    }

    fn aux_channels(&self) -> &[usize] {
        &self.aux_channels
    }

    fn bad_channels(&self) -> &[usize] {
        &self.bad_channels
    }

    fn data_kind(&self) -> DataKind {
        self.data_kind
    }

    fn kind(&self) -> RecordingKind {
        self.kind
    }

    fn read_block(&self, from: usize, to: usize) -> Result<Block> {
        if from > to || to >= self.data.samples() {
            return Err(ReprocessError::Format(format!(
                "read range [{from}, {to}] outside recording of {} samples",
                self.data.samples()
            )));
        }
        let samples = to - from + 1;
        let mut out = Block::zeros(self.data.channels(), samples);
        for c in 0..self.data.channels() {
            out.channel_mut(c)
                .copy_from_slice(&self.data.channel(c)[from..=to]);
        }
        Ok(out)
    }
}
