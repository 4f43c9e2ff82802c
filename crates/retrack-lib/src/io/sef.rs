use crate::document::TracksDocument;
use crate::error::{ReprocessError, Result};
use crate::io::{sibling_markers, title_of};
use crate::output::{SEF_MAGIC, SEF_NAME_LEN};
use crate::signal::{Block, Marker};
use std::path::Path;

/// Reader for the native binary tracks format, so reprocessed outputs
/// can be fed back in.
#[derive(Debug, Clone)]
pub struct SefDocument {
    title: String,
    channel_names: Vec<String>,
    sampling_frequency: Option<f64>,
    markers: Vec<Marker>,
    data: Block,
}

impl SefDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let doc = Self::parse(&bytes, title_of(path))
            .map_err(|e| annotate(e, path))?;
        Ok(Self {
            markers: sibling_markers(path),
            ..doc
        })
    }

    fn parse(bytes: &[u8], title: String) -> Result<Self> {
        if bytes.len() < 24 || &bytes[0..4] != SEF_MAGIC {
            return Err(ReprocessError::Format("not a SEF file".into()));
        }
        let channels = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let samples = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
        let frequency = f64::from_le_bytes(bytes[12..20].try_into().unwrap());
        // bytes[20..24] holds the max value estimate; not needed here.
        let names_end = 24 + channels * SEF_NAME_LEN;
        let body_end = names_end + channels * samples * 4;
        if bytes.len() < body_end {
            return Err(ReprocessError::Format(format!(
                "truncated SEF body: {} bytes, expected {body_end}",
                bytes.len()
            )));
        }
        let channel_names = (0..channels)
            .map(|c| {
                let start = 24 + c * SEF_NAME_LEN;
                String::from_utf8_lossy(&bytes[start..start + SEF_NAME_LEN])
                    .trim()
                    .to_string()
            })
            .collect();
        // Body is sample-major; transpose into the channel-major block.
        let mut data = Block::zeros(channels, samples);
        let mut cursor = names_end;
        for t in 0..samples {
            for c in 0..channels {
                let value = f32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
                data.set(c, t, value as f64);
                cursor += 4;
            }
        }
        Ok(Self {
            title,
            channel_names,
            sampling_frequency: (frequency > 0.0).then_some(frequency),
            markers: Vec::new(),
            data,
        })
    }
}

fn annotate(err: ReprocessError, path: &Path) -> ReprocessError {
    match err {
        ReprocessError::Format(msg) => {
            ReprocessError::Format(format!("{}: {msg}", path.display()))
        }
        other => other,
    }
}

impl TracksDocument for SefDocument {
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
