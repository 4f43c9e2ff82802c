use crate::document::TracksDocument;
use crate::error::{ReprocessError, Result};
use crate::io::{sibling_markers, title_of};
use crate::signal::{Block, Marker};
use edf_reader::file_reader::SyncFileReader;
use edf_reader::sync_reader::SyncEDFReader;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Helper implementing the EDF reader trait for on-disk files.
struct DiskFileReader {
    path: PathBuf,
}

impl SyncFileReader for DiskFileReader {
    fn read(&self, offset: u64, length: u64) -> std::result::Result<Vec<u8>, std::io::Error> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// EDF recording loaded fully into memory at open time.
pub struct EdfDocument {
    title: String,
    channel_names: Vec<String>,
    sampling_frequency: Option<f64>,
    markers: Vec<Marker>,
    data: Block,
}

impl EdfDocument {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = SyncEDFReader::init_with_file_reader(DiskFileReader {
            path: path.to_path_buf(),
        })
        .map_err(|e| ReprocessError::Format(format!("{}: {e}", path.display())))?;
        if reader.edf_header.channels.is_empty() {
            return Err(ReprocessError::Format(format!(
                "{}: EDF file has no channels",
                path.display()
            )));
        }
        let total_duration = reader.edf_header.block_duration * reader.edf_header.number_of_blocks;
        let matrix = reader
            .read_data_window(0, total_duration)
            .map_err(|e| ReprocessError::Format(format!("{}: {e}", path.display())))?;

        let channel_names: Vec<String> = reader
            .edf_header
            .channels
            .iter()
            .map(|c| c.label.trim().to_string())
            .collect();
        // All channels must agree on length; the shortest wins when an
        // annotation channel tags along at a different rate.
        let samples = matrix.iter().map(|c| c.len()).min().unwrap_or(0);
        if samples == 0 {
            return Err(ReprocessError::Format(format!(
                "{}: EDF file has no samples",
                path.display()
            )));
        }
        let mut data = Block::zeros(channel_names.len(), samples);
        for (c, channel) in matrix.iter().enumerate().take(channel_names.len()) {
            for (t, value) in channel.iter().take(samples).enumerate() {
                data.set(c, t, *value as f64);
            }
        }
        let hdr_chan = &reader.edf_header.channels[0];
        let fs = hdr_chan.number_of_samples_in_data_record as f64 * 1000.0
            / reader.edf_header.block_duration as f64;

        Ok(Self {
            title: title_of(path),
            channel_names,
            sampling_frequency: (fs > 0.0 && fs.is_finite()).then_some(fs),
            markers: sibling_markers(path),
            data,
        })
    }
}

impl TracksDocument for EdfDocument {
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
