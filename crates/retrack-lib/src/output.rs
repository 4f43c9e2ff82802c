use crate::error::{ReprocessError, Result};
use crate::signal::{Block, Marker};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Target file format of the reprocessed tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Native binary format, tolerates an unknown sampling frequency.
    Sef,
    /// Text with a header line; requires a sampling frequency.
    Eph,
    /// Bare text, one line per sample, no header.
    Ep,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Sef => "sef",
            OutputFormat::Eph => "eph",
            OutputFormat::Ep => "ep",
        }
    }

    pub fn requires_frequency(&self) -> bool {
        matches!(self, OutputFormat::Eph)
    }
}

pub const SEF_MAGIC: &[u8; 4] = b"SEF1";
/// Bytes reserved per channel name in the binary header.
pub const SEF_NAME_LEN: usize = 8;

/// Streams processed samples to one output file.
///
/// `create` runs exactly once per logical output and `close` exactly
/// once; headers written at create time are provisional and rewritten
/// with the true sample count and max value at close.
#[derive(Debug)]
pub struct TrackWriter {
    format: OutputFormat,
    path: PathBuf,
    file: BufWriter<File>,
    channels: usize,
    sampling_frequency: f64,
    samples_written: usize,
    max_abs: f64,
}

impl TrackWriter {
    pub fn create(
        path: &Path,
        format: OutputFormat,
        channel_names: &[String],
        sampling_frequency: f64,
        provisional_samples: usize,
    ) -> Result<Self> {
        if format.requires_frequency() && sampling_frequency <= 0.0 {
            return Err(ReprocessError::MissingSamplingFrequency {
                format: format.extension(),
            });
        }
        let file = File::create(path)?;
        let mut writer = Self {
            format,
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            channels: channel_names.len(),
            sampling_frequency,
            samples_written: 0,
            max_abs: 0.0,
        };
        writer.write_header(channel_names, provisional_samples)?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> usize {
        self.samples_written
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    fn write_header(&mut self, channel_names: &[String], samples: usize) -> Result<()> {
        match self.format {
            OutputFormat::Sef => {
                self.file.write_all(SEF_MAGIC)?;
                self.file.write_all(&(self.channels as u32).to_le_bytes())?;
                self.file.write_all(&(samples as u32).to_le_bytes())?;
                self.file
                    .write_all(&self.sampling_frequency.to_le_bytes())?;
                self.file.write_all(&0.0_f32.to_le_bytes())?;
                for name in channel_names {
                    let mut bytes = [b' '; SEF_NAME_LEN];
                    for (slot, b) in bytes.iter_mut().zip(name.bytes()) {
                        *slot = b;
                    }
                    self.file.write_all(&bytes)?;
                }
            }
            OutputFormat::Eph => {
                writeln!(self.file, "{}", eph_header(self.channels, samples, self.sampling_frequency))?;
            }
            OutputFormat::Ep => {}
        }
        Ok(())
    }

    /// Append one processed block, sample-major.
    pub fn write_block(&mut self, block: &Block) -> Result<()> {
        debug_assert_eq!(block.channels(), self.channels);
        self.max_abs = self.max_abs.max(block.max_abs());
        match self.format {
            OutputFormat::Sef => {
                for t in 0..block.samples() {
                    for c in 0..block.channels() {
                        self.file
                            .write_all(&(block.get(c, t) as f32).to_le_bytes())?;
                    }
                }
            }
            OutputFormat::Eph | OutputFormat::Ep => {
                for t in 0..block.samples() {
                    for c in 0..block.channels() {
                        if c > 0 {
                            self.file.write_all(b"\t")?;
                        }
                        write!(self.file, "{:.6}", block.get(c, t))?;
                    }
                    self.file.write_all(b"\n")?;
                }
            }
        }
        self.samples_written += block.samples();
        Ok(())
    }

    /// Finalize the file: rewrite the provisional header fields with
    /// the true sample count and max value. Returns samples written.
    pub fn close(mut self) -> Result<usize> {
        self.file.flush()?;
        match self.format {
            OutputFormat::Sef => {
                let file = self.file.get_mut();
                file.seek(SeekFrom::Start(8))?;
                file.write_all(&(self.samples_written as u32).to_le_bytes())?;
                file.seek(SeekFrom::Start(20))?;
                file.write_all(&(self.max_abs as f32).to_le_bytes())?;
            }
            OutputFormat::Eph => {
                let header = eph_header(self.channels, self.samples_written, self.sampling_frequency);
                let file = self.file.get_mut();
                file.seek(SeekFrom::Start(0))?;
                file.write_all(header.as_bytes())?;
            }
            OutputFormat::Ep => {}
        }
        self.file.flush()?;
        Ok(self.samples_written)
    }
}

/// Fixed-width header line so a rewrite at close lands on the same
/// bytes.
fn eph_header(channels: usize, samples: usize, sampling_frequency: f64) -> String {
    format!("{channels:<8}{samples:<12}{sampling_frequency:<16.6}")
}

/// Shared bookkeeping across the files of one concatenation batch.
pub struct ConcatState {
    pub writer: Option<TrackWriter>,
    /// Input samples consumed so far, across files.
    pub input_consumed: usize,
    /// Output samples produced so far, across files.
    pub output_produced: usize,
    /// Files appended so far.
    pub files: usize,
    /// Markers accumulated for the merged companion file.
    pub markers: Vec<Marker>,
    /// Sampling frequency carried from earlier files of the batch.
    pub fallback_frequency: Option<f64>,
}

impl ConcatState {
    pub fn new(fallback_frequency: Option<f64>) -> Self {
        Self {
            writer: None,
            input_consumed: 0,
            output_produced: 0,
            files: 0,
            markers: Vec::new(),
            fallback_frequency,
        }
    }

    /// Marker placed at the start of one constituent file's
    /// contribution, carrying the sequence index and the file title.
    pub fn boundary_marker(&self, title: &str) -> Marker {
        Marker::new(
            self.output_produced,
            self.output_produced,
            format!("seg{}:{}", self.files + 1, title),
        )
    }
}

/// Companion file path: the output's full name plus one extension,
/// e.g. `rec.sef` -> `rec.sef.mrk`.
pub fn companion_path(path: &Path, extension: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(extension);
    path.with_file_name(name)
}

/// Write the marker companion as a tab-separated table.
pub fn write_marker_file(path: &Path, markers: &[Marker]) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(file);
    for marker in markers {
        writer
            .serialize(marker)
            .map_err(|e| ReprocessError::Format(format!("{}: {e}", path.display())))?;
    }
    writer
        .flush()
        .map_err(|e| ReprocessError::Format(format!("{}: {e}", path.display())))?;
    Ok(())
}

/// Read a marker companion written by [`write_marker_file`].
pub fn read_marker_file(path: &Path) -> Result<Vec<Marker>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(|e| ReprocessError::Format(format!("{}: {e}", path.display())))?;
    let mut out = Vec::new();
    for row in reader.deserialize::<Marker>() {
        out.push(row.map_err(|e| ReprocessError::Format(format!("{}: {e}", path.display())))?);
    }
    Ok(out)
}

/// Write the human-readable verbose report.
pub fn write_report(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text)?;
    Ok(())
}
