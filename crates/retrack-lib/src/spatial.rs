use crate::error::{ReprocessError, Result};
use crate::signal::Block;
use std::path::Path;

/// Row-normalized channel mixing matrix applied per sample.
///
/// Row `c` holds the weights of every channel's contribution to the
/// smoothed channel `c`; rows are normalized to unit sum on load.
#[derive(Debug, Clone)]
pub struct SpatialFilter {
    dim: usize,
    weights: Vec<f64>,
}

impl SpatialFilter {
    pub fn new(dim: usize, mut weights: Vec<f64>) -> Result<Self> {
        if dim == 0 || weights.len() != dim * dim {
            return Err(ReprocessError::InvalidParameters(format!(
                "spatial filter matrix has {} weights, expected {}",
                weights.len(),
                dim * dim
            )));
        }
        for row in weights.chunks_mut(dim) {
            let sum: f64 = row.iter().sum();
            if sum.abs() > f64::EPSILON {
                for w in row {
                    *w /= sum;
                }
            }
        }
        Ok(Self { dim, weights })
    }

    /// Read a `dim x dim` matrix from a tab-separated text file, one
    /// row per line.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| ReprocessError::Format(format!("{}: {e}", path.display())))?;
        let mut weights = Vec::new();
        let mut dim = 0usize;
        for record in reader.records() {
            let record =
                record.map_err(|e| ReprocessError::Format(format!("{}: {e}", path.display())))?;
            let row: Vec<f64> = record
                .iter()
                .filter(|f| !f.trim().is_empty())
                .map(|f| {
                    f.trim().parse::<f64>().map_err(|_| {
                        ReprocessError::Format(format!(
                            "{}: '{}' is not a number",
                            path.display(),
                            f
                        ))
                    })
                })
                .collect::<Result<_>>()?;
            if row.is_empty() {
                continue;
            }
            if dim == 0 {
                dim = row.len();
            } else if row.len() != dim {
                return Err(ReprocessError::Format(format!(
                    "{}: ragged matrix row ({} values, expected {dim})",
                    path.display(),
                    row.len()
                )));
            }
            weights.extend(row);
        }
        if weights.len() != dim * dim {
            return Err(ReprocessError::Format(format!(
                "{}: matrix is {}x{}, expected square",
                path.display(),
                weights.len() / dim.max(1),
                dim
            )));
        }
        Self::new(dim, weights)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Mix the first `dim` channels of `block` in place. Channels with
    /// `skip` set are passed through unchanged and contribute nothing;
    /// the remaining weights of each row are renormalized.
    pub fn apply(&self, block: &mut Block, skip: &[bool]) {
        debug_assert!(block.channels() >= self.dim);
        let samples = block.samples();
        let mut mixed = Block::zeros(self.dim, samples);
        for c in 0..self.dim {
            if skip.get(c).copied().unwrap_or(false) {
                mixed.channel_mut(c).copy_from_slice(block.channel(c));
                continue;
            }
            let row = &self.weights[c * self.dim..(c + 1) * self.dim];
            let active: f64 = row
                .iter()
                .enumerate()
                .filter(|(k, _)| !skip.get(*k).copied().unwrap_or(false))
                .map(|(_, w)| *w)
                .sum();
            let norm = if active.abs() > f64::EPSILON {
                1.0 / active
            } else {
                1.0
            };
            for t in 0..samples {
                let mut acc = 0.0;
                for (k, &w) in row.iter().enumerate() {
                    if !skip.get(k).copied().unwrap_or(false) {
                        acc += w * block.get(k, t);
                    }
                }
                mixed.set(c, t, acc * norm);
            }
        }
        for c in 0..self.dim {
            block.channel_mut(c).copy_from_slice(mixed.channel(c));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rows_are_normalized_on_construction() {
        let filter = SpatialFilter::new(2, vec![2.0, 2.0, 0.0, 4.0]).unwrap();
        let mut block = Block::zeros(2, 1);
        block.set(0, 0, 1.0);
        block.set(1, 0, 3.0);
        filter.apply(&mut block, &[false, false]);
        assert!((block.get(0, 0) - 2.0).abs() < 1e-12);
        assert!((block.get(1, 0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn skipped_channels_pass_through_unchanged() {
        let filter = SpatialFilter::new(2, vec![0.5, 0.5, 0.5, 0.5]).unwrap();
        let mut block = Block::zeros(2, 1);
        block.set(0, 0, 2.0);
        block.set(1, 0, 8.0);
        filter.apply(&mut block, &[false, true]);
        // Channel 1 skipped; channel 0's row renormalizes onto itself.
        assert!((block.get(0, 0) - 2.0).abs() < 1e-12);
        assert!((block.get(1, 0) - 8.0).abs() < 1e-12);
    }

    #[test]
    fn wrong_weight_count_is_rejected() {
        assert!(SpatialFilter::new(3, vec![1.0; 8]).is_err());
    }

    #[test]
    fn loads_square_matrix_from_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.tsv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "1.0\t0.0").unwrap();
        writeln!(f, "0.0\t1.0").unwrap();
        drop(f);
        let filter = SpatialFilter::load(&path).unwrap();
        assert_eq!(filter.dim(), 2);
    }

    #[test]
    fn ragged_matrix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.tsv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "1.0\t0.0").unwrap();
        writeln!(f, "0.0").unwrap();
        drop(f);
        assert!(SpatialFilter::load(&path).is_err());
    }
}
