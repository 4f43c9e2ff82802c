use crate::document::TracksDocument;
use crate::error::{ReprocessError, Result};
use crate::filter::TemporalFilter;
use crate::layout::{ChannelLayout, ChannelTag};
use crate::params::BaselineWindow;
use crate::reference::apply_reference;
use crate::signal::Block;
use crate::spatial::SpatialFilter;
use crate::timerange::{TimeChunk, TimePlan};

/// Instantaneous global field power over the listed channels.
pub fn global_field_power(block: &Block, sample: usize, channels: &[usize]) -> f64 {
    if channels.is_empty() {
        return 0.0;
    }
    let inv = 1.0 / channels.len() as f64;
    let mean: f64 = channels
        .iter()
        .map(|&c| block.get(c, sample))
        .sum::<f64>()
        * inv;
    let var: f64 = channels
        .iter()
        .map(|&c| {
            let d = block.get(c, sample) - mean;
            d * d
        })
        .sum::<f64>()
        * inv;
    var.sqrt()
}

/// Fold an arbitrary sample index back into `[0, last]` by reflection,
/// for margin reads past the file boundaries.
pub(crate) fn mirror_index(index: isize, last: isize) -> usize {
    if last <= 0 {
        return 0;
    }
    let period = 2 * last;
    let mut folded = index.rem_euclid(period);
    if folded > last {
        folded = period - folded;
    }
    folded as usize
}

/// Per-chunk reader and transform chain, steps 1-4 of the fixed
/// processing order: margin read, spatial + temporal filtering,
/// re-referencing, baseline subtraction, rescaling.
pub struct ChunkProcessor<'a> {
    doc: &'a dyn TracksDocument,
    temporal: Option<TemporalFilter>,
    spatial: Option<SpatialFilter>,
    reference: Option<Vec<usize>>,
    /// Channels excluded from filtering (auxiliary, when requested).
    filter_skip: Vec<bool>,
    baseline: Option<Vec<f64>>,
    rescale: f64,
}

impl<'a> ChunkProcessor<'a> {
    pub fn new(
        doc: &'a dyn TracksDocument,
        temporal: Option<TemporalFilter>,
        spatial: Option<SpatialFilter>,
        reference: Option<Vec<usize>>,
        filter_skip: Vec<bool>,
    ) -> Self {
        Self {
            doc,
            temporal,
            spatial,
            reference,
            filter_skip,
            baseline: None,
            rescale: 1.0,
        }
    }

    pub fn set_baseline(&mut self, baseline: Option<Vec<f64>>) {
        self.baseline = baseline;
    }

    pub fn set_rescale(&mut self, factor: f64) {
        self.rescale = factor;
    }

    fn margin(&self) -> usize {
        self.temporal.as_ref().map(TemporalFilter::margin).unwrap_or(0)
    }

    /// Read a chunk extended by the filter margin on both sides,
    /// mirroring samples past the file boundaries.
    fn read_extended(&self, chunk: TimeChunk) -> Result<Block> {
        let margin = self.margin();
        let last = self.doc.last_sample();
        let lo = chunk.from.saturating_sub(margin);
        let hi = (chunk.to + margin).min(last);
        let avail = self.doc.read_block(lo, hi)?;
        if margin == 0 {
            return Ok(avail);
        }
        let channels = avail.channels();
        let ext_len = chunk.len() + 2 * margin;
        let mut out = Block::zeros(channels, ext_len);
        let start = chunk.from as isize - margin as isize;
        for i in 0..ext_len {
            let global = start + i as isize;
            let folded = mirror_index(global, last as isize);
            let local = folded - lo;
            for c in 0..channels {
                out.set(c, i, avail.get(c, local));
            }
        }
        Ok(out)
    }

    /// Steps 1-2: margin read, spatial then temporal filtering in one
    /// pass, then re-referencing. Output is trimmed back to the chunk.
    pub fn read_clean(&self, chunk: TimeChunk) -> Result<Block> {
        let mut ext = self.read_extended(chunk)?;
        if let Some(spatial) = &self.spatial {
            spatial.apply(&mut ext, &self.filter_skip);
        }
        if let Some(temporal) = &self.temporal {
            for c in 0..ext.channels() {
                if self.filter_skip.get(c).copied().unwrap_or(false) {
                    continue;
                }
                let filtered = temporal.apply(ext.channel(c));
                ext.channel_mut(c).copy_from_slice(&filtered);
            }
        }
        let margin = self.margin();
        let mut block = Block::zeros(ext.channels(), chunk.len());
        for c in 0..ext.channels() {
            block
                .channel_mut(c)
                .copy_from_slice(&ext.channel(c)[margin..margin + chunk.len()]);
        }
        if let Some(reference) = &self.reference {
            apply_reference(&mut block, reference);
        }
        Ok(block)
    }

    /// Steps 1-4: [`read_clean`] plus baseline subtraction and
    /// rescaling.
    pub fn process(&self, chunk: TimeChunk) -> Result<Block> {
        let mut block = self.read_clean(chunk)?;
        if let Some(baseline) = &self.baseline {
            for c in 0..block.channels() {
                let offset = baseline[c];
                for v in block.channel_mut(c) {
                    *v -= offset;
                }
            }
        }
        if self.rescale != 1.0 {
            for c in 0..block.channels() {
                for v in block.channel_mut(c) {
                    *v *= self.rescale;
                }
            }
        }
        Ok(block)
    }

    /// Per-channel mean over the baseline window, read and cleaned with
    /// the same filter/reference state as the data itself.
    pub fn compute_baseline(&self, window: BaselineWindow) -> Result<Vec<f64>> {
        let last = self.doc.last_sample();
        if window.from > last {
            return Err(ReprocessError::InvalidParameters(format!(
                "baseline window [{}, {}] outside recording",
                window.from, window.to
            )));
        }
        let chunk = TimeChunk {
            from: window.from,
            to: window.to.min(last),
        };
        let block = self.read_clean(chunk)?;
        let inv = 1.0 / block.samples() as f64;
        Ok((0..block.channels())
            .map(|c| block.channel(c).iter().sum::<f64>() * inv)
            .collect())
    }

    /// Rescaling factor derived from the mean global field power of the
    /// whole plan: `total_samples / sum_of_gfp`. Must be called before
    /// `set_rescale`, with baseline state already in place.
    pub fn mean_gfp_factor(&self, plan: &TimePlan, valid: &[usize]) -> Result<f64> {
        let mut sum = 0.0;
        let mut count = 0usize;
        for &chunk in &plan.chunks {
            let block = self.process(chunk)?;
            for t in 0..block.samples() {
                sum += global_field_power(&block, t, valid);
            }
            count += block.samples();
        }
        if sum <= f64::EPSILON {
            log::warn!("mean GFP is zero, rescaling disabled");
            return Ok(1.0);
        }
        Ok(count as f64 / sum)
    }
}

/// Block-average each consecutive group of `ratio` samples, then apply
/// the 3-tap sharpening `(18*x0 - x[-1] - x[+1]) / 16` per channel to
/// compensate the averaging-induced smoothing. Edge neighbours are
/// replicated; `positive` clamps the result at zero.
pub fn downsample_sharpen(block: &Block, ratio: usize, positive: bool) -> Block {
    if ratio <= 1 {
        return block.clone();
    }
    let channels = block.channels();
    let groups = block.samples() / ratio;
    let mut avg = Block::zeros(channels, groups);
    let inv = 1.0 / ratio as f64;
    for c in 0..channels {
        for g in 0..groups {
            let start = g * ratio;
            let sum: f64 = block.channel(c)[start..start + ratio].iter().sum();
            avg.set(c, g, sum * inv);
        }
    }
    let mut out = Block::zeros(channels, groups);
    for c in 0..channels {
        for g in 0..groups {
            let x0 = avg.get(c, g);
            let xm = avg.get(c, g.saturating_sub(1));
            let xp = avg.get(c, (g + 1).min(groups - 1));
            let mut v = (18.0 * x0 - xm - xp) / 16.0;
            if positive {
                v = v.max(0.0);
            }
            out.set(c, g, v);
        }
    }
    out
}

/// Running per-channel sum across chunks, finalized to a single
/// averaged output sample.
pub struct Averager {
    sums: Vec<f64>,
    count: usize,
}

impl Averager {
    pub fn new(channels: usize) -> Self {
        Self {
            sums: vec![0.0; channels],
            count: 0,
        }
    }

    pub fn add(&mut self, block: &Block) {
        debug_assert_eq!(block.channels(), self.sums.len());
        for (c, sum) in self.sums.iter_mut().enumerate() {
            *sum += block.channel(c).iter().sum::<f64>();
        }
        self.count += block.samples();
    }

    /// One output sample holding the mean of everything added.
    pub fn finalize(self) -> Block {
        let mut out = Block::zeros(self.sums.len(), 1);
        if self.count > 0 {
            let inv = 1.0 / self.count as f64;
            for (c, sum) in self.sums.iter().enumerate() {
                out.set(c, 0, sum * inv);
            }
        }
        out
    }
}

/// Maps processed native-space blocks into the output channel layout,
/// inserting null channels and computing the selected pseudo-channels
/// per output sample.
pub struct OutputAssembler<'a> {
    layout: &'a ChannelLayout,
    valid: Vec<usize>,
    /// Previous output sample per native channel, for dissimilarity
    /// across chunk boundaries.
    prev: Option<Vec<f64>>,
}

impl<'a> OutputAssembler<'a> {
    /// `valid` holds the native channel indices the pseudo-channels are
    /// computed over.
    pub fn new(layout: &'a ChannelLayout, valid: Vec<usize>) -> Self {
        Self {
            layout,
            valid,
            prev: None,
        }
    }

    pub fn assemble(&mut self, block: &Block) -> Block {
        let slots = self.layout.selected_slots();
        let samples = block.samples();
        let mut out = Block::zeros(slots.len(), samples);
        for t in 0..samples {
            let gfp = global_field_power(block, t, &self.valid);
            let dis = if t > 0 {
                dissimilarity_adjacent(block, t, &self.valid)
            } else {
                match &self.prev {
                    Some(prev) => dissimilarity_prev(block, prev, &self.valid),
                    None => 0.0,
                }
            };
            let avg = if self.valid.is_empty() {
                0.0
            } else {
                self.valid
                    .iter()
                    .map(|&c| block.get(c, t))
                    .sum::<f64>()
                    / self.valid.len() as f64
            };
            for (row, &slot) in slots.iter().enumerate() {
                let value = match self.layout.slots()[slot].tag {
                    ChannelTag::Original(c) => block.get(c, t),
                    ChannelTag::SyntheticNull => 0.0,
                    ChannelTag::PseudoGfp => gfp,
                    ChannelTag::PseudoDis => dis,
                    ChannelTag::PseudoAvg => avg,
                };
                out.set(row, t, value);
            }
        }
        if samples > 0 {
            self.prev = Some(
                (0..block.channels())
                    .map(|c| block.get(c, samples - 1))
                    .collect(),
            );
        }
        out
    }
}

/// Dissimilarity of the chunk's first sample against the previous
/// chunk's last sample.
fn dissimilarity_prev(block: &Block, prev: &[f64], valid: &[usize]) -> f64 {
    if valid.is_empty() || prev.is_empty() {
        return 0.0;
    }
    let inv = 1.0 / valid.len() as f64;
    let mean: f64 = valid
        .iter()
        .map(|&c| block.get(c, 0) - prev[c])
        .sum::<f64>()
        * inv;
    let var: f64 = valid
        .iter()
        .map(|&c| {
            let d = block.get(c, 0) - prev[c] - mean;
            d * d
        })
        .sum::<f64>()
        * inv;
    var.sqrt()
}

fn dissimilarity_adjacent(block: &Block, sample: usize, valid: &[usize]) -> f64 {
    if valid.is_empty() {
        return 0.0;
    }
    let inv = 1.0 / valid.len() as f64;
    let mean: f64 = valid
        .iter()
        .map(|&c| block.get(c, sample) - block.get(c, sample - 1))
        .sum::<f64>()
        * inv;
    let var: f64 = valid
        .iter()
        .map(|&c| {
            let d = block.get(c, sample) - block.get(c, sample - 1) - mean;
            d * d
        })
        .sum::<f64>()
        * inv;
    var.sqrt()
}

/// Averages ROI member channels into one output channel per ROI.
pub struct RoiAssembler {
    members: Vec<Vec<usize>>,
}

impl RoiAssembler {
    pub fn new(members: Vec<Vec<usize>>) -> Self {
        Self { members }
    }

    pub fn assemble(&self, block: &Block) -> Block {
        let samples = block.samples();
        let mut out = Block::zeros(self.members.len(), samples);
        for (row, members) in self.members.iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            let inv = 1.0 / members.len() as f64;
            for t in 0..samples {
                let sum: f64 = members.iter().map(|&c| block.get(c, t)).sum();
                out.set(row, t, sum * inv);
            }
        }
        out
    }
}
