use crate::document::{valid_mask, TracksDocument};
use crate::engine::{downsample_sharpen, Averager, ChunkProcessor, OutputAssembler, RoiAssembler};
use crate::error::{ReprocessError, Result};
use crate::filter::TemporalFilter;
use crate::io::{open_document, title_of};
use crate::layout::{parse_native_selection, resolve_layout, ChannelLayout};
use crate::output::{
    companion_path, write_marker_file, write_report, ConcatState, TrackWriter,
};
use crate::params::{ReprocessParams, RescalePolicy};
use crate::reference::resolve_reference;
use crate::signal::{DataKind, Marker, RecordingKind};
use crate::spatial::SpatialFilter;
use crate::timerange::{resolve_time, OutputMode, TimePlan};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Summary of one successfully reprocessed file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub input: String,
    pub output: String,
    pub channels: usize,
    pub samples_in: usize,
    pub samples_out: usize,
    pub sampling_frequency: f64,
    pub rescale_factor: f64,
    pub warnings: Vec<String>,
}

/// Per-file outcome inside a batch; failures never stop the batch.
#[derive(Debug, Serialize)]
pub struct FileOutcome {
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<FileReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| o.error.is_some())
    }
}

/// Where the reprocessed copy of `input` goes.
pub fn output_path(
    input: &Path,
    out_dir: Option<&Path>,
    format: crate::output::OutputFormat,
) -> PathBuf {
    let stem = title_of(input);
    let name = format!("{stem}.reproc.{}", format.extension());
    match out_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

/// Reprocess every input sequentially. Per-file failures are recorded
/// and the batch moves on; there is no retry.
pub fn reprocess_batch(
    inputs: &[PathBuf],
    params: &ReprocessParams,
    out_dir: Option<&Path>,
) -> BatchReport {
    let mut batch = BatchReport::default();
    let mut carried = params.default_frequency;
    let mut concat = params
        .concatenate
        .then(|| ConcatState::new(params.default_frequency));

    for input in inputs {
        let result = (|| {
            let doc = open_document(input)?;
            let out = output_path(input, out_dir, params.format);
            reprocess_file(doc.as_ref(), params, &out, &mut carried, concat.as_mut())
        })();
        match result {
            Ok(report) => {
                log::info!(
                    "{}: {} samples -> {} ({})",
                    report.input,
                    report.samples_in,
                    report.samples_out,
                    report.output
                );
                batch.outcomes.push(FileOutcome {
                    input: input.display().to_string(),
                    report: Some(report),
                    error: None,
                });
            }
            Err(err) => {
                if !params.silent {
                    log::error!("{}: {err}", input.display());
                }
                batch.outcomes.push(FileOutcome {
                    input: input.display().to_string(),
                    report: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }

    if let Some(state) = concat {
        if let Err(err) = finalize_concat(state, params) {
            batch.outcomes.push(FileOutcome {
                input: "<concatenation>".into(),
                report: None,
                error: Some(err.to_string()),
            });
        }
    }
    batch
}

/// Close a concatenation batch: rewrite the header with the true sample
/// count and write the merged companions.
pub fn finalize_concat(state: ConcatState, params: &ReprocessParams) -> Result<()> {
    let Some(writer) = state.writer else {
        return Ok(());
    };
    let path = writer.path().to_path_buf();
    let samples = writer.close()?;
    if params.write_markers {
        write_marker_file(&companion_path(&path, "mrk"), &state.markers)?;
    }
    let mut text = String::new();
    let _ = writeln!(text, "Concatenated output: {}", path.display());
    let _ = writeln!(text, "Files appended:      {}", state.files);
    let _ = writeln!(text, "Input samples:       {}", state.input_consumed);
    let _ = writeln!(text, "Output samples:      {samples}");
    write_report(&companion_path(&path, "vrb"), &text)?;
    Ok(())
}

/// Run the whole fixed transformation sequence for one file.
///
/// `carried` is the sampling frequency remembered from earlier files of
/// the batch, threaded through explicitly. `concat` must be `Some`
/// exactly when `params.concatenate` is set.
pub fn reprocess_file(
    doc: &dyn TracksDocument,
    params: &ReprocessParams,
    out_path: &Path,
    carried: &mut Option<f64>,
    mut concat: Option<&mut ConcatState>,
) -> Result<FileReport> {
    // Pre-flight contract checks, before any file output.
    if params.concatenate != concat.is_some() {
        return Err(ReprocessError::InvalidParameters(
            "concatenation requires the shared batch state".into(),
        ));
    }
    if doc.kind() == RecordingKind::FrequencyBands {
        return Err(ReprocessError::InvalidParameters(
            "frequency-band recordings must be exported one band at a time".into(),
        ));
    }
    let rois = resolve_rois(doc, params)?;

    let mut warnings = Vec::new();
    let layout = resolve_layout(
        doc.channel_names(),
        &params.selection,
        &params.nulls,
        params.roi_export(),
    )?;
    let valid = valid_mask(doc);
    let valid_indices: Vec<usize> = (0..doc.channel_count()).filter(|&c| valid[c]).collect();

    // Sampling frequency fallback chain: document, filter-state value,
    // value carried from earlier batch files, zero.
    let (sampling_frequency, frequency_source) = match doc.sampling_frequency() {
        Some(f) if f > 0.0 => (f, "document"),
        _ => match params.filter.recorded_frequency {
            Some(f) if f > 0.0 => (f, "filter state"),
            _ => match *carried {
                Some(f) if f > 0.0 => (f, "carried default"),
                _ => (0.0, "unresolved"),
            },
        },
    };
    if sampling_frequency > 0.0 {
        *carried = Some(sampling_frequency);
        if let Some(state) = concat.as_deref_mut() {
            state.fallback_frequency = Some(sampling_frequency);
        }
    } else {
        warn(&mut warnings, params.silent, "sampling frequency unknown");
    }

    let temporal = build_temporal(params, sampling_frequency, &mut warnings)?;
    let spatial = build_spatial(doc, params, &mut warnings)?;
    let filter_skip = if params.filter.exclude_aux {
        let mut skip = vec![false; doc.channel_count()];
        for &c in doc.aux_channels() {
            if c < skip.len() {
                skip[c] = true;
            }
        }
        skip
    } else {
        vec![false; doc.channel_count()]
    };
    let reference = resolve_reference(&params.reference, doc.channel_names(), &valid)?;

    let plan = resolve_time(&params.time, doc.last_sample(), params.mode, doc.markers())?;

    let mut processor = ChunkProcessor::new(doc, temporal, spatial, reference, filter_skip);
    if let Some(window) = params.baseline {
        let baseline = processor.compute_baseline(window)?;
        processor.set_baseline(Some(baseline));
    }
    let rescale_factor = match params.rescale {
        RescalePolicy::None => 1.0,
        RescalePolicy::Constant(factor) => factor,
        RescalePolicy::MeanGfp => processor.mean_gfp_factor(&plan, &valid_indices)?,
    };
    processor.set_rescale(rescale_factor);

    let output_names: Vec<String> = if params.roi_export() {
        params.rois.iter().map(|r| r.name.clone()).collect()
    } else {
        layout.output_names()
    };

    // Writer ownership: our own for a plain export, the shared one for
    // a concatenation batch (created at its first file).
    let mut own_writer = None;
    let writer = match concat.as_deref_mut() {
        Some(state) => {
            if state.writer.is_none() {
                state.writer = Some(TrackWriter::create(
                    out_path,
                    params.format,
                    &output_names,
                    sampling_frequency,
                    plan.output_total,
                )?);
            }
            // Later files append; their own out path is ignored.
            state.writer.as_mut().unwrap()
        }
        None => {
            own_writer = Some(TrackWriter::create(
                out_path,
                params.format,
                &output_names,
                sampling_frequency,
                plan.output_total,
            )?);
            own_writer.as_mut().unwrap()
        }
    };
    if output_names.len() != writer.channels() {
        return Err(ReprocessError::Format(format!(
            "channel count {} does not match the concatenation output ({})",
            output_names.len(),
            writer.channels()
        )));
    }

    let before = writer.samples_written();
    let positive = doc.data_kind() == DataKind::Positive;

    match params.mode {
        OutputMode::Average => {
            let mut averager = Averager::new(doc.channel_count());
            for &chunk in &plan.chunks {
                averager.add(&processor.process(chunk)?);
            }
            let averaged = averager.finalize();
            let out = assemble(&averaged, &layout, &valid_indices, &rois);
            writer.write_block(&out)?;
        }
        OutputMode::Sequence { downsample } => {
            let ratio = downsample.max(1);
            let mut assembler = OutputAssembler::new(&layout, valid_indices.clone());
            for &chunk in &plan.chunks {
                let processed = processor.process(chunk)?;
                let reduced = downsample_sharpen(&processed, ratio, positive);
                let out = match &rois {
                    Some(roi) => roi.assemble(&reduced),
                    None => assembler.assemble(&reduced),
                };
                writer.write_block(&out)?;
            }
        }
    }
    let produced = writer.samples_written() - before;

    let markers = output_markers(doc, params, &plan);

    let report = FileReport {
        input: doc.title().to_string(),
        output: writer.path().display().to_string(),
        channels: output_names.len(),
        samples_in: plan.input_total,
        samples_out: produced,
        sampling_frequency,
        rescale_factor,
        warnings: warnings.clone(),
    };

    match concat.as_deref_mut() {
        Some(state) => {
            let base = state.output_produced;
            state.markers.push(state.boundary_marker(doc.title()));
            state.markers.extend(markers.into_iter().map(|m| Marker {
                from: m.from + base,
                to: m.to + base,
                name: m.name,
            }));
            state.input_consumed += plan.input_total;
            state.output_produced += produced;
            state.files += 1;
        }
        None => {
            if let Some(writer) = own_writer.take() {
                let path = writer.path().to_path_buf();
                writer.close()?;
                if params.write_markers {
                    write_marker_file(&companion_path(&path, "mrk"), &markers)?;
                }
                let text =
                    verbose_report(doc, params, &layout, &plan, &report, frequency_source);
                write_report(&companion_path(&path, "vrb"), &text)?;
            }
        }
    }

    Ok(report)
}

fn warn(warnings: &mut Vec<String>, silent: bool, message: &str) {
    if !silent {
        log::warn!("{message}");
    }
    warnings.push(message.to_string());
}

fn build_temporal(
    params: &ReprocessParams,
    sampling_frequency: f64,
    warnings: &mut Vec<String>,
) -> Result<Option<TemporalFilter>> {
    if !params.filter.has_temporal() {
        return Ok(None);
    }
    if sampling_frequency <= 0.0 {
        warn(
            warnings,
            params.silent,
            "temporal filtering skipped: no sampling frequency",
        );
        return Ok(None);
    }
    TemporalFilter::design(
        params.filter.highpass,
        params.filter.lowpass,
        params.filter.notch,
        sampling_frequency,
    )
}

/// A dimension mismatch disables spatial filtering for this invocation
/// only; the file still goes through.
fn build_spatial(
    doc: &dyn TracksDocument,
    params: &ReprocessParams,
    warnings: &mut Vec<String>,
) -> Result<Option<SpatialFilter>> {
    let Some(path) = &params.filter.spatial else {
        return Ok(None);
    };
    let filter = SpatialFilter::load(path)?;
    if filter.dim() != doc.channel_count() {
        warn(
            warnings,
            params.silent,
            &format!(
                "spatial filter is {}x{} but the recording has {} channels; spatial filtering disabled",
                filter.dim(),
                filter.dim(),
                doc.channel_count()
            ),
        );
        return Ok(None);
    }
    Ok(Some(filter))
}

fn resolve_rois(
    doc: &dyn TracksDocument,
    params: &ReprocessParams,
) -> Result<Option<RoiAssembler>> {
    if !params.roi_export() {
        return Ok(None);
    }
    let mut members = Vec::with_capacity(params.rois.len());
    for roi in &params.rois {
        let channels = parse_native_selection(doc.channel_names(), &roi.channels)?;
        if channels.is_empty() {
            return Err(ReprocessError::InvalidParameters(format!(
                "ROI '{}' resolved to no channels",
                roi.name
            )));
        }
        members.push(channels);
    }
    Ok(Some(RoiAssembler::new(members)))
}

fn assemble(
    block: &crate::signal::Block,
    layout: &ChannelLayout,
    valid_indices: &[usize],
    rois: &Option<RoiAssembler>,
) -> crate::signal::Block {
    match rois {
        Some(roi) => roi.assemble(block),
        None => OutputAssembler::new(layout, valid_indices.to_vec()).assemble(block),
    }
}

/// Markers carried into the output: input markers remapped through the
/// time plan, plus the synthetic splice markers. Average mode collapses
/// time, so it carries none.
fn output_markers(
    doc: &dyn TracksDocument,
    params: &ReprocessParams,
    plan: &TimePlan,
) -> Vec<Marker> {
    if !params.write_markers {
        return Vec::new();
    }
    let ratio = match params.mode {
        OutputMode::Sequence { downsample } => downsample.max(1),
        OutputMode::Average => return Vec::new(),
    };
    let mut out = Vec::new();
    for marker in doc.markers() {
        let (Some(from), Some(to)) = (
            plan.output_index(marker.from),
            plan.output_index(marker.to),
        ) else {
            continue;
        };
        out.push(Marker::new(from / ratio, to / ratio, marker.name.clone()));
    }
    for splice in &plan.splices {
        out.push(Marker::new(
            splice.from / ratio,
            splice.to / ratio,
            splice.name.clone(),
        ));
    }
    out.sort_by_key(|m| m.from);
    out
}

/// Human-readable audit trail enumerating every resolved parameter.
fn verbose_report(
    doc: &dyn TracksDocument,
    params: &ReprocessParams,
    layout: &ChannelLayout,
    plan: &TimePlan,
    report: &FileReport,
    frequency_source: &str,
) -> String {
    let mut text = String::new();
    let w = &mut text;
    let _ = writeln!(w, "Tracks reprocessing report");
    let _ = writeln!(w, "==========================");
    let _ = writeln!(w, "Input:               {}", report.input);
    let _ = writeln!(w, "Output:              {}", report.output);
    let _ = writeln!(w, "Native channels:     {}", doc.channel_count());
    if params.roi_export() {
        let names: Vec<&str> = params.rois.iter().map(|r| r.name.as_str()).collect();
        let _ = writeln!(w, "ROI export:          {}", names.join(", "));
    } else {
        let _ = writeln!(
            w,
            "Channel selection:   '{}' -> {} tracks",
            params.selection,
            layout.output_count()
        );
        let _ = writeln!(w, "Output tracks:       {}", layout.output_names().join(" "));
        if !params.nulls.is_empty() {
            let _ = writeln!(w, "Null channels:       {}", params.nulls.join(" "));
        }
    }
    let _ = match &params.time {
        crate::timerange::TimePolicy::Interval { from, to } => {
            writeln!(w, "Time policy:         interval [{from}, {to}]")
        }
        crate::timerange::TimePolicy::KeepTriggers { names } => {
            writeln!(w, "Time policy:         keep triggers {}", names.join(" "))
        }
        crate::timerange::TimePolicy::ExcludeTriggers { names } => {
            writeln!(w, "Time policy:         exclude triggers {}", names.join(" "))
        }
    };
    let _ = writeln!(w, "Chunks:              {}", plan.chunks.len());
    let _ = writeln!(w, "Input samples:       {}", report.samples_in);
    let _ = writeln!(w, "Output samples:      {}", report.samples_out);
    let _ = writeln!(
        w,
        "Sampling frequency:  {} ({frequency_source})",
        report.sampling_frequency
    );
    let _ = writeln!(
        w,
        "Temporal filter:     highpass {:?}  lowpass {:?}  notch {:?}",
        params.filter.highpass, params.filter.lowpass, params.filter.notch
    );
    let _ = writeln!(
        w,
        "Spatial filter:      {}",
        params
            .filter
            .spatial
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".into())
    );
    let _ = writeln!(w, "Reference:           {:?}", params.reference);
    let _ = match params.baseline {
        Some(b) => writeln!(w, "Baseline window:     [{}, {}]", b.from, b.to),
        None => writeln!(w, "Baseline window:     none"),
    };
    let _ = writeln!(
        w,
        "Rescaling:           {:?} (factor {})",
        params.rescale, report.rescale_factor
    );
    let _ = match params.mode {
        OutputMode::Sequence { downsample } => {
            writeln!(w, "Mode:                sequence, downsample {downsample}")
        }
        OutputMode::Average => writeln!(w, "Mode:                average"),
    };
    let _ = writeln!(w, "Format:              .{}", params.format.extension());
    let _ = writeln!(
        w,
        "Processing sequence: read (+margin) -> spatial filter -> temporal filter -> \
         reference -> baseline -> rescale -> {} -> pseudo tracks",
        match params.mode {
            OutputMode::Average => "average",
            OutputMode::Sequence { .. } => "downsample",
        }
    );
    for warning in &report.warnings {
        let _ = writeln!(w, "Warning:             {warning}");
    }
    text
}
