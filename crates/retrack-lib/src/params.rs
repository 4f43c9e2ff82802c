use crate::error::{ReprocessError, Result};
use crate::output::OutputFormat;
use crate::reference::ReferencePolicy;
use crate::timerange::{OutputMode, TimePolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Raw job description as written in a TOML file. Everything is
/// optional here; [`JobSpec::resolve`] turns it into the typed,
/// validated [`ReprocessParams`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub channels: ChannelsSpec,
    #[serde(default)]
    pub roi: Vec<RoiDef>,
    #[serde(default)]
    pub time: TimeSpec,
    #[serde(default)]
    pub filter: FilterSpec,
    #[serde(default)]
    pub reference: ReferenceSpec,
    #[serde(default)]
    pub baseline: Option<BaselineSpec>,
    #[serde(default)]
    pub rescale: RescaleSpec,
    #[serde(default)]
    pub output: OutputSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelsSpec {
    /// Selection expression; empty means every native channel.
    #[serde(default)]
    pub selection: String,
    /// Names of synthetic null channels to insert.
    #[serde(default)]
    pub nulls: Vec<String>,
}

/// One named channel group averaged together on ROI export.
#[derive(Debug, Clone, Deserialize)]
pub struct RoiDef {
    pub name: String,
    /// Selection expression over native channels.
    pub channels: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeSpec {
    /// "interval" (default), "keep-triggers" or "exclude-triggers".
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub from: Option<usize>,
    #[serde(default)]
    pub to: Option<usize>,
    #[serde(default)]
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub highpass: Option<f64>,
    #[serde(default)]
    pub lowpass: Option<f64>,
    #[serde(default)]
    pub notch: Option<f64>,
    /// Path to a spatial filter weight matrix (TSV).
    #[serde(default)]
    pub spatial: Option<PathBuf>,
    /// Leave auxiliary channels out of filtering.
    #[serde(default)]
    pub exclude_aux: bool,
    /// Sampling frequency recorded with the filter settings, used when
    /// the document itself does not carry one.
    #[serde(default)]
    pub sampling_frequency: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReferenceSpec {
    /// "as-recorded" (default), "average" or "tracks".
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub tracks: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaselineSpec {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RescaleSpec {
    /// "none" (default), "constant" or "mean-gfp".
    #[serde(default)]
    pub policy: Option<String>,
    #[serde(default)]
    pub factor: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputSpec {
    /// "sequence" (default) or "average".
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub downsample: Option<usize>,
    /// "sef" (default), "eph" or "ep".
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub markers: Option<bool>,
    #[serde(default)]
    pub concatenate: Option<bool>,
    #[serde(default)]
    pub sampling_frequency: Option<f64>,
    #[serde(default)]
    pub silent: Option<bool>,
}

/// Baseline correction window, absolute sample indices, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineWindow {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RescalePolicy {
    None,
    Constant(f64),
    /// Factor derived from the reciprocal mean global field power of
    /// the whole selection.
    MeanGfp,
}

/// Temporal/spatial filtering request.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    pub highpass: Option<f64>,
    pub lowpass: Option<f64>,
    pub notch: Option<f64>,
    pub spatial: Option<PathBuf>,
    pub exclude_aux: bool,
    pub recorded_frequency: Option<f64>,
}

impl FilterPolicy {
    pub fn has_temporal(&self) -> bool {
        self.highpass.is_some() || self.lowpass.is_some() || self.notch.is_some()
    }
}

/// Validated configuration for one invocation; consumed read-only.
#[derive(Debug, Clone)]
pub struct ReprocessParams {
    pub selection: String,
    pub nulls: Vec<String>,
    /// Non-empty means ROI export.
    pub rois: Vec<RoiDef>,
    pub time: TimePolicy,
    pub filter: FilterPolicy,
    pub reference: ReferencePolicy,
    pub baseline: Option<BaselineWindow>,
    pub rescale: RescalePolicy,
    pub mode: OutputMode,
    pub format: OutputFormat,
    pub write_markers: bool,
    pub concatenate: bool,
    pub default_frequency: Option<f64>,
    pub silent: bool,
}

impl ReprocessParams {
    pub fn roi_export(&self) -> bool {
        !self.rois.is_empty()
    }
}

impl JobSpec {
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| ReprocessError::InvalidParameters(format!("job file: {e}")))
    }

    /// Validate the raw job description and produce the typed
    /// parameter record. Fails fast, before any file is touched.
    pub fn resolve(&self) -> Result<ReprocessParams> {
        let time = self.resolve_time()?;
        let reference = self.resolve_reference()?;
        let rescale = self.resolve_rescale()?;
        let (mode, format) = self.resolve_output()?;

        for roi in &self.roi {
            if roi.name.trim().is_empty() || roi.channels.trim().is_empty() {
                return Err(ReprocessError::InvalidParameters(
                    "ROI definitions need a name and a channel list".into(),
                ));
            }
        }
        if !self.roi.is_empty() && !self.channels.nulls.is_empty() {
            return Err(ReprocessError::InvalidParameters(
                "null channels cannot be added to a ROI export".into(),
            ));
        }

        let baseline = self.baseline.as_ref().map(|b| BaselineWindow {
            from: b.from.min(b.to),
            to: b.from.max(b.to),
        });

        Ok(ReprocessParams {
            selection: self.channels.selection.clone(),
            nulls: self.channels.nulls.clone(),
            rois: self.roi.clone(),
            time,
            filter: FilterPolicy {
                highpass: self.filter.highpass,
                lowpass: self.filter.lowpass,
                notch: self.filter.notch,
                spatial: self.filter.spatial.clone(),
                exclude_aux: self.filter.exclude_aux,
                recorded_frequency: self.filter.sampling_frequency,
            },
            reference,
            baseline,
            rescale,
            mode,
            format,
            write_markers: self.output.markers.unwrap_or(true),
            concatenate: self.output.concatenate.unwrap_or(false),
            default_frequency: self.output.sampling_frequency,
            silent: self.output.silent.unwrap_or(false),
        })
    }

    fn resolve_time(&self) -> Result<TimePolicy> {
        let policy = self.time.policy.as_deref().unwrap_or("interval");
        match policy {
            "interval" => Ok(TimePolicy::Interval {
                from: self.time.from.unwrap_or(0),
                to: self.time.to.unwrap_or(usize::MAX),
            }),
            "keep-triggers" | "exclude-triggers" => {
                if self.time.triggers.is_empty() {
                    return Err(ReprocessError::InvalidParameters(format!(
                        "time policy '{policy}' needs a non-empty trigger list"
                    )));
                }
                let names = self.time.triggers.clone();
                if policy == "keep-triggers" {
                    Ok(TimePolicy::KeepTriggers { names })
                } else {
                    Ok(TimePolicy::ExcludeTriggers { names })
                }
            }
            other => Err(ReprocessError::InvalidParameters(format!(
                "unknown time policy '{other}'"
            ))),
        }
    }

    fn resolve_reference(&self) -> Result<ReferencePolicy> {
        let policy = self.reference.policy.as_deref().unwrap_or("as-recorded");
        match policy {
            "as-recorded" => Ok(ReferencePolicy::AsRecorded),
            "average" => Ok(ReferencePolicy::Average),
            "tracks" => {
                let tracks = self
                    .reference
                    .tracks
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        ReprocessError::InvalidParameters(
                            "reference policy 'tracks' needs a channel list".into(),
                        )
                    })?;
                Ok(ReferencePolicy::Tracks(tracks.to_string()))
            }
            other => Err(ReprocessError::InvalidParameters(format!(
                "unknown reference policy '{other}'"
            ))),
        }
    }

    fn resolve_rescale(&self) -> Result<RescalePolicy> {
        let policy = self.rescale.policy.as_deref().unwrap_or("none");
        match policy {
            "none" => Ok(RescalePolicy::None),
            "mean-gfp" => Ok(RescalePolicy::MeanGfp),
            "constant" => {
                let factor = self.rescale.factor.ok_or_else(|| {
                    ReprocessError::InvalidParameters(
                        "rescale policy 'constant' needs a factor".into(),
                    )
                })?;
                if !factor.is_finite() || factor == 0.0 {
                    return Err(ReprocessError::InvalidParameters(format!(
                        "rescale factor {factor} is not usable"
                    )));
                }
                Ok(RescalePolicy::Constant(factor))
            }
            other => Err(ReprocessError::InvalidParameters(format!(
                "unknown rescale policy '{other}'"
            ))),
        }
    }

    fn resolve_output(&self) -> Result<(OutputMode, OutputFormat)> {
        let downsample = self.output.downsample.unwrap_or(1).max(1);
        let mode = match self.output.mode.as_deref().unwrap_or("sequence") {
            "sequence" => OutputMode::Sequence { downsample },
            "average" => {
                if downsample > 1 {
                    return Err(ReprocessError::InvalidParameters(
                        "average mode cannot be combined with downsampling".into(),
                    ));
                }
                OutputMode::Average
            }
            other => {
                return Err(ReprocessError::InvalidParameters(format!(
                    "unknown output mode '{other}'"
                )))
            }
        };
        let format = match self.output.format.as_deref().unwrap_or("sef") {
            "sef" => OutputFormat::Sef,
            "eph" => OutputFormat::Eph,
            "ep" => OutputFormat::Ep,
            other => {
                return Err(ReprocessError::InvalidParameters(format!(
                    "unknown output format '{other}'"
                )))
            }
        };
        Ok((mode, format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_to_full_interval_sequence() {
        let params = JobSpec::default().resolve().unwrap();
        assert_eq!(
            params.time,
            TimePolicy::Interval {
                from: 0,
                to: usize::MAX
            }
        );
        assert_eq!(params.mode, OutputMode::Sequence { downsample: 1 });
        assert_eq!(params.format, OutputFormat::Sef);
        assert!(params.write_markers);
        assert!(!params.concatenate);
    }

    #[test]
    fn trigger_policy_requires_a_trigger_list() {
        let job = JobSpec::from_toml("[time]\npolicy = \"keep-triggers\"\n").unwrap();
        let err = job.resolve().unwrap_err();
        assert!(matches!(err, ReprocessError::InvalidParameters(_)));
    }

    #[test]
    fn average_mode_rejects_downsampling() {
        let job =
            JobSpec::from_toml("[output]\nmode = \"average\"\ndownsample = 4\n").unwrap();
        assert!(job.resolve().is_err());
    }

    #[test]
    fn reversed_baseline_window_is_swapped() {
        let job = JobSpec::from_toml("[baseline]\nfrom = 30\nto = 10\n").unwrap();
        let params = job.resolve().unwrap();
        assert_eq!(params.baseline, Some(BaselineWindow { from: 10, to: 30 }));
    }

    #[test]
    fn full_job_file_parses() {
        let text = r#"
[channels]
selection = "* gfp"
nulls = ["EOG"]

[time]
policy = "exclude-triggers"
triggers = ["artifact"]

[filter]
highpass = 1.0
lowpass = 40.0
exclude_aux = true

[reference]
policy = "average"

[baseline]
from = 0
to = 49

[rescale]
policy = "constant"
factor = 10.0

[output]
mode = "sequence"
downsample = 4
format = "eph"
markers = true
"#;
        let params = JobSpec::from_toml(text).unwrap().resolve().unwrap();
        assert_eq!(params.rescale, RescalePolicy::Constant(10.0));
        assert_eq!(params.format, OutputFormat::Eph);
        assert!(params.filter.exclude_aux);
        assert!(matches!(params.time, TimePolicy::ExcludeTriggers { .. }));
    }

    #[test]
    fn roi_export_forbids_null_channels() {
        let text = r#"
[channels]
nulls = ["N1"]

[[roi]]
name = "frontal"
channels = "1-2"
"#;
        let err = JobSpec::from_toml(text).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ReprocessError::InvalidParameters(_)));
    }
}
