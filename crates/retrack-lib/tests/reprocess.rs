use retrack_lib::io::sef::SefDocument;
use retrack_lib::output::{companion_path, read_marker_file, ConcatState};
use retrack_lib::pipeline::{finalize_concat, reprocess_batch, reprocess_file, output_path};
use retrack_lib::{Block, JobSpec, Marker, MemoryDocument, ReprocessError, TracksDocument};
use std::path::PathBuf;

fn doc(title: &str, channels: usize, samples: usize) -> MemoryDocument {
    let mut data = Block::zeros(channels, samples);
    for c in 0..channels {
        for t in 0..samples {
            data.set(c, t, (c + 1) as f64 * (t as f64).sin());
        }
    }
    let names = (0..channels).map(|i| format!("ch{}", i + 1)).collect();
    MemoryDocument::new(title, names, data).with_frequency(250.0)
}

fn params_from(toml: &str) -> retrack_lib::ReprocessParams {
    JobSpec::from_toml(toml).unwrap().resolve().unwrap()
}

#[test]
fn full_interval_sequence_keeps_every_sample() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.sef");
    let params = params_from(
        r#"
[time]
policy = "interval"
from = 0
to = 999
"#,
    );
    let input = doc("rec", 3, 1000);
    let mut carried = None;
    let report = reprocess_file(&input, &params, &out, &mut carried, None).unwrap();
    assert_eq!(report.samples_in, 1000);
    assert_eq!(report.samples_out, 1000);

    let written = SefDocument::open(&out).unwrap();
    assert_eq!(written.sample_count(), 1000);
    assert_eq!(written.channel_count(), 3);
    assert_eq!(written.sampling_frequency(), Some(250.0));
    // Companions exist.
    assert!(companion_path(&out, "vrb").is_file());
    assert!(companion_path(&out, "mrk").is_file());
}

#[test]
fn average_mode_produces_exactly_one_sample() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("avg.sef");
    let params = params_from("[output]\nmode = \"average\"\n");
    let input = doc("rec", 2, 500);
    let mut carried = None;
    let report = reprocess_file(&input, &params, &out, &mut carried, None).unwrap();
    assert_eq!(report.samples_out, 1);
    assert_eq!(SefDocument::open(&out).unwrap().sample_count(), 1);
}

#[test]
fn downsampling_divides_the_sample_count() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("ds.sef");
    let params = params_from("[output]\ndownsample = 4\n");
    let input = doc("rec", 2, 1000);
    let mut carried = None;
    let report = reprocess_file(&input, &params, &out, &mut carried, None).unwrap();
    assert_eq!(report.samples_out, 250);
}

#[test]
fn concatenating_three_files_merges_counts_and_markers() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("cat.sef");
    let params = params_from("[output]\nconcatenate = true\n");

    let lengths = [100usize, 150, 200];
    let mut state = ConcatState::new(None);
    let mut carried = None;
    for (i, &len) in lengths.iter().enumerate() {
        let input = doc(&format!("file{}", i + 1), 2, len);
        let report =
            reprocess_file(&input, &params, &out, &mut carried, Some(&mut state)).unwrap();
        assert_eq!(report.samples_out, len);
    }
    finalize_concat(state, &params).unwrap();

    let written = SefDocument::open(&out).unwrap();
    assert_eq!(written.sample_count(), 450);

    let markers = read_marker_file(&companion_path(&out, "mrk")).unwrap();
    let seg: Vec<&Marker> = markers
        .iter()
        .filter(|m| m.name.starts_with("seg"))
        .collect();
    assert_eq!(seg.len(), 3);
    assert_eq!(seg[0].from, 0);
    assert_eq!(seg[1].from, 100);
    assert_eq!(seg[2].from, 250);
    assert_eq!(seg[0].name, "seg1:file1");
    assert_eq!(seg[2].name, "seg3:file3");
}

#[test]
fn concatenation_without_shared_state_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("cat.sef");
    let params = params_from("[output]\nconcatenate = true\n");
    let input = doc("rec", 2, 100);
    let mut carried = None;
    let err = reprocess_file(&input, &params, &out, &mut carried, None).unwrap_err();
    assert!(matches!(err, ReprocessError::InvalidParameters(_)));
}

#[test]
fn missing_frequency_is_fatal_for_eph_only() {
    let dir = tempfile::tempdir().unwrap();
    let params_eph = params_from("[output]\nformat = \"eph\"\n");
    let params_sef = params_from("[output]\nformat = \"sef\"\n");

    let mut input = doc("rec", 2, 100);
    input.sampling_frequency = None;

    let mut carried = None;
    let err = reprocess_file(
        &input,
        &params_eph,
        &dir.path().join("out.eph"),
        &mut carried,
        None,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ReprocessError::MissingSamplingFrequency { .. }
    ));

    // The tolerant binary format goes through with frequency zero.
    let mut carried = None;
    let report = reprocess_file(
        &input,
        &params_sef,
        &dir.path().join("out.sef"),
        &mut carried,
        None,
    )
    .unwrap();
    assert_eq!(report.sampling_frequency, 0.0);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("sampling frequency")));
}

#[test]
fn carried_frequency_fills_in_for_later_files() {
    let dir = tempfile::tempdir().unwrap();
    let params = params_from("[output]\nformat = \"eph\"\n");

    let first = doc("first", 2, 50);
    let mut second = doc("second", 2, 50);
    second.sampling_frequency = None;

    let mut carried = None;
    reprocess_file(&first, &params, &dir.path().join("a.eph"), &mut carried, None).unwrap();
    assert_eq!(carried, Some(250.0));
    let report = reprocess_file(
        &second,
        &params,
        &dir.path().join("b.eph"),
        &mut carried,
        None,
    )
    .unwrap();
    assert_eq!(report.sampling_frequency, 250.0);
}

#[test]
fn keep_triggers_exports_marked_spans_only() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("trig.sef");
    let params = params_from(
        r#"
[time]
policy = "keep-triggers"
triggers = ["A"]
"#,
    );
    let input = doc("rec", 2, 1000)
        .with_markers(vec![Marker::new(10, 19, "A"), Marker::new(50, 59, "A")]);
    let mut carried = None;
    let report = reprocess_file(&input, &params, &out, &mut carried, None).unwrap();
    assert_eq!(report.samples_out, 20);

    // Markers are remapped into output coordinates.
    let markers = read_marker_file(&companion_path(&out, "mrk")).unwrap();
    assert_eq!(markers[0], Marker::new(0, 9, "A"));
    assert_eq!(markers[1], Marker::new(10, 19, "A"));
}

#[test]
fn exclude_triggers_writes_splice_markers() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("cut.sef");
    let params = params_from(
        r#"
[time]
policy = "exclude-triggers"
triggers = ["artifact"]
"#,
    );
    let input = doc("rec", 2, 100).with_markers(vec![Marker::new(40, 59, "artifact")]);
    let mut carried = None;
    let report = reprocess_file(&input, &params, &out, &mut carried, None).unwrap();
    assert_eq!(report.samples_out, 80);
    let markers = read_marker_file(&companion_path(&out, "mrk")).unwrap();
    assert!(markers.iter().any(|m| m.name == "Splice" && m.from == 40));
}

#[test]
fn roi_export_averages_groups() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("roi.sef");
    let params = params_from(
        r#"
[[roi]]
name = "front"
channels = "1-2"

[[roi]]
name = "back"
channels = "ch3"
"#,
    );
    let mut data = Block::zeros(3, 10);
    for t in 0..10 {
        data.set(0, t, 1.0);
        data.set(1, t, 3.0);
        data.set(2, t, 10.0);
    }
    let input = MemoryDocument::new(
        "rec",
        vec!["ch1".into(), "ch2".into(), "ch3".into()],
        data,
    )
    .with_frequency(100.0);
    let mut carried = None;
    let report = reprocess_file(&input, &params, &out, &mut carried, None).unwrap();
    assert_eq!(report.channels, 2);

    let written = SefDocument::open(&out).unwrap();
    let block = written.read_block(0, 9).unwrap();
    assert!((block.get(0, 0) - 2.0).abs() < 1e-6);
    assert!((block.get(1, 0) - 10.0).abs() < 1e-6);
    assert_eq!(written.channel_names(), &["front", "back"]);
}

#[test]
fn batch_skips_failed_files_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    // Two real input files on disk; only the first carries the trigger.
    let good = dir.path().join("good.sef");
    let bad = dir.path().join("bad.sef");
    for (path, markers) in [
        (&good, vec![Marker::new(5, 14, "A")]),
        (&bad, Vec::new()),
    ] {
        let params = params_from("");
        let input = doc("gen", 2, 100).with_markers(markers);
        let mut carried = None;
        reprocess_file(&input, &params, path, &mut carried, None).unwrap();
    }
    // Rename bad's marker companion away so it really has no markers.
    let _ = std::fs::remove_file(companion_path(&bad, "mrk"));

    let params = params_from(
        r#"
[time]
policy = "keep-triggers"
triggers = ["A"]
"#,
    );
    let inputs: Vec<PathBuf> = vec![good.clone(), bad.clone()];
    let batch = reprocess_batch(&inputs, &params, Some(dir.path()));
    assert_eq!(batch.outcomes.len(), 2);
    assert!(batch.outcomes[0].report.is_some());
    assert!(batch.outcomes[1].error.is_some());
    assert!(!batch.all_failed());
    assert!(output_path(&good, Some(dir.path()), params.format).is_file());
}

#[test]
fn mean_gfp_rescaling_normalizes_amplitude() {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use retrack_lib::engine::global_field_power;

    let mut rng = StdRng::seed_from_u64(7);
    let mut data = Block::zeros(4, 256);
    for c in 0..4 {
        for t in 0..256 {
            data.set(c, t, rng.gen_range(-50.0..50.0));
        }
    }
    let names = (0..4).map(|i| format!("ch{}", i + 1)).collect();
    let input = MemoryDocument::new("noise", names, data).with_frequency(128.0);

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("gfp.sef");
    let params = params_from("[rescale]\npolicy = \"mean-gfp\"\n");
    let mut carried = None;
    let report = reprocess_file(&input, &params, &out, &mut carried, None).unwrap();
    assert!(report.rescale_factor > 0.0);

    // After rescaling by total / sum-of-GFP the mean GFP is exactly 1.
    let written = SefDocument::open(&out).unwrap();
    let block = written.read_block(0, 255).unwrap();
    let channels: Vec<usize> = (0..4).collect();
    let mean_gfp: f64 = (0..256)
        .map(|t| global_field_power(&block, t, &channels))
        .sum::<f64>()
        / 256.0;
    assert!((mean_gfp - 1.0).abs() < 1e-4, "mean GFP was {mean_gfp}");
}

#[test]
fn pseudo_channels_ride_behind_the_selection() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("pseudo.sef");
    let params = params_from("[channels]\nselection = \"* GFP AVG\"\n");
    let input = doc("rec", 2, 20);
    let mut carried = None;
    let report = reprocess_file(&input, &params, &out, &mut carried, None).unwrap();
    assert_eq!(report.channels, 4);
    let written = SefDocument::open(&out).unwrap();
    assert_eq!(written.channel_names(), &["ch1", "ch2", "GFP", "AVG"]);
}
