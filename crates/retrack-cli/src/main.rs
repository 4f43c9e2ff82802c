use anyhow::Result;
use clap::{Parser, Subcommand};
use retrack_lib::{io as tracks_io, pipeline, JobSpec};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "retrack",
    version,
    about = "Batch reprocessing of multi-channel tracks recordings"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reprocess recordings according to a TOML job description
    Reprocess {
        /// Job description file
        #[arg(long)]
        job: PathBuf,
        /// Input recordings, processed in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Directory for the outputs (defaults to each input's own)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Print a recording's header summary as JSON
    Info { file: PathBuf },
}

fn main() -> Result<()> {
    env_logger::init();
    match Cli::parse().command {
        Commands::Reprocess {
            job,
            files,
            out_dir,
        } => cmd_reprocess(&job, &files, out_dir.as_deref()),
        Commands::Info { file } => cmd_info(&file),
    }
}

fn cmd_reprocess(job: &Path, files: &[PathBuf], out_dir: Option<&Path>) -> Result<()> {
    let params = JobSpec::read(job)?.resolve()?;
    let batch = pipeline::reprocess_batch(files, &params, out_dir);
    for outcome in &batch.outcomes {
        println!("{}", serde_json::to_string(outcome)?);
    }
    if batch.all_failed() {
        anyhow::bail!("every input failed");
    }
    Ok(())
}

#[derive(Serialize)]
struct InfoSummary {
    title: String,
    channels: usize,
    channel_names: Vec<String>,
    samples: usize,
    sampling_frequency: Option<f64>,
    markers: usize,
}

fn cmd_info(file: &Path) -> Result<()> {
    let doc = tracks_io::open_document(file)?;
    let summary = InfoSummary {
        title: doc.title().to_string(),
        channels: doc.channel_count(),
        channel_names: doc.channel_names().to_vec(),
        samples: doc.sample_count(),
        sampling_frequency: doc.sampling_frequency(),
        markers: doc.markers().len(),
    };
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
