pub mod document;
pub mod engine;
pub mod error;
pub mod filter;
pub mod io;
pub mod layout;
pub mod output;
pub mod params;
pub mod pipeline;
pub mod reference;
pub mod signal;
pub mod spatial;
pub mod timerange;

pub use document::{MemoryDocument, TracksDocument};
pub use error::{EmptyTimeReason, ReprocessError};
pub use params::{JobSpec, ReprocessParams};
pub use pipeline::{reprocess_batch, reprocess_file, BatchReport, FileReport};
pub use signal::{Block, DataKind, Marker, RecordingKind};
