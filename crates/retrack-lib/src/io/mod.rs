pub mod edf;
pub mod sef;

use crate::document::TracksDocument;
use crate::error::{ReprocessError, Result};
use crate::output::{companion_path, read_marker_file};
use crate::signal::Marker;
use std::path::Path;

/// Open a recording by file extension.
pub fn open_document(path: &Path) -> Result<Box<dyn TracksDocument>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "sef" => Ok(Box::new(sef::SefDocument::open(path)?)),
        "edf" => Ok(Box::new(edf::EdfDocument::open(path)?)),
        other => Err(ReprocessError::Format(format!(
            "unsupported input format '.{other}' ({})",
            path.display()
        ))),
    }
}

/// Markers from the sibling `.mrk` companion, if one exists.
pub fn sibling_markers(path: &Path) -> Vec<Marker> {
    let companion = companion_path(path, "mrk");
    if companion.is_file() {
        read_marker_file(&companion).unwrap_or_default()
    } else {
        Vec::new()
    }
}

/// File stem used as the document title in reports and markers.
pub fn title_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
