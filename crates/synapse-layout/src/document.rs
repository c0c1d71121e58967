//! Atomic JSON documents.
//!
//! Writes go to a uniquely named temp file in the destination directory, are
//! synced, then renamed over the target. A crash leaves either the old
//! document or the new one, never a prefix of either.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{LayoutError, Result};

/// Read a JSON document, returning `None` when it does not exist.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|source| LayoutError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Write a JSON document using the write-to-temp-then-rename pattern.
pub fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value).map_err(|source| LayoutError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        writer.write_all(b"\n")?;
        writer.flush()?;
    }

    // Ensure data is on disk before the rename publishes it
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    tracing::trace!(path = %path.display(), "document written");
    Ok(())
}
