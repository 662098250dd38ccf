use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

const MMAP_THRESHOLD: u64 = 1024 * 1024; // 1 MiB

/// Why a file could not be turned into text
#[derive(Debug, thiserror::Error)]
pub enum ReadTextError {
    #[error("not found")]
    NotFound,
    #[error("not a regular file")]
    NotAFile,
    #[error("not valid UTF-8")]
    NotUtf8,
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Read a file verbatim as UTF-8. Large files go through a memory map;
/// the bytes are never normalized.
pub fn read_text_exact(path: &Path) -> Result<String, ReadTextError> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ReadTextError::NotFound),
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Err(ReadTextError::NotAFile);
    }

    if metadata.len() > MMAP_THRESHOLD {
        let file = File::open(path)?;
        // Safety: read-only mapping, copied out before the map is dropped
        let mmap = unsafe { Mmap::map(&file) }?;
        let text = std::str::from_utf8(&mmap).map_err(|_| ReadTextError::NotUtf8)?;
        Ok(text.to_owned())
    } else {
        let bytes = std::fs::read(path)?;
        String::from_utf8(bytes).map_err(|_| ReadTextError::NotUtf8)
    }
}

/// Current on-disk text, `None` when the file does not exist.
pub fn read_text_if_exists(path: &Path) -> Result<Option<String>> {
    match read_text_exact(path) {
        Ok(s) => Ok(Some(s)),
        Err(ReadTextError::NotFound) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}
