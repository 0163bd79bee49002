use std::{
    fs,
    io::{self, Write},
    path::Path,
};

/// Replaces `path` with `contents` without ever exposing a partially written
/// file: data goes to a temporary file in the same directory, which is synced
/// and then renamed over the target.
pub fn write_atomic<P: AsRef<Path>>(path: P, contents: &[u8]) -> io::Result<()> {
    let path = path.as_ref();

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // Create parent directory if it doesn't exist
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    tmp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
