use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// A reader never observes a half-written routing file or unit.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Overwrite an existing file through its own inode. Kernel control files
/// (sysfs, procfs) reject the tempfile + rename that [`atomic_write`] uses,
/// and they must already exist.
pub fn write_in_place(path: &Path, data: &[u8]) -> Result<()> {
    let mut f = std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)?;
    f.write_all(data)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Write a file only if it does not already exist. Returns true if written.
pub fn write_if_missing(path: &Path, data: &[u8]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    atomic_write(path, data)?;
    Ok(true)
}

/// Copy `from` to `to` unless `to` already exists. Returns true if copied.
pub fn copy_if_missing(from: &Path, to: &Path) -> Result<bool> {
    if to.exists() {
        return Ok(false);
    }
    let data = std::fs::read(from)?;
    atomic_write(to, &data)?;
    Ok(true)
}

/// Append lines to a file, creating it (and its parents) if it doesn't exist.
///
/// Inserts a newline separator first when the existing content does not end
/// with one. Lines already present are appended again.
pub fn append_lines(path: &Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let needs_sep = match std::fs::read(path) {
        Ok(existing) => !existing.is_empty() && !existing.ends_with(b"\n"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => return Err(e.into()),
    };
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if needs_sep {
        writeln!(f)?;
    }
    for line in lines {
        writeln!(f, "{line}")?;
    }
    Ok(())
}

/// Append only the lines not already present (exact line match).
/// Returns the number of lines written.
pub fn append_missing_lines(path: &Path, lines: &[String]) -> Result<usize> {
    let existing = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let missing: Vec<String> = lines
        .iter()
        .filter(|l| !existing.lines().any(|e| e == l.as_str()))
        .cloned()
        .collect();
    if missing.is_empty() {
        return Ok(0);
    }
    append_lines(path, &missing)?;
    Ok(missing.len())
}
