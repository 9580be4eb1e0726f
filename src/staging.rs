use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Write `bytes` next to `dest` and rename into place.
pub fn write_bytes_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let file_name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("staged");
    let tmp_path = dest
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.tmp"));
    fs::write(&tmp_path, bytes).with_context(|| format!("write {}", tmp_path.display()))?;
    if let Err(err) = fs::rename(&tmp_path, dest) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("publish {}", dest.display()));
    }
    Ok(())
}

pub fn write_text_atomic(dest: &Path, text: &str) -> Result<()> {
    write_bytes_atomic(dest, text.as_bytes())
}

pub fn write_json_atomic<T: serde::Serialize>(dest: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value).context("serialize JSON")?;
    bytes.push(b'\n');
    write_bytes_atomic(dest, &bytes)
}

/// Move `source` to `dest`, copying across filesystems.
pub fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    fs::copy(source, dest)
        .with_context(|| format!("copy {} to {}", source.display(), dest.display()))?;
    fs::remove_file(source).with_context(|| format!("remove {}", source.display()))?;
    Ok(())
}

/// Remove `path` if present.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}
