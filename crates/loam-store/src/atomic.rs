use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Sidecar path used while a file is being replaced.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Replace `path` with `bytes` so readers see either the old or the new
/// contents, never a mix.
///
/// The payload goes to `<path>.tmp` (created exclusively, any stale copy
/// removed first), is synced, then renamed over `path`. On failure the
/// sidecar is removed and `path` is untouched.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = temp_path(path);
    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let result = write_sidecar(&tmp, bytes).and_then(|()| fs::rename(&tmp, path));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    sync_parent(path);
    Ok(())
}

fn write_sidecar(tmp: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o666);
    }
    let mut file = options.open(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()
}

// Best effort: persists the rename on filesystems that need it.
#[cfg(unix)]
fn sync_parent(path: &Path) {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return;
    };
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent(_: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_contents_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bson");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn stale_sidecar_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bson");
        fs::write(temp_path(&path), b"stale").unwrap();
        write_atomic(&path, b"fresh").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"fresh");
    }

    #[test]
    fn failure_leaves_original() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory in the target's place makes the rename fail.
        let blocked = dir.path().join("blocked");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("child"), b"keep").unwrap();
        assert!(write_atomic(&blocked, b"x").is_err());
        assert!(!temp_path(&blocked).exists());
        assert_eq!(fs::read(blocked.join("child")).unwrap(), b"keep");
    }
}
