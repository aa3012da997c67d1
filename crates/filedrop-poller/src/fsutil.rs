//! Filesystem moves with copy fallbacks across devices.

use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use fs2::FileExt;
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{StateError, StateResult};
use crate::lockfile::is_contended;

/// Move a single file. The destination must not exist.
///
/// A rename is attempted first. When it fails the file is copied and the
/// source removed; if the source cannot be removed the copy is undone so the
/// file exists in exactly one place.
pub(crate) fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    if destination.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination {} already exists", destination.display()),
        ));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }

    copy_then_remove(source, destination, |path| fs::remove_file(path))
}

fn copy_then_remove(
    source: &Path,
    destination: &Path,
    remove: impl Fn(&Path) -> io::Result<()>,
) -> io::Result<()> {
    fs::copy(source, destination)?;
    if let Err(err) = remove(source) {
        if let Err(rollback) = remove(destination) {
            warn!(
                source = %source.display(),
                destination = %destination.display(),
                error = %rollback,
                "cannot undo copy; file exists in both places"
            );
        }
        return Err(err);
    }
    Ok(())
}

/// Move a directory tree, copying it when a rename is not possible.
pub(crate) fn move_dir(source: &Path, destination: &Path) -> io::Result<()> {
    if destination.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("destination {} already exists", destination.display()),
        ));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }

    copy_tree(source, destination)?;
    fs::remove_dir_all(source)
}

fn copy_tree(source: &Path, destination: &Path) -> io::Result<()> {
    fs::create_dir_all(destination)?;
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Whether another process holds a lock on `path`.
///
/// A missing or unreadable file aborts; other failures are retried.
pub(crate) fn is_locked(path: &Path) -> StateResult<bool> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ) =>
        {
            return Err(
                StateError::abort(format!("cannot open {}", path.display())).with_source(err),
            );
        }
        Err(err) => {
            return Err(
                StateError::retry(format!("cannot open {}", path.display())).with_source(err),
            );
        }
    };

    match FileExt::try_lock_shared(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            Ok(false)
        }
        Err(err) if is_contended(&err) => Ok(true),
        Err(err) => Err(
            StateError::retry(format!("cannot test lock on {}", path.display())).with_source(err),
        ),
    }
}

/// Size and modification time in epoch milliseconds of a regular file.
pub(crate) fn snapshot(path: &Path) -> io::Result<(u64, i64)> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }
    let modified = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
    Ok((metadata.len(), modified))
}

/// Last path extension including the dot, when the name has one.
pub(crate) fn extension_of(path: &Path) -> &str {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => &name[pos..],
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn move_file_refuses_existing_destination() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let src = temp.path().join("a.txt");
        let dst = temp.path().join("b.txt");
        fs::write(&src, "a")?;
        fs::write(&dst, "b")?;
        let err = move_file(&src, &dst).err();
        assert_eq!(err.map(|e| e.kind()), Some(io::ErrorKind::AlreadyExists));
        assert!(src.exists());
        Ok(())
    }

    #[test]
    fn failed_copy_rollback_keeps_source_error() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let src = temp.path().join("a.txt");
        let dst = temp.path().join("b.txt");
        fs::write(&src, "payload")?;
        let err = copy_then_remove(&src, &dst, |_| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        })
        .err();
        assert_eq!(err.map(|e| e.kind()), Some(io::ErrorKind::PermissionDenied));
        assert!(src.exists());
        assert!(dst.exists());
        Ok(())
    }

    #[test]
    fn failed_source_removal_undoes_copy() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let src = temp.path().join("a.txt");
        let dst = temp.path().join("b.txt");
        fs::write(&src, "payload")?;
        let err = copy_then_remove(&src, &dst, |path| {
            if path == src.as_path() {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            } else {
                fs::remove_file(path)
            }
        })
        .err();
        assert!(err.is_some());
        assert!(src.exists());
        assert!(!dst.exists());
        Ok(())
    }

    #[test]
    fn move_file_creates_parent() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let src = temp.path().join("a.txt");
        let dst = temp.path().join("nested/dir/a.txt");
        fs::write(&src, "payload")?;
        move_file(&src, &dst)?;
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dst)?, "payload");
        Ok(())
    }

    #[test]
    fn move_dir_moves_tree() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("inner"))?;
        fs::write(src.join("inner/file"), "x")?;
        let dst = temp.path().join("out/dst");
        move_dir(&src, &dst)?;
        assert!(!src.exists());
        assert!(dst.join("inner/file").is_file());
        Ok(())
    }

    #[test]
    fn copy_tree_mirrors_layout() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("a/b"))?;
        fs::write(src.join("a/b/c"), "c")?;
        let dst = temp.path().join("dst");
        copy_tree(&src, &dst)?;
        assert_eq!(fs::read_to_string(dst.join("a/b/c"))?, "c");
        Ok(())
    }

    #[test]
    fn lock_check_reports_missing_file_as_abort() {
        let err = is_locked(Path::new("/definitely/missing/file")).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Abort));
    }

    #[test]
    fn lock_check_detects_exclusive_lock() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("busy.dat");
        fs::write(&path, "x")?;
        assert!(!is_locked(&path)?);

        let holder = fs::OpenOptions::new().read(true).write(true).open(&path)?;
        FileExt::lock_exclusive(&holder)?;
        assert!(is_locked(&path)?);
        FileExt::unlock(&holder)?;
        assert!(!is_locked(&path)?);
        Ok(())
    }

    #[test]
    fn snapshot_rejects_directories() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        assert!(snapshot(temp.path()).is_err());
        let file = temp.path().join("a");
        fs::write(&file, "12345")?;
        let (size, modified) = snapshot(&file)?;
        assert_eq!(size, 5);
        assert!(modified > 0);
        Ok(())
    }

    #[test]
    fn extensions_follow_last_dot() {
        assert_eq!(extension_of(Path::new("/a/report.tar.gz")), ".gz");
        assert_eq!(extension_of(Path::new("/a/.hidden")), "");
        assert_eq!(extension_of(Path::new("/a/trailing.")), "");
        assert_eq!(extension_of(Path::new("/a/plain")), "");
    }
}
