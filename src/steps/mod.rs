//! Typed provisioning steps.
//!
//! External commands implement [`CommandArgs`](crate::step_traits::CommandArgs);
//! file steps run natively and take an optional [`Owner`] so they can be
//! exercised without root.
//!
//! File steps write into a home directory the service account controls, so
//! nothing here follows a symlink: targets are refused when they are links,
//! directories are opened with `O_NOFOLLOW`, and files are written to a
//! fresh temp file that is renamed over the target. Mode and ownership are
//! set through the open descriptor.

pub mod bootstrap;
pub mod entrypoint;
pub mod ssh;
pub mod user;

use nix::libc;
use nix::unistd::{Gid, Uid};
use std::fs::{self, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use crate::error::{BaoInstallError, Result};

/// Numeric ownership applied to files created for the service account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: Uid,
    pub gid: Gid,
}

impl Owner {
    /// chown through an open descriptor; `path` is only used in errors
    pub fn apply(&self, file: &File, path: &Path) -> Result<()> {
        std::os::unix::fs::fchown(file, Some(self.uid.as_raw()), Some(self.gid.as_raw()))
            .map_err(|e| BaoInstallError::system(format!("chown {}: {}", path.display(), e)))
    }
}

/// Error out if `path` is a symlink. A missing path is fine.
pub fn refuse_symlink(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(BaoInstallError::validation(format!(
            "refusing to follow symlink at {}",
            path.display()
        ))),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Create `path` if missing, then set its mode and owner without following
/// a symlink planted in its place.
pub fn prepare_dir(path: &Path, mode: u32, owner: Option<&Owner>) -> Result<()> {
    refuse_symlink(path)?;
    match fs::create_dir(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e.into()),
    }

    let dir = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_DIRECTORY)
        .open(path)
        .map_err(|e| BaoInstallError::validation(format!("{}: {}", path.display(), e)))?;
    dir.set_permissions(Permissions::from_mode(mode))?;
    if let Some(owner) = owner {
        owner.apply(&dir, path)?;
    }
    Ok(())
}

/// Replace `target` with content produced by `fill`.
///
/// The content goes to a new temp file next to the target, gets its mode
/// and owner, and is renamed over the target. Returns what `fill` returns.
pub fn replace_file<F>(target: &Path, mode: u32, owner: Option<&Owner>, fill: F) -> Result<u64>
where
    F: FnOnce(&mut File) -> io::Result<u64>,
{
    refuse_symlink(target)?;
    if target.is_dir() {
        return Err(BaoInstallError::validation(format!(
            "{} is a directory",
            target.display()
        )));
    }

    let (Some(parent), Some(name)) = (target.parent(), target.file_name()) else {
        return Err(BaoInstallError::validation(format!(
            "invalid target path {}",
            target.display()
        )));
    };
    let tmp = parent.join(format!(".{}.bao-install.tmp", name.to_string_lossy()));

    // a leftover from an interrupted run; remove_file never follows links
    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let written = write_new(&tmp, mode, owner, fill).and_then(|written| {
        fs::rename(&tmp, target)?;
        Ok(written)
    });
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

fn write_new<F>(path: &Path, mode: u32, owner: Option<&Owner>, fill: F) -> Result<u64>
where
    F: FnOnce(&mut File) -> io::Result<u64>,
{
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)?;
    let written = fill(&mut file)?;
    // the create mode is filtered by the umask
    file.set_permissions(Permissions::from_mode(mode))?;
    if let Some(owner) = owner {
        owner.apply(&file, path)?;
    }
    file.sync_all()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn write_hello(file: &mut File) -> io::Result<u64> {
        file.write_all(b"hello")?;
        Ok(5)
    }

    #[test]
    fn test_replace_file_sets_mode_and_cleans_up() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out");
        fs::write(&target, "old").unwrap();

        assert_eq!(replace_file(&target, 0o640, None, write_hello).unwrap(), 5);
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
        assert_eq!(fs::metadata(&target).unwrap().permissions().mode() & 0o777, 0o640);

        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_replace_file_refuses_symlink() {
        let dir = tempdir().unwrap();
        let victim = dir.path().join("victim");
        fs::write(&victim, "secret").unwrap();
        fs::set_permissions(&victim, Permissions::from_mode(0o600)).unwrap();
        let target = dir.path().join("out");
        symlink(&victim, &target).unwrap();

        let err = replace_file(&target, 0o755, None, write_hello).unwrap_err();
        assert!(err.to_string().contains("symlink"), "{err}");
        assert_eq!(fs::read_to_string(&victim).unwrap(), "secret");
        assert_eq!(fs::metadata(&victim).unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn test_replace_file_refuses_directory() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out");
        fs::create_dir(&target).unwrap();
        assert!(replace_file(&target, 0o644, None, write_hello).is_err());
        assert!(target.is_dir());
    }

    #[test]
    fn test_replace_file_removes_temp_on_fill_error() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("out");
        let result = replace_file(&target, 0o644, None, |_| Err(io::Error::other("boom")));
        assert!(result.is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_prepare_dir_refuses_symlink() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        fs::set_permissions(&real, Permissions::from_mode(0o755)).unwrap();
        let link = dir.path().join(".ssh");
        symlink(&real, &link).unwrap();

        assert!(prepare_dir(&link, 0o700, None).is_err());
        assert_eq!(fs::metadata(&real).unwrap().permissions().mode() & 0o777, 0o755);
    }

    #[test]
    fn test_prepare_dir_creates_and_tightens() {
        let dir = tempdir().unwrap();
        let ssh = dir.path().join(".ssh");
        prepare_dir(&ssh, 0o700, None).unwrap();
        assert_eq!(fs::metadata(&ssh).unwrap().permissions().mode() & 0o777, 0o700);

        fs::set_permissions(&ssh, Permissions::from_mode(0o777)).unwrap();
        prepare_dir(&ssh, 0o700, None).unwrap();
        assert_eq!(fs::metadata(&ssh).unwrap().permissions().mode() & 0o777, 0o700);
    }
}
