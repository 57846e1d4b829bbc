//! Post-install smoke checks
//!
//! Three checks on a provisioned host:
//! - the service account exists
//! - the entrypoint is a regular file with mode 755 owned by the account
//! - the account's first authorized key equals the invoker's first key

use nix::unistd::Uid;
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use tracing::{debug, warn};

use crate::config_file::InstallConfig;
use crate::steps::entrypoint::ENTRYPOINT_MODE;
use crate::steps::ssh::{Invoker, read_first_key};
use crate::steps::user::{lookup_owner, user_exists};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyReport {
    pub checks: Vec<CheckResult>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

pub fn check_user(name: &str) -> CheckResult {
    match user_exists(name) {
        Ok(true) => CheckResult::pass("user", format!("user {} exists", name)),
        Ok(false) => CheckResult::fail("user", format!("user {} does not exist", name)),
        Err(e) => CheckResult::fail("user", e.to_string()),
    }
}

/// Mode must be exactly 755; ownership is only checked when `owner` is given.
pub fn check_entrypoint(path: &Path, owner: Option<Uid>) -> CheckResult {
    const NAME: &str = "entrypoint";

    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) => return CheckResult::fail(NAME, format!("{}: {}", path.display(), e)),
    };
    if !meta.is_file() {
        return CheckResult::fail(NAME, format!("{} is not a regular file", path.display()));
    }

    let mode = meta.permissions().mode() & 0o777;
    if mode != ENTRYPOINT_MODE {
        return CheckResult::fail(
            NAME,
            format!("{} has mode {:o}, expected {:o}", path.display(), mode, ENTRYPOINT_MODE),
        );
    }

    if let Some(uid) = owner {
        if meta.uid() != uid.as_raw() {
            return CheckResult::fail(
                NAME,
                format!("{} is owned by uid {}, expected {}", path.display(), meta.uid(), uid),
            );
        }
    }

    CheckResult::pass(NAME, format!("{} mode {:o}", path.display(), mode))
}

/// The installed key must equal the first key of the source file.
pub fn check_authorized_key(source: &Path, installed: &Path) -> CheckResult {
    const NAME: &str = "authorized-key";

    let expected = match read_first_key(source) {
        Ok(key) => key,
        Err(e) => return CheckResult::fail(NAME, e.to_string()),
    };
    let actual = match read_first_key(installed) {
        Ok(key) => key,
        Err(e) => return CheckResult::fail(NAME, e.to_string()),
    };

    if expected == actual {
        CheckResult::pass(NAME, format!("{} matches {}", installed.display(), source.display()))
    } else {
        CheckResult::fail(
            NAME,
            format!("{} does not match {}", installed.display(), source.display()),
        )
    }
}

/// Run all checks for a configuration against this machine.
pub fn verify_host(config: &InstallConfig, invoker: &Invoker) -> VerifyReport {
    let user = check_user(&config.user);

    let owner = match lookup_owner(&config.user) {
        Ok(owner) => Some(owner.uid),
        Err(e) => {
            debug!("skipping ownership check: {}", e);
            None
        }
    };
    let key_source = config
        .key_source
        .clone()
        .unwrap_or_else(|| invoker.authorized_keys_path());

    let report = VerifyReport {
        checks: vec![
            user,
            check_entrypoint(&config.entrypoint_target(), owner),
            check_authorized_key(&key_source, &config.authorized_keys_target()),
        ],
    };

    for failure in report.failures() {
        warn!(check = %failure.name, "{}", failure.detail);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_check_user() {
        assert!(check_user("root").passed);
        assert!(!check_user("bao-install-no-such-user").passed);
    }

    #[test]
    fn test_entrypoint_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bao.py");
        fs::write(&path, "x").unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        let result = check_entrypoint(&path, None);
        assert!(!result.passed);
        assert!(result.detail.contains("mode 644"));

        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(check_entrypoint(&path, None).passed);
    }

    #[test]
    fn test_entrypoint_owner() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bao.py");
        fs::write(&path, "x").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(check_entrypoint(&path, Some(Uid::effective())).passed);

        let other = Uid::from_raw(Uid::effective().as_raw().wrapping_add(4242));
        let result = check_entrypoint(&path, Some(other));
        assert!(!result.passed);
        assert!(result.detail.contains("owned by uid"));
    }

    #[test]
    fn test_entrypoint_missing_or_directory() {
        let dir = tempdir().unwrap();
        assert!(!check_entrypoint(&dir.path().join("absent"), None).passed);
        assert!(!check_entrypoint(dir.path(), None).passed);
    }

    #[test]
    fn test_authorized_key_match() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        let installed = dir.path().join("installed");
        fs::write(&source, "ssh-ed25519 AAAA first\nssh-ed25519 BBBB second\n").unwrap();

        fs::write(&installed, "ssh-ed25519 AAAA first\n").unwrap();
        assert!(check_authorized_key(&source, &installed).passed);

        fs::write(&installed, "ssh-ed25519 BBBB second\n").unwrap();
        assert!(!check_authorized_key(&source, &installed).passed);
    }

    #[test]
    fn test_report_passed() {
        let report = VerifyReport {
            checks: vec![CheckResult::pass("a", ""), CheckResult::fail("b", "nope")],
        };
        assert!(!report.passed());
        assert_eq!(report.failures().count(), 1);
        assert!(VerifyReport::default().passed());
    }
}
