//! Pre-flight checks before provisioning
//!
//! Verifies, before any step runs:
//! - the installer runs with root privileges (EUID 0)
//! - the binaries the steps shell out to are on `PATH`
//! - the entrypoint to install exists
//!
//! A failed check aborts before the host is touched.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::Variant;

/// Binaries every variant needs
const REQUIRED_BINARIES: &[&str] = &[
    "adduser", // service account creation
    "runuser", // bootstrappers run as the service account
    "curl",    // remote installer download
    "bash",    // login shell of the bootstrappers
];

/// Result of environment verification
#[derive(Debug, Default)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
    pub missing_entrypoint: Option<PathBuf>,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root && self.missing_entrypoint.is_none()
    }
}

/// Binaries needed to provision `variant`, deduplicated, in check order
pub fn required_binaries(variant: Variant) -> Vec<&'static str> {
    let mut binaries: Vec<&'static str> = REQUIRED_BINARIES.to_vec();
    for bootstrapper in variant.bootstrappers() {
        if let Some(bin) = bootstrapper.required_binary() {
            if !binaries.contains(&bin) {
                binaries.push(bin);
            }
        }
    }
    binaries
}

/// Look `name` up on `PATH` the way a shell would
pub fn binary_exists(name: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| is_executable(&dir.join(name)))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Skip the root check (development, containers with user namespaces).
/// Set BAO_INSTALL_SKIP_ROOT_CHECK=1 to skip.
pub fn should_skip_root_check() -> bool {
    std::env::var("BAO_INSTALL_SKIP_ROOT_CHECK")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Perform all checks and return the result.
///
/// With `dry_run` only the entrypoint is checked; nothing will be executed.
pub fn verify_environment(
    variant: Variant,
    entrypoint: &Path,
    skip_root: bool,
    dry_run: bool,
) -> SanityCheckResult {
    let mut result = SanityCheckResult {
        is_root: true,
        ..Default::default()
    };

    if !entrypoint.is_file() {
        result.missing_entrypoint = Some(entrypoint.to_path_buf());
    }

    if dry_run {
        debug!("dry run: skipping root and binary checks");
        return result;
    }

    for binary in required_binaries(variant) {
        if !binary_exists(binary) {
            result.missing_binaries.push(binary.to_string());
        }
    }

    if skip_root || should_skip_root_check() {
        warn!("root check skipped");
    } else {
        result.is_root = is_running_as_root();
    }

    if result.is_ok() {
        info!("pre-flight checks passed");
    }
    result
}

/// Debian/Ubuntu package providing a binary
pub fn get_package_for_binary(binary: &str) -> &'static str {
    match binary {
        "adduser" => "adduser",
        "runuser" => "util-linux",
        "curl" => "curl",
        "bash" => "bash",
        "python3" => "python3",
        _ => "unknown",
    }
}

/// Human-readable explanation of a failed check, for stderr
pub fn format_failure(result: &SanityCheckResult) -> String {
    let mut out = String::from("bao-install: pre-flight check failed\n");

    if !result.is_root {
        out.push_str("\n  ERROR: root privileges required\n");
        out.push_str("    Provisioning creates a system user and writes into its home.\n");
        out.push_str("    Run with sudo: sudo bao-install install\n");
    }

    if !result.missing_binaries.is_empty() {
        out.push_str("\n  ERROR: missing required binaries\n");
        for binary in &result.missing_binaries {
            out.push_str(&format!(
                "    - {} (package: {})\n",
                binary,
                get_package_for_binary(binary)
            ));
        }
        let packages: Vec<&str> = result
            .missing_binaries
            .iter()
            .map(|b| get_package_for_binary(b))
            .collect();
        out.push_str(&format!("    Install with: apt-get install {}\n", packages.join(" ")));
    }

    if let Some(path) = &result.missing_entrypoint {
        out.push_str(&format!(
            "\n  ERROR: entrypoint not found: {}\n    Pass --entrypoint or run from the directory containing bao.py\n",
            path.display()
        ));
    }

    out
}
