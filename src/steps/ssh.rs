//! SSH access for the service account.
//!
//! The account gets exactly one key: the first key of the invoking user's
//! `authorized_keys`. Pushes to the Bao host are then made with the same
//! key the operator already uses to log in.

use nix::unistd::{Uid, User};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{Owner, prepare_dir, replace_file};
use crate::error::{BaoInstallError, Result};

const SSH_DIR_MODE: u32 = 0o700;
const AUTHORIZED_KEYS_MODE: u32 = 0o600;

/// The account whose key is copied to the service user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoker {
    pub name: String,
    pub home: PathBuf,
}

impl Invoker {
    /// `SUDO_USER` when running under sudo, otherwise the real user.
    pub fn detect() -> Result<Self> {
        if let Ok(name) = std::env::var("SUDO_USER") {
            if !name.is_empty() {
                let user = User::from_name(&name)
                    .map_err(|e| BaoInstallError::system(e.desc()))?
                    .ok_or_else(|| {
                        BaoInstallError::system(format!("SUDO_USER {} does not exist", name))
                    })?;
                return Ok(Self {
                    name: user.name,
                    home: user.dir,
                });
            }
        }

        match User::from_uid(Uid::current()).map_err(|e| BaoInstallError::system(e.desc()))? {
            Some(user) => Ok(Self {
                name: user.name,
                home: user.dir,
            }),
            None => {
                let home = std::env::var("HOME").map_err(|_| {
                    BaoInstallError::system("cannot determine invoking user's home directory")
                })?;
                Ok(Self {
                    name: Uid::current().to_string(),
                    home: PathBuf::from(home),
                })
            }
        }
    }

    pub fn authorized_keys_path(&self) -> PathBuf {
        self.home.join(".ssh").join("authorized_keys")
    }
}

/// First key line of an authorized_keys file.
///
/// Blank lines and `#` comments are skipped; the line is returned trimmed.
pub fn first_authorized_key(content: &str) -> Option<&str> {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Algorithm name of an authorized_keys line, skipping any options prefix.
pub fn key_type(line: &str) -> Option<&str> {
    line.split_whitespace()
        .find(|token| ["ssh-", "ecdsa-", "sk-"].iter().any(|p| token.starts_with(p)))
}

/// Read the first key of an authorized_keys file
pub fn read_first_key(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path).map_err(|e| {
        BaoInstallError::step(
            "authorized-key",
            format!("cannot read {}: {}", path.display(), e),
        )
    })?;
    first_authorized_key(&content)
        .map(str::to_string)
        .ok_or_else(|| {
            BaoInstallError::step(
                "authorized-key",
                format!("no key found in {}", path.display()),
            )
        })
}

/// Copy the first key of `source` into `target`, replacing its content.
#[derive(Debug, Clone)]
pub struct AuthorizedKeyStep {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl AuthorizedKeyStep {
    /// Install the key and return it.
    pub fn execute(&self, owner: Option<&Owner>) -> Result<String> {
        let key = read_first_key(&self.source)?;

        let ssh_dir = self.target.parent().ok_or_else(|| {
            BaoInstallError::validation(format!(
                "authorized_keys target has no parent: {}",
                self.target.display()
            ))
        })?;

        if let Some(home) = ssh_dir.parent() {
            fs::create_dir_all(home)?;
        }
        let line = format!("{}\n", key);
        prepare_dir(ssh_dir, SSH_DIR_MODE, owner)
            .and_then(|()| {
                replace_file(&self.target, AUTHORIZED_KEYS_MODE, owner, |out| {
                    out.write_all(line.as_bytes())?;
                    Ok(line.len() as u64)
                })
            })
            .map_err(|e| BaoInstallError::step("authorized-key", e.to_string()))?;

        debug!(key_type = key_type(&key).unwrap_or("unknown"), "key installed");
        info!(
            "authorized key copied from {} to {}",
            self.source.display(),
            self.target.display()
        );
        Ok(key)
    }
}
