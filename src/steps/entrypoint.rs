//! Placement of the Bao executable in the service account's home.

use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use tracing::info;

use super::{Owner, replace_file};
use crate::error::{BaoInstallError, Result};

/// Mode of the installed entrypoint (rwxr-xr-x)
pub const ENTRYPOINT_MODE: u32 = 0o755;

/// Copy `source` to `target`, make it executable and hand it to the owner.
#[derive(Debug, Clone)]
pub struct EntrypointStep {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl EntrypointStep {
    /// Returns the number of bytes copied.
    pub fn execute(&self, owner: Option<&Owner>) -> Result<u64> {
        if !self.source.is_file() {
            return Err(BaoInstallError::step(
                "install-entrypoint",
                format!("{} is not a file", self.source.display()),
            ));
        }

        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut source = File::open(&self.source)?;
        let bytes = replace_file(&self.target, ENTRYPOINT_MODE, owner, |out| {
            io::copy(&mut source, out)
        })
        .map_err(|e| BaoInstallError::step("install-entrypoint", e.to_string()))?;

        info!(
            bytes,
            "entrypoint {} installed at {}",
            self.source.display(),
            self.target.display()
        );
        Ok(bytes)
    }
}
