//! Installer configuration file handling.
//!
//! Every field has a default matching a stock Bao host, so an empty JSON
//! object is a valid configuration. Command-line flags override file values.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BaoInstallError, Result};
use crate::types::Variant;

/// Default service account name
pub const DEFAULT_USER: &str = "bao";
/// Default file name of the Bao entrypoint, both as source and on the host
pub const DEFAULT_ENTRYPOINT: &str = "bao.py";
/// Poetry's official installer
pub const DEFAULT_POETRY_INSTALLER_URL: &str = "https://install.python-poetry.org";
/// nvm's official installer, pinned to a release tag
pub const DEFAULT_NVM_INSTALLER_URL: &str =
    "https://raw.githubusercontent.com/nvm-sh/nvm/v0.39.7/install.sh";
/// Node.js version handed to `nvm install`
pub const DEFAULT_NODE_VERSION: &str = "lts/*";

const MAX_USERNAME_LEN: usize = 32;

/// Provisioning configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Service account to create
    pub user: String,
    /// Home directory; `/home/<user>` when unset
    pub home: Option<PathBuf>,
    /// Local path of the executable to install
    pub entrypoint_source: PathBuf,
    /// File name of the executable inside the home directory
    pub entrypoint_name: String,
    pub variant: Variant,
    /// authorized_keys file to take the first key from; the invoker's when unset
    pub key_source: Option<PathBuf>,
    pub poetry_installer_url: String,
    pub nvm_installer_url: String,
    pub node_version: String,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            user: DEFAULT_USER.to_string(),
            home: None,
            entrypoint_source: PathBuf::from(DEFAULT_ENTRYPOINT),
            entrypoint_name: DEFAULT_ENTRYPOINT.to_string(),
            variant: Variant::default(),
            key_source: None,
            poetry_installer_url: DEFAULT_POETRY_INSTALLER_URL.to_string(),
            nvm_installer_url: DEFAULT_NVM_INSTALLER_URL.to_string(),
            node_version: DEFAULT_NODE_VERSION.to_string(),
        }
    }
}

impl InstallConfig {
    /// Default configuration for the given variant
    pub fn for_variant(variant: Variant) -> Self {
        Self {
            variant,
            ..Self::default()
        }
    }

    /// Resolved home directory of the service account
    pub fn home_dir(&self) -> PathBuf {
        self.home
            .clone()
            .unwrap_or_else(|| PathBuf::from("/home").join(&self.user))
    }

    /// Where the entrypoint lands on the host
    pub fn entrypoint_target(&self) -> PathBuf {
        self.home_dir().join(&self.entrypoint_name)
    }

    /// Where the service account's authorized_keys lives
    pub fn authorized_keys_target(&self) -> PathBuf {
        self.home_dir().join(".ssh").join("authorized_keys")
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| {
            BaoInstallError::config(format!(
                "failed to write configuration to {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| {
            BaoInstallError::config(format!(
                "failed to read configuration from {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validate_username(&self.user)?;

        if let Some(home) = &self.home {
            if !home.is_absolute() {
                return Err(BaoInstallError::validation(format!(
                    "home must be an absolute path, got {}",
                    home.display()
                )));
            }
        }

        let name = Path::new(&self.entrypoint_name);
        if self.entrypoint_name.is_empty()
            || name.components().count() != 1
            || name.file_name().is_none()
        {
            return Err(BaoInstallError::validation(format!(
                "entrypoint name must be a plain file name, got '{}'",
                self.entrypoint_name
            )));
        }

        validate_installer_url(&self.poetry_installer_url)?;
        validate_installer_url(&self.nvm_installer_url)?;
        validate_node_version(&self.node_version)?;

        Ok(())
    }
}

/// Check a user name against the portable adduser rules
///
/// 1-32 characters, first a lowercase letter or underscore, the rest
/// lowercase letters, digits, underscores or dashes.
pub fn validate_username(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_USERNAME_LEN {
        return Err(BaoInstallError::validation(format!(
            "user name must be 1-{} characters",
            MAX_USERNAME_LEN
        )));
    }

    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

    if !(first_ok && rest_ok) {
        return Err(BaoInstallError::validation(format!(
            "invalid user name '{}'",
            name
        )));
    }
    Ok(())
}

/// Installer URLs are interpolated into a shell pipeline, so only https
/// and a conservative character set are accepted.
pub fn validate_installer_url(url: &str) -> Result<()> {
    let Some(rest) = url.strip_prefix("https://") else {
        return Err(BaoInstallError::validation(format!(
            "installer URL must use https: {}",
            url
        )));
    };

    if rest.is_empty() {
        return Err(BaoInstallError::validation("installer URL has no host"));
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || "-._~/:%?=+@,".contains(c);
    if let Some(bad) = rest.chars().find(|c| !allowed(*c)) {
        return Err(BaoInstallError::validation(format!(
            "installer URL contains forbidden character {:?}: {}",
            bad, url
        )));
    }
    Ok(())
}

fn validate_node_version(version: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || "./*-".contains(c);
    if version.is_empty() || !version.chars().all(allowed) {
        return Err(BaoInstallError::validation(format!(
            "invalid node version '{}'",
            version
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_stock_host() {
        let config = InstallConfig::default();
        assert_eq!(config.user, "bao");
        assert_eq!(config.home_dir(), PathBuf::from("/home/bao"));
        assert_eq!(config.entrypoint_target(), PathBuf::from("/home/bao/bao.py"));
        assert_eq!(
            config.authorized_keys_target(),
            PathBuf::from("/home/bao/.ssh/authorized_keys")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_home_follows_user() {
        let config = InstallConfig {
            user: "paas".to_string(),
            ..Default::default()
        };
        assert_eq!(config.home_dir(), PathBuf::from("/home/paas"));
    }

    #[test]
    fn test_empty_object_is_default() {
        let config: InstallConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, InstallConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bao-install.json");

        let config = InstallConfig::for_variant(Variant::PythonNode);
        config.save_to_file(&path).unwrap();

        let loaded = InstallConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.variant, Variant::PythonNode);
    }

    #[test]
    fn test_load_missing_file() {
        let err = InstallConfig::load_from_file("/nonexistent/bao.json").unwrap_err();
        assert!(matches!(err, BaoInstallError::Config(_)));
    }

    #[test]
    fn test_username_rules() {
        assert!(validate_username("bao").is_ok());
        assert!(validate_username("_svc-1").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("Bao").is_err());
        assert!(validate_username("1bao").is_err());
        assert!(validate_username("bao user").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_installer_url_rules() {
        assert!(validate_installer_url(DEFAULT_POETRY_INSTALLER_URL).is_ok());
        assert!(validate_installer_url(DEFAULT_NVM_INSTALLER_URL).is_ok());
        assert!(validate_installer_url("http://install.python-poetry.org").is_err());
        assert!(validate_installer_url("https://").is_err());
        assert!(validate_installer_url("https://x.org/a;rm -rf /").is_err());
        assert!(validate_installer_url("https://x.org/$(id)").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let relative_home = InstallConfig {
            home: Some(PathBuf::from("home/bao")),
            ..Default::default()
        };
        assert!(relative_home.validate().is_err());

        let nested_entrypoint = InstallConfig {
            entrypoint_name: "bin/bao.py".to_string(),
            ..Default::default()
        };
        assert!(nested_entrypoint.validate().is_err());

        let bad_node = InstallConfig {
            node_version: "18; id".to_string(),
            ..Default::default()
        };
        assert!(bad_node.validate().is_err());
    }
}
