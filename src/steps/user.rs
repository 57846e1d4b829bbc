//! Service account creation and lookup.

use nix::unistd::User;
use std::path::PathBuf;

use super::Owner;
use crate::error::{BaoInstallError, Result};
use crate::step_traits::CommandArgs;

/// Type-safe arguments for `adduser`.
///
/// The account has no password (SSH key login only) and an empty GECOS
/// field so `adduser` never prompts.
#[derive(Debug, Clone)]
pub struct AddUserArgs {
    /// Username to create.
    pub username: String,
    /// Home directory; `adduser` picks its default when unset.
    pub home: Option<PathBuf>,
}

impl AddUserArgs {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            home: None,
        }
    }

    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }
}

impl CommandArgs for AddUserArgs {
    fn program(&self) -> &'static str {
        "adduser"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "--disabled-password".to_string(),
            "--gecos".to_string(),
            String::new(),
        ];
        if let Some(home) = &self.home {
            args.push("--home".to_string());
            args.push(home.display().to_string());
        }
        args.push(self.username.clone());
        args
    }
}

/// Whether the account exists in the passwd database
pub fn user_exists(name: &str) -> Result<bool> {
    let user = User::from_name(name)
        .map_err(|e| BaoInstallError::system(format!("looking up user {}: {}", name, e.desc())))?;
    Ok(user.is_some())
}

/// Home directory recorded in passwd, or `None` when the account is missing
pub fn user_home(name: &str) -> Result<Option<PathBuf>> {
    let user = User::from_name(name)
        .map_err(|e| BaoInstallError::system(format!("looking up user {}: {}", name, e.desc())))?;
    Ok(user.map(|u| u.dir))
}

/// Resolve uid/gid of an existing account
pub fn lookup_owner(name: &str) -> Result<Owner> {
    let user = User::from_name(name)
        .map_err(|e| BaoInstallError::system(format!("looking up user {}: {}", name, e.desc())))?
        .ok_or_else(|| BaoInstallError::system(format!("user {} does not exist", name)))?;
    Ok(Owner {
        uid: user.uid,
        gid: user.gid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_user_args() {
        let args = AddUserArgs::new("bao");
        assert_eq!(args.program(), "adduser");
        assert_eq!(
            args.to_cli_args(),
            vec!["--disabled-password", "--gecos", "", "bao"]
        );
        assert!(args.is_destructive());
        assert!(args.get_env_vars().is_empty());
        assert_eq!(
            args.display_command(),
            "adduser --disabled-password --gecos '' bao"
        );
    }

    #[test]
    fn test_add_user_args_with_home() {
        let args = AddUserArgs::new("bao").with_home(Some(PathBuf::from("/srv/bao")));
        assert_eq!(
            args.to_cli_args(),
            vec!["--disabled-password", "--gecos", "", "--home", "/srv/bao", "bao"]
        );
        assert_eq!(
            args.display_command(),
            "adduser --disabled-password --gecos '' --home /srv/bao bao"
        );
    }

    #[test]
    fn test_root_exists() {
        assert!(user_exists("root").unwrap());
        let owner = lookup_owner("root").unwrap();
        assert!(owner.uid.is_root());
        assert!(user_home("root").unwrap().is_some());
    }

    #[test]
    fn test_missing_user() {
        assert!(!user_exists("bao-install-no-such-user").unwrap());
        assert!(lookup_owner("bao-install-no-such-user").is_err());
        assert_eq!(user_home("bao-install-no-such-user").unwrap(), None);
    }
}
