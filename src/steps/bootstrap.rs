//! Package-manager bootstrappers, run as the service account.
//!
//! Each bootstrapper becomes one `runuser` invocation with a bash login
//! shell, so the tools land in the account's home (`~/.local/bin` for
//! Poetry, `~/.nvm` for nvm, Node and Yarn).
//!
//! | Bootstrapper | Shell line                                              |
//! |--------------|---------------------------------------------------------|
//! | `poetry`     | `curl -fsSL <poetry url> \| python3 -`                   |
//! | `nvm`        | `curl -fsSL <nvm url> \| bash`                           |
//! | `node`       | `. "$HOME/.nvm/nvm.sh" && nvm install <version>`        |
//! | `yarn`       | `. "$HOME/.nvm/nvm.sh" && npm install --global yarn`    |

use crate::config_file::InstallConfig;
use crate::step_traits::{CommandArgs, shell_quote};
use crate::types::Bootstrapper;

const LOGIN_SHELL: &str = "/bin/bash";
const NVM_SOURCE: &str = r#". "$HOME/.nvm/nvm.sh""#;

/// Type-safe arguments for running one bootstrapper via `runuser`.
#[derive(Debug, Clone)]
pub struct BootstrapArgs {
    pub bootstrapper: Bootstrapper,
    /// Account the tool is installed for.
    pub user: String,
    /// Remote installer URL, for bootstrappers that download one.
    pub installer_url: Option<String>,
    /// Version handed to `nvm install`.
    pub node_version: String,
}

impl BootstrapArgs {
    pub fn new(bootstrapper: Bootstrapper, config: &InstallConfig) -> Self {
        let installer_url = match bootstrapper {
            Bootstrapper::Poetry => Some(config.poetry_installer_url.clone()),
            Bootstrapper::Nvm => Some(config.nvm_installer_url.clone()),
            Bootstrapper::Node | Bootstrapper::Yarn => None,
        };
        Self {
            bootstrapper,
            user: config.user.clone(),
            installer_url,
            node_version: config.node_version.clone(),
        }
    }

    /// The line executed by the service account's shell.
    pub fn shell_line(&self) -> String {
        match (self.bootstrapper.interpreter(), &self.installer_url) {
            (Some(interpreter), Some(url)) => format!(
                "set -o pipefail; curl -fsSL {} | {}",
                shell_quote(url),
                interpreter
            ),
            _ => match self.bootstrapper {
                Bootstrapper::Node => format!(
                    "{} && nvm install {}",
                    NVM_SOURCE,
                    shell_quote(&self.node_version)
                ),
                Bootstrapper::Yarn => format!("{} && npm install --global yarn", NVM_SOURCE),
                // remote bootstrapper without a URL: fail loudly inside the shell
                other => format!("echo 'no installer URL for {}' >&2; exit 1", other),
            },
        }
    }
}

impl CommandArgs for BootstrapArgs {
    fn program(&self) -> &'static str {
        "runuser"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--shell".to_string(),
            LOGIN_SHELL.to_string(),
            "-l".to_string(),
            self.user.clone(),
            "-c".to_string(),
            self.shell_line(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Variant;

    fn config() -> InstallConfig {
        InstallConfig::for_variant(Variant::PythonNode)
    }

    #[test]
    fn test_poetry_pipes_into_python() {
        let args = BootstrapArgs::new(Bootstrapper::Poetry, &config());
        assert_eq!(args.program(), "runuser");
        assert_eq!(
            args.shell_line(),
            "set -o pipefail; curl -fsSL https://install.python-poetry.org | python3 -"
        );
    }

    #[test]
    fn test_nvm_pipes_into_bash() {
        let args = BootstrapArgs::new(Bootstrapper::Nvm, &config());
        let line = args.shell_line();
        assert!(line.starts_with("set -o pipefail; curl -fsSL https://raw.githubusercontent.com/nvm-sh/nvm/"));
        assert!(line.ends_with("| bash"));
    }

    #[test]
    fn test_node_and_yarn_source_nvm() {
        let node = BootstrapArgs::new(Bootstrapper::Node, &config());
        assert_eq!(
            node.shell_line(),
            r#". "$HOME/.nvm/nvm.sh" && nvm install 'lts/*'"#
        );
        assert!(node.installer_url.is_none());

        let yarn = BootstrapArgs::new(Bootstrapper::Yarn, &config());
        assert_eq!(
            yarn.shell_line(),
            r#". "$HOME/.nvm/nvm.sh" && npm install --global yarn"#
        );
    }

    #[test]
    fn test_runs_as_service_user_login_shell() {
        let mut cfg = config();
        cfg.user = "paas".to_string();
        let args = BootstrapArgs::new(Bootstrapper::Poetry, &cfg);
        let cli = args.to_cli_args();
        assert_eq!(&cli[..5], &["--shell", "/bin/bash", "-l", "paas", "-c"]);
        assert_eq!(cli[5], args.shell_line());
        assert_eq!(cli.len(), 6);
    }

    #[test]
    fn test_missing_url_fails_in_shell() {
        let mut args = BootstrapArgs::new(Bootstrapper::Poetry, &config());
        args.installer_url = None;
        assert!(args.shell_line().contains("exit 1"));
    }
}
