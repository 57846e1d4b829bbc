//! Type-safe command argument contracts.
//!
//! Provisioning steps that shell out never build raw string vectors at the
//! call site. Instead a struct implements [`CommandArgs`] and the struct
//! definition is the single source of truth for the program, its flags and
//! its environment.

/// Trait for typed external-command arguments.
///
/// # Contract
///
/// - `program()`: the executable to spawn, resolved through `PATH`.
/// - `to_cli_args()`: arguments exactly as the program expects them.
/// - `get_env_vars()`: extra environment for the child.
/// - `is_destructive()`: whether the command changes host state. A dry-run
///   [`Installer`](crate::installer::Installer) records destructive steps
///   without running them.
///
/// # Example
///
/// ```ignore
/// use bao_install::steps::user::AddUserArgs;
/// use bao_install::step_traits::CommandArgs;
///
/// let args = AddUserArgs::new("bao");
/// assert_eq!(args.program(), "adduser");
/// // ["--disabled-password", "--gecos", "", "bao"]
/// let cli_args = args.to_cli_args();
/// ```
pub trait CommandArgs {
    /// Executable name.
    fn program(&self) -> &'static str;

    /// Convert struct fields to CLI arguments.
    fn to_cli_args(&self) -> Vec<String>;

    /// Extra environment variables for the child process.
    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![]
    }

    /// Whether running the command modifies the host.
    fn is_destructive(&self) -> bool {
        true
    }

    /// Human-readable command line, for plans and logs.
    fn display_command(&self) -> String {
        let mut parts = vec![self.program().to_string()];
        parts.extend(self.to_cli_args().into_iter().map(|arg| shell_quote(&arg)));
        parts.join(" ")
    }
}

/// Quote a single argument for display with POSIX shell rules.
///
/// Arguments made only of safe characters are returned unchanged.
pub fn shell_quote(arg: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c);
    if !arg.is_empty() && arg.chars().all(safe) {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
