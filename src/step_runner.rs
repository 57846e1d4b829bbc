//! Type-safe command execution
//!
//! Every external command a provisioning step needs goes through
//! [`run_command_safe`], which guarantees:
//!
//! - process group isolation, so a signal to the installer reaches the
//!   whole pipeline (`curl | python3 -` included)
//! - PID registration with the global [`ChildRegistry`] for cleanup
//! - arguments come from a [`CommandArgs`] implementor, never ad-hoc strings

use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::step_traits::CommandArgs;
use anyhow::{Context, Result};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

/// Execute an external command with type-safe arguments.
///
/// stdin is closed; provisioning commands must be non-interactive.
/// A non-zero exit is not an error here; callers decide through
/// [`CommandOutput::ensure_success`].
pub fn run_command_safe<T: CommandArgs + ?Sized>(args: &T) -> Result<CommandOutput> {
    let program = args.program();
    let cli_args = args.to_cli_args();
    let env_vars = args.get_env_vars();

    info!(program, args = ?cli_args, env = ?env_vars, "run_command_safe");

    let mut cmd = Command::new(program);
    cmd.args(&cli_args)
        .envs(env_vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group();

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;
    let pid = child.id();

    match ChildRegistry::global().lock() {
        Ok(mut registry) => registry.register(pid),
        Err(_) => warn!(pid, "child registry poisoned, PID not tracked"),
    }

    let output = child.wait_with_output();

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.unregister(pid);
    }

    let output = output.with_context(|| format!("Failed waiting for {}", program))?;

    let result = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
        success: output.status.success(),
    };

    if result.success {
        debug!(program, "command succeeded");
    } else {
        info!(program, code = result.exit_code.unwrap_or(-1), "command failed");
    }

    Ok(result)
}

/// Output from an external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the command exited with status 0.
    pub success: bool,
}

impl CommandOutput {
    /// Return an error carrying the exit code and stderr if the command failed.
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            return Ok(());
        }
        match self.exit_code {
            Some(code) => anyhow::bail!(
                "{} failed (exit code {}): {}",
                context,
                code,
                self.stderr.trim()
            ),
            None => anyhow::bail!("{} terminated by signal: {}", context, self.stderr.trim()),
        }
    }
}
