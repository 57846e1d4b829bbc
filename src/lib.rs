//! bao-install library
//!
//! Provisions a host for the Bao PaaS: service account, SSH key,
//! entrypoint and package-manager bootstrappers.

pub mod cli;
pub mod config_file;
pub mod error;
pub mod installer;
pub mod process_guard;
pub mod sanity;
pub mod step_runner;
pub mod step_traits;
pub mod steps;
pub mod types;
pub mod verify;

pub use config_file::InstallConfig;
pub use error::{BaoInstallError, Result};
pub use installer::{
    Host, Installer, ProvisionPlan, ProvisionReport, Step, StepRecord, StepStatus, SystemHost,
};
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use step_runner::{CommandOutput, run_command_safe};
pub use step_traits::CommandArgs;
pub use steps::Owner;
pub use steps::ssh::Invoker;
pub use types::{Bootstrapper, Variant};
pub use verify::{CheckResult, VerifyReport, verify_host};
