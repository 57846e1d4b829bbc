//! Provisioning plan and its execution
//!
//! A [`ProvisionPlan`] is the ordered list of steps for one host. The
//! [`Installer`] runs it fail-fast: the first failing step stops the
//! sequence, nothing is rolled back, and the [`ProvisionReport`] records
//! exactly how far provisioning got.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config_file::InstallConfig;
use crate::error::{BaoInstallError, Result};
use crate::step_runner::{CommandOutput, run_command_safe};
use crate::step_traits::CommandArgs;
use crate::steps::bootstrap::BootstrapArgs;
use crate::steps::entrypoint::EntrypointStep;
use crate::steps::ssh::{AuthorizedKeyStep, Invoker, key_type};
use crate::steps::user::{AddUserArgs, lookup_owner, user_home};
use crate::steps::Owner;
use crate::types::Variant;

/// One provisioning step
#[derive(Debug, Clone)]
pub enum Step {
    CreateUser(AddUserArgs),
    AuthorizedKey(AuthorizedKeyStep),
    Entrypoint(EntrypointStep),
    Bootstrap(BootstrapArgs),
}

impl Step {
    /// Stable identifier used in logs and reports
    pub fn name(&self) -> String {
        match self {
            Self::CreateUser(_) => "create-user".to_string(),
            Self::AuthorizedKey(_) => "authorized-key".to_string(),
            Self::Entrypoint(_) => "install-entrypoint".to_string(),
            Self::Bootstrap(args) => format!("bootstrap:{}", args.bootstrapper),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::CreateUser(args) => args.display_command(),
            Self::AuthorizedKey(step) => format!(
                "copy first key of {} to {}",
                step.source.display(),
                step.target.display()
            ),
            Self::Entrypoint(step) => format!(
                "copy {} to {} (mode 755)",
                step.source.display(),
                step.target.display()
            ),
            Self::Bootstrap(args) => args.display_command(),
        }
    }

    /// Whether running the step changes the host. Dry-run skips these.
    pub fn is_destructive(&self) -> bool {
        match self {
            Self::CreateUser(args) => args.is_destructive(),
            Self::Bootstrap(args) => args.is_destructive(),
            Self::AuthorizedKey(_) | Self::Entrypoint(_) => true,
        }
    }
}

/// Ordered steps for provisioning one host
#[derive(Debug, Clone)]
pub struct ProvisionPlan {
    pub user: String,
    /// Home directory the file steps write into
    pub home: PathBuf,
    pub variant: Variant,
    pub steps: Vec<Step>,
}

impl ProvisionPlan {
    /// Build the plan for a validated configuration.
    ///
    /// The key source defaults to the invoker's authorized_keys.
    pub fn from_config(config: &InstallConfig, invoker: &Invoker) -> Result<Self> {
        config.validate()?;

        let key_source = config
            .key_source
            .clone()
            .unwrap_or_else(|| invoker.authorized_keys_path());

        let mut steps = vec![
            Step::CreateUser(AddUserArgs::new(&config.user).with_home(config.home.clone())),
            Step::AuthorizedKey(AuthorizedKeyStep {
                source: key_source,
                target: config.authorized_keys_target(),
            }),
            Step::Entrypoint(EntrypointStep {
                source: config.entrypoint_source.clone(),
                target: config.entrypoint_target(),
            }),
        ];
        steps.extend(
            config
                .variant
                .bootstrappers()
                .iter()
                .map(|b| Step::Bootstrap(BootstrapArgs::new(*b, config))),
        );

        Ok(Self {
            user: config.user.clone(),
            home: config.home_dir(),
            variant: config.variant,
            steps,
        })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(Step::name).collect()
    }
}

/// The host operations the installer depends on
pub trait Host {
    /// Home directory of `name`, or `None` when the account does not exist
    fn user_home(&self, name: &str) -> Result<Option<PathBuf>>;

    /// Ownership to apply to files created for `name`; `None` leaves the
    /// installer's own ownership in place.
    fn owner(&self, name: &str) -> Result<Option<Owner>>;

    fn run_command(&self, args: &dyn CommandArgs) -> anyhow::Result<CommandOutput>;
}

/// The machine the installer runs on
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl Host for SystemHost {
    fn user_home(&self, name: &str) -> Result<Option<PathBuf>> {
        user_home(name)
    }

    fn owner(&self, name: &str) -> Result<Option<Owner>> {
        lookup_owner(name).map(Some)
    }

    fn run_command(&self, args: &dyn CommandArgs) -> anyhow::Result<CommandOutput> {
        run_command_safe(args)
    }
}

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Completed,
    Skipped,
    DryRun,
    Failed,
    NotRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub description: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// What a provisioning run did, step by step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionReport {
    pub user: String,
    pub variant: Variant,
    pub dry_run: bool,
    pub steps: Vec<StepRecord>,
}

impl ProvisionReport {
    pub fn succeeded(&self) -> bool {
        self.failed_step().is_none()
    }

    pub fn failed_step(&self) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| {
            BaoInstallError::system(format!(
                "failed to write report to {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }
}

/// Runs a plan against a [`Host`]
pub struct Installer<H: Host> {
    host: H,
    dry_run: bool,
}

impl Installer<SystemHost> {
    pub fn system(dry_run: bool) -> Self {
        Self::new(SystemHost, dry_run)
    }
}

impl<H: Host> Installer<H> {
    pub fn new(host: H, dry_run: bool) -> Self {
        Self { host, dry_run }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Run every step in order, stopping at the first failure.
    pub fn run(&self, plan: &ProvisionPlan) -> ProvisionReport {
        let total = plan.len();
        let mut records = Vec::with_capacity(total);
        let mut failed = false;

        for (index, step) in plan.steps.iter().enumerate() {
            let name = step.name();
            let description = step.describe();

            if failed {
                records.push(StepRecord {
                    name,
                    description,
                    status: StepStatus::NotRun,
                    detail: None,
                });
                continue;
            }

            if self.dry_run && step.is_destructive() {
                info!("[DRY RUN] [{}/{}] {}: {}", index + 1, total, name, description);
                records.push(StepRecord {
                    name,
                    description,
                    status: StepStatus::DryRun,
                    detail: None,
                });
                continue;
            }

            info!("[{}/{}] {}: {}", index + 1, total, name, description);
            let (status, detail) = match self.execute(step, plan) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(step = %name, "{:#}", e);
                    failed = true;
                    (StepStatus::Failed, Some(format!("{:#}", e)))
                }
            };
            records.push(StepRecord {
                name,
                description,
                status,
                detail,
            });
        }

        ProvisionReport {
            user: plan.user.clone(),
            variant: plan.variant,
            dry_run: self.dry_run,
            steps: records,
        }
    }

    fn execute(
        &self,
        step: &Step,
        plan: &ProvisionPlan,
    ) -> anyhow::Result<(StepStatus, Option<String>)> {
        let user = plan.user.as_str();
        match step {
            Step::CreateUser(args) => {
                if let Some(existing) = self.host.user_home(&args.username)? {
                    if existing != plan.home {
                        anyhow::bail!(
                            "user {} already exists with home {}, expected {}",
                            args.username,
                            existing.display(),
                            plan.home.display()
                        );
                    }
                    warn!(user = %args.username, "user already exists, not recreating it");
                    return Ok((StepStatus::Skipped, Some("user already exists".to_string())));
                }
                let output = self.host.run_command(args)?;
                output.ensure_success("adduser")?;
                Ok((StepStatus::Completed, None))
            }
            Step::AuthorizedKey(key_step) => {
                let owner = self.host.owner(user)?;
                let key = key_step.execute(owner.as_ref())?;
                Ok((StepStatus::Completed, key_type(&key).map(str::to_string)))
            }
            Step::Entrypoint(entry_step) => {
                let owner = self.host.owner(user)?;
                let bytes = entry_step.execute(owner.as_ref())?;
                Ok((StepStatus::Completed, Some(format!("{} bytes", bytes))))
            }
            Step::Bootstrap(args) => {
                let output = self.host.run_command(args)?;
                output.ensure_success(&step.name())?;
                Ok((StepStatus::Completed, None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn invoker() -> Invoker {
        Invoker {
            name: "ops".to_string(),
            home: PathBuf::from("/home/ops"),
        }
    }

    #[test]
    fn test_python_plan_order() {
        let plan = ProvisionPlan::from_config(&InstallConfig::default(), &invoker()).unwrap();
        assert_eq!(
            plan.step_names(),
            vec!["create-user", "authorized-key", "install-entrypoint", "bootstrap:poetry"]
        );
    }

    #[test]
    fn test_python_node_plan_order() {
        let config = InstallConfig::for_variant(Variant::PythonNode);
        let plan = ProvisionPlan::from_config(&config, &invoker()).unwrap();
        assert_eq!(
            plan.step_names(),
            vec![
                "create-user",
                "authorized-key",
                "install-entrypoint",
                "bootstrap:poetry",
                "bootstrap:nvm",
                "bootstrap:node",
                "bootstrap:yarn",
            ]
        );
    }

    #[test]
    fn test_key_source_defaults_to_invoker() {
        let plan = ProvisionPlan::from_config(&InstallConfig::default(), &invoker()).unwrap();
        match &plan.steps[1] {
            Step::AuthorizedKey(step) => {
                assert_eq!(step.source, PathBuf::from("/home/ops/.ssh/authorized_keys"));
                assert_eq!(step.target, PathBuf::from("/home/bao/.ssh/authorized_keys"));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_create_user_passes_configured_home() {
        let default = ProvisionPlan::from_config(&InstallConfig::default(), &invoker()).unwrap();
        assert_eq!(default.home, PathBuf::from("/home/bao"));
        match &default.steps[0] {
            Step::CreateUser(args) => assert_eq!(args.home, None),
            other => panic!("unexpected step {:?}", other),
        }

        let config = InstallConfig {
            home: Some(PathBuf::from("/srv/bao")),
            ..Default::default()
        };
        let plan = ProvisionPlan::from_config(&config, &invoker()).unwrap();
        assert_eq!(plan.home, PathBuf::from("/srv/bao"));
        match &plan.steps[0] {
            Step::CreateUser(args) => {
                let argv = args.to_cli_args();
                let pos = argv.iter().position(|a| a == "--home").unwrap();
                assert_eq!(argv[pos + 1], "/srv/bao");
                assert_eq!(argv.last().map(String::as_str), Some("bao"));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_every_step_is_destructive() {
        let config = InstallConfig::for_variant(Variant::PythonNode);
        let plan = ProvisionPlan::from_config(&config, &invoker()).unwrap();
        assert!(plan.steps.iter().all(Step::is_destructive));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = InstallConfig {
            user: "Root User".to_string(),
            ..Default::default()
        };
        assert!(ProvisionPlan::from_config(&config, &invoker()).is_err());
    }

    #[test]
    fn test_report_helpers() {
        let record = |status| StepRecord {
            name: "x".to_string(),
            description: String::new(),
            status,
            detail: None,
        };
        let report = ProvisionReport {
            user: "bao".to_string(),
            variant: Variant::Python,
            dry_run: false,
            steps: vec![
                record(StepStatus::Completed),
                record(StepStatus::Failed),
                record(StepStatus::NotRun),
            ],
        };
        assert!(!report.succeeded());
        assert_eq!(report.count(StepStatus::NotRun), 1);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"not-run\""));
        assert!(!json.contains("detail"));
    }
}
