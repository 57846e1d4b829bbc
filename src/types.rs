//! Type-safe provisioning choices
//!
//! Enums instead of strings for the installer variant and the package
//! bootstrappers, so unknown values are rejected at parse time.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Which bootstrapper chain a host receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    /// Python packaging tool only
    #[default]
    #[strum(serialize = "python")]
    Python,
    /// Python packaging tool plus Node.js version manager, runtime and Yarn
    #[strum(serialize = "python-node")]
    PythonNode,
}

impl Variant {
    /// Bootstrappers installed for this variant, in execution order
    pub fn bootstrappers(&self) -> &'static [Bootstrapper] {
        match self {
            Self::Python => &[Bootstrapper::Poetry],
            Self::PythonNode => &[
                Bootstrapper::Poetry,
                Bootstrapper::Nvm,
                Bootstrapper::Node,
                Bootstrapper::Yarn,
            ],
        }
    }
}

/// A package-manager bootstrapper run as the service user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Bootstrapper {
    Poetry,
    Nvm,
    Node,
    Yarn,
}

impl Bootstrapper {
    /// Whether this bootstrapper pipes a remote script into an interpreter
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Poetry | Self::Nvm)
    }

    /// Interpreter that consumes the downloaded installer on stdin
    pub fn interpreter(&self) -> Option<&'static str> {
        match self {
            Self::Poetry => Some("python3 -"),
            Self::Nvm => Some("bash"),
            Self::Node | Self::Yarn => None,
        }
    }

    /// Host binary the bootstrapper needs besides curl and bash
    pub fn required_binary(&self) -> Option<&'static str> {
        match self {
            Self::Poetry => Some("python3"),
            Self::Nvm | Self::Node | Self::Yarn => None,
        }
    }
}
