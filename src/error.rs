//! # Error
//!
//! Error taxonomy shared by every component of the engine

use std::path::PathBuf;

use thiserror::Error;

use crate::alloc::proximity::ProximityError;
use crate::patcher::mem::PermissionError;

/// Errors produced while locating, resolving and redirecting code in the target module
#[derive(Debug, Error)]
pub enum Error {
    /// A landmark pattern did not match anywhere in the scanned region
    #[error("pattern scan failed")]
    ScanNotFound(String),
    /// A polled pointer never became non-null within the attempt budget
    #[error("{name} was still null after {attempts} attempts")]
    ResolutionTimeout {
        /// What was being resolved
        name: String,
        /// Number of polls performed before giving up
        attempts: u32,
    },
    /// A named object is absent from the keyed object directory
    #[error("no object named {0} in the directory")]
    DirectoryLookupMiss(String),
    /// The configuration source does not exist
    #[error("could not locate config file {}", .0.display())]
    ConfigurationMissing(PathBuf),
    /// The configuration source exists but could not be parsed
    #[error("invalid config file: {0}")]
    ConfigurationInvalid(#[from] toml::de::Error),
    /// A textual pattern could not be parsed
    #[error("invalid pattern: {0}")]
    PatternParse(String),
    /// A relative operand size that x86 does not encode
    #[error("unsupported operand width of {0} bytes")]
    OperandWidth(usize),
    /// An install would overlap a range owned by an already installed hook
    #[error("address {0:#x} overlaps an installed hook")]
    HookOverlap(usize),
    /// No hook is installed at the given address
    #[error("no hook installed at {0:#x}")]
    HookNotFound(usize),
    /// The instructions at a hook site could not be relocated
    #[error("could not relocate instructions: {0}")]
    Relocation(String),
    /// Error while assembling or re-encoding instructions
    #[error("{0}")]
    Iced(#[from] iced_x86::IcedError),
    /// Error when changing or querying memory protections
    #[error("error setting memory protections: {0}")]
    Protection(#[from] region::Error),
    /// Error while allocating executable memory
    #[error("{0}")]
    Allocation(#[from] ProximityError),
    /// IO error while reading configuration or opening the log
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PermissionError<()>> for Error {
    fn from(e: PermissionError<()>) -> Self {
        match e {
            PermissionError::ProtectionError(e) => Error::Protection(e),
            PermissionError::CustomError(()) => Error::Relocation("byte patch failed".into()),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error must abort the whole setup sequence.
    ///
    /// Every other error only disables the feature that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConfigurationMissing(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_configuration_is_fatal() {
        assert!(Error::ConfigurationMissing(PathBuf::from("tweakhook.toml")).is_fatal());
        assert!(!Error::ScanNotFound("Gameplay FOV".into()).is_fatal());
        assert!(!Error::DirectoryLookupMiss("r.Tonemapper.Sharpen".into()).is_fatal());
        assert!(!Error::ResolutionTimeout {
            name: "IConsoleManager".into(),
            attempts: 100
        }
        .is_fatal());
    }

    #[test]
    fn messages_carry_context() {
        let err = Error::HookOverlap(0x1400_0000);
        assert_eq!(err.to_string(), "address 0x14000000 overlaps an installed hook");
        let err = Error::ResolutionTimeout {
            name: "IConsoleManager".into(),
            attempts: 100,
        };
        assert_eq!(err.to_string(), "IConsoleManager was still null after 100 attempts");
    }
}
