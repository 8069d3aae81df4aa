//! ESM error types

use std::fmt;

use thiserror::Error;

use crate::cause::EsmCause;
use crate::types::{Ebi, PdnCid, Pti};

/// Identifier space handled by the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// Procedure transaction identity
    Pti,
    /// EPS bearer identity
    Ebi,
    /// EPS bearer identity of a default bearer
    DefaultEbi,
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdKind::Pti => write!(f, "PTI"),
            IdKind::Ebi => write!(f, "EBI"),
            IdKind::DefaultEbi => write!(f, "default EBI"),
        }
    }
}

/// Object an entry point was addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Procedure transaction identity
    Pti(Pti),
    /// EPS bearer context
    Ebi(Ebi),
    /// PDN connection
    Pdn(PdnCid),
    /// Session of a subscriber
    Session,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Pti(pti) => write!(f, "{}", pti),
            Target::Ebi(ebi) => write!(f, "{}", ebi),
            Target::Pdn(cid) => write!(f, "{}", cid),
            Target::Session => write!(f, "session"),
        }
    }
}

/// ESM error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EsmError {
    /// Request refused or failed with an ESM cause
    #[error("Rejected with ESM cause {0}")]
    Rejected(EsmCause),

    /// No record or in-flight procedure matches the identifier
    #[error("{0} not found")]
    NotFound(Target),

    /// Identifier exists but the operation does not apply in its state
    #[error("{operation} not applicable to {target}: {reason}")]
    NotApplicable {
        operation: &'static str,
        target: Target,
        reason: String,
    },

    /// Identifier range exhausted
    #[error("{0} range exhausted")]
    Exhausted(IdKind),

    /// Key already present
    #[error("Duplicate {0}")]
    Duplicate(Target),

    /// Message delivery failed in the transport collaborator
    #[error("Transport error: {0}")]
    Transport(String),

    /// Allocator or tables found inconsistent
    #[error("Internal defect: {0}")]
    InternalDefect(String),
}

impl EsmError {
    /// ESM cause carried by a reject
    pub fn cause(&self) -> Option<EsmCause> {
        match self {
            EsmError::Rejected(cause) => Some(*cause),
            _ => None,
        }
    }

    /// True only for invariant violations
    pub fn is_fatal(&self) -> bool {
        matches!(self, EsmError::InternalDefect(_))
    }

    /// True for accept/reject calls that matched nothing
    pub fn is_not_found(&self) -> bool {
        matches!(self, EsmError::NotFound(_))
    }

    pub(crate) fn not_applicable(
        operation: &'static str,
        target: Target,
        reason: impl Into<String>,
    ) -> Self {
        EsmError::NotApplicable {
            operation,
            target,
            reason: reason.into(),
        }
    }
}

/// ESM result type
pub type EsmResult<T> = Result<T, EsmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_esm_error_display() {
        let err = EsmError::Rejected(EsmCause::InsufficientResources);
        assert!(err.to_string().contains("#26"));

        let err = EsmError::NotFound(Target::Pti(Pti(3)));
        assert_eq!(err.to_string(), "PTI[3] not found");

        let err = EsmError::Exhausted(IdKind::Ebi);
        assert_eq!(err.to_string(), "EBI range exhausted");

        let err = EsmError::not_applicable("pdn_connectivity_failure", Target::Pdn(PdnCid(1)), "active");
        assert!(err.to_string().contains("CID[1]"));
    }

    #[test]
    fn test_esm_error_classification() {
        assert_eq!(
            EsmError::Rejected(EsmCause::NetworkFailure).cause(),
            Some(EsmCause::NetworkFailure)
        );
        assert!(EsmError::NotFound(Target::Ebi(Ebi(5))).cause().is_none());
        assert!(EsmError::NotFound(Target::Ebi(Ebi(5))).is_not_found());
        assert!(EsmError::InternalDefect("x".into()).is_fatal());
        assert!(!EsmError::Exhausted(IdKind::Pti).is_fatal());
    }
}
