//! In-flight ESM procedures
//!
//! PDN-level procedures are keyed by PTI, bearer-level procedures by EBI.
//! A procedure lives from its request until the matching accept, reject or
//! local failure.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::cause::EsmCause;
use crate::error::{EsmError, EsmResult, Target};
use crate::message::{EsmHeader, EsmMessage, EsmMessageType};
use crate::types::{Ebi, PdnCid, Pti};

/// ESM procedure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    PdnConnectivity,
    PdnDisconnect,
    DefaultBearerActivation,
    DedicatedBearerActivation,
    BearerDeactivation,
    Status,
}

impl ProcedureKind {
    /// Retransmission timer guarding the network request
    pub fn timer(self) -> Option<TimerId> {
        match self {
            ProcedureKind::DefaultBearerActivation | ProcedureKind::DedicatedBearerActivation => {
                Some(TimerId::T3485)
            }
            ProcedureKind::BearerDeactivation => Some(TimerId::T3495),
            _ => None,
        }
    }

    /// Message type of the network request
    pub fn request_type(self) -> Option<EsmMessageType> {
        match self {
            ProcedureKind::DefaultBearerActivation => {
                Some(EsmMessageType::ActivateDefaultEpsBearerContextRequest)
            }
            ProcedureKind::DedicatedBearerActivation => {
                Some(EsmMessageType::ActivateDedicatedEpsBearerContextRequest)
            }
            ProcedureKind::BearerDeactivation => {
                Some(EsmMessageType::DeactivateEpsBearerContextRequest)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcedureKind::PdnConnectivity => write!(f, "PDN connectivity"),
            ProcedureKind::PdnDisconnect => write!(f, "PDN disconnect"),
            ProcedureKind::DefaultBearerActivation => write!(f, "default EPS bearer activation"),
            ProcedureKind::DedicatedBearerActivation => {
                write!(f, "dedicated EPS bearer activation")
            }
            ProcedureKind::BearerDeactivation => write!(f, "EPS bearer deactivation"),
            ProcedureKind::Status => write!(f, "ESM status"),
        }
    }
}

/// Key of an in-flight procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcedureKey {
    Pti(Pti),
    Ebi(Ebi),
}

impl From<ProcedureKey> for Target {
    fn from(key: ProcedureKey) -> Self {
        match key {
            ProcedureKey::Pti(pti) => Target::Pti(pti),
            ProcedureKey::Ebi(ebi) => Target::Ebi(ebi),
        }
    }
}

impl fmt::Display for ProcedureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcedureKey::Pti(pti) => write!(f, "{}", pti),
            ProcedureKey::Ebi(ebi) => write!(f, "{}", ebi),
        }
    }
}

/// Request kept for retransmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoredRequest {
    pub(crate) header: EsmHeader,
    pub(crate) payload: Bytes,
}

impl StoredRequest {
    pub(crate) fn to_message(&self) -> EsmMessage {
        EsmMessage::new(self.header, self.payload.clone())
    }
}

/// In-flight procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    /// Procedure kind
    pub kind: ProcedureKind,
    /// PTI or EBI
    pub key: ProcedureKey,
    /// Connection the procedure acts on
    pub pdn_cid: PdnCid,
    /// Own message exchange rather than piggybacked
    pub standalone: bool,
    /// Started by the UE
    pub ue_triggered: bool,
    /// Retransmissions so far
    pub retry_count: u32,
    pub(crate) stored: Option<StoredRequest>,
}

impl Procedure {
    pub fn new(kind: ProcedureKind, key: ProcedureKey, pdn_cid: PdnCid, ue_triggered: bool) -> Self {
        Self {
            kind,
            key,
            pdn_cid,
            standalone: true,
            ue_triggered,
            retry_count: 0,
            stored: None,
        }
    }

    /// True once the network request went out
    pub fn is_requested(&self) -> bool {
        self.stored.is_some()
    }
}

/// In-flight procedures of one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcedureTable {
    procedures: BTreeMap<ProcedureKey, Procedure>,
}

impl ProcedureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure; fails if one is in flight for the key
    pub fn insert(&mut self, procedure: Procedure) -> EsmResult<()> {
        if self.procedures.contains_key(&procedure.key) {
            return Err(EsmError::Duplicate(procedure.key.into()));
        }
        self.procedures.insert(procedure.key, procedure);
        Ok(())
    }

    /// Register a procedure, returning the one it supersedes
    pub fn replace(&mut self, procedure: Procedure) -> Option<Procedure> {
        self.procedures.insert(procedure.key, procedure)
    }

    pub fn remove(&mut self, key: ProcedureKey) -> EsmResult<Procedure> {
        self.procedures.remove(&key).ok_or(EsmError::NotFound(key.into()))
    }

    pub fn find(&self, key: ProcedureKey) -> EsmResult<&Procedure> {
        self.procedures.get(&key).ok_or(EsmError::NotFound(key.into()))
    }

    pub fn find_mut(&mut self, key: ProcedureKey) -> EsmResult<&mut Procedure> {
        self.procedures
            .get_mut(&key)
            .ok_or(EsmError::NotFound(key.into()))
    }

    /// Procedure of the expected kind under `key`
    pub fn find_kind(&self, key: ProcedureKey, kind: ProcedureKind) -> EsmResult<&Procedure> {
        let procedure = self.find(key)?;
        if procedure.kind != kind {
            return Err(EsmError::not_applicable(
                "procedure lookup",
                key.into(),
                format!("{} in flight, not {}", procedure.kind, kind),
            ));
        }
        Ok(procedure)
    }

    pub fn contains(&self, key: ProcedureKey) -> bool {
        self.procedures.contains_key(&key)
    }

    /// Keys of the procedures acting on a connection
    pub fn for_pdn(&self, cid: PdnCid) -> Vec<ProcedureKey> {
        self.procedures
            .values()
            .filter(|procedure| procedure.pdn_cid == cid)
            .map(|procedure| procedure.key)
            .collect()
    }

    /// Keys of the procedures of one kind
    pub fn of_kind(&self, kind: ProcedureKind) -> Vec<ProcedureKey> {
        self.procedures
            .values()
            .filter(|procedure| procedure.kind == kind)
            .map(|procedure| procedure.key)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.values()
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

// ============================================================================
// Timer contract
// ============================================================================

/// ESM retransmission timers (TS 24.301 Table 10.3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerId {
    /// Bearer context activation
    T3485,
    /// Bearer context deactivation
    T3495,
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerId::T3485 => write!(f, "T3485"),
            TimerId::T3495 => write!(f, "T3495"),
        }
    }
}

/// Timer to start after a standalone request goes out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    pub id: TimerId,
    /// Bearer the request is about; pass back to `timer_expired`
    pub ebi: Ebi,
    pub duration: Duration,
    /// 1 for the first transmission
    pub attempt: u32,
}

/// Message to send plus the timer guarding it
#[must_use = "the message must be transmitted or discarded"]
#[derive(Debug)]
pub struct Transmission {
    pub message: EsmMessage,
    /// None for piggybacked delivery
    pub timer: Option<TimerRequest>,
}

/// Result of a timer expiry
#[derive(Debug)]
pub enum TimerOutcome {
    /// Send the request again and restart the timer
    Retransmit(Transmission),
    /// Retransmissions exhausted; local failure path already ran
    Aborted { cause: EsmCause },
}
