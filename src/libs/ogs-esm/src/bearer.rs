//! EPS Bearer Context Table
//!
//! Per-session bearer records keyed by EBI. Every bearer is owned by exactly
//! one PDN connection; dedicated bearers also point back at the default bearer
//! they depend on.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EsmError, EsmResult, Target};
use crate::types::{Bitrate, Ebi, Pco, PdnCid, Tft};

/// Bearer context state (TS 24.301 Section 6.1.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BearerState {
    /// Activation requested, waiting for the UE
    ActivePending,
    /// Accepted by the UE
    Active,
    /// Deactivation requested, waiting for the UE
    InactivePending,
}

impl fmt::Display for BearerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BearerState::ActivePending => write!(f, "BEARER CONTEXT ACTIVE PENDING"),
            BearerState::Active => write!(f, "BEARER CONTEXT ACTIVE"),
            BearerState::InactivePending => write!(f, "BEARER CONTEXT INACTIVE PENDING"),
        }
    }
}

/// Default or dedicated bearer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BearerKind {
    /// Default bearer of a PDN connection
    Default,
    /// Dedicated bearer
    Dedicated {
        /// Default bearer this one depends on (non-owning)
        default_ebi: Ebi,
        /// Guaranteed bitrate
        gbr: Bitrate,
        /// Maximum bitrate
        mbr: Bitrate,
        /// Traffic flow template
        tft: Tft,
    },
}

/// EPS bearer context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerContext {
    /// EPS bearer identity
    pub ebi: Ebi,
    /// Owning PDN connection
    pub pdn_cid: PdnCid,
    /// Default or dedicated
    pub kind: BearerKind,
    /// QoS Class Identifier
    pub qci: u8,
    /// Bearer id within the connection; 0 for the default bearer
    pub bid: u8,
    /// Protocol configuration options
    pub pco: Pco,
    /// Bearer state
    pub state: BearerState,
}

impl BearerContext {
    /// True for the default bearer of a connection
    pub fn is_default(&self) -> bool {
        matches!(self.kind, BearerKind::Default)
    }

    /// Default bearer a dedicated bearer depends on
    pub fn default_ebi(&self) -> Option<Ebi> {
        match &self.kind {
            BearerKind::Default => None,
            BearerKind::Dedicated { default_ebi, .. } => Some(*default_ebi),
        }
    }
}

/// Bearer context table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BearerTable {
    bearers: BTreeMap<Ebi, BearerContext>,
}

impl BearerTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a bearer; fails if the EBI is taken
    pub fn insert(&mut self, bearer: BearerContext) -> EsmResult<()> {
        if self.bearers.contains_key(&bearer.ebi) {
            return Err(EsmError::Duplicate(Target::Ebi(bearer.ebi)));
        }
        self.bearers.insert(bearer.ebi, bearer);
        Ok(())
    }

    /// Remove a bearer
    pub fn remove(&mut self, ebi: Ebi) -> EsmResult<BearerContext> {
        self.bearers.remove(&ebi).ok_or(EsmError::NotFound(Target::Ebi(ebi)))
    }

    /// Find a bearer
    pub fn find(&self, ebi: Ebi) -> EsmResult<&BearerContext> {
        self.bearers.get(&ebi).ok_or(EsmError::NotFound(Target::Ebi(ebi)))
    }

    /// Find a bearer for update
    pub fn find_mut(&mut self, ebi: Ebi) -> EsmResult<&mut BearerContext> {
        self.bearers
            .get_mut(&ebi)
            .ok_or(EsmError::NotFound(Target::Ebi(ebi)))
    }

    /// True if the EBI is present
    pub fn contains(&self, ebi: Ebi) -> bool {
        self.bearers.contains_key(&ebi)
    }

    /// EBIs of the bearers owned by a connection, ascending
    pub fn owned_by(&self, cid: PdnCid) -> Vec<Ebi> {
        self.bearers
            .values()
            .filter(|bearer| bearer.pdn_cid == cid)
            .map(|bearer| bearer.ebi)
            .collect()
    }

    /// EBIs of the dedicated bearers depending on a default bearer, ascending
    pub fn dependents(&self, default_ebi: Ebi) -> Vec<Ebi> {
        self.bearers
            .values()
            .filter(|bearer| bearer.default_ebi() == Some(default_ebi))
            .map(|bearer| bearer.ebi)
            .collect()
    }

    /// Smallest bearer id >= 1 not used within the connection
    pub fn free_bid(&self, cid: PdnCid) -> u8 {
        let used: Vec<u8> = self
            .bearers
            .values()
            .filter(|bearer| bearer.pdn_cid == cid)
            .map(|bearer| bearer.bid)
            .collect();
        (1..=u8::MAX).find(|bid| !used.contains(bid)).unwrap_or(u8::MAX)
    }

    /// Bearers in ascending EBI order
    pub fn iter(&self) -> impl Iterator<Item = &BearerContext> {
        self.bearers.values()
    }

    /// Number of bearers
    pub fn len(&self) -> usize {
        self.bearers.len()
    }

    /// True if empty
    pub fn is_empty(&self) -> bool {
        self.bearers.is_empty()
    }
}
