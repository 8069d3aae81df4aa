//! PDN Connection Table
//!
//! Per-session PDN connection records keyed by connection id.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{EsmError, EsmResult, Target};
use crate::types::{BearerQos, ContextId, Ebi, Pco, PdnAddress, PdnCid, PdnType, Pti, RequestType};

/// PDN connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdnState {
    /// Connectivity requested, default bearer not yet created
    Pending,
    /// Default bearer created
    Active,
    /// Disconnect requested or default bearer being deactivated
    PendingDisconnect,
}

impl fmt::Display for PdnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdnState::Pending => write!(f, "PENDING"),
            PdnState::Active => write!(f, "ACTIVE"),
            PdnState::PendingDisconnect => write!(f, "PENDING_DISCONNECT"),
        }
    }
}

/// PDN connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdnConnection {
    /// Connection id
    pub cid: PdnCid,
    /// PTI of the in-flight PDN connectivity or disconnect procedure
    pub pti: Option<Pti>,
    /// Subscription context identifier
    pub context_id: ContextId,
    /// Access point name
    pub apn: String,
    /// PDN type
    pub pdn_type: PdnType,
    /// Assigned PDN address
    pub pdn_addr: Option<PdnAddress>,
    /// QoS of the default bearer
    pub default_qos: BearerQos,
    /// EBI of the default bearer
    pub default_ebi: Option<Ebi>,
    /// UE protocol configuration options
    pub pco: Pco,
    /// Request type
    pub request_type: RequestType,
    /// Connection state
    pub state: PdnState,
}

impl PdnConnection {
    /// True for emergency bearer services
    pub fn is_emergency(&self) -> bool {
        self.request_type.is_emergency()
    }
}

/// PDN connection table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PdnTable {
    connections: BTreeMap<PdnCid, PdnConnection>,
}

impl PdnTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection; fails if the id is taken
    pub fn insert(&mut self, pdn: PdnConnection) -> EsmResult<()> {
        if self.connections.contains_key(&pdn.cid) {
            return Err(EsmError::Duplicate(Target::Pdn(pdn.cid)));
        }
        self.connections.insert(pdn.cid, pdn);
        Ok(())
    }

    /// Remove a connection.
    ///
    /// `owned_bearers` is the number of bearer contexts still bound to it;
    /// removal with owned bearers is an ordering defect in the caller.
    pub fn remove(&mut self, cid: PdnCid, owned_bearers: usize) -> EsmResult<PdnConnection> {
        if owned_bearers > 0 {
            return Err(EsmError::InternalDefect(format!(
                "{} removed while owning {} bearer(s)",
                cid, owned_bearers
            )));
        }
        self.connections
            .remove(&cid)
            .ok_or(EsmError::NotFound(Target::Pdn(cid)))
    }

    /// Find a connection
    pub fn find(&self, cid: PdnCid) -> EsmResult<&PdnConnection> {
        self.connections.get(&cid).ok_or(EsmError::NotFound(Target::Pdn(cid)))
    }

    /// Find a connection for update
    pub fn find_mut(&mut self, cid: PdnCid) -> EsmResult<&mut PdnConnection> {
        self.connections
            .get_mut(&cid)
            .ok_or(EsmError::NotFound(Target::Pdn(cid)))
    }

    /// True if the id is taken
    pub fn contains(&self, cid: PdnCid) -> bool {
        self.connections.contains_key(&cid)
    }

    /// Connection holding the PTI
    pub fn find_by_pti(&self, pti: Pti) -> Option<&PdnConnection> {
        self.connections.values().find(|pdn| pdn.pti == Some(pti))
    }

    /// Connection anchored by the default bearer
    pub fn find_by_default_ebi(&self, ebi: Ebi) -> Option<&PdnConnection> {
        self.connections.values().find(|pdn| pdn.default_ebi == Some(ebi))
    }

    /// Connections in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &PdnConnection> {
        self.connections.values()
    }

    /// Connections in the given state
    pub fn in_state(&self, state: PdnState) -> impl Iterator<Item = &PdnConnection> {
        self.connections.values().filter(move |pdn| pdn.state == state)
    }

    /// Number of connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True if empty
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
