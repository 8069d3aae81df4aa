//! ESM Session Context
//!
//! [`EsmSession`] is the per-subscriber aggregate that owns the identifier
//! allocator, the PDN connection and bearer tables and the in-flight
//! procedures. [`EsmContext`] is the registry handing out one lock per
//! session, so procedures of one subscriber serialize while different
//! subscribers run in parallel.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use crate::allocator::IdAllocator;
use crate::bearer::{BearerContext, BearerTable};
use crate::cause::{CauseMerge, EsmCause};
use crate::config::{ConfigError, EsmConfig};
use crate::error::{EsmError, EsmResult, Target};
use crate::pdn::{PdnConnection, PdnState, PdnTable};
use crate::procedure::{Procedure, ProcedureKey, ProcedureTable};
use crate::sm::{EsmEvent, EsmResponse};
use crate::types::{Ebi, PdnCid};

// ============================================================================
// Subscriber identity
// ============================================================================

/// Subscriber identity (IMSI digits)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(imsi_bcd: impl Into<String>) -> Self {
        Self(imsi_bcd.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only view of the mobility management context
pub trait MobilityContext {
    /// IMSI in BCD digits
    fn imsi_bcd(&self) -> &str;

    /// Key of the ESM session
    fn subscriber_id(&self) -> SubscriberId {
        SubscriberId::new(self.imsi_bcd())
    }
}

impl MobilityContext for SubscriberId {
    fn imsi_bcd(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Session
// ============================================================================

/// Comparable copy of the session tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub allocator: IdAllocator,
    pub pdns: PdnTable,
    pub bearers: BearerTable,
    pub procedures: ProcedureTable,
}

impl SessionSnapshot {
    /// True when nothing is allocated or in flight
    pub fn is_empty(&self) -> bool {
        self.allocator.is_empty()
            && self.pdns.is_empty()
            && self.bearers.is_empty()
            && self.procedures.is_empty()
    }
}

/// Per-subscriber ESM state
#[derive(Debug)]
pub struct EsmSession {
    subscriber: SubscriberId,
    pub(crate) config: Arc<EsmConfig>,
    pub(crate) alloc: IdAllocator,
    pub(crate) pdns: PdnTable,
    pub(crate) bearers: BearerTable,
    pub(crate) procedures: ProcedureTable,
    pub(crate) merged: CauseMerge,
}

impl EsmSession {
    /// Create an empty session
    pub fn new(subscriber: SubscriberId, config: Arc<EsmConfig>) -> Self {
        Self {
            subscriber,
            alloc: IdAllocator::new(config.default_bearer_ebi),
            config,
            pdns: PdnTable::new(),
            bearers: BearerTable::new(),
            procedures: ProcedureTable::new(),
            merged: CauseMerge::default(),
        }
    }

    /// Create a session keyed by the mobility context
    pub fn from_mobility<M: MobilityContext + ?Sized>(mobility: &M, config: Arc<EsmConfig>) -> Self {
        Self::new(mobility.subscriber_id(), config)
    }

    pub fn subscriber(&self) -> &SubscriberId {
        &self.subscriber
    }

    pub(crate) fn imsi(&self) -> &str {
        self.subscriber.as_str()
    }

    pub fn config(&self) -> &EsmConfig {
        &self.config
    }

    pub fn pdn(&self, cid: PdnCid) -> EsmResult<&PdnConnection> {
        self.pdns.find(cid)
    }

    pub fn bearer(&self, ebi: Ebi) -> EsmResult<&BearerContext> {
        self.bearers.find(ebi)
    }

    pub fn procedure(&self, key: ProcedureKey) -> EsmResult<&Procedure> {
        self.procedures.find(key)
    }

    pub fn pdns(&self) -> &PdnTable {
        &self.pdns
    }

    pub fn bearers(&self) -> &BearerTable {
        &self.bearers
    }

    pub fn procedures(&self) -> &ProcedureTable {
        &self.procedures
    }

    pub fn allocator(&self) -> &IdAllocator {
        &self.alloc
    }

    /// Copy of every table, for before/after comparison
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            allocator: self.alloc.clone(),
            pdns: self.pdns.clone(),
            bearers: self.bearers.clone(),
            procedures: self.procedures.clone(),
        }
    }

    /// Cause merged from non-standalone rejects
    pub fn merged_cause(&self) -> Option<EsmCause> {
        self.merged.cause()
    }

    /// Take the merged cause for the enclosing response
    pub fn take_merged_cause(&mut self) -> Option<EsmCause> {
        self.merged.take()
    }

    // ========================================================================
    // Teardown helpers, shared by the procedures
    // ========================================================================

    /// Drop a bearer, its EBI and any procedure keyed by it
    pub(crate) fn remove_bearer(&mut self, ebi: Ebi) -> EsmResult<BearerContext> {
        let bearer = self.bearers.remove(ebi)?;
        self.alloc.release_ebi(ebi)?;
        if let Ok(procedure) = self.procedures.remove(ProcedureKey::Ebi(ebi)) {
            log::debug!("[{}] {} procedure on {} removed", self.imsi(), procedure.kind, ebi);
        }
        Ok(bearer)
    }

    /// Drop a bearer and every dedicated bearer depending on it.
    /// Returns the EBIs in removal order, dependents first.
    pub(crate) fn remove_bearer_cascade(&mut self, ebi: Ebi) -> EsmResult<Vec<Ebi>> {
        let mut removed = self.bearers.dependents(ebi);
        for dependent in &removed {
            self.remove_bearer(*dependent)?;
        }
        self.remove_bearer(ebi)?;
        removed.push(ebi);
        Ok(removed)
    }

    /// Release the PDN-level PTI and the procedure registered under it
    pub(crate) fn release_pdn_pti(&mut self, cid: PdnCid) -> EsmResult<Option<Procedure>> {
        let pdn = self.pdns.find_mut(cid)?;
        let Some(pti) = pdn.pti.take() else {
            return Ok(None);
        };
        self.alloc.release_pti(pti)?;
        Ok(self.procedures.remove(ProcedureKey::Pti(pti)).ok())
    }

    /// Drop a connection with everything it owns.
    /// Returns the released EBIs, dedicated first and default last.
    pub(crate) fn remove_pdn(&mut self, cid: PdnCid) -> EsmResult<Vec<Ebi>> {
        let default_ebi = self.pdns.find(cid)?.default_ebi;
        let mut released = Vec::new();
        for ebi in self.bearers.owned_by(cid) {
            if Some(ebi) != default_ebi {
                self.remove_bearer(ebi)?;
                released.push(ebi);
            }
        }
        if let Some(ebi) = default_ebi {
            self.remove_bearer(ebi)?;
            released.push(ebi);
        }
        self.release_pdn_pti(cid)?;
        let owned = self.bearers.owned_by(cid).len();
        let pdn = self.pdns.remove(cid, owned)?;
        log::debug!("[{}] {} '{}' removed", self.imsi(), cid, pdn.apn);
        Ok(released)
    }

    // ========================================================================
    // Invariants
    // ========================================================================

    /// Check the cross-table invariants
    pub fn verify(&self) -> EsmResult<()> {
        self.check().map_err(|reason| {
            log::error!("[{}] Session inconsistent: {}", self.imsi(), reason);
            EsmError::InternalDefect(reason)
        })
    }

    fn check(&self) -> Result<(), String> {
        let mut emergency = 0;
        for pdn in self.pdns.iter() {
            let limit = u16::from(self.config.max_pdn_connections) + u16::from(pdn.is_emergency());
            if u16::from(pdn.cid.value()) >= limit {
                return Err(format!("{} beyond the connection limit", pdn.cid));
            }
            if pdn.is_emergency() {
                emergency += 1;
            }
            if let Some(pti) = pdn.pti {
                if !self.alloc.pti_in_use(pti) {
                    return Err(format!("{} holds unbound {}", pdn.cid, pti));
                }
            }
            match (pdn.state, pdn.default_ebi) {
                (PdnState::Pending, None) => {}
                (PdnState::Pending, Some(ebi)) => {
                    return Err(format!("pending {} already anchored by {}", pdn.cid, ebi));
                }
                (_, None) => {
                    return Err(format!("{} {} without default bearer", pdn.state, pdn.cid));
                }
                (_, Some(ebi)) => {
                    let bearer = self
                        .bearers
                        .find(ebi)
                        .map_err(|_| format!("{} default {} missing", pdn.cid, ebi))?;
                    if !bearer.is_default() || bearer.pdn_cid != pdn.cid {
                        return Err(format!("{} default {} not owned as default", pdn.cid, ebi));
                    }
                }
            }
        }
        if emergency > 1 {
            return Err(format!("{} emergency connections", emergency));
        }

        for bearer in self.bearers.iter() {
            let pdn = self
                .pdns
                .find(bearer.pdn_cid)
                .map_err(|_| format!("{} owned by missing {}", bearer.ebi, bearer.pdn_cid))?;
            if !self.alloc.ebi_in_use(bearer.ebi) {
                return Err(format!("{} not bound in the allocator", bearer.ebi));
            }
            if bearer.is_default() && pdn.default_ebi != Some(bearer.ebi) {
                return Err(format!("{} is a stray default bearer of {}", bearer.ebi, pdn.cid));
            }
            if let Some(default_ebi) = bearer.default_ebi() {
                if pdn.default_ebi != Some(default_ebi) {
                    return Err(format!(
                        "{} depends on {} which is not the default bearer of {}",
                        bearer.ebi, default_ebi, pdn.cid
                    ));
                }
            }
        }

        for ebi in self.alloc.ebis() {
            if !self.bearers.contains(ebi) {
                return Err(format!("{} bound without bearer", ebi));
            }
        }
        for pti in self.alloc.ptis() {
            if self.pdns.find_by_pti(pti).is_none() {
                return Err(format!("{} bound without connection", pti));
            }
        }

        for procedure in self.procedures.iter() {
            let owner = match procedure.key {
                ProcedureKey::Pti(pti) => self.pdns.find_by_pti(pti).map(|pdn| pdn.cid),
                ProcedureKey::Ebi(ebi) => self.bearers.find(ebi).map(|bearer| bearer.pdn_cid).ok(),
            };
            if owner != Some(procedure.pdn_cid) {
                return Err(format!("{} procedure on {} is dangling", procedure.kind, procedure.key));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Session registry
// ============================================================================

/// Shared handle to one session
pub type SessionHandle = Arc<Mutex<EsmSession>>;

fn poisoned<T>(_: T) -> EsmError {
    EsmError::InternalDefect("session lock poisoned".to_string())
}

/// Registry of ESM sessions keyed by subscriber
#[derive(Debug)]
pub struct EsmContext {
    config: Arc<EsmConfig>,
    sessions: RwLock<HashMap<SubscriberId, SessionHandle>>,
}

impl EsmContext {
    /// Create an empty registry; the configuration is validated first
    pub fn new(config: EsmConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EsmConfig {
        &self.config
    }

    /// Create the session of a subscriber (attach)
    pub fn session_add<M: MobilityContext + ?Sized>(&self, mobility: &M) -> EsmResult<SessionHandle> {
        let subscriber = mobility.subscriber_id();
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        if sessions.contains_key(&subscriber) {
            return Err(EsmError::Duplicate(Target::Session));
        }
        let session = Arc::new(Mutex::new(EsmSession::new(
            subscriber.clone(),
            Arc::clone(&self.config),
        )));
        sessions.insert(subscriber.clone(), Arc::clone(&session));
        log::info!("[{}] ESM session added (total {})", subscriber, sessions.len());
        Ok(session)
    }

    /// Destroy the session of a subscriber (detach)
    pub fn session_remove(&self, subscriber: &SubscriberId) -> EsmResult<SessionHandle> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let session = sessions
            .remove(subscriber)
            .ok_or(EsmError::NotFound(Target::Session))?;
        log::info!("[{}] ESM session removed (total {})", subscriber, sessions.len());
        Ok(session)
    }

    pub fn session_find(&self, subscriber: &SubscriberId) -> Option<SessionHandle> {
        self.sessions.read().ok()?.get(subscriber).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|sessions| sessions.len()).unwrap_or(0)
    }

    /// Run one event under the session lock
    pub fn dispatch(&self, subscriber: &SubscriberId, event: EsmEvent) -> EsmResult<EsmResponse> {
        let session = self
            .session_find(subscriber)
            .ok_or(EsmError::NotFound(Target::Session))?;
        let mut session = session.lock().map_err(poisoned)?;
        session.dispatch(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_session_is_consistent() {
        let session = EsmSession::new(
            SubscriberId::new("001010000000001"),
            Arc::new(EsmConfig::default()),
        );
        assert!(session.verify().is_ok());
        assert!(session.snapshot().is_empty());
        assert_eq!(session.subscriber().as_str(), "001010000000001");
    }

    #[test]
    fn test_registry_add_find_remove() {
        let context = EsmContext::new(EsmConfig::default()).unwrap();
        let imsi = SubscriberId::new("001010000000001");
        context.session_add(&imsi).unwrap();
        assert_eq!(
            context.session_add(&imsi).unwrap_err(),
            EsmError::Duplicate(Target::Session)
        );
        assert_eq!(context.session_count(), 1);
        assert!(context.session_find(&imsi).is_some());
        context.session_remove(&imsi).unwrap();
        assert!(context.session_find(&imsi).is_none());
        assert_eq!(
            context.session_remove(&imsi).unwrap_err(),
            EsmError::NotFound(Target::Session)
        );
    }

    #[test]
    fn test_invalid_default_range() {
        let mut config = EsmConfig::default();
        config.default_bearer_ebi = crate::config::EbiRange { first: 1, last: 3 };
        assert!(matches!(
            EsmContext::new(config.clone()),
            Err(ConfigError::ValidationError(_))
        ));

        // A session built directly still only binds valid EBIs
        let mut session = EsmSession::new(SubscriberId::new("001010000000001"), Arc::new(config));
        let req = crate::esm_proc::PdnConnectivityRequest::new(
            crate::types::Pti(1),
            PdnCid(0),
            "internet",
            crate::types::PdnType::Ipv4,
        );
        session.pdn_connectivity_request(req).unwrap();
        assert_eq!(session.default_eps_bearer_context(PdnCid(0), 9).unwrap(), Ebi(5));
        assert!(session.allocator().ebis().all(|ebi| ebi.is_valid()));
        session.verify().unwrap();
    }

    #[test]
    fn test_dispatch_unknown_subscriber() {
        let context = EsmContext::new(EsmConfig::default()).unwrap();
        let err = context
            .dispatch(&SubscriberId::new("999"), EsmEvent::DefaultBearerFailure)
            .unwrap_err();
        assert_eq!(err, EsmError::NotFound(Target::Session));
    }

    struct Ue {
        imsi_bcd: String,
    }

    impl MobilityContext for Ue {
        fn imsi_bcd(&self) -> &str {
            &self.imsi_bcd
        }
    }

    #[test]
    fn test_session_from_mobility() {
        let ue = Ue {
            imsi_bcd: "001019999999999".to_string(),
        };
        let session = EsmSession::from_mobility(&ue, Arc::new(EsmConfig::default()));
        assert_eq!(session.subscriber(), &SubscriberId::new("001019999999999"));
    }
}
