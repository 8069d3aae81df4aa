//! PDN connectivity procedure (TS 24.301 Section 6.5.1)

use crate::cause::Failure;
use crate::error::{EsmError, EsmResult, Target};
use crate::message::EsmMessage;
use crate::pdn::{PdnConnection, PdnState};
use crate::procedure::{Procedure, ProcedureKey, ProcedureKind};
use crate::session::EsmSession;
use crate::types::{
    apn_is_valid, qci, BearerQos, ContextId, Ebi, Pco, PdnAddress, PdnCid, PdnType, Pti,
    RequestType,
};

/// Decoded PDN connectivity request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdnConnectivityRequest {
    /// PTI chosen by the UE; unassigned for network-triggered requests
    pub pti: Pti,
    pub pdn_cid: PdnCid,
    pub context_id: ContextId,
    pub request_type: RequestType,
    pub apn: Option<String>,
    pub pdn_type: PdnType,
    pub pdn_addr: Option<PdnAddress>,
    pub default_qos: BearerQos,
    pub pco: Pco,
}

impl PdnConnectivityRequest {
    /// Initial request with QCI 9 default QoS
    pub fn new(pti: Pti, pdn_cid: PdnCid, apn: &str, pdn_type: PdnType) -> Self {
        Self {
            pti,
            pdn_cid,
            context_id: 0,
            request_type: RequestType::Initial,
            apn: Some(apn.to_string()),
            pdn_type,
            pdn_addr: None,
            default_qos: BearerQos::non_gbr(9),
            pco: Pco::new(),
        }
    }

    /// Emergency request without APN
    pub fn emergency(pti: Pti, pdn_cid: PdnCid, pdn_type: PdnType) -> Self {
        Self {
            request_type: RequestType::Emergency,
            apn: None,
            ..Self::new(pti, pdn_cid, "", pdn_type)
        }
    }
}

impl EsmSession {
    /// Admit a PDN connectivity request.
    ///
    /// Every check runs before the first mutation, so a rejected request
    /// leaves the session untouched. Returns the PTI bound to the procedure.
    pub fn pdn_connectivity_request(&mut self, req: PdnConnectivityRequest) -> EsmResult<Pti> {
        let apn = self.admit_connectivity(&req).map_err(|err| {
            log::warn!(
                "[{}] PDN connectivity request {} {} rejected: {}",
                self.subscriber(),
                req.pti,
                req.pdn_cid,
                err
            );
            err
        })?;

        self.open_merge_window();
        let ue_triggered = !req.pti.is_unassigned();
        let pti = self.bind_pti(req.pti)?;
        let cid = req.pdn_cid;
        let pdn = PdnConnection {
            cid,
            pti: Some(pti),
            context_id: req.context_id,
            apn,
            pdn_type: req.pdn_type,
            pdn_addr: req.pdn_addr,
            default_qos: req.default_qos,
            default_ebi: None,
            pco: req.pco,
            request_type: req.request_type,
            state: PdnState::Pending,
        };
        if let Err(err) = self.pdns.insert(pdn) {
            self.alloc.release_pti(pti)?;
            return Err(err);
        }
        self.procedures.insert(Procedure::new(
            ProcedureKind::PdnConnectivity,
            ProcedureKey::Pti(pti),
            cid,
            ue_triggered,
        ))?;

        log::info!(
            "[{}] PDN connectivity {} {} pending (APN '{}', {}, {:?})",
            self.subscriber(),
            pti,
            cid,
            self.pdns.find(cid)?.apn,
            req.pdn_type,
            req.request_type
        );
        Ok(pti)
    }

    /// Admission checks. Returns the APN to record.
    ///
    /// Emergency requests get the extra connection id and skip the
    /// connection limit and the served-APN list. A handover moves an
    /// existing connection, so it must carry the address that connection
    /// already holds; otherwise it is handled like an initial request.
    fn admit_connectivity(&self, req: &PdnConnectivityRequest) -> EsmResult<String> {
        let emergency = req.request_type.is_emergency();
        let max = u16::from(self.config.max_pdn_connections);

        // One extra connection id is held back for emergency bearer services
        let limit = max + u16::from(emergency);
        if u16::from(req.pdn_cid.value()) >= limit || self.pdns.contains(req.pdn_cid) {
            return Err(Failure::PdnCidUnavailable.into());
        }
        if !req.pti.is_unassigned() {
            self.check_pti(req.pti)?;
        }
        let regular = self.pdns.iter().filter(|pdn| !pdn.is_emergency()).count();
        if !emergency && regular as u16 >= max {
            return Err(Failure::TooManyPdnConnections.into());
        }

        let apn = match req.apn.as_deref().filter(|apn| !apn.is_empty()) {
            Some(apn) => {
                if !apn_is_valid(apn) {
                    return Err(Failure::MalformedParameter.into());
                }
                if !emergency && !self.config.apn_is_served(apn) {
                    return Err(Failure::UnknownApn.into());
                }
                apn.to_string()
            }
            None if emergency => self.config.emergency_apn.clone().unwrap_or_default(),
            None => return Err(Failure::MissingApn.into()),
        };

        if emergency && self.pdns.iter().any(|pdn| pdn.is_emergency()) {
            return Err(Failure::MultipleEmergencyConnections.into());
        }
        if let Some(addr) = req.pdn_addr {
            if addr.pdn_type() != req.pdn_type {
                return Err(Failure::MalformedParameter.into());
            }
        }
        if req.request_type == RequestType::Handover && req.pdn_addr.is_none() {
            return Err(Failure::NoPdnConnection.into());
        }
        if !qci::is_standardized(req.default_qos.qci) {
            return Err(Failure::UnsupportedQci.into());
        }
        if qci::is_gbr(req.default_qos.qci) {
            return Err(Failure::QosNotAccepted.into());
        }
        Ok(apn)
    }

    /// PDN connectivity reject for the connection bound to the message PTI.
    ///
    /// The connection, its PTI and the procedure are released. The message is
    /// returned only when it must go to the UE on its own.
    pub fn pdn_connectivity_reject(
        &mut self,
        is_standalone: bool,
        ebi: Ebi,
        msg: EsmMessage,
        ue_triggered: bool,
    ) -> EsmResult<Option<EsmMessage>> {
        let pti = msg.pti();
        let cid = match self
            .procedures
            .find_kind(ProcedureKey::Pti(pti), ProcedureKind::PdnConnectivity)
        {
            Ok(procedure) => procedure.pdn_cid,
            Err(err) => {
                log::warn!("[{}] PDN connectivity reject on {}: {}", self.subscriber(), pti, err);
                msg.discard();
                return Err(err);
            }
        };

        let cause = msg.cause().unwrap_or_default();
        log::warn!(
            "[{}] PDN connectivity {} {} rejected {} ({})",
            self.subscriber(),
            pti,
            cid,
            cause,
            ebi
        );
        self.remove_pdn(cid)?;
        Ok(self.settle_reject(ProcedureKind::PdnConnectivity, is_standalone, msg, ue_triggered))
    }

    /// Tear down a pending connection without any peer exchange.
    ///
    /// Returns `Ok(false)` when the connection is already gone.
    pub fn pdn_connectivity_failure(&mut self, pdn_cid: PdnCid) -> EsmResult<bool> {
        let Ok(pdn) = self.pdns.find(pdn_cid) else {
            log::debug!("[{}] {} already released", self.subscriber(), pdn_cid);
            return Ok(false);
        };
        if pdn.state != PdnState::Pending {
            return Err(EsmError::not_applicable(
                "pdn_connectivity_failure",
                Target::Pdn(pdn_cid),
                format!("connection is {}", pdn.state),
            ));
        }
        self.remove_pdn(pdn_cid)?;
        log::info!("[{}] PDN connectivity {} failed locally", self.subscriber(), pdn_cid);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::Arc;

    use super::*;
    use crate::cause::EsmCause;
    use crate::config::EsmConfig;
    use crate::message::{Delivery, EsmHeader, EsmMessageType};
    use crate::session::SubscriberId;

    fn session() -> EsmSession {
        session_with(EsmConfig::default())
    }

    fn session_with(config: EsmConfig) -> EsmSession {
        EsmSession::new(SubscriberId::new("001010123456789"), Arc::new(config))
    }

    fn reject(pti: u8, cause: EsmCause) -> EsmMessage {
        let header = EsmHeader::new(EsmMessageType::PdnConnectivityReject, Pti(pti), Ebi(0));
        EsmMessage::build(header, Some(cause), &[])
    }

    fn rejected(err: EsmError) -> EsmCause {
        err.cause().unwrap_or_default()
    }

    #[test]
    fn test_request_creates_pending_connection() {
        let mut session = session();
        let req = PdnConnectivityRequest::new(Pti(1), PdnCid(0), "internet", PdnType::Ipv4);
        assert_eq!(session.pdn_connectivity_request(req).unwrap(), Pti(1));

        let pdn = session.pdn(PdnCid(0)).unwrap();
        assert_eq!(pdn.state, PdnState::Pending);
        assert_eq!(pdn.pti, Some(Pti(1)));
        assert!(session.procedure(ProcedureKey::Pti(Pti(1))).unwrap().ue_triggered);
        session.verify().unwrap();
    }

    #[test]
    fn test_network_triggered_allocates_pti() {
        let mut session = session();
        let req = PdnConnectivityRequest::new(Pti::UNASSIGNED, PdnCid(1), "internet", PdnType::Ipv6);
        assert_eq!(session.pdn_connectivity_request(req).unwrap(), Pti(1));
        assert!(!session.procedure(ProcedureKey::Pti(Pti(1))).unwrap().ue_triggered);
    }

    #[test]
    fn test_admission_causes() {
        let mut config = EsmConfig::default();
        config.apn = vec!["internet".to_string()];
        let mut session = session_with(config);
        session
            .pdn_connectivity_request(PdnConnectivityRequest::new(
                Pti(1),
                PdnCid(0),
                "internet",
                PdnType::Ipv4,
            ))
            .unwrap();
        let before = session.snapshot();

        let same_pti = PdnConnectivityRequest::new(Pti(1), PdnCid(1), "internet", PdnType::Ipv4);
        assert_eq!(
            rejected(session.pdn_connectivity_request(same_pti).unwrap_err()),
            EsmCause::PtiAlreadyInUse
        );

        let same_cid = PdnConnectivityRequest::new(Pti(2), PdnCid(0), "internet", PdnType::Ipv4);
        assert_eq!(
            rejected(session.pdn_connectivity_request(same_cid).unwrap_err()),
            EsmCause::InsufficientResources
        );

        let out_of_range = PdnConnectivityRequest::new(Pti(2), PdnCid(4), "internet", PdnType::Ipv4);
        assert_eq!(
            rejected(session.pdn_connectivity_request(out_of_range).unwrap_err()),
            EsmCause::InsufficientResources
        );

        let unknown = PdnConnectivityRequest::new(Pti(2), PdnCid(1), "ims", PdnType::Ipv4);
        assert_eq!(
            rejected(session.pdn_connectivity_request(unknown).unwrap_err()),
            EsmCause::MissingOrUnknownApn
        );

        let mut missing = PdnConnectivityRequest::new(Pti(2), PdnCid(1), "", PdnType::Ipv4);
        missing.apn = None;
        assert_eq!(
            rejected(session.pdn_connectivity_request(missing).unwrap_err()),
            EsmCause::MissingOrUnknownApn
        );

        let malformed = PdnConnectivityRequest::new(Pti(2), PdnCid(1), "in..ternet", PdnType::Ipv4);
        assert_eq!(
            rejected(session.pdn_connectivity_request(malformed).unwrap_err()),
            EsmCause::InvalidMandatoryInformation
        );

        let mut mismatch = PdnConnectivityRequest::new(Pti(2), PdnCid(1), "internet", PdnType::Ipv4);
        mismatch.pdn_addr = Some(PdnAddress::Ipv6(Ipv6Addr::LOCALHOST));
        assert_eq!(
            rejected(session.pdn_connectivity_request(mismatch).unwrap_err()),
            EsmCause::InvalidMandatoryInformation
        );

        let mut gbr = PdnConnectivityRequest::new(Pti(2), PdnCid(1), "internet", PdnType::Ipv4);
        gbr.default_qos = BearerQos::non_gbr(1);
        assert_eq!(
            rejected(session.pdn_connectivity_request(gbr).unwrap_err()),
            EsmCause::EpsQosNotAccepted
        );

        let mut bad_qci = PdnConnectivityRequest::new(Pti(2), PdnCid(1), "internet", PdnType::Ipv4);
        bad_qci.default_qos = BearerQos::non_gbr(10);
        assert_eq!(
            rejected(session.pdn_connectivity_request(bad_qci).unwrap_err()),
            EsmCause::UnsupportedQciValue
        );

        let invalid_pti = PdnConnectivityRequest::new(Pti(255), PdnCid(1), "internet", PdnType::Ipv4);
        assert_eq!(
            rejected(session.pdn_connectivity_request(invalid_pti).unwrap_err()),
            EsmCause::InvalidPtiValue
        );

        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn test_handover_keeps_existing_address() {
        let mut session = session();
        let mut req = PdnConnectivityRequest::new(Pti(1), PdnCid(0), "internet", PdnType::Ipv4);
        req.request_type = RequestType::Handover;
        let before = session.snapshot();
        assert_eq!(
            session.pdn_connectivity_request(req.clone()),
            Err(EsmError::Rejected(EsmCause::PdnConnectionDoesNotExist))
        );
        assert_eq!(session.snapshot(), before);

        req.pdn_addr = Some(PdnAddress::Ipv4(Ipv4Addr::new(10, 45, 0, 7)));
        session.pdn_connectivity_request(req).unwrap();
        let pdn = session.pdn(PdnCid(0)).unwrap();
        assert_eq!(pdn.request_type, RequestType::Handover);
        assert_eq!(pdn.pdn_addr, Some(PdnAddress::Ipv4(Ipv4Addr::new(10, 45, 0, 7))));
    }

    #[test]
    fn test_emergency_bypasses_limits() {
        let mut config = EsmConfig::default();
        config.max_pdn_connections = 1;
        config.apn = vec!["internet".to_string()];
        config.emergency_apn = Some("sos".to_string());
        let mut session = session_with(config);

        session
            .pdn_connectivity_request(PdnConnectivityRequest::new(
                Pti(1),
                PdnCid(0),
                "internet",
                PdnType::Ipv4,
            ))
            .unwrap();

        let mut addr = PdnConnectivityRequest::emergency(Pti(2), PdnCid(1), PdnType::Ipv4);
        addr.pdn_addr = Some(PdnAddress::Ipv4(Ipv4Addr::new(10, 45, 0, 9)));
        session.pdn_connectivity_request(addr).unwrap();
        let pdn = session.pdn(PdnCid(1)).unwrap();
        assert_eq!(pdn.apn, "sos");
        assert!(pdn.is_emergency());
        session.verify().unwrap();

        // Only one emergency connection
        session.pdn_connectivity_failure(PdnCid(0)).unwrap();
        let second = PdnConnectivityRequest::emergency(Pti(3), PdnCid(0), PdnType::Ipv4);
        assert_eq!(
            rejected(session.pdn_connectivity_request(second).unwrap_err()),
            EsmCause::MultiplePdnConnectionsNotAllowed
        );
    }

    #[test]
    fn test_reject_standalone_returns_message() {
        let mut session = session();
        let req = PdnConnectivityRequest::new(Pti(1), PdnCid(0), "internet", PdnType::Ipv4);
        session.pdn_connectivity_request(req).unwrap();

        let msg = session
            .pdn_connectivity_reject(true, Ebi(0), reject(1, EsmCause::MissingOrUnknownApn), true)
            .unwrap()
            .unwrap();
        assert_eq!(msg.delivery(), Delivery::Standalone);
        assert_eq!(msg.cause(), Some(EsmCause::MissingOrUnknownApn));
        msg.discard();

        assert!(session.snapshot().is_empty());
        assert!(session.merged_cause().is_none());
    }

    #[test]
    fn test_reject_non_standalone_merges_first_cause() {
        let mut session = session();
        for (pti, cid) in [(1, 0), (2, 1)] {
            let req = PdnConnectivityRequest::new(Pti(pti), PdnCid(cid), "internet", PdnType::Ipv4);
            session.pdn_connectivity_request(req).unwrap();
        }

        let out = session
            .pdn_connectivity_reject(false, Ebi(0), reject(1, EsmCause::NetworkFailure), true)
            .unwrap();
        assert!(out.is_none());
        let out = session
            .pdn_connectivity_reject(false, Ebi(0), reject(2, EsmCause::InsufficientResources), true)
            .unwrap();
        assert!(out.is_none());

        assert_eq!(session.take_merged_cause(), Some(EsmCause::NetworkFailure));
        assert!(session.snapshot().is_empty());
    }

    #[test]
    fn test_reject_network_triggered_stays_local() {
        let mut session = session();
        let req = PdnConnectivityRequest::new(Pti::UNASSIGNED, PdnCid(0), "internet", PdnType::Ipv4);
        let pti = session.pdn_connectivity_request(req).unwrap();
        let out = session
            .pdn_connectivity_reject(true, Ebi(0), reject(pti.value(), EsmCause::NetworkFailure), false)
            .unwrap();
        assert!(out.is_none());
        assert!(session.snapshot().is_empty());
    }

    #[test]
    fn test_reject_unknown_pti() {
        let mut session = session();
        let err = session
            .pdn_connectivity_reject(true, Ebi(0), reject(7, EsmCause::NetworkFailure), true)
            .unwrap_err();
        assert_eq!(err, EsmError::NotFound(Target::Pti(Pti(7))));
    }

    #[test]
    fn test_failure_is_idempotent() {
        let mut session = session();
        let req = PdnConnectivityRequest::new(Pti(1), PdnCid(0), "internet", PdnType::Ipv4);
        session.pdn_connectivity_request(req).unwrap();
        assert!(session.pdn_connectivity_failure(PdnCid(0)).unwrap());
        assert!(!session.pdn_connectivity_failure(PdnCid(0)).unwrap());
        assert!(session.snapshot().is_empty());
    }

    #[test]
    fn test_failure_on_active_connection() {
        let mut session = session();
        let req = PdnConnectivityRequest::new(Pti(1), PdnCid(0), "internet", PdnType::Ipv4);
        session.pdn_connectivity_request(req).unwrap();
        session.default_eps_bearer_context(PdnCid(0), 9).unwrap();
        assert!(matches!(
            session.pdn_connectivity_failure(PdnCid(0)),
            Err(EsmError::NotApplicable { .. })
        ));
    }
}
