//! ESM Event Dispatch
//!
//! One [`EsmEvent`] variant per procedure entry point. [`EsmSession::dispatch`]
//! is the single table routing events to the procedures; in debug builds it
//! re-checks the session invariants after every event.

use std::fmt;

use crate::cause::EsmCause;
use crate::error::EsmResult;
use crate::esm_proc::{DedicatedBearerRequest, PdnConnectivityRequest};
use crate::message::EsmMessage;
use crate::procedure::{TimerOutcome, Transmission};
use crate::session::EsmSession;
use crate::types::{Ebi, PdnCid, Pti};

// ============================================================================
// Events
// ============================================================================

/// Input to the ESM engine
#[derive(Debug)]
pub enum EsmEvent {
    /// PDN connectivity request decoded from the UE, or network triggered
    PdnConnectivityRequest(PdnConnectivityRequest),
    /// PDN connectivity reject built for the UE
    PdnConnectivityReject {
        is_standalone: bool,
        ebi: Ebi,
        message: EsmMessage,
        ue_triggered: bool,
    },
    /// Local failure of a pending connection
    PdnConnectivityFailure { pdn_cid: PdnCid },

    /// PDN disconnect request from the UE
    PdnDisconnectRequest { pti: Pti, linked_ebi: Option<Ebi> },
    /// Disconnect confirmed by the core network
    PdnDisconnectAccept { pdn_cid: PdnCid },
    /// PDN disconnect reject built for the UE
    PdnDisconnectReject {
        is_standalone: bool,
        ebi: Ebi,
        message: EsmMessage,
        ue_triggered: bool,
    },

    /// Create the default bearer of a pending connection
    DefaultBearer { pdn_cid: PdnCid, qci: u8 },
    /// Send (or resend) the default bearer activation request
    DefaultBearerRequest {
        is_standalone: bool,
        ebi: Ebi,
        message: EsmMessage,
        ue_triggered: bool,
    },
    DefaultBearerAccept { ebi: Ebi },
    DefaultBearerReject { ebi: Ebi, cause: EsmCause },
    /// Abort all pending default bearer activations
    DefaultBearerFailure,

    /// Create a dedicated bearer
    DedicatedBearer(DedicatedBearerRequest),
    /// Send (or resend) the dedicated bearer activation request
    DedicatedBearerRequest {
        is_standalone: bool,
        ebi: Ebi,
        message: EsmMessage,
        ue_triggered: bool,
    },
    DedicatedBearerAccept { ebi: Ebi },
    DedicatedBearerReject { ebi: Ebi, cause: EsmCause },

    /// Start deactivating a bearer
    Deactivate { ebi: Ebi, is_local: bool },
    /// Send (or resend) the deactivation request
    DeactivateRequest {
        is_standalone: bool,
        ebi: Ebi,
        message: EsmMessage,
        ue_triggered: bool,
    },
    DeactivateAccept { ebi: Ebi },

    /// ESM STATUS received
    StatusInd { pti: Pti, ebi: Ebi, cause: EsmCause },
    /// ESM STATUS to send, or one the UE sent
    Status {
        is_standalone: bool,
        ebi: Ebi,
        message: EsmMessage,
        sent_by_ue: bool,
    },

    /// T3485 or T3495 expired for a bearer
    TimerExpired { ebi: Ebi },
}

impl EsmEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EsmEvent::PdnConnectivityRequest(_) => "PDN_CONNECTIVITY_REQUEST",
            EsmEvent::PdnConnectivityReject { .. } => "PDN_CONNECTIVITY_REJECT",
            EsmEvent::PdnConnectivityFailure { .. } => "PDN_CONNECTIVITY_FAILURE",
            EsmEvent::PdnDisconnectRequest { .. } => "PDN_DISCONNECT_REQUEST",
            EsmEvent::PdnDisconnectAccept { .. } => "PDN_DISCONNECT_ACCEPT",
            EsmEvent::PdnDisconnectReject { .. } => "PDN_DISCONNECT_REJECT",
            EsmEvent::DefaultBearer { .. } => "DEFAULT_BEARER",
            EsmEvent::DefaultBearerRequest { .. } => "DEFAULT_BEARER_REQUEST",
            EsmEvent::DefaultBearerAccept { .. } => "DEFAULT_BEARER_ACCEPT",
            EsmEvent::DefaultBearerReject { .. } => "DEFAULT_BEARER_REJECT",
            EsmEvent::DefaultBearerFailure => "DEFAULT_BEARER_FAILURE",
            EsmEvent::DedicatedBearer(_) => "DEDICATED_BEARER",
            EsmEvent::DedicatedBearerRequest { .. } => "DEDICATED_BEARER_REQUEST",
            EsmEvent::DedicatedBearerAccept { .. } => "DEDICATED_BEARER_ACCEPT",
            EsmEvent::DedicatedBearerReject { .. } => "DEDICATED_BEARER_REJECT",
            EsmEvent::Deactivate { .. } => "DEACTIVATE",
            EsmEvent::DeactivateRequest { .. } => "DEACTIVATE_REQUEST",
            EsmEvent::DeactivateAccept { .. } => "DEACTIVATE_ACCEPT",
            EsmEvent::StatusInd { .. } => "STATUS_IND",
            EsmEvent::Status { .. } => "STATUS",
            EsmEvent::TimerExpired { .. } => "TIMER_EXPIRED",
        }
    }
}

impl fmt::Display for EsmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Output of a dispatched event
#[derive(Debug)]
#[must_use]
pub enum EsmResponse {
    /// Nothing to report
    Done,
    /// PTI bound to a PDN procedure
    Pti(Pti),
    /// EBI of a created bearer
    Ebi(Ebi),
    /// Connection the event applied to
    PdnCid(PdnCid),
    /// Connections the event applied to
    PdnCids(Vec<PdnCid>),
    /// Released bearers
    Ebis(Vec<Ebi>),
    /// Bearer being deactivated and its bearer id within the connection
    Bearer { pdn_cid: PdnCid, bid: u8 },
    /// Whether a local failure found something to tear down
    Removed(bool),
    /// Message for the UE, if any, and the cause merged so far for the
    /// enclosing response
    Message {
        message: Option<EsmMessage>,
        merged_cause: Option<EsmCause>,
    },
    /// Request to transmit with its timer
    Transmission(Transmission),
    Timer(TimerOutcome),
}

impl EsmResponse {
    /// Merged cause of non-standalone rejects, if the response carries one
    pub fn merged_cause(&self) -> Option<EsmCause> {
        match self {
            EsmResponse::Message { merged_cause, .. } => *merged_cause,
            _ => None,
        }
    }

    /// Outgoing message carried by the response, if any
    pub fn into_message(self) -> Option<EsmMessage> {
        match self {
            EsmResponse::Message { message, .. } => message,
            EsmResponse::Transmission(tx) => Some(tx.message),
            EsmResponse::Timer(TimerOutcome::Retransmit(tx)) => Some(tx.message),
            _ => None,
        }
    }
}

// ============================================================================
// Dispatch
// ============================================================================

impl EsmSession {
    fn message_response(&self, message: Option<EsmMessage>) -> EsmResponse {
        EsmResponse::Message {
            message,
            merged_cause: self.merged_cause(),
        }
    }

    /// Run one event against the session
    pub fn dispatch(&mut self, event: EsmEvent) -> EsmResult<EsmResponse> {
        let name = event.name();
        log::debug!("[{}] ESM event {}", self.subscriber(), name);

        let response = match event {
            EsmEvent::PdnConnectivityRequest(req) => {
                self.pdn_connectivity_request(req).map(EsmResponse::Pti)
            }
            EsmEvent::PdnConnectivityReject {
                is_standalone,
                ebi,
                message,
                ue_triggered,
            } => self
                .pdn_connectivity_reject(is_standalone, ebi, message, ue_triggered)
                .map(|message| self.message_response(message)),
            EsmEvent::PdnConnectivityFailure { pdn_cid } => self
                .pdn_connectivity_failure(pdn_cid)
                .map(EsmResponse::Removed),

            EsmEvent::PdnDisconnectRequest { pti, linked_ebi } => self
                .pdn_disconnect_request(pti, linked_ebi)
                .map(EsmResponse::PdnCid),
            EsmEvent::PdnDisconnectAccept { pdn_cid } => {
                self.pdn_disconnect_accept(pdn_cid).map(EsmResponse::Ebis)
            }
            EsmEvent::PdnDisconnectReject {
                is_standalone,
                ebi,
                message,
                ue_triggered,
            } => self
                .pdn_disconnect_reject(is_standalone, ebi, message, ue_triggered)
                .map(|message| self.message_response(message)),

            EsmEvent::DefaultBearer { pdn_cid, qci } => self
                .default_eps_bearer_context(pdn_cid, qci)
                .map(EsmResponse::Ebi),
            EsmEvent::DefaultBearerRequest {
                is_standalone,
                ebi,
                message,
                ue_triggered,
            } => self
                .default_eps_bearer_context_request(is_standalone, ebi, message, ue_triggered)
                .map(EsmResponse::Transmission),
            EsmEvent::DefaultBearerAccept { ebi } => self
                .default_eps_bearer_context_accept(ebi)
                .map(EsmResponse::PdnCid),
            EsmEvent::DefaultBearerReject { ebi, cause } => self
                .default_eps_bearer_context_reject(ebi, cause)
                .map(EsmResponse::PdnCid),
            EsmEvent::DefaultBearerFailure => self
                .default_eps_bearer_context_failure()
                .map(EsmResponse::PdnCids),

            EsmEvent::DedicatedBearer(req) => {
                self.dedicated_eps_bearer_context(req).map(EsmResponse::Ebi)
            }
            EsmEvent::DedicatedBearerRequest {
                is_standalone,
                ebi,
                message,
                ue_triggered,
            } => self
                .dedicated_eps_bearer_context_request(is_standalone, ebi, message, ue_triggered)
                .map(EsmResponse::Transmission),
            EsmEvent::DedicatedBearerAccept { ebi } => self
                .dedicated_eps_bearer_context_accept(ebi)
                .map(EsmResponse::PdnCid),
            EsmEvent::DedicatedBearerReject { ebi, cause } => self
                .dedicated_eps_bearer_context_reject(ebi, cause)
                .map(EsmResponse::PdnCid),

            EsmEvent::Deactivate { ebi, is_local } => self
                .eps_bearer_context_deactivate(ebi, is_local)
                .map(|(pdn_cid, bid)| EsmResponse::Bearer { pdn_cid, bid }),
            EsmEvent::DeactivateRequest {
                is_standalone,
                ebi,
                message,
                ue_triggered,
            } => self
                .eps_bearer_context_deactivate_request(is_standalone, ebi, message, ue_triggered)
                .map(EsmResponse::Transmission),
            EsmEvent::DeactivateAccept { ebi } => self
                .eps_bearer_context_deactivate_accept(ebi)
                .map(EsmResponse::PdnCid),

            EsmEvent::StatusInd { pti, ebi, cause } => {
                self.status_ind(pti, ebi, cause).map(|()| EsmResponse::Done)
            }
            EsmEvent::Status {
                is_standalone,
                ebi,
                message,
                sent_by_ue,
            } => self
                .status(is_standalone, ebi, message, sent_by_ue)
                .map(|message| self.message_response(message)),

            EsmEvent::TimerExpired { ebi } => self.timer_expired(ebi).map(EsmResponse::Timer),
        };

        if let Err(err) = &response {
            log::debug!("[{}] ESM event {} failed: {}", self.subscriber(), name, err);
        }
        if cfg!(debug_assertions) {
            self.verify()?;
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::config::EsmConfig;
    use crate::message::{Delivery, EsmHeader, EsmMessageType};
    use crate::session::SubscriberId;
    use crate::types::PdnType;

    fn session() -> EsmSession {
        EsmSession::new(SubscriberId::new("001010123456789"), Arc::new(EsmConfig::default()))
    }

    #[test]
    fn test_event_names() {
        assert_eq!(EsmEvent::DefaultBearerFailure.name(), "DEFAULT_BEARER_FAILURE");
        assert_eq!(
            EsmEvent::TimerExpired { ebi: Ebi(5) }.to_string(),
            "TIMER_EXPIRED"
        );
    }

    #[test]
    fn test_dispatch_connectivity_flow() {
        let mut session = session();
        let req = PdnConnectivityRequest::new(Pti(1), PdnCid(0), "internet", PdnType::Ipv4);
        assert!(matches!(
            session.dispatch(EsmEvent::PdnConnectivityRequest(req)).unwrap(),
            EsmResponse::Pti(Pti(1))
        ));
        assert!(matches!(
            session
                .dispatch(EsmEvent::DefaultBearer { pdn_cid: PdnCid(0), qci: 9 })
                .unwrap(),
            EsmResponse::Ebi(Ebi(5))
        ));

        let header = EsmHeader::new(
            EsmMessageType::ActivateDefaultEpsBearerContextRequest,
            Pti(1),
            Ebi(5),
        );
        let response = session
            .dispatch(EsmEvent::DefaultBearerRequest {
                is_standalone: true,
                ebi: Ebi(5),
                message: EsmMessage::build(header, None, &[]),
                ue_triggered: true,
            })
            .unwrap();
        let mut sink: Vec<(Delivery, EsmHeader, Bytes)> = Vec::new();
        response.into_message().unwrap().transmit(&mut sink).unwrap();
        assert_eq!(sink.len(), 1);

        assert!(matches!(
            session.dispatch(EsmEvent::DefaultBearerAccept { ebi: Ebi(5) }).unwrap(),
            EsmResponse::PdnCid(PdnCid(0))
        ));
        assert!(matches!(
            session
                .dispatch(EsmEvent::Deactivate { ebi: Ebi(5), is_local: true })
                .unwrap(),
            EsmResponse::Bearer { pdn_cid: PdnCid(0), bid: 0 }
        ));
        assert!(session.snapshot().is_empty());
    }

    #[test]
    fn test_dispatch_error_keeps_session_consistent() {
        let mut session = session();
        let err = session
            .dispatch(EsmEvent::DefaultBearerAccept { ebi: Ebi(5) })
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(
            session.dispatch(EsmEvent::PdnConnectivityFailure { pdn_cid: PdnCid(0) }).unwrap(),
            EsmResponse::Removed(false)
        ));
    }

    fn piggybacked_reject(session: &mut EsmSession, pti: u8, cause: EsmCause) -> EsmResponse {
        let header = EsmHeader::new(EsmMessageType::PdnConnectivityReject, Pti(pti), Ebi(0));
        session
            .dispatch(EsmEvent::PdnConnectivityReject {
                is_standalone: false,
                ebi: Ebi(0),
                message: EsmMessage::build(header, Some(cause), &[]),
                ue_triggered: true,
            })
            .unwrap()
    }

    #[test]
    fn test_separate_exchanges_do_not_share_merged_cause() {
        let mut session = session();
        let req = PdnConnectivityRequest::new(Pti(1), PdnCid(0), "internet", PdnType::Ipv4);
        let _ = session.dispatch(EsmEvent::PdnConnectivityRequest(req)).unwrap();
        let response = piggybacked_reject(&mut session, 1, EsmCause::MissingOrUnknownApn);
        assert_eq!(response.merged_cause(), Some(EsmCause::MissingOrUnknownApn));
        assert!(response.into_message().is_none());

        // An unrelated connection completes in between
        let req = PdnConnectivityRequest::new(Pti(2), PdnCid(1), "internet", PdnType::Ipv4);
        let _ = session.dispatch(EsmEvent::PdnConnectivityRequest(req)).unwrap();
        let _ = session
            .dispatch(EsmEvent::DefaultBearer { pdn_cid: PdnCid(1), qci: 9 })
            .unwrap();
        let _ = session.dispatch(EsmEvent::DefaultBearerAccept { ebi: Ebi(5) }).unwrap();

        let req = PdnConnectivityRequest::new(Pti(3), PdnCid(0), "internet", PdnType::Ipv4);
        let _ = session.dispatch(EsmEvent::PdnConnectivityRequest(req)).unwrap();
        let response = piggybacked_reject(&mut session, 3, EsmCause::NetworkFailure);
        assert_eq!(response.merged_cause(), Some(EsmCause::NetworkFailure));
        assert_eq!(session.take_merged_cause(), Some(EsmCause::NetworkFailure));
        assert!(response.into_message().is_none());
    }
}
