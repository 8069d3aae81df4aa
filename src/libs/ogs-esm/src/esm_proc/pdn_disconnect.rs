//! UE requested PDN disconnect procedure (TS 24.301 Section 6.5.2)

use crate::bearer::BearerState;
use crate::cause::Failure;
use crate::error::{EsmError, EsmResult, Target};
use crate::message::EsmMessage;
use crate::pdn::PdnState;
use crate::procedure::{Procedure, ProcedureKey, ProcedureKind};
use crate::session::EsmSession;
use crate::types::{Ebi, PdnCid, Pti};

impl EsmSession {
    /// Mark the addressed connection for disconnection.
    ///
    /// The target is the connection anchored by `linked_ebi`, or, when the
    /// UE named none, the only active connection of the session.
    pub fn pdn_disconnect_request(&mut self, pti: Pti, linked_ebi: Option<Ebi>) -> EsmResult<PdnCid> {
        let pdn_cid = self.admit_disconnect(pti, linked_ebi).map_err(|err| {
            log::warn!(
                "[{}] PDN disconnect request {} rejected: {}",
                self.subscriber(),
                pti,
                err
            );
            err
        })?;

        self.open_merge_window();
        self.bind_pti(pti)?;
        self.pdns.find_mut(pdn_cid)?.pti = Some(pti);
        self.set_pdn_state(pdn_cid, PdnState::PendingDisconnect)?;
        self.procedures.insert(Procedure::new(
            ProcedureKind::PdnDisconnect,
            ProcedureKey::Pti(pti),
            pdn_cid,
            true,
        ))?;

        log::info!("[{}] PDN disconnect {} on {}", self.subscriber(), pti, pdn_cid);
        Ok(pdn_cid)
    }

    fn admit_disconnect(&self, pti: Pti, linked_ebi: Option<Ebi>) -> EsmResult<PdnCid> {
        self.check_pti(pti)?;

        let pdn = match linked_ebi {
            Some(ebi) => {
                if self.pdns.is_empty() {
                    return Err(Failure::NoPdnConnection.into());
                }
                self.pdns
                    .find_by_default_ebi(ebi)
                    .ok_or(EsmError::from(Failure::DefaultBearerInvalid))?
            }
            None => {
                let mut active = self.pdns.in_state(PdnState::Active);
                match (active.next(), active.next()) {
                    (None, _) => return Err(Failure::NoPdnConnection.into()),
                    (Some(_), Some(_)) => return Err(Failure::AmbiguousPdnConnection.into()),
                    (Some(pdn), None) => pdn,
                }
            }
        };

        if pdn.state != PdnState::Active
            || pdn.pti.is_some()
            || !self.procedures.for_pdn(pdn.cid).is_empty()
        {
            return Err(Failure::ProcedureInFlight.into());
        }
        if self.config.reject_last_pdn_disconnect && self.pdns.len() == 1 {
            return Err(Failure::LastPdnConnection.into());
        }
        Ok(pdn.cid)
    }

    /// Disconnect confirmed: release the connection with all its bearers.
    ///
    /// Returns the released EBIs, dedicated bearers first and the default
    /// bearer last.
    pub fn pdn_disconnect_accept(&mut self, pdn_cid: PdnCid) -> EsmResult<Vec<Ebi>> {
        let pdn = self.pdns.find(pdn_cid)?;
        if pdn.state != PdnState::PendingDisconnect {
            return Err(EsmError::not_applicable(
                "pdn_disconnect_accept",
                Target::Pdn(pdn_cid),
                format!("connection is {}", pdn.state),
            ));
        }
        let released = self.remove_pdn(pdn_cid)?;
        log::info!(
            "[{}] PDN disconnect of {} complete, released {:?}",
            self.subscriber(),
            pdn_cid,
            released
        );
        Ok(released)
    }

    /// Disconnect refused: the connection stays active
    pub fn pdn_disconnect_reject(
        &mut self,
        is_standalone: bool,
        ebi: Ebi,
        msg: EsmMessage,
        ue_triggered: bool,
    ) -> EsmResult<Option<EsmMessage>> {
        let pti = msg.pti();
        let pdn_cid = match self
            .procedures
            .find_kind(ProcedureKey::Pti(pti), ProcedureKind::PdnDisconnect)
        {
            Ok(procedure) => procedure.pdn_cid,
            Err(err) => {
                log::warn!("[{}] PDN disconnect reject on {}: {}", self.subscriber(), pti, err);
                msg.discard();
                return Err(err);
            }
        };

        let cause = msg.cause().unwrap_or_default();
        log::warn!(
            "[{}] PDN disconnect {} of {} rejected {} ({})",
            self.subscriber(),
            pti,
            pdn_cid,
            cause,
            ebi
        );
        self.revert_disconnect(pdn_cid)?;
        Ok(self.settle_reject(ProcedureKind::PdnDisconnect, is_standalone, msg, ue_triggered))
    }

    /// Drop the disconnect PTI and return the connection to `Active`, unless
    /// its default bearer is being deactivated meanwhile.
    pub(crate) fn revert_disconnect(&mut self, pdn_cid: PdnCid) -> EsmResult<()> {
        self.release_pdn_pti(pdn_cid)?;
        let default_leaving = self
            .pdns
            .find(pdn_cid)?
            .default_ebi
            .and_then(|ebi| self.bearers.find(ebi).ok())
            .is_some_and(|bearer| bearer.state == BearerState::InactivePending);
        if !default_leaving {
            self.set_pdn_state(pdn_cid, PdnState::Active)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::cause::EsmCause;
    use crate::config::EsmConfig;
    use crate::esm_proc::{DedicatedBearerRequest, PdnConnectivityRequest};
    use crate::message::{Delivery, EsmHeader, EsmMessageType};
    use crate::session::SubscriberId;
    use crate::types::{Bitrate, PdnType};

    fn session_with(config: EsmConfig, connections: u8) -> EsmSession {
        let mut session = EsmSession::new(SubscriberId::new("001010123456789"), Arc::new(config));
        for cid in 0..connections {
            let req = PdnConnectivityRequest::new(Pti(cid + 1), PdnCid(cid), "internet", PdnType::Ipv4);
            session.pdn_connectivity_request(req).unwrap();
            let ebi = session.default_eps_bearer_context(PdnCid(cid), 9).unwrap();
            session.default_eps_bearer_context_accept(ebi).unwrap();
        }
        session
    }

    fn disconnect_reject(pti: Pti, cause: EsmCause) -> EsmMessage {
        let header = EsmHeader::new(EsmMessageType::PdnDisconnectReject, pti, Ebi(0));
        EsmMessage::build(header, Some(cause), &[])
    }

    fn cause_of<T: std::fmt::Debug>(result: EsmResult<T>) -> Option<EsmCause> {
        result.err().and_then(|err| err.cause())
    }

    #[test]
    fn test_disconnect_single_connection() {
        let mut session = session_with(EsmConfig::default(), 1);
        assert_eq!(session.pdn_disconnect_request(Pti(9), None).unwrap(), PdnCid(0));
        let pdn = session.pdn(PdnCid(0)).unwrap();
        assert_eq!(pdn.state, PdnState::PendingDisconnect);
        assert_eq!(pdn.pti, Some(Pti(9)));
        session.verify().unwrap();

        assert_eq!(session.pdn_disconnect_accept(PdnCid(0)).unwrap(), vec![Ebi(5)]);
        assert!(session.snapshot().is_empty());
    }

    #[test]
    fn test_accept_releases_dedicated_first() {
        let mut session = session_with(EsmConfig::default(), 1);
        for _ in 0..2 {
            session
                .dedicated_eps_bearer_context(DedicatedBearerRequest {
                    pdn_cid: PdnCid(0),
                    default_ebi: Ebi(5),
                    qci: 1,
                    gbr: Bitrate::new(64, 64),
                    mbr: Bitrate::new(64, 64),
                    tft: Bytes::from_static(&[0x21]),
                    pco: Bytes::new(),
                })
                .unwrap();
        }
        session.pdn_disconnect_request(Pti(9), Some(Ebi(5))).unwrap();
        assert_eq!(
            session.pdn_disconnect_accept(PdnCid(0)).unwrap(),
            vec![Ebi(6), Ebi(7), Ebi(5)]
        );
        assert!(session.snapshot().is_empty());
    }

    #[test]
    fn test_disconnect_target_resolution() {
        let mut session = session_with(EsmConfig::default(), 0);
        assert_eq!(
            cause_of(session.pdn_disconnect_request(Pti(9), None)),
            Some(EsmCause::PdnConnectionDoesNotExist)
        );

        let mut session = session_with(EsmConfig::default(), 2);
        let before = session.snapshot();
        assert_eq!(
            cause_of(session.pdn_disconnect_request(Pti(9), None)),
            Some(EsmCause::InvalidMandatoryInformation)
        );
        assert_eq!(
            cause_of(session.pdn_disconnect_request(Pti(9), Some(Ebi(12)))),
            Some(EsmCause::InvalidEpsBearerIdentity)
        );
        assert_eq!(
            cause_of(session.pdn_disconnect_request(Pti(0), Some(Ebi(6)))),
            Some(EsmCause::InvalidPtiValue)
        );
        assert_eq!(session.snapshot(), before);

        assert_eq!(session.pdn_disconnect_request(Pti(9), Some(Ebi(6))).unwrap(), PdnCid(1));
        assert_eq!(
            cause_of(session.pdn_disconnect_request(Pti(9), Some(Ebi(5)))),
            Some(EsmCause::PtiAlreadyInUse)
        );
        assert_eq!(
            cause_of(session.pdn_disconnect_request(Pti(10), Some(Ebi(6)))),
            Some(EsmCause::MessageNotCompatible)
        );
    }

    #[test]
    fn test_last_connection_policy() {
        let mut config = EsmConfig::default();
        config.reject_last_pdn_disconnect = true;
        let mut session = session_with(config, 1);
        assert_eq!(
            cause_of(session.pdn_disconnect_request(Pti(9), None)),
            Some(EsmCause::LastPdnDisconnectionNotAllowed)
        );
    }

    #[test]
    fn test_reject_reverts_to_active() {
        let mut session = session_with(EsmConfig::default(), 1);
        let before = session.snapshot();
        session.pdn_disconnect_request(Pti(9), None).unwrap();

        let msg = session
            .pdn_disconnect_reject(
                true,
                Ebi(0),
                disconnect_reject(Pti(9), EsmCause::LastPdnDisconnectionNotAllowed),
                true,
            )
            .unwrap()
            .unwrap();
        assert_eq!(msg.delivery(), Delivery::Standalone);
        msg.discard();

        assert_eq!(session.snapshot(), before);
        assert!(session
            .pdn_disconnect_reject(true, Ebi(0), disconnect_reject(Pti(9), EsmCause::NetworkFailure), true)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_accept_requires_pending_disconnect() {
        let mut session = session_with(EsmConfig::default(), 1);
        assert!(matches!(
            session.pdn_disconnect_accept(PdnCid(0)),
            Err(EsmError::NotApplicable { .. })
        ));
        assert!(session.pdn_disconnect_accept(PdnCid(2)).unwrap_err().is_not_found());
    }
}
