//! EPS bearer context deactivation (TS 24.301 Section 6.4.4)
//!
//! Deactivating a default bearer takes the whole PDN connection with it.
//! There is no reject: the UE cannot refuse a deactivation.

use crate::bearer::BearerState;
use crate::error::{EsmError, EsmResult, Target};
use crate::message::EsmMessage;
use crate::pdn::PdnState;
use crate::procedure::{Procedure, ProcedureKey, ProcedureKind, Transmission};
use crate::session::EsmSession;
use crate::types::{Ebi, PdnCid};

impl EsmSession {
    /// Start deactivating a bearer. Returns the owning connection and the
    /// bearer id within it.
    ///
    /// With `is_local` the bearer (or for a default bearer, the connection)
    /// is removed at once and nothing is sent to the UE.
    pub fn eps_bearer_context_deactivate(
        &mut self,
        ebi: Ebi,
        is_local: bool,
    ) -> EsmResult<(PdnCid, u8)> {
        let bearer = self.bearers.find(ebi)?;
        let (pdn_cid, bid, state) = (bearer.pdn_cid, bearer.bid, bearer.state);
        let is_default = bearer.is_default();

        if is_local {
            let released = if is_default {
                self.remove_pdn(pdn_cid)?
            } else {
                self.remove_bearer(ebi)?;
                vec![ebi]
            };
            log::info!(
                "[{}] {} deactivated locally, released {:?}",
                self.subscriber(),
                ebi,
                released
            );
            return Ok((pdn_cid, bid));
        }

        if state == BearerState::InactivePending {
            return Err(EsmError::not_applicable(
                "eps_bearer_context_deactivate",
                Target::Ebi(ebi),
                "deactivation already in progress",
            ));
        }

        if is_default {
            for dependent in self.bearers.dependents(ebi) {
                self.set_bearer_state(dependent, BearerState::InactivePending)?;
                if self.procedures.remove(ProcedureKey::Ebi(dependent)).is_ok() {
                    log::debug!("[{}] Activation of {} superseded", self.subscriber(), dependent);
                }
            }
            self.set_pdn_state(pdn_cid, PdnState::PendingDisconnect)?;
        }
        self.set_bearer_state(ebi, BearerState::InactivePending)?;

        let deactivation = Procedure::new(
            ProcedureKind::BearerDeactivation,
            ProcedureKey::Ebi(ebi),
            pdn_cid,
            false,
        );
        if let Some(previous) = self.procedures.replace(deactivation) {
            log::debug!("[{}] {} on {} superseded", self.subscriber(), previous.kind, ebi);
        }

        log::info!("[{}] Deactivating {} of {}", self.subscriber(), ebi, pdn_cid);
        Ok((pdn_cid, bid))
    }

    /// Send the deactivate EPS bearer context request
    pub fn eps_bearer_context_deactivate_request(
        &mut self,
        is_standalone: bool,
        ebi: Ebi,
        msg: EsmMessage,
        ue_triggered: bool,
    ) -> EsmResult<Transmission> {
        self.issue_request(
            "eps_bearer_context_deactivate_request",
            ProcedureKind::BearerDeactivation,
            is_standalone,
            ebi,
            msg,
            ue_triggered,
        )
    }

    /// UE accepted the deactivation
    pub fn eps_bearer_context_deactivate_accept(&mut self, ebi: Ebi) -> EsmResult<PdnCid> {
        self.procedures
            .find_kind(ProcedureKey::Ebi(ebi), ProcedureKind::BearerDeactivation)?;
        self.complete_deactivation(ebi)
    }

    /// Remove a bearer whose deactivation is over
    pub(crate) fn complete_deactivation(&mut self, ebi: Ebi) -> EsmResult<PdnCid> {
        let bearer = self.bearers.find(ebi)?;
        let pdn_cid = bearer.pdn_cid;
        if bearer.is_default() {
            let released = self.remove_pdn(pdn_cid)?;
            log::info!(
                "[{}] {} released with {:?}",
                self.subscriber(),
                pdn_cid,
                released
            );
        } else {
            self.remove_bearer(ebi)?;
            log::info!("[{}] {} of {} released", self.subscriber(), ebi, pdn_cid);
        }
        Ok(pdn_cid)
    }
}
