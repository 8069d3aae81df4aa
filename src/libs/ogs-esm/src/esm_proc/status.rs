//! ESM status procedure (TS 24.301 Section 6.7)
//!
//! A received status never retries or escalates; at most it aborts the
//! procedures running on the identifiers it names.

use crate::cause::EsmCause;
use crate::error::{EsmError, EsmResult, Target};
use crate::message::{Delivery, EsmMessage, EsmMessageType};
use crate::procedure::{ProcedureKey, ProcedureKind};
use crate::session::EsmSession;
use crate::types::{Ebi, Pti};

impl EsmSession {
    /// ESM STATUS received from the UE
    pub fn status_ind(&mut self, pti: Pti, ebi: Ebi, cause: EsmCause) -> EsmResult<()> {
        log::info!(
            "[{}] ESM status {} for {} {}",
            self.subscriber(),
            cause,
            pti,
            ebi
        );

        match cause {
            EsmCause::InvalidEpsBearerIdentity => {
                if self.bearers.contains(ebi) {
                    self.eps_bearer_context_deactivate(ebi, true)?;
                }
            }
            EsmCause::InvalidPtiValue => {
                self.abort_on_pti(pti)?;
            }
            EsmCause::MessageTypeNonExistent => {
                self.abort_on_pti(pti)?;
                self.abort_on_ebi(ebi)?;
            }
            _ => {
                log::debug!("[{}] ESM status {} ignored", self.subscriber(), cause);
            }
        }
        Ok(())
    }

    /// Abort the procedure bound to a PTI. Returns false when there is none.
    fn abort_on_pti(&mut self, pti: Pti) -> EsmResult<bool> {
        if pti.is_unassigned() {
            return Ok(false);
        }
        let Ok(procedure) = self.procedures.find(ProcedureKey::Pti(pti)) else {
            return Ok(false);
        };
        let (kind, pdn_cid) = (procedure.kind, procedure.pdn_cid);

        match kind {
            ProcedureKind::PdnConnectivity => {
                self.remove_pdn(pdn_cid)?;
            }
            ProcedureKind::PdnDisconnect => {
                self.revert_disconnect(pdn_cid)?;
            }
            _ => {
                self.procedures.remove(ProcedureKey::Pti(pti))?;
            }
        }
        log::warn!("[{}] {} on {} aborted by ESM status", self.subscriber(), kind, pti);
        Ok(true)
    }

    /// Abort the procedure bound to an EBI. Returns false when there is none.
    fn abort_on_ebi(&mut self, ebi: Ebi) -> EsmResult<bool> {
        let Ok(procedure) = self.procedures.find(ProcedureKey::Ebi(ebi)) else {
            return Ok(false);
        };
        let kind = procedure.kind;

        match kind {
            ProcedureKind::DefaultBearerActivation => {
                let pdn_cid = self.abort_default_activation(ebi)?;
                self.remove_pdn(pdn_cid)?;
            }
            ProcedureKind::DedicatedBearerActivation => {
                self.remove_bearer(ebi)?;
            }
            ProcedureKind::BearerDeactivation => {
                self.complete_deactivation(ebi)?;
            }
            _ => {
                self.procedures.remove(ProcedureKey::Ebi(ebi))?;
            }
        }
        log::warn!("[{}] {} on {} aborted by ESM status", self.subscriber(), kind, ebi);
        Ok(true)
    }

    /// Send an ESM STATUS, or record one the UE sent.
    ///
    /// A UE-originated status is consumed here and `None` is returned.
    pub fn status(
        &mut self,
        is_standalone: bool,
        ebi: Ebi,
        mut msg: EsmMessage,
        sent_by_ue: bool,
    ) -> EsmResult<Option<EsmMessage>> {
        if msg.message_type() != EsmMessageType::EsmStatus {
            let reason = format!("{:?}", msg.message_type());
            msg.discard();
            return Err(EsmError::not_applicable("status", Target::Ebi(ebi), reason));
        }

        let cause = msg.cause().unwrap_or_default();
        if sent_by_ue {
            log::debug!(
                "[{}] {} {} from UE on {}",
                self.subscriber(),
                ProcedureKind::Status,
                cause,
                ebi
            );
            msg.discard();
            return Ok(None);
        }

        let delivery = if is_standalone {
            Delivery::Standalone
        } else {
            Delivery::Piggybacked
        };
        msg.set_delivery(delivery);
        log::debug!(
            "[{}] {} {} to UE on {} ({})",
            self.subscriber(),
            ProcedureKind::Status,
            cause,
            ebi,
            delivery
        );
        Ok(Some(msg))
    }
}
