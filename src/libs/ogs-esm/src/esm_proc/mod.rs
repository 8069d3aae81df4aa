//! ESM procedures (TS 24.301 Section 6.4, 6.5, 6.7)
//!
//! Each submodule adds the entry points of one procedure family to
//! [`EsmSession`]. This module holds the plumbing they share: state
//! transitions, PTI binding, the request/retransmission path and the output
//! rules for rejects.

mod bearer_deactivation;
mod dedicated_bearer;
mod default_bearer;
mod pdn_connectivity;
mod pdn_disconnect;
mod status;

pub use dedicated_bearer::DedicatedBearerRequest;
pub use pdn_connectivity::PdnConnectivityRequest;

use crate::bearer::BearerState;
use crate::cause::Failure;
use crate::error::{EsmError, EsmResult, IdKind, Target};
use crate::message::{Delivery, EsmMessage};
use crate::pdn::PdnState;
use crate::procedure::{
    ProcedureKey, ProcedureKind, StoredRequest, TimerId, TimerOutcome, TimerRequest, Transmission,
};
use crate::session::EsmSession;
use crate::types::{Ebi, PdnCid, Pti};

impl EsmSession {
    // ========================================================================
    // State transitions
    // ========================================================================

    pub(crate) fn set_bearer_state(&mut self, ebi: Ebi, state: BearerState) -> EsmResult<()> {
        let bearer = self.bearers.find_mut(ebi)?;
        let old = std::mem::replace(&mut bearer.state, state);
        log::debug!("ESM FSM [{}] {}: {} -> {}", self.subscriber(), ebi, old, state);
        Ok(())
    }

    pub(crate) fn set_pdn_state(&mut self, cid: PdnCid, state: PdnState) -> EsmResult<()> {
        let pdn = self.pdns.find_mut(cid)?;
        let old = std::mem::replace(&mut pdn.state, state);
        log::debug!("ESM FSM [{}] {}: {} -> {}", self.subscriber(), cid, old, state);
        Ok(())
    }

    // ========================================================================
    // PTI binding
    // ========================================================================

    /// Check that a UE-chosen PTI can be bound, without binding it
    pub(crate) fn check_pti(&self, pti: Pti) -> EsmResult<()> {
        if !pti.is_assignable() {
            return Err(Failure::PtiInvalid.into());
        }
        if self.alloc.pti_in_use(pti) {
            return Err(Failure::PtiInUse.into());
        }
        Ok(())
    }

    /// Bind the PTI, allocating one when unassigned
    pub(crate) fn bind_pti(&mut self, pti: Pti) -> EsmResult<Pti> {
        if pti.is_unassigned() {
            return self.alloc.allocate_pti().map_err(|err| match err {
                EsmError::Exhausted(IdKind::Pti) => Failure::PtiExhausted.into(),
                other => other,
            });
        }
        self.check_pti(pti)?;
        self.alloc.reserve_pti(pti)?;
        Ok(pti)
    }

    // ========================================================================
    // Network requests and retransmission
    // ========================================================================

    /// Send or resend the network request of a bearer procedure.
    ///
    /// The first call stores the payload; each further call on the same EBI
    /// counts as a retransmission. Past the configured maximum the procedure
    /// is abandoned locally and `Rejected(#38)` is returned.
    pub(crate) fn issue_request(
        &mut self,
        operation: &'static str,
        kind: ProcedureKind,
        is_standalone: bool,
        ebi: Ebi,
        mut msg: EsmMessage,
        ue_triggered: bool,
    ) -> EsmResult<Transmission> {
        let key = ProcedureKey::Ebi(ebi);
        if let Err(err) = self.procedures.find_kind(key, kind) {
            msg.discard();
            return Err(err);
        }
        if kind.request_type() != Some(msg.message_type()) || msg.ebi() != ebi {
            let reason = format!("{:?} for {}", msg.message_type(), msg.ebi());
            msg.discard();
            return Err(EsmError::not_applicable(operation, Target::Ebi(ebi), reason));
        }

        let (timer_id, timer_conf) = match kind.timer() {
            Some(TimerId::T3495) => (TimerId::T3495, self.config.t3495),
            _ => (TimerId::T3485, self.config.t3485),
        };

        let procedure = self.procedures.find_mut(key)?;
        if procedure.is_requested() {
            procedure.retry_count += 1;
        }
        let attempt = procedure.retry_count + 1;

        if procedure.retry_count > timer_conf.max_retries {
            msg.discard();
            log::warn!(
                "[{}] {} on {} abandoned after {} retransmissions",
                self.subscriber(),
                kind,
                ebi,
                timer_conf.max_retries
            );
            self.abandon(kind, ebi)?;
            return Err(Failure::NoResponse.into());
        }

        procedure.standalone = is_standalone;
        procedure.ue_triggered = ue_triggered;
        procedure.stored = Some(StoredRequest {
            header: *msg.header(),
            payload: msg.payload(),
        });

        let timer = if is_standalone {
            msg.set_delivery(Delivery::Standalone);
            Some(TimerRequest {
                id: timer_id,
                ebi,
                duration: timer_conf.duration(),
                attempt,
            })
        } else {
            msg.set_delivery(Delivery::Piggybacked);
            None
        };

        log::debug!(
            "[{}] {} request on {} ({}, attempt {})",
            self.subscriber(),
            kind,
            ebi,
            msg.delivery(),
            attempt
        );
        Ok(Transmission {
            message: msg,
            timer,
        })
    }

    /// Local failure path of a bearer procedure left without response
    fn abandon(&mut self, kind: ProcedureKind, ebi: Ebi) -> EsmResult<()> {
        match kind {
            ProcedureKind::DefaultBearerActivation => {
                let cid = self.abort_default_activation(ebi)?;
                self.remove_pdn(cid)?;
            }
            ProcedureKind::DedicatedBearerActivation => {
                self.remove_bearer(ebi)?;
            }
            ProcedureKind::BearerDeactivation => {
                self.complete_deactivation(ebi)?;
            }
            _ => {
                return Err(EsmError::InternalDefect(format!(
                    "{} has no network request",
                    kind
                )))
            }
        }
        Ok(())
    }

    /// Retransmission timer of a bearer procedure expired
    pub fn timer_expired(&mut self, ebi: Ebi) -> EsmResult<TimerOutcome> {
        let procedure = self.procedures.find(ProcedureKey::Ebi(ebi))?;
        let kind = procedure.kind;
        let timer = kind.timer().ok_or_else(|| {
            EsmError::not_applicable("timer_expired", Target::Ebi(ebi), "no retransmission timer")
        })?;
        let (standalone, ue_triggered) = (procedure.standalone, procedure.ue_triggered);
        let msg = procedure
            .stored
            .as_ref()
            .map(StoredRequest::to_message)
            .ok_or_else(|| {
                EsmError::not_applicable("timer_expired", Target::Ebi(ebi), "no request sent")
            })?;

        log::info!("[{}] {} expired for {} on {}", self.subscriber(), timer, kind, ebi);
        match self.issue_request("timer_expired", kind, standalone, ebi, msg, ue_triggered) {
            Ok(transmission) => Ok(TimerOutcome::Retransmit(transmission)),
            Err(EsmError::Rejected(cause)) => Ok(TimerOutcome::Aborted { cause }),
            Err(err) => Err(err),
        }
    }

    // ========================================================================
    // Reject output
    // ========================================================================

    /// Start a new merge window when no PTI procedure is in flight.
    ///
    /// A cause merged during an earlier exchange is dropped here, so it can
    /// never end up in the response of an unrelated procedure.
    pub(crate) fn open_merge_window(&mut self) {
        let in_flight = self
            .procedures
            .iter()
            .any(|procedure| matches!(procedure.key, ProcedureKey::Pti(_)));
        if in_flight {
            return;
        }
        if let Some(stale) = self.merged.take() {
            log::debug!("[{}] Stale merged cause {} dropped", self.subscriber(), stale);
        }
    }

    /// Decide what happens to a reject built for the UE.
    ///
    /// Non-standalone rejects fold their cause into the merged-cause slot;
    /// network-triggered ones never reach the peer.
    pub(crate) fn settle_reject(
        &mut self,
        kind: ProcedureKind,
        is_standalone: bool,
        mut msg: EsmMessage,
        ue_triggered: bool,
    ) -> Option<EsmMessage> {
        let cause = msg.cause().unwrap_or_default();
        if !is_standalone {
            self.merged.merge(cause);
            log::debug!("[{}] {} reject {} merged", self.subscriber(), kind, cause);
            msg.discard();
            None
        } else if !ue_triggered {
            log::debug!("[{}] {} reject {} kept local", self.subscriber(), kind, cause);
            msg.discard();
            None
        } else {
            msg.set_delivery(Delivery::Standalone);
            Some(msg)
        }
    }
}
