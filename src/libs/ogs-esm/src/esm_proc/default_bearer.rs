//! Default EPS bearer context activation (TS 24.301 Section 6.4.1)

use crate::bearer::{BearerContext, BearerKind, BearerState};
use crate::cause::{EsmCause, Failure};
use crate::error::{EsmError, EsmResult, IdKind, Target};
use crate::message::EsmMessage;
use crate::pdn::PdnState;
use crate::procedure::{Procedure, ProcedureKey, ProcedureKind, Transmission};
use crate::session::EsmSession;
use crate::types::{qci, Ebi, PdnCid};

impl EsmSession {
    /// Create the default bearer of a pending connection.
    ///
    /// The connection becomes active and the bearer waits in
    /// `ActivePending` for the UE.
    pub fn default_eps_bearer_context(&mut self, pdn_cid: PdnCid, qci: u8) -> EsmResult<Ebi> {
        let pdn = self.pdns.find(pdn_cid)?;
        if pdn.state != PdnState::Pending || pdn.default_ebi.is_some() {
            return Err(EsmError::not_applicable(
                "default_eps_bearer_context",
                Target::Pdn(pdn_cid),
                format!("connection is {}", pdn.state),
            ));
        }
        if !qci::is_standardized(qci) {
            return Err(Failure::UnsupportedQci.into());
        }
        if qci::is_gbr(qci) {
            return Err(Failure::QosNotAccepted.into());
        }
        let pco = pdn.pco.clone();
        let ue_triggered = pdn
            .pti
            .and_then(|pti| self.procedures.find(ProcedureKey::Pti(pti)).ok())
            .map(|procedure| procedure.ue_triggered)
            .unwrap_or(false);

        let ebi = self.alloc.allocate_default_ebi(None).map_err(|err| match err {
            EsmError::Exhausted(IdKind::DefaultEbi) => Failure::DefaultEbiExhausted.into(),
            other => other,
        })?;
        self.bearers.insert(BearerContext {
            ebi,
            pdn_cid,
            kind: BearerKind::Default,
            qci,
            bid: 0,
            pco,
            state: BearerState::ActivePending,
        })?;

        let pdn = self.pdns.find_mut(pdn_cid)?;
        pdn.default_ebi = Some(ebi);
        pdn.default_qos.qci = qci;
        self.set_pdn_state(pdn_cid, PdnState::Active)?;
        self.procedures.insert(Procedure::new(
            ProcedureKind::DefaultBearerActivation,
            ProcedureKey::Ebi(ebi),
            pdn_cid,
            ue_triggered,
        ))?;

        log::info!(
            "[{}] Default bearer {} created for {} (QCI {})",
            self.subscriber(),
            ebi,
            pdn_cid,
            qci
        );
        Ok(ebi)
    }

    /// Send the activate default EPS bearer context request
    pub fn default_eps_bearer_context_request(
        &mut self,
        is_standalone: bool,
        ebi: Ebi,
        msg: EsmMessage,
        ue_triggered: bool,
    ) -> EsmResult<Transmission> {
        self.issue_request(
            "default_eps_bearer_context_request",
            ProcedureKind::DefaultBearerActivation,
            is_standalone,
            ebi,
            msg,
            ue_triggered,
        )
    }

    /// UE accepted the default bearer; PDN connectivity is complete
    pub fn default_eps_bearer_context_accept(&mut self, ebi: Ebi) -> EsmResult<PdnCid> {
        let key = ProcedureKey::Ebi(ebi);
        let pdn_cid = self
            .procedures
            .find_kind(key, ProcedureKind::DefaultBearerActivation)?
            .pdn_cid;

        self.set_bearer_state(ebi, BearerState::Active)?;
        self.procedures.remove(key)?;
        let connectivity = self.release_pdn_pti(pdn_cid)?;

        log::info!(
            "[{}] Default bearer {} active, PDN connectivity {} complete{}",
            self.subscriber(),
            ebi,
            pdn_cid,
            if connectivity.is_some() { "" } else { " (no procedure)" }
        );
        Ok(pdn_cid)
    }

    /// UE rejected the default bearer; the whole connection is rolled back
    pub fn default_eps_bearer_context_reject(
        &mut self,
        ebi: Ebi,
        cause: EsmCause,
    ) -> EsmResult<PdnCid> {
        let key = ProcedureKey::Ebi(ebi);
        let pdn_cid = self
            .procedures
            .find_kind(key, ProcedureKind::DefaultBearerActivation)?
            .pdn_cid;

        log::warn!(
            "[{}] Default bearer {} of {} rejected {}",
            self.subscriber(),
            ebi,
            pdn_cid,
            cause
        );
        self.remove_pdn(pdn_cid)?;
        Ok(pdn_cid)
    }

    /// Abort every pending default bearer activation locally.
    ///
    /// The connections go back to `Pending` and keep their PTI, ready for
    /// `pdn_connectivity_failure`.
    pub fn default_eps_bearer_context_failure(&mut self) -> EsmResult<Vec<PdnCid>> {
        let mut aborted = Vec::new();
        for key in self.procedures.of_kind(ProcedureKind::DefaultBearerActivation) {
            if let ProcedureKey::Ebi(ebi) = key {
                aborted.push(self.abort_default_activation(ebi)?);
            }
        }
        if !aborted.is_empty() {
            log::info!(
                "[{}] Default bearer activation aborted on {:?}",
                self.subscriber(),
                aborted
            );
        }
        Ok(aborted)
    }

    /// Remove a default bearer still being activated. Returns its connection.
    pub(crate) fn abort_default_activation(&mut self, ebi: Ebi) -> EsmResult<PdnCid> {
        let pdn_cid = self.bearers.find(ebi)?.pdn_cid;
        self.remove_bearer_cascade(ebi)?;
        self.pdns.find_mut(pdn_cid)?.default_ebi = None;
        self.set_pdn_state(pdn_cid, PdnState::Pending)?;
        Ok(pdn_cid)
    }
}
