//! Dedicated EPS bearer context activation (TS 24.301 Section 6.4.2)

use crate::bearer::{BearerContext, BearerKind, BearerState};
use crate::cause::{EsmCause, Failure};
use crate::error::{EsmError, EsmResult, IdKind};
use crate::message::EsmMessage;
use crate::pdn::PdnState;
use crate::procedure::{Procedure, ProcedureKey, ProcedureKind, Transmission};
use crate::session::EsmSession;
use crate::types::{qci, Bitrate, Ebi, Pco, PdnCid, Tft};

/// Network request for a dedicated bearer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedicatedBearerRequest {
    pub pdn_cid: PdnCid,
    /// Default bearer of the connection
    pub default_ebi: Ebi,
    pub qci: u8,
    pub gbr: Bitrate,
    pub mbr: Bitrate,
    pub tft: Tft,
    pub pco: Pco,
}

impl EsmSession {
    /// Create a dedicated bearer under an existing default bearer.
    ///
    /// All checks run before the EBI is allocated; a rejected request leaves
    /// no trace in the tables.
    pub fn dedicated_eps_bearer_context(&mut self, req: DedicatedBearerRequest) -> EsmResult<Ebi> {
        if let Err(err) = self.admit_dedicated(&req) {
            log::warn!(
                "[{}] Dedicated bearer on {} {} rejected: {}",
                self.subscriber(),
                req.pdn_cid,
                req.default_ebi,
                err
            );
            return Err(err);
        }

        let ebi = self.alloc.allocate_ebi(None).map_err(|err| match err {
            EsmError::Exhausted(IdKind::Ebi) => Failure::EbiExhausted.into(),
            other => other,
        })?;
        let bid = self.bearers.free_bid(req.pdn_cid);
        self.bearers.insert(BearerContext {
            ebi,
            pdn_cid: req.pdn_cid,
            kind: BearerKind::Dedicated {
                default_ebi: req.default_ebi,
                gbr: req.gbr,
                mbr: req.mbr,
                tft: req.tft,
            },
            qci: req.qci,
            bid,
            pco: req.pco,
            state: BearerState::ActivePending,
        })?;
        self.procedures.insert(Procedure::new(
            ProcedureKind::DedicatedBearerActivation,
            ProcedureKey::Ebi(ebi),
            req.pdn_cid,
            false,
        ))?;

        log::info!(
            "[{}] Dedicated bearer {} created on {} (QCI {}, bearer id {})",
            self.subscriber(),
            ebi,
            req.default_ebi,
            req.qci,
            bid
        );
        Ok(ebi)
    }

    fn admit_dedicated(&self, req: &DedicatedBearerRequest) -> EsmResult<()> {
        if !req.gbr.within(&req.mbr) {
            return Err(Failure::QosNotAccepted.into());
        }
        if !qci::is_standardized(req.qci) {
            return Err(Failure::UnsupportedQci.into());
        }
        if req.tft.is_empty() {
            return Err(Failure::TftMissing.into());
        }
        let pdn = self
            .pdns
            .find(req.pdn_cid)
            .map_err(|_| EsmError::from(Failure::NoPdnConnection))?;
        if pdn.default_ebi != Some(req.default_ebi) || pdn.state == PdnState::PendingDisconnect {
            return Err(Failure::DefaultBearerInvalid.into());
        }
        let default = self.bearers.find(req.default_ebi)?;
        if default.state == BearerState::InactivePending {
            return Err(Failure::DefaultBearerInvalid.into());
        }
        Ok(())
    }

    /// Send the activate dedicated EPS bearer context request
    pub fn dedicated_eps_bearer_context_request(
        &mut self,
        is_standalone: bool,
        ebi: Ebi,
        msg: EsmMessage,
        ue_triggered: bool,
    ) -> EsmResult<Transmission> {
        self.issue_request(
            "dedicated_eps_bearer_context_request",
            ProcedureKind::DedicatedBearerActivation,
            is_standalone,
            ebi,
            msg,
            ue_triggered,
        )
    }

    /// UE accepted the dedicated bearer
    pub fn dedicated_eps_bearer_context_accept(&mut self, ebi: Ebi) -> EsmResult<PdnCid> {
        let key = ProcedureKey::Ebi(ebi);
        let pdn_cid = self
            .procedures
            .find_kind(key, ProcedureKind::DedicatedBearerActivation)?
            .pdn_cid;
        self.set_bearer_state(ebi, BearerState::Active)?;
        self.procedures.remove(key)?;
        log::info!("[{}] Dedicated bearer {} active on {}", self.subscriber(), ebi, pdn_cid);
        Ok(pdn_cid)
    }

    /// UE rejected the dedicated bearer; only that bearer is released
    pub fn dedicated_eps_bearer_context_reject(
        &mut self,
        ebi: Ebi,
        cause: EsmCause,
    ) -> EsmResult<PdnCid> {
        let pdn_cid = self
            .procedures
            .find_kind(ProcedureKey::Ebi(ebi), ProcedureKind::DedicatedBearerActivation)?
            .pdn_cid;
        log::warn!(
            "[{}] Dedicated bearer {} of {} rejected {}",
            self.subscriber(),
            ebi,
            pdn_cid,
            cause
        );
        self.remove_bearer(ebi)?;
        Ok(pdn_cid)
    }
}
