//! Replay scenarios
//!
//! A scenario is a YAML list of steps. Each step names one ESM entry point,
//! its arguments and whether the engine is expected to accept it:
//!
//! ```yaml
//! steps:
//!   - event: pdn_connectivity_request
//!     pti: 1
//!     pdn_cid: 0
//!     apn: internet
//!   - event: default_bearer
//!     pdn_cid: 0
//!   - event: default_bearer_accept
//!     ebi: 5
//!   - event: default_bearer_accept
//!     ebi: 5
//!     expect: error
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::Deserialize;

use ogs_esm::prelude::*;

// ============================================================================
// Scenario document
// ============================================================================

/// Expected outcome of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expect {
    #[default]
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioPdnType {
    #[default]
    Ipv4,
    Ipv6,
    Ipv4v6,
}

impl From<ScenarioPdnType> for PdnType {
    fn from(value: ScenarioPdnType) -> Self {
        match value {
            ScenarioPdnType::Ipv4 => PdnType::Ipv4,
            ScenarioPdnType::Ipv6 => PdnType::Ipv6,
            ScenarioPdnType::Ipv4v6 => PdnType::Ipv4v6,
        }
    }
}

fn yes() -> bool {
    true
}

fn default_qci() -> u8 {
    9
}

fn regular_deactivation() -> u8 {
    EsmCause::RegularDeactivation.value()
}

/// Entry point invoked by a step
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Action {
    PdnConnectivityRequest {
        #[serde(default)]
        pti: u8,
        pdn_cid: u8,
        apn: Option<String>,
        #[serde(default)]
        pdn_type: ScenarioPdnType,
        #[serde(default)]
        emergency: bool,
        #[serde(default = "default_qci")]
        qci: u8,
    },
    PdnConnectivityReject {
        pti: u8,
        cause: u8,
        #[serde(default = "yes")]
        standalone: bool,
        #[serde(default = "yes")]
        ue_triggered: bool,
    },
    PdnConnectivityFailure {
        pdn_cid: u8,
    },
    PdnDisconnectRequest {
        pti: u8,
        linked_ebi: Option<u8>,
    },
    PdnDisconnectAccept {
        pdn_cid: u8,
    },
    PdnDisconnectReject {
        pti: u8,
        cause: u8,
        #[serde(default = "yes")]
        standalone: bool,
        #[serde(default = "yes")]
        ue_triggered: bool,
    },
    DefaultBearer {
        pdn_cid: u8,
        #[serde(default = "default_qci")]
        qci: u8,
    },
    DefaultBearerRequest {
        ebi: u8,
        #[serde(default)]
        pti: u8,
        #[serde(default = "yes")]
        standalone: bool,
        #[serde(default = "yes")]
        ue_triggered: bool,
    },
    DefaultBearerAccept {
        ebi: u8,
    },
    DefaultBearerReject {
        ebi: u8,
        cause: u8,
    },
    DefaultBearerFailure,
    DedicatedBearer {
        pdn_cid: u8,
        default_ebi: u8,
        qci: u8,
        /// [downlink, uplink] in kbps
        gbr: [u64; 2],
        mbr: [u64; 2],
        tft: Vec<u8>,
    },
    DedicatedBearerRequest {
        ebi: u8,
        #[serde(default = "yes")]
        standalone: bool,
    },
    DedicatedBearerAccept {
        ebi: u8,
    },
    DedicatedBearerReject {
        ebi: u8,
        cause: u8,
    },
    Deactivate {
        ebi: u8,
        #[serde(default)]
        local: bool,
    },
    DeactivateRequest {
        ebi: u8,
        #[serde(default = "regular_deactivation")]
        cause: u8,
        #[serde(default = "yes")]
        standalone: bool,
    },
    DeactivateAccept {
        ebi: u8,
    },
    StatusInd {
        #[serde(default)]
        pti: u8,
        #[serde(default)]
        ebi: u8,
        cause: u8,
    },
    Status {
        #[serde(default)]
        ebi: u8,
        cause: u8,
        #[serde(default = "yes")]
        standalone: bool,
        #[serde(default)]
        sent_by_ue: bool,
    },
    TimerExpired {
        ebi: u8,
    },
}

/// One scenario step
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default)]
    pub expect: Expect,
}

/// Scenario document
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Invalid scenario document")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }
}

// ============================================================================
// Step to event
// ============================================================================

fn cause(value: u8) -> Result<EsmCause> {
    EsmCause::try_from(value).with_context(|| format!("Unknown ESM cause {}", value))
}

fn message(message_type: EsmMessageType, pti: u8, ebi: u8, cause: Option<EsmCause>) -> EsmMessage {
    EsmMessage::build(EsmHeader::new(message_type, Pti(pti), Ebi(ebi)), cause, &[])
}

impl Action {
    /// Build the engine event for this step
    pub fn to_event(&self) -> Result<EsmEvent> {
        let event = match self {
            Action::PdnConnectivityRequest {
                pti,
                pdn_cid,
                apn,
                pdn_type,
                emergency,
                qci,
            } => {
                let mut req = if *emergency {
                    PdnConnectivityRequest::emergency(Pti(*pti), PdnCid(*pdn_cid), (*pdn_type).into())
                } else {
                    PdnConnectivityRequest::new(
                        Pti(*pti),
                        PdnCid(*pdn_cid),
                        apn.as_deref().unwrap_or_default(),
                        (*pdn_type).into(),
                    )
                };
                if *emergency {
                    req.apn = apn.clone();
                }
                req.default_qos = BearerQos::non_gbr(*qci);
                EsmEvent::PdnConnectivityRequest(req)
            }
            Action::PdnConnectivityReject {
                pti,
                cause: value,
                standalone,
                ue_triggered,
            } => EsmEvent::PdnConnectivityReject {
                is_standalone: *standalone,
                ebi: Ebi(0),
                message: message(EsmMessageType::PdnConnectivityReject, *pti, 0, Some(cause(*value)?)),
                ue_triggered: *ue_triggered,
            },
            Action::PdnConnectivityFailure { pdn_cid } => EsmEvent::PdnConnectivityFailure {
                pdn_cid: PdnCid(*pdn_cid),
            },
            Action::PdnDisconnectRequest { pti, linked_ebi } => EsmEvent::PdnDisconnectRequest {
                pti: Pti(*pti),
                linked_ebi: linked_ebi.map(Ebi),
            },
            Action::PdnDisconnectAccept { pdn_cid } => EsmEvent::PdnDisconnectAccept {
                pdn_cid: PdnCid(*pdn_cid),
            },
            Action::PdnDisconnectReject {
                pti,
                cause: value,
                standalone,
                ue_triggered,
            } => EsmEvent::PdnDisconnectReject {
                is_standalone: *standalone,
                ebi: Ebi(0),
                message: message(EsmMessageType::PdnDisconnectReject, *pti, 0, Some(cause(*value)?)),
                ue_triggered: *ue_triggered,
            },
            Action::DefaultBearer { pdn_cid, qci } => EsmEvent::DefaultBearer {
                pdn_cid: PdnCid(*pdn_cid),
                qci: *qci,
            },
            Action::DefaultBearerRequest {
                ebi,
                pti,
                standalone,
                ue_triggered,
            } => EsmEvent::DefaultBearerRequest {
                is_standalone: *standalone,
                ebi: Ebi(*ebi),
                message: message(
                    EsmMessageType::ActivateDefaultEpsBearerContextRequest,
                    *pti,
                    *ebi,
                    None,
                ),
                ue_triggered: *ue_triggered,
            },
            Action::DefaultBearerAccept { ebi } => EsmEvent::DefaultBearerAccept { ebi: Ebi(*ebi) },
            Action::DefaultBearerReject { ebi, cause: value } => EsmEvent::DefaultBearerReject {
                ebi: Ebi(*ebi),
                cause: cause(*value)?,
            },
            Action::DefaultBearerFailure => EsmEvent::DefaultBearerFailure,
            Action::DedicatedBearer {
                pdn_cid,
                default_ebi,
                qci,
                gbr,
                mbr,
                tft,
            } => EsmEvent::DedicatedBearer(DedicatedBearerRequest {
                pdn_cid: PdnCid(*pdn_cid),
                default_ebi: Ebi(*default_ebi),
                qci: *qci,
                gbr: Bitrate::new(gbr[0], gbr[1]),
                mbr: Bitrate::new(mbr[0], mbr[1]),
                tft: Bytes::from(tft.clone()),
                pco: Bytes::new(),
            }),
            Action::DedicatedBearerRequest { ebi, standalone } => EsmEvent::DedicatedBearerRequest {
                is_standalone: *standalone,
                ebi: Ebi(*ebi),
                message: message(
                    EsmMessageType::ActivateDedicatedEpsBearerContextRequest,
                    0,
                    *ebi,
                    None,
                ),
                ue_triggered: false,
            },
            Action::DedicatedBearerAccept { ebi } => {
                EsmEvent::DedicatedBearerAccept { ebi: Ebi(*ebi) }
            }
            Action::DedicatedBearerReject { ebi, cause: value } => EsmEvent::DedicatedBearerReject {
                ebi: Ebi(*ebi),
                cause: cause(*value)?,
            },
            Action::Deactivate { ebi, local } => EsmEvent::Deactivate {
                ebi: Ebi(*ebi),
                is_local: *local,
            },
            Action::DeactivateRequest {
                ebi,
                cause: value,
                standalone,
            } => EsmEvent::DeactivateRequest {
                is_standalone: *standalone,
                ebi: Ebi(*ebi),
                message: message(
                    EsmMessageType::DeactivateEpsBearerContextRequest,
                    0,
                    *ebi,
                    Some(cause(*value)?),
                ),
                ue_triggered: false,
            },
            Action::DeactivateAccept { ebi } => EsmEvent::DeactivateAccept { ebi: Ebi(*ebi) },
            Action::StatusInd {
                pti,
                ebi,
                cause: value,
            } => EsmEvent::StatusInd {
                pti: Pti(*pti),
                ebi: Ebi(*ebi),
                cause: cause(*value)?,
            },
            Action::Status {
                ebi,
                cause: value,
                standalone,
                sent_by_ue,
            } => EsmEvent::Status {
                is_standalone: *standalone,
                ebi: Ebi(*ebi),
                message: message(EsmMessageType::EsmStatus, 0, *ebi, Some(cause(*value)?)),
                sent_by_ue: *sent_by_ue,
            },
            Action::TimerExpired { ebi } => EsmEvent::TimerExpired { ebi: Ebi(*ebi) },
        };
        Ok(event)
    }
}

// ============================================================================
// Replay
// ============================================================================

/// Sink writing every outgoing message to the log
#[derive(Debug, Default)]
pub struct LogSink {
    pub sent: usize,
}

impl MessageSink for LogSink {
    fn send(&mut self, delivery: Delivery, header: &EsmHeader, payload: Bytes) -> EsmResult<()> {
        self.sent += 1;
        log::info!(
            "--> {:?} {} {} ({}, {} bytes)",
            header.message_type,
            header.pti,
            header.ebi,
            delivery,
            payload.len()
        );
        Ok(())
    }
}

/// Outcome of a replay
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    pub passed: usize,
    /// Indexes of the steps whose outcome did not match `expect`
    pub mismatched: Vec<usize>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.mismatched.is_empty()
    }
}

/// Dispatch every step of the scenario against one subscriber
pub fn replay<S: MessageSink>(
    context: &EsmContext,
    subscriber: &SubscriberId,
    scenario: &Scenario,
    sink: &mut S,
) -> Result<Report> {
    let mut report = Report::default();

    for (index, step) in scenario.steps.iter().enumerate() {
        let event = step
            .action
            .to_event()
            .with_context(|| format!("Step {} cannot be built", index))?;
        let name = event.name();

        match (context.dispatch(subscriber, event), step.expect) {
            (Ok(response), Expect::Ok) => {
                log::info!("[{}] step {} {}: {:?}", subscriber, index, name, response);
                if let Some(cause) = response.merged_cause() {
                    log::info!("[{}] step {} merged cause {}", subscriber, index, cause);
                }
                if let Some(message) = response.into_message() {
                    message
                        .transmit(sink)
                        .with_context(|| format!("Step {} transmit failed", index))?;
                }
                report.passed += 1;
            }
            (Err(err), Expect::Error) => {
                log::info!("[{}] step {} {}: failed as expected ({})", subscriber, index, name, err);
                report.passed += 1;
            }
            (Ok(response), Expect::Error) => {
                log::error!("[{}] step {} {}: expected an error, got {:?}", subscriber, index, name, response);
                if let Some(message) = response.into_message() {
                    message.discard();
                }
                report.mismatched.push(index);
            }
            (Err(err), Expect::Ok) => {
                log::error!("[{}] step {} {}: {}", subscriber, index, name, err);
                report.mismatched.push(index);
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATTACH: &str = r#"
steps:
  - event: pdn_connectivity_request
    pti: 1
    pdn_cid: 0
    apn: internet
  - event: default_bearer
    pdn_cid: 0
  - event: default_bearer_request
    ebi: 5
    pti: 1
  - event: default_bearer_accept
    ebi: 5
  - event: dedicated_bearer
    pdn_cid: 0
    default_ebi: 5
    qci: 1
    gbr: [64, 64]
    mbr: [128, 128]
    tft: [33, 16, 0]
  - event: dedicated_bearer_request
    ebi: 6
  - event: dedicated_bearer_accept
    ebi: 6
  - event: default_bearer_accept
    ebi: 5
    expect: error
"#;

    #[test]
    fn test_parse_steps() {
        let scenario = Scenario::from_yaml_str(ATTACH).unwrap();
        assert_eq!(scenario.steps.len(), 8);
        assert_eq!(
            scenario.steps[1].action,
            Action::DefaultBearer { pdn_cid: 0, qci: 9 }
        );
        assert_eq!(scenario.steps[7].expect, Expect::Error);
        assert_eq!(scenario.steps[0].expect, Expect::Ok);
    }

    #[test]
    fn test_unknown_cause_is_rejected() {
        let action = Action::DefaultBearerReject { ebi: 5, cause: 200 };
        assert!(action.to_event().is_err());
    }

    #[test]
    fn test_replay_attach() {
        let _ = env_logger::try_init();

        let context = EsmContext::new(EsmConfig::default()).unwrap();
        let subscriber = SubscriberId::new("001010123456789");
        context.session_add(&subscriber).unwrap();

        let scenario = Scenario::from_yaml_str(ATTACH).unwrap();
        let mut sink = LogSink::default();
        let report = replay(&context, &subscriber, &scenario, &mut sink).unwrap();
        assert!(report.is_success(), "mismatched steps {:?}", report.mismatched);
        assert_eq!(report.passed, 8);
        assert_eq!(sink.sent, 2);
    }

    #[test]
    fn test_shipped_scenario() {
        let config = EsmConfig::from_yaml_str(include_str!("../scenarios/esm.yaml")).unwrap();
        let context = EsmContext::new(config).unwrap();
        let subscriber = SubscriberId::new("001010000000002");
        context.session_add(&subscriber).unwrap();

        let scenario = Scenario::from_yaml_str(include_str!("../scenarios/attach.yaml")).unwrap();
        let mut sink = LogSink::default();
        let report = replay(&context, &subscriber, &scenario, &mut sink).unwrap();
        assert!(report.is_success(), "mismatched steps {:?}", report.mismatched);
        // default request, dedicated request and its retransmission, connectivity reject
        assert_eq!(sink.sent, 4);

        let session = context.session_find(&subscriber).unwrap();
        assert!(session.lock().unwrap().snapshot().is_empty());
    }

    #[test]
    fn test_replay_reports_mismatch() {
        let context = EsmContext::new(EsmConfig::default()).unwrap();
        let subscriber = SubscriberId::new("001010123456789");
        context.session_add(&subscriber).unwrap();

        let scenario = Scenario::from_yaml_str(
            "steps:\n  - event: deactivate_accept\n    ebi: 5\n",
        )
        .unwrap();
        let report = replay(&context, &subscriber, &scenario, &mut LogSink::default()).unwrap();
        assert_eq!(report.mismatched, vec![0]);
    }
}
