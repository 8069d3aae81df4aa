//! NextGCore ESM Procedure Library
//!
//! This crate implements the network side of EPS Session Management as
//! specified in 3GPP TS 24.301: PDN connectivity and disconnect, default and
//! dedicated EPS bearer context activation, bearer deactivation and ESM status.
//!
//! # Features
//!
//! - Per-subscriber session with PTI/EBI allocation, PDN and bearer tables
//! - Procedure state machines driven by explicit entry points or [`EsmEvent`]s
//! - ESM cause resolution with the TS 24.301 cause values
//! - Owned outgoing messages with standalone or piggybacked delivery
//! - T3485/T3495 retransmission contract for an external timer service
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ogs_esm::prelude::*;
//!
//! let config = Arc::new(EsmConfig::default());
//! let mut session = EsmSession::new(SubscriberId::new("001010123456789"), config);
//!
//! let req = PdnConnectivityRequest::new(Pti(1), PdnCid(0), "internet", PdnType::Ipv4);
//! session.pdn_connectivity_request(req).unwrap();
//! let ebi = session.default_eps_bearer_context(PdnCid(0), 9).unwrap();
//! session.default_eps_bearer_context_accept(ebi).unwrap();
//!
//! assert_eq!(ebi, Ebi(5));
//! assert_eq!(session.pdn(PdnCid(0)).unwrap().state, PdnState::Active);
//! ```

pub mod allocator;
pub mod bearer;
pub mod cause;
pub mod config;
pub mod error;
pub mod esm_proc;
pub mod message;
pub mod pdn;
pub mod procedure;
pub mod session;
pub mod sm;
pub mod types;


pub use cause::{resolve, EsmCause, Failure};
pub use config::{ConfigError, EsmConfig};
pub use error::{EsmError, EsmResult};
pub use session::{EsmContext, EsmSession, SubscriberId};
pub use sm::{EsmEvent, EsmResponse};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bearer::{BearerContext, BearerKind, BearerState};
    pub use crate::cause::{EsmCause, Failure};
    pub use crate::config::{EbiRange, EsmConfig, TimerConf};
    pub use crate::error::{EsmError, EsmResult, IdKind, Target};
    pub use crate::esm_proc::{DedicatedBearerRequest, PdnConnectivityRequest};
    pub use crate::message::{
        Delivery, EsmHeader, EsmMessage, EsmMessageType, MessageSink,
    };
    pub use crate::pdn::{PdnConnection, PdnState};
    pub use crate::procedure::{
        ProcedureKey, ProcedureKind, TimerId, TimerOutcome, TimerRequest, Transmission,
    };
    pub use crate::session::{EsmContext, EsmSession, MobilityContext, SubscriberId};
    pub use crate::sm::{EsmEvent, EsmResponse};
    pub use crate::types::{
        Bitrate, BearerQos, Ebi, PdnAddress, PdnCid, PdnType, Pti, RequestType,
    };
}
