//! ESM Cause Handling
//!
//! ESM cause values of TS 24.301 Section 9.9.4.4, the mapping from internal
//! failure conditions to those causes, and the merge policy applied when a
//! reject is folded into another procedure's response.

use std::fmt;

use crate::error::EsmError;

// ============================================================================
// ESM Cause Codes (3GPP TS 24.301)
// ============================================================================

/// ESM Cause codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EsmCause {
    /// Operator determined barring
    OperatorDeterminedBarring = 8,
    /// Insufficient resources
    InsufficientResources = 26,
    /// Missing or unknown APN
    MissingOrUnknownApn = 27,
    /// Unknown PDN type
    UnknownPdnType = 28,
    /// User authentication failed
    UserAuthenticationFailed = 29,
    /// Request rejected by Serving GW or PDN GW
    RequestRejectedByGw = 30,
    /// Request rejected, unspecified
    RequestRejectedUnspecified = 31,
    /// Service option not supported
    ServiceOptionNotSupported = 32,
    /// Requested service option not subscribed
    RequestedServiceOptionNotSubscribed = 33,
    /// Service option temporarily out of order
    ServiceOptionTemporarilyOutOfOrder = 34,
    /// PTI already in use
    PtiAlreadyInUse = 35,
    /// Regular deactivation
    RegularDeactivation = 36,
    /// EPS QoS not accepted
    EpsQosNotAccepted = 37,
    /// Network failure
    NetworkFailure = 38,
    /// Reactivation requested
    ReactivationRequested = 39,
    /// Semantic error in the TFT operation
    SemanticErrorInTftOperation = 41,
    /// Syntactical error in the TFT operation
    SyntacticalErrorInTftOperation = 42,
    /// Invalid EPS bearer identity
    InvalidEpsBearerIdentity = 43,
    /// Semantic errors in packet filter(s)
    SemanticErrorsInPacketFilters = 44,
    /// Syntactical errors in packet filter(s)
    SyntacticalErrorsInPacketFilters = 45,
    /// EPS bearer context without TFT already activated
    EpsBearerContextWithoutTftAlreadyActivated = 46,
    /// PTI mismatch
    PtiMismatch = 47,
    /// Last PDN disconnection not allowed
    LastPdnDisconnectionNotAllowed = 49,
    /// PDN type IPv4 only allowed
    PdnTypeIpv4OnlyAllowed = 50,
    /// PDN type IPv6 only allowed
    PdnTypeIpv6OnlyAllowed = 51,
    /// Single address bearers only allowed
    SingleAddressBearersOnlyAllowed = 52,
    /// ESM information not received
    EsmInformationNotReceived = 53,
    /// PDN connection does not exist
    PdnConnectionDoesNotExist = 54,
    /// Multiple PDN connections for a given APN not allowed
    MultiplePdnConnectionsNotAllowed = 55,
    /// Collision with network initiated request
    CollisionWithNetworkInitiatedRequest = 56,
    /// Unsupported QCI value
    UnsupportedQciValue = 59,
    /// Bearer handling not supported
    BearerHandlingNotSupported = 60,
    /// Maximum number of EPS bearers reached
    MaximumNumberOfEpsBearersReached = 65,
    /// Requested APN not supported in current RAT and PLMN combination
    RequestedApnNotSupportedInCurrentRatAndPlmn = 66,
    /// Invalid PTI value
    InvalidPtiValue = 81,
    /// Semantically incorrect message
    SemanticallyIncorrectMessage = 95,
    /// Invalid mandatory information
    InvalidMandatoryInformation = 96,
    /// Message type non-existent or not implemented
    MessageTypeNonExistent = 97,
    /// Message type not compatible with protocol state
    MessageTypeNotCompatible = 98,
    /// Information element non-existent or not implemented
    InformationElementNonExistent = 99,
    /// Conditional IE error
    ConditionalIeError = 100,
    /// Message not compatible with protocol state
    MessageNotCompatible = 101,
    /// Protocol error, unspecified
    ProtocolErrorUnspecified = 111,
    /// APN restriction value incompatible with active EPS bearer context
    ApnRestrictionValueIncompatible = 112,
    /// Multiple accesses to a PDN connection not allowed
    MultipleAccessesToPdnConnectionNotAllowed = 113,
}

impl Default for EsmCause {
    fn default() -> Self {
        EsmCause::ProtocolErrorUnspecified
    }
}

impl EsmCause {
    /// Wire value
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for EsmCause {
    type Error = EsmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let cause = match value {
            8 => EsmCause::OperatorDeterminedBarring,
            26 => EsmCause::InsufficientResources,
            27 => EsmCause::MissingOrUnknownApn,
            28 => EsmCause::UnknownPdnType,
            29 => EsmCause::UserAuthenticationFailed,
            30 => EsmCause::RequestRejectedByGw,
            31 => EsmCause::RequestRejectedUnspecified,
            32 => EsmCause::ServiceOptionNotSupported,
            33 => EsmCause::RequestedServiceOptionNotSubscribed,
            34 => EsmCause::ServiceOptionTemporarilyOutOfOrder,
            35 => EsmCause::PtiAlreadyInUse,
            36 => EsmCause::RegularDeactivation,
            37 => EsmCause::EpsQosNotAccepted,
            38 => EsmCause::NetworkFailure,
            39 => EsmCause::ReactivationRequested,
            41 => EsmCause::SemanticErrorInTftOperation,
            42 => EsmCause::SyntacticalErrorInTftOperation,
            43 => EsmCause::InvalidEpsBearerIdentity,
            44 => EsmCause::SemanticErrorsInPacketFilters,
            45 => EsmCause::SyntacticalErrorsInPacketFilters,
            46 => EsmCause::EpsBearerContextWithoutTftAlreadyActivated,
            47 => EsmCause::PtiMismatch,
            49 => EsmCause::LastPdnDisconnectionNotAllowed,
            50 => EsmCause::PdnTypeIpv4OnlyAllowed,
            51 => EsmCause::PdnTypeIpv6OnlyAllowed,
            52 => EsmCause::SingleAddressBearersOnlyAllowed,
            53 => EsmCause::EsmInformationNotReceived,
            54 => EsmCause::PdnConnectionDoesNotExist,
            55 => EsmCause::MultiplePdnConnectionsNotAllowed,
            56 => EsmCause::CollisionWithNetworkInitiatedRequest,
            59 => EsmCause::UnsupportedQciValue,
            60 => EsmCause::BearerHandlingNotSupported,
            65 => EsmCause::MaximumNumberOfEpsBearersReached,
            66 => EsmCause::RequestedApnNotSupportedInCurrentRatAndPlmn,
            81 => EsmCause::InvalidPtiValue,
            95 => EsmCause::SemanticallyIncorrectMessage,
            96 => EsmCause::InvalidMandatoryInformation,
            97 => EsmCause::MessageTypeNonExistent,
            98 => EsmCause::MessageTypeNotCompatible,
            99 => EsmCause::InformationElementNonExistent,
            100 => EsmCause::ConditionalIeError,
            101 => EsmCause::MessageNotCompatible,
            111 => EsmCause::ProtocolErrorUnspecified,
            112 => EsmCause::ApnRestrictionValueIncompatible,
            113 => EsmCause::MultipleAccessesToPdnConnectionNotAllowed,
            _ => return Err(EsmError::Rejected(EsmCause::ProtocolErrorUnspecified)),
        };
        Ok(cause)
    }
}

impl fmt::Display for EsmCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({:?})", self.value(), self)
    }
}

// ============================================================================
// Cause Resolver
// ============================================================================

/// Internal failure conditions detected by the procedures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// UE-chosen PTI is bound to another procedure
    PtiInUse,
    /// No PTI left for a network-triggered procedure
    PtiExhausted,
    /// PTI outside the assignable range
    PtiInvalid,
    /// No EPS bearer identity left
    EbiExhausted,
    /// No EPS bearer identity left in the default-bearer range
    DefaultEbiExhausted,
    /// Connection id already owned or out of range
    PdnCidUnavailable,
    /// Maximum number of PDN connections reached
    TooManyPdnConnections,
    /// APN absent on a non-emergency request
    MissingApn,
    /// APN not served by this network
    UnknownApn,
    /// APN or another parameter is syntactically invalid
    MalformedParameter,
    /// A second emergency PDN connection was requested
    MultipleEmergencyConnections,
    /// Bitrates or QCI class not acceptable
    QosNotAccepted,
    /// QCI is not a standardized value
    UnsupportedQci,
    /// TFT missing on a dedicated bearer
    TftMissing,
    /// Referenced PDN connection does not exist
    NoPdnConnection,
    /// Several connections match and none was named
    AmbiguousPdnConnection,
    /// Referenced default bearer is unknown or not usable
    DefaultBearerInvalid,
    /// Another procedure is in flight for the connection
    ProcedureInFlight,
    /// Last PDN connection must not be released
    LastPdnConnection,
    /// Retransmissions exhausted without a response
    NoResponse,
}

/// Map an internal failure condition to its ESM cause
pub fn resolve(failure: Failure) -> EsmCause {
    match failure {
        Failure::PtiInUse => EsmCause::PtiAlreadyInUse,
        Failure::PtiExhausted => EsmCause::InsufficientResources,
        Failure::PtiInvalid => EsmCause::InvalidPtiValue,
        Failure::EbiExhausted => EsmCause::MaximumNumberOfEpsBearersReached,
        Failure::DefaultEbiExhausted => EsmCause::InsufficientResources,
        Failure::PdnCidUnavailable => EsmCause::InsufficientResources,
        Failure::TooManyPdnConnections => EsmCause::InsufficientResources,
        Failure::MissingApn => EsmCause::MissingOrUnknownApn,
        Failure::UnknownApn => EsmCause::MissingOrUnknownApn,
        Failure::MalformedParameter => EsmCause::InvalidMandatoryInformation,
        Failure::MultipleEmergencyConnections => EsmCause::MultiplePdnConnectionsNotAllowed,
        Failure::QosNotAccepted => EsmCause::EpsQosNotAccepted,
        Failure::UnsupportedQci => EsmCause::UnsupportedQciValue,
        Failure::TftMissing => EsmCause::SemanticErrorInTftOperation,
        Failure::NoPdnConnection => EsmCause::PdnConnectionDoesNotExist,
        Failure::AmbiguousPdnConnection => EsmCause::InvalidMandatoryInformation,
        Failure::DefaultBearerInvalid => EsmCause::InvalidEpsBearerIdentity,
        Failure::ProcedureInFlight => EsmCause::MessageNotCompatible,
        Failure::LastPdnConnection => EsmCause::LastPdnDisconnectionNotAllowed,
        Failure::NoResponse => EsmCause::NetworkFailure,
    }
}

impl From<Failure> for EsmError {
    fn from(failure: Failure) -> Self {
        EsmError::Rejected(resolve(failure))
    }
}

// ============================================================================
// Cause merge policy
// ============================================================================

/// Causes of non-standalone rejects folded into an enclosing procedure.
///
/// The first cause recorded wins; later causes are kept only for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CauseMerge {
    first: Option<EsmCause>,
    dropped: u32,
}

impl CauseMerge {
    /// Record a cause. Returns true if it became the merged cause.
    pub fn merge(&mut self, cause: EsmCause) -> bool {
        match self.first {
            None => {
                self.first = Some(cause);
                true
            }
            Some(first) => {
                self.dropped += 1;
                log::debug!("ESM cause {} superseded by earlier cause {}", cause, first);
                false
            }
        }
    }

    /// Merged cause, if any
    pub fn cause(&self) -> Option<EsmCause> {
        self.first
    }

    /// Take the merged cause and reset
    pub fn take(&mut self) -> Option<EsmCause> {
        self.dropped = 0;
        self.first.take()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
