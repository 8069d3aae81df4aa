//! Outgoing ESM messages
//!
//! An [`EsmMessage`] owns the encoded payload handed over by the message
//! encoder. It is consumed exactly once, by [`EsmMessage::transmit`] or
//! [`EsmMessage::discard`]; it cannot be cloned, and dropping one that was
//! never consumed is logged.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::cause::EsmCause;
use crate::error::{EsmError, EsmResult};
use crate::types::{Ebi, Pti};

/// NAS protocol discriminator for ESM messages
pub const NAS_PROTOCOL_DISCRIMINATOR_ESM: u8 = 0x02;

/// Length of the ESM message header
pub const ESM_HEADER_LEN: usize = 3;

// ============================================================================
// ESM Message Types (3GPP TS 24.301)
// ============================================================================

/// ESM Message Types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EsmMessageType {
    /// Activate default EPS bearer context request
    ActivateDefaultEpsBearerContextRequest = 0xc1,
    /// Activate default EPS bearer context accept
    ActivateDefaultEpsBearerContextAccept = 0xc2,
    /// Activate default EPS bearer context reject
    ActivateDefaultEpsBearerContextReject = 0xc3,
    /// Activate dedicated EPS bearer context request
    ActivateDedicatedEpsBearerContextRequest = 0xc5,
    /// Activate dedicated EPS bearer context accept
    ActivateDedicatedEpsBearerContextAccept = 0xc6,
    /// Activate dedicated EPS bearer context reject
    ActivateDedicatedEpsBearerContextReject = 0xc7,
    /// Deactivate EPS bearer context request
    DeactivateEpsBearerContextRequest = 0xcd,
    /// Deactivate EPS bearer context accept
    DeactivateEpsBearerContextAccept = 0xce,
    /// PDN connectivity request
    PdnConnectivityRequest = 0xd0,
    /// PDN connectivity reject
    PdnConnectivityReject = 0xd1,
    /// PDN disconnect request
    PdnDisconnectRequest = 0xd2,
    /// PDN disconnect reject
    PdnDisconnectReject = 0xd3,
    /// ESM status
    EsmStatus = 0xe8,
}

impl TryFrom<u8> for EsmMessageType {
    type Error = EsmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let message_type = match value {
            0xc1 => EsmMessageType::ActivateDefaultEpsBearerContextRequest,
            0xc2 => EsmMessageType::ActivateDefaultEpsBearerContextAccept,
            0xc3 => EsmMessageType::ActivateDefaultEpsBearerContextReject,
            0xc5 => EsmMessageType::ActivateDedicatedEpsBearerContextRequest,
            0xc6 => EsmMessageType::ActivateDedicatedEpsBearerContextAccept,
            0xc7 => EsmMessageType::ActivateDedicatedEpsBearerContextReject,
            0xcd => EsmMessageType::DeactivateEpsBearerContextRequest,
            0xce => EsmMessageType::DeactivateEpsBearerContextAccept,
            0xd0 => EsmMessageType::PdnConnectivityRequest,
            0xd1 => EsmMessageType::PdnConnectivityReject,
            0xd2 => EsmMessageType::PdnDisconnectRequest,
            0xd3 => EsmMessageType::PdnDisconnectReject,
            0xe8 => EsmMessageType::EsmStatus,
            _ => return Err(EsmError::Rejected(EsmCause::MessageTypeNonExistent)),
        };
        Ok(message_type)
    }
}

/// How a message reaches the UE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Own NAS message exchange
    Standalone,
    /// Carried inside an EMM message
    Piggybacked,
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Standalone => write!(f, "standalone"),
            Delivery::Piggybacked => write!(f, "piggybacked"),
        }
    }
}

/// ESM message header (TS 24.301 Section 8.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EsmHeader {
    pub message_type: EsmMessageType,
    pub pti: Pti,
    pub ebi: Ebi,
}

impl EsmHeader {
    pub fn new(message_type: EsmMessageType, pti: Pti, ebi: Ebi) -> Self {
        Self {
            message_type,
            pti,
            ebi,
        }
    }

    /// Write the three header octets
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((self.ebi.value() << 4) | NAS_PROTOCOL_DISCRIMINATOR_ESM);
        buf.put_u8(self.pti.value());
        buf.put_u8(self.message_type as u8);
    }

    /// Parse the header at the start of an encoded message
    pub fn decode(data: &[u8]) -> EsmResult<Self> {
        if data.len() < ESM_HEADER_LEN {
            return Err(EsmError::Rejected(EsmCause::InvalidMandatoryInformation));
        }
        if data[0] & 0x0f != NAS_PROTOCOL_DISCRIMINATOR_ESM {
            return Err(EsmError::Rejected(EsmCause::SemanticallyIncorrectMessage));
        }
        Ok(Self {
            ebi: Ebi(data[0] >> 4),
            pti: Pti(data[1]),
            message_type: EsmMessageType::try_from(data[2])?,
        })
    }
}

/// Destination of outgoing messages
pub trait MessageSink {
    /// Hand the payload to the transport
    fn send(&mut self, delivery: Delivery, header: &EsmHeader, payload: Bytes) -> EsmResult<()>;
}

impl MessageSink for Vec<(Delivery, EsmHeader, Bytes)> {
    fn send(&mut self, delivery: Delivery, header: &EsmHeader, payload: Bytes) -> EsmResult<()> {
        self.push((delivery, *header, payload));
        Ok(())
    }
}

// ============================================================================
// Outgoing message descriptor
// ============================================================================

/// Outgoing ESM message with its encoded payload
#[must_use = "an ESM message must be transmitted or discarded"]
#[derive(Debug)]
pub struct EsmMessage {
    header: EsmHeader,
    cause: Option<EsmCause>,
    delivery: Delivery,
    payload: Option<Bytes>,
}

impl EsmMessage {
    /// Wrap a payload produced by the message encoder
    pub fn new(header: EsmHeader, payload: Bytes) -> Self {
        Self {
            header,
            cause: None,
            delivery: Delivery::Standalone,
            payload: Some(payload),
        }
    }

    /// Encode the header, the optional cause octet and `body`
    pub fn build(header: EsmHeader, cause: Option<EsmCause>, body: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(ESM_HEADER_LEN + 1 + body.len());
        header.encode(&mut buf);
        if let Some(cause) = cause {
            buf.put_u8(cause.value());
        }
        buf.put_slice(body);

        Self {
            header,
            cause,
            delivery: Delivery::Standalone,
            payload: Some(buf.freeze()),
        }
    }

    /// Attach the cause carried by the message
    pub fn with_cause(mut self, cause: EsmCause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub(crate) fn set_delivery(&mut self, delivery: Delivery) {
        self.delivery = delivery;
    }

    pub fn header(&self) -> &EsmHeader {
        &self.header
    }

    pub fn message_type(&self) -> EsmMessageType {
        self.header.message_type
    }

    pub fn pti(&self) -> Pti {
        self.header.pti
    }

    pub fn ebi(&self) -> Ebi {
        self.header.ebi
    }

    pub fn cause(&self) -> Option<EsmCause> {
        self.cause
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Encoded payload, shared with the retransmission store
    pub(crate) fn payload(&self) -> Bytes {
        self.payload.clone().unwrap_or_default()
    }

    /// Hand the message to the transport
    pub fn transmit<S: MessageSink + ?Sized>(mut self, sink: &mut S) -> EsmResult<()> {
        let payload = self.payload.take().unwrap_or_default();
        log::debug!(
            "Transmit {:?} {} {} ({}, {} octets)",
            self.header.message_type,
            self.header.pti,
            self.header.ebi,
            self.delivery,
            payload.len()
        );
        sink.send(self.delivery, &self.header, payload)
    }

    /// Release the message without sending it
    pub fn discard(mut self) {
        if self.payload.take().is_some() {
            log::debug!(
                "Discard {:?} {} {}",
                self.header.message_type,
                self.header.pti,
                self.header.ebi
            );
        }
    }
}

impl Drop for EsmMessage {
    fn drop(&mut self) {
        if self.payload.is_some() {
            log::warn!(
                "{:?} {} {} dropped without transmit or discard",
                self.header.message_type,
                self.header.pti,
                self.header.ebi
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> EsmHeader {
        EsmHeader::new(EsmMessageType::PdnConnectivityReject, Pti(1), Ebi(0))
    }

    #[test]
    fn test_message_type_values() {
        assert_eq!(EsmMessageType::ActivateDefaultEpsBearerContextRequest as u8, 0xc1);
        assert_eq!(EsmMessageType::ActivateDedicatedEpsBearerContextRequest as u8, 0xc5);
        assert_eq!(EsmMessageType::DeactivateEpsBearerContextRequest as u8, 0xcd);
        assert_eq!(EsmMessageType::PdnConnectivityReject as u8, 0xd1);
        assert_eq!(EsmMessageType::EsmStatus as u8, 0xe8);
        assert_eq!(
            EsmMessageType::try_from(0xd3).unwrap(),
            EsmMessageType::PdnDisconnectReject
        );
        assert!(EsmMessageType::try_from(0x00).is_err());
    }

    #[test]
    fn test_build_layout() {
        let header = EsmHeader::new(EsmMessageType::EsmStatus, Pti(3), Ebi(6));
        let msg = EsmMessage::build(header, Some(EsmCause::InvalidPtiValue), &[]);
        let mut sink: Vec<(Delivery, EsmHeader, Bytes)> = Vec::new();
        msg.transmit(&mut sink).unwrap();

        let (delivery, sent, payload) = &sink[0];
        assert_eq!(*delivery, Delivery::Standalone);
        assert_eq!(*sent, header);
        assert_eq!(&payload[..], &[0x62, 3, 0xe8, 81]);
        assert_eq!(EsmHeader::decode(payload).unwrap(), header);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            EsmHeader::decode(&[0x02, 1]),
            Err(EsmError::Rejected(EsmCause::InvalidMandatoryInformation))
        );
        assert_eq!(
            EsmHeader::decode(&[0x07, 1, 0xd1]),
            Err(EsmError::Rejected(EsmCause::SemanticallyIncorrectMessage))
        );
    }

    #[test]
    fn test_with_cause_and_accessors() {
        let msg = EsmMessage::new(header(), Bytes::from_static(&[0x02, 1, 0xd1, 27]))
            .with_cause(EsmCause::MissingOrUnknownApn);
        assert_eq!(msg.cause(), Some(EsmCause::MissingOrUnknownApn));
        assert_eq!(msg.pti(), Pti(1));
        assert_eq!(msg.payload().len(), 4);
        msg.discard();
    }

    struct FailingSink;

    impl MessageSink for FailingSink {
        fn send(&mut self, _: Delivery, _: &EsmHeader, _: Bytes) -> EsmResult<()> {
            Err(EsmError::Transport("link down".to_string()))
        }
    }

    #[test]
    fn test_transport_error_propagates() {
        let msg = EsmMessage::build(header(), None, &[]);
        assert_eq!(
            msg.transmit(&mut FailingSink),
            Err(EsmError::Transport("link down".to_string()))
        );
    }
}
