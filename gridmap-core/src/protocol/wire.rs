//! Length-delimited envelope framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

use super::constants::{ENVELOPE_HEADER_SIZE, MAX_ENVELOPE_SIZE, SIZE_OF_LENGTH_FIELD};
use crate::error::GridError;

/// The role of an envelope on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EnvelopeKind {
    /// A request opening a unary call, a server-stream, or the event duplex.
    Request = 1,
    /// The single response completing a unary call.
    Response = 2,
    /// One element of a server-stream or of the event duplex, in either
    /// direction.
    Data = 3,
    /// Clean end of a server-stream.
    End = 4,
    /// The call failed; the body is an error message.
    Error = 5,
    /// Client-initiated cancellation of a stream.
    Cancel = 6,
}

impl EnvelopeKind {
    /// Creates an envelope kind from its wire value.
    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::Data),
            4 => Some(Self::End),
            5 => Some(Self::Error),
            6 => Some(Self::Cancel),
            _ => None,
        }
    }

    /// Returns the wire value for this kind.
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// One length-delimited unit on the wire.
///
/// The `uid` is the transport stream id: responses, stream elements, and
/// errors carry the uid of the request that opened the exchange.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Correlation uuid routing this envelope to its exchange.
    pub uid: Uuid,
    /// The envelope's role.
    pub kind: EnvelopeKind,
    /// The encoded message body; empty for `End` and `Cancel`.
    pub body: Bytes,
}

impl Envelope {
    /// Creates a new envelope.
    pub fn new(uid: Uuid, kind: EnvelopeKind, body: Bytes) -> Self {
        Self { uid, kind, body }
    }

    /// Creates a bodyless envelope of the given kind.
    pub fn control(uid: Uuid, kind: EnvelopeKind) -> Self {
        Self::new(uid, kind, Bytes::new())
    }

    /// Creates an error envelope carrying a message string.
    pub fn error(uid: Uuid, message: &str) -> Self {
        Self::new(uid, EnvelopeKind::Error, Bytes::copy_from_slice(message.as_bytes()))
    }
}

/// Encoder/decoder for [`Envelope`] framing.
///
/// Wire layout: `u32` little-endian payload length, 16-byte uuid, one kind
/// byte, body.
#[derive(Debug, Default)]
pub struct WireCodec {
    _private: (),
}

impl WireCodec {
    /// Creates a new codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Encoder<Envelope> for WireCodec {
    type Error = GridError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload_len = ENVELOPE_HEADER_SIZE + item.body.len();
        if payload_len > MAX_ENVELOPE_SIZE {
            return Err(GridError::Protocol(format!(
                "envelope of {} bytes exceeds maximum {}",
                payload_len, MAX_ENVELOPE_SIZE
            )));
        }
        dst.reserve(SIZE_OF_LENGTH_FIELD + payload_len);
        dst.put_u32_le(payload_len as u32);
        dst.put_slice(item.uid.as_bytes());
        dst.put_u8(item.kind.value());
        dst.put_slice(&item.body);
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = Envelope;
    type Error = GridError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < SIZE_OF_LENGTH_FIELD {
            return Ok(None);
        }

        let payload_len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if payload_len > MAX_ENVELOPE_SIZE {
            return Err(GridError::Protocol(format!(
                "envelope length {} exceeds maximum {}",
                payload_len, MAX_ENVELOPE_SIZE
            )));
        }
        if payload_len < ENVELOPE_HEADER_SIZE {
            return Err(GridError::Protocol(format!(
                "envelope length {} below header size",
                payload_len
            )));
        }
        if src.len() < SIZE_OF_LENGTH_FIELD + payload_len {
            return Ok(None);
        }

        src.advance(SIZE_OF_LENGTH_FIELD);
        let mut raw_uid = [0u8; 16];
        raw_uid.copy_from_slice(&src[..16]);
        src.advance(16);
        let kind_value = src.get_u8();
        let kind = EnvelopeKind::from_value(kind_value).ok_or_else(|| {
            GridError::Protocol(format!("unknown envelope kind {:#x}", kind_value))
        })?;
        let body = src.split_to(payload_len - ENVELOPE_HEADER_SIZE).freeze();

        Ok(Some(Envelope::new(Uuid::from_bytes(raw_uid), kind, body)))
    }
}
