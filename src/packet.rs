//! Wire-format definitions for protocol datagrams.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (type tag, sequence number, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], flagging the
//!   packet as corrupt when its checksum does not verify.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Message Type         |    Sequence Number (high)     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Sequence Number (low)      |        Payload Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |          Payload ...          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 10 bytes.
//! type(2) + seq(4) + payload_len(2) + checksum(2)

use thiserror::Error;

/// Type tag carried by DATA datagrams.
pub const MSG_TYPE_DATA: u16 = 1;
/// Type tag carried by ACK datagrams.
pub const MSG_TYPE_ACK: u16 = 2;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 10;

/// Largest UDP payload over IPv4: 65 535 minus the IP and UDP headers.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest message that still fits one datagram once the header is added.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_TYPE: usize = 0;
const OFF_SEQ: usize = 2;
const OFF_PAYLOAD_LEN: usize = 6;
const OFF_CHECKSUM: usize = 8;

/// Whether a datagram carries application data or acknowledges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Data,
    Ack,
}

impl MessageType {
    /// On-wire tag for this type.
    pub fn tag(self) -> u16 {
        match self {
            MessageType::Data => MSG_TYPE_DATA,
            MessageType::Ack => MSG_TYPE_ACK,
        }
    }

    /// Map an on-wire tag back to a [`MessageType`].
    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            MSG_TYPE_DATA => Some(MessageType::Data),
            MSG_TYPE_ACK => Some(MessageType::Ack),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Data => write!(f, "DATA"),
            MessageType::Ack => write!(f, "ACK"),
        }
    }
}

/// A complete protocol datagram.
///
/// `corrupt` is decided by the transport before the protocol sees the packet.
/// When it is set, `seq`, `kind` and `payload` are unreliable and must not be
/// acted upon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u32,
    pub kind: MessageType,
    pub payload: Vec<u8>,
    pub corrupt: bool,
}

impl Packet {
    /// A DATA packet carrying one application message.
    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Self {
            seq,
            kind: MessageType::Data,
            payload,
            corrupt: false,
        }
    }

    /// An ACK for sequence number `seq` (empty payload).
    pub fn ack(seq: u32) -> Self {
        Self {
            seq,
            kind: MessageType::Ack,
            payload: Vec::new(),
            corrupt: false,
        }
    }

    /// Placeholder for a datagram that could not be parsed at all.
    pub fn garbled() -> Self {
        Self {
            seq: 0,
            kind: MessageType::Data,
            payload: Vec::new(),
            corrupt: true,
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// The payload length and checksum are computed from the payload.  A
    /// packet flagged `corrupt` is written with an inverted checksum, so it
    /// still fails the integrity check after crossing a real wire.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(payload_len));
        }
        let mut buf = vec![0u8; HEADER_LEN + payload_len];

        buf[OFF_TYPE..OFF_TYPE + 2].copy_from_slice(&self.kind.tag().to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&(payload_len as u16).to_be_bytes());
        // Checksum field stays zero while computing the checksum.
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let mut csum = internet_checksum(&buf);
        if self.corrupt {
            csum = !csum;
        }
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the payload length field disagrees with `buf.len()`, or
    /// - the checksum verifies but the type tag is unknown.
    ///
    /// A checksum mismatch is **not** an error: the packet is returned with
    /// `corrupt` set so the protocol can discard it.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let tag = u16::from_be_bytes([buf[OFF_TYPE], buf[OFF_TYPE + 1]]);
        let seq = u32::from_be_bytes([
            buf[OFF_SEQ],
            buf[OFF_SEQ + 1],
            buf[OFF_SEQ + 2],
            buf[OFF_SEQ + 3],
        ]);
        let payload_len = u16::from_be_bytes([buf[OFF_PAYLOAD_LEN], buf[OFF_PAYLOAD_LEN + 1]]);
        let checksum = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);

        if buf.len() != HEADER_LEN + payload_len as usize {
            return Err(PacketError::LengthMismatch);
        }

        // Verify checksum: zero the stored field, recompute, compare.
        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&[0, 0]);
        let corrupt = internet_checksum(&scratch) != checksum;

        let kind = match MessageType::from_tag(tag) {
            Some(kind) => kind,
            None if corrupt => MessageType::Data,
            None => return Err(PacketError::UnknownType(tag)),
        };

        Ok(Packet {
            seq,
            kind,
            payload: buf[HEADER_LEN..].to_vec(),
            corrupt,
        })
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} seq={} len={}{}",
            self.kind,
            self.seq,
            self.payload.len(),
            if self.corrupt { " (corrupt)" } else { "" }
        )
    }
}

/// Errors that can arise when encoding or parsing a datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short to contain a header")]
    BufferTooShort,
    #[error("payload length field does not match remaining bytes")]
    LengthMismatch,
    #[error("unknown message type tag {0}")]
    UnknownType(u16),
    #[error("payload of {0} bytes exceeds the 16-bit length field")]
    PayloadTooLarge(usize),
}

/// Compute the Internet checksum (RFC 1071) over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.  The caller must zero any checksum field within `data`
/// before calling this function.
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    // Odd trailing byte: pad with a zero on the right.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}
