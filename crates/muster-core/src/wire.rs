//! Muster wire format — heartbeat payloads and multicast datagram framing.
//!
//! A heartbeat payload is a schema fingerprint followed by the sender's
//! descriptor: id, type, description, then a count-prefixed pair of parallel
//! arrays (protocol names, addresses). All integers are big-endian. Strings
//! are length-prefixed and NUL-terminated, the length counting the NUL.
//!
//! Datagrams carry one message each: a fixed 8-byte header, the channel name
//! (NUL-terminated), then the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::peer::{Descriptor, DescriptorError};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Default IPv4 multicast group shared by all participants.
pub const DEFAULT_ADDRESS: &str = "239.255.76.67";

/// Default UDP port.
pub const DEFAULT_PORT: u16 = 7667;

/// Default multicast TTL. 0 keeps heartbeats on the local host's segment.
pub const DEFAULT_TTL: u32 = 0;

/// Default heartbeat period in milliseconds.
pub const DEFAULT_PERIOD_MS: u64 = 1_000;

/// Default presence timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Channel every participant publishes heartbeats on.
pub const HEARTBEAT_CHANNEL: &str = "muster-peers";

/// Schema name hashed into the payload fingerprint.
pub const HEARTBEAT_SCHEMA: &[u8] = b"muster.heartbeat.v1";

/// First four bytes of every datagram.
pub const DATAGRAM_MAGIC: [u8; 4] = *b"MST1";

/// Longest channel name a datagram may carry, excluding the NUL.
pub const MAX_CHANNEL_LEN: usize = 63;

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

// ── Heartbeat payload ─────────────────────────────────────────────────────────

/// First 8 bytes of the BLAKE3 hash of [`HEARTBEAT_SCHEMA`].
///
/// Receivers reject payloads whose fingerprint differs, so incompatible
/// encodings sharing a channel are dropped instead of misparsed.
pub fn heartbeat_fingerprint() -> [u8; 8] {
    let hash = blake3::hash(HEARTBEAT_SCHEMA);
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash.as_bytes()[..8]);
    out
}

/// Encode a descriptor as a heartbeat payload.
pub fn encode_heartbeat(descriptor: &Descriptor) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    buf.put_slice(&heartbeat_fingerprint());
    put_string(&mut buf, &descriptor.id);
    put_string(&mut buf, &descriptor.kind);
    put_string(&mut buf, &descriptor.description);

    buf.put_i32(descriptor.protocols.len() as i32);
    for protocol in descriptor.protocols.keys() {
        put_string(&mut buf, protocol);
    }
    for address in descriptor.protocols.values() {
        put_string(&mut buf, address);
    }
    buf.freeze()
}

/// Decode a heartbeat payload. Bytes after a complete message are ignored.
pub fn decode_heartbeat(mut buf: &[u8]) -> Result<Descriptor, WireError> {
    if buf.remaining() < 8 {
        return Err(WireError::Truncated);
    }
    let mut fingerprint = [0u8; 8];
    buf.copy_to_slice(&mut fingerprint);
    if fingerprint != heartbeat_fingerprint() {
        return Err(WireError::Fingerprint);
    }

    let id = get_string(&mut buf)?;
    let kind = get_string(&mut buf)?;
    let description = get_string(&mut buf)?;

    let count = get_i32(&mut buf)?;
    if count < 0 {
        return Err(WireError::NegativeCount(count));
    }
    let count = count as usize;

    // Each string costs at least 5 bytes; reject absurd counts before allocating.
    if count.saturating_mul(10) > buf.remaining() {
        return Err(WireError::Truncated);
    }
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        names.push(get_string(&mut buf)?);
    }
    let mut descriptor = Descriptor::new(id, kind).with_description(description);
    for name in names {
        let address = get_string(&mut buf)?;
        descriptor.protocols.insert(name, address);
    }

    descriptor.validate()?;
    Ok(descriptor)
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32(s.len() as i32 + 1);
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn get_i32(buf: &mut &[u8]) -> Result<i32, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_i32())
}

fn get_string(buf: &mut &[u8]) -> Result<String, WireError> {
    let len = get_i32(buf)?;
    if len < 1 {
        return Err(WireError::InvalidLength(len));
    }
    let len = len as usize;
    if buf.remaining() < len {
        return Err(WireError::Truncated);
    }
    let (body, rest) = buf.split_at(len);
    *buf = rest;
    let (text, terminator) = body.split_at(len - 1);
    if terminator != [0] {
        return Err(WireError::MissingTerminator);
    }
    String::from_utf8(text.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

// ── Datagram framing ──────────────────────────────────────────────────────────

/// Fixed prefix of every multicast datagram.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct DatagramHeader {
    /// Always [`DATAGRAM_MAGIC`].
    pub magic: [u8; 4],
    /// Per-sender sequence number, big-endian. Informational only.
    pub sequence: [u8; 4],
}

assert_eq_size!(DatagramHeader, [u8; 8]);

impl DatagramHeader {
    pub fn new(sequence: u32) -> Self {
        Self {
            magic: DATAGRAM_MAGIC,
            sequence: sequence.to_be_bytes(),
        }
    }

    pub fn sequence(&self) -> u32 {
        u32::from_be_bytes(self.sequence)
    }
}

/// A datagram split into its parts, borrowing from the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct Datagram<'a> {
    pub sequence: u32,
    pub channel: &'a str,
    pub payload: &'a [u8],
}

/// Frame `payload` for `channel`.
pub fn encode_datagram(sequence: u32, channel: &str, payload: &[u8]) -> Result<Bytes, WireError> {
    if channel.len() > MAX_CHANNEL_LEN || channel.as_bytes().contains(&0) {
        return Err(WireError::InvalidChannel(channel.to_string()));
    }
    let total = std::mem::size_of::<DatagramHeader>() + channel.len() + 1 + payload.len();
    if total > MAX_DATAGRAM {
        return Err(WireError::DatagramTooLarge(total));
    }

    let mut buf = BytesMut::with_capacity(total);
    buf.put_slice(DatagramHeader::new(sequence).as_bytes());
    buf.put_slice(channel.as_bytes());
    buf.put_u8(0);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

pub fn decode_datagram(buf: &[u8]) -> Result<Datagram<'_>, WireError> {
    let header = DatagramHeader::read_from_prefix(buf).ok_or(WireError::Truncated)?;
    if header.magic != DATAGRAM_MAGIC {
        return Err(WireError::Magic(header.magic));
    }
    let rest = &buf[std::mem::size_of::<DatagramHeader>()..];

    let nul = rest
        .iter()
        .take(MAX_CHANNEL_LEN + 1)
        .position(|&b| b == 0)
        .ok_or(WireError::MissingTerminator)?;
    let channel = std::str::from_utf8(&rest[..nul]).map_err(|_| WireError::InvalidUtf8)?;

    Ok(Datagram {
        sequence: header.sequence(),
        channel,
        payload: &rest[nul + 1..],
    })
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("message truncated")]
    Truncated,

    #[error("schema fingerprint mismatch")]
    Fingerprint,

    #[error("bad datagram magic: {0:02x?}")]
    Magic([u8; 4]),

    #[error("invalid string length: {0}")]
    InvalidLength(i32),

    #[error("negative protocol count: {0}")]
    NegativeCount(i32),

    #[error("string is missing its NUL terminator")]
    MissingTerminator,

    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid channel name: {0:?}")]
    InvalidChannel(String),

    #[error("datagram of {0} bytes exceeds maximum {}", MAX_DATAGRAM)]
    DatagramTooLarge(usize),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn with_protocols(n: usize) -> Descriptor {
        let mut descriptor = Descriptor::new("node-7", "sensor").with_description("roof");
        for i in 0..n {
            descriptor = descriptor.with_protocol(format!("proto-{i}"), format!("10.0.0.{i}:{}", 9000 + i));
        }
        descriptor
    }

    #[test]
    fn heartbeat_round_trip() {
        for n in [0, 1, 10] {
            let original = with_protocols(n);
            let decoded = decode_heartbeat(&encode_heartbeat(&original)).unwrap();
            assert_eq!(decoded, original, "{n} protocols");
        }
    }

    #[test]
    fn heartbeat_layout() {
        let bytes = encode_heartbeat(&Descriptor::new("a", "t"));
        assert_eq!(&bytes[..8], &heartbeat_fingerprint());
        // id: len 2 ("a" + NUL)
        assert_eq!(&bytes[8..14], &[0, 0, 0, 2, b'a', 0]);
        // type, empty description, count 0
        assert_eq!(&bytes[14..20], &[0, 0, 0, 2, b't', 0]);
        assert_eq!(&bytes[20..25], &[0, 0, 0, 1, 0]);
        assert_eq!(&bytes[25..29], &[0, 0, 0, 0]);
        assert_eq!(bytes.len(), 29);
    }

    #[test]
    fn decode_rejects_empty_input() {
        assert_eq!(decode_heartbeat(&[]), Err(WireError::Truncated));
    }

    #[test]
    fn decode_rejects_wrong_fingerprint() {
        let mut bytes = encode_heartbeat(&with_protocols(1)).to_vec();
        bytes[0] ^= 0xff;
        assert_eq!(decode_heartbeat(&bytes), Err(WireError::Fingerprint));
    }

    #[test]
    fn decode_rejects_truncation() {
        let bytes = encode_heartbeat(&with_protocols(2));
        for cut in [9, 20, bytes.len() - 1] {
            assert!(decode_heartbeat(&bytes[..cut]).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn decode_rejects_missing_terminator() {
        let mut bytes = encode_heartbeat(&Descriptor::new("a", "t")).to_vec();
        bytes[13] = b'x';
        assert_eq!(decode_heartbeat(&bytes), Err(WireError::MissingTerminator));
    }

    #[test]
    fn decode_rejects_negative_count() {
        let mut bytes = encode_heartbeat(&Descriptor::new("a", "t")).to_vec();
        bytes[25..29].copy_from_slice(&(-1i32).to_be_bytes());
        assert_eq!(decode_heartbeat(&bytes), Err(WireError::NegativeCount(-1)));
    }

    #[test]
    fn decode_rejects_empty_id() {
        let bytes = encode_heartbeat(&Descriptor::new("", "t"));
        assert_eq!(
            decode_heartbeat(&bytes),
            Err(WireError::Descriptor(DescriptorError::EmptyId))
        );
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let original = with_protocols(1);
        let mut bytes = encode_heartbeat(&original).to_vec();
        bytes.extend_from_slice(b"junk");
        assert_eq!(decode_heartbeat(&bytes).unwrap(), original);
    }

    #[test]
    fn datagram_round_trip() {
        let frame = encode_datagram(42, HEARTBEAT_CHANNEL, b"payload").unwrap();
        let datagram = decode_datagram(&frame).unwrap();
        assert_eq!(
            datagram,
            Datagram {
                sequence: 42,
                channel: HEARTBEAT_CHANNEL,
                payload: b"payload",
            }
        );
    }

    #[test]
    fn datagram_rejects_bad_magic() {
        let mut frame = encode_datagram(1, "c", b"").unwrap().to_vec();
        frame[0] = b'X';
        assert!(matches!(decode_datagram(&frame), Err(WireError::Magic(_))));
    }

    #[test]
    fn datagram_rejects_bad_channel() {
        let long = "c".repeat(MAX_CHANNEL_LEN + 1);
        assert!(encode_datagram(1, &long, b"").is_err());
        assert!(encode_datagram(1, "a\0b", b"").is_err());
    }

    #[test]
    fn datagram_rejects_oversize_payload() {
        let payload = vec![0u8; MAX_DATAGRAM];
        assert!(matches!(
            encode_datagram(1, "c", &payload),
            Err(WireError::DatagramTooLarge(_))
        ));
    }
}
