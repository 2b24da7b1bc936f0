//! Stream identifier — the 128-bit on-wire routing key.
//!
//! Five bit-packed fields, in order: version (6 bits), destination class
//! (7), device id (7), path fingerprint (54), name fingerprint (54). The
//! fields are bit-contiguous with no padding and the widths sum to exactly
//! 128. Every data datagram starts with these 16 bytes; changing the layout
//! is a wire-format break.
//!
//! Destination, device, path and name each reserve an all-ones wildcard
//! value that matches any concrete value of that field. Version is a format
//! constant and has no wildcard.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::destination::{Destination, DEST_ANY};
use crate::fingerprint::{Blake3Fingerprinter, Fingerprinter};

/// Stream id format revision, stored in the top 6 bits of every id.
pub const STREAM_ID_VERSION: u8 = 0;

/// Device id reserved for the controller itself.
pub const CONTROLLER_DEVICE_ID: u8 = 0;

/// Wildcard device id.
pub const DEVICE_ID_ANY: u8 = 0x7F;

/// Wildcard path fingerprint, all 54 bits set.
pub const PATH_FINGERPRINT_ANY: u64 = 0x3F_FFFF_FFFF_FFFF;

/// Wildcard name fingerprint, all 54 bits set.
pub const NAME_FINGERPRINT_ANY: u64 = 0x3F_FFFF_FFFF_FFFF;

#[derive(Debug, thiserror::Error)]
pub enum StreamIdError {
    #[error("device id {0} exceeds 7 bits")]
    DeviceIdOutOfRange(u16),
    #[error("unknown destination class {0:#04x}")]
    UnknownDestination(u8),
    #[error("stream id must be {expected} bytes, got {got}")]
    BadLength { expected: usize, got: usize },
    #[error("malformed stream id text: {0}")]
    BadText(String),
}

/// A 128-bit stream identifier.
///
/// Immutable value data: created once by [`StreamIdGenerator::generate`]
/// and only ever derived from via [`StreamId::cleared`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, AsBytes, FromBytes, FromZeroes)]
#[repr(transparent)]
pub struct StreamId([u8; 16]);

// Compile-time guard: a stream id is exactly the datagram prefix.
assert_eq_size!(StreamId, [u8; 16]);

impl StreamId {
    /// Wire length of a stream id.
    pub const LEN: usize = 16;

    /// All-zero id.
    pub const NIL: StreamId = StreamId([0u8; 16]);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        StreamId(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    /// Parse from a byte slice; must be exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, StreamIdError> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| StreamIdError::BadLength {
            expected: Self::LEN,
            got: bytes.len(),
        })?;
        Ok(StreamId(arr))
    }

    // ── Field extraction ─────────────────────────────────────────────────

    pub fn version(&self) -> u8 {
        (self.0[0] >> 2) & 0x3F
    }

    /// Raw 7-bit destination class. See [`Destination`] for known values.
    pub fn destination(&self) -> u8 {
        ((self.0[0] & 0x03) << 5) | ((self.0[1] >> 3) & 0x1F)
    }

    pub fn device_id(&self) -> u8 {
        ((self.0[1] & 0x07) << 4) | ((self.0[2] >> 4) & 0x0F)
    }

    pub fn path_fingerprint(&self) -> u64 {
        ((self.0[2] as u64 & 0x0F) << 50)
            | ((self.0[3] as u64) << 42)
            | ((self.0[4] as u64) << 34)
            | ((self.0[5] as u64) << 26)
            | ((self.0[6] as u64) << 18)
            | ((self.0[7] as u64) << 10)
            | ((self.0[8] as u64) << 2)
            | ((self.0[9] as u64 & 0xC0) >> 6)
    }

    pub fn name_fingerprint(&self) -> u64 {
        ((self.0[9] as u64 & 0x3F) << 48)
            | ((self.0[10] as u64) << 40)
            | ((self.0[11] as u64) << 32)
            | ((self.0[12] as u64) << 24)
            | ((self.0[13] as u64) << 16)
            | ((self.0[14] as u64) << 8)
            | (self.0[15] as u64)
    }

    /// Path fingerprint as 7 big-endian bytes (top 2 bits always zero).
    pub fn path_fingerprint_bytes(&self) -> [u8; 7] {
        let be = self.path_fingerprint().to_be_bytes();
        be[1..8].try_into().unwrap()
    }

    /// Name fingerprint as 7 big-endian bytes (top 2 bits always zero).
    pub fn name_fingerprint_bytes(&self) -> [u8; 7] {
        let be = self.name_fingerprint().to_be_bytes();
        be[1..8].try_into().unwrap()
    }

    // ── Field insertion ──────────────────────────────────────────────────
    // Setters overwrite only the target field's bits. Inputs are masked to
    // the field width.

    fn set_version(&mut self, version: u8) {
        self.0[0] = ((version & 0x3F) << 2) | (self.0[0] & 0x03);
    }

    fn set_destination(&mut self, destination: u8) {
        self.0[0] = (self.0[0] & 0xFC) | ((destination & 0x7F) >> 5);
        self.0[1] = ((destination & 0x1F) << 3) | (self.0[1] & 0x07);
    }

    fn set_device_id(&mut self, device_id: u8) {
        self.0[1] = (self.0[1] & 0xF8) | ((device_id >> 4) & 0x07);
        self.0[2] = ((device_id & 0x0F) << 4) | (self.0[2] & 0x0F);
    }

    fn set_path_fingerprint(&mut self, path: u64) {
        self.0[2] = (self.0[2] & 0xF0) | (((path >> 50) & 0x0F) as u8);
        self.0[3] = ((path >> 42) & 0xFF) as u8;
        self.0[4] = ((path >> 34) & 0xFF) as u8;
        self.0[5] = ((path >> 26) & 0xFF) as u8;
        self.0[6] = ((path >> 18) & 0xFF) as u8;
        self.0[7] = ((path >> 10) & 0xFF) as u8;
        self.0[8] = ((path >> 2) & 0xFF) as u8;
        self.0[9] = (((path & 0x03) << 6) as u8) | (self.0[9] & 0x3F);
    }

    fn set_name_fingerprint(&mut self, name: u64) {
        self.0[9] = (self.0[9] & 0xC0) | (((name >> 48) & 0x3F) as u8);
        self.0[10] = ((name >> 40) & 0xFF) as u8;
        self.0[11] = ((name >> 32) & 0xFF) as u8;
        self.0[12] = ((name >> 24) & 0xFF) as u8;
        self.0[13] = ((name >> 16) & 0xFF) as u8;
        self.0[14] = ((name >> 8) & 0xFF) as u8;
        self.0[15] = (name & 0xFF) as u8;
    }

    // ── Anonymization ────────────────────────────────────────────────────

    /// Copy with the masked fields zeroed, all other bits untouched.
    ///
    /// Used to derive cache-key variants that strip identity bits, e.g.
    /// [`FieldMask::IDENTITY`] turns a concrete id into a routing key shared
    /// by every device emitting the same stream.
    pub fn cleared(&self, mask: FieldMask) -> StreamId {
        let mut out = *self;
        if mask.version {
            out.0[0] &= 0x03;
        }
        if mask.destination {
            out.0[0] &= 0xFC;
            out.0[1] &= 0x07;
        }
        if mask.device_id {
            out.0[1] &= 0xF8;
            out.0[2] &= 0x0F;
        }
        if mask.path {
            out.0[2] &= 0xF0;
            for b in &mut out.0[3..9] {
                *b = 0;
            }
            out.0[9] &= 0x3F;
        }
        if mask.name {
            out.0[9] &= 0xC0;
            for b in &mut out.0[10..16] {
                *b = 0;
            }
        }
        out
    }

    // ── Matching ─────────────────────────────────────────────────────────

    /// Per-field wildcard match.
    ///
    /// A field matches when both sides are equal, or either side carries
    /// that field's wildcard value; all fields must match. The relation is
    /// symmetric. Version carries no wildcard and compares by equality.
    pub fn matches(&self, other: &StreamId) -> bool {
        fn field(a: u64, b: u64, any: u64) -> bool {
            a == b || a == any || b == any
        }

        self.version() == other.version()
            && field(
                self.destination() as u64,
                other.destination() as u64,
                DEST_ANY as u64,
            )
            && field(
                self.device_id() as u64,
                other.device_id() as u64,
                DEVICE_ID_ANY as u64,
            )
            && field(
                self.path_fingerprint(),
                other.path_fingerprint(),
                PATH_FINGERPRINT_ANY,
            )
            && field(
                self.name_fingerprint(),
                other.name_fingerprint(),
                NAME_FINGERPRINT_ANY,
            )
    }
}

/// Selects stream-id fields for [`StreamId::cleared`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldMask {
    pub version: bool,
    pub destination: bool,
    pub device_id: bool,
    pub path: bool,
    pub name: bool,
}

impl FieldMask {
    /// The identity bits dropped when deriving a routing cache key:
    /// version, destination class and device id.
    pub const IDENTITY: FieldMask = FieldMask {
        version: true,
        destination: true,
        device_id: true,
        path: false,
        name: false,
    };
}

// ── Text forms ────────────────────────────────────────────────────────────
// Canonical form is hyphenated hex, 8-4-4-4-12; the raw 32-digit form
// parses to the identical value.

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = hex::encode(self.0);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &h[0..8],
            &h[8..12],
            &h[12..16],
            &h[16..20],
            &h[20..32]
        )
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({self})")
    }
}

impl FromStr for StreamId {
    type Err = StreamIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = match s.len() {
            32 => s.to_string(),
            36 => {
                let ok = s
                    .char_indices()
                    .all(|(i, c)| matches!(i, 8 | 13 | 18 | 23) == (c == '-'));
                if !ok {
                    return Err(StreamIdError::BadText(s.to_string()));
                }
                s.chars().filter(|c| *c != '-').collect()
            }
            _ => return Err(StreamIdError::BadText(s.to_string())),
        };
        let bytes = hex::decode(&compact).map_err(|_| StreamIdError::BadText(s.to_string()))?;
        StreamId::from_slice(&bytes)
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ── Generation ────────────────────────────────────────────────────────────

/// Builds stream ids from routing intent.
///
/// Holds the fingerprint function; swap it via [`with_fingerprinter`] when
/// interoperating with a fleet that uses a different digest.
///
/// [`with_fingerprinter`]: StreamIdGenerator::with_fingerprinter
#[derive(Clone)]
pub struct StreamIdGenerator {
    fingerprinter: Arc<dyn Fingerprinter>,
}

impl Default for StreamIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamIdGenerator {
    pub fn new() -> Self {
        Self::with_fingerprinter(Arc::new(Blake3Fingerprinter))
    }

    pub fn with_fingerprinter(fingerprinter: Arc<dyn Fingerprinter>) -> Self {
        Self { fingerprinter }
    }

    /// Pack routing intent into a stream id.
    ///
    /// `None` (or empty) path/name produce that field's wildcard
    /// fingerprint. Fails when `device_id` does not fit in 7 bits.
    pub fn generate(
        &self,
        destination: Destination,
        device_id: u8,
        path: Option<&str>,
        name: Option<&str>,
    ) -> Result<StreamId, StreamIdError> {
        if device_id > DEVICE_ID_ANY {
            return Err(StreamIdError::DeviceIdOutOfRange(device_id as u16));
        }

        let path_fp = match path {
            Some(p) if !p.is_empty() => self.fingerprinter.fingerprint(p),
            _ => PATH_FINGERPRINT_ANY,
        };
        let name_fp = match name {
            Some(n) if !n.is_empty() => self.fingerprinter.fingerprint(n),
            _ => NAME_FINGERPRINT_ANY,
        };

        let mut id = StreamId::NIL;
        id.set_version(STREAM_ID_VERSION);
        id.set_destination(destination.raw());
        id.set_device_id(device_id);
        id.set_path_fingerprint(path_fp);
        id.set_name_fingerprint(name_fp);
        Ok(id)
    }
}
