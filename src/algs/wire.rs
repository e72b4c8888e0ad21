//! Fixed, versioned, little-endian layout of in-flight stash messages.
//!
//! One stash message travels as two channel messages from the same source:
//! a values block and an indices block. Each block is a [`WireHdr`]
//! followed by `count` packed records. The layout is private to the
//! exchange and never persisted.

use bytemuck::{Pod, Zeroable};
use static_assertions::{assert_eq_align, assert_eq_size};

/// Reinterpret a slice of plain-old-data as bytes.
pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Copy records out of a byte buffer of arbitrary alignment.
///
/// Trailing bytes that do not form a whole record are ignored; callers that
/// care check the length first.
pub fn pod_vec<T: Pod>(bytes: &[u8]) -> Vec<T> {
    let width = std::mem::size_of::<T>();
    if width == 0 {
        return Vec::new();
    }
    bytes
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Channel carrying `count * bs` scalars.
pub const CHANNEL_VALUES: u16 = 1;
/// Channel carrying `count` indices.
pub const CHANNEL_INDICES: u16 = 2;

/// All multi-byte integers are stored pre-LE with `.to_le()` and decoded
/// with `.from_le()`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub channel_le: u16,
    /// Number of stash entries in this message (not records).
    pub count_le: u32,
}

impl WireHdr {
    pub const SIZE: usize = 8;

    pub fn new(channel: u16, count: usize) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            channel_le: channel.to_le(),
            count_le: (count as u32).to_le(),
        }
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn channel(&self) -> u16 {
        u16::from_le(self.channel_le)
    }
    pub fn count(&self) -> usize {
        u32::from_le(self.count_le) as usize
    }
}

/// A scalar carried as its IEEE-754 bit pattern.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireScalar(pub u64);

impl WireScalar {
    #[inline]
    pub fn of(v: f64) -> Self {
        Self(v.to_bits().to_le())
    }
    #[inline]
    pub fn get(self) -> f64 {
        f64::from_bits(u64::from_le(self.0))
    }
}

/// A signed 64-bit integer on the wire.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireI64(pub i64);

impl WireI64 {
    #[inline]
    pub fn of(v: i64) -> Self {
        Self(v.to_le())
    }
    #[inline]
    pub fn get(self) -> i64 {
        i64::from_le(self.0)
    }
}

/// A matrix entry position `(row, col)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireMatIndex {
    pub row_le: i64,
    pub col_le: i64,
}

impl WireMatIndex {
    pub fn new(row: i64, col: i64) -> Self {
        Self {
            row_le: row.to_le(),
            col_le: col.to_le(),
        }
    }
    pub fn row(&self) -> i64 {
        i64::from_le(self.row_le)
    }
    pub fn col(&self) -> i64 {
        i64::from_le(self.col_le)
    }
}

assert_eq_size!(WireHdr, [u8; WireHdr::SIZE]);
assert_eq_size!(WireScalar, u64);
assert_eq_size!(WireI64, i64);
assert_eq_size!(WireMatIndex, [u8; 16]);
assert_eq_align!(WireMatIndex, u64);

/// Serialize one channel block.
pub fn encode_block<T: Pod>(channel: u16, count: usize, records: &[T]) -> Vec<u8> {
    let body = cast_slice(records);
    let mut out = Vec::with_capacity(WireHdr::SIZE + body.len());
    out.extend_from_slice(bytemuck::bytes_of(&WireHdr::new(channel, count)));
    out.extend_from_slice(body);
    out
}

/// Parse one channel block, checking version, channel and record count.
///
/// `per_entry` is the number of records each stash entry contributes
/// (the block size on the values channel, one on the indices channel).
pub fn decode_block<T: Pod>(
    bytes: &[u8],
    channel: u16,
    per_entry: usize,
) -> Result<(usize, Vec<T>), String> {
    if bytes.len() < WireHdr::SIZE {
        return Err(format!(
            "message of {} bytes is shorter than its header",
            bytes.len()
        ));
    }
    let (head, body) = bytes.split_at(WireHdr::SIZE);
    let hdr: WireHdr = bytemuck::pod_read_unaligned(head);
    if hdr.version() != WIRE_VERSION {
        return Err(format!(
            "wire version {} (expected {WIRE_VERSION})",
            hdr.version()
        ));
    }
    if hdr.channel() != channel {
        return Err(format!(
            "channel {} arrived on channel {channel}",
            hdr.channel()
        ));
    }
    let expected = hdr.count() * per_entry * std::mem::size_of::<T>();
    if body.len() != expected {
        return Err(format!(
            "expected {expected} payload bytes for {} entries, got {}",
            hdr.count(),
            body.len()
        ));
    }
    Ok((hdr.count(), pod_vec(body)))
}
