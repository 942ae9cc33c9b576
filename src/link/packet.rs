//! Reassembled network packets.

use std::io::IoSlice;

use bytes::{Bytes, BytesMut};

/// A network packet assembled from one or more pool segments.
///
/// The chunks are the segments exactly as the vectored read filled them,
/// front to back; the last chunk is capped so the total equals the byte
/// count of the read. No bytes are copied while assembling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    chunks: Vec<Bytes>,
    len: usize,
}

impl Packet {
    /// Create a packet from ordered chunks.
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        let len = chunks.iter().map(Bytes::len).sum();
        Self { chunks, len }
    }

    /// Total packet length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The underlying chunks, in read order.
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// First octet of the packet, if any.
    pub fn first_byte(&self) -> Option<u8> {
        self.chunks.iter().find_map(|c| c.first().copied())
    }

    /// Get the packet as one contiguous buffer.
    ///
    /// Single-chunk packets are returned without copying.
    pub fn to_bytes(&self) -> Bytes {
        match self.chunks.as_slice() {
            [] => Bytes::new(),
            [only] => only.clone(),
            chunks => {
                let mut out = BytesMut::with_capacity(self.len);
                for chunk in chunks {
                    out.extend_from_slice(chunk);
                }
                out.freeze()
            }
        }
    }

    /// IO slices over the chunks, for vectored writes.
    pub fn io_slices(&self) -> Vec<IoSlice<'_>> {
        self.chunks.iter().map(|c| IoSlice::new(c)).collect()
    }
}

impl From<Bytes> for Packet {
    fn from(bytes: Bytes) -> Self {
        Self::from_chunks(vec![bytes])
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        Self::from(Bytes::from(data))
    }
}
