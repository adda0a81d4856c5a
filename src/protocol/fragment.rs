//! Reassembly of fragmented transfers (upgrade packages, multimedia).
//!
//! The sender splits a payload into `total` fragments of at most
//! `max_payload` bytes each and stamps `packet_seq` 1..=total. Reassembly
//! allocates `max_payload * total` up front on the first fragment and
//! copies each payload at `(seq - 1) * max_payload`; the delivered length
//! is the sum of the actual fragment sizes.

use crate::error::{CodecError, Result};

/// Split a payload into at-most-`max_payload`-byte fragments.
pub fn split(payload: &[u8], max_payload: usize) -> Vec<&[u8]> {
    if max_payload == 0 {
        return Vec::new();
    }
    payload.chunks(max_payload).collect()
}

/// Number of fragments needed for `len` bytes at `max_payload` per fragment.
pub fn fragment_count(len: usize, max_payload: usize) -> u16 {
    len.div_ceil(max_payload) as u16
}

/// In-flight reassembly buffer for one fragmented transfer.
///
/// Lives from the first fragment until the payload is delivered or the
/// session ends. Arrival order is tolerated; missing sequence numbers are
/// reported for fill-packet requests.
#[derive(Debug)]
pub struct Reassembly {
    total: u16,
    /// Per-fragment payload size, keyed by 0-based index. The common size
    /// of the non-final fragments fixes the copy offsets.
    chunk_size: usize,
    buf: Vec<u8>,
    sizes: Vec<Option<usize>>,
}

impl Reassembly {
    /// Start a reassembly from the first arriving fragment's payload size.
    pub fn new(total: u16, max_payload: usize) -> Self {
        Self {
            total,
            chunk_size: max_payload,
            buf: vec![0; max_payload * total as usize],
            sizes: vec![None; total as usize],
        }
    }

    /// Insert one fragment. `seq` is 1-based.
    pub fn insert(&mut self, seq: u16, payload: &[u8]) -> Result<()> {
        if seq == 0 || seq > self.total {
            return Err(CodecError::BadHeader.into());
        }
        if payload.len() > self.chunk_size {
            return Err(CodecError::BadLength {
                expected: self.chunk_size,
                got: payload.len(),
            }
            .into());
        }
        let idx = (seq - 1) as usize;
        let offset = idx * self.chunk_size;
        self.buf[offset..offset + payload.len()].copy_from_slice(payload);
        self.sizes[idx] = Some(payload.len());
        Ok(())
    }

    pub fn total(&self) -> u16 {
        self.total
    }

    /// Sequence numbers not yet received, 1-based.
    pub fn missing(&self) -> Vec<u16> {
        self.sizes
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| (i + 1) as u16)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.sizes.iter().all(Option::is_some)
    }

    /// Assemble the delivered payload: fragments concatenated in sequence
    /// order, total length the sum of actual fragment sizes.
    ///
    /// Returns `BadLength` while fragments are still missing.
    pub fn assemble(self) -> Result<Vec<u8>> {
        let received = self.sizes.iter().filter(|s| s.is_some()).count();
        if received != self.total as usize {
            return Err(CodecError::BadLength {
                expected: self.total as usize,
                got: received,
            }
            .into());
        }
        let mut out = Vec::with_capacity(self.buf.len());
        for (idx, size) in self.sizes.iter().enumerate() {
            let offset = idx * self.chunk_size;
            let len = size.expect("completeness checked above");
            out.extend_from_slice(&self.buf[offset..offset + len]);
        }
        Ok(out)
    }
}
