//! # Layered Address Spaces
//!
//! A memory image is an opaque byte blob. This crate turns it into a stack
//! of byte-addressable **layers**, each translating an address range and
//! delegating to the layer below:
//!
//! ```text
//!  IA32 / PAE / AMD64 paged layer   (virtual addresses, walks page tables)
//!            │ vtop
//!  physical layer                   (raw image: identity)
//!            │ read
//!  file layer                       (seek + read on the image file)
//! ```
//!
//! ## What you get
//! - The [`AddressSpace`] trait: `read` (fails with a short-read signal on
//!   a translation gap), `zread` (total, zero-fills gaps), `is_valid`,
//!   present-address [`Run`]s, and gated `write`.
//! - [`FileAddressSpace`] over a raw image file and [`BufferAddressSpace`]
//!   over in-memory bytes (synthetic images, scratch buffers).
//! - [`PagedAddressSpace`], generic over a [`PageWalk`], with the concrete
//!   walkers [`Ia32Walk`] (non-PAE), [`Ia32PaeWalk`] and [`Amd64Walk`].
//!
//! ## Stacking
//!
//! Layer constructors accept or reject the presented base: a paged layer
//! requires a physical base and refuses to stack above another paged
//! layer. Rejection is the [`StackRejection`] error; the stack builder in
//! the session crate treats it as "try the next candidate". Each concrete
//! layer carries a static `ORDER` rank the builder sorts candidates by.
//!
//! ## Reads never tear pages silently
//!
//! Reads atop a paged layer are split at 4 KiB boundaries, each chunk
//! translated independently, and the results concatenated. A chunk that
//! fails to translate stops `read` with [`ReadError::Short`] carrying the
//! bytes gathered so far; `zread` substitutes zeroes and always returns
//! exactly the requested length.

#![allow(clippy::cast_possible_truncation)]

mod amd64;
mod buffer;
mod entry;
mod file_layer;
mod ia32;
mod pae;
mod paged;

use std::sync::Arc;

pub use crate::amd64::Amd64Walk;
pub use crate::buffer::BufferAddressSpace;
pub use crate::entry::{Entry32, Entry64};
pub use crate::file_layer::FileAddressSpace;
pub use crate::ia32::Ia32Walk;
pub use crate::pae::Ia32PaeWalk;
pub use crate::paged::{PageWalk, PagedAddressSpace};
pub use vestige_addr::{MemoryAddress, PhysicalAddress, VirtualAddress};

/// Role a layer plays in the stack.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AsType {
    /// Byte-for-byte view of captured RAM (or the image file itself).
    Physical,
    /// Page-table translated view.
    Virtual,
}

/// A contiguous run of present addresses.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Run {
    pub start: MemoryAddress,
    pub length: u64,
}

impl Run {
    #[inline]
    #[must_use]
    pub const fn new(start: MemoryAddress, length: u64) -> Self {
        Self { start, length }
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: MemoryAddress) -> bool {
        addr >= self.start && addr - self.start < self.length
    }
}

/// Read failure signal.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ReadError {
    /// The read could not be fully satisfied. `got` holds the bytes read
    /// up to the first gap so the caller can decide how to pad.
    #[error("short read at 0x{addr:X}: wanted {wanted} bytes, got {}", got.len())]
    Short {
        addr: MemoryAddress,
        wanted: usize,
        got: Vec<u8>,
    },
}

/// A layer declined to stack on the presented base.
#[derive(Debug, thiserror::Error)]
#[error("{layer} does not stack here: {reason}")]
pub struct StackRejection {
    pub layer: &'static str,
    pub reason: String,
}

impl StackRejection {
    #[must_use]
    pub fn new(layer: &'static str, reason: impl Into<String>) -> Self {
        Self {
            layer,
            reason: reason.into(),
        }
    }
}

/// Shared handle to a stacked layer.
pub type DynAddressSpace = Arc<dyn AddressSpace>;

impl std::fmt::Debug for dyn AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("name", &self.name())
            .field("astype", &self.astype())
            .finish()
    }
}

/// One byte-addressable layer of the stack.
///
/// Implementations are read-dominated and internally synchronized where
/// they share an OS resource (the file layer serializes seek+read on its
/// handle); everything else is immutable after construction.
pub trait AddressSpace: Send + Sync {
    /// Human-readable layer name ("Kernel AS", the image path, …).
    fn name(&self) -> &str;

    /// The role this layer serves.
    fn astype(&self) -> AsType;

    /// The layer below, if any.
    fn base(&self) -> Option<&DynAddressSpace> {
        None
    }

    /// Whether this layer translates through page tables. Paged layers
    /// must not stack above another paged layer.
    fn is_paging(&self) -> bool {
        false
    }

    /// Read exactly `length` bytes at `addr`.
    ///
    /// # Errors
    /// [`ReadError::Short`] when any part of the range is missing; the
    /// error carries the bytes up to the first gap.
    fn read(&self, addr: MemoryAddress, length: usize) -> Result<Vec<u8>, ReadError>;

    /// Total read: missing bytes come back as `0x00`. Always returns
    /// exactly `length` bytes.
    fn zread(&self, addr: MemoryAddress, length: usize) -> Vec<u8> {
        match self.read(addr, length) {
            Ok(data) => data,
            Err(ReadError::Short { mut got, .. }) => {
                got.resize(length, 0);
                got
            }
        }
    }

    /// Whether `addr` falls inside a present run.
    fn is_valid(&self, addr: MemoryAddress) -> bool;

    /// Coalesced runs of present addresses, ascending.
    fn runs(&self) -> Vec<Run>;

    /// Translate to the base layer's addressing. Identity for
    /// non-translating layers; `None` when the page walk dead-ends.
    fn vtop(&self, addr: MemoryAddress) -> Option<MemoryAddress> {
        Some(addr)
    }

    /// Write `data` at `addr`. Returns `false` when writing is disabled
    /// or the target is unreachable. Non-atomic.
    fn write(&self, addr: MemoryAddress, data: &[u8]) -> bool {
        let _ = (addr, data);
        false
    }
}
