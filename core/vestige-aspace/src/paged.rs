//! Paged-memory plumbing shared by every page-table walker.
//!
//! [`PagedAddressSpace`] owns the parts that are identical across
//! architectures: splitting reads at 4 KiB boundaries, zero-filling,
//! validity by translation, coalescing per-page availability into runs,
//! and write-through to the base. The architecture contributes only a
//! [`PageWalk`].

use log::trace;

use crate::{
    AddressSpace, AsType, DynAddressSpace, MemoryAddress, PhysicalAddress, ReadError, Run,
    StackRejection, VirtualAddress,
};
use vestige_addr::PAGE_SIZE_4K;

/// One architecture's page-table walk.
pub trait PageWalk: Send + Sync {
    /// Layer name used in stack-rejection messages and logs.
    const NAME: &'static str;

    /// Translate a single virtual address, or `None` when the walk
    /// dead-ends on a non-present entry.
    fn vtop(&self, base: &dyn AddressSpace, va: VirtualAddress) -> Option<PhysicalAddress>;

    /// Feed every present page as `(virtual start, length)` to `sink`,
    /// ascending. Large pages come out as one call.
    fn available_pages(&self, base: &dyn AddressSpace, sink: &mut dyn FnMut(u64, u64));
}

/// A virtual layer: a [`PageWalk`] stacked over a physical base.
pub struct PagedAddressSpace<W: PageWalk> {
    base: DynAddressSpace,
    walk: W,
    name: String,
    write_enabled: bool,
}

impl<W: PageWalk> std::fmt::Debug for PagedAddressSpace<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedAddressSpace")
            .field("base", &self.base)
            .field("name", &self.name)
            .field("write_enabled", &self.write_enabled)
            .finish()
    }
}

impl<W: PageWalk> PagedAddressSpace<W> {
    /// Stack `walk` over `base`.
    ///
    /// # Errors
    /// [`StackRejection`] when `base` is not a physical layer or is
    /// itself paged.
    pub fn stack(base: DynAddressSpace, walk: W, write_enabled: bool) -> Result<Self, StackRejection> {
        if base.astype() != AsType::Physical {
            return Err(StackRejection::new(W::NAME, "requires a physical base"));
        }
        if base.is_paging() {
            return Err(StackRejection::new(
                W::NAME,
                "can not stack over another paging address space",
            ));
        }
        Ok(Self {
            base,
            walk,
            name: "Kernel AS".into(),
            write_enabled,
        })
    }

    /// Override the default "Kernel AS" display name (per-process
    /// spaces and the like).
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn read_chunk(&self, vaddr: MemoryAddress, length: usize) -> Option<Vec<u8>> {
        let paddr = self.walk.vtop(&*self.base, VirtualAddress::new(vaddr))?;
        if !self.base.is_valid(paddr.as_u64()) {
            return None;
        }
        self.base.read(paddr.as_u64(), length).ok()
    }
}

impl<W: PageWalk> AddressSpace for PagedAddressSpace<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn astype(&self) -> AsType {
        AsType::Virtual
    }

    fn base(&self) -> Option<&DynAddressSpace> {
        Some(&self.base)
    }

    fn is_paging(&self) -> bool {
        true
    }

    fn vtop(&self, addr: MemoryAddress) -> Option<MemoryAddress> {
        self.walk
            .vtop(&*self.base, VirtualAddress::new(addr))
            .map(PhysicalAddress::as_u64)
    }

    fn read(&self, addr: MemoryAddress, length: usize) -> Result<Vec<u8>, ReadError> {
        // The walk adds the in-page offset itself, so chunking at 4 KiB
        // is correct even inside large pages.
        let mut out = Vec::with_capacity(length);
        let mut vaddr = addr;
        let mut remaining = length;

        while remaining > 0 {
            let chunk_len = remaining.min((PAGE_SIZE_4K - (vaddr % PAGE_SIZE_4K)) as usize);
            match self.read_chunk(vaddr, chunk_len) {
                Some(chunk) => out.extend_from_slice(&chunk),
                None => {
                    trace!("{}: translation gap at 0x{vaddr:X}", self.name);
                    return Err(ReadError::Short {
                        addr,
                        wanted: length,
                        got: out,
                    });
                }
            }
            vaddr += chunk_len as u64;
            remaining -= chunk_len;
        }
        Ok(out)
    }

    fn zread(&self, addr: MemoryAddress, length: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(length);
        let mut vaddr = addr;
        let mut remaining = length;

        while remaining > 0 {
            let chunk_len = remaining.min((PAGE_SIZE_4K - (vaddr % PAGE_SIZE_4K)) as usize);
            match self.read_chunk(vaddr, chunk_len) {
                Some(chunk) => out.extend_from_slice(&chunk),
                None => out.resize(out.len() + chunk_len, 0),
            }
            vaddr += chunk_len as u64;
            remaining -= chunk_len;
        }
        out
    }

    fn is_valid(&self, addr: MemoryAddress) -> bool {
        self.vtop(addr)
            .is_some_and(|paddr| self.base.is_valid(paddr))
    }

    fn runs(&self) -> Vec<Run> {
        // Adjacent pages coalesce into one run.
        let mut runs = Vec::new();
        let mut current: Option<Run> = None;
        self.walk.available_pages(&*self.base, &mut |start, len| {
            match current {
                Some(ref mut run) if run.start + run.length == start => run.length += len,
                Some(run) => {
                    runs.push(run);
                    current = Some(Run::new(start, len));
                }
                None => current = Some(Run::new(start, len)),
            }
        });
        if let Some(run) = current {
            runs.push(run);
        }
        runs
    }

    fn write(&self, addr: MemoryAddress, data: &[u8]) -> bool {
        if !self.write_enabled {
            return false;
        }
        let mut vaddr = addr;
        let mut rest = data;
        while !rest.is_empty() {
            let chunk_len = rest
                .len()
                .min((PAGE_SIZE_4K - (vaddr % PAGE_SIZE_4K)) as usize);
            let Some(paddr) = self.vtop(vaddr) else {
                return false;
            };
            if !self.base.write(paddr, &rest[..chunk_len]) {
                return false;
            }
            vaddr += chunk_len as u64;
            rest = &rest[chunk_len..];
        }
        true
    }
}

/// Little-endian u32 table-entry fetch from the base layer.
pub(crate) fn read_entry32(base: &dyn AddressSpace, addr: u64) -> Option<u32> {
    let bytes = base.read(addr, 4).ok()?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// Little-endian u64 table-entry fetch from the base layer.
pub(crate) fn read_entry64(base: &dyn AddressSpace, addr: u64) -> Option<u64> {
    let bytes = base.read(addr, 8).ok()?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}
