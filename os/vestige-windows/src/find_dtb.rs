//! Directory-table-base discovery.
//!
//! Scans the physical layer for a well-known kernel process image name
//! padded to its 16-byte field, rebases each hit to an `_EPROCESS`, and
//! reads `Pcb.DirectoryTableBase` as a candidate. A candidate counts
//! only after verification: stack a virtual layer with it, follow the
//! process's thread list one link forward and one back, and require
//! the round trip to land on the original pointer.

use std::sync::Arc;

use log::{debug, info};
use vestige_aspace::{
    Amd64Walk, DynAddressSpace, Ia32PaeWalk, Ia32Walk, PagedAddressSpace,
};
use vestige_obj::{MemoryModel, Object, Profile, ProfileError, ProfileExt};
use vestige_scan::{PoolScanner, PoolTagCheck, ScanContext};

/// The image name every NT kernel carries.
pub const DEFAULT_PROCESS_NAME: &str = "Idle";

/// Width of `_EPROCESS.ImageFileName`.
const IMAGE_NAME_LEN: usize = 16;

pub struct WinFindDtb {
    profile: Arc<Profile>,
    physical: DynAddressSpace,
    image_name_offset: u64,
    needle: Vec<u8>,
}

impl WinFindDtb {
    /// Prepare a scan for `process_name` (usually
    /// [`DEFAULT_PROCESS_NAME`]).
    ///
    /// # Errors
    /// [`ProfileError`] when the profile lacks the `_EPROCESS` layout.
    pub fn new(
        profile: Arc<Profile>,
        physical: DynAddressSpace,
        process_name: &str,
    ) -> Result<Self, ProfileError> {
        let image_name_offset = profile.offset_of("_EPROCESS", "ImageFileName")?;
        let mut needle = process_name.as_bytes().to_vec();
        needle.resize(IMAGE_NAME_LEN, 0);
        Ok(Self {
            profile,
            physical,
            image_name_offset,
            needle,
        })
    }

    /// Candidate `_EPROCESS` views, one per needle hit.
    #[must_use]
    pub fn process_hits(&self) -> Vec<Object> {
        let ctx = ScanContext {
            profile: Arc::clone(&self.profile),
            aspace: Arc::clone(&self.physical),
        };
        let scanner = PoolScanner::new(vec![Box::new(PoolTagCheck::new(&self.needle))]);
        let Ok(hits) = scanner.scan(&ctx) else {
            return Vec::new();
        };
        hits.filter_map(|hit| {
            let base = hit.checked_sub(self.image_name_offset)?;
            self.profile.probe("_EPROCESS", base, &self.physical).ok()
        })
        .collect()
    }

    /// Candidate `(process, dtb)` pairs with a nonzero table base.
    #[must_use]
    pub fn dtb_hits(&self) -> Vec<(Object, u64)> {
        self.process_hits()
            .into_iter()
            .filter_map(|proc| {
                let dtb = proc.field("Pcb").field("DirectoryTableBase").u64();
                (dtb != 0).then_some((proc, dtb))
            })
            .collect()
    }

    /// Reflect the process's thread list through `kernel`: one link
    /// forward, one back, and the far end's forward pointer must equal
    /// the pointer we started from.
    #[must_use]
    pub fn verify(eprocess: &Object, kernel: &DynAddressSpace) -> bool {
        let flink = eprocess.field("ThreadListHead").field("Flink");
        let target = flink.u64();
        if target == 0 {
            return false;
        }
        let entry = flink.deref_in(kernel);
        let back_head = entry.field("Blink").deref_in(kernel);
        back_head.field("Flink").u64() == target
    }

    /// Virtual layers worth trying for a candidate DTB, given the
    /// profile's memory model.
    fn candidate_spaces(&self, dtb: u64) -> Vec<DynAddressSpace> {
        let mut spaces: Vec<DynAddressSpace> = Vec::new();
        match self.profile.metadata().memory_model {
            MemoryModel::Bits64 => {
                if let Ok(space) =
                    PagedAddressSpace::stack(Arc::clone(&self.physical), Amd64Walk::new(dtb), false)
                {
                    spaces.push(Arc::new(space));
                }
            }
            MemoryModel::Bits32 => {
                if let Ok(space) =
                    PagedAddressSpace::stack(Arc::clone(&self.physical), Ia32Walk::new(dtb), false)
                {
                    spaces.push(Arc::new(space));
                }
                if let Ok(space) = PagedAddressSpace::stack(
                    Arc::clone(&self.physical),
                    Ia32PaeWalk::new(dtb),
                    false,
                ) {
                    spaces.push(Arc::new(space));
                }
            }
        }
        spaces
    }

    /// First candidate DTB that survives verification.
    #[must_use]
    pub fn find_verified(&self) -> Option<u64> {
        for (eprocess, dtb) in self.dtb_hits() {
            debug!(
                "DTB candidate 0x{dtb:X} from _EPROCESS at 0x{:X}",
                eprocess.offset()
            );
            for kernel in self.candidate_spaces(dtb) {
                if Self::verify(&eprocess, &kernel) {
                    info!("DTB 0x{dtb:X} verified through the thread list");
                    return Some(dtb);
                }
            }
        }
        None
    }
}
