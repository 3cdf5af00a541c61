//! Linux DTB suggestion and kernel-space validation.
//!
//! The kernel's own page directory is a linked symbol:
//! `swapper_pg_dir` minus the kernel shift is the physical DTB. A
//! stacked space is then validated against the static mapping of
//! `init_task`: translating its virtual address must land exactly
//! `shift` bytes lower in physical memory.

use std::sync::Arc;

use log::debug;
use vestige_aspace::{
    Amd64Walk, AddressSpace, DynAddressSpace, Ia32PaeWalk, Ia32Walk, PagedAddressSpace,
};
use vestige_obj::{MemoryModel, Profile};

use crate::profiles::kernel_shift;

/// The physical DTB implied by the symbol table, if present.
#[must_use]
pub fn suggest_dtb(profile: &Profile) -> Option<u64> {
    let swapper = profile.symbol("swapper_pg_dir").ok().flatten()?;
    let dtb = swapper.checked_sub(kernel_shift(profile.metadata().memory_model))?;
    debug!("swapper_pg_dir 0x{swapper:X} suggests DTB 0x{dtb:X}");
    Some(dtb)
}

/// Check the static kernel mapping: `vtop(init_task)` must equal
/// `init_task - shift`.
#[must_use]
pub fn validate_kernel_space(profile: &Profile, kernel: &dyn AddressSpace) -> bool {
    let Ok(Some(init_task)) = profile.symbol("init_task") else {
        return false;
    };
    let shift = kernel_shift(profile.metadata().memory_model);
    init_task
        .checked_sub(shift)
        .is_some_and(|expected| kernel.vtop(init_task) == Some(expected))
}

/// Suggest a DTB and keep it only when a walker stacked with it passes
/// the `init_task` check.
#[must_use]
pub fn find_verified(profile: &Arc<Profile>, physical: &DynAddressSpace) -> Option<u64> {
    let dtb = suggest_dtb(profile)?;

    let candidates: Vec<DynAddressSpace> = match profile.metadata().memory_model {
        MemoryModel::Bits64 => PagedAddressSpace::stack(
            Arc::clone(physical),
            Amd64Walk::new(dtb),
            false,
        )
        .map(|space| vec![Arc::new(space) as DynAddressSpace])
        .unwrap_or_default(),
        MemoryModel::Bits32 => {
            let mut spaces: Vec<DynAddressSpace> = Vec::new();
            if let Ok(space) =
                PagedAddressSpace::stack(Arc::clone(physical), Ia32Walk::new(dtb), false)
            {
                spaces.push(Arc::new(space));
            }
            if let Ok(space) =
                PagedAddressSpace::stack(Arc::clone(physical), Ia32PaeWalk::new(dtb), false)
            {
                spaces.push(Arc::new(space));
            }
            spaces
        }
    };

    candidates
        .iter()
        .any(|kernel| validate_kernel_space(profile, &**kernel))
        .then_some(dtb)
}
