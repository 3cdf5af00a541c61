//! # Windows Support
//!
//! Everything the core needs to interpret NT-family images: profile
//! composition for the supported releases, the pool-header checks and
//! scanner configurations, object-header conventions, and DTB
//! discovery. Registered explicitly into a session
//! [`Registry`](vestige_session::Registry); all components decline to
//! act on non-Windows profiles.

pub mod find_dtb;
pub mod pool;
pub mod process;
pub mod profiles;

use std::sync::Arc;

use vestige_obj::Os;
use vestige_session::{Registry, RegistryError};

pub use crate::find_dtb::{DEFAULT_PROCESS_NAME, WinFindDtb};
pub use crate::pool::{
    CheckPoolIndex, CheckPoolSize, CheckPoolType, object_base_from_hit, object_header_offset,
    pool_header, pool_scan_driver, pool_scan_file, pool_scan_mutant,
};
pub use crate::process::virtual_process_from_physical;
pub use crate::profiles::{
    DTB_SIGNATURE_VISTA, DTB_SIGNATURE_WIN7, Win7ObjectHeader, WindowsOverlay, vista_sp0_x86,
    win7_sp0_x86,
};

/// Register the Windows components: modifications, scanner-check
/// descriptors and the DTB finder. Profile factories are registered
/// separately because the structure dictionaries are inputs.
///
/// # Errors
/// [`RegistryError::Duplicate`] on a name collision.
pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    for modification in profiles::modifications() {
        registry.register_modification(modification);
    }

    registry.register_check("PoolTagCheck", "constant pool-tag signature")?;
    registry.register_check("CheckPoolSize", "pool allocation size bound")?;
    registry.register_check("CheckPoolType", "paged/non-paged/free pool class")?;
    registry.register_check("CheckPoolIndex", "pool descriptor index")?;

    registry.register_dtb_finder(Arc::new(
        |profile: &Arc<vestige_obj::Profile>,
         physical: &vestige_aspace::DynAddressSpace,
         _session: &vestige_session::Session| {
            if profile.metadata().os != Os::Windows {
                return None;
            }
            WinFindDtb::new(Arc::clone(profile), Arc::clone(physical), DEFAULT_PROCESS_NAME)
                .ok()?
                .find_verified()
        },
    ));
    Ok(())
}
