//! # Linux Support
//!
//! Per-kernel profile construction from `(vtypes, System.map)` inputs,
//! the intrusive-list behaviors, and symbol-driven DTB discovery. One
//! kernel build, one profile; there is no release catalog to inherit
//! from.

pub mod dtb;
pub mod profiles;
pub mod sysmap;

use std::sync::Arc;

use vestige_obj::Os;
use vestige_session::{Registry, RegistryError};

pub use crate::dtb::{find_verified, suggest_dtb, validate_kernel_space};
pub use crate::profiles::{
    LinuxObjectClasses, LinuxOverlay, LinuxProfileError, kernel_shift, linux_profile,
};
pub use crate::sysmap::{MapSymbol, SystemMap, parse_system_map};

/// Register the Linux components: the modification chain and the
/// symbol-driven DTB finder. Profiles are registered per kernel build
/// by whoever holds the dictionaries.
///
/// # Errors
/// [`RegistryError::Duplicate`] on a name collision.
pub fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    for modification in profiles::modifications() {
        registry.register_modification(modification);
    }
    registry.register_dtb_finder(Arc::new(
        |profile: &Arc<vestige_obj::Profile>,
         physical: &vestige_aspace::DynAddressSpace,
         _session: &vestige_session::Session| {
            if profile.metadata().os != Os::Linux {
                return None;
            }
            find_verified(profile, physical)
        },
    ));
    Ok(())
}
