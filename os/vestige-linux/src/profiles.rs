//! Linux profile composition.
//!
//! There is no fixed Linux release list; every kernel build gets its
//! own profile from a `(vtypes, System.map)` pair. The factory infers
//! the memory model from the map, widens the 64-bit `long`s (Linux is
//! LP64 where the canonical 64-bit table is LLP64), loads the symbols,
//! and runs the Linux modification chain.

use std::sync::Arc;

use vestige_obj::{
    Behavior, Count, MemoryModel, Os, PackFormat, Profile, ProfileBuilder, ProfileError,
    ProfileMetadata, ProfileModification, Overlay, TypeDescriptor, VTypeMap, apply_chain,
};

use crate::sysmap::{SystemMap, parse_system_map};

#[derive(Debug, thiserror::Error)]
pub enum LinuxProfileError {
    #[error("System.map holds no parsable symbol lines")]
    BadSystemMap,
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

/// Attaches the intrusive-list behaviors every kernel structure walk
/// relies on.
pub struct LinuxObjectClasses;

impl ProfileModification for LinuxObjectClasses {
    fn name(&self) -> &'static str {
        "LinuxObjectClasses"
    }

    fn applies(&self, metadata: &ProfileMetadata) -> bool {
        metadata.os == Os::Linux
    }

    fn modify(&self, builder: &mut ProfileBuilder) -> Result<(), ProfileError> {
        builder.set_object_class(
            "list_head",
            Behavior::ListLinks {
                next: "next".into(),
                prev: "prev".into(),
            },
        );
        builder.set_object_class(
            "hlist_node",
            Behavior::ListLinks {
                next: "next".into(),
                prev: "pprev".into(),
            },
        );
        Ok(())
    }
}

/// Tags the fixed-width name buffers as strings.
pub struct LinuxOverlay;

/// `(type, field, window length)` for the standard string fields.
const STRING_FIELDS: &[(&str, &str, u64)] = &[
    ("task_struct", "comm", 16),
    ("module", "name", 60),
    ("super_block", "s_id", 32),
    ("net_device", "name", 16),
    ("sockaddr_un", "sun_path", 108),
    ("cpuinfo_x86", "x86_model_id", 64),
    ("cpuinfo_x86", "x86_vendor_id", 16),
];

impl ProfileModification for LinuxOverlay {
    fn name(&self) -> &'static str {
        "LinuxOverlay"
    }

    fn applies(&self, metadata: &ProfileMetadata) -> bool {
        metadata.os == Os::Linux
    }

    fn before(&self) -> Vec<&'static str> {
        vec!["LinuxObjectClasses"]
    }

    fn modify(&self, builder: &mut ProfileBuilder) -> Result<(), ProfileError> {
        let mut overlay = Overlay::new();
        for &(ty, field, length) in STRING_FIELDS {
            // Dictionaries vary by kernel version and config.
            if builder.has_vtype(ty) {
                overlay = overlay.retype_field(
                    ty,
                    field,
                    TypeDescriptor::String {
                        length: Count::Fixed(length),
                    },
                );
            }
        }
        builder.merge_overlay(overlay);
        Ok(())
    }
}

/// The shared Linux modification chain.
#[must_use]
pub fn modifications() -> Vec<Arc<dyn ProfileModification>> {
    vec![Arc::new(LinuxObjectClasses), Arc::new(LinuxOverlay)]
}

/// Where the kernel image is linked relative to physical zero.
#[must_use]
pub const fn kernel_shift(memory_model: MemoryModel) -> u64 {
    match memory_model {
        MemoryModel::Bits32 => 0xC000_0000,
        MemoryModel::Bits64 => 0xFFFF_FFFF_8000_0000,
    }
}

/// Build a profile for one kernel from its structure dictionary and
/// System.map text.
///
/// # Errors
/// [`LinuxProfileError::BadSystemMap`] when the map parses empty; any
/// compile-time [`ProfileError`].
pub fn linux_profile(
    name: &str,
    vtypes: VTypeMap,
    system_map: &str,
) -> Result<Arc<Profile>, LinuxProfileError> {
    let SystemMap {
        memory_model,
        symbols,
    } = parse_system_map(system_map).ok_or(LinuxProfileError::BadSystemMap)?;

    let mut builder = ProfileBuilder::new(ProfileMetadata {
        name: name.to_string(),
        os: Os::Linux,
        memory_model,
        major: 0,
        minor: 0,
    });

    if memory_model == MemoryModel::Bits64 {
        // LP64: both longs are eight bytes.
        builder.native_mut().set("long", PackFormat::I64);
        builder.native_mut().set("unsigned long", PackFormat::U64);
    }

    builder.add_vtypes(vtypes);
    for symbol in symbols {
        builder.add_symbol("kernel", &symbol.name, symbol.address, symbol.nm_type);
    }
    apply_chain(&mut builder, &modifications())?;
    Ok(builder.compile()?)
}
