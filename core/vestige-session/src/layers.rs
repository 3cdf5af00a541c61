//! Built-in layer registrations.
//!
//! The file layer and the three x86 page walkers, wired into the
//! registry's ordering scheme. Virtual layers take the session DTB
//! when one is given, otherwise fall back to whatever OS-specific
//! finder the registry carries; with neither, they decline and the
//! virtual role stays unsatisfied.

use std::sync::Arc;

use vestige_aspace::{
    Amd64Walk, AsType, DynAddressSpace, FileAddressSpace, Ia32PaeWalk, Ia32Walk, MemoryAddress,
    PagedAddressSpace, StackRejection,
};

use crate::registry::{LayerEntry, Registry, RegistryError};
use crate::stack::StackContext;

/// Register the file layer and the x86 paged layers.
///
/// # Errors
/// [`RegistryError::Duplicate`] when any of the names is taken.
pub fn register_core_layers(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register_layer(LayerEntry {
        name: "FileAddressSpace",
        order: FileAddressSpace::ORDER,
        astype: AsType::Physical,
        is_active: |_| true,
        factory: Arc::new(|base: Option<DynAddressSpace>, ctx: &StackContext<'_>| {
            if base.is_some() {
                return Err(StackRejection::new(
                    "FileAddressSpace",
                    "must be first in the stack",
                ));
            }
            let Some(path) = ctx.session.filename.as_deref() else {
                return Err(StackRejection::new(
                    "FileAddressSpace",
                    "no filename in the session",
                ));
            };
            FileAddressSpace::open(path, ctx.session.write)
                .map(|layer| Arc::new(layer) as _)
                .map_err(|err| {
                    StackRejection::new("FileAddressSpace", format!("open failed: {err}"))
                })
        }),
    })?;

    register_walker(registry, "AMD64PagedMemory", Amd64Walk::ORDER, |dtb| {
        WalkerKind::Amd64(Amd64Walk::new(dtb))
    })?;
    register_walker(registry, "IA32PagedMemory", Ia32Walk::ORDER, |dtb| {
        WalkerKind::Ia32(Ia32Walk::new(dtb))
    })?;
    register_walker(registry, "IA32PagedMemoryPae", Ia32PaeWalk::ORDER, |dtb| {
        WalkerKind::Pae(Ia32PaeWalk::new(dtb))
    })?;
    Ok(())
}

enum WalkerKind {
    Ia32(Ia32Walk),
    Pae(Ia32PaeWalk),
    Amd64(Amd64Walk),
}

fn register_walker(
    registry: &mut Registry,
    name: &'static str,
    order: u16,
    make: fn(MemoryAddress) -> WalkerKind,
) -> Result<(), RegistryError> {
    registry.register_layer(LayerEntry {
        name,
        order,
        astype: AsType::Virtual,
        is_active: |_| true,
        factory: Arc::new(move |base: Option<DynAddressSpace>, ctx: &StackContext<'_>| {
            let base = base.ok_or_else(|| StackRejection::new(name, "no base address space"))?;
            if ctx.astype != AsType::Virtual {
                return Err(StackRejection::new(name, "only stacks for a virtual role"));
            }
            if !walker_matches(ctx, name) {
                return Err(StackRejection::new(name, "profile prefers another walker"));
            }
            let dtb = ctx
                .resolve_dtb(&base)
                .ok_or_else(|| StackRejection::new(name, "no DTB specified or discovered"))?;
            let write = ctx.session.write;
            Ok(match make(dtb) {
                WalkerKind::Ia32(walk) => {
                    Arc::new(PagedAddressSpace::stack(base, walk, write)?) as _
                }
                WalkerKind::Pae(walk) => Arc::new(PagedAddressSpace::stack(base, walk, write)?) as _,
                WalkerKind::Amd64(walk) => {
                    Arc::new(PagedAddressSpace::stack(base, walk, write)?) as _
                }
            })
        }),
    })
}

/// A profile pins the paging flavor: 64-bit models take the long-mode
/// walker, 32-bit ones the IA32 family (PAE preferred by order, with
/// the profile able to veto it via the `PaeDisabled` constant).
fn walker_matches(ctx: &StackContext<'_>, name: &str) -> bool {
    use vestige_obj::MemoryModel;

    let Some(profile) = ctx.profile else {
        // No profile selected: any walker may try.
        return true;
    };
    match profile.metadata().memory_model {
        MemoryModel::Bits64 => name == "AMD64PagedMemory",
        MemoryModel::Bits32 => {
            if name == "AMD64PagedMemory" {
                return false;
            }
            let pae_disabled = profile.scalar_constant("PaeDisabled") == Some(1);
            !(pae_disabled && name == "IA32PagedMemoryPae")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack;
    use crate::Session;
    use vestige_aspace::AddressSpace;
    use std::io::Write as _;
    use std::path::PathBuf;

    fn temp_image(bytes: &[u8]) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("vestige-layers-{}.img", std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn file_plus_walker_stacks_from_a_session() {
        // Non-PAE tables: dtb 0x0, PDE[0] -> PT at 0x1000, PTE[0] ->
        // frame 0x2000.
        let mut image = vec![0u8; 0x3000];
        image[0..4].copy_from_slice(&0x1001u32.to_le_bytes());
        image[0x1000..0x1004].copy_from_slice(&0x2001u32.to_le_bytes());
        image[0x2000] = 0x77;
        let path = temp_image(&image);

        let mut registry = Registry::new();
        register_core_layers(&mut registry).unwrap();

        let session = Session::new(&path).with_dtb(0);
        let physical = stack::build(&registry, &session, None, AsType::Physical).unwrap();
        assert_eq!(physical.read(0x2000, 1).unwrap(), vec![0x77]);

        // Without a profile the lowest-order walker stacks first;
        // which one can translate is a profile question, so only the
        // role is asserted here.
        let kernel = stack::build(&registry, &session, None, AsType::Virtual).unwrap();
        assert_eq!(kernel.astype(), AsType::Virtual);

        std::fs::remove_file(&path).ok();
    }
}
