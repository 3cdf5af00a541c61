//! Overlay resolution into final per-type layouts.
//!
//! Runs once, at the end of profile construction. Applies the merged
//! overlay chain to the vtype dictionary, records `offsetof`/`sizeof`
//! for every type, and verifies each sized field fits inside its
//! structure's declared size. Fields whose size cannot be known up
//! front (dependent counts, references to types outside the dictionary)
//! are exempt from the fit check.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;

use crate::native::NativeTypeTable;
use crate::profile::ProfileError;
use crate::vtypes::{Overlay, TypeDescriptor, VTypeMap};

/// Final placement of one field.
#[derive(Clone, Debug)]
pub struct FieldLayout {
    pub offset: u64,
    pub descriptor: TypeDescriptor,
}

/// Final layout of one structure.
#[derive(Clone, Debug)]
pub struct StructLayout {
    pub size: u64,
    pub fields: BTreeMap<String, FieldLayout>,
}

/// Size in bytes of a field described by `desc`, if statically known.
///
/// # Errors
/// [`ProfileError::NativeMissing`] when a referenced primitive is not
/// in the native table.
pub(crate) fn descriptor_size(
    native: &NativeTypeTable,
    sizes: &BTreeMap<String, u64>,
    desc: &TypeDescriptor,
) -> Result<Option<u64>, ProfileError> {
    let size = match desc {
        TypeDescriptor::Primitive(name)
        | TypeDescriptor::BitField { target: name, .. }
        | TypeDescriptor::Enumeration { target: name, .. }
        | TypeDescriptor::Flags { target: name, .. } => Some(
            native
                .size_of(name)
                .ok_or_else(|| ProfileError::NativeMissing(name.clone()))?,
        ),
        TypeDescriptor::Pointer(_) => Some(
            native
                .size_of("pointer")
                .ok_or_else(|| ProfileError::NativeMissing("pointer".into()))?,
        ),
        TypeDescriptor::Array { count, element } => match count.fixed() {
            Some(n) => descriptor_size(native, sizes, element)?.map(|elem| n * elem),
            None => None,
        },
        TypeDescriptor::Struct(name) => sizes.get(name).copied(),
        TypeDescriptor::String { length } => length.fixed(),
        TypeDescriptor::Void => Some(0),
    };
    Ok(size)
}

/// Apply `overlays` to `vtypes` and produce the final layouts.
pub(crate) fn compile_layouts(
    native: &NativeTypeTable,
    vtypes: &VTypeMap,
    overlays: &[Overlay],
) -> Result<BTreeMap<String, Arc<StructLayout>>, ProfileError> {
    // Collapse the chain; later overlays win at the leaves.
    let mut merged = Overlay::new();
    for overlay in overlays {
        merged.merge(overlay.clone());
    }

    for ty in merged.types.keys() {
        if !vtypes.contains_key(ty) {
            return Err(ProfileError::OverlayBaseMissing(ty.clone()));
        }
    }

    // Pass one: final sizes, so nested-struct fields can be checked.
    let mut sizes = BTreeMap::new();
    for (name, vtype) in vtypes {
        let size = merged
            .types
            .get(name)
            .and_then(|patch| patch.size)
            .unwrap_or(vtype.size);
        sizes.insert(name.clone(), size);
    }

    // Pass two: field placement and fit verification.
    let mut layouts = BTreeMap::new();
    for (name, vtype) in vtypes {
        let size = sizes[name];
        let patch = merged.types.get(name);
        let mut fields = BTreeMap::new();

        for (field, (offset, descriptor)) in &vtype.fields {
            let fp = patch.and_then(|p| p.fields.get(field));
            let offset = fp.and_then(|p| p.offset).unwrap_or(*offset);
            let descriptor = fp
                .and_then(|p| p.descriptor.clone())
                .unwrap_or_else(|| descriptor.clone());
            fields.insert(field.clone(), FieldLayout { offset, descriptor });
        }

        // Overlay-only fields are appended and must say where they live.
        if let Some(patch) = patch {
            for (field, fp) in &patch.fields {
                if fields.contains_key(field) {
                    continue;
                }
                let offset = fp.offset.ok_or_else(|| ProfileError::OverlayFieldNeedsOffset {
                    ty: name.clone(),
                    field: field.clone(),
                })?;
                let descriptor =
                    fp.descriptor
                        .clone()
                        .ok_or_else(|| ProfileError::OverlayFieldNeedsOffset {
                            ty: name.clone(),
                            field: field.clone(),
                        })?;
                fields.insert(field.clone(), FieldLayout { offset, descriptor });
            }
        }

        for (field, layout) in &fields {
            match descriptor_size(native, &sizes, &layout.descriptor)? {
                Some(field_size) => {
                    if layout.offset + field_size > size {
                        return Err(ProfileError::FieldOutOfBounds {
                            ty: name.clone(),
                            field: field.clone(),
                            offset: layout.offset,
                            size: field_size,
                            total: size,
                        });
                    }
                }
                None => debug!("{name}.{field}: size not statically known, fit check skipped"),
            }
        }

        layouts.insert(name.clone(), Arc::new(StructLayout { size, fields }));
    }

    Ok(layouts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vtypes::VType;

    fn base() -> VTypeMap {
        let mut vtypes = VTypeMap::new();
        vtypes.insert(
            "_DEMO".into(),
            VType::new(16)
                .with_field("Alpha", 0, TypeDescriptor::primitive("unsigned long"))
                .with_field("Beta", 4, TypeDescriptor::primitive("unsigned long")),
        );
        vtypes
    }

    #[test]
    fn overlay_patch_and_append() {
        let native = NativeTypeTable::x86();
        let overlay = Overlay::new()
            .retype_field("_DEMO", "Beta", TypeDescriptor::primitive("unsigned short"))
            .place_field("_DEMO", "Gamma", 8, TypeDescriptor::primitive("unsigned long long"));

        let layouts = compile_layouts(&native, &base(), &[overlay]).unwrap();
        let demo = &layouts["_DEMO"];
        assert_eq!(demo.size, 16);
        assert_eq!(demo.fields["Beta"].offset, 4);
        assert!(matches!(
            demo.fields["Beta"].descriptor,
            TypeDescriptor::Primitive(ref p) if p == "unsigned short"
        ));
        assert_eq!(demo.fields["Gamma"].offset, 8);
    }

    #[test]
    fn overlay_only_field_needs_offset() {
        let native = NativeTypeTable::x86();
        let overlay = Overlay::new().retype_field("_DEMO", "Delta", TypeDescriptor::primitive("int"));
        let err = compile_layouts(&native, &base(), &[overlay]).unwrap_err();
        assert!(matches!(err, ProfileError::OverlayFieldNeedsOffset { .. }));
    }

    #[test]
    fn field_fit_is_enforced() {
        let native = NativeTypeTable::x86();
        let overlay =
            Overlay::new().place_field("_DEMO", "Tail", 12, TypeDescriptor::primitive("unsigned long long"));
        let err = compile_layouts(&native, &base(), &[overlay]).unwrap_err();
        assert!(matches!(err, ProfileError::FieldOutOfBounds { .. }));
    }

    #[test]
    fn unknown_patched_type_is_fatal() {
        let native = NativeTypeTable::x86();
        let overlay = Overlay::new().resize_type("_MISSING", 8);
        let err = compile_layouts(&native, &base(), &[overlay]).unwrap_err();
        assert!(matches!(err, ProfileError::OverlayBaseMissing(ref t) if t == "_MISSING"));
    }
}
