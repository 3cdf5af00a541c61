//! # Profiles
//!
//! A profile is the composed description of one OS release: a memory
//! model, the chosen native-type table, the merged vtype dictionary and
//! overlays, behavior attachments, constants and a symbol table. It is
//! assembled mutably through a [`ProfileBuilder`] (usually by a
//! [modification chain](crate::modification)), then [`compiled`]
//! (`ProfileBuilder::compile`) into an immutable, shareable [`Profile`].
//!
//! ```text
//! native types → vtypes → symbols → modification chain → compile()
//! ```
//!
//! After compile a profile answers `offset_of`/`size_of` from the
//! resolved layouts and materializes [`Object`]s against any address
//! space.
//!
//! [`compiled`]: ProfileBuilder::compile

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use vestige_aspace::DynAddressSpace;

use crate::compile::{StructLayout, compile_layouts};
use crate::native::{NativeTypeTable, PackFormat};
use crate::object::{Object, StructView, ViewCoords};
use crate::symbols::SymbolTable;
use crate::vtypes::{Overlay, TypeDescriptor, VTypeMap};

/// OS family tag used by modification conditions and plugin activation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Os {
    Windows,
    Linux,
    Unknown,
}

/// Pointer and `long` width of the imaged system.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum MemoryModel {
    Bits32,
    Bits64,
}

/// Identity of a profile, visible to modifications and plugins.
#[derive(Clone, Debug)]
pub struct ProfileMetadata {
    pub name: String,
    pub os: Os,
    pub memory_model: MemoryModel,
    pub major: u32,
    pub minor: u32,
}

/// A scalar, byte-string or index-map value attached to a profile.
#[derive(Clone, Debug)]
pub enum Constant {
    Scalar(u64),
    Bytes(Vec<u8>),
    IndexMap(BTreeMap<u64, String>),
}

/// Configuration of the stacked-optional-headers convention (the
/// Windows 7 object header): which mask byte selects sub-headers, the
/// ordered `(sub-header type, mask bit)` table, and where the type
/// index resolves to a name.
#[derive(Clone, Debug)]
pub struct OptionalHeadersSpec {
    pub mask_field: String,
    pub table: Vec<(String, u8)>,
    pub type_index_field: String,
    pub type_map_constant: String,
}

/// Extra semantics attached to a structure type by name.
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Intrusive doubly-linked list links: the member names of the
    /// forward and backward pointers (`next`/`prev`, `Flink`/`Blink`).
    ListLinks { next: String, prev: String },
    /// Optional headers stacked above the structure, selected by mask
    /// bits read at materialization.
    OptionalHeaders(OptionalHeadersSpec),
}

/// Errors raised at profile boundaries (construction, compile, lookup).
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("type {0} is not known to this profile")]
    TypeMissing(String),
    #[error("{0} has no member {1}")]
    FieldMissing(String, String),
    #[error("native type {0} missing from the table")]
    NativeMissing(String),
    #[error("offset 0x{offset:X} is outside every valid run of {aspace}")]
    InvalidAddress { offset: u64, aspace: String },
    #[error("symbol {name} has multiple definitions; disambiguate with an nm type")]
    AmbiguousSymbol { name: String },
    #[error("overlay patches unknown type {0}")]
    OverlayBaseMissing(String),
    #[error("overlay-only field {ty}.{field} needs an explicit offset and type")]
    OverlayFieldNeedsOffset { ty: String, field: String },
    #[error(
        "{ty}.{field} at 0x{offset:X} ({size} bytes) exceeds sizeof({ty}) = {total}"
    )]
    FieldOutOfBounds {
        ty: String,
        field: String,
        offset: u64,
        size: u64,
        total: u64,
    },
    #[error("modification ordering cycle involving {0}")]
    ModificationCycle(String),
}

/// Mutable profile under construction.
pub struct ProfileBuilder {
    metadata: ProfileMetadata,
    native: NativeTypeTable,
    vtypes: VTypeMap,
    overlays: Vec<Overlay>,
    object_classes: BTreeMap<String, Behavior>,
    constants: BTreeMap<String, Constant>,
    symbols: SymbolTable,
}

impl ProfileBuilder {
    /// Start a profile; the native table follows the memory model and
    /// can be specialized afterwards via [`native_mut`](Self::native_mut).
    #[must_use]
    pub fn new(metadata: ProfileMetadata) -> Self {
        let native = match metadata.memory_model {
            MemoryModel::Bits32 => NativeTypeTable::x86(),
            MemoryModel::Bits64 => NativeTypeTable::x64(),
        };
        Self {
            metadata,
            native,
            vtypes: VTypeMap::new(),
            overlays: Vec::new(),
            object_classes: BTreeMap::new(),
            constants: BTreeMap::new(),
            symbols: SymbolTable::default(),
        }
    }

    #[must_use]
    pub const fn metadata(&self) -> &ProfileMetadata {
        &self.metadata
    }

    pub const fn native_mut(&mut self) -> &mut NativeTypeTable {
        &mut self.native
    }

    /// Load (or extend) the structure dictionary.
    pub fn add_vtypes(&mut self, vtypes: VTypeMap) {
        self.vtypes.extend(vtypes);
    }

    /// Whether the dictionary defines `ty`; modifications guard their
    /// patches with this (dictionaries are inputs and vary by release).
    #[must_use]
    pub fn has_vtype(&self, ty: &str) -> bool {
        self.vtypes.contains_key(ty)
    }

    /// Append an overlay; later overlays win at the leaves.
    pub fn merge_overlay(&mut self, overlay: Overlay) {
        self.overlays.push(overlay);
    }

    pub fn set_object_class(&mut self, ty: impl Into<String>, behavior: Behavior) {
        self.object_classes.insert(ty.into(), behavior);
    }

    pub fn remove_object_class(&mut self, ty: &str) {
        self.object_classes.remove(ty);
    }

    pub fn set_constant(&mut self, name: impl Into<String>, value: Constant) {
        self.constants.insert(name.into(), value);
    }

    /// Read a constant set earlier in the chain.
    #[must_use]
    pub fn constant(&self, name: &str) -> Option<&Constant> {
        self.constants.get(name)
    }

    pub fn add_symbol(&mut self, module: &str, name: &str, address: u64, nm_type: char) {
        self.symbols.insert(module, name, address, nm_type);
    }

    /// Resolve overlays into final layouts and freeze.
    ///
    /// # Errors
    /// Any [`ProfileError`] surfaced by layout compilation.
    pub fn compile(self) -> Result<Arc<Profile>, ProfileError> {
        let layouts = compile_layouts(&self.native, &self.vtypes, &self.overlays)?;
        debug!(
            "profile {} compiled: {} types, {} behaviors",
            self.metadata.name,
            layouts.len(),
            self.object_classes.len()
        );
        Ok(Arc::new(Profile {
            metadata: self.metadata,
            native: self.native,
            layouts,
            object_classes: self.object_classes,
            constants: self.constants,
            symbols: self.symbols,
        }))
    }
}

/// An immutable, compiled profile. Shareable across threads.
pub struct Profile {
    metadata: ProfileMetadata,
    native: NativeTypeTable,
    layouts: BTreeMap<String, Arc<StructLayout>>,
    object_classes: BTreeMap<String, Behavior>,
    constants: BTreeMap<String, Constant>,
    symbols: SymbolTable,
}

impl Profile {
    #[must_use]
    pub const fn metadata(&self) -> &ProfileMetadata {
        &self.metadata
    }

    /// `offsetof(ty, field)` from the compiled layout.
    ///
    /// # Errors
    /// [`ProfileError::TypeMissing`], [`ProfileError::FieldMissing`].
    pub fn offset_of(&self, ty: &str, field: &str) -> Result<u64, ProfileError> {
        let layout = self.layout(ty)?;
        layout
            .fields
            .get(field)
            .map(|f| f.offset)
            .ok_or_else(|| ProfileError::FieldMissing(ty.to_string(), field.to_string()))
    }

    /// `sizeof(ty)` from the compiled layout.
    ///
    /// # Errors
    /// [`ProfileError::TypeMissing`].
    pub fn size_of(&self, ty: &str) -> Result<u64, ProfileError> {
        Ok(self.layout(ty)?.size)
    }

    /// Kernel-module symbol address by name.
    ///
    /// # Errors
    /// [`ProfileError::AmbiguousSymbol`] when several definitions exist
    /// and no nm type was given.
    pub fn symbol(&self, name: &str) -> Result<Option<u64>, ProfileError> {
        self.symbols.lookup("kernel", name, None)
    }

    /// Symbol lookup with module and optional nm-type disambiguation.
    ///
    /// # Errors
    /// [`ProfileError::AmbiguousSymbol`].
    pub fn symbol_in(
        &self,
        module: &str,
        name: &str,
        nm_type: Option<char>,
    ) -> Result<Option<u64>, ProfileError> {
        self.symbols.lookup(module, name, nm_type)
    }

    /// The full symbol table (enumeration, next-address sizing).
    #[must_use]
    pub const fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    #[must_use]
    pub fn constant(&self, name: &str) -> Option<&Constant> {
        self.constants.get(name)
    }

    #[must_use]
    pub fn scalar_constant(&self, name: &str) -> Option<u64> {
        match self.constants.get(name) {
            Some(Constant::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn bytes_constant(&self, name: &str) -> Option<&[u8]> {
        match self.constants.get(name) {
            Some(Constant::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn index_map_constant(&self, name: &str) -> Option<&BTreeMap<u64, String>> {
        match self.constants.get(name) {
            Some(Constant::IndexMap(m)) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn behavior(&self, ty: &str) -> Option<&Behavior> {
        self.object_classes.get(ty)
    }

    /// Whether the dictionary defines `ty`.
    #[must_use]
    pub fn has_type(&self, ty: &str) -> bool {
        self.layouts.contains_key(ty)
    }

    pub(crate) fn layout(&self, ty: &str) -> Result<Arc<StructLayout>, ProfileError> {
        self.layouts
            .get(ty)
            .cloned()
            .ok_or_else(|| ProfileError::TypeMissing(ty.to_string()))
    }

    pub(crate) fn native_format(&self, name: &str) -> Option<PackFormat> {
        self.native.get(name)
    }

    /// Static byte size of a descriptor, if known.
    #[must_use]
    pub fn descriptor_byte_size(&self, desc: &TypeDescriptor) -> Option<u64> {
        match desc {
            TypeDescriptor::Primitive(name)
            | TypeDescriptor::BitField { target: name, .. }
            | TypeDescriptor::Enumeration { target: name, .. }
            | TypeDescriptor::Flags { target: name, .. } => self.native.size_of(name),
            TypeDescriptor::Pointer(_) => self.native.size_of("pointer"),
            TypeDescriptor::Array { count, element } => count
                .fixed()
                .and_then(|n| self.descriptor_byte_size(element).map(|elem| n * elem)),
            TypeDescriptor::Struct(name) => self.layouts.get(name).map(|l| l.size),
            TypeDescriptor::String { length } => length.fixed(),
            TypeDescriptor::Void => Some(0),
        }
    }
}

/// Object materialization, implemented on the shared profile handle
/// (views keep a clone of it, so materialization needs the `Arc`).
pub trait ProfileExt {
    /// Materialize a typed view. Strict: `offset` must fall inside a
    /// present run of `aspace`. Pointers found in the view dereference
    /// back into `aspace`.
    ///
    /// # Errors
    /// [`ProfileError::TypeMissing`], [`ProfileError::InvalidAddress`].
    fn object(
        &self,
        ty: &str,
        offset: u64,
        aspace: &DynAddressSpace,
    ) -> Result<Object, ProfileError> {
        self.object_in(ty, offset, aspace, aspace)
    }

    /// [`object`](Self::object) with a separate native space for
    /// pointer targets (materialize in the physical layer, follow
    /// pointers through the kernel AS).
    ///
    /// # Errors
    /// [`ProfileError::TypeMissing`], [`ProfileError::InvalidAddress`].
    fn object_in(
        &self,
        ty: &str,
        offset: u64,
        aspace: &DynAddressSpace,
        native: &DynAddressSpace,
    ) -> Result<Object, ProfileError>;

    /// Non-strict materialization for scanners probing arbitrary
    /// offsets: the valid-run check is skipped, the type must still
    /// exist.
    ///
    /// # Errors
    /// [`ProfileError::TypeMissing`].
    fn probe(&self, ty: &str, offset: u64, aspace: &DynAddressSpace)
    -> Result<Object, ProfileError>;
}

impl ProfileExt for Arc<Profile> {
    fn object_in(
        &self,
        ty: &str,
        offset: u64,
        aspace: &DynAddressSpace,
        native: &DynAddressSpace,
    ) -> Result<Object, ProfileError> {
        if !self.layouts.contains_key(ty) {
            return Err(ProfileError::TypeMissing(ty.to_string()));
        }
        if !aspace.is_valid(offset) {
            return Err(ProfileError::InvalidAddress {
                offset,
                aspace: aspace.name().to_string(),
            });
        }
        Ok(materialize_struct(self, ty, offset, aspace, native))
    }

    fn probe(
        &self,
        ty: &str,
        offset: u64,
        aspace: &DynAddressSpace,
    ) -> Result<Object, ProfileError> {
        if !self.layouts.contains_key(ty) {
            return Err(ProfileError::TypeMissing(ty.to_string()));
        }
        Ok(materialize_struct(self, ty, offset, aspace, aspace))
    }
}

/// Materialize a structure view, consulting the behavior map.
pub(crate) fn materialize_struct(
    profile: &Arc<Profile>,
    ty: &str,
    offset: u64,
    aspace: &DynAddressSpace,
    native: &DynAddressSpace,
) -> Object {
    if !profile.layouts.contains_key(ty) {
        return Object::none(format!("type {ty} is not known to this profile"));
    }
    let mut view = StructView {
        coords: ViewCoords {
            profile: Arc::clone(profile),
            aspace: Arc::clone(aspace),
            native: Arc::clone(native),
            offset,
        },
        type_name: Arc::from(ty),
        attached: Arc::new(BTreeMap::new()),
    };
    if let Some(Behavior::OptionalHeaders(spec)) = profile.behavior(ty) {
        view.attached = Arc::new(attach_optional_headers(profile, &view, spec));
    }
    Object::Struct(view)
}

/// Walk the mask table, subtracting sub-header sizes cumulatively from
/// the header offset; unset bits attach sentinels.
fn attach_optional_headers(
    profile: &Arc<Profile>,
    view: &StructView,
    spec: &OptionalHeadersSpec,
) -> BTreeMap<String, Object> {
    let info_mask = view.field(&spec.mask_field).u64();
    let mut attached = BTreeMap::new();
    let mut offset = view.coords.offset;

    for (header_ty, bit) in &spec.table {
        if info_mask & u64::from(*bit) == 0 {
            attached.insert(header_ty.clone(), Object::none("Header not set"));
            continue;
        }
        let header = match profile.size_of(header_ty) {
            Ok(size) => match offset.checked_sub(size) {
                Some(above) => {
                    offset = above;
                    materialize_struct(
                        profile,
                        header_ty,
                        above,
                        &view.coords.aspace,
                        &view.coords.native,
                    )
                }
                None => Object::none("optional header above the image start"),
            },
            Err(err) => Object::none(err.to_string()),
        };
        attached.insert(header_ty.clone(), header);
    }
    attached
}
