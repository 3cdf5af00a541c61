//! Windows profile composition.
//!
//! Concrete profiles are built by a modification chain instead of an
//! inheritance tree: [`WindowsOverlay`] contributes what every NT
//! release shares, [`Win7ObjectHeader`] layers the Windows-7 object
//! header convention on top when the version metadata matches. The
//! structure dictionaries themselves are inputs; factories receive
//! them from the caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use vestige_obj::{
    Behavior, Constant, Count, MemoryModel, OptionalHeadersSpec, Os, Profile, ProfileBuilder,
    ProfileError, ProfileMetadata, ProfileModification, Overlay, TypeDescriptor, VTypeMap,
    apply_chain,
};

/// `_KPROCESS.DirectoryTableBase` preceded by the x86 process state
/// bytes; the needle the DTB scanner anchors on per release family.
pub const DTB_SIGNATURE_VISTA: &[u8] = b"\x03\x00\x20\x00";
pub const DTB_SIGNATURE_WIN7: &[u8] = b"\x03\x00\x26\x00";

/// Shared NT-family adjustments.
pub struct WindowsOverlay;

impl ProfileModification for WindowsOverlay {
    fn name(&self) -> &'static str {
        "WindowsOverlay"
    }

    fn applies(&self, metadata: &ProfileMetadata) -> bool {
        metadata.os == Os::Windows
    }

    fn modify(&self, builder: &mut ProfileBuilder) -> Result<(), ProfileError> {
        let mut overlay = Overlay::new();
        if builder.has_vtype("_EPROCESS") {
            overlay = overlay.retype_field(
                "_EPROCESS",
                "ImageFileName",
                TypeDescriptor::String {
                    length: Count::Fixed(16),
                },
            );
        }
        builder.merge_overlay(overlay);

        builder.set_object_class(
            "_LIST_ENTRY",
            Behavior::ListLinks {
                next: "Flink".into(),
                prev: "Blink".into(),
            },
        );

        let alignment = match builder.metadata().memory_model {
            MemoryModel::Bits32 => 8,
            MemoryModel::Bits64 => 16,
        };
        builder.set_constant("PoolAlignment", Constant::Scalar(alignment));
        builder.set_constant(
            "DTBSignature",
            Constant::Bytes(DTB_SIGNATURE_VISTA.to_vec()),
        );
        Ok(())
    }
}

/// Windows 7 reworked the object header: a single `InfoMask` byte
/// selects which optional headers sit above `_OBJECT_HEADER`, and the
/// object type became an index into a build-specific table.
pub struct Win7ObjectHeader;

impl ProfileModification for Win7ObjectHeader {
    fn name(&self) -> &'static str {
        "Win7ObjectHeader"
    }

    fn applies(&self, metadata: &ProfileMetadata) -> bool {
        metadata.os == Os::Windows && metadata.major == 6 && metadata.minor == 1
    }

    fn after(&self) -> Vec<&'static str> {
        vec!["WindowsOverlay"]
    }

    fn modify(&self, builder: &mut ProfileBuilder) -> Result<(), ProfileError> {
        // The pre-7 header convention does not apply any more.
        builder.remove_object_class("_OBJECT_HEADER");
        builder.set_object_class(
            "_OBJECT_HEADER",
            Behavior::OptionalHeaders(OptionalHeadersSpec {
                mask_field: "InfoMask".into(),
                table: vec![
                    ("_OBJECT_HEADER_CREATOR_INFO".into(), 0x01),
                    ("_OBJECT_HEADER_NAME_INFO".into(), 0x02),
                    ("_OBJECT_HEADER_HANDLE_INFO".into(), 0x04),
                    ("_OBJECT_HEADER_QUOTA_INFO".into(), 0x08),
                    ("_OBJECT_HEADER_PROCESS_INFO".into(), 0x10),
                ],
                type_index_field: "TypeIndex".into(),
                type_map_constant: "TypeIndexMap".into(),
            }),
        );
        builder.set_constant("TypeIndexMap", Constant::IndexMap(win7_type_index_map()));
        builder.set_constant("DTBSignature", Constant::Bytes(DTB_SIGNATURE_WIN7.to_vec()));
        Ok(())
    }
}

/// Object-type indices of the 7600 build.
fn win7_type_index_map() -> BTreeMap<u64, String> {
    [
        (2, "Type"),
        (3, "Directory"),
        (4, "SymbolicLink"),
        (5, "Token"),
        (6, "Job"),
        (7, "Process"),
        (8, "Thread"),
        (9, "UserApcReserve"),
        (10, "IoCompletionReserve"),
        (11, "DebugObject"),
        (12, "Event"),
        (13, "EventPair"),
        (14, "Mutant"),
        (15, "Callback"),
        (16, "Semaphore"),
        (17, "Timer"),
        (18, "Profile"),
        (19, "KeyedEvent"),
        (20, "WindowStation"),
        (21, "Desktop"),
        (22, "TpWorkerFactory"),
        (23, "Adapter"),
        (24, "Controller"),
        (25, "Device"),
        (26, "Driver"),
        (27, "IoCompletion"),
        (28, "File"),
        (29, "TmTm"),
        (30, "TmTx"),
        (31, "TmRm"),
        (32, "TmEn"),
        (33, "Section"),
        (34, "Session"),
        (35, "Key"),
        (36, "ALPC Port"),
        (37, "PowerRequest"),
        (38, "WmiGuid"),
        (39, "EtwRegistration"),
        (40, "EtwConsumer"),
        (41, "FilterConnectionPort"),
        (42, "FilterCommunicationPort"),
        (43, "PcwObject"),
    ]
    .into_iter()
    .map(|(k, v)| (k, v.to_string()))
    .collect()
}

/// The shared Windows modification chain.
#[must_use]
pub fn modifications() -> Vec<Arc<dyn ProfileModification>> {
    vec![Arc::new(WindowsOverlay), Arc::new(Win7ObjectHeader)]
}

fn windows_profile(
    name: &str,
    major: u32,
    minor: u32,
    vtypes: VTypeMap,
) -> Result<Arc<Profile>, ProfileError> {
    let mut builder = ProfileBuilder::new(ProfileMetadata {
        name: name.to_string(),
        os: Os::Windows,
        memory_model: MemoryModel::Bits32,
        major,
        minor,
    });
    builder.add_vtypes(vtypes);
    apply_chain(&mut builder, &modifications())?;
    builder.compile()
}

/// Windows Vista SP0, x86. `vtypes` is the release's structure
/// dictionary (an input produced from the OS symbols).
///
/// # Errors
/// Any compile-time [`ProfileError`].
pub fn vista_sp0_x86(vtypes: VTypeMap) -> Result<Arc<Profile>, ProfileError> {
    windows_profile("VistaSP0x86", 6, 0, vtypes)
}

/// Windows 7 SP0, x86.
///
/// # Errors
/// Any compile-time [`ProfileError`].
pub fn win7_sp0_x86(vtypes: VTypeMap) -> Result<Arc<Profile>, ProfileError> {
    windows_profile("Win7SP0x86", 6, 1, vtypes)
}
