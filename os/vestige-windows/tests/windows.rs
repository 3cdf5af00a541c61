//! Windows end-to-end behavior over synthetic images: the Windows-7
//! object-header convention, pool scanning, DTB discovery and the
//! full registry-assembled stack.

use std::sync::Arc;

use vestige_aspace::{AddressSpace, AsType, BufferAddressSpace, DynAddressSpace};
use vestige_obj::{Count, ProfileExt, TypeDescriptor, VType, VTypeMap};
use vestige_scan::ScanContext;
use vestige_session::{Registry, Session, register_core_layers, stack};
use vestige_windows::{
    WinFindDtb, object_base_from_hit, pool_scan_file, virtual_process_from_physical, win7_sp0_x86,
};

fn u16_field(start: u32, end: u32) -> TypeDescriptor {
    TypeDescriptor::BitField {
        start_bit: start,
        end_bit: end,
        target: "unsigned short".into(),
    }
}

/// A hand-built subset of the Win7 SP0 x86 dictionary; real runs feed
/// the full release dictionary in through the same factory.
fn fixture_vtypes() -> VTypeMap {
    let mut map = VTypeMap::new();
    map.insert(
        "_LIST_ENTRY".into(),
        VType::new(8)
            .with_field("Flink", 0, TypeDescriptor::pointer_to("_LIST_ENTRY"))
            .with_field("Blink", 4, TypeDescriptor::pointer_to("_LIST_ENTRY")),
    );
    map.insert(
        "_KPROCESS".into(),
        VType::new(0x20).with_field(
            "DirectoryTableBase",
            0x18,
            TypeDescriptor::primitive("unsigned long"),
        ),
    );
    map.insert(
        "_EPROCESS".into(),
        VType::new(0x100)
            .with_field("Pcb", 0, TypeDescriptor::Struct("_KPROCESS".into()))
            .with_field(
                "ActiveProcessLinks",
                0x20,
                TypeDescriptor::Struct("_LIST_ENTRY".into()),
            )
            .with_field(
                "ImageFileName",
                0x2C,
                TypeDescriptor::Array {
                    count: Count::Fixed(16),
                    element: Box::new(TypeDescriptor::primitive("char")),
                },
            )
            .with_field(
                "ThreadListHead",
                0x50,
                TypeDescriptor::Struct("_LIST_ENTRY".into()),
            )
            .with_field(
                "UniqueProcessId",
                0x60,
                TypeDescriptor::primitive("unsigned long"),
            ),
    );
    map.insert(
        "_POOL_HEADER".into(),
        VType::new(8)
            .with_field("PreviousSize", 0, u16_field(0, 9))
            .with_field("PoolIndex", 0, u16_field(9, 16))
            .with_field("BlockSize", 2, u16_field(0, 9))
            .with_field("PoolType", 2, u16_field(9, 16))
            .with_field("PoolTag", 4, TypeDescriptor::primitive("unsigned long")),
    );
    map.insert(
        "_OBJECT_HEADER".into(),
        VType::new(0x20)
            .with_field("PointerCount", 0, TypeDescriptor::primitive("long"))
            .with_field("HandleCount", 4, TypeDescriptor::primitive("long"))
            .with_field(
                "TypeIndex",
                0xC,
                TypeDescriptor::primitive("unsigned char"),
            )
            .with_field("InfoMask", 0xE, TypeDescriptor::primitive("unsigned char"))
            .with_field("Body", 0x18, TypeDescriptor::Void),
    );
    map.insert(
        "_UNICODE_STRING".into(),
        VType::new(8)
            .with_field("Length", 0, TypeDescriptor::primitive("unsigned short"))
            .with_field(
                "MaximumLength",
                2,
                TypeDescriptor::primitive("unsigned short"),
            )
            .with_field("Buffer", 4, TypeDescriptor::Pointer(Box::new(TypeDescriptor::Void))),
    );
    for (name, size) in [
        ("_OBJECT_HEADER_CREATOR_INFO", 0x10u64),
        ("_OBJECT_HEADER_NAME_INFO", 0x10),
        ("_OBJECT_HEADER_HANDLE_INFO", 0x8),
        ("_OBJECT_HEADER_QUOTA_INFO", 0x10),
        ("_OBJECT_HEADER_PROCESS_INFO", 0x8),
    ] {
        map.insert(name.into(), VType::new(size));
    }
    map.insert(
        "_FILE_OBJECT".into(),
        VType::new(0x80)
            .with_field("Type", 0, TypeDescriptor::primitive("short"))
            .with_field(
                "FileName",
                0x30,
                TypeDescriptor::Struct("_UNICODE_STRING".into()),
            ),
    );
    map
}

fn put_u16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Windows 7 object header with `InfoMask = 0x03`: creator info and
/// name info stacked above, cumulatively.
#[test]
fn optional_headers_stack_above_the_object_header() {
    let profile = win7_sp0_x86(fixture_vtypes()).unwrap();
    let mut image = vec![0u8; 0x2000];
    image[0x100C] = 28; // TypeIndex: File
    image[0x100E] = 0x03; // InfoMask: creator | name
    let aspace: DynAddressSpace = Arc::new(BufferAddressSpace::with_data(image, 0));

    let header = profile.object("_OBJECT_HEADER", 0x1000, &aspace).unwrap();

    let creator = header.field("_OBJECT_HEADER_CREATOR_INFO");
    assert_eq!(creator.offset(), 0x1000 - 0x10);
    let name = header.field("_OBJECT_HEADER_NAME_INFO");
    assert_eq!(name.offset(), 0x1000 - 0x10 - 0x10);

    // Unselected headers absorb access.
    assert!(header.field("_OBJECT_HEADER_HANDLE_INFO").is_none());
    assert!(header.field("_OBJECT_HEADER_QUOTA_INFO").is_none());
    assert!(header.field("_OBJECT_HEADER_PROCESS_INFO").is_none());
}

#[test]
fn empty_info_mask_attaches_only_sentinels() {
    let profile = win7_sp0_x86(fixture_vtypes()).unwrap();
    let image = vec![0u8; 0x2000];
    let aspace: DynAddressSpace = Arc::new(BufferAddressSpace::with_data(image, 0));

    let header = profile.object("_OBJECT_HEADER", 0x1000, &aspace).unwrap();
    for name in [
        "_OBJECT_HEADER_CREATOR_INFO",
        "_OBJECT_HEADER_NAME_INFO",
        "_OBJECT_HEADER_HANDLE_INFO",
        "_OBJECT_HEADER_QUOTA_INFO",
        "_OBJECT_HEADER_PROCESS_INFO",
    ] {
        assert!(header.field(name).is_none(), "{name} should be a sentinel");
    }
}

#[test]
fn type_index_resolves_through_the_profile_map() {
    let profile = win7_sp0_x86(fixture_vtypes()).unwrap();
    let mut image = vec![0u8; 0x2000];
    image[0x100C] = 28;
    image[0x110C] = 99;
    let aspace: DynAddressSpace = Arc::new(BufferAddressSpace::with_data(image, 0));

    let file_header = profile.object("_OBJECT_HEADER", 0x1000, &aspace).unwrap();
    assert_eq!(file_header.object_type(), "File");

    let unknown = profile.object("_OBJECT_HEADER", 0x1100, &aspace).unwrap();
    assert_eq!(unknown.object_type(), "");
}

/// Plant three file-object pool allocations and demand exactly those
/// hits, in order.
#[test]
fn file_scan_finds_exactly_the_planted_tags() {
    let profile = win7_sp0_x86(fixture_vtypes()).unwrap();
    let mut image = vec![0u8; 0x40_0000];
    let spots = [0x100u64, 0x1_0000, 0x3F_F000];
    for &spot in &spots {
        let s = spot as usize;
        // BlockSize 0x13 (* 8 = 0x98), PoolType 1 (non-paged),
        // PoolIndex 0; the tag itself at the hit offset.
        put_u16(&mut image, s - 4, 0);
        put_u16(&mut image, s - 2, (1 << 9) | 0x13);
        image[s..s + 4].copy_from_slice(b"Fil\xe5");
    }
    let ctx = ScanContext {
        profile,
        aspace: Arc::new(BufferAddressSpace::with_data(image, 0)),
    };

    let hits: Vec<u64> = pool_scan_file().scan(&ctx).unwrap().collect();
    assert_eq!(hits, spots);

    // Bottom-up localization: allocation end minus the target size.
    let base = object_base_from_hit(&ctx, 0x100, "_FILE_OBJECT").unwrap();
    assert_eq!(base, (0x100 - 4) + 0x98 - 0x80);
}

#[test]
fn mutant_scan_uses_its_own_tag_and_size_floor() {
    let profile = win7_sp0_x86(fixture_vtypes()).unwrap();
    let mut image = vec![0u8; 0x1000];
    // BlockSize 8 (* 8 = 0x40), non-paged, index 0.
    put_u16(&mut image, 0x200 - 2, (1 << 9) | 8);
    image[0x200..0x204].copy_from_slice(b"Mut\xe1");
    let ctx = ScanContext {
        profile,
        aspace: Arc::new(BufferAddressSpace::with_data(image, 0)),
    };

    let hits: Vec<u64> = vestige_windows::pool_scan_mutant()
        .scan(&ctx)
        .unwrap()
        .collect();
    assert_eq!(hits, vec![0x200]);

    // The file scanner must not claim the mutant tag.
    let file_hits: Vec<u64> = pool_scan_file().scan(&ctx).unwrap().collect();
    assert!(file_hits.is_empty());
}

#[test]
fn object_header_sits_below_the_body() {
    let profile = win7_sp0_x86(fixture_vtypes()).unwrap();
    // Body lives at +0x18 of _OBJECT_HEADER.
    let header = vestige_windows::object_header_offset(&profile, 0x5000).unwrap();
    assert_eq!(header, 0x5000 - 0x18);
}

#[test]
fn undersized_or_wrong_index_pools_are_rejected() {
    let profile = win7_sp0_x86(fixture_vtypes()).unwrap();
    let mut image = vec![0u8; 0x1000];

    // Too small: BlockSize 2 (* 8 = 0x10 < 0x98).
    put_u16(&mut image, 0x100 - 2, (1 << 9) | 2);
    image[0x100..0x104].copy_from_slice(b"Fil\xe5");

    // Large enough but PoolIndex 3.
    put_u16(&mut image, 0x200 - 4, 3 << 9);
    put_u16(&mut image, 0x200 - 2, (1 << 9) | 0x13);
    image[0x200..0x204].copy_from_slice(b"Fil\xe5");

    let ctx = ScanContext {
        profile,
        aspace: Arc::new(BufferAddressSpace::with_data(image, 0)),
    };
    let hits: Vec<u64> = pool_scan_file().scan(&ctx).unwrap().collect();
    assert!(hits.is_empty());
}

/// Physical image with an Idle `_EPROCESS`, its page tables, and a
/// thread list that reflects correctly through the candidate DTB.
fn discovery_image() -> Vec<u8> {
    let mut image = vec![0u8; 0x10_0000];
    let eproc = 0x10000usize;

    // Pcb.DirectoryTableBase and the padded image name.
    put_u32(&mut image, eproc + 0x18, 0x39000);
    image[eproc + 0x2C..eproc + 0x30].copy_from_slice(b"Idle");

    // ThreadListHead: Flink -> VA 0x1000.
    put_u32(&mut image, eproc + 0x50, 0x1000);
    put_u32(&mut image, eproc + 0x54, 0x2050);

    // ActiveProcessLinks: a single-process cycle through VA 0x2020.
    put_u32(&mut image, eproc + 0x20, 0x2020);
    put_u32(&mut image, eproc + 0x24, 0x2020);
    put_u32(&mut image, eproc + 0x60, 4);

    // Non-PAE tables: VA 0x1000 -> 0x50000, VA 0x2000 -> 0x10000.
    put_u32(&mut image, 0x39000, 0x40063);
    put_u32(&mut image, 0x40004, 0x50063);
    put_u32(&mut image, 0x40008, 0x10063);

    // The thread entry at VA 0x1000: Blink points back at the head's
    // virtual address.
    put_u32(&mut image, 0x50000, 0x2050);
    put_u32(&mut image, 0x50004, 0x2050);

    image
}

#[test]
fn dtb_discovery_scans_and_verifies() {
    let profile = win7_sp0_x86(fixture_vtypes()).unwrap();
    let physical: DynAddressSpace = Arc::new(BufferAddressSpace::with_data(discovery_image(), 0));

    let finder = WinFindDtb::new(profile, physical, "Idle").unwrap();
    let hits = finder.dtb_hits();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].1, 0x39000);
    assert_eq!(finder.find_verified(), Some(0x39000));
}

#[test]
fn broken_thread_list_fails_verification() {
    let profile = win7_sp0_x86(fixture_vtypes()).unwrap();
    let mut image = discovery_image();
    // Corrupt the reflected Blink.
    put_u32(&mut image, 0x50004, 0xDEAD_0000);
    let physical: DynAddressSpace = Arc::new(BufferAddressSpace::with_data(image, 0));

    let finder = WinFindDtb::new(profile, physical, "Idle").unwrap();
    assert_eq!(finder.dtb_hits().len(), 1);
    assert_eq!(finder.find_verified(), None);
}

#[test]
fn registry_assembles_a_kernel_space_without_an_explicit_dtb() {
    let image = discovery_image();
    let mut path = std::env::temp_dir();
    path.push(format!("vestige-win-stack-{}.img", std::process::id()));
    std::fs::write(&path, &image).unwrap();

    let mut registry = Registry::new();
    register_core_layers(&mut registry).unwrap();
    vestige_windows::register(&mut registry).unwrap();
    registry
        .register_profile(
            "Win7SP0x86",
            Arc::new(|_session: &Session| win7_sp0_x86(fixture_vtypes())),
        )
        .unwrap();

    let session = Session::new(&path).with_profile("Win7SP0x86");
    let profile = registry.profile(&session).unwrap();

    let physical = stack::build(&registry, &session, Some(&profile), AsType::Physical).unwrap();
    assert_eq!(physical.astype(), AsType::Physical);

    let kernel = stack::build(&registry, &session, Some(&profile), AsType::Virtual).unwrap();
    assert_eq!(kernel.vtop(0x1000), Some(0x50000));
    assert_eq!(kernel.vtop(0x2000), Some(0x10000));

    // The physically-found process lifts into the kernel space.
    let eproc = profile.probe("_EPROCESS", 0x10000, &physical).unwrap();
    let virtual_proc = virtual_process_from_physical(&eproc, &kernel);
    assert_eq!(virtual_proc.offset(), 0x2000);
    assert_eq!(virtual_proc.field("UniqueProcessId").u64(), 4);
    assert_eq!(virtual_proc.field("ImageFileName").string(), "Idle");

    std::fs::remove_file(&path).ok();
}
