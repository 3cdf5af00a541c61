//! Linux profile behavior over synthetic images: per-kernel profile
//! construction, task-list traversal, and symbol-driven DTB discovery.

use std::sync::Arc;

use vestige_aspace::{AddressSpace, AsType, BufferAddressSpace, DynAddressSpace};
use vestige_linux::{linux_profile, suggest_dtb, validate_kernel_space};
use vestige_obj::{Count, MemoryModel, ProfileExt, TypeDescriptor, VType, VTypeMap};
use vestige_session::{Registry, Session, register_core_layers, stack};

const SYSMAP_32: &str = "c0039000 D swapper_pg_dir\nc0010000 D init_task\n";

fn fixture_vtypes() -> VTypeMap {
    let mut map = VTypeMap::new();
    map.insert(
        "list_head".into(),
        VType::new(8)
            .with_field("next", 0, TypeDescriptor::pointer_to("list_head"))
            .with_field("prev", 4, TypeDescriptor::pointer_to("list_head")),
    );
    map.insert(
        "task_struct".into(),
        VType::new(0x40)
            .with_field("pid", 0, TypeDescriptor::primitive("int"))
            .with_field(
                "comm",
                4,
                TypeDescriptor::Array {
                    count: Count::Fixed(16),
                    element: Box::new(TypeDescriptor::primitive("char")),
                },
            )
            .with_field("tasks", 0x18, TypeDescriptor::Struct("list_head".into())),
    );
    map
}

fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[test]
fn sixty_four_bit_profiles_widen_long() {
    let map64 = "ffffffff81e11000 D init_task\n";
    let profile = linux_profile("Linux-5.x-x64", VTypeMap::new(), map64).unwrap();
    assert_eq!(profile.metadata().memory_model, MemoryModel::Bits64);

    let profile32 = linux_profile("Linux-5.x-x86", VTypeMap::new(), SYSMAP_32).unwrap();
    assert_eq!(profile32.metadata().memory_model, MemoryModel::Bits32);
}

#[test]
fn comm_reads_as_a_string_through_the_overlay() {
    let profile = linux_profile("Linux-test", fixture_vtypes(), SYSMAP_32).unwrap();
    let mut image = vec![0u8; 0x1000];
    image[0x300..0x304].copy_from_slice(&1u32.to_le_bytes());
    image[0x304..0x30D].copy_from_slice(b"swapper/0");
    let aspace: DynAddressSpace = Arc::new(BufferAddressSpace::with_data(image, 0));

    let task = profile.object("task_struct", 0x300, &aspace).unwrap();
    assert_eq!(task.field("pid").u64(), 1);
    assert_eq!(task.field("comm").string(), "swapper/0");
}

#[test]
fn task_list_walks_forward_and_terminates_on_the_cycle() {
    let profile = linux_profile("Linux-test", fixture_vtypes(), SYSMAP_32).unwrap();

    // Three tasks, `tasks` lists chained circularly through +0x18.
    let mut image = vec![0u8; 0x1000];
    for (base, pid, next) in [(0x300u32, 1u32, 0x418u32), (0x400, 2, 0x518), (0x500, 3, 0x318)] {
        let b = base as usize;
        put_u32(&mut image, b, pid);
        put_u32(&mut image, b + 0x18, next);
        put_u32(&mut image, b + 0x1C, 0); // prev unused here
    }
    let aspace: DynAddressSpace = Arc::new(BufferAddressSpace::with_data(image, 0));

    let init_task = profile.object("task_struct", 0x300, &aspace).unwrap();
    let pids: Vec<u64> = init_task
        .field("tasks")
        .list_of_type("task_struct", "tasks")
        .map(|task| task.field("pid").u64())
        .collect();
    // The head (pid 1) is the sentinel; the walk comes back around and
    // stops on the seen link.
    assert_eq!(pids, vec![2, 3]);
}

/// Page tables proving the static kernel map: VA 0xC0010000 ->
/// PA 0x10000, with swapper_pg_dir at its linked address.
fn paged_image() -> Vec<u8> {
    let mut image = vec![0u8; 0x50000];
    // PDE index of 0xC0010000 is 0x300.
    put_u32(&mut image, 0x39000 + 0x300 * 4, 0x40063);
    // PTE index 0x10 inside that table.
    put_u32(&mut image, 0x40000 + 0x10 * 4, 0x10063);
    // A marker inside init_task's page.
    image[0x10000] = 0x42;
    image
}

#[test]
fn dtb_suggestion_and_validation() {
    let profile = linux_profile("Linux-test", fixture_vtypes(), SYSMAP_32).unwrap();
    assert_eq!(suggest_dtb(&profile), Some(0x39000));

    let physical: DynAddressSpace = Arc::new(BufferAddressSpace::with_data(paged_image(), 0));
    let kernel = vestige_aspace::PagedAddressSpace::stack(
        Arc::clone(&physical),
        vestige_aspace::Ia32Walk::new(0x39000),
        false,
    )
    .unwrap();
    assert!(validate_kernel_space(&profile, &kernel));

    // A wrong DTB reads unmapped tables and fails the check.
    let wrong = vestige_aspace::PagedAddressSpace::stack(
        physical,
        vestige_aspace::Ia32Walk::new(0x1000),
        false,
    )
    .unwrap();
    assert!(!validate_kernel_space(&profile, &wrong));
}

#[test]
fn registry_discovers_the_dtb_from_the_symbols() {
    let image = paged_image();
    let mut path = std::env::temp_dir();
    path.push(format!("vestige-linux-stack-{}.img", std::process::id()));
    std::fs::write(&path, &image).unwrap();

    let mut registry = Registry::new();
    register_core_layers(&mut registry).unwrap();
    vestige_linux::register(&mut registry).unwrap();
    registry
        .register_profile(
            "Linux-test",
            Arc::new(|_session: &Session| {
                linux_profile("Linux-test", fixture_vtypes(), SYSMAP_32)
                    .map_err(|err| match err {
                        vestige_linux::LinuxProfileError::Profile(e) => e,
                        other => vestige_obj::ProfileError::TypeMissing(other.to_string()),
                    })
            }),
        )
        .unwrap();

    let session = Session::new(&path).with_profile("Linux-test");
    let profile = registry.profile(&session).unwrap();
    let kernel = stack::build(&registry, &session, Some(&profile), AsType::Virtual).unwrap();

    assert_eq!(kernel.vtop(0xC001_0000), Some(0x10000));
    assert_eq!(kernel.read(0xC001_0000, 1).unwrap(), vec![0x42]);

    std::fs::remove_file(&path).ok();
}
