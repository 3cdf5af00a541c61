//! Cross-layer translation properties over a synthetic non-PAE image.

use std::sync::Arc;

use vestige_aspace::{
    AddressSpace, BufferAddressSpace, DynAddressSpace, Ia32Walk, PagedAddressSpace, ReadError,
};

/// dtb = 0x39000:
/// - PDE[0] -> page table at 0x40000; PTE[0] -> 0x50000, PTE[1] -> 0x51000
/// - PDE[1] -> 4 MiB page at 0x200000
fn physical() -> DynAddressSpace {
    // Large enough that the head of the 4 MiB page at 0x200000 is
    // backed by image bytes.
    let mut image = vec![0u8; 0x210000];
    image[0x39000..0x39004].copy_from_slice(&0x0004_0063u32.to_le_bytes());
    image[0x39004..0x39008].copy_from_slice(&0x0020_00E7u32.to_le_bytes());
    image[0x40000..0x40004].copy_from_slice(&0x0005_0063u32.to_le_bytes());
    image[0x40004..0x40008].copy_from_slice(&0x0005_1063u32.to_le_bytes());
    for (i, b) in image[0x50000..0x52000].iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    Arc::new(BufferAddressSpace::writable(image, 0))
}

fn kernel(physical: &DynAddressSpace) -> PagedAddressSpace<Ia32Walk> {
    PagedAddressSpace::stack(Arc::clone(physical), Ia32Walk::new(0x39000), true).unwrap()
}

/// Every byte read through the virtual layer equals the underlying
/// physical byte at the translated offset.
#[test]
fn translated_reads_match_the_underlying_bytes() {
    let physical = physical();
    let kernel = kernel(&physical);

    for run in kernel.runs() {
        let data = kernel.read(run.start, run.length.min(0x2000) as usize).unwrap();
        for (i, &byte) in data.iter().enumerate() {
            let vaddr = run.start + i as u64;
            let paddr = kernel.vtop(vaddr).unwrap();
            assert_eq!(physical.read(paddr, 1).unwrap()[0], byte, "at VA 0x{vaddr:X}");
        }
    }
}

/// A read crossing a page boundary equals the concatenation of the
/// per-page reads.
#[test]
fn page_boundary_reads_concatenate() {
    let physical = physical();
    let kernel = kernel(&physical);

    let spanning = kernel.read(0x0FF8, 0x10).unwrap();
    let head = kernel.read(0x0FF8, 0x8).unwrap();
    let tail = kernel.read(0x1000, 0x8).unwrap();
    assert_eq!(spanning, [head, tail].concat());
}

/// Short read vs zero-filled read across the translation gap after
/// the second page.
#[test]
fn zread_is_total_where_read_is_short() {
    let physical = physical();
    let kernel = kernel(&physical);

    let err = kernel.read(0, 0x3000).unwrap_err();
    let ReadError::Short { got, wanted, .. } = err;
    assert_eq!(wanted, 0x3000);
    assert_eq!(got.len(), 0x2000);

    let padded = kernel.zread(0, 0x3000);
    assert_eq!(padded.len(), 0x3000);
    assert_eq!(padded[..0x2000], got[..]);
    assert!(padded[0x2000..].iter().all(|&b| b == 0));

    // Bytes with no translation at all are zero in zread.
    assert!(kernel.vtop(0x2000).is_none());
}

/// Writes split at page boundaries and land in the physical image.
#[test]
fn paged_writes_reach_the_physical_layer() {
    let physical = physical();
    let kernel = kernel(&physical);

    let payload: Vec<u8> = (0u8..16).collect();
    assert!(kernel.write(0x0FF8, &payload));
    assert_eq!(physical.read(0x50FF8, 8).unwrap(), payload[..8]);
    assert_eq!(physical.read(0x51000, 8).unwrap(), payload[8..]);

    // A write into a translation gap fails as a whole.
    assert!(!kernel.write(0x1FFC, &payload));
}

/// The write gate wins over everything else.
#[test]
fn disabled_write_flag_blocks_paged_writes() {
    let physical = physical();
    let kernel =
        PagedAddressSpace::stack(Arc::clone(&physical), Ia32Walk::new(0x39000), false).unwrap();
    assert!(!kernel.write(0, &[1, 2, 3]));
}
