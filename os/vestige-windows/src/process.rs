//! Process reflection helpers shared by Windows analysis code.

use vestige_aspace::DynAddressSpace;
use vestige_obj::Object;

/// Lift an `_EPROCESS` found at a physical offset into the kernel
/// virtual space by reflecting off its list links: follow
/// `ActiveProcessLinks.Flink` into the kernel AS, step back through
/// `Blink`, and rebase the landing link onto its container.
///
/// The result is a none-object when either hop dies in a translation
/// gap.
#[must_use]
pub fn virtual_process_from_physical(eprocess_physical: &Object, kernel: &DynAddressSpace) -> Object {
    let our_entry = eprocess_physical
        .field("ActiveProcessLinks")
        .field("Flink")
        .deref_in(kernel)
        .field("Blink")
        .deref_in(kernel);
    our_entry.container_of("_EPROCESS", "ActiveProcessLinks")
}
