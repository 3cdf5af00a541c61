//! Raw page-table entry bitfields.
//!
//! Models the superset of fields shared by every x86 paging level. The
//! low twelve bits carry the architectural flags plus the two software
//! bits Windows repurposes for its pager (`prototype`, `transition`);
//! forensic presence has to honor those, see [`Entry32::is_present`].

use bitfield_struct::bitfield;

/// 32-bit page-table entry (non-PAE x86, PDE or PTE).
#[bitfield(u32)]
pub struct Entry32 {
    /// Present (P, bit 0).
    pub present: bool,
    /// Writable (RW, bit 1).
    pub writable: bool,
    /// User/Supervisor (US, bit 2).
    pub user_access: bool,
    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,
    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,
    /// Accessed (A, bit 5).
    pub accessed: bool,
    /// Dirty (D, bit 6, leaf only).
    pub dirty: bool,
    /// Page Size (PS, bit 7). A set PS in a PDE maps a 4 MiB page.
    pub large_page: bool,
    /// Global (G, bit 8, leaf only).
    pub global: bool,
    /// Software (bit 9). Windows: copy-on-write.
    pub copy_on_write: bool,
    /// Software (bit 10). Windows: prototype PTE.
    pub prototype: bool,
    /// Software (bit 11). Windows: transition PTE.
    pub transition: bool,
    /// Physical frame bits 31:12.
    #[bits(20)]
    pub page_frame: u32,
}

impl Entry32 {
    /// Forensic presence: the architectural P bit, or a transition entry
    /// that is not a prototype (the page is still in RAM, the OS just
    /// unmapped it).
    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.present() || (self.transition() && !self.prototype())
    }

    /// Page-aligned physical base (bits 31:12).
    #[inline]
    #[must_use]
    pub const fn address(self) -> u64 {
        (self.page_frame() as u64) << 12
    }
}

/// 64-bit page-table entry (PAE and long mode, all levels).
#[bitfield(u64)]
pub struct Entry64 {
    /// Present (P, bit 0).
    pub present: bool,
    /// Writable (RW, bit 1).
    pub writable: bool,
    /// User/Supervisor (US, bit 2).
    pub user_access: bool,
    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,
    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,
    /// Accessed (A, bit 5).
    pub accessed: bool,
    /// Dirty (D, bit 6, leaf only).
    pub dirty: bool,
    /// Page Size (PS, bit 7). Set in a PDE: 2 MiB leaf; in a PDPTE:
    /// 1 GiB leaf (long mode only).
    pub large_page: bool,
    /// Global (G, bit 8, leaf only).
    pub global: bool,
    /// Software (bit 9). Windows: copy-on-write.
    pub copy_on_write: bool,
    /// Software (bit 10). Windows: prototype PTE.
    pub prototype: bool,
    /// Software (bit 11). Windows: transition PTE.
    pub transition: bool,
    /// Physical frame bits 51:12.
    #[bits(40)]
    pub page_frame: u64,
    /// Available to the OS (bits 62:52).
    #[bits(11)]
    pub os_avail: u16,
    /// No-execute (NX, bit 63).
    pub no_execute: bool,
}

impl Entry64 {
    /// Forensic presence, same rule as [`Entry32::is_present`].
    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.present() || (self.transition() && !self.prototype())
    }

    /// Page-aligned physical base (bits 51:12).
    #[inline]
    #[must_use]
    pub const fn address(self) -> u64 {
        self.page_frame() << 12
    }
}
