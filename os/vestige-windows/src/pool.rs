//! Pool-header checks and scanner configurations.
//!
//! A scan hit is the offset of the pool tag; the `_POOL_HEADER` sits
//! `offsetof(_POOL_HEADER, PoolTag)` bytes below it. All checks here
//! probe that header non-strictly (pool scanners look at arbitrary
//! offsets) and read its bitfields through the profile.

use vestige_obj::{Object, Profile, ProfileError, ProfileExt};
use vestige_scan::{PoolScanner, PoolTagCheck, ScanCheck, ScanContext};

/// Header bytes a check reads past the tag offset; sizes the scan
/// window overlap.
const HEADER_REACH: usize = 8;

/// Materialize the pool header owning the tag at `tag_offset`.
#[must_use]
pub fn pool_header(ctx: &ScanContext, tag_offset: u64) -> Option<Object> {
    let tag_off = ctx.profile.offset_of("_POOL_HEADER", "PoolTag").ok()?;
    let header_offset = tag_offset.checked_sub(tag_off)?;
    ctx.profile
        .probe("_POOL_HEADER", header_offset, &ctx.aspace)
        .ok()
}

/// Allocation size check: `BlockSize` scaled by the profile's pool
/// alignment must satisfy the configured condition.
pub struct CheckPoolSize {
    condition: Box<dyn Fn(u64) -> bool + Send + Sync>,
}

impl CheckPoolSize {
    #[must_use]
    pub fn new(condition: impl Fn(u64) -> bool + Send + Sync + 'static) -> Self {
        Self {
            condition: Box::new(condition),
        }
    }

    /// The common "at least the target structure plus headers" form.
    #[must_use]
    pub fn at_least(bytes: u64) -> Self {
        Self::new(move |size| size >= bytes)
    }
}

impl ScanCheck for CheckPoolSize {
    fn check(&self, ctx: &ScanContext, offset: u64) -> bool {
        let Some(header) = pool_header(ctx, offset) else {
            return false;
        };
        let alignment = ctx.profile.scalar_constant("PoolAlignment").unwrap_or(8);
        (self.condition)(header.field("BlockSize").u64() * alignment)
    }

    fn reach(&self) -> usize {
        HEADER_REACH
    }
}

/// Pool-type check. `PoolType` is odd for non-paged allocations, zero
/// for freed ones and positive-even for paged ones.
pub struct CheckPoolType {
    pub paged: bool,
    pub non_paged: bool,
    pub free: bool,
}

impl ScanCheck for CheckPoolType {
    fn check(&self, ctx: &ScanContext, offset: u64) -> bool {
        let Some(header) = pool_header(ctx, offset) else {
            return false;
        };
        let pool_type = header.field("PoolType").u64();
        (self.non_paged && pool_type % 2 == 1)
            || (self.free && pool_type == 0)
            || (self.paged && pool_type % 2 == 0 && pool_type > 0)
    }

    fn reach(&self) -> usize {
        HEADER_REACH
    }
}

/// Pool-index check; kernel allocations of interest sit in index 0.
pub struct CheckPoolIndex {
    pub value: u64,
}

impl ScanCheck for CheckPoolIndex {
    fn check(&self, ctx: &ScanContext, offset: u64) -> bool {
        pool_header(ctx, offset)
            .is_some_and(|header| header.field("PoolIndex").u64() == self.value)
    }

    fn reach(&self) -> usize {
        HEADER_REACH
    }
}

fn pool_scanner(tag: &[u8], min_size: u64) -> PoolScanner {
    PoolScanner::new(vec![
        Box::new(PoolTagCheck::new(tag)),
        Box::new(CheckPoolSize::at_least(min_size)),
        Box::new(CheckPoolType {
            paged: true,
            non_paged: true,
            free: true,
        }),
        Box::new(CheckPoolIndex { value: 0 }),
    ])
}

/// Scanner for `_FILE_OBJECT` pool allocations.
#[must_use]
pub fn pool_scan_file() -> PoolScanner {
    pool_scanner(b"Fil\xe5", 0x98)
}

/// Scanner for `_DRIVER_OBJECT` pool allocations.
#[must_use]
pub fn pool_scan_driver() -> PoolScanner {
    pool_scanner(b"Dri\xf6", 0xf8)
}

/// Scanner for `_KMUTANT` pool allocations.
#[must_use]
pub fn pool_scan_mutant() -> PoolScanner {
    pool_scanner(b"Mut\xe1", 0x40)
}

/// Locate the object a pool hit carries, bottom-up: the allocation
/// ends at `header + BlockSize * alignment` and the target structure
/// is flush against that end.
#[must_use]
pub fn object_base_from_hit(ctx: &ScanContext, hit: u64, target: &str) -> Option<u64> {
    let header = pool_header(ctx, hit)?;
    let alignment = ctx.profile.scalar_constant("PoolAlignment").unwrap_or(8);
    let end = header.offset() + header.field("BlockSize").u64() * alignment;
    let size = ctx.profile.size_of(target).ok()?;
    end.checked_sub(size)
}

/// The `_OBJECT_HEADER` sits immediately below the object body.
///
/// # Errors
/// [`ProfileError`] when the header layout is absent from the profile.
pub fn object_header_offset(profile: &Profile, object_offset: u64) -> Result<u64, ProfileError> {
    let body = profile.offset_of("_OBJECT_HEADER", "Body")?;
    Ok(object_offset.wrapping_sub(body))
}
