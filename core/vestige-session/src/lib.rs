//! # Session and Component Registry
//!
//! The process-wide mutable configuration of the original design is
//! replaced by an explicit, immutable [`Session`] value threaded
//! through every component, and runtime subclass discovery by explicit
//! registration into a [`Registry`] assembled at startup.
//!
//! A typical bootstrap:
//!
//! ```ignore
//! let session = Session::new("memory.img").with_profile("Win7SP0x86");
//! let mut registry = Registry::new();
//! vestige_windows::register(&mut registry)?;
//! vestige_linux::register(&mut registry)?;
//! let profile = registry.profile(&session)?;
//! let kernel_as = stack::build(&registry, &session, &profile, AsType::Virtual)?;
//! ```

pub mod layers;
pub mod registry;
pub mod stack;

use std::path::{Path, PathBuf};

pub use crate::layers::register_core_layers;
pub use crate::registry::{DtbFinder, LayerEntry, Registry, RegistryError};
pub use crate::stack::{StackContext, StackError};

/// Immutable per-run configuration.
///
/// Recognized options mirror the external configuration contract:
/// the image path, write gating, an explicit DTB, the profile name,
/// extra registration directories, an explicit KDBG address, and the
/// registry-dump flag. Options consumed only by plugins (PID filters
/// and the like) do not live here.
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub filename: Option<PathBuf>,
    pub write: bool,
    pub dtb: Option<u64>,
    pub profile: Option<String>,
    /// Reserved: out-of-tree registration assemblies. Nothing is
    /// walked at runtime; registration is explicit.
    pub plugins: Vec<PathBuf>,
    pub kdbg: Option<u64>,
    pub info: bool,
}

impl Session {
    #[must_use]
    pub fn new(filename: impl AsRef<Path>) -> Self {
        Self {
            filename: Some(filename.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    #[must_use]
    pub fn with_dtb(mut self, dtb: u64) -> Self {
        self.dtb = Some(dtb);
        self
    }

    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    #[must_use]
    pub fn with_kdbg(mut self, kdbg: u64) -> Self {
        self.kdbg = Some(kdbg);
        self
    }
}
