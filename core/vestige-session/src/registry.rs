//! Explicit component registration.
//!
//! OS crates register their address-space layers, profile factories,
//! profile modifications and scanner-check descriptors at assembly
//! time. Names are unique per section; a duplicate is a configuration
//! bug and fails registration. Names beginning with `Abstract` mark
//! base templates and are skipped silently, matching the discovery
//! convention this replaces.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use log::debug;
use vestige_aspace::{AsType, DynAddressSpace, StackRejection};
use vestige_obj::{DynModification, Profile, ProfileError};

use crate::stack::StackContext;
use crate::Session;

/// Constructs a layer over an optional base.
pub type LayerFactory = Arc<
    dyn Fn(Option<DynAddressSpace>, &StackContext<'_>) -> Result<DynAddressSpace, StackRejection>
        + Send
        + Sync,
>;

/// Builds a compiled profile for a session.
pub type ProfileFactory =
    Arc<dyn Fn(&Session) -> Result<Arc<Profile>, ProfileError> + Send + Sync>;

/// Discovers a DTB by scanning the physical layer, OS-specifically.
/// Returns `None` to let the next finder try.
pub type DtbFinder = Arc<
    dyn Fn(&Arc<Profile>, &DynAddressSpace, &Session) -> Option<u64> + Send + Sync,
>;

/// One registered address-space layer.
pub struct LayerEntry {
    pub name: &'static str,
    /// Candidates are tried in ascending order.
    pub order: u16,
    /// The role the layer serves once stacked.
    pub astype: AsType,
    pub is_active: fn(&Session) -> bool,
    pub factory: LayerFactory,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{section} {name} has already been registered")]
    Duplicate {
        section: &'static str,
        name: String,
    },
}

/// The assembled component catalog for one run.
#[derive(Default)]
pub struct Registry {
    layers: Vec<LayerEntry>,
    profiles: BTreeMap<String, ProfileFactory>,
    modifications: Vec<DynModification>,
    dtb_finders: Vec<DtbFinder>,
    check_names: BTreeMap<String, &'static str>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an address-space layer.
    ///
    /// # Errors
    /// [`RegistryError::Duplicate`] when the name is taken.
    pub fn register_layer(&mut self, entry: LayerEntry) -> Result<(), RegistryError> {
        if entry.name.starts_with("Abstract") {
            debug!("skipping abstract layer {}", entry.name);
            return Ok(());
        }
        if self.layers.iter().any(|l| l.name == entry.name) {
            return Err(RegistryError::Duplicate {
                section: "layer",
                name: entry.name.to_string(),
            });
        }
        self.layers.push(entry);
        self.layers.sort_by_key(|l| l.order);
        Ok(())
    }

    /// Register a profile factory by its declared name.
    ///
    /// # Errors
    /// [`RegistryError::Duplicate`] when the name is taken.
    pub fn register_profile(
        &mut self,
        name: &str,
        factory: ProfileFactory,
    ) -> Result<(), RegistryError> {
        if name.starts_with("Abstract") {
            debug!("skipping abstract profile {name}");
            return Ok(());
        }
        if self.profiles.contains_key(name) {
            return Err(RegistryError::Duplicate {
                section: "profile",
                name: name.to_string(),
            });
        }
        self.profiles.insert(name.to_string(), factory);
        Ok(())
    }

    /// Register a profile modification; ordering among modifications
    /// is declared by the modifications themselves.
    pub fn register_modification(&mut self, modification: DynModification) {
        self.modifications.push(modification);
    }

    /// Record a scanner-check descriptor for the catalog dump.
    ///
    /// # Errors
    /// [`RegistryError::Duplicate`] when the name is taken.
    pub fn register_check(
        &mut self,
        name: &str,
        description: &'static str,
    ) -> Result<(), RegistryError> {
        if name.starts_with("Abstract") {
            return Ok(());
        }
        if self
            .check_names
            .insert(name.to_string(), description)
            .is_some()
        {
            return Err(RegistryError::Duplicate {
                section: "check",
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Layers in ascending order, filtered by activation.
    pub fn active_layers<'a>(
        &'a self,
        session: &'a Session,
    ) -> impl Iterator<Item = &'a LayerEntry> {
        self.layers.iter().filter(move |l| (l.is_active)(session))
    }

    /// Build the profile the session names.
    ///
    /// # Errors
    /// [`ProfileError::TypeMissing`] carrying the profile name when it
    /// is unknown; anything the factory itself raises.
    pub fn profile(&self, session: &Session) -> Result<Arc<Profile>, ProfileError> {
        let name = session.profile.as_deref().unwrap_or_default();
        let factory = self
            .profiles
            .get(name)
            .ok_or_else(|| ProfileError::TypeMissing(format!("profile {name}")))?;
        factory(session)
    }

    /// The shared modification chain.
    #[must_use]
    pub fn modifications(&self) -> &[DynModification] {
        &self.modifications
    }

    /// Register an OS-specific DTB discovery strategy.
    pub fn register_dtb_finder(&mut self, finder: DtbFinder) {
        self.dtb_finders.push(finder);
    }

    /// Ask every registered finder for a DTB, in registration order.
    #[must_use]
    pub fn find_dtb(
        &self,
        profile: &Arc<Profile>,
        physical: &DynAddressSpace,
        session: &Session,
    ) -> Option<u64> {
        self.dtb_finders
            .iter()
            .find_map(|finder| finder(profile, physical, session))
    }

    /// Human-readable catalog (the `INFO` option).
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str("Address spaces:\n");
        for layer in &self.layers {
            let _ = writeln!(
                out,
                "  {:>3}  {:<8}  {}",
                layer.order,
                format!("{:?}", layer.astype),
                layer.name
            );
        }
        out.push_str("Profiles:\n");
        for name in self.profiles.keys() {
            let _ = writeln!(out, "       {name}");
        }
        out.push_str("Scanner checks:\n");
        for (name, description) in &self.check_names {
            let _ = writeln!(out, "       {name}: {description}");
        }
        out.push_str("Modifications:\n");
        for modification in &self.modifications {
            let _ = writeln!(out, "       {}", modification.name());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_entry(name: &'static str, order: u16) -> LayerEntry {
        LayerEntry {
            name,
            order,
            astype: AsType::Physical,
            is_active: |_| true,
            factory: Arc::new(|_base: Option<DynAddressSpace>, _ctx: &StackContext<'_>| {
                Err(StackRejection::new("dummy", "never stacks"))
            }),
        }
    }

    #[test]
    fn duplicate_layer_names_are_fatal() {
        let mut registry = Registry::new();
        registry.register_layer(dummy_entry("FileAddressSpace", 100)).unwrap();
        let err = registry
            .register_layer(dummy_entry("FileAddressSpace", 90))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate { .. }));
    }

    #[test]
    fn abstract_names_are_skipped() {
        let mut registry = Registry::new();
        registry
            .register_layer(dummy_entry("AbstractPagedMemory", 50))
            .unwrap();
        let session = Session::default();
        assert_eq!(registry.active_layers(&session).count(), 0);
    }

    #[test]
    fn layers_come_back_in_order() {
        let mut registry = Registry::new();
        registry.register_layer(dummy_entry("Last", 100)).unwrap();
        registry.register_layer(dummy_entry("First", 60)).unwrap();
        registry.register_layer(dummy_entry("Middle", 80)).unwrap();
        let session = Session::default();
        let names: Vec<&str> = registry
            .active_layers(&session)
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["First", "Middle", "Last"]);
    }

    #[test]
    fn describe_dumps_the_catalog() {
        let mut registry = Registry::new();
        registry.register_layer(dummy_entry("FileAddressSpace", 100)).unwrap();
        registry
            .register_check("PoolTagCheck", "constant pool-tag signature")
            .unwrap();
        let info = registry.describe();
        assert!(info.contains("FileAddressSpace"));
        assert!(info.contains("PoolTagCheck"));
    }

    #[test]
    fn activation_predicate_filters() {
        let mut registry = Registry::new();
        let mut entry = dummy_entry("WriteOnly", 10);
        entry.is_active = |session| session.write;
        registry.register_layer(entry).unwrap();

        assert_eq!(registry.active_layers(&Session::default()).count(), 0);
        let writable = Session::default().with_write(true);
        assert_eq!(registry.active_layers(&writable).count(), 1);
    }
}
