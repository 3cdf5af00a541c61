//! Address-space stack assembly.
//!
//! Builds the layered stack for a session by fixed point: candidates
//! are tried in ascending order rank; each constructor accepts or
//! rejects the current top of the stack; the first acceptance restarts
//! the round. When no layer stacks any more, the requested role is
//! picked off the stack from the top down.

use std::sync::Arc;

use log::{debug, trace};
use vestige_aspace::{AsType, DynAddressSpace};
use vestige_obj::Profile;

use crate::registry::Registry;
use crate::Session;

/// What a layer factory gets to see while stacking.
pub struct StackContext<'a> {
    pub session: &'a Session,
    /// The compiled profile, when one is already selected. Virtual
    /// layers consult it for DTB discovery.
    pub profile: Option<&'a Arc<Profile>>,
    /// The role being requested; role-specific layers decline others.
    pub astype: AsType,
    /// The registry assembling the stack; carries the DTB finders.
    pub registry: &'a Registry,
}

impl StackContext<'_> {
    /// An explicit session DTB, or whatever a registered finder can
    /// dig out of the physical layer.
    #[must_use]
    pub fn resolve_dtb(&self, physical: &DynAddressSpace) -> Option<u64> {
        if let Some(dtb) = self.session.dtb {
            return Some(dtb);
        }
        let profile = self.profile?;
        self.registry.find_dtb(profile, physical, self.session)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("no registered layer satisfied the {role:?} role")]
    Unsatisfied { role: AsType },
}

/// Assemble the stack and return the topmost layer serving `role`.
///
/// # Errors
/// [`StackError::Unsatisfied`] when every candidate declined.
pub fn build(
    registry: &Registry,
    session: &Session,
    profile: Option<&Arc<Profile>>,
    role: AsType,
) -> Result<DynAddressSpace, StackError> {
    let ctx = StackContext {
        session,
        profile,
        astype: role,
        registry,
    };

    let mut top: Option<DynAddressSpace> = None;
    loop {
        let mut stacked = false;
        for entry in registry.active_layers(session) {
            match (entry.factory)(top.clone(), &ctx) {
                Ok(layer) => {
                    debug!("stacked {} as {:?}", entry.name, layer.astype());
                    top = Some(layer);
                    stacked = true;
                    break;
                }
                Err(rejection) => trace!("{rejection}"),
            }
        }
        if !stacked {
            break;
        }
    }

    let mut cursor = top;
    while let Some(layer) = cursor {
        if layer.astype() == role {
            return Ok(layer);
        }
        cursor = layer.base().cloned();
    }
    Err(StackError::Unsatisfied { role })
}
