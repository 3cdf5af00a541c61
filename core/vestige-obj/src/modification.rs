//! Ordered, declarative profile mutation.
//!
//! Deep profile inheritance is replaced by composition: every concrete
//! profile applies a chain of [`ProfileModification`]s in a declared
//! order. A modification names itself, tests the in-progress profile's
//! metadata, declares `before`/`after` constraints against other
//! modifications by name, and mutates the builder. The chain is
//! topologically sorted; a constraint cycle is a fatal build error,
//! a constraint naming an absent modification is only logged.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, warn};

use crate::profile::{ProfileBuilder, ProfileError, ProfileMetadata};

/// One step of a profile's construction.
pub trait ProfileModification: Send + Sync {
    /// Stable name other modifications order against.
    fn name(&self) -> &'static str;

    /// Whether this modification applies to the profile being built.
    fn applies(&self, metadata: &ProfileMetadata) -> bool {
        let _ = metadata;
        true
    }

    /// Names this modification must run before.
    fn before(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Names this modification must run after.
    fn after(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Mutate the builder: merge overlays, attach behaviors, adjust
    /// native types, add symbols or constants.
    ///
    /// # Errors
    /// Any [`ProfileError`] aborts the build.
    fn modify(&self, builder: &mut ProfileBuilder) -> Result<(), ProfileError>;
}

/// Shared handle to a registered modification.
pub type DynModification = Arc<dyn ProfileModification>;

/// Apply every applicable modification in topological order.
///
/// # Errors
/// [`ProfileError::ModificationCycle`] on an ordering cycle; any error
/// a modification itself raises.
pub fn apply_chain(
    builder: &mut ProfileBuilder,
    modifications: &[DynModification],
) -> Result<(), ProfileError> {
    let active: Vec<&DynModification> = modifications
        .iter()
        .filter(|m| m.applies(builder.metadata()))
        .collect();
    let names: BTreeSet<&str> = active.iter().map(|m| m.name()).collect();

    // Edges run predecessor → successor.
    let mut successors: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut indegree: BTreeMap<&str, usize> = names.iter().map(|&n| (n, 0)).collect();
    let add_edge = |from: &str, to: &str,
                        successors: &mut BTreeMap<&str, Vec<&str>>,
                        indegree: &mut BTreeMap<&str, usize>| {
        let from = names.get(from).copied();
        let to = names.get(to).copied();
        match (from, to) {
            (Some(from), Some(to)) => {
                successors.entry(from).or_default().push(to);
                *indegree.get_mut(to).expect("known node") += 1;
            }
            _ => warn!("modification ordering names an absent step; ignored"),
        }
    };
    for m in &active {
        for target in m.before() {
            add_edge(m.name(), target, &mut successors, &mut indegree);
        }
        for source in m.after() {
            add_edge(source, m.name(), &mut successors, &mut indegree);
        }
    }

    // Kahn's algorithm; BTree ordering keeps unconstrained steps
    // deterministic.
    let mut ready: Vec<&str> = indegree
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(&n, _)| n)
        .collect();
    let mut order = Vec::with_capacity(active.len());
    while let Some(name) = ready.pop() {
        order.push(name);
        for &next in successors.get(name).into_iter().flatten() {
            let d = indegree.get_mut(next).expect("known node");
            *d -= 1;
            if *d == 0 {
                ready.push(next);
            }
        }
        ready.sort_unstable();
        ready.reverse();
    }
    if order.len() != active.len() {
        let stuck = indegree
            .iter()
            .find(|&(_, &d)| d > 0)
            .map_or("<unknown>", |(&n, _)| n);
        return Err(ProfileError::ModificationCycle(stuck.to_string()));
    }

    let by_name: BTreeMap<&str, &DynModification> =
        active.iter().map(|m| (m.name(), *m)).collect();
    for name in order {
        debug!("applying profile modification {name}");
        by_name[name].modify(builder)?;
    }
    Ok(())
}
