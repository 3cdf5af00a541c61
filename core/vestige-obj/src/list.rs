//! Intrusive doubly-linked list traversal.
//!
//! `list_head`, `hlist_node` and `_LIST_ENTRY` all embed forward and
//! backward pointers inside the structures they chain. Traversal starts
//! from a link view whose type carries the
//! [`ListLinks`](crate::profile::Behavior::ListLinks) behavior: follow
//! the chosen pointer, subtract `offsetof(container, member)` to rebase
//! onto the container, materialize it, repeat. Termination is by an
//! invalid link or by the seen-set (in-memory lists are routinely
//! cyclic); with `head_sentinel` the starting link is seeded into the
//! seen-set and never yielded.

use std::collections::HashSet;

use crate::object::Object;
use crate::profile::Behavior;

/// Traversal direction and sentinel handling.
#[derive(Copy, Clone, Debug)]
pub struct ListOptions {
    pub forward: bool,
    pub head_sentinel: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            forward: true,
            head_sentinel: true,
        }
    }
}

/// Iterator over the containers chained through a link member.
pub struct ListIter {
    next_link: Object,
    container: String,
    member: String,
    link_member: String,
    seen: HashSet<u64>,
}

impl Iterator for ListIter {
    type Item = Object;

    fn next(&mut self) -> Option<Object> {
        let link = self.next_link.clone();
        if !link.is_valid() || self.seen.contains(&link.offset()) {
            return None;
        }
        self.seen.insert(link.offset());

        let item = link.container_of(&self.container, &self.member);
        self.next_link = follow(&item.field(&self.member), &self.link_member);
        Some(item)
    }
}

/// Follow one link pointer. `hlist_node.pprev` is a pointer-to-pointer,
/// so keep dereferencing until a non-pointer comes out.
fn follow(link: &Object, member: &str) -> Object {
    let mut next = link.field(member).deref();
    while matches!(next, Object::Pointer(_)) {
        next = next.deref();
    }
    next
}

impl Object {
    /// Walk the list this link participates in, yielding `container`
    /// views rebased by `member`'s offset.
    ///
    /// The link's type must carry the `ListLinks` behavior in the
    /// profile; otherwise the iterator is empty.
    #[must_use]
    pub fn list_of_type(&self, container: &str, member: &str) -> ListIter {
        self.list_of_type_with(container, member, ListOptions::default())
    }

    /// [`list_of_type`](Self::list_of_type) with explicit direction and
    /// sentinel handling.
    #[must_use]
    pub fn list_of_type_with(
        &self,
        container: &str,
        member: &str,
        options: ListOptions,
    ) -> ListIter {
        let empty = |reason: &str| ListIter {
            next_link: Object::none(reason),
            container: container.to_string(),
            member: member.to_string(),
            link_member: String::new(),
            seen: HashSet::new(),
        };

        let Some(coords) = self.coords() else {
            return empty("list walk from a sentinel");
        };
        let Some(ty) = self.type_name() else {
            return empty("list walk from a non-structure view");
        };
        let Some(Behavior::ListLinks { next, prev }) = coords.profile.behavior(ty) else {
            return empty("type has no list-link behavior");
        };
        let link_member = if options.forward { next } else { prev }.clone();

        let mut seen = HashSet::new();
        if options.head_sentinel {
            seen.insert(self.offset());
        }
        ListIter {
            next_link: follow(self, &link_member),
            container: container.to_string(),
            member: member.to_string(),
            link_member,
            seen,
        }
    }
}
