//! Ordering a proposed knowledge tree so parents exist before children.

use std::collections::HashSet;

use lorekeep_core::pipeline::TreeNodeDraft;

/// A node ready to be created, in creation order.
#[derive(Debug, Clone, PartialEq)]
pub struct Planned {
    pub draft: TreeNodeDraft,
    /// The parent named by the draft will not exist; create as a root.
    pub orphaned: bool,
}

/// Order `drafts` so every node comes after the node its `parent_name`
/// refers to. Input order is kept wherever the dependencies allow it.
///
/// When no pending node can be placed, the first one in input order is
/// released as an orphan (its parent never appears, or it closes a cycle)
/// and placement resumes, so its own descendants still attach to it.
pub fn creation_order(drafts: Vec<TreeNodeDraft>) -> Vec<Planned> {
    let mut placed: HashSet<String> = HashSet::new();
    let mut ordered = Vec::with_capacity(drafts.len());
    let mut pending = drafts;

    while !pending.is_empty() {
        let before = pending.len();
        let mut waiting = Vec::new();
        for draft in pending {
            let ready = match parent_of(&draft) {
                None => true,
                Some(parent) => placed.contains(parent),
            };
            if ready {
                placed.insert(draft.name.clone());
                ordered.push(Planned { draft, orphaned: false });
            } else {
                waiting.push(draft);
            }
        }
        pending = waiting;

        if !pending.is_empty() && pending.len() == before {
            let draft = pending.remove(0);
            placed.insert(draft.name.clone());
            ordered.push(Planned { draft, orphaned: true });
        }
    }

    ordered
}

/// The named parent, ignoring blanks.
pub fn parent_of(draft: &TreeNodeDraft) -> Option<&str> {
    draft.parent_name.as_deref().map(str::trim).filter(|p| !p.is_empty())
}
