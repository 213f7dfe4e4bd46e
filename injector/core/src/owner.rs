use crate::k8s::OwnerReference;
use std::collections::BTreeSet;

/// The owners of an object, identified by UID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OwnerSet(BTreeSet<String>);

impl OwnerSet {
    pub fn new(refs: &[OwnerReference]) -> Self {
        Self(refs.iter().map(|r| r.uid.clone()).collect())
    }

    /// True if both sets name at least one common owner.
    pub fn shares(&self, other: &Self) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Copies `owner` as a reference that neither controls its dependent nor
/// blocks the owner's deletion.
pub fn non_controller(owner: &OwnerReference) -> OwnerReference {
    OwnerReference {
        controller: Some(false),
        block_owner_deletion: None,
        ..owner.clone()
    }
}
