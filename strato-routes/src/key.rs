//! Routing keys, modification tags and domain freshness sets.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one externally routable service: a process plus the
/// container port it serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoutingKey {
    pub process_guid: String,
    pub container_port: u16,
}

impl RoutingKey {
    pub fn new(process_guid: impl Into<String>, container_port: u16) -> Self {
        Self {
            process_guid: process_guid.into(),
            container_port,
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.process_guid, self.container_port)
    }
}

/// Versioning pair carried by every desired and actual record.
///
/// Within one epoch, higher indices win. A change of epoch is an
/// authoritative re-birth and always wins. Equal tags are duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationTag {
    pub epoch: String,
    pub index: u32,
}

impl ModificationTag {
    pub fn new(epoch: impl Into<String>, index: u32) -> Self {
        Self {
            epoch: epoch.into(),
            index,
        }
    }

    /// True when `other` supersedes this tag.
    pub fn succeeded_by(&self, other: &ModificationTag) -> bool {
        self.epoch != other.epoch || other.index > self.index
    }

    /// True when this tag is too old to touch state stamped with `stored`.
    pub fn precedes(&self, stored: &ModificationTag) -> bool {
        self.epoch == stored.epoch && self.index < stored.index
    }
}

/// Domains asserted complete by the last full sync.
///
/// A key whose domain is missing from the set may have been dropped from
/// a sync by accident, so destructive reconciliation is withheld for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSet(BTreeSet<String>);

impl DomainSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.0.contains(domain)
    }

    pub fn insert(&mut self, domain: impl Into<String>) -> bool {
        self.0.insert(domain.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for DomainSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        DomainSet(iter.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_succeeded_by_higher_index() {
        let stored = ModificationTag::new("abc", 1);
        assert!(stored.succeeded_by(&ModificationTag::new("abc", 2)));
        assert!(!stored.succeeded_by(&ModificationTag::new("abc", 1)));
        assert!(!stored.succeeded_by(&ModificationTag::new("abc", 0)));
    }

    #[test]
    fn test_tag_cross_epoch_always_succeeds() {
        let stored = ModificationTag::new("abc", 5);
        assert!(stored.succeeded_by(&ModificationTag::new("def", 0)));
    }

    #[test]
    fn test_tag_precedes_only_within_epoch() {
        let stored = ModificationTag::new("abc", 1);
        assert!(ModificationTag::new("abc", 0).precedes(&stored));
        assert!(!ModificationTag::new("abc", 1).precedes(&stored));
        assert!(!ModificationTag::new("def", 0).precedes(&stored));
    }

    #[test]
    fn test_domain_set_contains() {
        let domains: DomainSet = ["domain"].into_iter().collect();
        assert!(domains.contains("domain"));
        assert!(!domains.contains("other"));
        assert!(DomainSet::new().is_empty());
    }

    #[test]
    fn test_routing_key_display() {
        let key = RoutingKey::new("some-process-guid", 8080);
        assert_eq!(key.to_string(), "some-process-guid:8080");
    }
}
