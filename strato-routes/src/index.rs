//! Tag-gated state indices.
//!
//! Both indices silently drop writes that arrive out of order: the
//! upstream event stream is authoritative and not retryable, so a stale
//! record is expected traffic, not an error.

use std::collections::HashMap;

use tracing::debug;

use crate::endpoint::{Endpoint, Presence};
use crate::key::{ModificationTag, RoutingKey};
use crate::route::DesiredEntry;

/// Outcome of a gated write.
#[derive(Debug)]
pub(crate) enum Put<T> {
    /// The write was applied; carries the replaced value, if any.
    Applied(Option<T>),
    /// The write was stale or a duplicate and was dropped.
    Dropped,
}

/// Maps routing keys to their authoritative desired entry.
#[derive(Debug, Clone, Default)]
pub(crate) struct RoutesIndex {
    entries: HashMap<RoutingKey, DesiredEntry>,
}

impl RoutesIndex {
    pub fn get(&self, key: &RoutingKey) -> Option<&DesiredEntry> {
        self.entries.get(key)
    }

    /// Replaces the stored entry unless the incoming tag fails to
    /// supersede it. Equal tags are duplicates and leave the stored
    /// entry untouched.
    pub fn put(&mut self, key: &RoutingKey, entry: DesiredEntry) -> Put<DesiredEntry> {
        if let Some(stored) = self.entries.get(key)
            && !stored
                .modification_tag
                .succeeded_by(&entry.modification_tag)
        {
            debug!(key = %key, "dropping stale route update");
            return Put::Dropped;
        }
        Put::Applied(self.entries.insert(key.clone(), entry))
    }

    /// Empties the stored entry's route collections. Unlike `put`, a tag
    /// equal to the stored one is allowed through: removal is only
    /// rejected for tags that strictly precede.
    pub fn clear_routes(&mut self, key: &RoutingKey, tag: &ModificationTag) -> Put<DesiredEntry> {
        let Some(stored) = self.entries.get_mut(key) else {
            return Put::Dropped;
        };
        if tag.precedes(&stored.modification_tag) {
            debug!(key = %key, "dropping stale route removal");
            return Put::Dropped;
        }

        let previous = stored.clone();
        stored.clear_routes();
        if stored.modification_tag.succeeded_by(tag) {
            stored.modification_tag = tag.clone();
        }
        Put::Applied(Some(previous))
    }

    /// Unconditional raw write, used when assembling a swapped-in table.
    pub fn insert(&mut self, key: RoutingKey, entry: DesiredEntry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &RoutingKey) -> Option<DesiredEntry> {
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RoutingKey, &DesiredEntry)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RoutingKey> {
        self.entries.keys()
    }
}

/// Maps routing keys to their live endpoints, keyed by instance
/// identity.
#[derive(Debug, Clone, Default)]
pub(crate) struct EndpointsIndex {
    entries: HashMap<RoutingKey, HashMap<String, Endpoint>>,
}

impl EndpointsIndex {
    pub fn map(&self, key: &RoutingKey) -> Option<&HashMap<String, Endpoint>> {
        self.entries.get(key)
    }

    pub fn len_for(&self, key: &RoutingKey) -> usize {
        self.entries.get(key).map_or(0, HashMap::len)
    }

    /// Inserts or updates one endpoint under per-instance tag gating.
    ///
    /// An equal tag is accepted only for the ordinary-to-evacuating
    /// presence flip (evacuation does not bump the record version) or
    /// for a byte-identical duplicate, which is dropped as a no-op.
    pub fn put(&mut self, key: &RoutingKey, endpoint: Endpoint) -> Put<Endpoint> {
        let instances = self.entries.entry(key.clone()).or_default();
        let accept = match instances.get(&endpoint.instance_guid) {
            None => true,
            Some(stored) if stored.modification_tag.succeeded_by(&endpoint.modification_tag) => {
                true
            }
            Some(stored) if stored.modification_tag == endpoint.modification_tag => {
                let evacuation = stored.presence == Presence::Ordinary
                    && endpoint.presence == Presence::Evacuating;
                if !evacuation && *stored != endpoint {
                    debug!(
                        key = %key,
                        instance = %endpoint.instance_guid,
                        "dropping conflicting endpoint update with duplicate tag"
                    );
                }
                evacuation
            }
            Some(_) => {
                debug!(
                    key = %key,
                    instance = %endpoint.instance_guid,
                    "dropping stale endpoint update"
                );
                false
            }
        };

        if accept {
            Put::Applied(instances.insert(endpoint.instance_guid.clone(), endpoint))
        } else {
            Put::Dropped
        }
    }

    /// Removes one endpoint unless the supplied tag strictly precedes
    /// the stored one.
    pub fn remove(&mut self, key: &RoutingKey, endpoint: &Endpoint) -> Option<Endpoint> {
        let instances = self.entries.get_mut(key)?;
        let stored = instances.get(&endpoint.instance_guid)?;
        if endpoint.modification_tag.precedes(&stored.modification_tag) {
            debug!(
                key = %key,
                instance = %endpoint.instance_guid,
                "dropping stale endpoint removal"
            );
            return None;
        }
        instances.remove(&endpoint.instance_guid)
    }

    pub fn remove_key(&mut self, key: &RoutingKey) {
        self.entries.remove(key);
    }

    pub fn keys(&self) -> impl Iterator<Item = &RoutingKey> {
        self.entries.keys()
    }
}
