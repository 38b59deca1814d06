//! The routing table façade.
//!
//! Owns the desired and actual indices, threads every mutation through
//! the differential engine, and returns the batches the router emitters
//! must deliver. Single-writer: callers serialize mutators; reads may
//! share the table between mutations.

use std::collections::{BTreeSet, HashSet};

use tracing::debug;

use crate::diff::{self, Delta, EmitStyle, KeyState};
use crate::endpoint::Endpoint;
use crate::index::{EndpointsIndex, Put, RoutesIndex};
use crate::key::{DomainSet, RoutingKey};
use crate::message::{MessagesToEmit, TcpRouteMappings};
use crate::route::DesiredRoutes;

pub struct RoutingTable {
    routes: RoutesIndex,
    endpoints: EndpointsIndex,
    /// Keys whose routes were carried over from an unfresh sync window.
    carried_over: HashSet<RoutingKey>,
    direct_instance_routes: bool,
}

impl RoutingTable {
    /// An empty table. When `direct_instance_routes` is set, every HTTP
    /// registration prefers the container address over the host mapping
    /// for the life of the table.
    pub fn new(direct_instance_routes: bool) -> Self {
        RoutingTable {
            routes: RoutesIndex::default(),
            endpoints: EndpointsIndex::default(),
            carried_over: HashSet::new(),
            direct_instance_routes,
        }
    }

    /// Applies a desired-state update, fanning the record out across all
    /// routing keys it spans. Keys present in `before` but dropped from
    /// `after` lose their routes. Endpoints are left untouched.
    pub fn set_routes(
        &mut self,
        before: Option<&DesiredRoutes>,
        after: &DesiredRoutes,
    ) -> (TcpRouteMappings, MessagesToEmit) {
        if let Some(before) = before
            && before.process_guid != after.process_guid
        {
            debug!(
                before = %before.process_guid,
                after = %after.process_guid,
                "dropping desired update with mismatched process"
            );
            return Delta::default().into_parts();
        }

        let mut keys: BTreeSet<RoutingKey> = after.keys().collect();
        if let Some(before) = before {
            keys.extend(before.keys());
        }

        let mut delta = Delta::default();
        for key in keys {
            let candidate = after.entry_for(key.container_port);
            match self.routes.put(&key, candidate) {
                Put::Applied(previous) => {
                    let old = KeyState {
                        desired: previous.as_ref(),
                        endpoints: self.endpoints.map(&key),
                    };
                    let new = KeyState {
                        desired: self.routes.get(&key),
                        endpoints: self.endpoints.map(&key),
                    };
                    delta.merge(diff::diff(
                        &old,
                        &new,
                        EmitStyle::Normal,
                        self.direct_instance_routes,
                    ));
                    self.carried_over.remove(&key);
                    self.collect(&key);
                }
                Put::Dropped => {}
            }
        }
        delta.into_parts()
    }

    /// Clears the routes of every key the record spans, under tag
    /// gating. A tag equal to the stored one is honored; only strictly
    /// preceding tags are dropped.
    pub fn remove_routes(&mut self, desired: &DesiredRoutes) -> (TcpRouteMappings, MessagesToEmit) {
        let keys: Vec<RoutingKey> = desired.keys().collect();

        let mut delta = Delta::default();
        for key in keys {
            match self
                .routes
                .clear_routes(&key, &desired.modification_tag)
            {
                Put::Applied(previous) => {
                    let old = KeyState {
                        desired: previous.as_ref(),
                        endpoints: self.endpoints.map(&key),
                    };
                    let new = KeyState {
                        desired: self.routes.get(&key),
                        endpoints: self.endpoints.map(&key),
                    };
                    delta.merge(diff::diff(
                        &old,
                        &new,
                        EmitStyle::Normal,
                        self.direct_instance_routes,
                    ));
                    self.carried_over.remove(&key);
                    self.collect(&key);
                }
                Put::Dropped => {}
            }
        }
        delta.into_parts()
    }

    /// Inserts or updates one endpoint. Registrations cover only the
    /// endpoint's own contribution; routes are left untouched.
    pub fn add_endpoint(
        &mut self,
        key: &RoutingKey,
        endpoint: Endpoint,
    ) -> (TcpRouteMappings, MessagesToEmit) {
        if endpoint.container_port != key.container_port {
            debug!(
                key = %key,
                instance = %endpoint.instance_guid,
                "dropping endpoint with mismatched container port"
            );
            return Delta::default().into_parts();
        }

        let snapshot = self.endpoints.map(key).cloned();
        match self.endpoints.put(key, endpoint) {
            Put::Applied(_) => {
                let style = if self.carried_over.contains(key) {
                    EmitStyle::CarriedOver
                } else {
                    EmitStyle::Normal
                };
                let old = KeyState {
                    desired: self.routes.get(key),
                    endpoints: snapshot.as_ref(),
                };
                let new = KeyState {
                    desired: self.routes.get(key),
                    endpoints: self.endpoints.map(key),
                };
                diff::diff(&old, &new, style, self.direct_instance_routes).into_parts()
            }
            Put::Dropped => Delta::default().into_parts(),
        }
    }

    /// Removes one endpoint unless the supplied tag is stale. A routable
    /// endpoint takes all of its registrations with it.
    pub fn remove_endpoint(
        &mut self,
        key: &RoutingKey,
        endpoint: &Endpoint,
    ) -> (TcpRouteMappings, MessagesToEmit) {
        let snapshot = self.endpoints.map(key).cloned();
        match self.endpoints.remove(key, endpoint) {
            Some(_) => {
                let old = KeyState {
                    desired: self.routes.get(key),
                    endpoints: snapshot.as_ref(),
                };
                let new = KeyState {
                    desired: self.routes.get(key),
                    endpoints: self.endpoints.map(key),
                };
                let delta = diff::diff(&old, &new, EmitStyle::Normal, self.direct_instance_routes);
                self.collect(key);
                delta.into_parts()
            }
            None => Delta::default().into_parts(),
        }
    }

    /// Atomically replaces the table with `new_table` and returns the
    /// delta needed to reconcile the routers.
    ///
    /// Keys whose domain is missing from `fresh_domains` are protected
    /// against partial syncs: when the new table carries no routes for
    /// such a key, the old routes are retained and the key is marked
    /// carried-over, so later registrations re-assert them as
    /// authoritative overwrites. Endpoints always come from the new
    /// table; the ones it omits are unregistered.
    pub fn swap(
        &mut self,
        new_table: RoutingTable,
        fresh_domains: &DomainSet,
    ) -> (TcpRouteMappings, MessagesToEmit) {
        let RoutingTable {
            routes: mut merged_routes,
            endpoints: merged_endpoints,
            ..
        } = new_table;

        let mut carried = HashSet::new();
        let mut completing = HashSet::new();
        for (key, old_entry) in self.routes.iter() {
            if fresh_domains.contains(&old_entry.domain) {
                if self.carried_over.contains(key) {
                    completing.insert(key.clone());
                }
                continue;
            }
            let new_has_routes = merged_routes.get(key).is_some_and(|e| e.has_routes());
            if !new_has_routes && old_entry.has_routes() {
                merged_routes.insert(key.clone(), old_entry.clone());
                carried.insert(key.clone());
            }
        }

        let mut keys: BTreeSet<RoutingKey> = self.routes.keys().cloned().collect();
        keys.extend(self.endpoints.keys().cloned());
        keys.extend(merged_routes.keys().cloned());
        keys.extend(merged_endpoints.keys().cloned());

        let mut delta = Delta::default();
        for key in &keys {
            let style = if carried.contains(key) {
                EmitStyle::CarriedOver
            } else if completing.contains(key) {
                EmitStyle::FreshCompletion
            } else {
                EmitStyle::Normal
            };
            let old = KeyState {
                desired: self.routes.get(key),
                endpoints: self.endpoints.map(key),
            };
            let new = KeyState {
                desired: merged_routes.get(key),
                endpoints: merged_endpoints.map(key),
            };
            delta.merge(diff::diff(&old, &new, style, self.direct_instance_routes));
        }

        self.routes = merged_routes;
        self.endpoints = merged_endpoints;
        self.carried_over = carried;
        for key in &keys {
            self.collect(key);
        }
        delta.into_parts()
    }

    /// Current external registration state: the full routable product of
    /// HTTP routes and TCP mappings, with no unregistrations. Used by
    /// the periodic syncer to refresh router caches.
    pub fn get_external_routing_events(&self) -> (TcpRouteMappings, MessagesToEmit) {
        let mut delta = Delta::default();
        for (key, desired) in self.routes.iter() {
            let state = KeyState {
                desired: Some(desired),
                endpoints: self.endpoints.map(key),
            };
            delta.merge(diff::external_dump(&state, self.direct_instance_routes));
        }
        delta.into_parts()
    }

    /// Current internal registration state.
    pub fn get_internal_routing_events(&self) -> (TcpRouteMappings, MessagesToEmit) {
        let mut messages = MessagesToEmit::default();
        for (key, desired) in self.routes.iter() {
            let state = KeyState {
                desired: Some(desired),
                endpoints: self.endpoints.map(key),
            };
            messages.merge(diff::internal_dump(&state));
        }
        (TcpRouteMappings::default(), messages)
    }

    /// Number of (key, slot) tuples held. Per key and route stream the
    /// table keeps the larger of the stream's route count and the
    /// endpoint count, so a partially emptied key holds its slots until
    /// both sides are gone.
    pub fn table_size(&self) -> usize {
        let mut keys: BTreeSet<&RoutingKey> = self.routes.keys().collect();
        keys.extend(self.endpoints.keys());

        keys.iter()
            .map(|&key| {
                let endpoints = self.endpoints.len_for(key);
                let (http, tcp, internal) = self
                    .routes
                    .get(key)
                    .map(|e| {
                        (
                            e.http_routes.len(),
                            e.tcp_routes.len(),
                            e.internal_routes.len(),
                        )
                    })
                    .unwrap_or((0, 0, 0));
                http.max(endpoints) + tcp.max(endpoints) + internal.max(endpoints)
            })
            .sum()
    }

    /// Routable (endpoint, HTTP route) pairs.
    pub fn http_associations_count(&self) -> usize {
        self.routes
            .iter()
            .map(|(key, desired)| {
                diff::routable_endpoints(Some(desired), self.endpoints.map(key)).len()
                    * desired.http_routes.len()
            })
            .sum()
    }

    /// Routable (endpoint, TCP route) pairs.
    pub fn tcp_associations_count(&self) -> usize {
        self.routes
            .iter()
            .map(|(key, desired)| {
                diff::routable_endpoints(Some(desired), self.endpoints.map(key)).len()
                    * desired.tcp_routes.len()
            })
            .sum()
    }

    /// Routable (endpoint, internal route) associations. Every pair
    /// advertises two URIs, the bare and the index-qualified hostname,
    /// and each counts.
    pub fn internal_associations_count(&self) -> usize {
        self.routes
            .iter()
            .map(|(key, desired)| {
                diff::routable_endpoints(Some(desired), self.endpoints.map(key)).len()
                    * desired.internal_routes.len()
                    * 2
            })
            .sum()
    }

    /// Drops a key once it holds no routes and no endpoints. Partial
    /// emptiness is retained: endpoints can precede routes and vice
    /// versa.
    fn collect(&mut self, key: &RoutingKey) {
        let routeless = self.routes.get(key).is_none_or(|e| !e.has_routes());
        let endpointless = self.endpoints.len_for(key) == 0;
        if routeless && endpointless {
            self.routes.remove(key);
            self.endpoints.remove_key(key);
            self.carried_over.remove(key);
        }
    }
}
