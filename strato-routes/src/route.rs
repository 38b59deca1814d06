//! Desired-state route records.
//!
//! `DesiredRoutes` is the shape the event watcher hands in: one record
//! per process, with routes grouped by container port. The table fans it
//! out into per-key `DesiredEntry` values.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::key::{ModificationTag, RoutingKey};

/// One externally advertised HTTP hostname with its routing metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HttpRoute {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation_segment: Option<String>,
}

/// One externally advertised TCP port on a router group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TcpRoute {
    pub router_group_guid: String,
    pub external_port: u16,
}

/// One internally advertised hostname.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InternalRoute {
    pub hostname: String,
}

/// Routes for one container port, grouped by route type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSet {
    #[serde(default)]
    pub http: Vec<HttpRoute>,
    #[serde(default)]
    pub tcp: Vec<TcpRoute>,
    #[serde(default)]
    pub internal: Vec<InternalRoute>,
}

impl RouteSet {
    pub fn is_empty(&self) -> bool {
        self.http.is_empty() && self.tcp.is_empty() && self.internal.is_empty()
    }
}

/// Desired-state record for one process, spanning all its container
/// ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredRoutes {
    pub process_guid: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub log_guid: String,
    pub instances: u32,
    #[serde(default)]
    pub metric_tags: BTreeMap<String, String>,
    pub modification_tag: ModificationTag,
    #[serde(default)]
    pub routes: BTreeMap<u16, RouteSet>,
}

impl DesiredRoutes {
    /// Routing keys this record spans.
    pub fn keys(&self) -> impl Iterator<Item = RoutingKey> + '_ {
        self.routes
            .keys()
            .map(|port| RoutingKey::new(self.process_guid.clone(), *port))
    }

    /// The per-key entry for one container port. Ports without routes
    /// yield an entry with empty route collections, which is how a port
    /// dropped from the record clears its routes.
    pub(crate) fn entry_for(&self, container_port: u16) -> DesiredEntry {
        let routes = self.routes.get(&container_port);

        // Hostname collisions collapse, last writer wins.
        let mut http = BTreeMap::new();
        let mut tcp = BTreeSet::new();
        let mut internal = Vec::new();
        if let Some(routes) = routes {
            for route in &routes.http {
                http.insert(route.hostname.clone(), route.clone());
            }
            for route in &routes.tcp {
                tcp.insert(route.clone());
            }
            for route in &routes.internal {
                if !internal.contains(route) {
                    internal.push(route.clone());
                }
            }
        }

        DesiredEntry {
            http_routes: http.into_values().collect(),
            tcp_routes: tcp.into_iter().collect(),
            internal_routes: internal,
            domain: self.domain.clone(),
            log_guid: self.log_guid.clone(),
            instances: self.instances,
            metric_tags: self.metric_tags.clone(),
            modification_tag: self.modification_tag.clone(),
        }
    }
}

/// The per-key authoritative desired record held by the routes index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredEntry {
    /// Hostname-unique, in deterministic order.
    pub http_routes: Vec<HttpRoute>,
    pub tcp_routes: Vec<TcpRoute>,
    /// Order preserved for debugging; equality is set membership.
    pub internal_routes: Vec<InternalRoute>,
    pub domain: String,
    pub log_guid: String,
    /// Endpoints at or beyond this ordinal are not routable.
    pub instances: u32,
    pub metric_tags: BTreeMap<String, String>,
    pub modification_tag: ModificationTag,
}

impl DesiredEntry {
    pub fn has_routes(&self) -> bool {
        !self.http_routes.is_empty()
            || !self.tcp_routes.is_empty()
            || !self.internal_routes.is_empty()
    }

    pub(crate) fn clear_routes(&mut self) {
        self.http_routes.clear();
        self.tcp_routes.clear();
        self.internal_routes.clear();
    }
}
