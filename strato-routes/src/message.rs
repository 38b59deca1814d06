//! Wire shapes handed to the router emitters.
//!
//! `RegistryMessage` covers both the external HTTP registry and the
//! internal service-discovery bus; `TcpRouteMapping` is the routing-API
//! record for TCP port mappings. Batches come in registration and
//! unregistration halves and must be delivered atomically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::key::ModificationTag;
use crate::route::{HttpRoute, InternalRoute, TcpRoute};

/// Component tag stamped on every internal registration.
pub const ROUTE_EMITTER_COMPONENT: &str = "route-emitter";

fn is_false(v: &bool) -> bool {
    !*v
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// A single registry record for one (endpoint, route) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMessage {
    pub uris: Vec<String>,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_port: Option<u16>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_instance_index: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_cert_domain_san: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_service_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Internal messages only; zero when the emission was not triggered
    /// by an endpoint change.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub endpoint_updated_at_ns: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation_segment: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metric_tags: BTreeMap<String, String>,
    /// Instructs routers to overwrite any cached entry for the same
    /// hostname/endpoint pair.
    #[serde(default, skip_serializing_if = "is_false")]
    pub force_refresh: bool,
}

impl RegistryMessage {
    /// External HTTP registration for one (endpoint, hostname) pair.
    pub fn external(
        endpoint: &Endpoint,
        route: &HttpRoute,
        log_guid: &str,
        metric_tags: &BTreeMap<String, String>,
        direct_instance_routes: bool,
    ) -> Self {
        let (host, port, tls_port) = if direct_instance_routes {
            (
                endpoint.container_ip.clone(),
                endpoint.container_port,
                endpoint.container_tls_proxy_port,
            )
        } else {
            (endpoint.host.clone(), endpoint.port, endpoint.tls_proxy_port)
        };

        RegistryMessage {
            uris: vec![route.hostname.clone()],
            host,
            port: Some(port),
            tls_port: (tls_port != 0).then_some(tls_port),
            app: log_guid.to_string(),
            private_instance_id: Some(endpoint.instance_guid.clone()),
            private_instance_index: endpoint.index.to_string(),
            server_cert_domain_san: endpoint
                .has_tls_proxy()
                .then(|| endpoint.instance_guid.clone()),
            route_service_url: route.route_service_url.clone(),
            isolation_segment: route.isolation_segment.clone(),
            metric_tags: metric_tags.clone(),
            ..Default::default()
        }
    }

    /// Internal service-discovery registration. Advertises the bare and
    /// the index-qualified hostname in one message; the host is the
    /// container address, not the host mapping.
    pub fn internal(endpoint: &Endpoint, route: &InternalRoute, log_guid: &str) -> Self {
        RegistryMessage {
            uris: vec![
                route.hostname.clone(),
                format!("{}.{}", endpoint.index, route.hostname),
            ],
            host: endpoint.container_ip.clone(),
            app: log_guid.to_string(),
            private_instance_index: endpoint.index.to_string(),
            tags: BTreeMap::from([(
                "component".to_string(),
                ROUTE_EMITTER_COMPONENT.to_string(),
            )]),
            ..Default::default()
        }
    }
}

/// Routing-API record for one TCP port mapping. Static: ttl is always 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpRouteMapping {
    pub router_group_guid: String,
    pub host_ip: String,
    pub host_port: u16,
    pub external_port: u16,
    pub ttl: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modification_tag: Option<ModificationTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni_hostname: Option<String>,
}

impl TcpRouteMapping {
    /// Mapping for one (endpoint, tcp-route) pair.
    pub fn for_route(endpoint: &Endpoint, route: &TcpRoute) -> Self {
        TcpRouteMapping {
            router_group_guid: route.router_group_guid.clone(),
            host_ip: endpoint.host.clone(),
            host_port: endpoint.port,
            external_port: route.external_port,
            ttl: 0,
            instance_id: endpoint.instance_guid.clone(),
            modification_tag: Some(endpoint.modification_tag.clone()),
            sni_hostname: None,
        }
    }

    /// Equality on the routable substance, ignoring the version stamp.
    pub(crate) fn same_mapping(&self, other: &TcpRouteMapping) -> bool {
        self.router_group_guid == other.router_group_guid
            && self.host_ip == other.host_ip
            && self.host_port == other.host_port
            && self.external_port == other.external_port
            && self.ttl == other.ttl
            && self.instance_id == other.instance_id
            && self.sni_hostname == other.sni_hostname
    }
}

/// HTTP and internal registry batches produced by one table operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesToEmit {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registration_messages: Vec<RegistryMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unregistration_messages: Vec<RegistryMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub internal_registration_messages: Vec<RegistryMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub internal_unregistration_messages: Vec<RegistryMessage>,
}

impl MessagesToEmit {
    pub fn is_empty(&self) -> bool {
        self.registration_messages.is_empty()
            && self.unregistration_messages.is_empty()
            && self.internal_registration_messages.is_empty()
            && self.internal_unregistration_messages.is_empty()
    }

    pub fn merge(&mut self, other: MessagesToEmit) {
        self.registration_messages.extend(other.registration_messages);
        self.unregistration_messages.extend(other.unregistration_messages);
        self.internal_registration_messages
            .extend(other.internal_registration_messages);
        self.internal_unregistration_messages
            .extend(other.internal_unregistration_messages);
    }
}

/// TCP mapping batches produced by one table operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpRouteMappings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registrations: Vec<TcpRouteMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unregistrations: Vec<TcpRouteMapping>,
}

impl TcpRouteMappings {
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty() && self.unregistrations.is_empty()
    }

    pub fn merge(&mut self, other: TcpRouteMappings) {
        self.registrations.extend(other.registrations);
        self.unregistrations.extend(other.unregistrations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint() -> Endpoint {
        Endpoint {
            instance_guid: "ig-1".into(),
            host: "1.1.1.1".into(),
            container_ip: "1.2.3.4".into(),
            index: 0,
            port: 11,
            container_port: 8080,
            since: 1,
            modification_tag: ModificationTag::new("abc", 1),
            ..Default::default()
        }
    }

    #[test]
    fn test_external_message_wire_shape() {
        let route = HttpRoute {
            hostname: "foo.example.com".into(),
            ..Default::default()
        };
        let message =
            RegistryMessage::external(&endpoint(), &route, "some-log-guid", &BTreeMap::new(), false);

        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "uris": ["foo.example.com"],
                "host": "1.1.1.1",
                "port": 11,
                "app": "some-log-guid",
                "private_instance_id": "ig-1",
                "private_instance_index": "0",
            })
        );
    }

    #[test]
    fn test_external_message_direct_instance_routes() {
        let route = HttpRoute {
            hostname: "foo.example.com".into(),
            ..Default::default()
        };
        let message =
            RegistryMessage::external(&endpoint(), &route, "some-log-guid", &BTreeMap::new(), true);

        assert_eq!(message.host, "1.2.3.4");
        assert_eq!(message.port, Some(8080));
    }

    #[test]
    fn test_external_message_tls_ports() {
        let mut ep = endpoint();
        ep.tls_proxy_port = 61001;
        ep.container_tls_proxy_port = 61002;
        let route = HttpRoute {
            hostname: "foo.example.com".into(),
            ..Default::default()
        };

        let message =
            RegistryMessage::external(&ep, &route, "some-log-guid", &BTreeMap::new(), false);
        assert_eq!(message.tls_port, Some(61001));
        assert_eq!(message.server_cert_domain_san.as_deref(), Some("ig-1"));

        let direct = RegistryMessage::external(&ep, &route, "some-log-guid", &BTreeMap::new(), true);
        assert_eq!(direct.tls_port, Some(61002));
    }

    #[test]
    fn test_internal_message_wire_shape() {
        let route = InternalRoute {
            hostname: "internal".into(),
        };
        let message = RegistryMessage::internal(&endpoint(), &route, "some-log-guid");

        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "uris": ["internal", "0.internal"],
                "host": "1.2.3.4",
                "app": "some-log-guid",
                "private_instance_index": "0",
                "tags": {"component": "route-emitter"},
            })
        );
    }

    #[test]
    fn test_force_refresh_serialized_only_when_set() {
        let route = InternalRoute {
            hostname: "internal".into(),
        };
        let mut message = RegistryMessage::internal(&endpoint(), &route, "some-log-guid");
        message.force_refresh = true;

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["force_refresh"], json!(true));
    }

    #[test]
    fn test_tcp_mapping_wire_shape() {
        let route = TcpRoute {
            router_group_guid: "rg".into(),
            external_port: 9999,
        };
        let mapping = TcpRouteMapping::for_route(&endpoint(), &route);

        assert_eq!(
            serde_json::to_value(&mapping).unwrap(),
            json!({
                "router_group_guid": "rg",
                "host_ip": "1.1.1.1",
                "host_port": 11,
                "external_port": 9999,
                "ttl": 0,
                "instance_id": "ig-1",
                "modification_tag": {"epoch": "abc", "index": 1},
            })
        );
    }

    #[test]
    fn test_same_mapping_ignores_modification_tag() {
        let route = TcpRoute {
            router_group_guid: "rg".into(),
            external_port: 9999,
        };
        let a = TcpRouteMapping::for_route(&endpoint(), &route);
        let mut ep = endpoint();
        ep.modification_tag = ModificationTag::new("def", 0);
        let b = TcpRouteMapping::for_route(&ep, &route);

        assert_ne!(a, b);
        assert!(a.same_mapping(&b));
    }

    #[test]
    fn test_batch_merge_and_emptiness() {
        let mut messages = MessagesToEmit::default();
        assert!(messages.is_empty());

        let route = InternalRoute {
            hostname: "internal".into(),
        };
        messages.merge(MessagesToEmit {
            internal_registration_messages: vec![RegistryMessage::internal(
                &endpoint(),
                &route,
                "some-log-guid",
            )],
            ..Default::default()
        });
        assert!(!messages.is_empty());
        assert_eq!(messages.internal_registration_messages.len(), 1);
    }
}
