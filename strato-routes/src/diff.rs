//! The differential engine.
//!
//! Resolves one routing key's old and new state into the minimal batches
//! the routers need. Every public table mutator funnels through
//! [`diff`]; the periodic dump paths share the same pair construction so
//! a delta plus the routers' previous view always reconstructs the new
//! routable view.

use std::collections::{BTreeMap, HashMap};

use crate::endpoint::{Endpoint, Presence};
use crate::message::{MessagesToEmit, RegistryMessage, TcpRouteMapping, TcpRouteMappings};
use crate::route::DesiredEntry;

/// One key's desired entry and endpoint set.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct KeyState<'a> {
    pub desired: Option<&'a DesiredEntry>,
    pub endpoints: Option<&'a HashMap<String, Endpoint>>,
}

/// How registrations produced by a diff are decorated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EmitStyle {
    /// Plain delta emission.
    Normal,
    /// The key's routes are carried over from an unfresh sync window;
    /// registrations must tell routers to overwrite their caches.
    CarriedOver,
    /// The key's domain just turned fresh again; surviving pairs are
    /// re-asserted once, also as overwrites.
    FreshCompletion,
}

/// The three-stream output of one table operation.
#[derive(Debug, Default)]
pub(crate) struct Delta {
    pub tcp: TcpRouteMappings,
    pub messages: MessagesToEmit,
}

impl Delta {
    pub fn merge(&mut self, other: Delta) {
        self.tcp.merge(other.tcp);
        self.messages.merge(other.messages);
    }

    pub fn into_parts(self) -> (TcpRouteMappings, MessagesToEmit) {
        (self.tcp, self.messages)
    }
}

/// Endpoints that may carry traffic for the key: within the desired
/// instance count and not evacuating. Sorted for deterministic emission.
pub(crate) fn routable_endpoints<'a>(
    desired: Option<&'a DesiredEntry>,
    endpoints: Option<&'a HashMap<String, Endpoint>>,
) -> Vec<&'a Endpoint> {
    let Some(desired) = desired else {
        return Vec::new();
    };
    let Some(endpoints) = endpoints else {
        return Vec::new();
    };
    let mut routable: Vec<_> = endpoints
        .values()
        .filter(|e| e.index < desired.instances && e.presence == Presence::Ordinary)
        .collect();
    routable.sort_by(|a, b| a.instance_guid.cmp(&b.instance_guid));
    routable
}

fn http_pairs(
    state: &KeyState<'_>,
    direct_instance_routes: bool,
) -> BTreeMap<(String, String), RegistryMessage> {
    let mut pairs = BTreeMap::new();
    let Some(desired) = state.desired else {
        return pairs;
    };
    for endpoint in routable_endpoints(state.desired, state.endpoints) {
        for route in &desired.http_routes {
            pairs.insert(
                (endpoint.instance_guid.clone(), route.hostname.clone()),
                RegistryMessage::external(
                    endpoint,
                    route,
                    &desired.log_guid,
                    &desired.metric_tags,
                    direct_instance_routes,
                ),
            );
        }
    }
    pairs
}

fn tcp_pairs(state: &KeyState<'_>) -> BTreeMap<(String, String, u16), TcpRouteMapping> {
    let mut pairs = BTreeMap::new();
    let Some(desired) = state.desired else {
        return pairs;
    };
    for endpoint in routable_endpoints(state.desired, state.endpoints) {
        for route in &desired.tcp_routes {
            pairs.insert(
                (
                    endpoint.instance_guid.clone(),
                    route.router_group_guid.clone(),
                    route.external_port,
                ),
                TcpRouteMapping::for_route(endpoint, route),
            );
        }
    }
    pairs
}

fn internal_pairs(state: &KeyState<'_>) -> BTreeMap<(String, String), RegistryMessage> {
    let mut pairs = BTreeMap::new();
    let Some(desired) = state.desired else {
        return pairs;
    };
    for endpoint in routable_endpoints(state.desired, state.endpoints) {
        for route in &desired.internal_routes {
            pairs.insert(
                (endpoint.instance_guid.clone(), route.hostname.clone()),
                RegistryMessage::internal(endpoint, route, &desired.log_guid),
            );
        }
    }
    pairs
}

fn endpoint_changed(old: &KeyState<'_>, new: &KeyState<'_>, instance: &str) -> bool {
    let old_endpoint = old.endpoints.and_then(|m| m.get(instance));
    let new_endpoint = new.endpoints.and_then(|m| m.get(instance));
    old_endpoint != new_endpoint
}

/// Computes the minimal delta between two states of one key.
///
/// Per stream: a pair present only in the new state registers, a pair
/// present only in the old state unregisters (with the content the
/// routers last saw), a pair present in both re-registers only when its
/// payload changed or the emit style demands a re-assert.
pub(crate) fn diff(
    old: &KeyState<'_>,
    new: &KeyState<'_>,
    style: EmitStyle,
    direct_instance_routes: bool,
) -> Delta {
    let mut delta = Delta::default();
    let reassert = style == EmitStyle::FreshCompletion;
    let force = style != EmitStyle::Normal;

    let old_http = http_pairs(old, direct_instance_routes);
    let new_http = http_pairs(new, direct_instance_routes);
    for (id, message) in &new_http {
        if old_http.get(id) != Some(message) || reassert {
            let mut message = message.clone();
            message.force_refresh = force;
            delta.messages.registration_messages.push(message);
        }
    }
    for (id, message) in &old_http {
        if !new_http.contains_key(id) {
            delta.messages.unregistration_messages.push(message.clone());
        }
    }

    let old_tcp = tcp_pairs(old);
    let new_tcp = tcp_pairs(new);
    for (id, mapping) in &new_tcp {
        let unchanged = old_tcp.get(id).is_some_and(|m| m.same_mapping(mapping));
        if !unchanged || reassert {
            delta.tcp.registrations.push(mapping.clone());
        }
    }
    for (id, mapping) in &old_tcp {
        if !new_tcp.contains_key(id) {
            delta.tcp.unregistrations.push(mapping.clone());
        }
    }

    let old_internal = internal_pairs(old);
    let new_internal = internal_pairs(new);
    for (id, message) in &new_internal {
        if old_internal.get(id) != Some(message) || reassert {
            let mut message = message.clone();
            message.force_refresh = force;
            // The timestamp rides along only when an endpoint change
            // triggered the emission, never for route-only updates.
            if endpoint_changed(old, new, &id.0)
                && let Some(endpoint) = new.endpoints.and_then(|m| m.get(&id.0))
            {
                message.endpoint_updated_at_ns = endpoint.since;
            }
            delta.messages.internal_registration_messages.push(message);
        }
    }
    for (id, message) in &old_internal {
        if !new_internal.contains_key(id) {
            delta
                .messages
                .internal_unregistration_messages
                .push(message.clone());
        }
    }

    delta
}

/// Full registration dump of the external streams, for periodic router
/// refreshes. Not a delta: timestamps and overwrite flags stay unset.
pub(crate) fn external_dump(state: &KeyState<'_>, direct_instance_routes: bool) -> Delta {
    Delta {
        tcp: TcpRouteMappings {
            registrations: tcp_pairs(state).into_values().collect(),
            ..Default::default()
        },
        messages: MessagesToEmit {
            registration_messages: http_pairs(state, direct_instance_routes)
                .into_values()
                .collect(),
            ..Default::default()
        },
    }
}

/// Full registration dump of the internal stream.
pub(crate) fn internal_dump(state: &KeyState<'_>) -> MessagesToEmit {
    MessagesToEmit {
        internal_registration_messages: internal_pairs(state).into_values().collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ModificationTag;
    use crate::route::{HttpRoute, InternalRoute, TcpRoute};

    fn entry(instances: u32) -> DesiredEntry {
        DesiredEntry {
            http_routes: vec![HttpRoute {
                hostname: "foo.example.com".into(),
                ..Default::default()
            }],
            tcp_routes: vec![TcpRoute {
                router_group_guid: "rg".into(),
                external_port: 9999,
            }],
            internal_routes: vec![InternalRoute {
                hostname: "internal".into(),
            }],
            log_guid: "some-log-guid".into(),
            instances,
            modification_tag: ModificationTag::new("abc", 1),
            ..Default::default()
        }
    }

    fn endpoints(indices: &[u32]) -> HashMap<String, Endpoint> {
        indices
            .iter()
            .map(|i| {
                let guid = format!("ig-{i}");
                (
                    guid.clone(),
                    Endpoint {
                        instance_guid: guid,
                        index: *i,
                        host: format!("10.0.0.{i}"),
                        container_ip: format!("10.255.0.{i}"),
                        port: 1000 + *i as u16,
                        container_port: 8080,
                        since: 7,
                        modification_tag: ModificationTag::new("abc", 1),
                        ..Default::default()
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_identical_states_produce_empty_delta() {
        let desired = entry(2);
        let eps = endpoints(&[0, 1]);
        let state = KeyState {
            desired: Some(&desired),
            endpoints: Some(&eps),
        };

        let delta = diff(&state, &state, EmitStyle::Normal, false);
        assert!(delta.messages.is_empty());
        assert!(delta.tcp.is_empty());
    }

    #[test]
    fn test_new_endpoint_registers_all_streams() {
        let desired = entry(2);
        let old_eps = endpoints(&[0]);
        let new_eps = endpoints(&[0, 1]);

        let delta = diff(
            &KeyState {
                desired: Some(&desired),
                endpoints: Some(&old_eps),
            },
            &KeyState {
                desired: Some(&desired),
                endpoints: Some(&new_eps),
            },
            EmitStyle::Normal,
            false,
        );

        assert_eq!(delta.messages.registration_messages.len(), 1);
        assert_eq!(delta.tcp.registrations.len(), 1);
        assert_eq!(delta.messages.internal_registration_messages.len(), 1);
        // endpoint-triggered: the timestamp rides along
        assert_eq!(
            delta.messages.internal_registration_messages[0].endpoint_updated_at_ns,
            7
        );
        assert!(delta.messages.unregistration_messages.is_empty());
    }

    #[test]
    fn test_lost_endpoint_unregisters_with_old_content() {
        let desired = entry(2);
        let old_eps = endpoints(&[0, 1]);
        let new_eps = endpoints(&[0]);

        let delta = diff(
            &KeyState {
                desired: Some(&desired),
                endpoints: Some(&old_eps),
            },
            &KeyState {
                desired: Some(&desired),
                endpoints: Some(&new_eps),
            },
            EmitStyle::Normal,
            false,
        );

        assert_eq!(delta.messages.unregistration_messages.len(), 1);
        assert_eq!(delta.messages.unregistration_messages[0].host, "10.0.0.1");
        assert_eq!(delta.tcp.unregistrations.len(), 1);
        assert_eq!(delta.messages.internal_unregistration_messages.len(), 1);
        assert!(delta.messages.registration_messages.is_empty());
    }

    #[test]
    fn test_tag_only_endpoint_bump_is_quiet() {
        let desired = entry(1);
        let old_eps = endpoints(&[0]);
        let mut new_eps = endpoints(&[0]);
        new_eps.get_mut("ig-0").unwrap().modification_tag = ModificationTag::new("def", 0);

        let delta = diff(
            &KeyState {
                desired: Some(&desired),
                endpoints: Some(&old_eps),
            },
            &KeyState {
                desired: Some(&desired),
                endpoints: Some(&new_eps),
            },
            EmitStyle::Normal,
            false,
        );

        assert!(delta.messages.is_empty());
        assert!(delta.tcp.is_empty());
    }

    #[test]
    fn test_fresh_completion_reasserts_surviving_pairs() {
        let desired = entry(1);
        let eps = endpoints(&[0]);
        let state = KeyState {
            desired: Some(&desired),
            endpoints: Some(&eps),
        };

        let delta = diff(&state, &state, EmitStyle::FreshCompletion, false);
        assert_eq!(delta.messages.registration_messages.len(), 1);
        assert!(delta.messages.registration_messages[0].force_refresh);
        assert_eq!(delta.tcp.registrations.len(), 1);
        assert_eq!(delta.messages.internal_registration_messages.len(), 1);
        // surviving endpoints are not a change: no timestamp
        assert_eq!(
            delta.messages.internal_registration_messages[0].endpoint_updated_at_ns,
            0
        );
    }

    #[test]
    fn test_endpoints_without_desired_entry_are_not_routable() {
        let eps = endpoints(&[0]);
        let state = KeyState {
            desired: None,
            endpoints: Some(&eps),
        };

        assert!(routable_endpoints(state.desired, state.endpoints).is_empty());
        let dump = external_dump(&state, false);
        assert!(dump.messages.is_empty());
        assert!(dump.tcp.is_empty());
    }

    #[test]
    fn test_endpoints_beyond_instance_count_are_not_routable() {
        let desired = entry(1);
        let eps = endpoints(&[0, 1, 2]);

        let routable = routable_endpoints(Some(&desired), Some(&eps));
        assert_eq!(routable.len(), 1);
        assert_eq!(routable[0].instance_guid, "ig-0");
    }
}
