//! Actual-state endpoints: one live backend instance per record.

use serde::{Deserialize, Serialize};

use crate::key::ModificationTag;

/// Scheduling presence of an instance.
///
/// Evacuating instances stay in the table but are withdrawn from every
/// routing stream until they land somewhere else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    #[default]
    Ordinary,
    Evacuating,
}

impl Presence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Ordinary => "ordinary",
            Presence::Evacuating => "evacuating",
        }
    }
}

/// One live backend instance for a routing key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique within a routing key.
    pub instance_guid: String,
    /// Application-assigned instance ordinal.
    pub index: u32,
    /// Host-side address.
    pub host: String,
    pub container_ip: String,
    /// Host-side port exposed for `container_port`.
    pub port: u16,
    pub container_port: u16,
    /// Both proxy ports are populated together or not at all.
    #[serde(default)]
    pub tls_proxy_port: u16,
    #[serde(default)]
    pub container_tls_proxy_port: u16,
    #[serde(default)]
    pub presence: Presence,
    /// Nanosecond timestamp of the last instance change. Non-decreasing
    /// per instance.
    #[serde(default)]
    pub since: i64,
    pub modification_tag: ModificationTag,
}

impl Endpoint {
    pub fn has_tls_proxy(&self) -> bool {
        self.tls_proxy_port != 0 && self.container_tls_proxy_port != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_proxy_requires_both_ports() {
        let mut endpoint = Endpoint {
            tls_proxy_port: 61001,
            ..Default::default()
        };
        assert!(!endpoint.has_tls_proxy());

        endpoint.container_tls_proxy_port = 61002;
        assert!(endpoint.has_tls_proxy());
    }

    #[test]
    fn test_presence_default_is_ordinary() {
        assert_eq!(Endpoint::default().presence, Presence::Ordinary);
        assert_eq!(Presence::Evacuating.as_str(), "evacuating");
    }
}
