//! Delivery of emitted batches to the routing fabric.

use std::sync::Arc;

use async_trait::async_trait;
use strato_routes::{MessagesToEmit, RegistryMessage, TcpRouteMapping, TcpRouteMappings};
use thiserror::Error;
use tracing::{debug, info};

pub const REGISTER_SUBJECT: &str = "router.register";
pub const UNREGISTER_SUBJECT: &str = "router.unregister";
pub const INTERNAL_REGISTER_SUBJECT: &str = "service-discovery.register";
pub const INTERNAL_UNREGISTER_SUBJECT: &str = "service-discovery.unregister";

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("failed to encode registry message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to publish to {subject}: {source}")]
    Publish {
        subject: &'static str,
        #[source]
        source: async_nats::PublishError,
    },
}

/// Delivers the batches one table operation produced. A batch must be
/// delivered whole; dropping part of it leaves routers with a stale
/// view until the next full sync.
#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(&self, tcp: TcpRouteMappings, messages: MessagesToEmit) -> Result<(), EmitError>;
}

/// Delivery of TCP mappings to the routing API. The HTTP client lives
/// with the deployment, not in this repository.
#[async_trait]
pub trait TcpRouteClient: Send + Sync {
    async fn upsert(&self, mappings: &[TcpRouteMapping]) -> Result<(), EmitError>;
    async fn delete(&self, mappings: &[TcpRouteMapping]) -> Result<(), EmitError>;
}

/// Publishes registry messages over NATS, one JSON message per record.
pub struct NatsEmitter {
    client: async_nats::Client,
    tcp_routes: Option<Arc<dyn TcpRouteClient>>,
}

impl NatsEmitter {
    pub fn new(client: async_nats::Client) -> Self {
        NatsEmitter {
            client,
            tcp_routes: None,
        }
    }

    pub fn with_tcp_route_client(mut self, client: Arc<dyn TcpRouteClient>) -> Self {
        self.tcp_routes = Some(client);
        self
    }

    async fn publish_all(
        &self,
        subject: &'static str,
        messages: &[RegistryMessage],
    ) -> Result<(), EmitError> {
        for message in messages {
            let payload = serde_json::to_vec(message)?;
            self.client
                .publish(subject, payload.into())
                .await
                .map_err(|source| EmitError::Publish { subject, source })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Emitter for NatsEmitter {
    async fn emit(&self, tcp: TcpRouteMappings, messages: MessagesToEmit) -> Result<(), EmitError> {
        self.publish_all(REGISTER_SUBJECT, &messages.registration_messages)
            .await?;
        self.publish_all(UNREGISTER_SUBJECT, &messages.unregistration_messages)
            .await?;
        self.publish_all(
            INTERNAL_REGISTER_SUBJECT,
            &messages.internal_registration_messages,
        )
        .await?;
        self.publish_all(
            INTERNAL_UNREGISTER_SUBJECT,
            &messages.internal_unregistration_messages,
        )
        .await?;

        match &self.tcp_routes {
            Some(client) => {
                if !tcp.registrations.is_empty() {
                    client.upsert(&tcp.registrations).await?;
                }
                if !tcp.unregistrations.is_empty() {
                    client.delete(&tcp.unregistrations).await?;
                }
            }
            None if !tcp.is_empty() => {
                debug!(
                    registrations = tcp.registrations.len(),
                    unregistrations = tcp.unregistrations.len(),
                    "no routing API client configured; dropping TCP mappings"
                );
            }
            None => {}
        }
        Ok(())
    }
}

/// Logs every batch instead of delivering it. The default when no NATS
/// URL is configured.
pub struct LogEmitter;

#[async_trait]
impl Emitter for LogEmitter {
    async fn emit(&self, tcp: TcpRouteMappings, messages: MessagesToEmit) -> Result<(), EmitError> {
        info!(
            registrations = messages.registration_messages.len(),
            unregistrations = messages.unregistration_messages.len(),
            internal_registrations = messages.internal_registration_messages.len(),
            internal_unregistrations = messages.internal_unregistration_messages.len(),
            tcp_registrations = tcp.registrations.len(),
            tcp_unregistrations = tcp.unregistrations.len(),
            "emit (dry run)"
        );
        debug!(
            messages = %serde_json::to_string(&messages)?,
            tcp = %serde_json::to_string(&tcp)?,
            "dry run payload"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_emitter_accepts_any_batch() {
        let messages = MessagesToEmit {
            registration_messages: vec![RegistryMessage {
                uris: vec!["foo.example.com".into()],
                host: "1.1.1.1".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        LogEmitter
            .emit(TcpRouteMappings::default(), messages)
            .await
            .unwrap();
    }
}
