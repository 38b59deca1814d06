//! Route event stream consumed by the reconcile loop.
//!
//! Translation from a real event bus into `RouteEvent` is the watcher's
//! job; this module only defines the shape and ships a replay source
//! reading newline-delimited JSON from a file or stdin.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use strato_routes::{DesiredRoutes, Endpoint, RoutingKey};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::{error, warn};

/// One desired- or actual-state change, in the shape the table consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouteEvent {
    DesiredCreated {
        after: DesiredRoutes,
    },
    DesiredChanged {
        before: DesiredRoutes,
        after: DesiredRoutes,
    },
    DesiredRemoved {
        desired: DesiredRoutes,
    },
    EndpointAdded {
        key: RoutingKey,
        endpoint: Endpoint,
    },
    EndpointRemoved {
        key: RoutingKey,
        endpoint: Endpoint,
    },
    /// Full-table re-emission request; also injected by the sync timer.
    Sync,
}

/// Reads newline-delimited JSON route events.
pub struct EventReader {
    lines: Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>,
}

impl EventReader {
    /// Opens the given path, or stdin for `-`.
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        let reader: Box<dyn AsyncRead + Send + Unpin> = if path == "-" {
            Box::new(tokio::io::stdin())
        } else {
            Box::new(
                tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("failed to open route events at {path}"))?,
            )
        };
        Ok(EventReader {
            lines: BufReader::new(reader).lines(),
        })
    }

    /// The next well-formed event. Malformed lines are logged and
    /// skipped; `None` means the stream ended.
    pub async fn next(&mut self) -> Option<RouteEvent> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str(line) {
                        Ok(event) => return Some(event),
                        Err(error) => warn!(%error, "skipping malformed route event"),
                    }
                }
                Ok(None) => return None,
                Err(error) => {
                    error!(%error, "failed to read route events");
                    return None;
                }
            }
        }
    }
}
