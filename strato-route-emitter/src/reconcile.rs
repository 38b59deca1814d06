//! The reconcile loop.
//!
//! A single task owns the routing table: route events are applied
//! serially, every non-empty delta goes to the emitter, and a timer
//! injects periodic full re-emissions so router caches converge even if
//! a delta was lost.

use std::future::Future;
use std::time::Duration;

use strato_routes::{MessagesToEmit, RoutingTable, TcpRouteMappings};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::emitter::Emitter;
use crate::events::{EventReader, RouteEvent};

/// Applies one event to the table and returns the delta to deliver.
pub fn apply(table: &mut RoutingTable, event: RouteEvent) -> (TcpRouteMappings, MessagesToEmit) {
    match event {
        RouteEvent::DesiredCreated { after } => table.set_routes(None, &after),
        RouteEvent::DesiredChanged { before, after } => table.set_routes(Some(&before), &after),
        RouteEvent::DesiredRemoved { desired } => table.remove_routes(&desired),
        RouteEvent::EndpointAdded { key, endpoint } => table.add_endpoint(&key, endpoint),
        RouteEvent::EndpointRemoved { key, endpoint } => table.remove_endpoint(&key, &endpoint),
        RouteEvent::Sync => sync_events(table),
    }
}

/// The current registration state of every stream, for a full refresh.
pub fn sync_events(table: &RoutingTable) -> (TcpRouteMappings, MessagesToEmit) {
    let (tcp, mut messages) = table.get_external_routing_events();
    let (_, internal) = table.get_internal_routing_events();
    messages.merge(internal);
    (tcp, messages)
}

/// Drives the table until the event stream is exhausted and `shutdown`
/// resolves. An exhausted stream keeps the periodic sync alive.
pub async fn run<E: Emitter>(
    mut table: RoutingTable,
    mut events: EventReader,
    emitter: &E,
    sync_interval: Duration,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let mut sync = tokio::time::interval(sync_interval);
    sync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the interval's immediate first tick would dump an empty table
    sync.tick().await;

    let mut drained = false;
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = sync.tick() => {
                let (tcp, messages) = sync_events(&table);
                emit(emitter, tcp, messages).await;
            }
            event = events.next(), if !drained => {
                match event {
                    Some(event) => {
                        let (tcp, messages) = apply(&mut table, event);
                        emit(emitter, tcp, messages).await;
                    }
                    None => {
                        info!("route event stream ended; continuing periodic sync");
                        drained = true;
                    }
                }
            }
        }
    }
    Ok(())
}

async fn emit<E: Emitter>(emitter: &E, tcp: TcpRouteMappings, messages: MessagesToEmit) {
    if tcp.is_empty() && messages.is_empty() {
        return;
    }
    if let Err(error) = emitter.emit(tcp, messages).await {
        error!(%error, "failed to emit routing messages");
    }
}
