pub mod endpoint;
pub mod key;
pub mod matchers;
pub mod message;
pub mod route;
pub mod table;

mod diff;
mod index;

pub use endpoint::{Endpoint, Presence};
pub use key::{DomainSet, ModificationTag, RoutingKey};
pub use message::{MessagesToEmit, RegistryMessage, TcpRouteMapping, TcpRouteMappings};
pub use route::{DesiredRoutes, HttpRoute, InternalRoute, RouteSet, TcpRoute};
pub use table::RoutingTable;
