//! Command-line configuration.

use std::time::Duration;

use clap::Parser;

/// Keeps the routing fabric in sync with running workloads.
#[derive(Debug, Parser)]
#[command(name = "strato-route-emitter", version, about)]
pub struct Config {
    /// NATS server URL. Without it, batches are logged instead of
    /// delivered (dry run).
    #[arg(long, env = "NATS_URL")]
    pub nats_url: Option<String>,

    /// NATS username.
    #[arg(long, env = "NATS_USERNAME")]
    pub nats_username: Option<String>,

    /// NATS password.
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,

    /// Seconds between full routing-table re-emissions.
    #[arg(long, default_value_t = 60)]
    pub sync_interval_secs: u64,

    /// Prefer container addresses over host mappings in HTTP
    /// registrations.
    #[arg(long)]
    pub direct_instance_routes: bool,

    /// Newline-delimited JSON route events; "-" reads stdin.
    #[arg(long, default_value = "-")]
    pub events: String,
}

impl Config {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["strato-route-emitter"]).unwrap();
        assert_eq!(config.nats_url, None);
        assert_eq!(config.sync_interval(), Duration::from_secs(60));
        assert!(!config.direct_instance_routes);
        assert_eq!(config.events, "-");
    }

    #[test]
    fn test_flags_parse() {
        let config = Config::try_parse_from([
            "strato-route-emitter",
            "--nats-url",
            "nats://127.0.0.1:4222",
            "--sync-interval-secs",
            "5",
            "--direct-instance-routes",
            "--events",
            "events.jsonl",
        ])
        .unwrap();

        assert_eq!(config.nats_url.as_deref(), Some("nats://127.0.0.1:4222"));
        assert_eq!(config.sync_interval(), Duration::from_secs(5));
        assert!(config.direct_instance_routes);
        assert_eq!(config.events, "events.jsonl");
    }
}
