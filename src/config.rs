//! Runtime settings, and the command-line arguments a launched process uses
//! to find its peers.

use crate::error::{Error, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Settings shared by every communicator a process creates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// How long connection setup may take before it fails.
    pub connect_timeout: Duration,
    /// If set, a receive that waits longer than this fails with
    /// [`Error::Timeout`] instead of blocking forever.
    pub receive_timeout: Option<Duration>,
    /// Replaces the default host identifier reported by the registry.
    pub host_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            receive_timeout: None,
            host_id: None,
        }
    }
}

impl Config {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    pub fn with_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }
}

/// Arguments supplied to each process by whoever launched the group.
#[derive(Debug, Clone, Default, Parser)]
#[command(about = "Join a group of ranked processes")]
pub struct BootstrapArgs {
    /// This process's rank
    #[arg(long, env = "RANKLINK_RANK")]
    pub rank: Option<usize>,

    /// Comma-separated listen addresses of all ranks, in rank order
    #[arg(long, env = "RANKLINK_PEERS", value_delimiter = ',')]
    pub peers: Vec<SocketAddr>,

    /// Seconds to wait for all peers to connect
    #[arg(long, default_value_t = 30.0)]
    pub connect_timeout: f64,

    /// Seconds a receive may block before failing (default: forever)
    #[arg(long)]
    pub receive_timeout: Option<f64>,

    /// Name to report as this process's host identifier
    #[arg(long)]
    pub host_id: Option<String>,
}

impl BootstrapArgs {
    /// The rank, checked against the peer list.
    pub fn rank(&self) -> Result<usize> {
        match self.rank {
            Some(rank) if rank < self.peers.len() => Ok(rank),
            Some(rank) => Err(Error::Config(format!(
                "rank {} out of range for {} peers",
                rank,
                self.peers.len()
            ))),
            None => Err(Error::Config("no rank given".to_owned())),
        }
    }

    pub fn peers(&self) -> Result<Vec<SocketAddr>> {
        if self.peers.is_empty() {
            return Err(Error::Config("no peers given".to_owned()));
        }
        Ok(self.peers.clone())
    }

    pub fn config(&self) -> Result<Config> {
        let mut config = Config::default().with_connect_timeout(seconds(self.connect_timeout)?);
        if let Some(timeout) = self.receive_timeout {
            config = config.with_receive_timeout(seconds(timeout)?);
        }
        if let Some(host_id) = &self.host_id {
            config = config.with_host_id(host_id.clone());
        }
        Ok(config)
    }
}

fn seconds(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::Config(format!("{} is not a valid number of seconds", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_into_a_config() {
        let args = BootstrapArgs::try_parse_from([
            "ranklink",
            "--rank",
            "1",
            "--peers",
            "127.0.0.1:7000,127.0.0.1:7001",
            "--receive-timeout",
            "2.5",
        ])
        .unwrap();
        assert_eq!(args.rank().unwrap(), 1);
        assert_eq!(args.peers().unwrap().len(), 2);

        let config = args.config().unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.receive_timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.host_id, None);
    }

    #[test]
    fn rank_must_index_the_peer_list() {
        let args = BootstrapArgs::try_parse_from([
            "ranklink",
            "--rank",
            "2",
            "--peers",
            "127.0.0.1:7000,127.0.0.1:7001",
        ])
        .unwrap();
        assert!(matches!(args.rank(), Err(Error::Config(_))));
    }

    #[test]
    fn negative_timeouts_are_rejected() {
        let args = BootstrapArgs {
            connect_timeout: -1.0,
            ..BootstrapArgs::default()
        };
        assert!(matches!(args.config(), Err(Error::Config(_))));
    }

    #[test]
    fn config_survives_being_stored_and_reloaded() {
        let config = Config::default()
            .with_receive_timeout(Duration::from_millis(250))
            .with_host_id("node-7");
        let mut stored = Vec::new();
        ciborium::ser::into_writer(&config, &mut stored).unwrap();
        let reloaded: Config = ciborium::de::from_reader(stored.as_slice()).unwrap();
        assert_eq!(reloaded, config);
    }
}
