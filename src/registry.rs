//! Process identity within a group.

use crate::error::{Error, Result};

/// This process's rank, the size of its group, and a name for the host it
/// runs on. Built once and read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registry {
    rank: usize,
    size: usize,
    host_id: String,
}

impl Registry {
    /// Creates a registry entry for `rank` in a group of `size`. An empty or
    /// missing `host_id` is replaced by [`Registry::default_host_id`].
    pub fn new(rank: usize, size: usize, host_id: Option<String>) -> Result<Self> {
        if rank >= size {
            return Err(Error::Config(format!("rank {} out of range for size {}", rank, size)));
        }
        let host_id = host_id
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| Self::default_host_id(rank));
        Ok(Self {
            rank,
            size,
            host_id,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// A descriptive name for diagnostics. Never empty, and not necessarily
    /// unique.
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// The machine's host name, qualified by process id and rank so that
    /// ranks sharing a machine can be told apart.
    pub fn default_host_id(rank: usize) -> String {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_owned());
        format!("{} (pid {}, rank {})", host, std::process::id(), rank)
    }
}
