use crate::config::BootstrapArgs;
use crate::error::{Error, Result};
use crate::message::Communicator;
use clap::Parser;
use log::info;

/// The process's view of the group it was launched into. Created once at
/// startup and passed explicitly to whatever needs it.
pub struct Environment {
    world: Communicator,
}

impl Environment {
    /// Connects to every peer named in `args` and returns once the world
    /// communicator is ready.
    pub fn init(args: &BootstrapArgs) -> Result<Self> {
        let rank = args.rank()?;
        let world = Communicator::connect(rank, args.peers()?, &args.config()?)?;
        info!(
            "rank {} of {} joined the world on {}",
            world.rank(),
            world.size(),
            world.host_id()
        );
        Ok(Self { world })
    }

    /// Like [`Environment::init`], reading the arguments from the command
    /// line and the `RANKLINK_*` environment variables.
    pub fn from_args() -> Result<Self> {
        let args = BootstrapArgs::try_parse().map_err(|e| Error::Config(e.to_string()))?;
        Self::init(&args)
    }

    /// The communicator containing every process in the group.
    pub fn world(&self) -> &Communicator {
        &self.world
    }

    /// Releases all transport resources. Dropping the environment does the
    /// same.
    pub fn dispose(self) {
        self.world.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_rank_is_a_config_error() {
        let args = BootstrapArgs::try_parse_from(["demo", "--peers", "127.0.0.1:7100"]).unwrap();
        assert!(matches!(Environment::init(&args), Err(Error::Config(_))));
    }

    #[test]
    fn single_rank_world_needs_no_peers() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let args = BootstrapArgs::try_parse_from([
            "demo".to_owned(),
            "--rank".to_owned(),
            "0".to_owned(),
            "--peers".to_owned(),
            address.to_string(),
            "--host-id".to_owned(),
            "solo".to_owned(),
        ])
        .unwrap();
        let env = Environment::init(&args).unwrap();
        assert_eq!(env.world().size(), 1);
        assert_eq!(env.world().host_id(), "solo");
        env.dispose();
    }
}
