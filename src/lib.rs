//! A small message-passing runtime for a fixed group of ranked processes.
//!
//! Processes address each other by rank, exchange typed messages selected by
//! tag, and combine per-process values with collective reductions:
//!
//! ```no_run
//! use ranklink::{Environment, Op, Source};
//!
//! fn main() -> ranklink::Result<()> {
//!     let env = Environment::from_args()?;
//!     let world = env.world();
//!
//!     if world.rank() == 0 {
//!         world.send("Rosie", 1, 0)?;
//!         let msg: String = world.receive(Source::Any, 0)?;
//!         println!("rank 0 received {:?}", msg);
//!     } else {
//!         let msg: String = world.receive(Source::Rank(world.rank() - 1), 0)?;
//!         let next = (world.rank() + 1) % world.size();
//!         world.send(format!("{}, {}", msg, world.rank()), next, 0)?;
//!     }
//!     let total = world.reduce(1i64, Op::Sum, 0)?;
//!     if let Some(total) = total {
//!         println!("{} ranks took part", total);
//!     }
//!     env.dispose();
//!     Ok(())
//! }
//! ```

pub mod coder;
pub mod config;
pub mod environment;
pub mod error;
pub mod launch;
pub mod message;
pub mod registry;

pub use coder::{Payload, Value};
pub use config::{BootstrapArgs, Config};
pub use environment::Environment;
pub use error::{Error, Result};
pub use message::{Communicator, Op, ReduceOp, Source, Tag};
pub use registry::Registry;
