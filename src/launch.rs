//! Runs a whole group of ranks as threads of the current process.
//!
//! This is how the tests and the `--local` mode of the demos exercise the
//! runtime without an external launcher. Each rank gets its own thread and
//! its own [`Communicator`]; results come back in rank order.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{Communicator, LocalLink};
use log::debug;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;

type Job<R> = Box<dyn FnOnce() -> Result<R> + Send + 'static>;

/// Runs `job` on `size` ranks connected by in-process channels.
pub fn run_local<F, R>(size: usize, config: Config, job: F) -> Result<Vec<R>>
where
    F: Fn(Communicator) -> R + Send + Sync + 'static,
    R: Send + 'static,
{
    let job = Arc::new(job);
    let jobs = LocalLink::mesh(size)
        .into_iter()
        .map(|link| {
            let job = job.clone();
            let config = config.clone();
            Box::new(move || -> Result<R> {
                let comm = Communicator::from_link(Box::new(link), &config)?;
                Ok((*job)(comm))
            }) as Job<R>
        })
        .collect();
    spawn_all(jobs)
}

/// Runs `job` on `size` ranks connected by TCP over the loopback interface.
pub fn run_tcp<F, R>(size: usize, config: Config, job: F) -> Result<Vec<R>>
where
    F: Fn(Communicator) -> R + Send + Sync + 'static,
    R: Send + 'static,
{
    let listeners = (0..size)
        .map(|_| TcpListener::bind("127.0.0.1:0"))
        .collect::<std::io::Result<Vec<_>>>()?;
    let peers = listeners
        .iter()
        .map(TcpListener::local_addr)
        .collect::<std::io::Result<Vec<SocketAddr>>>()?;
    debug!("launching {} ranks on {:?}", size, peers);

    let job = Arc::new(job);
    let jobs = listeners
        .into_iter()
        .enumerate()
        .map(|(rank, listener)| {
            let job = job.clone();
            let config = config.clone();
            let peers = peers.clone();
            Box::new(move || -> Result<R> {
                let comm = Communicator::from_listener(rank, listener, peers, &config)?;
                Ok((*job)(comm))
            }) as Job<R>
        })
        .collect();
    spawn_all(jobs)
}

/// Runs each job on its own thread, then joins all of them. A panicking
/// rank is reported as [`Error::RankPanicked`]; the others are still joined.
fn spawn_all<R: Send + 'static>(jobs: Vec<Job<R>>) -> Result<Vec<R>> {
    let handles = jobs
        .into_iter()
        .enumerate()
        .map(|(rank, job)| {
            thread::Builder::new()
                .name(format!("rank-{}", rank))
                .spawn(move || {
                    pin_to_core(rank);
                    job()
                })
        })
        .collect::<std::io::Result<Vec<_>>>()?;

    let outcomes: Vec<Result<R>> = handles
        .into_iter()
        .enumerate()
        .map(|(rank, handle)| {
            handle
                .join()
                .map_err(|_| Error::RankPanicked(rank))
                .and_then(|outcome| outcome)
        })
        .collect();
    outcomes.into_iter().collect()
}

#[cfg(feature = "core_affinity")]
fn pin_to_core(rank: usize) {
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if !core_ids.is_empty() {
            core_affinity::set_for_current(core_ids[rank % core_ids.len()]);
        }
    }
}

#[cfg(not(feature = "core_affinity"))]
fn pin_to_core(_rank: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_come_back_in_rank_order() {
        let ranks = run_local(4, Config::default(), |comm| (comm.rank(), comm.size())).unwrap();
        assert_eq!(ranks, vec![(0, 4), (1, 4), (2, 4), (3, 4)]);
    }

    #[test]
    fn a_panicking_rank_is_reported() {
        let result = run_local(2, Config::default(), |comm| {
            if comm.rank() == 1 {
                panic!("rank 1 gives up");
            }
        });
        assert!(matches!(result, Err(Error::RankPanicked(1))));
    }
}
