//! Collective operations, built on the communicator's point-to-point
//! primitives.
//!
//! Every rank of the communicator must call the same collectives in the same
//! order. A collective that some rank never calls does not complete. Each
//! call runs on its own [`Channel::Collective`] epoch, so collective traffic
//! never matches user receives or a different collective call.

use super::comm::Communicator;
use super::link::Channel;
use super::mailbox::Source;
use crate::coder::{Payload, Value};
use crate::error::{Error, Result};

/// A binary operation used to combine contributions in a reduction. It must
/// be associative and commutative; this is not checked.
pub trait ReduceOp<V> {
    fn apply(&self, a: V, b: V) -> V;
}

impl<V, F> ReduceOp<V> for F
where
    F: Fn(V, V) -> V,
{
    fn apply(&self, a: V, b: V) -> V {
        self(a, b)
    }
}

/// Built-in integer reductions. Sum and product wrap on overflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Sum,
    Product,
    Min,
    Max,
}

impl ReduceOp<i64> for Op {
    fn apply(&self, a: i64, b: i64) -> i64 {
        match self {
            Op::Sum => a.wrapping_add(b),
            Op::Product => a.wrapping_mul(b),
            Op::Min => a.min(b),
            Op::Max => a.max(b),
        }
    }
}

impl Communicator {
    /// Combines one value from every rank at `root`.
    ///
    /// The root receives each contribution by rank and folds them left in
    /// rank order, so the result is exactly what a sequential accumulation
    /// of `value_0, value_1, ..., value_{size-1}` would give. The root gets
    /// `Some(result)`; every other rank gets `None`.
    pub fn reduce<V, O>(&self, value: V, op: O, root: usize) -> Result<Option<V>>
    where
        V: Value,
        O: ReduceOp<V>,
    {
        self.check_collective(root)?;
        let channel = Channel::Collective(self.next_epoch());

        if self.rank() != root {
            self.send_payload(value.into(), root, channel)?;
            return Ok(None);
        }
        let mut own = Some(value);
        let mut result: Option<V> = None;

        for rank in 0..self.size() {
            let contribution = if rank == root {
                match own.take() {
                    Some(value) => value,
                    None => continue,
                }
            } else {
                V::try_from(self.receive_payload(Source::Rank(rank), channel)?.0)?
            };
            result = Some(match result {
                Some(acc) => op.apply(acc, contribution),
                None => contribution,
            });
        }
        Ok(result)
    }

    /// Delivers `value` from `root` to every rank. The `value` passed by
    /// other ranks is ignored.
    pub fn broadcast<V: Value>(&self, value: V, root: usize) -> Result<V> {
        self.check_collective(root)?;
        let payload = (self.rank() == root).then(|| value.into());
        V::try_from(self.fan_out(payload, root)?)
    }

    /// Like [`Communicator::reduce`], delivering the result to every rank.
    pub fn all_reduce<V, O>(&self, value: V, op: O) -> Result<V>
    where
        V: Value,
        O: ReduceOp<V>,
    {
        let reduced = self.reduce(value, op, 0)?;
        V::try_from(self.fan_out(reduced.map(Into::into), 0)?)
    }

    /// Returns once every rank has entered the barrier.
    pub fn barrier(&self) -> Result<()> {
        self.check_open()?;
        self.all_reduce(0i64, Op::Sum).map(|_| ())
    }

    /// Sends `payload` (present only at `root`) from root to every other
    /// rank, and returns it on every rank.
    fn fan_out(&self, payload: Option<Payload>, root: usize) -> Result<Payload> {
        self.check_open()?;
        let channel = Channel::Collective(self.next_epoch());
        match payload {
            Some(payload) => {
                for rank in (0..self.size()).filter(|rank| *rank != root) {
                    self.send_payload(payload.clone(), rank, channel)?;
                }
                Ok(payload)
            }
            None => Ok(self.receive_payload(Source::Rank(root), channel)?.0),
        }
    }

    /// A single-rank collective never reaches the transport, so a closed
    /// communicator has to be caught here.
    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn check_collective(&self, root: usize) -> Result<()> {
        self.check_open()?;
        if root >= self.size() {
            Err(Error::InvalidRoot {
                rank: root,
                size: self.size(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::launch;

    #[test]
    fn sum_lands_at_the_root_only() {
        let results = launch::run_local(5, Config::default(), |comm| {
            let rank = comm.rank() as i64;
            comm.reduce(rank * 10, Op::Sum, 2).unwrap()
        })
        .unwrap();
        assert_eq!(results, vec![None, None, Some(100), None, None]);
    }

    #[test]
    fn fold_runs_in_rank_order() {
        // Concatenation is not commutative, which exposes the fold order.
        let results = launch::run_local(4, Config::default(), |comm| {
            let piece = comm.rank().to_string();
            comm.reduce(piece, |a: String, b: String| a + &b, 0).unwrap()
        })
        .unwrap();
        assert_eq!(results[0].as_deref(), Some("0123"));
    }

    #[test]
    fn consecutive_collectives_do_not_cross_match() {
        let results = launch::run_local(3, Config::default(), |comm| {
            let rank = comm.rank() as i64;
            let max = comm.reduce(rank, Op::Max, 0).unwrap();
            let min = comm.reduce(rank, Op::Min, 0).unwrap();
            let everyone = comm.all_reduce(rank + 1, Op::Product).unwrap();
            let greeting = comm.broadcast(format!("from {}", rank), 1).unwrap();
            comm.barrier().unwrap();
            (max, min, everyone, greeting)
        })
        .unwrap();
        assert_eq!(results[0].0, Some(2));
        assert_eq!(results[0].1, Some(0));
        for (_, _, everyone, greeting) in &results {
            assert_eq!(*everyone, 6);
            assert_eq!(greeting, "from 1");
        }
    }

    #[test]
    fn user_messages_survive_an_interleaved_reduce() {
        let results = launch::run_local(2, Config::default(), |comm| {
            if comm.rank() == 1 {
                comm.send(99i64, 0, 0).unwrap();
            }
            let total = comm.reduce(1i64, Op::Sum, 0).unwrap();
            let user = if comm.rank() == 0 {
                Some(comm.receive::<i64>(Source::Rank(1), 0).unwrap())
            } else {
                None
            };
            (total, user)
        })
        .unwrap();
        assert_eq!(results[0], (Some(2), Some(99)));
    }

    #[test]
    fn root_must_be_a_member() {
        let results = launch::run_local(2, Config::default(), |comm| {
            matches!(
                comm.reduce(1i64, Op::Sum, 2),
                Err(Error::InvalidRoot { rank: 2, size: 2 })
            )
        })
        .unwrap();
        assert_eq!(results, vec![true, true]);
    }

    #[test]
    fn single_rank_reduce_is_its_own_value() {
        let results =
            launch::run_local(1, Config::default(), |comm| comm.reduce(7i64, Op::Sum, 0).unwrap())
                .unwrap();
        assert_eq!(results, vec![Some(7)]);
    }

    #[test]
    fn collectives_on_a_closed_single_rank_communicator_fail() {
        let results = launch::run_local(1, Config::default(), |comm| {
            comm.close();
            (
                matches!(comm.reduce(7i64, Op::Sum, 0), Err(Error::Closed)),
                matches!(comm.broadcast(3i64, 0), Err(Error::Closed)),
                matches!(comm.all_reduce(1i64, Op::Max), Err(Error::Closed)),
                matches!(comm.barrier(), Err(Error::Closed)),
            )
        })
        .unwrap();
        assert_eq!(results, vec![(true, true, true, true)]);
    }

    #[test]
    fn root_side_of_a_broadcast_fails_once_closed() {
        let results = launch::run_local(2, Config::default(), |comm| {
            comm.close();
            matches!(comm.broadcast(1i64, comm.rank()), Err(Error::Closed))
        })
        .unwrap();
        assert_eq!(results, vec![true, true]);
    }
}
