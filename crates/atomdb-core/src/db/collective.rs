//! Rank-0-computes, everyone-adopts coordination for cooperating process groups.
//!
//! In a group of `size > 1` ranks only the coordinator (rank 0) touches the backend. It runs
//! the operation and broadcasts the outcome, value or error, and every other rank returns that
//! outcome without running anything. Sequences are streamed one item per broadcast and closed
//! by an end frame, so all ranks observe the same items in the same order.

use super::error::{DbError, Result, WireError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::debug;

/// A process group with a fixed coordinator at rank 0.
pub trait Communicator: Send + Sync + fmt::Debug {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Collective broadcast from rank 0.
    ///
    /// Rank 0 passes `Some(payload)`; the other ranks pass `None` and block until it arrives.
    /// Every rank returns the coordinator's payload.
    fn broadcast(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>>;

    fn is_coordinator(&self) -> bool {
        self.rank() == 0
    }
}

/// The single-process world: rank 0 of 1. Broadcast is the identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        payload.ok_or_else(|| DbError::Communication("rank 0 broadcast without payload".into()))
    }
}

/// One member of an in-process group created by [`LocalGroup::new`].
#[derive(Debug)]
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
    peers: Vec<Sender<Vec<u8>>>,
    inbox: Option<Mutex<Receiver<Vec<u8>>>>,
}

/// Builds groups of ranks that exchange broadcasts over channels, e.g. one per thread.
pub struct LocalGroup;

impl LocalGroup {
    /// Returns `size` communicators; index `i` is rank `i`.
    pub fn new(size: usize) -> Vec<LocalCommunicator> {
        let size = size.max(1);
        let mut senders = Vec::with_capacity(size - 1);
        let mut members = Vec::with_capacity(size);
        for rank in 1..size {
            let (tx, rx) = mpsc::channel();
            senders.push(tx);
            members.push(LocalCommunicator {
                rank,
                size,
                peers: Vec::new(),
                inbox: Some(Mutex::new(rx)),
            });
        }
        members.insert(
            0,
            LocalCommunicator {
                rank: 0,
                size,
                peers: senders,
                inbox: None,
            },
        );
        members
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&self, payload: Option<Vec<u8>>) -> Result<Vec<u8>> {
        if self.rank == 0 {
            let payload = payload
                .ok_or_else(|| DbError::Communication("rank 0 broadcast without payload".into()))?;
            for (i, peer) in self.peers.iter().enumerate() {
                peer.send(payload.clone()).map_err(|_| {
                    DbError::Communication(format!("rank {} left the group", i + 1))
                })?;
            }
            Ok(payload)
        } else {
            let inbox = self
                .inbox
                .as_ref()
                .ok_or_else(|| DbError::Communication("rank has no inbox".into()))?;
            let guard = inbox
                .lock()
                .map_err(|_| DbError::Communication("inbox lock poisoned".into()))?;
            guard
                .recv()
                .map_err(|_| DbError::Communication("coordinator left the group".into()))
        }
    }
}

#[derive(Serialize, Deserialize)]
enum Outcome<T> {
    Done(T),
    Failed(WireError),
}

#[derive(Serialize, Deserialize)]
enum Frame<T> {
    Item(T),
    Failed(WireError),
    End,
}

/// Runs `op` on the coordinator and hands its outcome to every rank.
///
/// Errors raised on the coordinator are re-raised on every rank with the same kind.
pub fn call<T, F>(comm: &dyn Communicator, op: F) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T>,
{
    if comm.size() <= 1 {
        return op();
    }

    if comm.is_coordinator() {
        let result = op();
        let encoded = match &result {
            Ok(value) => serde_json::to_vec(&Outcome::Done(value)),
            Err(err) => serde_json::to_vec(&Outcome::<&T>::Failed(WireError::from(err))),
        };
        let payload = match encoded {
            Ok(bytes) => bytes,
            Err(e) => {
                let failure = Outcome::<&T>::Failed(WireError::Backend(e.to_string()));
                comm.broadcast(Some(serde_json::to_vec(&failure)?))?;
                return Err(e.into());
            }
        };
        comm.broadcast(Some(payload))?;
        result
    } else {
        let bytes = comm.broadcast(None)?;
        match serde_json::from_slice::<Outcome<T>>(&bytes)? {
            Outcome::Done(value) => Ok(value),
            Outcome::Failed(err) => {
                debug!(rank = comm.rank(), "Adopting coordinator failure.");
                Err(err.into())
            }
        }
    }
}

/// A sequence produced on the coordinator and replayed on every rank.
pub struct CollectiveStream<'a, T> {
    comm: &'a dyn Communicator,
    source: Option<Box<dyn Iterator<Item = Result<T>> + 'a>>,
    finished: bool,
}

/// Streams the items of `make_source` (only invoked on the coordinator) to every rank.
pub fn stream<'a, T, F>(comm: &'a dyn Communicator, make_source: F) -> CollectiveStream<'a, T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Box<dyn Iterator<Item = Result<T>> + 'a>,
{
    let source = if comm.is_coordinator() {
        Some(make_source())
    } else {
        None
    };
    CollectiveStream {
        comm,
        source,
        finished: false,
    }
}

impl<T> CollectiveStream<'_, T>
where
    T: Serialize + DeserializeOwned,
{
    fn next_local(&mut self) -> Option<Result<T>> {
        let item = self.source.as_mut().and_then(|s| s.next());
        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
        }
        item
    }

    fn next_coordinator(&mut self) -> Option<Result<T>> {
        let item = self.next_local();
        let encoded = match &item {
            Some(Ok(value)) => serde_json::to_vec(&Frame::Item(value)),
            Some(Err(err)) => serde_json::to_vec(&Frame::<&T>::Failed(WireError::from(err))),
            None => serde_json::to_vec(&Frame::<&T>::End),
        };
        let outcome = encoded.map_err(DbError::from).and_then(|bytes| {
            self.comm.broadcast(Some(bytes))
        });
        match outcome {
            Ok(_) => item,
            Err(err) => {
                self.finished = true;
                if !matches!(err, DbError::Communication(_)) {
                    let failure = Frame::<&T>::Failed(WireError::from(&err));
                    if let Ok(bytes) = serde_json::to_vec(&failure) {
                        let _ = self.comm.broadcast(Some(bytes));
                    }
                }
                Some(Err(err))
            }
        }
    }

    fn next_follower(&mut self) -> Option<Result<T>> {
        let frame = self
            .comm
            .broadcast(None)
            .and_then(|bytes| serde_json::from_slice::<Frame<T>>(&bytes).map_err(DbError::from));
        match frame {
            Ok(Frame::Item(value)) => Some(Ok(value)),
            Ok(Frame::Failed(err)) => {
                self.finished = true;
                Some(Err(err.into()))
            }
            Ok(Frame::End) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

impl<T> Iterator for CollectiveStream<'_, T>
where
    T: Serialize + DeserializeOwned,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.comm.size() <= 1 {
            self.next_local()
        } else if self.comm.is_coordinator() {
            self.next_coordinator()
        } else {
            self.next_follower()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn run_group<R, F>(size: usize, body: F) -> Vec<R>
    where
        R: Send + 'static,
        F: Fn(LocalCommunicator) -> R + Send + Sync + 'static,
    {
        let body = Arc::new(body);
        let handles: Vec<_> = LocalGroup::new(size)
            .into_iter()
            .map(|comm| {
                let body = Arc::clone(&body);
                thread::spawn(move || body(comm))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn serial_call_runs_locally() {
        let value = call(&SerialCommunicator, || Ok(vec![1.5, 2.5])).unwrap();
        assert_eq!(value, vec![1.5, 2.5]);
    }

    #[test]
    fn only_the_coordinator_executes_and_everyone_agrees() {
        let executions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&executions);
        let results = run_group(3, move |comm| {
            call(&comm, || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok((0.1f64 + 0.2, String::from("C6H6")))
            })
            .unwrap()
        });

        assert_eq!(executions.load(Ordering::SeqCst), 1);
        for r in &results {
            assert_eq!(r.0.to_bits(), (0.1f64 + 0.2).to_bits());
            assert_eq!(r.1, "C6H6");
        }
    }

    #[test]
    fn coordinator_errors_are_raised_on_every_rank() {
        let results = run_group(3, |comm| {
            call::<u32, _>(&comm, || Err(DbError::AmbiguousSelection("H>0".into())))
                .unwrap_err()
                .to_string()
        });
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|m| m == &results[0]));
        assert!(results[0].contains("More than one record"));
    }

    #[test]
    fn streams_replay_the_same_sequence() {
        let results = run_group(3, |comm| {
            stream(&comm, || Box::new((1..=4u64).map(Ok)))
                .collect::<Result<Vec<u64>>>()
                .unwrap()
        });
        for r in results {
            assert_eq!(r, vec![1, 2, 3, 4]);
        }
    }

    #[test]
    fn stream_failure_aborts_every_rank_at_the_same_point() {
        let results = run_group(3, |comm| {
            let items: Vec<Result<u64>> = stream(&comm, || {
                Box::new(
                    vec![Ok(1), Err(DbError::Decode("bad constraint".into())), Ok(3)].into_iter(),
                )
            })
            .collect();
            (
                items.len(),
                matches!(items[0], Ok(1)),
                matches!(items[1], Err(DbError::Decode(_))),
            )
        });
        for r in results {
            assert_eq!(r, (2, true, true));
        }
    }

    #[test]
    fn partial_consumption_stays_in_lock_step() {
        let results = run_group(3, |comm| {
            let mut first = stream(&comm, || Box::new((10..20u64).map(Ok)));
            let a = first.next().unwrap().unwrap();
            let b = first.next().unwrap().unwrap();
            drop(first);
            let second: Vec<u64> = stream(&comm, || Box::new((0..2u64).map(Ok)))
                .collect::<Result<_>>()
                .unwrap();
            (a, b, second)
        });
        for r in results {
            assert_eq!(r, (10, 11, vec![0, 1]));
        }
    }

    #[test]
    fn group_ranks_are_numbered_from_zero() {
        let group = LocalGroup::new(3);
        let ranks: Vec<usize> = group.iter().map(|c| c.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert!(group.iter().all(|c| c.size() == 3));
        assert!(group[0].is_coordinator());
    }
}
