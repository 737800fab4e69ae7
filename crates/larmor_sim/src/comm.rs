//! In-process rank communicator.
//!
//! One worker thread per rank, channel transport, deterministic tags.
//! Point-to-point messages match on (source, tag) exactly like the
//! message-passing layer they stand in for; collectives rendezvous on a
//! shared barrier. Every rank must issue collectives in the same order.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Barrier, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use serde::de::DeserializeOwned;

use larmor_core::error::{CommError, Error};

struct Message {
    from: usize,
    tag: u64,
    payload: Vec<u8>,
}

struct Shared {
    barrier: Barrier,
    /// one slot per rank for collective payloads
    slots: Mutex<Vec<Vec<u8>>>,
}

/// Per-rank handle. Cheap sends, blocking tagged receives, and the
/// collective operations the engine needs (reduce, scan, gather, bcast).
pub struct Communicator {
    rank: usize,
    n_ranks: usize,
    senders: Vec<Sender<Message>>,
    inbox: Receiver<Message>,
    pending: HashMap<(usize, u64), VecDeque<Vec<u8>>>,
    shared: Arc<Shared>,
}

impl Communicator {
    /// Create the communicator handles of a world of `n` ranks.
    pub fn world(n: usize) -> Vec<Communicator> {
        let mut senders = Vec::with_capacity(n);
        let mut inboxes = Vec::with_capacity(n);
        for _ in 0..n {
            let (tx, rx) = unbounded();
            senders.push(tx);
            inboxes.push(rx);
        }
        let shared = Arc::new(Shared {
            barrier: Barrier::new(n),
            slots: Mutex::new(vec![Vec::new(); n]),
        });
        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Communicator {
                rank,
                n_ranks: n,
                senders: senders.clone(),
                inbox,
                pending: HashMap::new(),
                shared: shared.clone(),
            })
            .collect()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    pub fn is_master(&self) -> bool {
        self.rank == 0
    }

    /// Non-blocking tagged send. The payload is buffered by the channel,
    /// so posting order cannot deadlock.
    pub fn send(&self, to: usize, tag: u64, payload: Vec<u8>) -> Result<(), Error> {
        self.senders[to]
            .send(Message {
                from: self.rank,
                tag,
                payload,
            })
            .map_err(|_| CommError::Disconnected(to).into())
    }

    /// Blocking receive matched on (source, tag). Messages for other tags
    /// arriving in between are parked, preserving per-pair ordering.
    pub fn recv(&mut self, from: usize, tag: u64) -> Result<Vec<u8>, Error> {
        if let Some(queue) = self.pending.get_mut(&(from, tag))
            && let Some(payload) = queue.pop_front()
        {
            return Ok(payload);
        }
        loop {
            let msg = self
                .inbox
                .recv()
                .map_err(|_| Error::from(CommError::Disconnected(self.rank)))?;
            if msg.from == from && msg.tag == tag {
                return Ok(msg.payload);
            }
            self.pending
                .entry((msg.from, msg.tag))
                .or_default()
                .push_back(msg.payload);
        }
    }

    /// Receive a fixed-size f64 window; a length mismatch is a protocol
    /// error.
    pub fn recv_f64(&mut self, from: usize, tag: u64, expected: usize) -> Result<Vec<f64>, Error> {
        let bytes = self.recv(from, tag)?;
        if bytes.len() != expected * 8 {
            return Err(CommError::SizeMismatch {
                tag,
                expected: expected * 8,
                got: bytes.len(),
            }
            .into());
        }
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    pub fn send_f64(&self, to: usize, tag: u64, data: &[f64]) -> Result<(), Error> {
        self.send(to, tag, bytemuck::cast_slice(data).to_vec())
    }

    pub fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn collective<T: Serialize + DeserializeOwned>(&self, value: &T) -> Vec<T> {
        {
            let mut slots = self.shared.slots.lock().unwrap();
            slots[self.rank] = bincode::serialize(value).expect("collective serialize");
        }
        self.shared.barrier.wait();
        let out: Vec<T> = {
            let slots = self.shared.slots.lock().unwrap();
            slots
                .iter()
                .map(|b| bincode::deserialize(b).expect("collective deserialize"))
                .collect()
        };
        self.shared.barrier.wait();
        out
    }

    /// Sum of one value over all ranks.
    pub fn all_reduce_sum(&self, value: f64) -> f64 {
        self.collective(&value).into_iter().sum()
    }

    /// Element-wise sum of a vector over all ranks.
    pub fn all_reduce_sum_vec(&self, value: &[f64]) -> Vec<f64> {
        let all: Vec<Vec<f64>> = self.collective(&value.to_vec());
        let mut acc = vec![0.0; value.len()];
        for v in all {
            for (a, b) in acc.iter_mut().zip(v) {
                *a += b;
            }
        }
        acc
    }

    /// Inclusive prefix sum: ranks 0..=self contribute.
    pub fn scan_sum(&self, value: f64) -> f64 {
        self.collective(&value)[..=self.rank].iter().sum()
    }

    /// Every rank's value, indexed by rank.
    pub fn all_gather<T: Serialize + DeserializeOwned>(&self, value: &T) -> Vec<T> {
        self.collective(value)
    }

    /// Root's value distributed to everyone.
    pub fn broadcast<T: Serialize + DeserializeOwned + Clone>(&self, root: usize, value: &T) -> T {
        self.collective(value).swap_remove(root)
    }

    /// Logical or across ranks, for the exit flag poll.
    pub fn any(&self, value: bool) -> bool {
        self.collective(&value).into_iter().any(|v| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_world<F>(n: usize, f: F)
    where
        F: Fn(Communicator) + Send + Sync + Clone + 'static,
    {
        let comms = Communicator::world(n);
        std::thread::scope(|scope| {
            for comm in comms {
                let f = f.clone();
                scope.spawn(move || f(comm));
            }
        });
    }

    #[test]
    fn tagged_messages_match_out_of_order() {
        run_world(2, |mut comm| {
            if comm.rank() == 0 {
                comm.send(1, 77, vec![7]).unwrap();
                comm.send(1, 33, vec![3]).unwrap();
            } else {
                // claim the later tag first
                assert_eq!(comm.recv(0, 33).unwrap(), vec![3]);
                assert_eq!(comm.recv(0, 77).unwrap(), vec![7]);
            }
        });
    }

    #[test]
    fn reductions_and_scans_agree_with_hand_values() {
        run_world(4, |comm| {
            let v = (comm.rank() + 1) as f64;
            assert_eq!(comm.all_reduce_sum(v), 10.0);
            assert_eq!(comm.scan_sum(v), ((comm.rank() + 1) * (comm.rank() + 2) / 2) as f64);
            let gathered: Vec<usize> = comm.all_gather(&comm.rank());
            assert_eq!(gathered, vec![0, 1, 2, 3]);
        });
    }

    #[test]
    fn broadcast_delivers_roots_value() {
        run_world(3, |comm| {
            let mine = if comm.rank() == 1 { 42u64 } else { 0 };
            assert_eq!(comm.broadcast(1, &mine), 42);
        });
    }

    #[test]
    fn size_mismatch_is_a_protocol_error() {
        run_world(2, |mut comm| {
            if comm.rank() == 0 {
                comm.send_f64(1, 5, &[1.0, 2.0]).unwrap();
            } else {
                let err = comm.recv_f64(0, 5, 3).unwrap_err();
                assert!(matches!(
                    err,
                    Error::Comm(CommError::SizeMismatch { .. })
                ));
            }
        });
    }

    #[test]
    fn self_send_is_allowed() {
        run_world(1, |mut comm| {
            comm.send(0, 9, vec![1, 2, 3]).unwrap();
            assert_eq!(comm.recv(0, 9).unwrap(), vec![1, 2, 3]);
        });
    }
}
