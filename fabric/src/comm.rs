// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The collective communication layer of the distributed driver.
//!
//! Workers run the same program (SPMD) and synchronize only at collective
//! calls; every worker must reach every collective in the same program
//! order. Rank 0 is the root. The `Collective` trait captures the calls the
//! simulator needs — broadcast, gather, and the two all-reduces of the
//! dense-array map reduction — with a trivial single-process backend and a
//! thread-group backend built on a generation-counted all-gather hub.

use std::sync::{Arc, Condvar, Mutex};

use crate::metric::CongestionMap;

/// What travels through a collective.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Opaque bytes (the topology file).
    Bytes(Vec<u8>),
    /// Host names (the working namelist and its sub-lists).
    Names(Vec<String>),
    /// GUIDs or other unsigned values.
    Counts(Vec<u64>),
    /// Per-run scalar results.
    Scalars(Vec<f64>),
}

pub trait Collective {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;

    /// Broadcast from rank 0: the root passes `Some`, everyone receives the
    /// root's payload.
    fn broadcast(&self, payload: Option<Payload>) -> Payload;

    /// Gather per-rank scalar vectors on rank 0, rank-major. Non-roots get
    /// `None`.
    fn gather_scalars(&self, local: &[f64]) -> Option<Vec<f64>>;

    /// Global maximum of one value per rank.
    fn allreduce_max(&self, local: u64) -> u64;

    /// Element-wise global sum; shorter contributions count as
    /// zero-padded.
    fn allreduce_sum(&self, local: &[u64]) -> Vec<u64>;
}

/// Reduce a sparse congestion map across the group with the dense-array
/// protocol: all-reduce the maximum key, size dense arrays to it, sum them,
/// and rebuild the sparse map from the non-zero entries.
pub fn allreduce_map(comm: &dyn Collective, map: &CongestionMap) -> CongestionMap {
    let local_max = map.max_key().map(|k| k as u64 + 1).unwrap_or(0);
    let len = comm.allreduce_max(local_max) as usize;
    if len == 0 {
        return CongestionMap::new();
    }
    let dense = comm.allreduce_sum(&map.to_dense(len));
    CongestionMap::from_dense(&dense)
}

/// The world of one: every collective is the identity.
pub struct SingleProcess;

impl Collective for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn broadcast(&self, payload: Option<Payload>) -> Payload {
        payload.expect("rank 0 must provide the broadcast payload")
    }

    fn gather_scalars(&self, local: &[f64]) -> Option<Vec<f64>> {
        Some(local.to_vec())
    }

    fn allreduce_max(&self, local: u64) -> u64 {
        local
    }

    fn allreduce_sum(&self, local: &[u64]) -> Vec<u64> {
        local.to_vec()
    }
}

/// Rendezvous state shared by the members of a worker group.
struct Hub {
    world: usize,
    state: Mutex<HubState>,
    ready: Condvar,
}

struct HubState {
    generation: u64,
    arrived: usize,
    slots: Vec<Option<Payload>>,
    gathered: Option<Arc<Vec<Payload>>>,
}

impl Hub {
    /// All-gather: every rank deposits a payload and receives all of them.
    /// The last arrival completes the round and wakes the waiters; a rank
    /// can only enter the next round after taking this round's result, so
    /// rounds never overtake each other.
    fn allgather(&self, rank: usize, payload: Payload) -> Arc<Vec<Payload>> {
        let mut state = self.state.lock().unwrap();
        let round = state.generation;
        state.slots[rank] = Some(payload);
        state.arrived += 1;
        if state.arrived == self.world {
            let collected: Vec<Payload> = state
                .slots
                .iter_mut()
                .map(|slot| slot.take().expect("every rank has deposited"))
                .collect();
            state.gathered = Some(Arc::new(collected));
            state.arrived = 0;
            state.generation += 1;
            self.ready.notify_all();
        } else {
            while state.generation == round {
                state = self.ready.wait(state).unwrap();
            }
        }
        state.gathered.clone().expect("round completed")
    }
}

/// One member of an in-process worker group.
pub struct WorkerGroup {
    rank: usize,
    hub: Arc<Hub>,
}

impl WorkerGroup {
    /// Create a group of `world` members; hand one to each worker thread.
    pub fn create(world: usize) -> Vec<WorkerGroup> {
        assert!(world > 0, "a worker group needs at least one member");
        let hub = Arc::new(Hub {
            world,
            state: Mutex::new(HubState {
                generation: 0,
                arrived: 0,
                slots: (0..world).map(|_| None).collect(),
                gathered: None,
            }),
            ready: Condvar::new(),
        });
        (0..world)
            .map(|rank| WorkerGroup {
                rank,
                hub: Arc::clone(&hub),
            })
            .collect()
    }
}

impl Collective for WorkerGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.hub.world
    }

    fn broadcast(&self, payload: Option<Payload>) -> Payload {
        if self.rank == 0 {
            assert!(payload.is_some(), "rank 0 must provide the broadcast payload");
        }
        let contribution = payload.unwrap_or(Payload::Bytes(Vec::new()));
        let gathered = self.hub.allgather(self.rank, contribution);
        gathered[0].clone()
    }

    fn gather_scalars(&self, local: &[f64]) -> Option<Vec<f64>> {
        let gathered = self
            .hub
            .allgather(self.rank, Payload::Scalars(local.to_vec()));
        if self.rank != 0 {
            return None;
        }
        let mut all = Vec::new();
        for payload in gathered.iter() {
            match payload {
                Payload::Scalars(values) => all.extend_from_slice(values),
                other => unreachable!("gather received {:?}", other),
            }
        }
        Some(all)
    }

    fn allreduce_max(&self, local: u64) -> u64 {
        let gathered = self.hub.allgather(self.rank, Payload::Counts(vec![local]));
        gathered
            .iter()
            .map(|payload| match payload {
                Payload::Counts(values) => values[0],
                other => unreachable!("allreduce_max received {:?}", other),
            })
            .max()
            .unwrap_or(0)
    }

    fn allreduce_sum(&self, local: &[u64]) -> Vec<u64> {
        let gathered = self
            .hub
            .allgather(self.rank, Payload::Counts(local.to_vec()));
        let len = gathered
            .iter()
            .map(|payload| match payload {
                Payload::Counts(values) => values.len(),
                other => unreachable!("allreduce_sum received {:?}", other),
            })
            .max()
            .unwrap_or(0);
        let mut sum = vec![0u64; len];
        for payload in gathered.iter() {
            if let Payload::Counts(values) = payload {
                for (acc, value) in sum.iter_mut().zip(values) {
                    *acc += value;
                }
            }
        }
        sum
    }
}
