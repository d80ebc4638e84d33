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

//! The deterministic route oracle.
//!
//! Routing decisions are encoded in the topology: at every node the first
//! out-cable whose destination filter matches the target is taken. The walk
//! is stateless, so a `(source, destination)` pair always produces the same
//! cable sequence on an unchanged topology.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::Result;
use crate::topology::{EdgeId, Topology};

/// How a route walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    /// Reached the destination.
    Complete,
    /// A node on the walk had no matching out-cable; `edges` holds the
    /// prefix built so far.
    Missing,
    /// The walk revisited a node; `edges` is empty.
    Loop,
    /// Source or destination name is not in the topology; `edges` is empty.
    UnknownEndpoint,
}

/// The result of a route walk: the ordered cable ids plus the walk status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    pub edges: Vec<EdgeId>,
    pub status: RouteStatus,
}

impl RouteOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == RouteStatus::Complete
    }
}

impl Topology {
    /// Walk the static route from `src` to `dst`.
    pub fn route(&self, src: &str, dst: &str) -> RouteOutcome {
        let (start, dest) = match (self.node_id(src), self.node_id(dst)) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                return RouteOutcome {
                    edges: Vec::new(),
                    status: RouteStatus::UnknownEndpoint,
                }
            }
        };

        let mut edges = Vec::new();
        let mut visited = HashSet::new();
        let mut current = start;
        while current != dest {
            let next = self
                .out_cables(current)
                .iter()
                .find(|cable| cable.filter().matches(dst));
            match next {
                Some(cable) => {
                    if !visited.insert(cable.head()) {
                        return RouteOutcome {
                            edges: Vec::new(),
                            status: RouteStatus::Loop,
                        };
                    }
                    edges.push(cable.id());
                    current = cable.head();
                }
                None => {
                    return RouteOutcome {
                        edges,
                        status: RouteStatus::Missing,
                    }
                }
            }
        }
        RouteOutcome {
            edges,
            status: RouteStatus::Complete,
        }
    }
}

/// Sink for routing soft errors.
///
/// Loops and missing routes do not stop a simulation; the offending pair is
/// appended to a per-process side file and counted. Each worker owns its own
/// log, so there is no cross-writer interleaving to guard against.
pub struct RouteLog {
    file: Option<File>,
    loops: usize,
    missing: usize,
}

impl RouteLog {
    /// A log that only counts, for tests and for the level-counting mode.
    pub fn sink() -> Self {
        Self {
            file: None,
            loops: 0,
            missing: 0,
        }
    }

    /// Open (append) the side file at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(file),
            loops: 0,
            missing: 0,
        })
    }

    pub fn loops(&self) -> usize {
        self.loops
    }

    pub fn missing(&self) -> usize {
        self.missing
    }

    /// Record a soft routing error for the pair `(src, dst)`.
    pub fn record(&mut self, src: &str, dst: &str, status: RouteStatus) {
        let kind = match status {
            RouteStatus::Loop => {
                self.loops += 1;
                "loop"
            }
            RouteStatus::Missing | RouteStatus::UnknownEndpoint => {
                self.missing += 1;
                "no route"
            }
            RouteStatus::Complete => return,
        };
        if self.loops + self.missing == 1 {
            log::warn!(
                "routing {} for {} -> {}; further soft errors go to the side log only",
                kind,
                src,
                dst
            );
        }
        if let Some(file) = self.file.as_mut() {
            // failure to write the side log is not worth killing a run over
            let _ = writeln!(file, "{}: {} -> {}", kind, src, dst);
        }
    }
}
