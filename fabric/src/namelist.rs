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

//! Endpoint selection: building the working namelist for a simulation.
//!
//! A namelist is an ordered sequence of distinct host names; the index of a
//! name is the logical rank it plays in a pattern. The selector draws a
//! subset of the topology's hosts by one of four methods, optionally carves
//! out a partition for pattern-vs-pattern runs, and optionally pins a
//! user-ordered prefix that is exempt from the per-run shuffle.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::topology::Topology;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsetMethod {
    /// Uniform sample without replacement.
    Random,
    /// BFS from the first declared node, hosts in discovery order.
    LinearBfs,
    /// Numeric GUID order, ascending.
    GuidOrderAsc,
    /// Numeric GUID order, descending.
    GuidOrderDesc,
}

impl std::str::FromStr for SubsetMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rand" => Ok(Self::Random),
            "linear_bfs" => Ok(Self::LinearBfs),
            "guid_order_asc" => Ok(Self::GuidOrderAsc),
            "guid_order_desc" => Ok(Self::GuidOrderDesc),
            other => Err(Error::Subset(other.to_string())),
        }
    }
}

impl fmt::Display for SubsetMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Random => "rand",
            Self::LinearBfs => "linear_bfs",
            Self::GuidOrderAsc => "guid_order_asc",
            Self::GuidOrderDesc => "guid_order_desc",
        };
        write!(f, "{}", name)
    }
}

/// Select `k` host names from `pool` (or from the topology's hosts when no
/// pool is given) using `method`.
pub fn generate<R: Rng>(
    topo: &Topology,
    method: SubsetMethod,
    k: usize,
    pool: Option<&[String]>,
    rng: &mut R,
) -> Result<Vec<String>> {
    let pool: Vec<String> = match pool {
        Some(p) => p.to_vec(),
        None => topo.hosts().map(str::to_string).collect(),
    };
    if k > pool.len() {
        return Err(Error::Topology(format!(
            "requested {} endpoints but only {} are available",
            k,
            pool.len()
        )));
    }
    match method {
        SubsetMethod::Random => {
            let mut picked = pool;
            picked.shuffle(rng);
            picked.truncate(k);
            Ok(picked)
        }
        SubsetMethod::LinearBfs => {
            let members: HashSet<&String> = pool.iter().collect();
            Ok(bfs_hosts(topo)
                .into_iter()
                .filter(|h| members.contains(h))
                .take(k)
                .collect())
        }
        SubsetMethod::GuidOrderAsc => guid_order(topo, pool, k, true),
        SubsetMethod::GuidOrderDesc => guid_order(topo, pool, k, false),
    }
}

/// All hosts reachable from the first declared node, in BFS discovery order.
fn bfs_hosts(topo: &Topology) -> Vec<String> {
    let mut order = Vec::new();
    if topo.num_nodes() == 0 {
        return order;
    }
    let mut queue = VecDeque::new();
    let mut seen = vec![false; topo.num_nodes()];
    queue.push_back(0);
    seen[0] = true;
    while let Some(node) = queue.pop_front() {
        if topo.node(node).is_host() {
            order.push(topo.node(node).name().to_string());
        }
        for cable in topo.out_cables(node) {
            if !seen[cable.head()] {
                seen[cable.head()] = true;
                queue.push_back(cable.head());
            }
        }
    }
    order
}

fn guid_order(topo: &Topology, pool: Vec<String>, k: usize, asc: bool) -> Result<Vec<String>> {
    let mut with_guids = pool
        .into_iter()
        .map(|name| topo.guid_of(&name).map(|g| (g, name)))
        .collect::<Result<Vec<_>>>()?;
    with_guids.sort_by_key(|(g, _)| *g);
    if !asc {
        with_guids.reverse();
    }
    Ok(with_guids
        .into_iter()
        .take(k)
        .map(|(_, name)| name)
        .collect())
}

/// Carve a `part` sized sub-selection out of `namelist` for a
/// pattern-vs-pattern run. The partition occupies ranks `[0, part)` of the
/// returned list; the remainder keeps its relative order after it.
pub fn partition<R: Rng>(
    topo: &Topology,
    namelist: &[String],
    method: SubsetMethod,
    part: usize,
    rng: &mut R,
) -> Result<Vec<String>> {
    let sub = generate(topo, method, part, Some(namelist), rng)?;
    let in_sub: HashSet<&String> = sub.iter().collect();
    let mut merged = sub.clone();
    merged.extend(
        namelist
            .iter()
            .filter(|n| !in_sub.contains(n))
            .cloned(),
    );
    Ok(merged)
}

/// Read a node-ordering file: one hex GUID per line, optional `0x` prefix,
/// `#` comments, blank lines ignored.
pub fn read_node_ordering(path: &Path) -> Result<Vec<u64>> {
    let text = std::fs::read_to_string(path)?;
    parse_node_ordering(&text)
}

pub fn parse_node_ordering(text: &str) -> Result<Vec<u64>> {
    let mut guids = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let body = line.split('#').next().unwrap_or("").trim();
        if body.is_empty() {
            continue;
        }
        let digits = body.strip_prefix("0x").unwrap_or(body);
        let guid = u64::from_str_radix(digits, 16)
            .map_err(|_| Error::NodeOrdering(lineno + 1, body.to_string()))?;
        guids.push(guid);
    }
    Ok(guids)
}

/// Pin the hosts named by `guid_order` to the front of `namelist`, in the
/// file's order. GUIDs that match no list member are silently dropped.
/// Returns the number of pinned names.
pub fn apply_node_ordering(
    topo: &Topology,
    namelist: &mut Vec<String>,
    guid_order: &[u64],
) -> Result<usize> {
    let guids = namelist
        .iter()
        .map(|n| topo.guid_of(n))
        .collect::<Result<Vec<_>>>()?;
    let mut pinned = Vec::new();
    let mut rest: Vec<Option<String>> = namelist.drain(..).map(Some).collect();
    for wanted in guid_order {
        if let Some(pos) = rest
            .iter()
            .enumerate()
            .position(|(i, slot)| slot.is_some() && guids[i] == *wanted)
        {
            pinned.push(rest[pos].take().unwrap());
        }
    }
    let count = pinned.len();
    namelist.extend(pinned);
    namelist.extend(rest.into_iter().flatten());
    Ok(count)
}

/// Permute the shuffleable tail of the namelist in place. The first
/// `fixed_prefix` entries (node-order pins, and the partitioned subset in
/// pattern-vs-pattern runs) keep their positions.
pub fn shuffle<R: Rng>(namelist: &mut [String], fixed_prefix: usize, rng: &mut R) {
    if fixed_prefix < namelist.len() {
        namelist[fixed_prefix..].shuffle(rng);
    }
}
