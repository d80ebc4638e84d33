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

//! Congestion accounting and the per-run metrics.
//!
//! A `CongestionMap` counts, per cable id, how many of the currently
//! accumulated routes traverse that cable. A `Bucket` is the dense weight
//! histogram derived from it: entry `w` counts the pairs whose most
//! congested cable carried weight `w`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::topology::EdgeId;

/// Sparse cable usage counts for one accumulation scope (a pattern level or
/// a whole route-quality sweep).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CongestionMap {
    counts: BTreeMap<EdgeId, u64>,
}

impl CongestionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn get(&self, edge: EdgeId) -> u64 {
        self.counts.get(&edge).copied().unwrap_or(0)
    }

    /// Count one route: every traversed cable gains one unit of demand.
    pub fn add_route(&mut self, edges: &[EdgeId]) {
        for &edge in edges {
            *self.counts.entry(edge).or_insert(0) += 1;
        }
    }

    /// The maximum congestion over the cables of `edges`; 0 for an empty route.
    pub fn max_on_route(&self, edges: &[EdgeId]) -> u64 {
        edges.iter().map(|e| self.get(*e)).max().unwrap_or(0)
    }

    /// Like `max_on_route` but ignoring the first and last cable (the host
    /// up- and down-links), as used by the route-quality assessment.
    pub fn max_on_interior(&self, edges: &[EdgeId]) -> u64 {
        if edges.len() <= 2 {
            return 0;
        }
        self.max_on_route(&edges[1..edges.len() - 1])
    }

    /// Element-wise merge of `other` into `self`.
    pub fn merge(&mut self, other: &CongestionMap) {
        for (&edge, &count) in &other.counts {
            *self.counts.entry(edge).or_insert(0) += count;
        }
    }

    pub fn max_key(&self) -> Option<EdgeId> {
        self.counts.keys().next_back().copied()
    }

    pub fn max_value(&self) -> u64 {
        self.counts.values().copied().max().unwrap_or(0)
    }

    /// Total accumulated demand; equals the summed lengths of all added routes.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EdgeId, u64)> + '_ {
        self.counts.iter().map(|(&k, &v)| (k, v))
    }

    /// Dense encoding for the all-reduce protocol: a `len` wide array with
    /// the count of every edge id at its index.
    pub fn to_dense(&self, len: usize) -> Vec<u64> {
        let mut dense = vec![0; len];
        for (&edge, &count) in &self.counts {
            dense[edge] = count;
        }
        dense
    }

    /// Rebuild from a dense array, keeping only non-zero entries.
    pub fn from_dense(dense: &[u64]) -> Self {
        let mut counts = BTreeMap::new();
        for (edge, &count) in dense.iter().enumerate() {
            if count > 0 {
                counts.insert(edge, count);
            }
        }
        Self { counts }
    }
}

/// Dense histogram over congestion weights.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    counts: Vec<u64>,
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn record(&mut self, weight: u64) {
        let index = weight as usize;
        if self.counts.len() <= index {
            self.counts.resize(index + 1, 0);
        }
        self.counts[index] += 1;
    }

    pub fn get(&self, weight: usize) -> u64 {
        self.counts.get(weight).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn add(&mut self, other: &[u64]) {
        if self.counts.len() < other.len() {
            self.counts.resize(other.len(), 0);
        }
        for (mine, theirs) in self.counts.iter_mut().zip(other) {
            *mine += theirs;
        }
    }

    /// The highest weight with a non-zero count.
    pub fn max_weight(&self) -> u64 {
        self.counts
            .iter()
            .rposition(|&c| c > 0)
            .map(|w| w as u64)
            .unwrap_or(0)
    }

    /// Accumulated relative bandwidth: `sum(count[w]/w) / sum(count[w])`
    /// over non-zero weights. Weight-0 entries (pairs without a usable
    /// route) do not participate.
    pub fn accumulated_bandwidth(&self) -> f64 {
        let mut total = 0.0;
        let mut acc = 0.0;
        for (weight, &count) in self.counts.iter().enumerate().skip(1) {
            if count > 0 {
                total += count as f64;
                acc += count as f64 / weight as f64;
            }
        }
        if total == 0.0 {
            0.0
        } else {
            acc / total
        }
    }
}

/// The run metrics the simulator can derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Per level, the summed per-pair maximum congestion; a scalar per run.
    SumMaxCong,
    /// Histogram over per-pair maximum congestion, merged into the process
    /// big-bucket.
    HistMaxCong,
    /// Accumulated-bandwidth scalar per run, derived from the same buckets.
    HistAccBand,
    /// Merge every level's map into the process-global congestion map.
    GetCableCong,
    /// Longest path through the level dependency graph; a scalar per run.
    DepMaxDelay,
}

impl Metric {
    /// Whether the metric produces one scalar per run (gathered at root).
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::SumMaxCong | Self::HistAccBand | Self::DepMaxDelay)
    }
}

impl std::str::FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum_max_cong" => Ok(Self::SumMaxCong),
            "hist_max_cong" => Ok(Self::HistMaxCong),
            "hist_acc_band" => Ok(Self::HistAccBand),
            "get_cable_cong" => Ok(Self::GetCableCong),
            "dep_max_delay" => Ok(Self::DepMaxDelay),
            other => Err(Error::Metric(other.to_string())),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::SumMaxCong => "sum_max_cong",
            Self::HistMaxCong => "hist_max_cong",
            Self::HistAccBand => "hist_acc_band",
            Self::GetCableCong => "get_cable_cong",
            Self::DepMaxDelay => "dep_max_delay",
        };
        write!(f, "{}", name)
    }
}

/// How `sum_max_cong` combines its level values within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SumMode {
    /// Level values add up across the run's levels.
    Accumulate,
    /// Each level stands alone; the run records the largest level value.
    Reset,
}

impl std::str::FromStr for SumMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "accumulate" => Ok(Self::Accumulate),
            "reset" => Ok(Self::Reset),
            other => Err(Error::Metric(format!(
                "sum mode must be 'accumulate' or 'reset', got '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn congestion_map_counts_routes() {
        let mut map = CongestionMap::new();
        map.add_route(&[0, 3, 6]);
        map.add_route(&[1, 3]);
        assert_eq!(map.get(3), 2);
        assert_eq!(map.get(0), 1);
        assert_eq!(map.get(9), 0);
        // sum over edges == sum over pairs of route length
        assert_eq!(map.total(), 5);
    }

    #[test]
    fn max_on_route_and_interior() {
        let mut map = CongestionMap::new();
        map.add_route(&[0, 1, 2, 3]);
        map.add_route(&[9, 1, 8]);
        assert_eq!(map.max_on_route(&[0, 1, 2, 3]), 2);
        assert_eq!(map.max_on_route(&[]), 0);
        // interior of [9, 1, 8] is just cable 1
        assert_eq!(map.max_on_interior(&[9, 1, 8]), 2);
        assert_eq!(map.max_on_interior(&[0, 3]), 0);
    }

    #[test]
    fn dense_roundtrip_drops_zeros() {
        let mut map = CongestionMap::new();
        map.add_route(&[2, 5]);
        map.add_route(&[5]);
        let dense = map.to_dense(8);
        assert_eq!(dense, vec![0, 0, 1, 0, 0, 2, 0, 0]);
        assert_eq!(CongestionMap::from_dense(&dense), map);
    }

    #[test]
    fn merge_sums_elementwise() {
        let mut a = CongestionMap::new();
        a.add_route(&[1, 2]);
        let mut b = CongestionMap::new();
        b.add_route(&[2, 3]);
        a.merge(&b);
        assert_eq!(a.get(1), 1);
        assert_eq!(a.get(2), 2);
        assert_eq!(a.get(3), 1);
        assert_eq!(a.max_key(), Some(3));
    }

    #[test]
    fn bucket_grows_and_merges() {
        let mut bucket = Bucket::new();
        bucket.record(3);
        bucket.record(3);
        bucket.record(1);
        assert_eq!(bucket.get(3), 2);
        assert_eq!(bucket.max_weight(), 3);
        let mut other = Bucket::new();
        other.add(bucket.counts());
        other.record(5);
        assert_eq!(other.get(3), 2);
        assert_eq!(other.max_weight(), 5);
    }

    #[test]
    fn accumulated_bandwidth() {
        let mut bucket = Bucket::new();
        // two pairs at weight 1, two at weight 2: (2/1 + 2/2) / 4 = 0.75
        bucket.record(1);
        bucket.record(1);
        bucket.record(2);
        bucket.record(2);
        assert!((bucket.accumulated_bandwidth() - 0.75).abs() < 1e-12);
        // weight-0 entries are ignored
        bucket.record(0);
        assert!((bucket.accumulated_bandwidth() - 0.75).abs() < 1e-12);
        assert_eq!(Bucket::new().accumulated_bandwidth(), 0.0);
    }

    #[test]
    fn metric_names_roundtrip() {
        for name in [
            "sum_max_cong",
            "hist_max_cong",
            "hist_acc_band",
            "get_cable_cong",
            "dep_max_delay",
        ] {
            let metric: Metric = name.parse().unwrap();
            assert_eq!(metric.to_string(), name);
        }
        assert!("warp_speed".parse::<Metric>().is_err());
    }
}
