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

//! Dependency-graph max-delay analysis.
//!
//! Multi-level patterns compose into a weighted DAG: within a level every
//! communication pair becomes an edge weighted with the pair's maximum
//! route congestion; between levels a zero-weight edge ties a rank's
//! destination vertex to its source vertex in the next level. The metric is
//! the longest distance reachable from any vertex.

use std::collections::HashMap;

use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use rand::Rng;

use crate::metric::CongestionMap;
use crate::pattern::{Generator, Pattern};
use crate::route::RouteLog;
use crate::topology::Topology;

/// A vertex of the dependency graph: a rank at a collective level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DepVertex {
    rank: usize,
    level: usize,
}

/// Run the analysis for one simulation run.
///
/// Pattern levels are generated until the first empty one. Only pairs whose
/// ranks both lie below `valid_until` enter the graph (the first-part
/// communicator bound); the congestion maps still account every pair.
/// `level_hook` sees each generated level, for pattern echoing.
pub fn max_delay<R: Rng>(
    topo: &Topology,
    namelist: &[String],
    generator: &mut Generator,
    valid_until: usize,
    rng: &mut R,
    route_log: &mut RouteLog,
    mut level_hook: impl FnMut(usize, &Pattern),
) -> u64 {
    let mut graph: Graph<DepVertex, u64> = Graph::new();
    let mut prev_dests: HashMap<usize, NodeIndex> = HashMap::new();

    let mut level = 0;
    loop {
        let pattern = generator.level(level, rng);
        if pattern.is_empty() {
            break;
        }
        level_hook(level, &pattern);

        // first pass: the level's congestion map over all pairs
        let mut congestion = CongestionMap::new();
        let mut routes = Vec::with_capacity(pattern.len());
        for &(src, dst) in &pattern {
            let outcome = topo.route(&namelist[src], &namelist[dst]);
            if !outcome.is_complete() {
                route_log.record(&namelist[src], &namelist[dst], outcome.status);
            }
            congestion.add_route(&outcome.edges);
            routes.push(outcome.edges);
        }

        // second pass: one weighted edge per pair inside the validity bound
        let mut this_dests: HashMap<usize, NodeIndex> = HashMap::new();
        let mut this_sources: HashMap<usize, NodeIndex> = HashMap::new();
        for (&(src, dst), route) in pattern.iter().zip(&routes) {
            if src >= valid_until || dst >= valid_until {
                continue;
            }
            let weight = congestion.max_on_route(route);
            let src_vertex = graph.add_node(DepVertex { rank: src, level });
            let dst_vertex = graph.add_node(DepVertex { rank: dst, level });
            graph.add_edge(src_vertex, dst_vertex, weight);
            this_dests.entry(dst).or_insert(dst_vertex);
            this_sources.entry(src).or_insert(src_vertex);
        }

        // rank continuity: destination in the previous level, source in this one
        for (&rank, &src_vertex) in &this_sources {
            if let Some(&prev_vertex) = prev_dests.get(&rank) {
                graph.add_edge(prev_vertex, src_vertex, 0);
            }
        }
        prev_dests = this_dests;
        level += 1;
    }

    longest_distance(&graph)
}

/// The longest distance observed over BFS relaxations from every vertex:
/// examining an edge sets `dist[target] = dist[source] + weight`.
fn longest_distance(graph: &Graph<DepVertex, u64>) -> u64 {
    let mut max = 0;
    for start in graph.node_indices() {
        let mut dist = vec![0u64; graph.node_count()];
        let mut bfs = Bfs::new(graph, start);
        while let Some(vertex) = bfs.next(graph) {
            for edge in graph.edges(vertex) {
                dist[edge.target().index()] = dist[vertex.index()] + *edge.weight();
            }
        }
        max = max.max(dist.into_iter().max().unwrap_or(0));
    }
    max
}
