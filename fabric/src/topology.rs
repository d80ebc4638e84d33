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

//! The fabric topology: an owned adjacency representation of the routed
//! interconnect.
//!
//! Nodes and directed cables live in flat arenas; every node owns a
//! contiguous range of the cable arena for its out-edges. Cable ids are
//! dense in `[0, E)` and assigned by a stable two-level iteration — nodes
//! in declaration order, out-edges per node in declaration order — so two
//! loads of the same file always agree on the id of every cable. The cable
//! id is the key for all congestion accounting.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;

use itertools::Itertools;

use crate::dot::{self, DotGraph};
use crate::error::{Error, Result};

/// Index of a node in the topology arena.
pub type NodeId = usize;

/// Dense id of a directed cable, assigned at load time.
pub type EdgeId = usize;

/// Which destination host names may egress through a cable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestFilter {
    /// `"*"`: any destination.
    Wildcard,
    /// An explicit comma-/whitespace-separated token list from the input.
    Targets(Vec<String>),
}

impl DestFilter {
    fn parse(comment: &str) -> Self {
        if comment.trim() == "*" {
            return Self::Wildcard;
        }
        Self::Targets(
            comment
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn matches(&self, destination: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Targets(targets) => targets.iter().any(|t| t == destination),
        }
    }
}

#[derive(Debug)]
pub struct Node {
    name: String,
    /// Out-edges as a contiguous range `[first_cable, first_cable + num_cables)`.
    first_cable: usize,
    num_cables: usize,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A host endpoint is any node whose name starts with `H`.
    pub fn is_host(&self) -> bool {
        self.name.starts_with('H')
    }
}

#[derive(Debug)]
pub struct Cable {
    id: EdgeId,
    tail: NodeId,
    head: NodeId,
    filter: DestFilter,
    /// The raw comment attribute, kept for re-emission.
    comment: String,
}

impl Cable {
    pub fn id(&self) -> EdgeId {
        self.id
    }
    pub fn tail(&self) -> NodeId {
        self.tail
    }
    pub fn head(&self) -> NodeId {
        self.head
    }
    pub fn filter(&self) -> &DestFilter {
        &self.filter
    }
}

/// The loaded fabric. Shared read-only by every simulation routine.
pub struct Topology {
    name: String,
    nodes: Vec<Node>,
    cables: Vec<Cable>,
    index: HashMap<String, NodeId>,
}

impl Topology {
    /// Parse a topology from `.dot` text and assign cable ids.
    pub fn parse(input: &str) -> Result<Self> {
        Self::from_dot(dot::parse(input)?)
    }

    fn from_dot(graph: DotGraph) -> Result<Self> {
        let mut index = HashMap::new();
        let mut nodes = Vec::with_capacity(graph.nodes.len());
        for name in &graph.nodes {
            index.insert(name.clone(), nodes.len());
            nodes.push(Node {
                name: name.clone(),
                first_cable: 0,
                num_cables: 0,
            });
        }

        // Group the declared edges by tail node, preserving declaration
        // order within each group. The resulting flat order is the id order.
        let mut by_tail: Vec<Vec<(NodeId, String)>> = vec![Vec::new(); nodes.len()];
        for edge in graph.edges {
            let tail = index[&edge.tail];
            let head = index[&edge.head];
            let comment = edge.attr("comment").unwrap_or("").to_string();
            by_tail[tail].push((head, comment));
        }

        let mut cables = Vec::new();
        for (tail, outs) in by_tail.into_iter().enumerate() {
            nodes[tail].first_cable = cables.len();
            nodes[tail].num_cables = outs.len();
            for (head, comment) in outs {
                cables.push(Cable {
                    id: cables.len(),
                    tail,
                    head,
                    filter: DestFilter::parse(&comment),
                    comment,
                });
            }
        }

        let topo = Self {
            name: graph.name,
            nodes,
            cables,
            index,
        };
        for host in topo.hosts() {
            // surface bad host names at load time rather than mid-simulation
            topo.guid_of(host)?;
        }
        log::debug!(
            "loaded topology '{}': {} nodes, {} cables, {} hosts",
            topo.name,
            topo.nodes.len(),
            topo.cables.len(),
            topo.hosts().count()
        );
        Ok(topo)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_cables(&self) -> usize {
        self.cables.len()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn cable(&self, id: EdgeId) -> &Cable {
        &self.cables[id]
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Out-cables of a node, in declaration order (= id order).
    pub fn out_cables(&self, node: NodeId) -> &[Cable] {
        let n = &self.nodes[node];
        &self.cables[n.first_cable..n.first_cable + n.num_cables]
    }

    /// Host names in node declaration order.
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().filter(|n| n.is_host()).map(|n| n.name())
    }

    /// The 64-bit GUID encoded in a host name's hex suffix.
    pub fn guid_of(&self, host: &str) -> Result<u64> {
        let suffix = host.strip_prefix('H').ok_or_else(|| {
            Error::Topology(format!("'{}' is not a host name (missing H prefix)", host))
        })?;
        u64::from_str_radix(suffix, 16).map_err(|_| {
            Error::Topology(format!(
                "host '{}' has no valid hex GUID suffix ('{}')",
                host, suffix
            ))
        })
    }

    /// Re-emit the topology as a `.dot` digraph, appending the attributes
    /// `extra` produces for each cable to that cable's comment attribute.
    pub fn write_dot<W: Write>(
        &self,
        w: &mut W,
        mut extra: impl FnMut(&Cable) -> Vec<(String, String)>,
    ) -> std::io::Result<()> {
        writeln!(w, "digraph {} {{", dot::quote(&self.name))?;
        for node in &self.nodes {
            writeln!(w, "  {};", dot::quote(&node.name))?;
        }
        for cable in &self.cables {
            let mut attrs = vec![("comment".to_string(), cable.comment.clone())];
            attrs.extend(extra(cable));
            writeln!(
                w,
                "  {} -> {} [{}];",
                dot::quote(&self.nodes[cable.tail].name),
                dot::quote(&self.nodes[cable.head].name),
                attrs
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, dot::quote(v)))
                    .format(", ")
            )?;
        }
        writeln!(w, "}}")
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Topology: {}", self.name)?;
        writeln!(
            f,
            "Nodes:\n  {}",
            self.nodes.iter().map(|n| &n.name).format("\n  ")
        )?;
        writeln!(
            f,
            "Cables:\n  {}",
            self.cables
                .iter()
                .map(|c| format!(
                    "{}: {} -> {} [{:?}]",
                    c.id, self.nodes[c.tail].name, self.nodes[c.head].name, c.filter
                ))
                .format("\n  ")
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Four hosts on a switch chain; used across the module tests.
    ///
    ///   H1 - S1 - S2 - H3
    ///        |    |
    ///        H2   H4
    pub(crate) const CHAIN4: &str = r#"digraph chain {
        H1 -> S1 [comment="*"];
        S1 -> H1 [comment="H1"];
        S1 -> H2 [comment="H2"];
        S1 -> S2 [comment="H3,H4"];
        H2 -> S1 [comment="*"];
        S2 -> S1 [comment="H1,H2"];
        S2 -> H3 [comment="H3"];
        S2 -> H4 [comment="H4"];
        H3 -> S2 [comment="*"];
        H4 -> S2 [comment="*"];
    }"#;

    #[test]
    fn edge_ids_are_dense_and_stable() {
        let a = Topology::parse(CHAIN4).unwrap();
        let b = Topology::parse(CHAIN4).unwrap();
        assert_eq!(a.num_cables(), 10);
        let names = |t: &Topology| {
            (0..t.num_cables())
                .map(|id| {
                    let c = t.cable(id);
                    (
                        t.node(c.tail()).name().to_string(),
                        t.node(c.head()).name().to_string(),
                    )
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&a), names(&b));
        for (id, cable) in a.cables.iter().enumerate() {
            assert_eq!(cable.id(), id);
        }
    }

    #[test]
    fn ids_follow_node_then_out_edge_order() {
        let t = Topology::parse(CHAIN4).unwrap();
        // H1 is declared first and has a single out-edge: it must get id 0,
        // and S1's three out-edges must follow in declaration order.
        assert_eq!(t.node(t.cable(0).tail()).name(), "H1");
        let s1 = t.node_id("S1").unwrap();
        let outs: Vec<_> = t.out_cables(s1).iter().map(|c| c.id()).collect();
        assert_eq!(outs, vec![1, 2, 3]);
        assert_eq!(t.node(t.cable(3).head()).name(), "S2");
    }

    #[test]
    fn hosts_and_guids() {
        let t = Topology::parse(CHAIN4).unwrap();
        let hosts: Vec<_> = t.hosts().collect();
        assert_eq!(hosts, vec!["H1", "H2", "H3", "H4"]);
        assert_eq!(t.guid_of("H1").unwrap(), 0x1);
        assert_eq!(t.guid_of("Hff00").unwrap(), 0xff00);
        assert!(t.guid_of("S1").is_err());
    }

    #[test]
    fn rejects_bad_guid_suffix() {
        let err = Topology::parse("digraph { Hxyz -> S1 [comment=\"*\"]; }").unwrap_err();
        assert!(matches!(err, Error::Topology(_)));
    }

    #[test]
    fn dest_filter_tokens() {
        let f = DestFilter::parse("H1, H2\tH3");
        assert!(f.matches("H1"));
        assert!(f.matches("H3"));
        assert!(!f.matches("H10"));
        assert!(DestFilter::parse(" * ").matches("anything"));
    }

    #[test]
    fn write_dot_roundtrips_with_extras() {
        let t = Topology::parse(CHAIN4).unwrap();
        let mut out = Vec::new();
        t.write_dot(&mut out, |c| {
            vec![("congestion".to_string(), format!("{}", c.id()))]
        })
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        let reparsed = Topology::parse(&text).unwrap();
        assert_eq!(reparsed.num_cables(), t.num_cables());
        assert!(text.contains("congestion=0"));
    }
}
