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

//! Convert a routed fabric from dot format to the OpenSM-style listing.
//!
//! Cables are bidirectional, so every directed edge must have a
//! reverse-direction partner; on a multigraph the pairing is an assignment
//! problem, solved by matching each edge with the first unused reverse
//! edge. Ports are numbered 1-based in out-edge order, and the remote port
//! of an edge is its partner's position at the remote node.

use std::fs::File;
use std::io::{self, Read, Write};

use anyhow::Context;
use structopt::StructOpt;

use fabric::{EdgeId, Error, Topology};

#[derive(StructOpt)]
#[structopt(name = "dot2osm", about = "Convert dot fabric topologies to OpenSM listings")]
struct CmdLine {
    /// Input topology in dot format; '-' reads from stdin
    input_file: String,
    /// Output listing; '-' writes to stdout
    output_file: String,
}

fn main() {
    env_logger::init();
    let args = CmdLine::from_args();
    if let Err(err) = run(&args) {
        eprintln!("ERROR: {:#}", err);
        std::process::exit(1);
    }
}

fn run(args: &CmdLine) -> anyhow::Result<()> {
    let mut text = String::new();
    if args.input_file == "-" {
        io::stdin().read_to_string(&mut text)?;
    } else {
        File::open(&args.input_file)
            .with_context(|| format!("could not open input file '{}'", args.input_file))?
            .read_to_string(&mut text)?;
    }
    let topo = Topology::parse(&text)?;

    log::info!(
        "pairing {} cables over {} nodes",
        topo.num_cables(),
        topo.num_nodes()
    );
    let partners = pair_edges(&topo)?;

    if args.output_file == "-" {
        let stdout = io::stdout();
        write_osm(&mut stdout.lock(), &topo, &partners)?;
    } else {
        let mut file = File::create(&args.output_file)
            .with_context(|| format!("could not open output file '{}'", args.output_file))?;
        write_osm(&mut file, &topo, &partners)?;
    }
    Ok(())
}

/// Match every directed cable with a unique reverse-direction partner.
fn pair_edges(topo: &Topology) -> fabric::Result<Vec<EdgeId>> {
    let mut partner: Vec<Option<EdgeId>> = vec![None; topo.num_cables()];
    for node in 0..topo.num_nodes() {
        for cable in topo.out_cables(node) {
            if partner[cable.id()].is_some() {
                continue;
            }
            let reverse = topo
                .out_cables(cable.head())
                .iter()
                .find(|back| back.head() == node && partner[back.id()].is_none());
            match reverse {
                Some(back) => {
                    partner[cable.id()] = Some(back.id());
                    partner[back.id()] = Some(cable.id());
                }
                None => {
                    return Err(Error::UnpairedEdge(
                        topo.node(cable.tail()).name().to_string(),
                        topo.node(cable.head()).name().to_string(),
                    ))
                }
            }
        }
    }
    Ok(partner.into_iter().map(|p| p.expect("all paired")).collect())
}

/// 1-based position of `cable` among its tail node's out-edges.
fn port_number(topo: &Topology, cable: EdgeId) -> usize {
    let tail = topo.cable(cable).tail();
    topo.out_cables(tail)
        .iter()
        .position(|c| c.id() == cable)
        .expect("cable listed at its tail")
        + 1
}

fn write_osm<W: Write>(w: &mut W, topo: &Topology, partners: &[EdgeId]) -> io::Result<()> {
    for node in 0..topo.num_nodes() {
        let spec = topo.node(node);
        let kind = if spec.is_host() { "Hca" } else { "Switch" };
        writeln!(
            w,
            "{} {} \"{}\"",
            kind,
            topo.out_cables(node).len(),
            spec.name()
        )?;
        for (port, cable) in topo.out_cables(node).iter().enumerate() {
            let remote_port = port_number(topo, partners[cable.id()]);
            // no whitespace between the remote name and its port
            writeln!(
                w,
                "[{}] \"{}\"[{}]",
                port + 1,
                topo.node(cable.head()).name(),
                remote_port
            )?;
        }
        writeln!(w)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: &str = r#"digraph t {
        H1 -> S1 [comment="*"];
        S1 -> H1 [comment="H1"];
        S1 -> H2 [comment="H2"];
        H2 -> S1 [comment="*"];
    }"#;

    #[test]
    fn pairs_are_mutual() {
        let topo = Topology::parse(TRIANGLE).unwrap();
        let partners = pair_edges(&topo).unwrap();
        for (cable, &partner) in partners.iter().enumerate() {
            assert_eq!(partners[partner], cable);
            assert_eq!(topo.cable(cable).tail(), topo.cable(partner).head());
            assert_eq!(topo.cable(cable).head(), topo.cable(partner).tail());
        }
    }

    #[test]
    fn multigraph_partners_are_unique() {
        let topo = Topology::parse(
            r#"digraph m {
                A -> B [comment="*"];
                A -> B [comment="*"];
                B -> A [comment="*"];
                B -> A [comment="*"];
            }"#,
        )
        .unwrap();
        let partners = pair_edges(&topo).unwrap();
        let mut seen = std::collections::HashSet::new();
        for &p in &partners {
            assert!(seen.insert(p), "partner {} assigned twice", p);
        }
    }

    #[test]
    fn missing_reverse_edge_is_an_error() {
        let topo = Topology::parse("digraph m { A -> B [comment=\"*\"]; }").unwrap();
        assert!(matches!(pair_edges(&topo), Err(Error::UnpairedEdge(_, _))));
    }

    #[test]
    fn listing_format() {
        let topo = Topology::parse(TRIANGLE).unwrap();
        let partners = pair_edges(&topo).unwrap();
        let mut out = Vec::new();
        write_osm(&mut out, &topo, &partners).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Hca 1 \"H1\"");
        assert_eq!(lines[1], "[1] \"S1\"[1]");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "Switch 2 \"S1\"");
        assert_eq!(lines[4], "[1] \"H1\"[1]");
        assert_eq!(lines[5], "[2] \"H2\"[1]");
    }
}
