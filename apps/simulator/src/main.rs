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

//! The routing-table congestion simulator.
//!
//! Reads a routed fabric topology in dot format, simulates the configured
//! communication pattern over many randomized runs on a group of workers,
//! and reports the distribution of the chosen congestion metric.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::thread;

use anyhow::{bail, Context};
use structopt::StructOpt;

use fabric::sim::{self, RouteQualityReport};
use fabric::stats::{self, GlobalResults};
use fabric::{
    Collective, Metric, PatternSpec, SimConfig, SubsetMethod, SumMode, Topology, WorkerGroup,
};

#[derive(StructOpt)]
#[structopt(
    name = "simulator",
    about = "Evaluate static fabric routing tables under communication patterns"
)]
struct CmdLine {
    /// Input topology in dot format; '-' reads from stdin
    #[structopt(short = "i", long = "input-file", default_value = "-")]
    input_file: String,
    /// Report destination; '-' writes to stdout
    #[structopt(short = "o", long = "output-file", default_value = "-")]
    output_file: String,
    /// Number of participating ranks; 0 uses all hosts rounded down to even
    #[structopt(short = "c", long, default_value = "0")]
    commsize: usize,
    /// Size of the first sub-communicator of ptrnvsptrn
    #[structopt(long = "part-commsize", default_value = "2")]
    part_commsize: usize,
    /// Pattern name (rand, bisect, tree, bruck, ring, recdbl, ...)
    #[structopt(short = "p", long = "ptrn", default_value = "rand")]
    ptrn: String,
    /// Pattern argument, where the pattern takes one
    #[structopt(short = "a", long = "ptrnarg")]
    ptrnarg: Option<String>,
    /// Simulate only this pattern level
    #[structopt(short = "l", long = "ptrn-level")]
    ptrn_level: Option<usize>,
    /// Endpoint subset selection method
    #[structopt(short = "s", long, default_value = "rand")]
    subset: SubsetMethod,
    /// Selection method for the ptrnvsptrn partition
    #[structopt(long = "part-subset", default_value = "rand")]
    part_subset: SubsetMethod,
    /// Metric to derive per run
    #[structopt(short = "m", long, default_value = "sum_max_cong")]
    metric: Metric,
    /// Number of simulation runs, split over the workers
    #[structopt(short = "r", long = "num-runs", default_value = "10")]
    num_runs: usize,
    /// Size of the worker group
    #[structopt(short = "w", long, default_value = "1")]
    workers: usize,
    /// How sum_max_cong combines levels within a run
    #[structopt(long = "sum-mode", default_value = "accumulate")]
    sum_mode: SumMode,
    /// Base seed; workers derive their own streams from it
    #[structopt(long, default_value = "42")]
    seed: u64,
    /// Echo the working namelist each run
    #[structopt(long)]
    printnamelist: bool,
    /// Echo every generated pattern level
    #[structopt(long)]
    printptrn: bool,
    #[structopt(short = "v", long)]
    verbose: bool,
    /// Keep the namelist order fixed between runs
    #[structopt(long = "do-not-shuffle")]
    do_not_shuffle: bool,
    /// Route every host pair once and exit
    #[structopt(long)]
    checkinputfile: bool,
    /// Assess routing-table quality instead of running patterns
    #[structopt(long)]
    routequal: bool,
    /// Pair-evaluation budget of the route-quality mode
    #[structopt(long, default_value = "4294967294")]
    maxiters: u64,
    /// Print the pattern's level count and exit with it
    #[structopt(long)]
    getnumlevels: bool,
    /// File pinning an ordered GUID prefix into the namelist
    #[structopt(long = "node-ordering-file")]
    node_ordering_file: Option<PathBuf>,
    /// Directory for the per-worker routing side logs
    #[structopt(long = "route-log-dir")]
    route_log_dir: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let args = CmdLine::from_args();
    match run(&args) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("ERROR: {:#}", err);
            std::process::exit(1);
        }
    }
}

fn run(args: &CmdLine) -> anyhow::Result<i32> {
    let pattern = PatternSpec::parse(&args.ptrn, args.ptrnarg.as_deref())?;

    let graph_text = read_input(&args.input_file)
        .with_context(|| format!("could not read input file '{}'", args.input_file))?;
    let topo = Topology::parse(&graph_text)?;
    let num_hosts = topo.hosts().count();

    if args.checkinputfile {
        println!("Number of hosts in the inputfile: {}", num_hosts);
        println!("Number of nodes in the inputfile: {}", topo.num_nodes());
        let (pairs, soft_errors) = sim::check_input(&topo);
        println!("Completed: {} pairs, {} soft errors", pairs, soft_errors);
        return Ok(0);
    }

    if args.routequal {
        let report = parallel_route_quality(args, &graph_text)?;
        println!("Number of hosts in the inputfile: {}", num_hosts);
        println!("Number of nodes in the inputfile: {}", topo.num_nodes());
        println!("Number of edges in the inputfile: {}", topo.num_cables());
        println!("gmin: {}, gmax: {}", report.gmin, report.gmax);
        println!("E: {:.2}, sigma: {:.2}", report.mean, report.sigma);
        println!("Completed");
        return Ok(0);
    }

    let commsize = sim::resolve_commsize(args.commsize, num_hosts)?;
    let composite = args.ptrn == "ptrnvsptrn";
    let part_commsize = if composite {
        sim::resolve_part_commsize(args.part_commsize, commsize)?
    } else {
        args.part_commsize
    };
    if args.workers == 0 {
        bail!("the worker group needs at least one worker");
    }

    let node_ordering = match &args.node_ordering_file {
        Some(path) => fabric::namelist::read_node_ordering(path)?,
        None => Vec::new(),
    };

    let cfg = SimConfig {
        commsize,
        part_commsize,
        pattern,
        subset: args.subset,
        part_subset: args.part_subset,
        metric: args.metric,
        num_runs: args.num_runs,
        ptrn_level: args.ptrn_level,
        sum_mode: args.sum_mode,
        do_not_shuffle: args.do_not_shuffle,
        print_namelist: args.printnamelist,
        print_ptrn: args.printptrn,
        verbose: args.verbose,
        seed: args.seed,
        node_ordering,
        route_log_dir: args.route_log_dir.clone(),
    };

    if args.getnumlevels {
        let levels = sim::count_levels(&cfg);
        println!(
            "The given input configuration would result in a {} level simulation.",
            levels
        );
        return Ok(levels as i32);
    }

    print_options(&mut io::stdout(), args, &cfg)?;
    let global = parallel_run(&cfg, args.workers, &graph_text)?;
    write_report(args, &cfg, &topo, &global)?;
    Ok(0)
}

fn read_input(name: &str) -> anyhow::Result<String> {
    let mut text = String::new();
    if name == "-" {
        io::stdin().read_to_string(&mut text)?;
    } else {
        File::open(name)?.read_to_string(&mut text)?;
    }
    Ok(text)
}

/// Bring up the worker group and run the simulation on every member; the
/// root's reduced results come back.
fn parallel_run(
    cfg: &SimConfig,
    workers: usize,
    graph_text: &str,
) -> anyhow::Result<GlobalResults> {
    let members = WorkerGroup::create(workers);
    let outcomes = thread::scope(|scope| {
        let handles: Vec<_> = members
            .iter()
            .map(|comm| {
                scope.spawn(move || {
                    let text = (comm.rank() == 0).then(|| graph_text.to_string());
                    sim::run_worker(comm, text, cfg)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker panicked"))
            .collect::<Vec<_>>()
    });
    let mut root_result = None;
    for outcome in outcomes {
        if let Some(global) = outcome? {
            root_result = Some(global);
        }
    }
    root_result.context("the root worker produced no results")
}

fn parallel_route_quality(
    args: &CmdLine,
    graph_text: &str,
) -> anyhow::Result<RouteQualityReport> {
    let members = WorkerGroup::create(args.workers.max(1));
    let outcomes = thread::scope(|scope| {
        let handles: Vec<_> = members
            .iter()
            .map(|comm| {
                scope.spawn(move || {
                    let text = (comm.rank() == 0).then(|| graph_text.to_string());
                    sim::route_quality(comm, text, args.subset, args.maxiters, args.seed)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker panicked"))
            .collect::<Vec<_>>()
    });
    let mut report = None;
    for outcome in outcomes {
        if let Some(r) = outcome? {
            report = Some(r);
        }
    }
    report.context("the root worker produced no report")
}

fn print_options<W: Write>(w: &mut W, args: &CmdLine, cfg: &SimConfig) -> io::Result<()> {
    writeln!(w, "Input File: {}", args.input_file)?;
    writeln!(w, "Output File: {}", args.output_file)?;
    writeln!(w, "Commsize: {}", cfg.commsize)?;
    writeln!(w, "Pattern: {}", cfg.pattern)?;
    match cfg.ptrn_level {
        Some(level) => writeln!(w, "Level: {}", level)?,
        None => writeln!(w, "Level: all")?,
    }
    writeln!(w, "Runs: {}", cfg.num_runs)?;
    writeln!(w, "Workers: {}", args.workers)?;
    writeln!(w, "Subset: {}", cfg.subset)?;
    writeln!(w, "Metric: {}", cfg.metric)?;
    writeln!(w, "Part_commsize: {}\n", cfg.part_commsize)
}

fn write_report(
    args: &CmdLine,
    cfg: &SimConfig,
    topo: &Topology,
    global: &GlobalResults,
) -> anyhow::Result<()> {
    if args.output_file == "-" {
        let stdout = io::stdout();
        let mut w = stdout.lock();
        write_metric_output(&mut w, cfg, topo, global, true)?;
    } else {
        let mut w = File::create(&args.output_file)
            .with_context(|| format!("could not open output file '{}'", args.output_file))?;
        print_options(&mut w, args, cfg)?;
        write_metric_output(&mut w, cfg, topo, global, false)?;
    }
    Ok(())
}

fn write_metric_output<W: Write>(
    w: &mut W,
    cfg: &SimConfig,
    topo: &Topology,
    global: &GlobalResults,
    to_stdout: bool,
) -> io::Result<()> {
    match cfg.metric {
        Metric::SumMaxCong => stats::write_scalar_report(w, "Maximal Congestion", &global.results),
        Metric::DepMaxDelay => stats::write_scalar_report(w, "Delay", &global.results),
        Metric::HistAccBand => stats::write_histogram(w, &global.results),
        Metric::HistMaxCong => stats::write_bigbucket(w, &global.bigbucket),
        Metric::GetCableCong => {
            if to_stdout {
                // the annotated graph goes to stdout for piping into dot
                stats::write_congestion_graph(w, topo, &global.global_congestion)
            } else {
                stats::write_cable_congestion(w, &global.global_congestion)
            }
        }
    }
}
