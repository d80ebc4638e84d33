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

//! The simulation driver: per-worker run loop, reduction phase, and the
//! auxiliary route-quality and input-check modes.
//!
//! Workers execute the same program; rank 0 reads the input, builds the
//! working namelist and broadcasts both. All per-worker mutable state lives
//! in an explicit context owned by the run loop.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::comm::{allreduce_map, Collective, Payload};
use crate::delay;
use crate::error::{Error, Result};
use crate::metric::{Bucket, CongestionMap, Metric, SumMode};
use crate::namelist::{self, SubsetMethod};
use crate::pattern::{Generator, Pattern, PatternArg, PatternSpec};
use crate::route::RouteLog;
use crate::stats::GlobalResults;
use crate::topology::Topology;

/// Everything a simulation run needs to know; identical on every worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub commsize: usize,
    pub part_commsize: usize,
    pub pattern: PatternSpec,
    pub subset: SubsetMethod,
    pub part_subset: SubsetMethod,
    pub metric: Metric,
    pub num_runs: usize,
    /// Simulate only this pattern level when set.
    pub ptrn_level: Option<usize>,
    pub sum_mode: SumMode,
    pub do_not_shuffle: bool,
    pub print_namelist: bool,
    pub print_ptrn: bool,
    pub verbose: bool,
    pub seed: u64,
    /// GUIDs pinned to the front of the namelist, in order.
    pub node_ordering: Vec<u64>,
    /// Directory for the per-worker routing side logs; no file when unset.
    pub route_log_dir: Option<PathBuf>,
}

impl SimConfig {
    pub fn is_composite(&self) -> bool {
        matches!(self.pattern.arg, PatternArg::PtrnVsPtrn(_, _))
    }

    /// The rank bound of the dependency-graph analysis: the first-part
    /// communicator in composite runs, the whole communicator otherwise.
    fn valid_until(&self) -> usize {
        if self.is_composite() {
            self.part_commsize
        } else {
            self.commsize
        }
    }
}

/// Apply the `commsize` defaulting and bounds rules against the host count.
pub fn resolve_commsize(requested: usize, num_hosts: usize) -> Result<usize> {
    let commsize = if requested == 0 {
        num_hosts - num_hosts % 2
    } else {
        requested
    };
    if commsize < 4 || commsize > num_hosts {
        return Err(Error::Topology(format!(
            "commsize {} out of range [4, {}]",
            commsize, num_hosts
        )));
    }
    Ok(commsize)
}

/// Validate `part_commsize` for a composite pattern run.
pub fn resolve_part_commsize(part: usize, commsize: usize) -> Result<usize> {
    if part < 2 || part >= commsize {
        return Err(Error::Topology(format!(
            "part_commsize {} out of range [2, {})",
            part, commsize
        )));
    }
    Ok(part)
}

/// Per-worker mutable simulation state.
struct SimContext {
    rng: StdRng,
    route_log: RouteLog,
    results: Vec<f64>,
    bigbucket: Bucket,
    global_congestion: CongestionMap,
}

impl SimContext {
    fn new(cfg: &SimConfig, rank: usize) -> Result<Self> {
        // every worker draws from its own deterministically seeded stream
        let rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(rank as u64 * 0x9E3779B97F4A7C15));
        let route_log = match &cfg.route_log_dir {
            Some(dir) => {
                let name = if rank == 0 {
                    "routing_loops.log".to_string()
                } else {
                    format!("routing_loops.{}.log", rank)
                };
                RouteLog::open(&dir.join(name))?
            }
            None => RouteLog::sink(),
        };
        Ok(Self {
            rng,
            route_log,
            results: Vec::new(),
            bigbucket: Bucket::new(),
            global_congestion: CongestionMap::new(),
        })
    }
}

/// Broadcast the topology text and the root-built namelist, then run this
/// worker's share of the runs and join the reduction. Returns the global
/// results on rank 0, `None` elsewhere.
pub fn run_worker(
    comm: &dyn Collective,
    graph_text: Option<String>,
    cfg: &SimConfig,
) -> Result<Option<GlobalResults>> {
    let root = comm.rank() == 0;

    // topology bytes travel as-is; every worker parses locally
    let bytes = match comm.broadcast(graph_text.map(|t| Payload::Bytes(t.into_bytes()))) {
        Payload::Bytes(b) => b,
        other => unreachable!("topology broadcast carried {:?}", other),
    };
    let text = String::from_utf8(bytes).map_err(|_| Error::Topology("input is not UTF-8".into()))?;
    let topo = Topology::parse(&text)?;

    let (mut names, fixed_prefix) = distribute_namelist(comm, &topo, cfg)?;

    let mut ctx = SimContext::new(cfg, comm.rank())?;
    let runs_per_worker = div_ceil(cfg.num_runs, comm.world_size());
    for run in 0..runs_per_worker {
        if !cfg.do_not_shuffle {
            namelist::shuffle(&mut names, fixed_prefix, &mut ctx.rng);
        }
        if cfg.print_namelist && root {
            print_namelist(&names);
        }
        simulate_one_run(&topo, &names, cfg, &mut ctx, root);
        if cfg.verbose && root {
            println!("Simulation run number {} finished.", run + 1);
        }
    }

    reduce_results(comm, cfg, ctx)
}

fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// Rank 0 builds the working namelist (selection, composite partition,
/// node-order pins) and broadcasts it with the pinned-prefix length.
fn distribute_namelist(
    comm: &dyn Collective,
    topo: &Topology,
    cfg: &SimConfig,
) -> Result<(Vec<String>, usize)> {
    let built = if comm.rank() == 0 {
        // namelist construction has its own stream so that run shuffles are
        // unaffected by how many draws selection took
        let mut rng = StdRng::seed_from_u64(cfg.seed ^ 0xA076_1D64_78BD_642F);
        let mut names = namelist::generate(topo, cfg.subset, cfg.commsize, None, &mut rng)?;
        if cfg.is_composite() {
            names = namelist::partition(topo, &names, cfg.part_subset, cfg.part_commsize, &mut rng)?;
        }
        let pinned = namelist::apply_node_ordering(topo, &mut names, &cfg.node_ordering)?;
        let part_fixed = if cfg.is_composite() { cfg.part_commsize } else { 0 };
        Some((names, pinned.max(part_fixed)))
    } else {
        None
    };

    let names = match comm.broadcast(built.as_ref().map(|(n, _)| Payload::Names(n.clone()))) {
        Payload::Names(n) => n,
        other => unreachable!("namelist broadcast carried {:?}", other),
    };
    let fixed =
        match comm.broadcast(built.map(|(_, f)| Payload::Counts(vec![f as u64]))) {
            Payload::Counts(v) => v[0] as usize,
            other => unreachable!("prefix broadcast carried {:?}", other),
        };
    Ok((names, fixed))
}

/// One run: iterate the pattern levels and feed the configured metric.
fn simulate_one_run(
    topo: &Topology,
    names: &[String],
    cfg: &SimConfig,
    ctx: &mut SimContext,
    root: bool,
) {
    let mut generator = Generator::new(&cfg.pattern, cfg.commsize, cfg.part_commsize);

    if cfg.metric == Metric::DepMaxDelay {
        let echo = cfg.print_ptrn && root;
        let max = delay::max_delay(
            topo,
            names,
            &mut generator,
            cfg.valid_until(),
            &mut ctx.rng,
            &mut ctx.route_log,
            |_, pattern| {
                if echo {
                    print_pattern(pattern, names);
                }
            },
        );
        ctx.results.push(max as f64);
        return;
    }

    let mut run_sum: u64 = 0;
    let mut run_bucket = Bucket::new();
    let mut level = cfg.ptrn_level.unwrap_or(0);
    loop {
        let pattern = generator.level(level, &mut ctx.rng);
        if cfg.print_ptrn && root {
            print_pattern(&pattern, names);
        }
        if pattern.is_empty() {
            break;
        }

        let mut congestion = CongestionMap::new();
        let mut routes = Vec::with_capacity(pattern.len());
        for &(src, dst) in &pattern {
            let outcome = topo.route(&names[src], &names[dst]);
            if !outcome.is_complete() {
                ctx.route_log.record(&names[src], &names[dst], outcome.status);
            }
            congestion.add_route(&outcome.edges);
            routes.push(outcome.edges);
        }

        match cfg.metric {
            Metric::SumMaxCong => {
                let level_sum: u64 = routes.iter().map(|r| congestion.max_on_route(r)).sum();
                run_sum = match cfg.sum_mode {
                    SumMode::Accumulate => run_sum + level_sum,
                    SumMode::Reset => run_sum.max(level_sum),
                };
            }
            Metric::HistMaxCong => {
                for route in &routes {
                    ctx.bigbucket.record(congestion.max_on_route(route));
                }
            }
            Metric::HistAccBand => {
                for route in &routes {
                    run_bucket.record(congestion.max_on_route(route));
                }
            }
            Metric::GetCableCong => {
                ctx.global_congestion.merge(&congestion);
            }
            Metric::DepMaxDelay => unreachable!("handled above"),
        }

        if cfg.ptrn_level.is_some() {
            break;
        }
        level += 1;
    }

    match cfg.metric {
        Metric::SumMaxCong => ctx.results.push(run_sum as f64),
        Metric::HistAccBand => ctx.results.push(run_bucket.accumulated_bandwidth()),
        _ => {}
    }
}

/// The post-run reduction phase. Scalar metrics gather at root; the
/// big-bucket and the global congestion map reduce element-wise.
fn reduce_results(
    comm: &dyn Collective,
    cfg: &SimConfig,
    ctx: SimContext,
) -> Result<Option<GlobalResults>> {
    let mut global = GlobalResults::default();
    match cfg.metric {
        m if m.is_scalar() => {
            if let Some(all) = comm.gather_scalars(&ctx.results) {
                global.results = all;
            }
        }
        Metric::HistMaxCong => {
            let len = comm.allreduce_max(ctx.bigbucket.len() as u64) as usize;
            let mut padded = ctx.bigbucket.counts().to_vec();
            padded.resize(len, 0);
            global.bigbucket.add(&comm.allreduce_sum(&padded));
        }
        Metric::GetCableCong => {
            global.global_congestion = allreduce_map(comm, &ctx.global_congestion);
        }
        _ => unreachable!(),
    }
    if ctx.route_log.loops() + ctx.route_log.missing() > 0 {
        log::warn!(
            "rank {}: {} routing loops, {} missing routes (see side log)",
            comm.rank(),
            ctx.route_log.loops(),
            ctx.route_log.missing()
        );
    }
    Ok(if comm.rank() == 0 { Some(global) } else { None })
}

fn print_namelist(names: &[String]) {
    println!("\nUsed subset of nodes:\n=================");
    for name in names {
        println!("{}", name);
    }
    println!("=================\n");
}

fn print_pattern(pattern: &Pattern, names: &[String]) {
    if pattern.is_empty() {
        println!("Pattern empty!");
        return;
    }
    println!("\nUsed Pattern:\n=================");
    for &(src, dst) in pattern {
        println!(
            "{:5} -> {:<5}   |   {} -> {}",
            src, dst, names[src], names[dst]
        );
    }
    println!("=================");
}

/// Count the levels the configured pattern produces (the `getnumlevels`
/// mode). Randomized families draw from a scratch stream.
pub fn count_levels(cfg: &SimConfig) -> usize {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    Generator::new(&cfg.pattern, cfg.commsize, cfg.part_commsize).count_levels(&mut rng)
}

/// Route every host pair once to exercise the oracle (`checkinputfile`).
/// Returns the number of pairs routed and the number of soft errors.
pub fn check_input(topo: &Topology) -> (usize, usize) {
    let hosts: Vec<&str> = topo.hosts().collect();
    let total = hosts.len() * hosts.len();
    let mut soft_errors = 0;
    let mut done = 0;
    for src in &hosts {
        for dst in &hosts {
            let outcome = topo.route(src, dst);
            if !outcome.is_complete() {
                soft_errors += 1;
            }
            done += 1;
            if done % 1000 == 0 {
                println!("Testing pair number {} of {}", done, total);
            }
        }
    }
    (done, soft_errors)
}

/// The outcome of the route-quality assessment, finalized on rank 0.
#[derive(Debug)]
pub struct RouteQualityReport {
    pub gmin: u64,
    pub gmax: u64,
    pub mean: f64,
    pub sigma: f64,
    pub bins: Bucket,
}

/// Assess the static routing table: build the all-pairs congestion map with
/// the sources slab-partitioned over the workers, reduce it globally, then
/// sample pair routes and record the maximum congestion over their interior
/// cables. Exhaustive when the pair cross-product fits in `maxiters`,
/// random draws otherwise.
pub fn route_quality(
    comm: &dyn Collective,
    graph_text: Option<String>,
    subset: SubsetMethod,
    maxiters: u64,
    seed: u64,
) -> Result<Option<RouteQualityReport>> {
    let bytes = match comm.broadcast(graph_text.map(|t| Payload::Bytes(t.into_bytes()))) {
        Payload::Bytes(b) => b,
        other => unreachable!("topology broadcast carried {:?}", other),
    };
    let text = String::from_utf8(bytes).map_err(|_| Error::Topology("input is not UTF-8".into()))?;
    let topo = Topology::parse(&text)?;

    // route quality always works over every host
    let built = if comm.rank() == 0 {
        let mut rng = StdRng::seed_from_u64(seed ^ 0xA076_1D64_78BD_642F);
        let count = topo.hosts().count();
        Some(namelist::generate(&topo, subset, count, None, &mut rng)?)
    } else {
        None
    };
    let names = match comm.broadcast(built.map(Payload::Names)) {
        Payload::Names(n) => n,
        other => unreachable!("namelist broadcast carried {:?}", other),
    };

    let n = names.len();
    let world = comm.world_size();
    let rank = comm.rank();
    let slab = n / world;
    let my_start = slab * rank;
    let my_len = if rank == world - 1 { n - my_start } else { slab };

    let mut route_log = RouteLog::sink();
    let mut congestion = CongestionMap::new();
    for i in my_start..my_start + my_len {
        for j in 0..n {
            let outcome = topo.route(&names[i], &names[j]);
            if !outcome.is_complete() {
                route_log.record(&names[i], &names[j], outcome.status);
            }
            congestion.add_route(&outcome.edges);
        }
    }
    let congestion = allreduce_map(comm, &congestion);

    // sampling pass: interior congestion of up to maxiters/world pair routes
    let nconn = (n * n) as u64;
    let my_iters = maxiters / world as u64;
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(rank as u64 * 0x9E3779B97F4A7C15));
    let mut bins = Bucket::new();
    let mut iter = 0u64;
    'sampling: for i in my_start..my_start + my_len {
        for j in 0..n {
            if iter >= my_iters {
                break 'sampling;
            }
            iter += 1;
            let (src, dst) = if nconn < maxiters {
                (i, j)
            } else {
                (rng.gen_range(0..n), rng.gen_range(0..n))
            };
            let outcome = topo.route(&names[src], &names[dst]);
            bins.record(congestion.max_on_interior(&outcome.edges));
        }
    }

    // element-wise reduction of the bins
    let len = comm.allreduce_max(bins.len() as u64) as usize;
    let mut padded = bins.counts().to_vec();
    padded.resize(len, 0);
    let reduced = comm.allreduce_sum(&padded);

    if comm.rank() != 0 {
        return Ok(None);
    }

    let mut bins = Bucket::new();
    bins.add(&reduced);
    // weight 0 pairs carry no information about cable quality
    let mut gmin = u64::MAX;
    let mut gmax = 0;
    let mut total = 0.0;
    for (weight, &count) in bins.counts().iter().enumerate().skip(1) {
        if count > 0 {
            gmin = gmin.min(weight as u64);
            gmax = gmax.max(weight as u64);
            total += count as f64;
        }
    }
    let mut mean = 0.0;
    let mut second_moment = 0.0;
    if total > 0.0 {
        for (weight, &count) in bins.counts().iter().enumerate().skip(1) {
            let p = count as f64 / total;
            mean += weight as f64 * p;
            second_moment += (weight * weight) as f64 * p;
        }
    }
    let sigma = (second_moment - mean * mean).max(0.0).sqrt();
    Ok(Some(RouteQualityReport {
        gmin: if gmin == u64::MAX { 0 } else { gmin },
        gmax,
        mean,
        sigma,
        bins,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{SingleProcess, WorkerGroup};
    use crate::topology::tests::CHAIN4;
    use std::thread;

    fn config(metric: Metric, pattern: &str, arg: Option<&str>) -> SimConfig {
        SimConfig {
            commsize: 4,
            part_commsize: 2,
            pattern: PatternSpec::parse(pattern, arg).unwrap(),
            subset: SubsetMethod::LinearBfs,
            part_subset: SubsetMethod::LinearBfs,
            metric,
            num_runs: 4,
            ptrn_level: None,
            sum_mode: SumMode::Accumulate,
            do_not_shuffle: true,
            print_namelist: false,
            print_ptrn: false,
            verbose: false,
            seed: 11,
            node_ordering: Vec::new(),
            route_log_dir: None,
        }
    }

    #[test]
    fn commsize_defaulting_and_bounds() {
        assert_eq!(resolve_commsize(0, 9).unwrap(), 8);
        assert_eq!(resolve_commsize(0, 8).unwrap(), 8);
        assert_eq!(resolve_commsize(5, 8).unwrap(), 5);
        assert!(resolve_commsize(3, 8).is_err());
        assert!(resolve_commsize(9, 8).is_err());
        assert!(resolve_commsize(0, 3).is_err());
        assert!(resolve_part_commsize(1, 8).is_err());
        assert!(resolve_part_commsize(8, 8).is_err());
        assert_eq!(resolve_part_commsize(4, 8).unwrap(), 4);
    }

    #[test]
    fn bisect_on_the_chain_gives_unit_runs() {
        // without shuffling, bisect pairs (H1 -> H2) and (H3 -> H4) share
        // no cable, so every run's summed maximum congestion is 1 + 1
        let cfg = config(Metric::SumMaxCong, "bisect", None);
        let global = run_worker(&SingleProcess, Some(CHAIN4.to_string()), &cfg)
            .unwrap()
            .unwrap();
        assert_eq!(global.results, vec![2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn congestion_sum_identity() {
        // gather routes everything into H1: the map total must equal the
        // summed route lengths
        let topo = Topology::parse(CHAIN4).unwrap();
        let names: Vec<String> = topo.hosts().map(str::to_string).collect();
        let mut congestion = CongestionMap::new();
        let mut total_len = 0;
        for src in 1..names.len() {
            let outcome = topo.route(&names[src], &names[0]);
            assert!(outcome.is_complete());
            total_len += outcome.edges.len() as u64;
            congestion.add_route(&outcome.edges);
        }
        assert_eq!(congestion.total(), total_len);
    }

    #[test]
    fn hist_metric_fills_the_bigbucket() {
        let cfg = config(Metric::HistMaxCong, "gather", None);
        let global = run_worker(&SingleProcess, Some(CHAIN4.to_string()), &cfg)
            .unwrap()
            .unwrap();
        // 3 pairs per run, 4 runs
        let total: u64 = global.bigbucket.counts().iter().sum();
        assert_eq!(total, 12);
        assert!(global.results.is_empty());
    }

    #[test]
    fn acc_band_scalar_is_in_unit_range() {
        let mut cfg = config(Metric::HistAccBand, "rand", None);
        cfg.do_not_shuffle = false;
        let global = run_worker(&SingleProcess, Some(CHAIN4.to_string()), &cfg)
            .unwrap()
            .unwrap();
        assert_eq!(global.results.len(), 4);
        for value in global.results {
            assert!(value > 0.0 && value <= 1.0, "{} out of range", value);
        }
    }

    #[test]
    fn cable_cong_accumulates_over_runs() {
        let cfg = config(Metric::GetCableCong, "gather", None);
        let global = run_worker(&SingleProcess, Some(CHAIN4.to_string()), &cfg)
            .unwrap()
            .unwrap();
        // every gather run loads H2/H3/H4 -> H1; 4 runs multiply the counts
        assert!(!global.global_congestion.is_empty());
        assert_eq!(global.global_congestion.total() % 4, 0);
    }

    #[test]
    fn dep_max_delay_runs() {
        let cfg = config(Metric::DepMaxDelay, "bisect", None);
        let global = run_worker(&SingleProcess, Some(CHAIN4.to_string()), &cfg)
            .unwrap()
            .unwrap();
        assert_eq!(global.results, vec![1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn parallel_reduction_matches_sequential() {
        let _ = env_logger::builder().is_test(true).try_init();
        // the same 4 runs split over 2 workers gather the same multiset of
        // scalars and the same bigbucket as a single worker run
        let mut cfg = config(Metric::HistMaxCong, "gather", None);
        cfg.num_runs = 4;

        let single = run_worker(&SingleProcess, Some(CHAIN4.to_string()), &cfg)
            .unwrap()
            .unwrap();

        let members = WorkerGroup::create(2);
        let parallel = thread::scope(|scope| {
            let handles: Vec<_> = members
                .iter()
                .map(|comm| {
                    let cfg = cfg.clone();
                    scope.spawn(move || {
                        let text = (comm.rank() == 0).then(|| CHAIN4.to_string());
                        run_worker(comm, text, &cfg).unwrap()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });
        let root = parallel[0].as_ref().unwrap();
        assert!(parallel[1].is_none());
        assert_eq!(root.bigbucket, single.bigbucket);
    }

    #[test]
    fn level_override_simulates_a_single_level() {
        // tree level 1 on four ranks is exactly (0, 2), (1, 3)
        let mut cfg = config(Metric::SumMaxCong, "tree", None);
        cfg.ptrn_level = Some(1);
        cfg.num_runs = 1;
        let global = run_worker(&SingleProcess, Some(CHAIN4.to_string()), &cfg)
            .unwrap()
            .unwrap();
        // H1 -> H3 and H2 -> H4 share the S1 -> S2 cable: 2 + 2
        assert_eq!(global.results, vec![4.0]);
    }

    #[test]
    fn sum_modes_differ_on_multi_level_patterns() {
        let mut acc = config(Metric::SumMaxCong, "tree", None);
        acc.num_runs = 1;
        let accumulated = run_worker(&SingleProcess, Some(CHAIN4.to_string()), &acc)
            .unwrap()
            .unwrap();

        let mut reset = acc.clone();
        reset.sum_mode = SumMode::Reset;
        let peak = run_worker(&SingleProcess, Some(CHAIN4.to_string()), &reset)
            .unwrap()
            .unwrap();

        assert!(accumulated.results[0] > peak.results[0]);
    }

    #[test]
    fn node_ordering_pins_survive_shuffling() {
        let mut cfg = config(Metric::SumMaxCong, "bisect", None);
        cfg.do_not_shuffle = false;
        cfg.node_ordering = vec![0x3, 0x1];
        cfg.print_namelist = false;
        // runs only need to complete; the pinning itself is covered by the
        // namelist tests, here we exercise the full path end to end
        let global = run_worker(&SingleProcess, Some(CHAIN4.to_string()), &cfg)
            .unwrap()
            .unwrap();
        assert_eq!(global.results.len(), 4);
    }

    #[test]
    fn count_levels_matches_pattern_shape() {
        let mut cfg = config(Metric::SumMaxCong, "ring", None);
        cfg.commsize = 5;
        assert_eq!(count_levels(&cfg), 5);
    }

    #[test]
    fn check_input_walks_all_pairs() {
        let topo = Topology::parse(CHAIN4).unwrap();
        let (pairs, soft_errors) = check_input(&topo);
        assert_eq!(pairs, 16);
        assert_eq!(soft_errors, 0);
    }

    #[test]
    fn route_quality_single_process() {
        let report = route_quality(
            &SingleProcess,
            Some(CHAIN4.to_string()),
            SubsetMethod::LinearBfs,
            1 << 20,
            3,
        )
        .unwrap()
        .unwrap();
        // exhaustive: 16 pairs; only H1/H2 <-> H3/H4 routes have interior
        // cables, all of which carry the 8 crossing routes' congestion
        assert!(report.gmax >= report.gmin);
        assert!(report.mean > 0.0);
        assert!(report.sigma >= 0.0);
    }

    #[test]
    fn route_quality_parallel_agrees_with_serial() {
        let _ = env_logger::builder().is_test(true).try_init();
        let serial = route_quality(
            &SingleProcess,
            Some(CHAIN4.to_string()),
            SubsetMethod::LinearBfs,
            1 << 20,
            3,
        )
        .unwrap()
        .unwrap();

        let members = WorkerGroup::create(2);
        let reports = thread::scope(|scope| {
            let handles: Vec<_> = members
                .iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let text = (comm.rank() == 0).then(|| CHAIN4.to_string());
                        route_quality(comm, text, SubsetMethod::LinearBfs, 1 << 20, 3).unwrap()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });
        let parallel = reports[0].as_ref().unwrap();
        // the exhaustive sweep visits the same pairs in both splits
        assert_eq!(parallel.bins, serial.bins);
        assert_eq!(parallel.mean, serial.mean);
    }
}
