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

//! Communication pattern generation.
//!
//! A pattern is a sequence of `(source_rank, destination_rank)` pairs over a
//! communicator of `comm_size` ranks. Multi-phase collectives are expressed
//! as a sequence of levels; the generator is invoked once per level and an
//! empty pattern signals that no further levels exist.
//!
//! Pattern families and their arguments are closed sum types; the CLI
//! parser selects the variant. The pattern-vs-pattern combinator composes
//! two sub-patterns over a split communicator and keeps the second
//! sub-pattern's level counter as generator state.

use std::fmt;

use itertools::Itertools;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One communication pair: source rank, destination rank.
pub type Pair = (usize, usize);

/// The pairs of a single pattern level.
pub type Pattern = Vec<Pair>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    Rand,
    Null,
    Bisect,
    BisectFbSym,
    Tree,
    Bruck,
    Gather,
    Scatter,
    Neighbor2d,
    Ring,
    Recdbl,
    Neighbor,
    Receivers,
    RecvsOneSrc,
    RecvsAllSrc,
    PtrnVsPtrn,
}

impl PatternKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Rand => "rand",
            Self::Null => "null",
            Self::Bisect => "bisect",
            Self::BisectFbSym => "bisect_fb_sym",
            Self::Tree => "tree",
            Self::Bruck => "bruck",
            Self::Gather => "gather",
            Self::Scatter => "scatter",
            Self::Neighbor2d => "neighbor2d",
            Self::Ring => "ring",
            Self::Recdbl => "recdbl",
            Self::Neighbor => "neighbor",
            Self::Receivers => "receivers",
            Self::RecvsOneSrc => "recvs_one_src",
            Self::RecvsAllSrc => "recvs_all_src",
            Self::PtrnVsPtrn => "ptrnvsptrn",
        }
    }

    fn from_name(name: &str) -> Result<Self> {
        match name {
            "rand" => Ok(Self::Rand),
            "null" => Ok(Self::Null),
            "bisect" => Ok(Self::Bisect),
            "bisect_fb_sym" => Ok(Self::BisectFbSym),
            "tree" => Ok(Self::Tree),
            "bruck" => Ok(Self::Bruck),
            "gather" => Ok(Self::Gather),
            "scatter" => Ok(Self::Scatter),
            "neighbor2d" => Ok(Self::Neighbor2d),
            "ring" => Ok(Self::Ring),
            "recdbl" => Ok(Self::Recdbl),
            "neighbor" => Ok(Self::Neighbor),
            "receivers" => Ok(Self::Receivers),
            "recvs_one_src" => Ok(Self::RecvsOneSrc),
            "recvs_all_src" => Ok(Self::RecvsAllSrc),
            "ptrnvsptrn" => Ok(Self::PtrnVsPtrn),
            other => Err(Error::Pattern(format!("'{}' is not a known pattern", other))),
        }
    }

    fn needs_arg(&self) -> bool {
        matches!(
            self,
            Self::Neighbor
                | Self::Receivers
                | Self::RecvsOneSrc
                | Self::RecvsAllSrc
                | Self::PtrnVsPtrn
        )
    }
}

/// How the receivers families pick the receiver set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiverPick {
    /// Ranks `[0, num_receivers)`.
    Linear,
    /// A uniform sample of ranks.
    Rand,
}

/// Argument of the receivers families:
/// `<num_receivers>[,<p_send>[,<p_idle>[,rand|linear]]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiversArg {
    pub num_receivers: usize,
    /// Chance that a sender targets its assigned receiver (otherwise it
    /// sends to a random non-receiver peer).
    pub p_send: f64,
    /// Chance that a sender stays idle for the round.
    pub p_idle: f64,
    pub pick: ReceiverPick,
}

impl ReceiversArg {
    fn parse(text: &str) -> Result<Self> {
        let err = || {
            Error::Pattern(format!(
                "receivers argument must be \
                 <num_receivers>[,<p_send:0..1>[,<p_idle:0..1>[,rand|linear]]], got '{}'",
                text
            ))
        };
        let mut fields = text.split(',');
        let num_receivers: usize = fields
            .next()
            .and_then(|f| f.trim().parse().ok())
            .filter(|n| *n >= 1)
            .ok_or_else(err)?;
        let mut arg = Self {
            num_receivers,
            p_send: 1.0,
            p_idle: 0.0,
            pick: ReceiverPick::Linear,
        };
        if let Some(f) = fields.next() {
            arg.p_send = f
                .trim()
                .parse()
                .ok()
                .filter(|p| (0.0..=1.0).contains(p))
                .ok_or_else(err)?;
        }
        if let Some(f) = fields.next() {
            arg.p_idle = f
                .trim()
                .parse()
                .ok()
                .filter(|p| (0.0..=1.0).contains(p))
                .ok_or_else(err)?;
        }
        if let Some(f) = fields.next() {
            arg.pick = match f.trim() {
                "rand" => ReceiverPick::Rand,
                "linear" => ReceiverPick::Linear,
                _ => return Err(err()),
            };
        }
        if fields.next().is_some() {
            return Err(err());
        }
        Ok(arg)
    }
}

/// The heterogeneous pattern argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PatternArg {
    None,
    /// Neighbor count for the `neighbor` family.
    Integer(i64),
    Receivers(ReceiversArg),
    /// The two composed sub-patterns of `ptrnvsptrn`.
    PtrnVsPtrn(Box<PatternSpec>, Box<PatternSpec>),
}

/// A fully parsed pattern selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub kind: PatternKind,
    pub arg: PatternArg,
}

impl PatternSpec {
    /// Parse a pattern name and its optional argument string.
    pub fn parse(name: &str, arg: Option<&str>) -> Result<Self> {
        let kind = PatternKind::from_name(name)?;
        if kind.needs_arg() && arg.is_none() {
            return Err(Error::Pattern(format!(
                "pattern '{}' requires a pattern argument",
                name
            )));
        }
        let arg = match kind {
            PatternKind::Neighbor => {
                let text = arg.unwrap();
                let n: i64 = text.trim().parse().map_err(|_| {
                    Error::Pattern(format!(
                        "pattern 'neighbor' requires an integer argument greater than 0, got '{}'",
                        text
                    ))
                })?;
                if n < 1 {
                    return Err(Error::Pattern(format!(
                        "pattern 'neighbor' requires an integer argument greater than 0, got {}",
                        n
                    )));
                }
                PatternArg::Integer(n)
            }
            PatternKind::Receivers | PatternKind::RecvsOneSrc | PatternKind::RecvsAllSrc => {
                PatternArg::Receivers(ReceiversArg::parse(arg.unwrap())?)
            }
            PatternKind::PtrnVsPtrn => {
                let (first, second) = split_composite(arg.unwrap())?;
                PatternArg::PtrnVsPtrn(Box::new(first), Box::new(second))
            }
            // the remaining families take no argument; one given is ignored
            _ => PatternArg::None,
        };
        Ok(Self { kind, arg })
    }
}

impl fmt::Display for PatternSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.arg {
            PatternArg::None => write!(f, "{}", self.kind.name()),
            PatternArg::Integer(n) => write!(f, "{},{}", self.kind.name(), n),
            PatternArg::Receivers(r) => write!(
                f,
                "{},{},{},{},{}",
                self.kind.name(),
                r.num_receivers,
                r.p_send,
                r.p_idle,
                match r.pick {
                    ReceiverPick::Rand => "rand",
                    ReceiverPick::Linear => "linear",
                }
            ),
            PatternArg::PtrnVsPtrn(a, b) => write!(f, "{}[{} vs {}]", self.kind.name(), a, b),
        }
    }
}

/// Split a `name1[:arg1]::name2[:arg2]` composite argument. The single-comma
/// form `name1[:arg1],name2[:arg2]` is accepted for compatibility with older
/// invocations; it cannot carry commas inside the sub-arguments.
fn split_composite(text: &str) -> Result<(PatternSpec, PatternSpec)> {
    let (left, right) = if let Some(halves) = text.split_once("::") {
        halves
    } else {
        let mut halves = text.split(',');
        match (halves.next(), halves.next(), halves.next()) {
            (Some(l), Some(r), None) => (l, r),
            _ => {
                return Err(Error::Pattern(format!(
                    "ptrnvsptrn argument must be name1[:arg1]::name2[:arg2], got '{}'",
                    text
                )))
            }
        }
    };
    let parse_half = |half: &str| -> Result<PatternSpec> {
        let (name, arg) = match half.split_once(':') {
            Some((n, a)) => (n, Some(a)),
            None => (half, None),
        };
        let spec = PatternSpec::parse(name.trim(), arg.map(str::trim))?;
        if spec.kind == PatternKind::PtrnVsPtrn {
            return Err(Error::Pattern(
                "ptrnvsptrn cannot be nested inside itself".to_string(),
            ));
        }
        Ok(spec)
    };
    Ok((parse_half(left)?, parse_half(right)?))
}

/// Per-run pattern generator.
///
/// Stateless for the simple families; for `ptrnvsptrn` it carries the second
/// sub-pattern's level counter across calls (the second sub-pattern restarts
/// from level 0 whenever it runs dry while the first still produces).
pub struct Generator<'a> {
    spec: &'a PatternSpec,
    comm_size: usize,
    part_size: usize,
    second_level: usize,
    warned_clamp: bool,
}

impl<'a> Generator<'a> {
    pub fn new(spec: &'a PatternSpec, comm_size: usize, part_size: usize) -> Self {
        Self {
            spec,
            comm_size,
            part_size,
            second_level: 0,
            warned_clamp: false,
        }
    }

    /// Produce the pattern of the given level. Empty means no such level.
    pub fn level<R: Rng>(&mut self, level: usize, rng: &mut R) -> Pattern {
        if let PatternArg::PtrnVsPtrn(first, second) = &self.spec.arg {
            let first_size = self.part_size;
            let second_size = self.comm_size - self.part_size;
            let mut p1 = simple(first, first_size, level, rng, &mut self.warned_clamp);
            let mut p2 = simple(second, second_size, self.second_level, rng, &mut self.warned_clamp);
            if p2.is_empty() && !p1.is_empty() {
                self.second_level = 0;
                p2 = simple(second, second_size, 0, rng, &mut self.warned_clamp);
            }
            self.second_level += 1;
            merge(&mut p1, p2, first_size);
            return p1;
        }
        simple(self.spec, self.comm_size, level, rng, &mut self.warned_clamp)
    }

    /// Number of levels the configuration would produce, starting at level 0.
    pub fn count_levels<R: Rng>(&mut self, rng: &mut R) -> usize {
        let mut level = 0;
        while !self.level(level, rng).is_empty() {
            level += 1;
        }
        level
    }
}

/// Append `second` to `first` with the second communicator's ranks shifted
/// past the first's.
fn merge(first: &mut Pattern, second: Pattern, first_size: usize) {
    first.extend(
        second
            .into_iter()
            .map(|(s, d)| (s + first_size, d + first_size)),
    );
}

/// Generate one level of a non-composite pattern.
fn simple<R: Rng>(
    spec: &PatternSpec,
    comm_size: usize,
    level: usize,
    rng: &mut R,
    warned_clamp: &mut bool,
) -> Pattern {
    let n = comm_size;
    match spec.kind {
        PatternKind::Null => Vec::new(),
        PatternKind::Rand if level == 0 => rand_perm(n, rng),
        PatternKind::Bisect if level == 0 => bisect(n, false),
        PatternKind::BisectFbSym if level == 0 => bisect(n, true),
        PatternKind::Tree => tree(n, level),
        PatternKind::Bruck => bruck(n, level),
        PatternKind::Gather if level == 0 => (1..n).map(|i| (i, 0)).collect(),
        PatternKind::Scatter if level == 0 => (1..n).map(|i| (0, i)).collect(),
        PatternKind::Neighbor2d if level == 0 => neighbor2d(n),
        PatternKind::Ring => ring(n, level),
        PatternKind::Recdbl => recdbl(n, level),
        PatternKind::Neighbor if level == 0 => {
            let want = match spec.arg {
                PatternArg::Integer(k) => k as usize,
                _ => unreachable!("neighbor always carries an integer argument"),
            };
            let k = clamp_warn(want, n.saturating_sub(1), "neighbors", warned_clamp);
            nneighbor(n, k)
        }
        PatternKind::Receivers | PatternKind::RecvsAllSrc | PatternKind::RecvsOneSrc
            if level == 0 =>
        {
            let arg = match &spec.arg {
                PatternArg::Receivers(r) => r,
                _ => unreachable!("receivers always carries a receivers argument"),
            };
            let one_src = spec.kind == PatternKind::RecvsOneSrc;
            let num = clamp_warn(arg.num_receivers, n / 2, "receivers", warned_clamp);
            receivers(n, arg, num, one_src, rng)
        }
        PatternKind::PtrnVsPtrn => unreachable!("composite handled by the generator"),
        // single-level families above fall through here past level 0
        _ => Vec::new(),
    }
}

fn clamp_warn(want: usize, max: usize, what: &str, warned: &mut bool) -> usize {
    if want > max {
        if !*warned {
            log::warn!("correcting {} from {} to the achievable {}", what, want, max);
            *warned = true;
        }
        max
    } else {
        want
    }
}

/// A uniform permutation with no fixed points. Every rank appears exactly
/// once as a source and once as a destination; the final pair's potential
/// self-loop is resolved by swapping destinations with a random earlier pair.
fn rand_perm<R: Rng>(n: usize, rng: &mut R) -> Pattern {
    if n < 2 {
        return Vec::new();
    }
    let mut bucket: Vec<usize> = (0..n).collect();
    let mut ptrn = Vec::with_capacity(n);
    for src in 0..n {
        loop {
            let pos = rng.gen_range(0..bucket.len());
            let dst = bucket[pos];
            if src != dst {
                ptrn.push((src, dst));
                bucket.remove(pos);
                break;
            }
            if src == n - 1 {
                // the only value left is src itself: steal an earlier pair's
                // destination and hand that pair the final rank instead
                let steal = rng.gen_range(0..ptrn.len());
                let stolen = ptrn[steal].1;
                ptrn[steal].1 = n - 1;
                ptrn.push((src, stolen));
                bucket.clear();
                break;
            }
        }
    }
    ptrn
}

fn bisect(n: usize, symmetric: bool) -> Pattern {
    let mut ptrn = Vec::new();
    let mut i = 0;
    while i + 1 < n {
        ptrn.push((i, i + 1));
        if symmetric {
            ptrn.push((i + 1, i));
        }
        i += 2;
    }
    ptrn
}

fn pow2_level(level: usize) -> Option<usize> {
    1usize.checked_shl(level as u32)
}

/// Binomial tree: level l pairs `(i, i + 2^l)` for `i` below `2^l`.
fn tree(n: usize, level: usize) -> Pattern {
    let dist = match pow2_level(level) {
        Some(d) if d < n => d,
        _ => return Vec::new(),
    };
    (0..dist).filter(|i| i + dist < n).map(|i| (i, i + dist)).collect()
}

fn bruck(n: usize, level: usize) -> Pattern {
    let dist = match pow2_level(level) {
        Some(d) if d < n => d,
        _ => return Vec::new(),
    };
    (0..n).map(|i| (i, (i + dist) % n)).collect()
}

fn ring(n: usize, level: usize) -> Pattern {
    if level >= n {
        return Vec::new();
    }
    vec![(level, (level + 1) % n)]
}

/// Recursive doubling: bi-directional exchanges at distance `2^level`
/// within the largest power-of-two prefix, then one remainder level pairing
/// the non-power-of-two tail.
fn recdbl(n: usize, level: usize) -> Pattern {
    if n < 2 {
        return Vec::new();
    }
    let pcs = 1usize << n.ilog2();
    let dist = match pow2_level(level) {
        Some(d) => d,
        None => return Vec::new(),
    };
    if dist < pcs {
        let mut ptrn = Vec::new();
        let mut i = 0;
        while i < pcs {
            for j in 0..dist {
                let k = i + j;
                if dist + k < n {
                    ptrn.push((k, k + dist));
                    ptrn.push((k + dist, k));
                }
            }
            i += dist * 2;
        }
        ptrn
    } else if level >= 1 && (1usize << (level - 1)) < pcs {
        (0..n - pcs).map(|i| (i, i + pcs)).collect()
    } else {
        Vec::new()
    }
}

/// 4-neighbor exchange on a `ceil(sqrt(n))` wide grid with wrap-around.
/// Probes step over grid slots beyond the communicator, duplicates and
/// self-loops are dropped.
fn neighbor2d(n: usize) -> Pattern {
    if n == 0 {
        return Vec::new();
    }
    let xmax = (n as f64).sqrt().ceil() as usize;
    let ymax = (n + xmax - 1) / xmax;

    let wrap = |v: i64, max: usize| -> usize {
        let max = max as i64;
        (((v % max) + max) % max) as usize
    };
    let at = |x: i64, y: i64| wrap(y, ymax) * xmax + wrap(x, xmax);

    let mut ptrn = Vec::with_capacity(n * 4);
    for node in 0..n {
        let (x, y) = ((node % xmax) as i64, (node / xmax) as i64);
        for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1)] {
            let mut step = 1;
            let peer = loop {
                let p = at(x + dx * step, y + dy * step);
                if p < n {
                    break p;
                }
                step += 1;
            };
            ptrn.push((node, peer));
        }
    }
    ptrn.into_iter()
        .sorted()
        .dedup()
        .filter(|(s, d)| s != d)
        .collect()
}

/// Greedy left-to-right construction of a `k`-regular undirected peer
/// assignment; every adjacency is emitted as a directed pair. Slots that
/// cannot be matched stay empty.
fn nneighbor(n: usize, k: usize) -> Pattern {
    let mut slots: Vec<Option<usize>> = vec![None; n * k];
    for i in 0..n {
        for nei in 0..k {
            if slots[i * k + nei].is_some() {
                continue;
            }
            'candidates: for cand in i + 1..n {
                // at most one connection per peer pair
                if (0..k).any(|l| slots[cand * k + l] == Some(i)) {
                    continue;
                }
                for l in 0..k {
                    if slots[cand * k + l].is_none() {
                        slots[i * k + nei] = Some(cand);
                        slots[cand * k + l] = Some(i);
                        break 'candidates;
                    }
                }
            }
        }
    }
    let mut ptrn = Vec::new();
    for i in 0..n {
        for nei in 0..k {
            if let Some(peer) = slots[i * k + nei] {
                ptrn.push((i, peer));
            }
        }
    }
    ptrn
}

/// The receivers families: the first `num` picked ranks receive, the rest
/// send. Senders are drawn in random order and assigned round-robin; the
/// probability gates let a sender idle or stray to a non-receiver peer.
fn receivers<R: Rng>(
    n: usize,
    arg: &ReceiversArg,
    num: usize,
    one_src: bool,
    rng: &mut R,
) -> Pattern {
    if num == 0 {
        return Vec::new();
    }
    let mut avail: Vec<usize> = (0..n).collect();
    let recvs: Vec<usize> = match arg.pick {
        ReceiverPick::Linear => avail.drain(..num).collect(),
        ReceiverPick::Rand => (0..num)
            .map(|_| avail.remove(rng.gen_range(0..avail.len())))
            .collect(),
    };

    let mut ptrn = Vec::new();
    let mut round = 0;
    while !avail.is_empty() {
        if one_src && round >= num {
            break;
        }
        let receiver = recvs[round % num];
        let src = avail.remove(rng.gen_range(0..avail.len()));
        round += 1;

        if arg.p_idle > 0.0 && rng.gen::<f64>() < arg.p_idle {
            continue;
        }
        if arg.p_send >= 1.0 || rng.gen::<f64>() < arg.p_send {
            ptrn.push((src, receiver));
        } else {
            let others: Vec<usize> = (0..n)
                .filter(|r| *r != src && !recvs.contains(r))
                .collect();
            if !others.is_empty() {
                ptrn.push((src, others[rng.gen_range(0..others.len())]));
            }
        }
    }
    ptrn
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn gen_level(spec: &PatternSpec, n: usize, part: usize, level: usize) -> Pattern {
        Generator::new(spec, n, part).level(level, &mut rng())
    }

    fn spec(name: &str, arg: Option<&str>) -> PatternSpec {
        PatternSpec::parse(name, arg).unwrap()
    }

    #[test]
    fn rand_is_a_fixed_point_free_permutation() {
        for n in [2, 3, 4, 7, 16, 33] {
            let mut r = rng();
            for _ in 0..20 {
                let p = rand_perm(n, &mut r);
                assert_eq!(p.len(), n);
                let srcs: HashSet<_> = p.iter().map(|(s, _)| *s).collect();
                let dsts: HashSet<_> = p.iter().map(|(_, d)| *d).collect();
                assert_eq!(srcs.len(), n, "every rank sends once (n={})", n);
                assert_eq!(dsts.len(), n, "every rank receives once (n={})", n);
                assert!(p.iter().all(|(s, d)| s != d), "no self-loops (n={})", n);
            }
        }
    }

    #[test]
    fn bisect_pairs_even_with_odd() {
        assert_eq!(gen_level(&spec("bisect", None), 4, 0, 0), vec![(0, 1), (2, 3)]);
        assert_eq!(gen_level(&spec("bisect", None), 5, 0, 0), vec![(0, 1), (2, 3)]);
        assert!(gen_level(&spec("bisect", None), 4, 0, 1).is_empty());
    }

    #[test]
    fn bisect_fb_sym_adds_reverse() {
        assert_eq!(
            gen_level(&spec("bisect_fb_sym", None), 4, 0, 0),
            vec![(0, 1), (1, 0), (2, 3), (3, 2)]
        );
    }

    #[test]
    fn tree_levels_cover_log2() {
        // levels 0..ceil(log2 n) are non-empty, everything after is empty
        for n in [2usize, 3, 4, 5, 8, 9, 16, 31] {
            let levels = (n as f64).log2().ceil() as usize;
            for l in 0..levels {
                assert!(!tree(n, l).is_empty(), "n={} level {}", n, l);
            }
            assert!(tree(n, levels).is_empty(), "n={}", n);
        }
        assert_eq!(tree(8, 1), vec![(0, 2), (1, 3)]);
        assert_eq!(tree(5, 2), vec![(0, 4)]);
    }

    #[test]
    fn bruck_rotates_by_powers_of_two() {
        assert_eq!(bruck(5, 0), vec![(0, 1), (1, 2), (2, 3), (3, 4), (4, 0)]);
        assert_eq!(bruck(5, 2), vec![(0, 4), (1, 0), (2, 1), (3, 2), (4, 3)]);
        assert!(bruck(5, 3).is_empty());
    }

    #[test]
    fn gather_and_scatter() {
        assert_eq!(gen_level(&spec("gather", None), 4, 0, 0), vec![(1, 0), (2, 0), (3, 0)]);
        assert_eq!(gen_level(&spec("scatter", None), 4, 0, 0), vec![(0, 1), (0, 2), (0, 3)]);
    }

    #[test]
    fn ring_is_a_hamiltonian_cycle() {
        let n = 3;
        let mut pairs = Vec::new();
        for level in 0..n {
            let p = ring(n, level);
            assert_eq!(p.len(), 1);
            pairs.extend(p);
        }
        assert_eq!(pairs, vec![(0, 1), (1, 2), (2, 0)]);
        assert!(ring(n, n).is_empty());
    }

    #[test]
    fn recdbl_power_of_two() {
        assert_eq!(recdbl(4, 0), vec![(0, 1), (1, 0), (2, 3), (3, 2)]);
        assert_eq!(recdbl(4, 1), vec![(0, 2), (2, 0), (1, 3), (3, 1)]);
        assert!(recdbl(4, 2).is_empty());
    }

    #[test]
    fn recdbl_remainder_level() {
        // pcs = 4; levels 0,1 exchange within the prefix, level 2 pairs the tail
        assert_eq!(recdbl(6, 2), vec![(0, 4), (1, 5)]);
        assert!(recdbl(6, 3).is_empty());
        // the prefix levels never touch the remainder ranks
        assert_eq!(recdbl(6, 0), vec![(0, 1), (1, 0), (2, 3), (3, 2)]);
    }

    #[test]
    fn neighbor2d_on_a_square_grid() {
        // 3x3 grid: four distinct wrapped neighbors each
        let p = neighbor2d(9);
        for node in 0..9 {
            let outs: HashSet<_> = p
                .iter()
                .filter(|(s, _)| *s == node)
                .map(|(_, d)| *d)
                .collect();
            assert_eq!(outs.len(), 4, "node {}", node);
            assert!(!outs.contains(&node));
        }
    }

    #[test]
    fn neighbor2d_dedups_wrapped_duplicates() {
        // 3x2 grid: north and south wrap to the same peer, so three
        // distinct neighbors remain after dedup
        let p = neighbor2d(6);
        let unique: HashSet<_> = p.iter().collect();
        assert_eq!(unique.len(), p.len(), "duplicates eliminated");
        assert!(p.iter().all(|(s, d)| s != d));
        for node in 0..6 {
            assert_eq!(p.iter().filter(|(s, _)| *s == node).count(), 3);
        }
    }

    #[test]
    fn nneighbor_is_symmetric_and_bounded() {
        let k = 3;
        let n = 8;
        let p = nneighbor(n, k);
        let set: HashSet<_> = p.iter().copied().collect();
        for &(s, d) in &p {
            assert!(set.contains(&(d, s)), "({}, {}) has no reverse", s, d);
        }
        for node in 0..n {
            assert!(p.iter().filter(|(s, _)| *s == node).count() <= k);
        }
    }

    #[test]
    fn neighbor_count_clamps() {
        let s = spec("neighbor", Some("9"));
        let p = gen_level(&s, 4, 0, 0);
        for node in 0..4 {
            assert!(p.iter().filter(|(src, _)| *src == node).count() <= 3);
        }
    }

    #[test]
    fn receivers_basic() {
        // 2 receivers over 6 ranks: receivers are 0 and 1, every other rank
        // sends exactly once, both receivers are hit
        let s = spec("receivers", Some("2"));
        let p = gen_level(&s, 6, 0, 0);
        assert_eq!(p.len(), 4);
        let dsts: HashSet<_> = p.iter().map(|(_, d)| *d).collect();
        assert_eq!(dsts, HashSet::from([0, 1]));
        let srcs: HashSet<_> = p.iter().map(|(s, _)| *s).collect();
        assert_eq!(srcs, HashSet::from([2, 3, 4, 5]));
    }

    #[test]
    fn receivers_clamp_to_half() {
        let s = spec("receivers", Some("5"));
        let p = gen_level(&s, 6, 0, 0);
        let dsts: HashSet<_> = p.iter().map(|(_, d)| *d).collect();
        assert_eq!(dsts.len(), 3);
    }

    #[test]
    fn recvs_one_src_stops_after_one_round() {
        let s = spec("recvs_one_src", Some("2"));
        let p = gen_level(&s, 6, 0, 0);
        assert_eq!(p.len(), 2);
        let dsts: Vec<_> = p.iter().map(|(_, d)| *d).collect();
        assert_eq!(dsts, vec![0, 1]);
    }

    #[test]
    fn receivers_idle_suppresses_all_sends() {
        let s = spec("receivers", Some("2,1.0,1.0"));
        assert!(gen_level(&s, 6, 0, 0).is_empty());
    }

    #[test]
    fn receivers_stray_sends_avoid_receivers() {
        let s = spec("receivers", Some("2,0.0,0.0"));
        let p = gen_level(&s, 8, 0, 0);
        assert_eq!(p.len(), 6);
        for &(src, dst) in &p {
            assert!(dst >= 2, "stray send hit receiver: {} -> {}", src, dst);
            assert_ne!(src, dst);
        }
    }

    #[test]
    fn ptrnvsptrn_concatenates_with_shift() {
        let s = spec("ptrnvsptrn", Some("bisect::gather"));
        let p = gen_level(&s, 8, 4, 0);
        assert_eq!(p, vec![(0, 1), (2, 3), (5, 4), (6, 4), (7, 4)]);
    }

    #[test]
    fn ptrnvsptrn_never_crosses_the_split() {
        let s = spec("ptrnvsptrn", Some("tree::ring"));
        let (n, part) = (10, 4);
        let mut g = Generator::new(&s, n, part);
        let mut r = rng();
        for level in 0..32 {
            let p = g.level(level, &mut r);
            if p.is_empty() {
                break;
            }
            for (src, dst) in p {
                let same_side = (src < part) == (dst < part);
                assert!(same_side, "({}, {}) crosses the split", src, dst);
            }
        }
    }

    #[test]
    fn ptrnvsptrn_second_pattern_wraps_around() {
        // first: ring on 4 ranks (4 levels); second: ring on 2 ranks
        // (2 levels). The second runs dry at level 2 and restarts from its
        // level 0 because the first still produces; the composite ends when
        // both are dry.
        let s = spec("ptrnvsptrn", Some("ring::ring"));
        let mut g = Generator::new(&s, 6, 4);
        let mut r = rng();
        assert_eq!(g.level(0, &mut r), vec![(0, 1), (4, 5)]);
        assert_eq!(g.level(1, &mut r), vec![(1, 2), (5, 4)]);
        assert_eq!(g.level(2, &mut r), vec![(2, 3), (4, 5)]);
        assert_eq!(g.level(3, &mut r), vec![(3, 0), (5, 4)]);
        assert!(g.level(4, &mut r).is_empty());
    }

    #[test]
    fn level_counting() {
        let mut r = rng();
        assert_eq!(
            Generator::new(&spec("ring", None), 5, 0).count_levels(&mut r),
            5
        );
        assert_eq!(
            Generator::new(&spec("tree", None), 8, 0).count_levels(&mut r),
            3
        );
        assert_eq!(
            Generator::new(&spec("bisect", None), 8, 0).count_levels(&mut r),
            1
        );
        assert_eq!(
            Generator::new(&spec("null", None), 8, 0).count_levels(&mut r),
            0
        );
    }

    #[test]
    fn parse_rejects_unknown_and_missing() {
        assert!(PatternSpec::parse("warp", None).is_err());
        assert!(PatternSpec::parse("neighbor", None).is_err());
        assert!(PatternSpec::parse("neighbor", Some("0")).is_err());
        assert!(PatternSpec::parse("receivers", Some("2,1.5")).is_err());
        assert!(PatternSpec::parse("ptrnvsptrn", Some("bisect")).is_err());
        assert!(PatternSpec::parse("ptrnvsptrn", Some("ptrnvsptrn:x::ring")).is_err());
    }

    #[test]
    fn parse_receivers_extended() {
        let s = PatternSpec::parse("recvs_all_src", Some("3,0.8,0.1,rand")).unwrap();
        match s.arg {
            PatternArg::Receivers(r) => {
                assert_eq!(r.num_receivers, 3);
                assert_eq!(r.p_send, 0.8);
                assert_eq!(r.p_idle, 0.1);
                assert_eq!(r.pick, ReceiverPick::Rand);
            }
            other => panic!("unexpected arg {:?}", other),
        }
    }

    #[test]
    fn parse_composite_with_sub_args() {
        let s = PatternSpec::parse("ptrnvsptrn", Some("recvs_all_src:2,0.5::gather")).unwrap();
        match s.arg {
            PatternArg::PtrnVsPtrn(a, b) => {
                assert_eq!(a.kind, PatternKind::RecvsAllSrc);
                assert_eq!(b.kind, PatternKind::Gather);
            }
            other => panic!("unexpected arg {:?}", other),
        }
        // legacy comma-separated form
        let s = PatternSpec::parse("ptrnvsptrn", Some("bisect,gather")).unwrap();
        assert!(matches!(s.arg, PatternArg::PtrnVsPtrn(_, _)));
    }
}
