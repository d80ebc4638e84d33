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

//! Aggregated simulation results and their textual reports.

use std::collections::BTreeMap;
use std::io::{self, Write};

use crate::metric::{Bucket, CongestionMap};
use crate::topology::Topology;

/// Everything the root rank holds after the reduction phase.
#[derive(Debug, Default)]
pub struct GlobalResults {
    /// Per-run scalars, rank-major, run-within-rank-minor.
    pub results: Vec<f64>,
    /// The reduced big-bucket of the histogram metrics.
    pub bigbucket: Bucket,
    /// The reduced global cable-congestion map.
    pub global_congestion: CongestionMap,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance around `mean`.
pub fn variance(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Min/max/mean/variance block plus the raw value counts, as produced for
/// the scalar-per-run metrics. `quantity` names what the scalar measures.
pub fn write_scalar_report<W: Write>(
    w: &mut W,
    quantity: &str,
    results: &[f64],
) -> io::Result<()> {
    let min = results.iter().copied().fold(f64::INFINITY, f64::min);
    let max = results.iter().copied().fold(0.0, f64::max);
    let avg = mean(results);

    writeln!(w, "Statistical Results")?;
    writeln!(w, "===================\n")?;
    writeln!(w, "Minimal {}: {:.6}", quantity, if results.is_empty() { 0.0 } else { min })?;
    writeln!(w, "Maximal {}: {:.6}", quantity, max)?;
    writeln!(w, "Average {}: {:.6}", quantity, avg)?;
    writeln!(w, "{} Variance: {:.6}", quantity, variance(results, avg))?;
    writeln!(w, "===================\n")?;

    // raw data: how often every distinct run value occurred. All scalars
    // are non-negative, so ordering by bit pattern orders by value.
    let mut counts: BTreeMap<u64, u64> = BTreeMap::new();
    for value in results {
        *counts.entry(value.to_bits()).or_insert(0) += 1;
    }
    for (bits, count) in counts {
        writeln!(
            w,
            "{} of {:.0} occurred {} times.",
            quantity,
            f64::from_bits(bits),
            count
        )?;
    }
    Ok(())
}

/// The 20-bin histogram over `[0, 1.01)` used for the accumulated-bandwidth
/// metric, followed by the per-bin counts.
pub fn write_histogram<W: Write>(w: &mut W, results: &[f64]) -> io::Result<()> {
    const BINS: usize = 20;
    const UPPER: f64 = 1.01;
    let width = UPPER / BINS as f64;

    let all_equal = results.windows(2).all(|p| p[0] == p[1]);
    if results.is_empty() || (results.len() > 1 && all_equal) {
        writeln!(w, "No histogram, all values are the same...")?;
        if results.is_empty() {
            return Ok(());
        }
    }

    writeln!(w, "Histogram bin width: {:.6}", width)?;
    writeln!(w, "Fraction of full bandwidth | Number of occurrences")?;
    let mut bins = [0u64; BINS];
    for &value in results {
        if (0.0..UPPER).contains(&value) {
            bins[(value / width) as usize] += 1;
        } else {
            log::warn!("bandwidth value {} outside the [0, {}) histogram", value, UPPER);
        }
    }
    for (i, count) in bins.iter().enumerate() {
        writeln!(
            w,
            "{:12.8} {:12.8} {:5}",
            i as f64 * width,
            (i + 1) as f64 * width,
            count
        )?;
    }
    writeln!(w, "{} values", results.len())
}

/// Per-weight share of connections in a bucket.
pub fn write_bucket<W: Write>(w: &mut W, bucket: &Bucket) -> io::Result<()> {
    let total: u64 = bucket.counts().iter().sum();
    for (weight, &count) in bucket.counts().iter().enumerate() {
        if count > 0 {
            writeln!(
                w,
                "weight {}: {} of the {} connections ({:.2}%)",
                weight,
                count,
                total,
                count as f64 / total as f64 * 100.0
            )?;
        }
    }
    Ok(())
}

/// The big-bucket report of `hist_max_cong`.
pub fn write_bigbucket<W: Write>(w: &mut W, bucket: &Bucket) -> io::Result<()> {
    write_bucket(w, bucket)?;
    writeln!(w, "\nBW: {:.6}", bucket.accumulated_bandwidth())
}

/// Edge-id / accumulated-congestion table of `get_cable_cong`.
pub fn write_cable_congestion<W: Write>(w: &mut W, map: &CongestionMap) -> io::Result<()> {
    writeln!(w, "\nCable Congestions:\n\n Edge-ID\tacc. cong")?;
    for (edge, count) in map.iter() {
        writeln!(w, "{}\t{}", edge, count)?;
    }
    Ok(())
}

/// Re-emit the input graph with per-cable `congestion` (normalized to the
/// maximum) and `color` (HSV triplet; hue runs red for hot cables to green
/// for idle ones) attributes.
pub fn write_congestion_graph<W: Write>(
    w: &mut W,
    topo: &Topology,
    map: &CongestionMap,
) -> io::Result<()> {
    let max = map.max_value();
    topo.write_dot(w, |cable| {
        let normalized = if max == 0 {
            0.0
        } else {
            map.get(cable.id()) as f64 / max as f64
        };
        let hue = (1.0 - normalized) * 0.4;
        vec![
            ("edge_id".to_string(), cable.id().to_string()),
            ("congestion".to_string(), format!("{:.6}", normalized)),
            ("color".to_string(), format!("{:.6} 0.9 0.9", hue)),
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::CHAIN4;

    fn render<F: FnOnce(&mut Vec<u8>)>(f: F) -> String {
        let mut out = Vec::new();
        f(&mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn mean_and_variance() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let m = mean(&values);
        assert_eq!(m, 5.0);
        assert_eq!(variance(&values, m), 4.0);
    }

    #[test]
    fn scalar_report_lists_value_counts() {
        let text = render(|w| {
            write_scalar_report(w, "Maximal Congestion", &[3.0, 3.0, 5.0]).unwrap()
        });
        assert!(text.contains("Minimal Maximal Congestion: 3.000000"));
        assert!(text.contains("Maximal Maximal Congestion: 5.000000"));
        assert!(text.contains("Maximal Congestion of 3 occurred 2 times."));
        assert!(text.contains("Maximal Congestion of 5 occurred 1 times."));
    }

    #[test]
    fn histogram_bins_and_notices() {
        let text = render(|w| write_histogram(w, &[0.04, 0.06, 0.5, 0.99]).unwrap());
        assert!(text.contains("Histogram bin width"));
        // 0.04 lands in bin 0, 0.06 in bin 1
        assert!(text.lines().any(|l| l.starts_with("  0.00000000") && l.ends_with("    1")));

        let notice = render(|w| write_histogram(w, &[]).unwrap());
        assert!(notice.contains("No histogram"));

        let equal = render(|w| write_histogram(w, &[0.5, 0.5]).unwrap());
        assert!(equal.contains("No histogram"));
    }

    #[test]
    fn bucket_report_shows_shares() {
        let mut bucket = Bucket::new();
        bucket.record(1);
        bucket.record(2);
        bucket.record(2);
        bucket.record(2);
        let text = render(|w| write_bucket(w, &bucket).unwrap());
        assert!(text.contains("weight 1: 1 of the 4 connections (25.00%)"));
        assert!(text.contains("weight 2: 3 of the 4 connections (75.00%)"));
    }

    #[test]
    fn congestion_graph_normalizes_and_colors() {
        let topo = Topology::parse(CHAIN4).unwrap();
        let mut map = CongestionMap::new();
        map.add_route(&[0, 3]);
        map.add_route(&[3]);
        let text = render(|w| write_congestion_graph(w, &topo, &map).unwrap());
        // cable 3 carries the maximum (2): normalized 1, hue 0
        assert!(text.contains("congestion=1.000000"));
        assert!(text.contains("color=\"0.000000 0.9 0.9\""));
        // untouched cables render green
        assert!(text.contains("congestion=0.000000"));
        assert!(text.contains("color=\"0.400000 0.9 0.9\""));
        // still a loadable topology
        Topology::parse(&text).unwrap();
    }

    #[test]
    fn cable_congestion_table() {
        let mut map = CongestionMap::new();
        map.add_route(&[4, 2]);
        map.add_route(&[2]);
        let text = render(|w| write_cable_congestion(w, &map).unwrap());
        assert!(text.contains("2\t2"));
        assert!(text.contains("4\t1"));
    }
}
