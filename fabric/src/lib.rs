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

//! Evaluation of static routing tables in routed interconnect fabrics.
//!
//! The fabric is a directed multigraph of switches and hosts whose edges
//! carry destination filters; routes are deterministic walks along those
//! filters. The library generates communication patterns over a subset of
//! the hosts, accumulates per-cable congestion for every pattern, derives
//! per-run metrics over many randomized runs, and reduces the results over
//! a collective worker group.

pub mod comm;
pub mod delay;
pub mod dot;
mod error;
pub mod metric;
pub mod namelist;
pub mod pattern;
pub mod route;
pub mod sim;
pub mod stats;
pub mod topology;

pub use crate::comm::{Collective, Payload, SingleProcess, WorkerGroup};
pub use crate::error::{Error, Result};
pub use crate::metric::{Bucket, CongestionMap, Metric, SumMode};
pub use crate::namelist::SubsetMethod;
pub use crate::pattern::{Generator, Pattern, PatternArg, PatternSpec};
pub use crate::route::{RouteLog, RouteOutcome, RouteStatus};
pub use crate::sim::{RouteQualityReport, SimConfig};
pub use crate::stats::GlobalResults;
pub use crate::topology::{EdgeId, NodeId, Topology};
