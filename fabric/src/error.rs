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

use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    /// Syntax error while reading a .dot topology; carries line number and detail.
    DotParse(usize, String),
    /// Structural problem with the loaded topology (bad host name, too few hosts, ...).
    Topology(String),
    /// Unknown or malformed pattern name / pattern argument.
    Pattern(String),
    /// Unknown subset selection method.
    Subset(String),
    /// Unknown metric name.
    Metric(String),
    /// Malformed node-ordering file; carries line number and the offending text.
    NodeOrdering(usize, String),
    /// A directed edge without a reverse-direction partner (dot2osm contract).
    UnpairedEdge(String, String),
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DotParse(line, msg) => write!(f, "dot parse error at line {}: {}", line, msg),
            Self::Topology(msg) => write!(f, "topology error: {}", msg),
            Self::Pattern(msg) => write!(f, "pattern error: {}", msg),
            Self::Subset(name) => write!(f, "unknown subset method '{}'", name),
            Self::Metric(name) => write!(f, "unknown metric '{}'", name),
            Self::NodeOrdering(line, text) => write!(
                f,
                "node ordering file, line {}: '{}' is not a valid hex GUID",
                line, text
            ),
            Self::UnpairedEdge(tail, head) => write!(
                f,
                "no reverse partner for the edge from {} to {}; cables are bidirectional",
                tail, head
            ),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
