//! Erasure-code mode tactics
//!
//! A code mode names an `(N, M)` erasure-coding pair. The table mirrors the
//! cluster manager's; the routing core only consumes `N` to size pool
//! thresholds.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an erasure-coding tactic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeMode {
    #[serde(rename = "EC15P12")]
    Ec15P12,
    #[serde(rename = "EC6P6")]
    Ec6P6,
    #[serde(rename = "EC16P20")]
    Ec16P20,
    #[serde(rename = "EC6P10")]
    Ec6P10,
}

/// N data shards, M parity shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tactic {
    pub n: usize,
    pub m: usize,
}

impl CodeMode {
    pub fn tactic(&self) -> Tactic {
        match self {
            CodeMode::Ec15P12 => Tactic { n: 15, m: 12 },
            CodeMode::Ec6P6 => Tactic { n: 6, m: 6 },
            CodeMode::Ec16P20 => Tactic { n: 16, m: 20 },
            CodeMode::Ec6P10 => Tactic { n: 6, m: 10 },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CodeMode::Ec15P12 => "EC15P12",
            CodeMode::Ec6P6 => "EC6P6",
            CodeMode::Ec16P20 => "EC16P20",
            CodeMode::Ec6P10 => "EC6P10",
        }
    }
}

impl fmt::Display for CodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of the cluster manager's `code_mode` config key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeModePolicy {
    pub code_mode: CodeMode,
    pub enable: bool,
}
