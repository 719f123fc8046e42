//! Per-stage success/failure counts for a batch run.

use metrics::counter;
use std::collections::BTreeMap;
use std::fmt;

/// A pipeline stage, as counted in [`BatchSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Resolve,
    Convert,
    Reproject,
    Write,
    Colorize,
    Tile,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Resolve,
        Stage::Convert,
        Stage::Reproject,
        Stage::Write,
        Stage::Colorize,
        Stage::Tile,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Convert => "convert",
            Stage::Reproject => "reproject",
            Stage::Write => "write",
            Stage::Colorize => "colorize",
            Stage::Tile => "tile",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounts {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    stages: BTreeMap<Stage, StageCounts>,
}

impl BatchSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: Stage, ok: bool) {
        let counts = self.stages.entry(stage).or_default();
        counts.attempted += 1;
        if ok {
            counts.succeeded += 1;
        } else {
            counts.failed += 1;
        }
        counter!(
            "pipeline_stage_total",
            "stage" => stage.as_str(),
            "outcome" => if ok { "success" } else { "failure" }
        )
        .increment(1);
    }

    pub fn stage(&self, stage: Stage) -> StageCounts {
        self.stages.get(&stage).copied().unwrap_or_default()
    }

    pub fn total_failed(&self) -> usize {
        self.stages.values().map(|c| c.failed).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.total_failed() == 0
    }

    /// Add another summary's counts into this one.
    pub fn merge(&mut self, other: &BatchSummary) {
        for (stage, counts) in &other.stages {
            let mine = self.stages.entry(*stage).or_default();
            mine.attempted += counts.attempted;
            mine.succeeded += counts.succeeded;
            mine.failed += counts.failed;
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stages.is_empty() {
            return write!(f, "nothing attempted");
        }
        let parts: Vec<String> = self
            .stages
            .iter()
            .map(|(stage, c)| format!("{} {}/{} ok", stage, c.succeeded, c.attempted))
            .collect();
        write!(f, "{}", parts.join(", "))?;
        if !self.is_clean() {
            write!(f, " ({} failed)", self.total_failed())?;
        }
        Ok(())
    }
}
