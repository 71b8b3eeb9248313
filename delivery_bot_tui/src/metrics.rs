//! Appends per-run measurements to a CSV file.
//!
//! Rows are `Execution,Time,Path Length,Score`. Execution numbers continue
//! from the highest one already in the file, so repeated invocations keep a
//! single growing history.

use std::{
    fmt,
    fs::{self, OpenOptions},
    io::Write,
    path::Path,
    time::Duration,
};

use anyhow::{Context, Result};
use delivery_bot_core::SimulationResult;

pub const HEADER: &str = "Execution,Time,Path Length,Score";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRecord {
    /// Time spent inside the planner over the whole run.
    pub time: Duration,
    pub path_length: usize,
    pub score: i64,
}

impl From<&SimulationResult> for RunRecord {
    fn from(result: &SimulationResult) -> Self {
        Self {
            time: result.planning_time(),
            path_length: result.total_path_length(),
            score: result.score,
        }
    }
}

/// Appends `runs` to `path`, writing the header first if the file is new.
///
/// Returns the execution number of the last row written.
pub fn append_runs(path: &Path, runs: &[RunRecord]) -> Result<u64> {
    let exists = path.is_file();
    let last = if exists { last_execution(path)? } else { 0 };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening metrics file {}", path.display()))?;

    if !exists {
        writeln!(file, "{HEADER}")?;
    }
    let mut execution = last;
    for run in runs {
        execution += 1;
        writeln!(
            file,
            "{},{:.4},{},{}",
            execution,
            run.time.as_secs_f64(),
            run.path_length,
            run.score
        )?;
    }
    Ok(execution)
}

fn last_execution(path: &Path) -> Result<u64> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading metrics file {}", path.display()))?;
    let mut last = 0;
    for (index, line) in text.lines().enumerate().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let field = line.split(',').next().unwrap_or_default();
        let execution: u64 = field
            .parse()
            .with_context(|| format!("bad execution number on line {}", index + 1))?;
        last = last.max(execution);
    }
    Ok(last)
}

/// Averages over a batch of runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub runs: usize,
    pub mean_time: f64,
    pub mean_path_length: f64,
    pub mean_score: f64,
}

impl Summary {
    pub fn from_runs(runs: &[RunRecord]) -> Option<Self> {
        if runs.is_empty() {
            return None;
        }
        let count = runs.len() as f64;
        Some(Self {
            runs: runs.len(),
            mean_time: runs.iter().map(|r| r.time.as_secs_f64()).sum::<f64>() / count,
            mean_path_length: runs.iter().map(|r| r.path_length as f64).sum::<f64>() / count,
            mean_score: runs.iter().map(|r| r.score as f64).sum::<f64>() / count,
        })
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Runs: {}", self.runs)?;
        writeln!(f, "Mean planning time: {:.4} s", self.mean_time)?;
        writeln!(f, "Mean path length: {:.1} steps", self.mean_path_length)?;
        write!(f, "Mean score: {:.1}", self.mean_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(millis: u64, path_length: usize, score: i64) -> RunRecord {
        RunRecord {
            time: Duration::from_millis(millis),
            path_length,
            score,
        }
    }

    #[test]
    fn new_file_gets_header_and_numbered_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("astar_metrics.csv");

        let last = append_runs(&path, &[record(12, 80, 120), record(3, 64, 150)]).expect("append");
        assert_eq!(last, 2);

        let text = fs::read_to_string(&path).expect("read");
        assert_eq!(
            text,
            "Execution,Time,Path Length,Score\n1,0.0120,80,120\n2,0.0030,64,150\n"
        );
    }

    #[test]
    fn appending_continues_numbering() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metrics.csv");
        fs::write(&path, "Execution,Time,Path Length,Score\n7,0.1000,10,5\n\n").expect("seed");

        let last = append_runs(&path, &[record(0, 1, -3)]).expect("append");
        assert_eq!(last, 8);
        let text = fs::read_to_string(&path).expect("read");
        assert!(text.ends_with("8,0.0000,1,-3\n"));
        assert_eq!(text.matches(HEADER).count(), 1);
    }

    #[test]
    fn corrupt_history_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metrics.csv");
        fs::write(&path, "Execution,Time,Path Length,Score\nabc,1,2,3\n").expect("seed");
        let error = append_runs(&path, &[record(1, 1, 1)]).expect_err("should fail");
        assert!(error.to_string().contains("line 2"));
    }

    #[test]
    fn summary_averages() {
        assert_eq!(Summary::from_runs(&[]), None);
        let summary =
            Summary::from_runs(&[record(100, 10, 40), record(300, 30, -20)]).expect("summary");
        assert_eq!(summary.runs, 2);
        assert!((summary.mean_time - 0.2).abs() < 1e-9);
        assert!((summary.mean_path_length - 20.0).abs() < 1e-9);
        assert!((summary.mean_score - 10.0).abs() < 1e-9);
    }
}
