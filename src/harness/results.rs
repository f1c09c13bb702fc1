//! Trial records and result sinks.
//!
//! One record per trial. Timing fields carry either the measured value or
//! a sentinel naming the classification; the CSV layout follows the
//! detailed timing schema (index, tile size, loop order, user/system/real
//! time, execution cycles).

use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Classification of one trial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TrialStatus {
    /// Compiled, ran to completion within budget, exit 0.
    Success,
    /// The compiler exited non-zero.
    CompileError,
    /// The child crashed or could not be observed.
    RuntimeError,
    /// Measured wall time exceeded the baseline budget. A policy
    /// classification, not a failure.
    BudgetExceeded,
}

impl TrialStatus {
    /// Sentinel tag written into timing fields for this classification.
    pub fn sentinel(&self) -> &'static str {
        match self {
            TrialStatus::Success => "",
            TrialStatus::CompileError => "CompileError",
            TrialStatus::RuntimeError => "RuntimeError",
            TrialStatus::BudgetExceeded => "BudgetExceeded",
        }
    }
}

impl fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrialStatus::Success => write!(f, "Success"),
            other => write!(f, "{}", other.sentinel()),
        }
    }
}

/// Result record for a single trial.
#[derive(Clone, Debug, Serialize)]
pub struct TrialRecord {
    /// 1-based trial index
    pub index: usize,
    /// Tile size of the trial's plan
    pub tile_size: usize,
    /// Compact loop-order encoding (e.g. `i_tj_tk_tijk`)
    pub loop_order: String,
    /// Classification
    pub status: TrialStatus,
    /// Whether the tiling transform actually rewrote a nest. False flags
    /// a no-op trial rather than letting it pose as a tiled result.
    pub transform_applied: bool,
    /// Whether any dimension bound came from convention-based macro
    /// inference rather than an explicit mapping or the parsed header.
    /// Persisted so inferred trials stay distinguishable in the results.
    pub inferred_bounds: bool,
    /// User CPU seconds, when measured
    pub user_time: Option<f64>,
    /// System CPU seconds, when measured
    pub sys_time: Option<f64>,
    /// Wall-clock seconds, when measured
    pub wall_time: Option<f64>,
    /// Parsed cycle count, when instrumented and parseable
    pub cycles: Option<u64>,
}

impl TrialRecord {
    fn timing_field(&self, value: Option<f64>) -> String {
        match value {
            Some(v) => format!("{:.6}", v),
            None => self.status.sentinel().to_string(),
        }
    }

    fn cycle_field(&self) -> String {
        match (self.cycles, self.status) {
            (Some(c), _) => c.to_string(),
            (None, TrialStatus::Success) => String::new(),
            (None, status) => status.sentinel().to_string(),
        }
    }

    /// Render as one CSV row matching [`CSV_HEADER`].
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{}\n",
            self.index,
            self.tile_size,
            self.loop_order,
            self.timing_field(self.user_time),
            self.timing_field(self.sys_time),
            self.timing_field(self.wall_time),
            self.cycle_field(),
            if self.inferred_bounds { "yes" } else { "" },
        )
    }
}

/// Header row of the CSV result file.
pub const CSV_HEADER: &str =
    "Index,Tile Size,Loop Order,User Time (s),System Time (s),Real Time (s),Execution Cycles,Inferred Bounds\n";

/// Append-only destination for trial records. Single-writer: the
/// sequential harness owns the sink and appends in trial order.
pub trait ResultSink {
    /// Persist one record.
    fn append(&mut self, record: &TrialRecord) -> std::io::Result<()>;
}

/// CSV file sink.
pub struct CsvSink {
    writer: BufWriter<File>,
}

impl CsvSink {
    /// Create (truncating) the CSV file and write the header row.
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(CSV_HEADER.as_bytes())?;
        Ok(Self { writer })
    }
}

impl ResultSink for CsvSink {
    fn append(&mut self, record: &TrialRecord) -> std::io::Result<()> {
        self.writer.write_all(record.to_csv_row().as_bytes())?;
        self.writer.flush()
    }
}

/// In-memory sink for tests and post-run summaries.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<TrialRecord>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All appended records, in order.
    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }
}

impl ResultSink for MemorySink {
    fn append(&mut self, record: &TrialRecord) -> std::io::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_record() -> TrialRecord {
        TrialRecord {
            index: 3,
            tile_size: 64,
            loop_order: "i_tj_tk_tijk".to_string(),
            status: TrialStatus::Success,
            transform_applied: true,
            inferred_bounds: false,
            user_time: Some(0.41),
            sys_time: Some(0.02),
            wall_time: Some(0.451234),
            cycles: Some(987654321),
        }
    }

    #[test]
    fn test_success_row() {
        let row = success_record().to_csv_row();
        assert_eq!(row, "3,64,i_tj_tk_tijk,0.410000,0.020000,0.451234,987654321,\n");
    }

    #[test]
    fn test_inferred_bounds_marked_in_row() {
        let mut record = success_record();
        record.inferred_bounds = true;
        let row = record.to_csv_row();
        assert_eq!(row, "3,64,i_tj_tk_tijk,0.410000,0.020000,0.451234,987654321,yes\n");
    }

    #[test]
    fn test_compile_error_row_all_sentinels() {
        let record = TrialRecord {
            index: 7,
            tile_size: 128,
            loop_order: "j_ti_tk_tjik".to_string(),
            status: TrialStatus::CompileError,
            transform_applied: true,
            inferred_bounds: false,
            user_time: None,
            sys_time: None,
            wall_time: None,
            cycles: None,
        };
        let row = record.to_csv_row();
        assert_eq!(
            row,
            "7,128,j_ti_tk_tjik,CompileError,CompileError,CompileError,CompileError,\n"
        );
    }

    #[test]
    fn test_budget_exceeded_keeps_wall_time() {
        let record = TrialRecord {
            index: 1,
            tile_size: 8,
            loop_order: "i_tij_tjk_tk".to_string(),
            status: TrialStatus::BudgetExceeded,
            transform_applied: true,
            inferred_bounds: false,
            user_time: None,
            sys_time: None,
            wall_time: Some(0.8),
            cycles: None,
        };
        let row = record.to_csv_row();
        assert_eq!(
            row,
            "1,8,i_tij_tjk_tk,BudgetExceeded,BudgetExceeded,0.800000,BudgetExceeded,\n"
        );
    }

    #[test]
    fn test_memory_sink_appends_in_order() {
        let mut sink = MemorySink::new();
        for idx in 1..=3 {
            let mut r = success_record();
            r.index = idx;
            sink.append(&r).unwrap();
        }
        let indices: Vec<usize> = sink.records().iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }
}
