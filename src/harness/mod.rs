//! Autotuning harness.
//!
//! Drives the per-trial state machine
//! `GENERATED → COMPILED | COMPILE_FAILED` and
//! `COMPILED → RUNNING → SUCCESS | CRASHED | BUDGET_EXCEEDED`,
//! strictly sequentially: generate, compile, run, record, one trial at a
//! time. Each trial runs in an isolated child process; the only state
//! shared across trials is the immutable search space and the append-only
//! result sink.
//!
//! The untiled baseline is compiled and run exactly once, with the same
//! fixed compiler flags as every trial, before any trial is classified -
//! its wall time is the budget every `BUDGET_EXCEEDED` decision compares
//! against. Baseline failure aborts the whole search; nothing else does.

pub mod exec;
pub mod results;

use crate::config::TunerConfig;
use crate::error::{ToolchainError, TuneError, TuneResult};
use crate::instrument;
use crate::search::{outer_spatial_space, search_space, TilingPlan};
use crate::transform::{BoundResolver, TilingTransformer};
use exec::{RunMetrics, RunOutcome, Toolchain};
use log::{debug, info, warn};
use results::{ResultSink, TrialRecord, TrialStatus};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The measured untiled reference run. Established once per search run;
/// its wall time is every trial's admission budget.
#[derive(Clone, Debug)]
pub struct Baseline {
    /// Wall time of the baseline run - the budget
    pub wall: Duration,
    /// Full baseline metrics
    pub metrics: RunMetrics,
    /// Cycle count parsed from the instrumented baseline, if any
    pub cycles: Option<u64>,
}

/// Post-run summary across all trials.
#[derive(Clone, Debug, Default)]
pub struct TuningSummary {
    /// Trials classified Success
    pub successes: usize,
    /// Trials classified CompileError
    pub compile_errors: usize,
    /// Trials classified RuntimeError
    pub runtime_errors: usize,
    /// Trials classified BudgetExceeded
    pub budget_exceeded: usize,
    /// Baseline wall seconds
    pub baseline_wall: f64,
    /// Best successful trial: (index, order encoding, tile size, wall seconds)
    pub best: Option<(usize, String, usize, f64)>,
}

impl TuningSummary {
    /// Total trials recorded.
    pub fn total(&self) -> usize {
        self.successes + self.compile_errors + self.runtime_errors + self.budget_exceeded
    }

    fn absorb(&mut self, record: &TrialRecord) {
        match record.status {
            TrialStatus::Success => {
                self.successes += 1;
                if let Some(wall) = record.wall_time {
                    let better = match &self.best {
                        Some((_, _, _, best_wall)) => wall < *best_wall,
                        None => true,
                    };
                    if better {
                        self.best = Some((
                            record.index,
                            record.loop_order.clone(),
                            record.tile_size,
                            wall,
                        ));
                    }
                }
            }
            TrialStatus::CompileError => self.compile_errors += 1,
            TrialStatus::RuntimeError => self.runtime_errors += 1,
            TrialStatus::BudgetExceeded => self.budget_exceeded += 1,
        }
    }

    /// Print a human-readable summary report.
    pub fn print(&self) {
        println!("=== Tuning Complete ===");
        println!("Trials: {}", self.total());
        println!(
            "  success: {}  compile-error: {}  runtime-error: {}  over-budget: {}",
            self.successes, self.compile_errors, self.runtime_errors, self.budget_exceeded
        );
        println!("Baseline: {:.4}s", self.baseline_wall);
        match &self.best {
            Some((index, order, tile, wall)) => {
                println!(
                    "Best: trial {} ({} @ tile {}) -> {:.4}s ({:.2}x speedup)",
                    index,
                    order,
                    tile,
                    wall,
                    self.baseline_wall / wall
                );
            }
            None => println!("No trial beat the classification gauntlet."),
        }
    }
}

/// The autotuner: search space × transformer × trial runner.
pub struct Tuner {
    config: TunerConfig,
    toolchain: Box<dyn Toolchain>,
    sink: Box<dyn ResultSink>,
}

impl Tuner {
    /// Create a tuner over the given toolchain and result sink.
    pub fn new(
        config: TunerConfig,
        toolchain: Box<dyn Toolchain>,
        sink: Box<dyn ResultSink>,
    ) -> Self {
        Self { config, toolchain, sink }
    }

    /// The full search space for this configuration.
    pub fn search_space(&self) -> Vec<TilingPlan> {
        let spatial: Vec<&str> = self.config.spatial_dims.iter().map(|s| s.as_str()).collect();
        if self.config.outer_dims.is_empty() {
            search_space(&spatial, &self.config.tile_sizes)
        } else {
            let outer: Vec<&str> = self.config.outer_dims.iter().map(|s| s.as_str()).collect();
            outer_spatial_space(&outer, &spatial, &self.config.tile_sizes)
        }
    }

    /// Run the whole search: establish the baseline, then generate,
    /// compile, run, and record every combination.
    pub fn run<P: AsRef<Path>>(&mut self, source: P) -> TuneResult<TuningSummary> {
        let lines = read_source(source.as_ref())?;
        fs::create_dir_all(&self.config.work_dir)?;

        let prepared = if self.config.instrument {
            instrument::inject_counter_support(&lines)
        } else {
            lines
        };

        let baseline = self.establish_baseline(&prepared)?;
        let budget = baseline.wall;
        info!(
            "baseline: {:.4}s wall, {:?} cycles",
            budget.as_secs_f64(),
            baseline.cycles
        );

        let space = self.search_space();
        info!("search space: {} combinations", space.len());

        let transformer = self.transformer();
        let mut summary = TuningSummary {
            baseline_wall: budget.as_secs_f64(),
            ..Default::default()
        };

        for (idx, plan) in space.iter().enumerate() {
            let index = idx + 1;
            let record = self.run_trial(index, plan, &prepared, &transformer, budget)?;
            summary.absorb(&record);
            self.sink.append(&record)?;
        }

        Ok(summary)
    }

    /// Compile and run the untiled reference exactly once. Its wall time
    /// becomes the budget; any failure here is fatal to the search.
    pub fn establish_baseline(&mut self, prepared: &[String]) -> TuneResult<Baseline> {
        let lines = if self.config.instrument {
            let (wrapped, applied) =
                instrument::wrap_nest(prepared, &self.config.region, self.config.nest_ordinal);
            if !applied {
                return Err(TuneError::BaselineFailure(
                    "no loop nest to instrument in baseline".to_string(),
                ));
            }
            wrapped
        } else {
            prepared.to_vec()
        };

        let c_file = self.config.work_dir.join("baseline.c");
        let exe_file = self.config.work_dir.join("baseline");
        write_lines(&c_file, &lines)?;

        self.toolchain
            .compile(&c_file, &exe_file)
            .map_err(|e| TuneError::BaselineFailure(format!("compile: {}", e)))?;

        // No deadline: the baseline defines the budget, nothing bounds it.
        let outcome = self
            .toolchain
            .run(&exe_file, None)
            .map_err(|e| TuneError::BaselineFailure(format!("run: {}", e)))?;

        let metrics = match outcome {
            RunOutcome::Completed(m) if m.exit_ok => m,
            RunOutcome::Completed(_) => {
                return Err(TuneError::BaselineFailure(
                    "baseline exited non-zero".to_string(),
                ))
            }
            RunOutcome::DeadlineKilled { .. } => {
                return Err(TuneError::BaselineFailure(
                    "baseline killed unexpectedly".to_string(),
                ))
            }
        };

        let cycles = instrument::parse_cycles(&metrics.stdout);
        Ok(Baseline { wall: metrics.wall, metrics, cycles })
    }

    /// One trial: synthesize the variant, compile, run, classify.
    /// Per-trial failures are recorded, never propagated - only sink or
    /// artifact I/O aborts the search.
    fn run_trial(
        &mut self,
        index: usize,
        plan: &TilingPlan,
        prepared: &[String],
        transformer: &TilingTransformer,
        budget: Duration,
    ) -> TuneResult<TrialRecord> {
        let mut record = TrialRecord {
            index,
            tile_size: plan.tile_size,
            loop_order: plan.order_string(),
            status: TrialStatus::Success,
            transform_applied: false,
            inferred_bounds: false,
            user_time: None,
            sys_time: None,
            wall_time: None,
            cycles: None,
        };

        // GENERATED
        let (tiled, report) = transformer.apply(prepared, plan)?;
        record.transform_applied = report.applied;
        record.inferred_bounds = report.inferred_bounds;
        if !report.applied {
            warn!("trial {}: nest not found, running untransformed source", index);
        }
        if report.inferred_bounds {
            warn!("trial {}: dimension bounds inferred from macro names", index);
        }

        let wrapped = if self.config.instrument {
            let (wrapped, _) =
                instrument::wrap_nest(&tiled, &self.config.region, self.config.nest_ordinal);
            wrapped
        } else {
            tiled
        };

        let c_file = self.config.work_dir.join(format!("tiled_output_{}.c", index));
        let exe_file = self.config.work_dir.join(format!("tiled_output_{}", index));
        write_lines(&c_file, &wrapped)?;

        // GENERATED -> COMPILED | COMPILE_FAILED
        match self.toolchain.compile(&c_file, &exe_file) {
            Ok(()) => {}
            Err(ToolchainError::CompileFailed(diag)) => {
                debug!("trial {} compile diagnostics:\n{}", index, diag);
                record.status = TrialStatus::CompileError;
                return Ok(record);
            }
            Err(e) => {
                warn!("trial {}: compiler could not be invoked: {}", index, e);
                record.status = TrialStatus::CompileError;
                return Ok(record);
            }
        }

        // COMPILED -> RUNNING -> SUCCESS | CRASHED | BUDGET_EXCEEDED
        let deadline = self.config.enforce_budget.then_some(budget);
        match self.toolchain.run(&exe_file, deadline) {
            Ok(RunOutcome::DeadlineKilled { wall }) => {
                record.status = TrialStatus::BudgetExceeded;
                record.wall_time = Some(wall.as_secs_f64());
            }
            Ok(RunOutcome::Completed(m)) => {
                if m.wall > budget {
                    // Absolute: over budget regardless of exit status.
                    record.status = TrialStatus::BudgetExceeded;
                    record.wall_time = Some(m.wall.as_secs_f64());
                } else if !m.exit_ok {
                    record.status = TrialStatus::RuntimeError;
                } else {
                    record.status = TrialStatus::Success;
                    record.user_time = Some(m.user);
                    record.sys_time = Some(m.system);
                    record.wall_time = Some(m.wall.as_secs_f64());
                    record.cycles = instrument::parse_cycles(&m.stdout);
                }
            }
            Err(e) => {
                warn!("trial {}: child could not be observed: {}", index, e);
                record.status = TrialStatus::RuntimeError;
            }
        }
        Ok(record)
    }

    /// Generate every variant source without compiling or running -
    /// useful for inspecting the synthesized code.
    pub fn generate_variants<P: AsRef<Path>>(&self, source: P) -> TuneResult<Vec<PathBuf>> {
        let lines = read_source(source.as_ref())?;
        fs::create_dir_all(&self.config.work_dir)?;

        let prepared = if self.config.instrument {
            instrument::inject_counter_support(&lines)
        } else {
            lines
        };

        let transformer = self.transformer();
        let mut paths = Vec::new();
        for (idx, plan) in self.search_space().iter().enumerate() {
            let (tiled, report) = transformer.apply(&prepared, plan)?;
            if !report.applied {
                warn!("variant {}: nest not found, source unchanged", idx + 1);
            }
            let wrapped = if self.config.instrument {
                instrument::wrap_nest(&tiled, &self.config.region, self.config.nest_ordinal).0
            } else {
                tiled
            };
            let path = self.config.work_dir.join(format!("tiled_output_{}.c", idx + 1));
            write_lines(&path, &wrapped)?;
            paths.push(path);
        }
        Ok(paths)
    }

    fn transformer(&self) -> TilingTransformer {
        let resolver = BoundResolver::new(self.config.dimension_bounds.clone())
            .with_macro_inference(self.config.infer_bounds);
        TilingTransformer::new(self.config.region.clone(), self.config.nest_ordinal, resolver)
    }
}

fn read_source(path: &Path) -> TuneResult<Vec<String>> {
    let text = fs::read_to_string(path).map_err(|source| TuneError::InputNotFound {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text.lines().map(|l| l.to_string()).collect())
}

fn write_lines(path: &Path, lines: &[String]) -> TuneResult<()> {
    let mut text = lines.join("\n");
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use exec::FakeToolchain;
    use results::MemorySink;
    use std::time::Duration;

    const KERNEL: &str = r#"
#include <stdio.h>
int main() {
    for (int x = 0; x < 64; x++) {
        for (int y = 0; y < 64; y++) {
            for (int z = 0; z < 64; z++) {
                work(x, y, z);
            }
        }
    }
    return 0;
}
"#;

    fn write_kernel(dir: &Path) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join("kernel.c");
        fs::write(&path, KERNEL).unwrap();
        path
    }

    fn small_config(dir: &Path) -> TunerConfig {
        TunerConfig::new()
            .tile_sizes(vec![16])
            .work_dir(dir.join("work"))
            .instrument(false)
    }

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tiletune_harness_tests").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_budget_exceeded_despite_exit_zero() {
        let dir = test_dir("budget");
        let source = write_kernel(&dir);

        let fake = FakeToolchain::new();
        fake.push_run(FakeToolchain::ok_run(0.5, "")); // baseline
        // Every trial: exit 0 but slower than the 0.5s budget.
        for _ in 0..90 {
            fake.push_run(FakeToolchain::ok_run(0.8, ""));
        }

        let mut tuner = Tuner::new(
            small_config(&dir),
            Box::new(fake),
            Box::new(MemorySink::new()),
        );
        let summary = tuner.run(&source).unwrap();

        assert_eq!(summary.total(), 90); // 90 orders x 1 tile size
        assert_eq!(summary.budget_exceeded, 90);
        assert_eq!(summary.successes, 0);
    }

    #[test]
    fn test_compile_error_recorded_and_search_continues() {
        let dir = test_dir("compile_error");
        let source = write_kernel(&dir);

        let fake = FakeToolchain::new();
        // Baseline compiles and runs fine.
        fake.push_compile(Ok(()));
        fake.push_run(FakeToolchain::ok_run(1.0, ""));
        // First trial fails to compile; the rest succeed fast.
        fake.push_compile(Err(ToolchainError::CompileFailed("bad brace".into())));

        let mut tuner = Tuner::new(
            small_config(&dir),
            Box::new(fake),
            Box::new(MemorySink::new()),
        );
        let summary = tuner.run(&source).unwrap();

        assert_eq!(summary.total(), 90);
        assert_eq!(summary.compile_errors, 1);
        assert_eq!(summary.successes, 89);
    }

    #[test]
    fn test_baseline_failure_aborts_run() {
        let dir = test_dir("baseline_fail");
        let source = write_kernel(&dir);

        let fake = FakeToolchain::new();
        fake.push_compile(Err(ToolchainError::CompileFailed("no main".into())));

        let mut tuner = Tuner::new(
            small_config(&dir),
            Box::new(fake),
            Box::new(MemorySink::new()),
        );
        match tuner.run(&source) {
            Err(TuneError::BaselineFailure(msg)) => assert!(msg.contains("compile")),
            other => panic!("expected BaselineFailure, got {:?}", other.map(|_| ())),
        }

        // Nothing was recorded: no budget, no classifications.
        let no_trials = fs::read_dir(dir.join("work"))
            .unwrap()
            .filter_map(|e| e.ok())
            .all(|e| !e.file_name().to_string_lossy().starts_with("tiled_output"));
        assert!(no_trials);
    }

    #[test]
    fn test_crashed_trial_recorded() {
        let dir = test_dir("crash");
        let source = write_kernel(&dir);

        let fake = FakeToolchain::new();
        fake.push_run(FakeToolchain::ok_run(1.0, "")); // baseline
        fake.push_run(FakeToolchain::crashed_run(0.1)); // trial 1 crashes

        let sink = MemorySink::new();
        let mut tuner = Tuner::new(small_config(&dir), Box::new(fake), Box::new(sink));
        let summary = tuner.run(&source).unwrap();
        assert_eq!(summary.runtime_errors, 1);
        assert_eq!(summary.successes, 89);
    }

    #[test]
    fn test_deadline_kill_classified_over_budget() {
        let dir = test_dir("deadline");
        let source = write_kernel(&dir);

        let fake = FakeToolchain::new();
        fake.push_run(FakeToolchain::ok_run(0.5, "")); // baseline
        fake.push_run(Ok(RunOutcome::DeadlineKilled {
            wall: Duration::from_secs_f64(0.6),
        }));

        let mut tuner = Tuner::new(
            small_config(&dir),
            Box::new(fake),
            Box::new(MemorySink::new()),
        );
        let summary = tuner.run(&source).unwrap();
        assert_eq!(summary.budget_exceeded, 1);
    }

    #[test]
    fn test_instrumented_run_parses_cycles() {
        let dir = test_dir("cycles");
        let source = write_kernel(&dir);

        let fake = FakeToolchain::new();
        fake.push_run(FakeToolchain::ok_run(
            1.0,
            "Execution cycles for tiled loop: 111\n",
        ));
        fake.push_run(FakeToolchain::ok_run(
            0.2,
            "Execution cycles for tiled loop: 42\n",
        ));

        let config = small_config(&dir).instrument(true).tile_sizes(vec![8]);
        let sink_probe = MemorySink::new();
        let mut tuner = Tuner::new(config, Box::new(fake), Box::new(sink_probe));
        let summary = tuner.run(&source).unwrap();

        assert_eq!(summary.successes, 90);
        assert!(summary.best.is_some());
    }

    /// Sink handing records back to the test through a shared handle.
    #[derive(Clone, Default)]
    struct SharedSink(std::rc::Rc<std::cell::RefCell<Vec<TrialRecord>>>);

    impl ResultSink for SharedSink {
        fn append(&mut self, record: &TrialRecord) -> std::io::Result<()> {
            self.0.borrow_mut().push(record.clone());
            Ok(())
        }
    }

    #[test]
    fn test_inferred_bounds_marked_on_records() {
        let dir = test_dir("inferred");
        let source = dir.join("kernel.c");
        fs::write(
            &source,
            r#"
#define DEPTH 16
#define HEIGHT 16
#define WIDTH 16
int main() {
    for (int a = 0; a < DEPTH; a++) {
        for (int b = 0; b < HEIGHT; b++) {
            for (int c = 0; c < WIDTH; c++) {
                work(a, b, c);
            }
        }
    }
    return 0;
}
"#,
        )
        .unwrap();

        let mut config = small_config(&dir);
        config.infer_bounds = true;

        let fake = FakeToolchain::new();
        fake.push_run(FakeToolchain::ok_run(1.0, "")); // baseline

        let sink = SharedSink::default();
        let records = sink.0.clone();
        let mut tuner = Tuner::new(config, Box::new(fake), Box::new(sink));
        let summary = tuner.run(&source).unwrap();
        assert_eq!(summary.total(), 90);

        // Every record carries the inference marker, not just the log.
        let records = records.borrow();
        assert_eq!(records.len(), 90);
        assert!(records.iter().all(|r| r.transform_applied && r.inferred_bounds));
        assert!(records[0].to_csv_row().ends_with(",yes\n"));
    }

    #[test]
    fn test_explicit_bounds_leave_records_unmarked() {
        let dir = test_dir("explicit");
        let source = write_kernel(&dir);

        let fake = FakeToolchain::new();
        fake.push_run(FakeToolchain::ok_run(1.0, "")); // baseline

        let sink = SharedSink::default();
        let records = sink.0.clone();
        let mut tuner = Tuner::new(small_config(&dir), Box::new(fake), Box::new(sink));
        tuner.run(&source).unwrap();

        assert!(records.borrow().iter().all(|r| !r.inferred_bounds));
    }

    #[test]
    fn test_generate_variants_writes_artifacts() {
        let dir = test_dir("variants");
        let source = write_kernel(&dir);

        let config = small_config(&dir);
        let tuner = Tuner::new(
            config,
            Box::new(FakeToolchain::new()),
            Box::new(MemorySink::new()),
        );
        let paths = tuner.generate_variants(&source).unwrap();
        assert_eq!(paths.len(), 90);
        assert!(paths[0].exists());

        let first = fs::read_to_string(&paths[0]).unwrap();
        assert!(first.contains("i_t"));
        assert!(first.contains("work(i, j, k);"));
    }

    #[test]
    fn test_missing_source_is_input_not_found() {
        let dir = test_dir("missing");
        let mut tuner = Tuner::new(
            small_config(&dir),
            Box::new(FakeToolchain::new()),
            Box::new(MemorySink::new()),
        );
        match tuner.run(dir.join("nope.c")) {
            Err(TuneError::InputNotFound { .. }) => {}
            other => panic!("expected InputNotFound, got {:?}", other.map(|_| ())),
        }
    }
}
