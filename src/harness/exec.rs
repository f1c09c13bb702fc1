//! Process execution capability.
//!
//! The harness core never touches the OS directly: compiling and running
//! are behind the [`Toolchain`] trait so the trial state machine can be
//! driven by a deterministic fake in tests. The system implementation
//! invokes the external compiler as an opaque black box and measures each
//! child with OS process accounting (`wait4` rusage on Unix).

use crate::error::ToolchainError;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// Measurements captured from one completed child process.
#[derive(Clone, Debug, PartialEq)]
pub struct RunMetrics {
    /// Wall-clock time from spawn to reap
    pub wall: Duration,
    /// OS-reported user CPU time, seconds
    pub user: f64,
    /// OS-reported system CPU time, seconds
    pub system: f64,
    /// Whether the child exited with status 0
    pub exit_ok: bool,
    /// Captured standard output
    pub stdout: String,
}

/// Outcome of running a child under an optional deadline.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// The child exited on its own.
    Completed(RunMetrics),
    /// The deadline passed and the child was terminated.
    DeadlineKilled {
        /// Wall-clock time at termination
        wall: Duration,
    },
}

/// Compile-and-run capability with per-child measurement.
pub trait Toolchain {
    /// Compile `source` into `output` with the toolchain's fixed flags.
    fn compile(&self, source: &Path, output: &Path) -> Result<(), ToolchainError>;

    /// Run `exe` with no arguments as an isolated child. When `deadline`
    /// is set the child is terminated once it elapses.
    fn run(&self, exe: &Path, deadline: Option<Duration>) -> Result<RunOutcome, ToolchainError>;
}

/// The real toolchain: an external compiler plus child-process timing.
/// Flags are fixed at construction and applied identically to the
/// baseline and every trial, so comparisons stay fair.
#[derive(Clone, Debug)]
pub struct SystemToolchain {
    compiler: String,
    flags: Vec<String>,
}

impl SystemToolchain {
    /// Toolchain invoking `compiler` with the given fixed flags.
    pub fn new(compiler: &str, flags: Vec<String>) -> Self {
        Self { compiler: compiler.to_string(), flags }
    }
}

impl Toolchain for SystemToolchain {
    fn compile(&self, source: &Path, output: &Path) -> Result<(), ToolchainError> {
        let result = Command::new(&self.compiler)
            .args(&self.flags)
            .arg(source)
            .arg("-o")
            .arg(output)
            .output()
            .map_err(|e| ToolchainError::Spawn(e.to_string()))?;

        if result.status.success() {
            Ok(())
        } else {
            Err(ToolchainError::CompileFailed(
                String::from_utf8_lossy(&result.stderr).to_string(),
            ))
        }
    }

    #[cfg(unix)]
    fn run(&self, exe: &Path, deadline: Option<Duration>) -> Result<RunOutcome, ToolchainError> {
        use std::io::Read;

        let start = Instant::now();
        let mut child = Command::new(exe)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ToolchainError::Spawn(e.to_string()))?;
        let pid = child.id() as libc::pid_t;

        // Drain stdout on a separate thread so a chatty child cannot
        // deadlock on a full pipe while we wait for it.
        let mut pipe = child.stdout.take();
        let reader = std::thread::spawn(move || {
            let mut buf = String::new();
            if let Some(ref mut p) = pipe {
                let _ = p.read_to_string(&mut buf);
            }
            buf
        });

        let mut status: libc::c_int = 0;
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        let mut killed = false;
        loop {
            let waited =
                unsafe { libc::wait4(pid, &mut status, libc::WNOHANG, &mut usage) };
            if waited == pid {
                break;
            }
            if waited == -1 {
                return Err(ToolchainError::Observe(
                    std::io::Error::last_os_error().to_string(),
                ));
            }
            if let Some(limit) = deadline {
                if start.elapsed() > limit {
                    unsafe {
                        libc::kill(pid, libc::SIGKILL);
                        libc::wait4(pid, &mut status, 0, &mut usage);
                    }
                    killed = true;
                    break;
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        let wall = start.elapsed();
        let stdout = reader.join().unwrap_or_default();

        if killed {
            return Ok(RunOutcome::DeadlineKilled { wall });
        }

        let exit_ok = libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0;
        Ok(RunOutcome::Completed(RunMetrics {
            wall,
            user: timeval_seconds(&usage.ru_utime),
            system: timeval_seconds(&usage.ru_stime),
            exit_ok,
            stdout,
        }))
    }

    #[cfg(not(unix))]
    fn run(&self, exe: &Path, _deadline: Option<Duration>) -> Result<RunOutcome, ToolchainError> {
        // No rusage on this platform; report wall time only.
        let start = Instant::now();
        let output = Command::new(exe)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .map_err(|e| ToolchainError::Spawn(e.to_string()))?;
        Ok(RunOutcome::Completed(RunMetrics {
            wall: start.elapsed(),
            user: 0.0,
            system: 0.0,
            exit_ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        }))
    }
}

#[cfg(unix)]
fn timeval_seconds(tv: &libc::timeval) -> f64 {
    tv.tv_sec as f64 + tv.tv_usec as f64 * 1e-6
}

/// Scripted toolchain for harness tests: a queue of per-trial steps,
/// consumed in call order.
#[derive(Debug, Default)]
pub struct FakeToolchain {
    compiles: std::cell::RefCell<std::collections::VecDeque<Result<(), ToolchainError>>>,
    runs: std::cell::RefCell<std::collections::VecDeque<Result<RunOutcome, ToolchainError>>>,
}

impl FakeToolchain {
    /// Empty fake; push steps with [`push_compile`](Self::push_compile)
    /// and [`push_run`](Self::push_run).
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next compile result.
    pub fn push_compile(&self, result: Result<(), ToolchainError>) {
        self.compiles.borrow_mut().push_back(result);
    }

    /// Queue the next run result.
    pub fn push_run(&self, result: Result<RunOutcome, ToolchainError>) {
        self.runs.borrow_mut().push_back(result);
    }

    /// A successful run completing in `wall` seconds with the given stdout.
    pub fn ok_run(wall: f64, stdout: &str) -> Result<RunOutcome, ToolchainError> {
        Ok(RunOutcome::Completed(RunMetrics {
            wall: Duration::from_secs_f64(wall),
            user: wall * 0.9,
            system: wall * 0.05,
            exit_ok: true,
            stdout: stdout.to_string(),
        }))
    }

    /// A run that exited non-zero after `wall` seconds.
    pub fn crashed_run(wall: f64) -> Result<RunOutcome, ToolchainError> {
        Ok(RunOutcome::Completed(RunMetrics {
            wall: Duration::from_secs_f64(wall),
            user: 0.0,
            system: 0.0,
            exit_ok: false,
            stdout: String::new(),
        }))
    }
}

impl Toolchain for FakeToolchain {
    fn compile(&self, _source: &Path, _output: &Path) -> Result<(), ToolchainError> {
        self.compiles.borrow_mut().pop_front().unwrap_or(Ok(()))
    }

    fn run(&self, _exe: &Path, _deadline: Option<Duration>) -> Result<RunOutcome, ToolchainError> {
        self.runs
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| FakeToolchain::ok_run(0.01, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_toolchain_scripting() {
        let fake = FakeToolchain::new();
        fake.push_compile(Err(ToolchainError::CompileFailed("boom".into())));
        fake.push_run(FakeToolchain::crashed_run(0.2));

        let p = Path::new("x");
        assert!(fake.compile(p, p).is_err());
        assert!(fake.compile(p, p).is_ok()); // queue exhausted -> default ok

        match fake.run(p, None).unwrap() {
            RunOutcome::Completed(m) => assert!(!m.exit_ok),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_timeval_seconds() {
        let tv = libc::timeval { tv_sec: 2, tv_usec: 500_000 };
        assert!((timeval_seconds(&tv) - 2.5).abs() < 1e-9);
    }
}
