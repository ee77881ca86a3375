//! Scoped toolchain subprocess execution.
//!
//! The runner spawns one toolchain process with stdout and stderr redirected
//! to a log file in the working directory, polls it with `try_wait`, and
//! kills it when its timeout class bound elapses or the run is cancelled.
//! On unix the toolchain leads its own process group, so wrapper scripts
//! take their helper processes down with them.

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_config::TimeoutConfig;

use crate::error::BackendError;
use crate::transient::TransientPredicate;

/// Default log file written into the working directory.
pub const LOG_FILE: &str = "toolchain.log";

/// Number of log lines kept for diagnostics.
const LOG_TAIL_LINES: usize = 40;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run-wide cancellation flag shared by the orchestrator and every runner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Which timeout bound applies to a toolchain run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    /// Compilers and helper commands.
    Compile,
    /// High-level synthesis, which runs for hours.
    Synthesis,
}

impl fmt::Display for TimeoutClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile => f.write_str("compile"),
            Self::Synthesis => f.write_str("synthesis"),
        }
    }
}

/// A toolchain command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable, resolved through `PATH` when not absolute.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Log file name inside the working directory.
    pub log_name: String,
}

impl Invocation {
    /// Creates an invocation of `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            log_name: LOG_FILE.to_string(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Writes the log to `name` instead of [`LOG_FILE`].
    pub fn log_to(mut self, name: &str) -> Self {
        self.log_name = name.to_string();
        self
    }

    /// Renders the command line as a POSIX shell command.
    pub fn shell_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .map(|word| shell_quote(&word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Outcome of a successful toolchain run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Exit code (always `0` for a successful run).
    pub exit_code: i32,
    /// Last lines of the log.
    pub log_tail: Vec<String>,
    /// Wall-clock run time.
    pub elapsed: Duration,
}

/// Runs toolchains under timeout-class bounds and a shared cancellation token.
#[derive(Debug, Clone)]
pub struct ToolchainRunner {
    compile_limit: Duration,
    synthesis_limit: Duration,
    poll_interval: Duration,
    cancel: CancelToken,
    transient: TransientPredicate,
}

impl ToolchainRunner {
    /// Creates a runner with the configured timeout bounds.
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        Self {
            compile_limit: Duration::from_secs(timeouts.compile_secs),
            synthesis_limit: Duration::from_secs(timeouts.synthesis_secs),
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancelToken::new(),
            transient: TransientPredicate::never(),
        }
    }

    /// Shares the run's cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sets the predicate that marks failures as transient.
    pub fn with_transient(mut self, transient: TransientPredicate) -> Self {
        self.transient = transient;
        self
    }

    /// Overrides the child polling interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Overrides the bound of one timeout class.
    pub fn with_limit(mut self, class: TimeoutClass, limit: Duration) -> Self {
        match class {
            TimeoutClass::Compile => self.compile_limit = limit,
            TimeoutClass::Synthesis => self.synthesis_limit = limit,
        }
        self
    }

    /// Returns the bound of a timeout class.
    pub fn limit(&self, class: TimeoutClass) -> Duration {
        match class {
            TimeoutClass::Compile => self.compile_limit,
            TimeoutClass::Synthesis => self.synthesis_limit,
        }
    }

    /// Returns the cancellation token this runner observes.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Runs `invocation` in `workdir` and waits for it under the bound of
    /// `class`.
    ///
    /// A non-zero exit becomes [`BackendError::ToolchainFailure`], or
    /// [`BackendError::TransientToolchainFailure`] when the log tail matches
    /// a transient signature.
    pub fn run(
        &self,
        tool: &str,
        invocation: &Invocation,
        workdir: &Path,
        class: TimeoutClass,
    ) -> Result<RunOutput, BackendError> {
        if self.cancel.is_cancelled() {
            return Err(BackendError::Cancelled {
                tool: tool.to_string(),
            });
        }
        let log_path = workdir.join(&invocation.log_name);
        let mut log = File::create(&log_path).map_err(|e| BackendError::io(&log_path, e))?;
        writeln!(log, "$ {}", invocation.shell_line()).map_err(|e| BackendError::io(&log_path, e))?;
        let stderr = log.try_clone().map_err(|e| BackendError::io(&log_path, e))?;

        let limit = self.limit(class);
        tracing::debug!(tool, class = %class, command = %invocation.shell_line(), "starting toolchain");
        let start = Instant::now();
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .map_err(|source| BackendError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => {
                    kill_group(&mut child);
                    return Err(BackendError::io(&log_path, e));
                }
            }
            if self.cancel.is_cancelled() {
                kill_group(&mut child);
                tracing::warn!(tool, "toolchain killed on cancellation");
                return Err(BackendError::Cancelled {
                    tool: tool.to_string(),
                });
            }
            if start.elapsed() >= limit {
                kill_group(&mut child);
                tracing::warn!(tool, limit_secs = limit.as_secs(), "toolchain timed out");
                return Err(BackendError::Timeout {
                    tool: tool.to_string(),
                    limit,
                    log_tail: read_tail(&log_path),
                });
            }
            std::thread::sleep(self.poll_interval);
        };

        let elapsed = start.elapsed();
        let log_tail = read_tail(&log_path);
        if status.success() {
            tracing::debug!(tool, elapsed_ms = elapsed.as_millis() as u64, "toolchain finished");
            return Ok(RunOutput {
                exit_code: 0,
                log_tail,
                elapsed,
            });
        }

        let exit_code = status.code();
        let reason = match exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        if self.transient.matches(&log_tail) {
            Err(BackendError::TransientToolchainFailure {
                tool: tool.to_string(),
                reason,
                exit_code,
                log_tail,
            })
        } else {
            Err(BackendError::ToolchainFailure {
                tool: tool.to_string(),
                reason,
                exit_code,
                log_tail,
            })
        }
    }
}

/// Kills the toolchain's process group and reaps the toolchain itself.
fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: the child was spawned as the leader of group `pgid`.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Reads the last [`LOG_TAIL_LINES`] lines of a log. Unreadable logs yield
/// an empty tail.
pub(crate) fn read_tail(path: &Path) -> Vec<String> {
    let Ok(file) = File::open(path) else {
        return Vec::new();
    };
    let mut tail = VecDeque::with_capacity(LOG_TAIL_LINES);
    for line in BufReader::new(file).lines().map_while(Result::ok) {
        if tail.len() == LOG_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}
