//! Subprocess supervision for native build tools.
//!
//! One [`SupervisedCommand`] wraps one external invocation (gradle, flutter,
//! unzip). The supervisor:
//! - spawns the command with its environment overrides merged over the
//!   inherited environment (tools need the inherited PATH/HOME),
//! - streams stdout and stderr, mirroring every chunk to a per-invocation
//!   log file and deriving a rolling progress line,
//! - enforces the step's timeout policy on a fixed check period independent
//!   of output arrival, force-killing the whole process group on breach,
//! - on non-zero exit, extracts a bounded failure summary from the combined
//!   output and records the full output in a sibling `.error` file.
//!
//! The supervisor has no knowledge of build semantics beyond which command
//! to run; progress and failure signals are inferred from the text output.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{LaneError, LaneResult};
use crate::progress::ProgressSender;
use crate::timeout::TimeoutPolicy;

/// Maximum length of a forwarded progress line.
pub const PROGRESS_LINE_MAX: usize = 150;

/// How often the wait loop polls the child for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Append-only log artifact for one supervised invocation, retained for
/// post-mortem inspection. On failure a sibling `.error` file holds the
/// full combined output.
#[derive(Debug)]
pub struct BuildLog {
    path: PathBuf,
    file: Mutex<std::fs::File>,
}

impl BuildLog {
    /// Create a fresh log file under `log_dir`, named by timestamp and a
    /// unique id so concurrent builds never collide.
    pub fn create(log_dir: &Path, label: &str) -> LaneResult<Self> {
        std::fs::create_dir_all(log_dir)?;
        let name = format!(
            "{}-{}-{}.log",
            Utc::now().format("%Y%m%dT%H%M%S"),
            label,
            Uuid::new_v4().simple()
        );
        let path = log_dir.join(name);
        let file = std::fs::OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Where the log lives (surfaced in failure messages).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one chunk verbatim. Logging must never fail a build.
    pub fn append_chunk(&self, chunk: &str) {
        use std::io::Write;
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(chunk.as_bytes());
        }
    }

    /// Path of the sibling error dump.
    pub fn error_path(&self) -> PathBuf {
        self.path.with_extension("error")
    }

    /// Write the full combined output next to the log. Best-effort.
    pub fn write_error_dump(&self, combined: &str) {
        if let Err(e) = std::fs::write(self.error_path(), combined) {
            warn!(path = %self.error_path().display(), "failed to write error dump: {e}");
        }
    }
}

/// One external build-tool invocation under supervision.
#[derive(Debug)]
pub struct SupervisedCommand {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    env: Vec<(String, String)>,
    policy: TimeoutPolicy,
    cancel: Arc<AtomicBool>,
    timeout_check: Duration,
}

impl SupervisedCommand {
    pub fn new(
        program: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        policy: TimeoutPolicy,
    ) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: Vec::new(),
            policy,
            cancel: Arc::new(AtomicBool::new(false)),
            timeout_check: Duration::from_secs(30),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Override one environment variable for the child. Overrides are merged
    /// over the inherited environment, never replacing it wholesale.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Share an external kill-request flag (ctrl-c handler, governor slot
    /// reclamation). When set, the process group is killed on the next poll.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// How often the timeout policy is evaluated (default 30s). Checked on
    /// its own period, independent of whether output is arriving.
    pub fn timeout_check_every(mut self, period: Duration) -> Self {
        self.timeout_check = period;
        self
    }

    /// The kill-request flag for this command.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run to completion. Returns captured stdout on exit code 0.
    pub fn run(&self, log_dir: &Path, progress: Option<&ProgressSender>) -> LaneResult<String> {
        let log = Arc::new(BuildLog::create(log_dir, program_label(&self.program))?);
        log.append_chunk(&format!(
            "=== droid-lane supervised: {} {}\nworking_dir: {}\nstarted_at: {}\n=== begin output ===\n",
            self.program,
            self.args.join(" "),
            self.working_dir.display(),
            Utc::now().to_rfc3339(),
        ));

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.working_dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so a force-kill takes the whole build-tool tree
        // (gradle daemons, dart compilers) and not just the wrapper.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| LaneError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        debug!(program = %self.program, pid = child.id(), "spawned supervised process");

        let started_at = Instant::now();
        let last_output = Arc::new(Mutex::new(started_at));
        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));

        let stdout_handle = child.stdout.take().map(|stream| {
            spawn_reader(
                stream,
                Arc::clone(&stdout_buf),
                Arc::clone(&log),
                Arc::clone(&last_output),
                progress.cloned(),
                StreamRole::Stdout,
            )
        });
        let stderr_handle = child.stderr.take().map(|stream| {
            spawn_reader(
                stream,
                Arc::clone(&stderr_buf),
                Arc::clone(&log),
                Arc::clone(&last_output),
                progress.cloned(),
                StreamRole::Stderr,
            )
        });

        let mut last_check = Instant::now();
        let status = loop {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(program = %self.program, "kill requested, terminating process group");
                abort_run(&mut child, stdout_handle, stderr_handle, &log, &stdout_buf, &stderr_buf);
                return Err(LaneError::Cancelled);
            }

            if last_check.elapsed() >= self.timeout_check {
                last_check = Instant::now();
                let last = last_instant(&last_output);
                if let Some(kind) = self.policy.check(started_at, last, Instant::now()) {
                    warn!(
                        program = %self.program,
                        kind = kind.as_str(),
                        "timeout breached, force-killing process group"
                    );
                    abort_run(&mut child, stdout_handle, stderr_handle, &log, &stdout_buf, &stderr_buf);
                    return Err(LaneError::Timeout {
                        kind,
                        elapsed_secs: started_at.elapsed().as_secs(),
                    });
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    warn!(program = %self.program, "wait on supervised process failed: {e}");
                    abort_run(&mut child, stdout_handle, stderr_handle, &log, &stdout_buf, &stderr_buf);
                    return Err(e.into());
                }
            }
        };

        // Process exited on its own; the timeout checker stops with the loop.
        join_readers(stdout_handle, stderr_handle);
        log.append_chunk(&format!(
            "\n=== end output ===\nended_at: {}\nexit: {:?}\n",
            Utc::now().to_rfc3339(),
            status.code(),
        ));

        if self.cancel.load(Ordering::SeqCst) {
            return Err(LaneError::Cancelled);
        }

        let stdout = lock_string(&stdout_buf);
        if status.success() {
            return Ok(stdout);
        }

        let combined = combined_output(&stdout_buf, &stderr_buf);
        log.write_error_dump(&combined);
        let summary =
            lane_classifier::extract_failure_summary(&combined, &Default::default());
        let message = format!("{summary}\n(full log: {})", log.path().display());
        Err(LaneError::BuildTool {
            tool: self.program.clone(),
            exit_code: status.code(),
            message,
        })
    }
}

#[derive(Clone, Copy)]
enum StreamRole {
    Stdout,
    Stderr,
}

fn spawn_reader<R: Read + Send + 'static>(
    mut stream: R,
    buf: Arc<Mutex<String>>,
    log: Arc<BuildLog>,
    last_output: Arc<Mutex<Instant>>,
    progress: Option<ProgressSender>,
    role: StreamRole,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            let n = match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let text = String::from_utf8_lossy(&chunk[..n]);

            if let Ok(mut accumulated) = buf.lock() {
                accumulated.push_str(&text);
            }
            log.append_chunk(&text);
            if let Ok(mut last) = last_output.lock() {
                *last = Instant::now();
            }

            if let Some(progress) = &progress {
                let forward = match role {
                    StreamRole::Stdout => true,
                    // Stderr is mostly benign warnings; only error-looking
                    // chunks become progress.
                    StreamRole::Stderr => chunk_looks_like_error(&text),
                };
                if forward {
                    if let Some(line) = interesting_line(&text) {
                        progress.send(line);
                    }
                }
            }
        }
    })
}

/// Common teardown for every abnormal exit from the wait loop: kill the
/// process group, reap the child, join the readers, and persist the combined
/// output so post-mortems see what the build printed before it was stopped.
fn abort_run(
    child: &mut Child,
    stdout_handle: Option<thread::JoinHandle<()>>,
    stderr_handle: Option<thread::JoinHandle<()>>,
    log: &BuildLog,
    stdout_buf: &Arc<Mutex<String>>,
    stderr_buf: &Arc<Mutex<String>>,
) {
    kill_process_group(child);
    let _ = child.wait();
    join_readers(stdout_handle, stderr_handle);
    log.write_error_dump(&combined_output(stdout_buf, stderr_buf));
}

fn join_readers(
    stdout: Option<thread::JoinHandle<()>>,
    stderr: Option<thread::JoinHandle<()>>,
) {
    if let Some(handle) = stdout {
        let _ = handle.join();
    }
    if let Some(handle) = stderr {
        let _ = handle.join();
    }
}

/// Derive the single "interesting" line from an output chunk: the last
/// non-blank line, trimmed and truncated to [`PROGRESS_LINE_MAX`] chars.
pub fn interesting_line(chunk: &str) -> Option<String> {
    let line = chunk.lines().rev().find(|l| !l.trim().is_empty())?;
    let line = line.trim();
    if line.chars().count() > PROGRESS_LINE_MAX {
        Some(line.chars().take(PROGRESS_LINE_MAX).collect())
    } else {
        Some(line.to_string())
    }
}

/// Case-insensitive check for error-indicating stderr content.
pub fn chunk_looks_like_error(chunk: &str) -> bool {
    let lower = chunk.to_lowercase();
    lower.contains("error") || lower.contains("exception")
}

/// Non-graceful kill of the child's process group (SIGKILL on unix). The
/// policies that reach this point have already decided the process cannot
/// be trusted to exit on request.
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
    }
    let _ = child.kill();
}

fn program_label(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program)
}

fn lock_string(buf: &Arc<Mutex<String>>) -> String {
    buf.lock().map(|s| s.clone()).unwrap_or_default()
}

fn last_instant(last_output: &Arc<Mutex<Instant>>) -> Instant {
    last_output
        .lock()
        .map(|i| *i)
        .unwrap_or_else(|_| Instant::now())
}

fn combined_output(stdout: &Arc<Mutex<String>>, stderr: &Arc<Mutex<String>>) -> String {
    let mut combined = lock_string(stdout);
    let err = lock_string(stderr);
    if !err.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&err);
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_interesting_line_is_last_non_blank() {
        let chunk = "Task :app:compileDebugKotlin\n\n> Transforming artifact x\n\n";
        assert_eq!(
            interesting_line(chunk).unwrap(),
            "> Transforming artifact x"
        );
    }

    #[test]
    fn test_interesting_line_truncates() {
        let long = "x".repeat(400);
        let line = interesting_line(&long).unwrap();
        assert_eq!(line.chars().count(), PROGRESS_LINE_MAX);
    }

    #[test]
    fn test_interesting_line_all_blank() {
        assert!(interesting_line("\n  \n\t\n").is_none());
    }

    #[test]
    fn test_stderr_error_filter() {
        assert!(chunk_looks_like_error("FAILURE: Error: boom"));
        assert!(chunk_looks_like_error("java.lang.RuntimeException"));
        assert!(!chunk_looks_like_error("Note: recompile with -Xlint"));
    }

    #[test]
    fn test_build_log_paths() {
        let dir = TempDir::new().unwrap();
        let log = BuildLog::create(dir.path(), "gradle").unwrap();
        assert!(log.path().exists());
        assert_eq!(log.error_path().extension().unwrap(), "error");

        log.append_chunk("hello\n");
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.ends_with("hello\n"));
    }

    #[test]
    fn test_build_log_error_dump() {
        let dir = TempDir::new().unwrap();
        let log = BuildLog::create(dir.path(), "gradle").unwrap();
        log.write_error_dump("full output here");
        assert_eq!(
            std::fs::read_to_string(log.error_path()).unwrap(),
            "full output here"
        );
    }

    #[test]
    fn test_program_label_strips_path() {
        assert_eq!(program_label("/srv/project/gradlew"), "gradlew");
        assert_eq!(program_label("flutter"), "flutter");
    }
}
