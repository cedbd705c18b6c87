/// Interestingness script execution and supervision
use crate::types::{ReduceError, Result, Verdict};
use log::{debug, warn};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

/// Transient spawn failures are retried with exponential backoff before the
/// trial is given up on.
const SPAWN_ATTEMPTS: u32 = 3;
const SPAWN_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Grace window between SIGTERM and SIGKILL when tearing a trial down.
const KILL_GRACE: Duration = Duration::from_millis(100);

/// Poll interval while waiting for the script to finish.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Outcome of one script run: the verdict plus captured output and timing.
#[derive(Debug)]
pub struct TrialRun {
    pub verdict: Verdict,
    pub stdout: String,
    pub stderr: String,
    pub wall_time: Duration,
}

/// Runs the interestingness script inside a sandbox with a timeout. The
/// script is started in its own session so the whole process group can be
/// signalled when the trial times out or loses the race.
pub struct TestRunner {
    script: PathBuf,
    timeout: Duration,
}

impl TestRunner {
    /// Validate the script up front: reduction with a broken predicate is a
    /// fatal configuration error, not something to discover mid-run.
    pub fn new(script: &Path, timeout: Duration) -> Result<Self> {
        let script = script
            .canonicalize()
            .map_err(|e| ReduceError::Script(format!("{}: {e}", script.display())))?;
        nix::unistd::access(&script, nix::unistd::AccessFlags::X_OK).map_err(|e| {
            ReduceError::Script(format!("{} is not executable: {e}", script.display()))
        })?;
        Ok(Self { script, timeout })
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Run the script with CWD set to `workdir`. `cancelled` is polled while
    /// waiting; once it reports true the script's process group is killed
    /// and the verdict is [`Verdict::Cancelled`].
    pub fn run(&self, workdir: &Path, cancelled: impl Fn() -> bool) -> TrialRun {
        let start = Instant::now();

        let mut child = match self.spawn(workdir) {
            Ok(child) => child,
            Err(message) => {
                return TrialRun {
                    verdict: Verdict::SpawnError { message },
                    stdout: String::new(),
                    stderr: String::new(),
                    wall_time: start.elapsed(),
                }
            }
        };

        // Drain stdout/stderr on background threads so a chatty script
        // cannot fill the pipe and deadlock against our wait loop.
        let stdout_handle = child.stdout.take().map(|mut stream| {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = stream.read_to_end(&mut buffer);
                buffer
            })
        });
        let stderr_handle = child.stderr.take().map(|mut stream| {
            thread::spawn(move || {
                let mut buffer = Vec::new();
                let _ = stream.read_to_end(&mut buffer);
                buffer
            })
        });

        let verdict = loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    break if status.success() {
                        Verdict::Interesting
                    } else {
                        let exit_code = status.code().unwrap_or_else(|| {
                            128 + status.signal().unwrap_or(0)
                        });
                        Verdict::Uninteresting { exit_code }
                    };
                }
                Ok(None) => {
                    if cancelled() {
                        kill_group(&mut child);
                        break Verdict::Cancelled;
                    }
                    if start.elapsed() >= self.timeout {
                        debug!("test timed out after {:?}", self.timeout);
                        kill_group(&mut child);
                        break Verdict::Timeout;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    kill_group(&mut child);
                    break Verdict::SpawnError {
                        message: format!("wait failed: {e}"),
                    };
                }
            }
        };

        let stdout = collect(stdout_handle);
        let stderr = collect(stderr_handle);
        TrialRun {
            verdict,
            stdout,
            stderr,
            wall_time: start.elapsed(),
        }
    }

    fn spawn(&self, workdir: &Path) -> std::result::Result<Child, String> {
        let mut backoff = SPAWN_BACKOFF_BASE;
        let mut attempt = 0;
        loop {
            let mut cmd = Command::new(&self.script);
            cmd.current_dir(workdir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                unsafe {
                    cmd.pre_exec(|| {
                        nix::unistd::setsid().map_err(|e| {
                            std::io::Error::new(std::io::ErrorKind::Other, e)
                        })?;
                        Ok(())
                    });
                }
            }
            match cmd.spawn() {
                Ok(child) => return Ok(child),
                Err(e) => {
                    attempt += 1;
                    if attempt >= SPAWN_ATTEMPTS {
                        return Err(format!("failed to spawn {}: {e}", self.script.display()));
                    }
                    warn!(
                        "spawn attempt {attempt} failed ({e}), retrying in {backoff:?}"
                    );
                    thread::sleep(backoff);
                    backoff *= 2;
                }
            }
        }
    }
}

fn collect(handle: Option<thread::JoinHandle<Vec<u8>>>) -> String {
    match handle {
        Some(handle) => String::from_utf8_lossy(&handle.join().unwrap_or_default()).into_owned(),
        None => String::new(),
    }
}

/// Terminate the child's whole process group: SIGTERM, a short grace window,
/// then SIGKILL. Falls back to signalling just the child when the group
/// signal fails (the child may not have reached setsid yet).
fn kill_group(child: &mut Child) {
    let pid = child.id() as i32;
    #[cfg(unix)]
    unsafe {
        if libc::kill(-pid, libc::SIGTERM) != 0 {
            libc::kill(pid, libc::SIGTERM);
        }
    }
    thread::sleep(KILL_GRACE);
    #[cfg(unix)]
    unsafe {
        if libc::kill(-pid, libc::SIGKILL) != 0 {
            libc::kill(pid, libc::SIGKILL);
        }
    }
    let _ = child.wait();
}
