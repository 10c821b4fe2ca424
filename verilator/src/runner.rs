// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded, killable subprocess execution.
//!
//! Verilator forks `make`, which forks the C++ compiler, so the child is made
//! the leader of a fresh process group and every termination signal goes to
//! the whole group. Output is drained on two reader threads into buffers with
//! a hard ceiling.

use std::{
    ffi::OsStr,
    fmt, io,
    io::Read,
    process::{Child, Command, Stdio},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use camino::Utf8PathBuf;
use serde::Serialize;
use snafu::{ResultExt, Snafu};

/// Default per-stream output ceiling: 16 MiB.
pub const DEFAULT_OUTPUT_LIMIT: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    pub working_directory: Option<Utf8PathBuf>,
    /// Maximum bytes captured from each of stdout and stderr.
    pub output_limit: usize,
    /// Time between the graceful and the forceful termination signal.
    pub grace_period: Duration,
    pub poll_interval: Duration,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            working_directory: None,
            output_limit: DEFAULT_OUTPUT_LIMIT,
            grace_period: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
            env: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        })
    }
}

/// Everything a finished (or interrupted) child produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the child was ended by a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, the form the classifier consumes.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text
    }
}

#[derive(Debug, Snafu)]
pub enum RunError {
    #[snafu(display("Failed to launch `{program}`: {source}"))]
    Launch { program: String, source: io::Error },
    #[snafu(display(
        "`{program}` (pid {pid}) did not finish within {timeout:?} and was terminated"
    ))]
    Timeout {
        program: String,
        pid: u32,
        timeout: Duration,
        /// Whatever the child wrote before it was terminated.
        partial: Box<ProcessOutput>,
    },
    #[snafu(display(
        "`{program}` wrote more than {limit} bytes to {stream} and was terminated"
    ))]
    OutputOverflow {
        program: String,
        stream: Stream,
        limit: usize,
    },
    #[snafu(display("Failed to wait for `{program}`: {source}"))]
    Wait { program: String, source: io::Error },
}

impl RunError {
    /// Whether this is a launch failure caused by momentary resource
    /// exhaustion rather than a missing or unexecutable program.
    pub fn is_transient_launch(&self) -> bool {
        let RunError::Launch { source, .. } = self else {
            return false;
        };
        if source.kind() == io::ErrorKind::Interrupted {
            return true;
        }
        matches!(
            source.raw_os_error(),
            Some(libc::EAGAIN | libc::ENOMEM | libc::EBUSY | libc::ETXTBSY)
        )
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    mut stream: R,
    limit: usize,
    overflowed: Arc<AtomicBool>,
) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(count) => {
                    let room = limit.saturating_sub(buffer.len());
                    if count > room {
                        buffer.extend_from_slice(&chunk[..room]);
                        overflowed.store(true, Ordering::SeqCst);
                        break;
                    }
                    buffer.extend_from_slice(&chunk[..count]);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
        buffer
    })
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    // ESRCH just means the group is already gone
    unsafe {
        let _ = libc::kill(-(pid as libc::pid_t), signal);
    }
}

/// Sends the graceful signal, waits out the grace period, then kills the
/// group and reaps the child.
fn terminate(child: &mut Child, options: &RunOptions) -> io::Result<()> {
    #[cfg(unix)]
    {
        let pid = child.id();
        signal_group(pid, libc::SIGTERM);
        let deadline = Instant::now() + options.grace_period;
        while Instant::now() < deadline {
            if child.try_wait()?.is_some() {
                // stragglers that ignored SIGTERM
                signal_group(pid, libc::SIGKILL);
                return Ok(());
            }
            thread::sleep(options.poll_interval);
        }
        log::debug!("process group {pid} ignored SIGTERM; sending SIGKILL");
        signal_group(pid, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = options;

    match child.kill() {
        Ok(()) => {}
        // already exited
        Err(error) if error.kind() == io::ErrorKind::InvalidInput => {}
        Err(error) => return Err(error),
    }
    child.wait().map(|_| ())
}

struct Readers {
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
    stdout_overflowed: Arc<AtomicBool>,
    stderr_overflowed: Arc<AtomicBool>,
}

impl Readers {
    fn overflow(&self) -> Option<Stream> {
        if self.stdout_overflowed.load(Ordering::SeqCst) {
            Some(Stream::Stdout)
        } else if self.stderr_overflowed.load(Ordering::SeqCst) {
            Some(Stream::Stderr)
        } else {
            None
        }
    }

    /// Joins both readers. A grandchild that outlives the child can hold the
    /// pipes open, so after `grace_period` the group is killed to unblock
    /// them.
    fn finish(self, pid: u32, options: &RunOptions) -> (String, String) {
        let deadline = Instant::now() + options.grace_period;
        while !(self.stdout.is_finished() && self.stderr.is_finished())
            && Instant::now() < deadline
        {
            thread::sleep(options.poll_interval);
        }
        #[cfg(unix)]
        {
            if !(self.stdout.is_finished() && self.stderr.is_finished()) {
                log::debug!(
                    "output pipes of {pid} still open; killing its group"
                );
                signal_group(pid, libc::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        let _ = pid;

        let decode = |handle: JoinHandle<Vec<u8>>| {
            handle
                .join()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        };
        (decode(self.stdout), decode(self.stderr))
    }
}

/// Runs `program` to completion, enforcing `options.timeout` and the output
/// ceiling.
///
/// A timed-out or overflowing child is terminated with its whole process
/// group before this returns, so no process outlives the call.
pub fn run<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    options: &RunOptions,
) -> Result<ProcessOutput, RunError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(directory) = &options.working_directory {
        command.current_dir(directory);
    }
    command.envs(options.env.iter().map(|(key, value)| (key, value)));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;

        // the child leads its own group so the subtree can be signalled
        unsafe {
            command.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    log::debug!(
        "running {} {}",
        program,
        args.iter()
            .map(|arg| arg.as_ref().to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let start = Instant::now();
    let mut child = command.spawn().context(LaunchSnafu { program })?;
    let pid = child.id();

    let stdout_overflowed = Arc::new(AtomicBool::new(false));
    let stderr_overflowed = Arc::new(AtomicBool::new(false));
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take())
    else {
        // both were configured as pipes above
        let _ = terminate(&mut child, options);
        return Err(io::Error::other("child pipes were not captured"))
            .context(WaitSnafu { program });
    };
    let readers = Readers {
        stdout: spawn_reader(
            stdout,
            options.output_limit,
            stdout_overflowed.clone(),
        ),
        stderr: spawn_reader(
            stderr,
            options.output_limit,
            stderr_overflowed.clone(),
        ),
        stdout_overflowed,
        stderr_overflowed,
    };

    let status = loop {
        if let Some(stream) = readers.overflow() {
            log::warn!(
                "`{program}` exceeded the {} byte {stream} limit; terminating",
                options.output_limit
            );
            terminate(&mut child, options).context(WaitSnafu { program })?;
            readers.finish(pid, options);
            return OutputOverflowSnafu {
                program,
                stream,
                limit: options.output_limit,
            }
            .fail();
        }

        match child.try_wait().context(WaitSnafu { program })? {
            Some(status) => break status,
            None => {
                if let Some(timeout) = options.timeout {
                    if start.elapsed() >= timeout {
                        log::warn!(
                            "`{program}` (pid {pid}) timed out after {timeout:?}; terminating"
                        );
                        terminate(&mut child, options)
                            .context(WaitSnafu { program })?;
                        let (stdout, stderr) = readers.finish(pid, options);
                        return TimeoutSnafu {
                            program,
                            pid,
                            timeout,
                            partial: Box::new(ProcessOutput {
                                stdout,
                                stderr,
                                exit_code: None,
                                duration: start.elapsed(),
                            }),
                        }
                        .fail();
                    }
                }
                thread::sleep(options.poll_interval);
            }
        }
    };

    let overflow = readers.overflow();
    let (stdout, stderr) = readers.finish(pid, options);
    if let Some(stream) = overflow {
        return OutputOverflowSnafu {
            program,
            stream,
            limit: options.output_limit,
        }
        .fail();
    }

    let output = ProcessOutput {
        stdout,
        stderr,
        exit_code: status.code(),
        duration: start.elapsed(),
    };
    log::debug!(
        "`{program}` exited with {:?} after {:?}",
        output.exit_code,
        output.duration
    );
    Ok(output)
}

/// Bounds for [`run_with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled after each retry.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Re-invokes [`run`] with exponential backoff while `retryable` accepts the
/// error and attempts remain. The caller owns the retry-eligibility decision.
pub fn run_with_retry<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    options: &RunOptions,
    policy: RetryPolicy,
    mut retryable: impl FnMut(&RunError) -> bool,
) -> Result<ProcessOutput, RunError> {
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match run(program, args, options) {
            Err(error) if attempt < policy.max_attempts && retryable(&error) => {
                log::warn!(
                    "attempt {attempt}/{} of `{program}` failed: {error}; retrying in {backoff:?}",
                    policy.max_attempts
                );
                thread::sleep(backoff);
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
            result => return result,
        }
    }
}
