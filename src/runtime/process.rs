//! Child process execution with the function stdio contract
//!
//! One code path serves both executors: write the input envelope to stdin,
//! collect stdout, stream stderr to the log sink while keeping a bounded tail
//! for error reports, and watch for timeout or cancellation. Termination is
//! SIGTERM first, then SIGKILL after a grace period.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::{KrmpackError, Result};
use crate::runtime::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const TERM_GRACE: Duration = Duration::from_secs(2);
const STDERR_TAIL_BYTES: usize = 4096;

pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    /// `Some` replaces the environment entirely (exec functions get a
    /// scrubbed copy); `None` inherits (the docker client needs its own).
    pub envs: Option<Vec<(String, String)>>,
    pub cwd: Option<PathBuf>,
    pub input: String,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
    pub function_name: String,
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr_tail: String,
    pub exit_code: i32,
}

pub fn run(request: ProcessRequest) -> Result<ProcessOutput> {
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(envs) = &request.envs {
        cmd.env_clear();
        cmd.envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    if let Some(cwd) = &request.cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd.spawn().map_err(|e| {
        KrmpackError::function_execution(
            &request.function_name,
            127,
            format!("failed to start '{}': {e}", request.program),
            vec![],
        )
    })?;

    let stdin = child.stdin.take();
    let input = request.input;
    let writer = std::thread::spawn(move || {
        if let Some(mut stdin) = stdin {
            // The function may exit without draining stdin; that is its call.
            let _ = stdin.write_all(input.as_bytes());
        }
    });

    let stdout = child.stdout.take();
    let stdout_reader = std::thread::spawn(move || {
        let mut collected = String::new();
        if let Some(mut stdout) = stdout {
            let _ = stdout.read_to_string(&mut collected);
        }
        collected
    });

    let stderr = child.stderr.take();
    let function_name = request.function_name.clone();
    let stderr_reader = std::thread::spawn(move || {
        let mut tail = String::new();
        if let Some(stderr) = stderr {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                tracing::debug!(function = %function_name, "{line}");
                tail.push_str(&line);
                tail.push('\n');
                if tail.len() > STDERR_TAIL_BYTES {
                    let mut cut = tail.len() - STDERR_TAIL_BYTES;
                    while !tail.is_char_boundary(cut) {
                        cut += 1;
                    }
                    tail.drain(..cut);
                }
            }
        }
        tail
    });

    let deadline = request.timeout.map(|t| Instant::now() + t);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                reap(&mut child);
                return Err(e.into());
            }
        }

        if request.cancel.is_cancelled() {
            reap(&mut child);
            return Err(KrmpackError::Cancelled);
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            reap(&mut child);
            let seconds = request.timeout.map(|t| t.as_secs().max(1)).unwrap_or(1);
            return Err(KrmpackError::FunctionTimeout {
                name: request.function_name,
                seconds,
            });
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let _ = writer.join();
    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr_tail = stderr_reader.join().unwrap_or_default();

    Ok(ProcessOutput {
        stdout,
        stderr_tail,
        exit_code: exit_code_of(&status),
    })
}

/// SIGTERM, a grace period, then SIGKILL; always waits so no zombie remains.
fn reap(child: &mut Child) {
    terminate(child);
    let _ = child.wait();
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    let pid = child.id() as i32;
    // SAFETY: signalling our own child with a valid pid.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    let grace_end = Instant::now() + TERM_GRACE;
    while Instant::now() < grace_end {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(unix)]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(program: &str, args: &[&str], input: &str) -> ProcessRequest {
        ProcessRequest {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            envs: None,
            cwd: None,
            input: input.to_string(),
            timeout: None,
            cancel: CancellationToken::new(),
            function_name: "test-fn".to_string(),
        }
    }

    #[test]
    fn test_stdio_contract() {
        let output = run(request("cat", &[], "hello\n")).unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.exit_code, 0);
    }

    #[test]
    fn test_nonzero_exit_is_reported_not_an_error() {
        let output = run(request("sh", &["-c", "echo partial; exit 7"], "")).unwrap();
        assert_eq!(output.exit_code, 7);
        assert_eq!(output.stdout, "partial\n");
    }

    #[test]
    fn test_stderr_tail_captured() {
        let output = run(request("sh", &["-c", "echo oops >&2"], "")).unwrap();
        assert!(output.stderr_tail.contains("oops"));
    }

    #[test]
    fn test_missing_program() {
        let err = run(request("/definitely/not/a/binary", &[], "")).unwrap_err();
        match err {
            KrmpackError::FunctionExecution { exit_code, .. } => assert_eq!(exit_code, 127),
            other => panic!("expected FunctionExecution, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let mut req = request("sleep", &["30"], "");
        req.timeout = Some(Duration::from_millis(200));
        let start = Instant::now();
        let err = run(req).unwrap_err();
        assert!(matches!(err, KrmpackError::FunctionTimeout { .. }));
        // SIGTERM takes effect well before the 30s sleep would finish
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancellation() {
        let cancel = CancellationToken::new();
        let mut req = request("sleep", &["30"], "");
        req.cancel = cancel.clone();

        let handle = std::thread::spawn(move || run(req));
        std::thread::sleep(Duration::from_millis(150));
        cancel.cancel();
        let err = handle.join().expect("thread").unwrap_err();
        assert!(matches!(err, KrmpackError::Cancelled));
    }

    #[test]
    fn test_env_replacement() {
        let mut req = request("sh", &["-c", "echo \"$MARKER:$PATH\""], "");
        req.envs = Some(vec![
            ("MARKER".to_string(), "set".to_string()),
            ("PATH".to_string(), "/usr/bin:/bin".to_string()),
        ]);
        let output = run(req).unwrap();
        assert!(output.stdout.starts_with("set:"));
    }
}
