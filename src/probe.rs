//! Path discovery probe
//!
//! Runs the platform traceroute command as a child process, hands every
//! stdout line to the caller in production order and collects the hop
//! addresses it sees along the way.

use regex::Regex;
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ProbeSettings;
use crate::geo::Address;

static IPV4_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})").expect("static pattern")
});

/// Keep only the end of the probe's stderr for error messages
const STDERR_TAIL: usize = 512;

/// How long `finish` waits for stderr once the probe itself has exited.
/// Background processes left by the probe may hold the pipe open.
const STDERR_GRACE: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("no target given")]
    EmptyTarget,

    #[error("failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed reading probe output: {0}")]
    Read(#[from] io::Error),

    #[error("{}", exit_message(.code, .stderr))]
    Exit { code: Option<i32>, stderr: String },
}

fn exit_message(code: &Option<i32>, stderr: &str) -> String {
    let status = match code {
        Some(c) => format!("exit status {c}"),
        None => "terminated by signal".to_string(),
    };
    let mut msg = format!(
        "traceroute command failed ({status}). Make sure it's installed and you have network connectivity."
    );
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        msg.push('\n');
        msg.push_str(stderr);
    }
    msg
}

/// Pull the first dotted-quad out of a probe line
pub fn extract_address(line: &str) -> Option<Address> {
    IPV4_PATTERN
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| Address::new(m.as_str()))
}

/// First-seen ordered set of hop addresses
#[derive(Debug, Default)]
pub struct HopList {
    hops: Vec<Address>,
}

impl HopList {
    /// Record the address in `line`, if any. Returns true when it is new.
    pub fn observe(&mut self, line: &str) -> bool {
        match extract_address(line) {
            Some(addr) if !self.hops.contains(&addr) => {
                self.hops.push(addr);
                true
            }
            _ => false,
        }
    }

    pub fn into_vec(self) -> Vec<Address> {
        self.hops
    }
}

/// The path discovery command, parameterized by target
#[derive(Clone, Debug)]
pub struct PathProbe {
    program: String,
    args: Vec<String>,
}

impl PathProbe {
    pub fn new(settings: &ProbeSettings) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
        }
    }

    /// Launch the probe. Lines are pulled from the returned handle.
    pub fn spawn(&self, target: &str) -> Result<ProbeRun, ProbeError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ProbeError::EmptyTarget);
        }

        info!(program = %self.program, target, "starting probe");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProbeError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().map(BufReader::new);
        let stderr = child.stderr.take().map(StderrTail::spawn);

        Ok(ProbeRun {
            child: Some(child),
            stdout,
            stderr,
            hops: HopList::default(),
            buf: Vec::new(),
        })
    }

    /// Run to completion, calling `on_line` for each output line in order.
    pub fn run<F>(&self, target: &str, mut on_line: F) -> Result<Vec<Address>, ProbeError>
    where
        F: FnMut(&str),
    {
        let mut run = self.spawn(target)?;
        while let Some(line) = run.next_line()? {
            on_line(&line);
        }
        run.finish()
    }
}

/// Background reader keeping the last `STDERR_TAIL` bytes of the probe's stderr
struct StderrTail {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

impl StderrTail {
    fn spawn(mut err: ChildStderr) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let shared = Arc::clone(&buf);
        std::thread::spawn(move || {
            let mut chunk = [0u8; 1024];
            while let Ok(n @ 1..) = err.read(&mut chunk) {
                let mut tail = shared.lock().unwrap_or_else(PoisonError::into_inner);
                tail.extend_from_slice(&chunk[..n]);
                let excess = tail.len().saturating_sub(STDERR_TAIL);
                tail.drain(..excess);
            }
            let _ = tx.send(());
        });
        Self { buf, done }
    }

    /// Whatever arrived, waiting at most `grace` for the pipe to close
    fn collect(self, grace: Duration) -> String {
        let _ = self.done.recv_timeout(grace);
        let tail = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&tail).into_owned()
    }
}

/// A live probe process.
///
/// Dropping it before `finish` kills and reaps the child, so an early return
/// or a panicking observer cannot leak the process.
pub struct ProbeRun {
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<StderrTail>,
    hops: HopList,
    buf: Vec<u8>,
}

impl ProbeRun {
    /// Next stdout line with the terminator stripped, `None` at end of stream.
    pub fn next_line(&mut self) -> io::Result<Option<String>> {
        let Some(reader) = self.stdout.as_mut() else {
            return Ok(None);
        };
        self.buf.clear();
        if reader.read_until(b'\n', &mut self.buf)? == 0 {
            self.stdout = None;
            return Ok(None);
        }
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        if self.hops.observe(&line) {
            debug!(line = %line, "new hop");
        }
        Ok(Some(line))
    }

    /// Wait for the process and return the hop list, or the exit failure.
    pub fn finish(mut self) -> Result<Vec<Address>, ProbeError> {
        // Drain anything the caller did not read so the child can exit.
        while self.next_line()?.is_some() {}

        let Some(mut child) = self.child.take() else {
            return Ok(std::mem::take(&mut self.hops).into_vec());
        };
        let status = child.wait()?;
        let stderr = self
            .stderr
            .take()
            .map(|tail| tail.collect(STDERR_GRACE))
            .unwrap_or_default();

        if !status.success() {
            warn!(code = ?status.code(), "probe exited with failure");
            return Err(ProbeError::Exit {
                code: status.code(),
                stderr,
            });
        }
        let hops = std::mem::take(&mut self.hops).into_vec();
        info!(hops = hops.len(), "probe finished");
        Ok(hops)
    }
}

impl Iterator for ProbeRun {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line().transpose()
    }
}

impl Drop for ProbeRun {
    fn drop(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        // The stderr reader ends once every writer closes the pipe; leave it detached.
        self.stderr = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> PathProbe {
        PathProbe {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    #[test]
    fn extract_first_dotted_quad() {
        let addr = extract_address(" 3  ae-1.r20.example.net (129.250.2.10)  12.1 ms").unwrap();
        assert_eq!(addr.as_str(), "129.250.2.10");
        assert!(extract_address(" 4  * * *").is_none());
    }

    #[test]
    fn hop_list_dedupes_in_first_seen_order() {
        let mut hops = HopList::default();
        assert!(hops.observe("1 10.0.0.1 (10.0.0.1) 2ms"));
        assert!(!hops.observe("2 10.0.0.1 (10.0.0.1) 3ms"));
        assert!(hops.observe("3 8.8.8.8 (8.8.8.8) 5ms"));
        let list: Vec<_> = hops.into_vec().iter().map(|a| a.to_string()).collect();
        assert_eq!(list, ["10.0.0.1", "8.8.8.8"]);
    }

    #[cfg(unix)]
    #[test]
    fn run_relays_lines_and_dedupes() {
        let probe = sh("printf '1 10.0.0.1 (10.0.0.1) 2ms\\n2 10.0.0.1 (10.0.0.1) 3ms\\n3 8.8.8.8 (8.8.8.8) 5ms\\n'");
        let mut seen = Vec::new();
        let hops = probe.run("example.com", |l| seen.push(l.to_string())).unwrap();

        assert_eq!(
            seen,
            [
                "1 10.0.0.1 (10.0.0.1) 2ms",
                "2 10.0.0.1 (10.0.0.1) 3ms",
                "3 8.8.8.8 (8.8.8.8) 5ms",
            ]
        );
        let hops: Vec<_> = hops.iter().map(|a| a.as_str().to_string()).collect();
        assert_eq!(hops, ["10.0.0.1", "8.8.8.8"]);
    }

    #[cfg(unix)]
    #[test]
    fn target_is_passed_as_last_argument() {
        // sh -c binds the first trailing argument to $0
        let probe = sh("echo \"tracing $0\"");
        let mut seen = Vec::new();
        probe.run("example.com", |l| seen.push(l.to_string())).unwrap();
        assert_eq!(seen, ["tracing example.com"]);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_failure_after_relaying_lines() {
        let probe = sh("echo '1 192.0.2.1'; echo 'boom' >&2; exit 1");
        let mut seen = Vec::new();
        let err = probe.run("example.com", |l| seen.push(l.to_string())).unwrap_err();

        assert_eq!(seen, ["1 192.0.2.1"]);
        match err {
            ProbeError::Exit { code, stderr } => {
                assert_eq!(code, Some(1));
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn finish_does_not_wait_for_leftover_background_jobs() {
        // the background sleep keeps the stderr pipe open after sh exits
        let probe = sh("echo '1 10.0.0.1'; echo 'warming up' >&2; sleep 4 >/dev/null & exit 0");
        let started = std::time::Instant::now();
        let hops = probe.run("example.com", |_| {}).unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(hops, [Address::new("10.0.0.1")]);
    }

    #[cfg(unix)]
    #[test]
    fn failure_keeps_stderr_written_before_exit_with_pipe_still_open() {
        let probe = sh("echo 'no route' >&2; sleep 4 >/dev/null & exit 2");
        let started = std::time::Instant::now();
        let err = probe.run("example.com", |_| {}).unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(3));
        match err {
            ProbeError::Exit { code, stderr } => {
                assert_eq!(code, Some(2));
                assert!(stderr.contains("no route"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_target_is_rejected() {
        let probe = sh("true");
        assert!(matches!(probe.spawn("   "), Err(ProbeError::EmptyTarget)));
    }

    #[test]
    fn missing_program_is_launch_error() {
        let probe = PathProbe {
            program: "traceglobe-no-such-program".into(),
            args: Vec::new(),
        };
        assert!(matches!(
            probe.run("example.com", |_| {}),
            Err(ProbeError::Launch { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn dropping_unfinished_run_does_not_hang() {
        let probe = sh("echo first; exec sleep 30");
        let mut run = probe.spawn("example.com").unwrap();
        assert_eq!(run.next_line().unwrap().as_deref(), Some("first"));
        drop(run);
    }
}
