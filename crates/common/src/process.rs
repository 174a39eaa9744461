//! External process runner
//!
//! Starts a child with redirected output and error streams, mirrors every
//! line into `tracing` and keeps the text so failures can be reported with
//! the full output attached. Completion is published through a watch
//! channel so any number of callers can await it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn, Instrument, Span};

use crate::error::{Error, Result};

/// Exit code reported when the child was terminated by a signal
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// How long output may keep arriving after the child has exited
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Description of a command to start
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    program: PathBuf,
    args: Vec<String>,
    working_dir: PathBuf,
    env: BTreeMap<String, String>,
    quiet: bool,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            quiet: false,
        }
    }

    /// Run `command` through the platform shell
    pub fn shell(working_dir: impl Into<PathBuf>, command: &str) -> Self {
        #[cfg(windows)]
        let (shell, flag) = ("cmd", "/c");
        #[cfg(not(windows))]
        let (shell, flag) = ("sh", "-c");

        Self::new(shell, working_dir).arg(flag).arg(command)
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env.extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Log child output at debug level instead of info/warn
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Human-readable command line, quoting arguments that contain spaces
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().map(|a| {
                if a.contains(' ') {
                    format!("\"{}\"", a)
                } else {
                    a.clone()
                }
            }))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Spawn the process. Must be called from within a tokio runtime.
    pub fn start(self) -> Result<ProcessRun> {
        ProcessRun::start(self)
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Output,
    Error,
}

#[derive(Debug, Default)]
struct Captured {
    output: String,
    error: String,
}

/// Handle to a started child process
pub struct ProcessRun {
    command_line: String,
    pid: u32,
    captured: Arc<Mutex<Captured>>,
    exit_rx: watch::Receiver<Option<i32>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl ProcessRun {
    /// Spawn `spec` and start draining its output
    pub fn start(spec: ProcessSpec) -> Result<Self> {
        let command_line = spec.command_line();

        let mut std_cmd = std::process::Command::new(&spec.program);
        std_cmd
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so the whole tree can be signalled at once
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: command_line.clone(),
            source,
        })?;

        let pid = child.id().unwrap_or_default();
        info!(pid, "Started `{}` in {}", command_line, spec.working_dir.display());

        let captured = Arc::new(Mutex::new(Captured::default()));
        let span = Span::current();

        let readers: Vec<_> = [
            child
                .stdout
                .take()
                .map(|out| tokio::spawn(drain(out, Stream::Output, captured.clone(), pid, spec.quiet).instrument(span.clone()))),
            child
                .stderr
                .take()
                .map(|err| tokio::spawn(drain(err, Stream::Error, captured.clone(), pid, spec.quiet).instrument(span.clone()))),
        ]
        .into_iter()
        .flatten()
        .collect();

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(
            async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    _ = kill_rx => {
                        let _ = child.start_kill();
                        child.wait().await
                    }
                };

                // A descendant may inherit the pipes and outlive the child
                let mut readers = readers;
                let drained = tokio::time::timeout(OUTPUT_DRAIN_GRACE, async {
                    for reader in &mut readers {
                        let _ = reader.await;
                    }
                })
                .await;
                if drained.is_err() {
                    debug!(pid, "Output still open {:?} after exit; reporting exit anyway", OUTPUT_DRAIN_GRACE);
                }

                let code = match status {
                    Ok(status) => status.code().unwrap_or(SIGNALLED_EXIT_CODE),
                    Err(e) => {
                        warn!(pid, "Failed waiting for process: {}", e);
                        SIGNALLED_EXIT_CODE
                    }
                };
                debug!(pid, code, "Process exited");
                let _ = exit_tx.send(Some(code));
            }
            .instrument(span),
        );

        Ok(Self {
            command_line,
            pid,
            captured,
            exit_rx,
            kill_tx: Mutex::new(Some(kill_tx)),
        })
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Standard output captured so far
    pub fn output(&self) -> String {
        self.captured.lock().output.clone()
    }

    /// Standard error captured so far
    pub fn error(&self) -> String {
        self.captured.lock().error.clone()
    }

    /// Exit code, once the process has exited and its streams are drained
    /// or the drain grace period has passed
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code() == Some(0)
    }

    /// Wait for the process to exit and return its exit code
    pub async fn exited(&self) -> i32 {
        let mut rx = self.exit_rx.clone();
        loop {
            let code = *rx.borrow_and_update();
            if let Some(code) = code {
                return code;
            }
            if rx.changed().await.is_err() {
                let code = *rx.borrow();
                return code.unwrap_or(SIGNALLED_EXIT_CODE);
            }
        }
    }

    /// Wait for exit, failing with the captured output on a nonzero code
    /// when `assert_success` is set.
    pub async fn wait_for_exit(&self, assert_success: bool) -> Result<i32> {
        let code = self.exited().await;
        if assert_success && code != 0 {
            return Err(self.failure(code));
        }
        Ok(code)
    }

    /// Fail unless the process has exited with code zero
    pub fn ensure_success(&self) -> Result<()> {
        match self.exit_code() {
            Some(0) => Ok(()),
            Some(code) => Err(self.failure(code)),
            None => Err(Error::ToolFailed {
                command: self.command_line.clone(),
                exit_code: SIGNALLED_EXIT_CODE,
                output: format!("Process is still running\n{}", self.formatted_output()),
            }),
        }
    }

    /// Exit code plus both streams, for assertion messages
    pub fn formatted_output(&self) -> String {
        let captured = self.captured.lock();
        let code = self
            .exit_code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "<running>".to_string());
        format!(
            "Process '{}' exited with code '{}'\nStdErr: {}\nStdOut: {}",
            self.command_line, code, captured.error, captured.output
        )
    }

    /// Kill the process and everything in its process group
    pub fn kill(&self) {
        if self.has_exited() {
            return;
        }

        debug!(pid = self.pid, "Killing `{}`", self.command_line);
        kill_process_group(self.pid);
        if let Some(tx) = self.kill_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    fn failure(&self, exit_code: i32) -> Error {
        Error::ToolFailed {
            command: self.command_line.clone(),
            exit_code,
            output: self.formatted_output(),
        }
    }
}

impl Drop for ProcessRun {
    fn drop(&mut self) {
        self.kill();
    }
}

impl std::fmt::Debug for ProcessRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRun")
            .field("command_line", &self.command_line)
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

async fn drain<R>(reader: R, stream: Stream, captured: Arc<Mutex<Captured>>, pid: u32, quiet: bool)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(&['\r', '\n'][..]);

                match (stream, quiet) {
                    (_, true) => debug!(pid, "{}", line),
                    (Stream::Output, false) => info!(pid, "{}", line),
                    (Stream::Error, false) => warn!(pid, "{}", line),
                }

                let mut captured = captured.lock();
                let target = match stream {
                    Stream::Output => &mut captured.output,
                    Stream::Error => &mut captured.error,
                };
                target.push_str(line);
                target.push('\n');
            }
            Err(e) => {
                debug!(pid, "Stopped reading {:?}: {}", stream, e);
                break;
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if raw <= 0 {
        return;
    }
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!(pid, "killpg failed: {}", e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(dir: &Path, script: &str) -> ProcessSpec {
        ProcessSpec::shell(dir, script)
    }

    #[tokio::test]
    async fn test_captures_both_streams_and_exit_code() {
        let tmp = TempDir::new().unwrap();
        let run = sh(tmp.path(), "echo hello; echo oops >&2; exit 3").start().unwrap();

        assert_eq!(run.exited().await, 3);
        assert_eq!(run.output(), "hello\n");
        assert_eq!(run.error(), "oops\n");
        assert!(!run.succeeded());
    }

    #[tokio::test]
    async fn test_wait_for_exit_asserts_success_with_output() {
        let tmp = TempDir::new().unwrap();
        let run = sh(tmp.path(), "echo diagnostics; exit 2").start().unwrap();

        let err = run.wait_for_exit(true).await.unwrap_err();
        match err {
            Error::ToolFailed { exit_code, output, .. } => {
                assert_eq!(exit_code, 2);
                assert!(output.contains("diagnostics"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_wait_for_exit_without_assertion_reports_code() {
        let tmp = TempDir::new().unwrap();
        let run = sh(tmp.path(), "exit 5").start().unwrap();
        assert_eq!(run.wait_for_exit(false).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_runs_in_working_dir_with_env() {
        let tmp = TempDir::new().unwrap();
        let run = sh(tmp.path(), "pwd; echo \"$HARNESS_VALUE\"")
            .env("HARNESS_VALUE", "injected")
            .start()
            .unwrap();

        run.wait_for_exit(true).await.unwrap();
        let output = run.output();
        let canonical = tmp.path().canonicalize().unwrap();
        assert!(output.contains(canonical.to_str().unwrap()));
        assert!(output.contains("injected"));
    }

    #[tokio::test]
    async fn test_kill_terminates_long_running_process() {
        let tmp = TempDir::new().unwrap();
        let run = sh(tmp.path(), "echo started; sleep 60").start().unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        run.kill();

        let code = tokio::time::timeout(Duration::from_secs(10), run.exited())
            .await
            .expect("process should exit after kill");
        assert_ne!(code, 0);
    }

    #[tokio::test]
    async fn test_exit_is_reported_while_a_descendant_holds_the_pipes() {
        let tmp = TempDir::new().unwrap();
        let run = sh(tmp.path(), "sleep 15 & echo done; exit 0").start().unwrap();

        let code = tokio::time::timeout(Duration::from_secs(5), run.exited())
            .await
            .expect("exit should not wait for the background sleep");

        assert_eq!(code, 0);
        assert!(run.succeeded());
        assert_eq!(run.output(), "done\n");
        kill_process_group(run.pid());
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let tmp = TempDir::new().unwrap();
        let err = ProcessSpec::new("definitely-not-a-real-program", tmp.path())
            .start()
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn test_command_line_quotes_spaced_args() {
        let spec = ProcessSpec::new("dotnet", "/tmp")
            .args(["new", "web"])
            .arg("--debug:custom-hive")
            .arg("/tmp/my hive");
        assert_eq!(spec.command_line(), "dotnet new web --debug:custom-hive \"/tmp/my hive\"");
    }
}
