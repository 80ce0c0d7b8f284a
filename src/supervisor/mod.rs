use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{oneshot, Mutex, Notify};
use uuid::Uuid;

use crate::errors::GenoflowError;
use crate::models::OrchestratorConfig;

/// A fully resolved external-tool invocation: argv plus an optional working
/// directory. Built by the command layer, never from user-supplied shell text.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Single-line rendering for logs.
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Seam between the orchestrator and the operating system. The real
/// implementation is [`ProcessSupervisor`]; tests substitute
/// [`MockToolRunner`].
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run the command to completion, enforcing `timeout`. Returns the
    /// process output even for non-zero exits; errors are reserved for
    /// launch failures, timeouts, and cancellation.
    async fn run(
        &self,
        job_id: Uuid,
        command: ToolCommand,
        timeout: Duration,
    ) -> Result<ProcessOutput, GenoflowError>;

    /// Request termination of the process running for `job_id`. Returns
    /// false if no such process is running (idempotent).
    async fn cancel(&self, job_id: Uuid) -> bool;
}

enum ExitCause {
    Status(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Spawns and supervises one OS process per running job.
///
/// Processes are keyed by job id, never by pid: the pid is logged
/// best-effort for operators but all control flows through a kill channel
/// held in `kill_senders`. Entries are removed on every exit path.
pub struct ProcessSupervisor {
    cancel_grace: Duration,
    kill_senders: Mutex<HashMap<Uuid, oneshot::Sender<()>>>,
}

impl ProcessSupervisor {
    pub fn new(cancel_grace: Duration) -> Self {
        Self {
            cancel_grace,
            kill_senders: Mutex::new(HashMap::new()),
        }
    }

    /// Construct with the grace period taken from `config.cancel_grace_secs`.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(Duration::from_secs(config.cancel_grace_secs))
    }

    /// Graceful stop: terminate signal, wait up to the grace period, then
    /// force-kill. On non-unix targets the graceful step is skipped.
    async fn terminate(&self, job_id: Uuid, child: &mut tokio::process::Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: plain signal send to a pid we just spawned.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            match tokio::time::timeout(self.cancel_grace, child.wait()).await {
                Ok(_) => {
                    tracing::info!("Process for job {} exited within grace period", job_id);
                    return;
                }
                Err(_) => {
                    tracing::warn!(
                        "Process for job {} ignored terminate signal, force killing",
                        job_id
                    );
                }
            }
        }

        if let Err(e) = child.start_kill() {
            tracing::warn!("Force kill for job {} failed: {}", job_id, e);
        }
        let _ = child.wait().await;
    }
}

#[async_trait]
impl ToolRunner for ProcessSupervisor {
    async fn run(
        &self,
        job_id: Uuid,
        command: ToolCommand,
        timeout: Duration,
    ) -> Result<ProcessOutput, GenoflowError> {
        tracing::info!("Launching for job {}: {}", job_id, command.display_line());

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = command.work_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| GenoflowError::Launch(format!("{}: {}", command.program, e)))?;

        if let Some(pid) = child.id() {
            tracing::debug!("Job {} running as pid {}", job_id, pid);
        }

        // Drain both pipes line by line so a chatty tool can never fill a
        // pipe buffer and deadlock against our wait().
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move {
            let mut collected = String::new();
            if let Some(out) = stdout {
                let mut lines = BufReader::new(out).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("[tool stdout] {}", line);
                    collected.push_str(&line);
                    collected.push('\n');
                }
            }
            collected
        });
        let stderr_task = tokio::spawn(async move {
            let mut collected = String::new();
            if let Some(err) = stderr {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!("[tool stderr] {}", line);
                    collected.push_str(&line);
                    collected.push('\n');
                }
            }
            collected
        });

        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        {
            let mut senders = self.kill_senders.lock().await;
            senders.insert(job_id, kill_tx);
        }

        let timeout_fut = tokio::time::sleep(timeout);
        tokio::pin!(timeout_fut);

        let cause = tokio::select! {
            status = child.wait() => ExitCause::Status(status),
            _ = &mut timeout_fut => ExitCause::TimedOut,
            _ = &mut kill_rx => ExitCause::Cancelled,
        };

        {
            let mut senders = self.kill_senders.lock().await;
            senders.remove(&job_id);
        }

        match cause {
            ExitCause::Status(Ok(status)) => {
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                let exit_code = status.code().unwrap_or(-1);
                tracing::info!("Job {} process exited with code {}", job_id, exit_code);
                Ok(ProcessOutput {
                    exit_code,
                    stdout,
                    stderr,
                })
            }
            ExitCause::Status(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                Err(GenoflowError::Internal(format!(
                    "Process wait failed for job {}: {}",
                    job_id, e
                )))
            }
            ExitCause::TimedOut => {
                tracing::warn!(
                    "Job {} exceeded timeout of {}s, killing process",
                    job_id,
                    timeout.as_secs()
                );
                if let Err(e) = child.start_kill() {
                    tracing::warn!("Kill after timeout failed for job {}: {}", job_id, e);
                }
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                Err(GenoflowError::Timeout(format!(
                    "{}s exceeded",
                    timeout.as_secs()
                )))
            }
            ExitCause::Cancelled => {
                self.terminate(job_id, &mut child).await;
                stdout_task.abort();
                stderr_task.abort();
                Err(GenoflowError::Internal(
                    "process terminated by cancellation request".to_string(),
                ))
            }
        }
    }

    async fn cancel(&self, job_id: Uuid) -> bool {
        let sender = {
            let mut senders = self.kill_senders.lock().await;
            senders.remove(&job_id)
        };
        match sender {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

// --- Mock runner for tests and embedding hosts without docker ---

type SideEffect = dyn Fn(Uuid, &ToolCommand) -> std::io::Result<()> + Send + Sync;

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Scripted [`ToolRunner`]: fixed output, optional launch error, optional
/// artificial delay, and an optional callback for fabricating output files
/// on disk before returning. A cancel against an in-flight delayed run
/// interrupts it, mirroring the real supervisor's contract.
pub struct MockToolRunner {
    exit_code: i32,
    stdout: String,
    stderr: String,
    launch_error: Option<String>,
    delay: Option<Duration>,
    side_effect: Option<Box<SideEffect>>,
    calls: std::sync::Mutex<Vec<(Uuid, ToolCommand)>>,
    cancel_calls: std::sync::Mutex<Vec<Uuid>>,
    in_flight: std::sync::Mutex<HashMap<Uuid, Arc<Notify>>>,
}

impl MockToolRunner {
    pub fn succeeding() -> Self {
        Self::with_output_and_exit(String::new(), 0)
    }

    pub fn with_output_and_exit(stdout: String, exit_code: i32) -> Self {
        Self {
            exit_code,
            stdout,
            stderr: String::new(),
            launch_error: None,
            delay: None,
            side_effect: None,
            calls: std::sync::Mutex::new(Vec::new()),
            cancel_calls: std::sync::Mutex::new(Vec::new()),
            in_flight: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_launch_error(message: &str) -> Self {
        let mut runner = Self::succeeding();
        runner.launch_error = Some(message.to_string());
        runner
    }

    pub fn with_stderr(stderr: String, exit_code: i32) -> Self {
        let mut runner = Self::with_output_and_exit(String::new(), exit_code);
        runner.stderr = stderr;
        runner
    }

    pub fn with_delay(delay: Duration, exit_code: i32) -> Self {
        let mut runner = Self::with_output_and_exit(String::new(), exit_code);
        runner.delay = Some(delay);
        runner
    }

    /// Runs `effect` on every call before returning, letting tests fabricate
    /// tool output files in the job's output directory.
    pub fn with_side_effect<F>(exit_code: i32, effect: F) -> Self
    where
        F: Fn(Uuid, &ToolCommand) -> std::io::Result<()> + Send + Sync + 'static,
    {
        let mut runner = Self::with_output_and_exit(String::new(), exit_code);
        runner.side_effect = Some(Box::new(effect));
        runner
    }

    /// All `(job_id, command)` pairs `run` was invoked with, in order.
    pub fn calls(&self) -> Vec<(Uuid, ToolCommand)> {
        lock(&self.calls).clone()
    }

    pub fn cancel_calls(&self) -> Vec<Uuid> {
        lock(&self.cancel_calls).clone()
    }
}

#[async_trait]
impl ToolRunner for MockToolRunner {
    async fn run(
        &self,
        job_id: Uuid,
        command: ToolCommand,
        timeout: Duration,
    ) -> Result<ProcessOutput, GenoflowError> {
        lock(&self.calls).push((job_id, command.clone()));

        if let Some(ref msg) = self.launch_error {
            return Err(GenoflowError::Launch(msg.clone()));
        }

        let cancelled = Arc::new(Notify::new());
        lock(&self.in_flight).insert(job_id, Arc::clone(&cancelled));
        let result = async {
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay.min(timeout)) => {
                        if delay > timeout {
                            return Err(GenoflowError::Timeout(format!(
                                "{}s exceeded",
                                timeout.as_secs()
                            )));
                        }
                    }
                    _ = cancelled.notified() => {
                        return Err(GenoflowError::Internal(
                            "process terminated by cancellation request".to_string(),
                        ));
                    }
                }
            }

            if let Some(ref effect) = self.side_effect {
                effect(job_id, &command)
                    .map_err(|e| GenoflowError::Internal(format!("side effect failed: {}", e)))?;
            }

            Ok(ProcessOutput {
                exit_code: self.exit_code,
                stdout: self.stdout.clone(),
                stderr: self.stderr.clone(),
            })
        }
        .await;
        lock(&self.in_flight).remove(&job_id);
        result
    }

    async fn cancel(&self, job_id: Uuid) -> bool {
        lock(&self.cancel_calls).push(job_id);
        match lock(&self.in_flight).get(&job_id) {
            Some(cancelled) => {
                cancelled.notify_one();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("/bin/sh").arg("-c").arg(script)
    }

    #[test]
    fn test_display_line() {
        let cmd = ToolCommand::new("docker").arg("run").arg("--rm");
        assert_eq!(cmd.display_line(), "docker run --rm");
    }

    #[test]
    fn test_from_config_takes_configured_grace() {
        let mut config = OrchestratorConfig::default();
        config.cancel_grace_secs = 11;
        let supervisor = ProcessSupervisor::from_config(&config);
        assert_eq!(supervisor.cancel_grace, Duration::from_secs(11));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_stdout_and_exit_zero() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(5));
        let output = supervisor
            .run(Uuid::now_v7(), sh("echo hello"), Duration::from_secs(10))
            .await
            .expect("run");
        assert_eq!(output.exit_code, 0);
        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_nonzero_exit_as_output() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(5));
        let output = supervisor
            .run(Uuid::now_v7(), sh("exit 3"), Duration::from_secs(10))
            .await
            .expect("run");
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_stderr() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(5));
        let output = supervisor
            .run(
                Uuid::now_v7(),
                sh("echo oops >&2; exit 1"),
                Duration::from_secs(10),
            )
            .await
            .expect("run");
        assert_eq!(output.exit_code, 1);
        assert!(output.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(5));
        let cmd = ToolCommand::new("/nonexistent/binary-xyz");
        let err = supervisor
            .run(Uuid::now_v7(), cmd, Duration::from_secs(10))
            .await
            .expect_err("should fail to launch");
        match err {
            GenoflowError::Launch(msg) => assert!(msg.contains("/nonexistent/binary-xyz")),
            other => panic!("Expected Launch, got: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process_promptly() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(5));
        let start = Instant::now();
        let err = supervisor
            .run(Uuid::now_v7(), sh("sleep 5"), Duration::from_secs(1))
            .await
            .expect_err("should time out");
        let elapsed = start.elapsed();
        match err {
            GenoflowError::Timeout(_) => {}
            other => panic!("Expected Timeout, got: {:?}", other),
        }
        assert!(
            elapsed < Duration::from_secs(3),
            "Timeout should land within ~1-2s, took {:?}",
            elapsed
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_terminates_running_process() {
        let supervisor = Arc::new(ProcessSupervisor::new(Duration::from_secs(2)));
        let job_id = Uuid::now_v7();

        let run_supervisor = Arc::clone(&supervisor);
        let handle = tokio::spawn(async move {
            run_supervisor
                .run(job_id, sh("sleep 5"), Duration::from_secs(30))
                .await
        });

        // Give the process time to start.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let start = Instant::now();
        assert!(supervisor.cancel(job_id).await, "cancel should find the job");

        let result = handle.await.expect("join");
        assert!(result.is_err(), "cancelled run should not yield output");
        assert!(
            start.elapsed() < Duration::from_secs(4),
            "terminate should land well before the sleep finishes"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_delivers_terminate_signal_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("term_marker");
        let supervisor = Arc::new(ProcessSupervisor::new(Duration::from_secs(2)));
        let job_id = Uuid::now_v7();

        // `wait` is interruptible, so the TERM trap runs as soon as the
        // signal arrives instead of after the sleep finishes.
        let script = format!(
            "trap 'touch {}; exit 0' TERM; sleep 30 & wait",
            marker.display()
        );
        let run_supervisor = Arc::clone(&supervisor);
        let handle = tokio::spawn(async move {
            run_supervisor
                .run(job_id, sh(&script), Duration::from_secs(30))
                .await
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(supervisor.cancel(job_id).await, "cancel should find the job");

        let result = handle.await.expect("join");
        assert!(result.is_err(), "cancelled run should not yield output");
        assert!(
            marker.exists(),
            "the process should have seen the terminate signal before any force kill"
        );
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_returns_false() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(5));
        assert!(!supervisor.cancel(Uuid::now_v7()).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_after_exit_returns_false() {
        let supervisor = ProcessSupervisor::new(Duration::from_secs(5));
        let job_id = Uuid::now_v7();
        supervisor
            .run(job_id, sh("true"), Duration::from_secs(10))
            .await
            .expect("run");
        assert!(!supervisor.cancel(job_id).await);
    }

    // --- MockToolRunner ---

    #[tokio::test]
    async fn test_mock_records_calls() {
        let runner = MockToolRunner::with_output_and_exit("done\n".to_string(), 0);
        let job_id = Uuid::now_v7();
        let cmd = ToolCommand::new("docker").arg("run");
        let output = runner
            .run(job_id, cmd.clone(), Duration::from_secs(10))
            .await
            .expect("run");
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "done\n");
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, job_id);
        assert_eq!(calls[0].1, cmd);
    }

    #[tokio::test]
    async fn test_mock_launch_error() {
        let runner = MockToolRunner::with_launch_error("docker not found");
        let err = runner
            .run(
                Uuid::now_v7(),
                ToolCommand::new("docker"),
                Duration::from_secs(10),
            )
            .await
            .expect_err("should fail");
        match err {
            GenoflowError::Launch(msg) => assert!(msg.contains("docker not found")),
            other => panic!("Expected Launch, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mock_delay_longer_than_timeout_times_out() {
        let runner = MockToolRunner::with_delay(Duration::from_secs(60), 0);
        let err = runner
            .run(
                Uuid::now_v7(),
                ToolCommand::new("docker"),
                Duration::from_millis(50),
            )
            .await
            .expect_err("should time out");
        assert!(matches!(err, GenoflowError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_mock_side_effect_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("marker.tsv");
        let marker_clone = marker.clone();
        let runner = MockToolRunner::with_side_effect(0, move |_, _| {
            std::fs::write(&marker_clone, "data")
        });
        runner
            .run(
                Uuid::now_v7(),
                ToolCommand::new("docker"),
                Duration::from_secs(10),
            )
            .await
            .expect("run");
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_mock_cancel_interrupts_in_flight_run() {
        let runner = Arc::new(MockToolRunner::with_delay(Duration::from_secs(30), 0));
        let job_id = Uuid::now_v7();

        let run_runner = Arc::clone(&runner);
        let handle = tokio::spawn(async move {
            run_runner
                .run(job_id, ToolCommand::new("docker"), Duration::from_secs(60))
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let start = Instant::now();
        assert!(runner.cancel(job_id).await);
        let result = handle.await.expect("join");
        assert!(matches!(result, Err(GenoflowError::Internal(_))));
        assert!(start.elapsed() < Duration::from_secs(2));

        assert!(!runner.cancel(job_id).await, "finished run is no longer in flight");
        assert_eq!(runner.cancel_calls(), vec![job_id, job_id]);
    }
}
