//! Running the extractor from the graph.

use super::failed;
use crate::config::{ChartflowConfig, SpotifyConfig};
use crate::context::{ExecutionContext, StageContext};
use crate::core::StageOutput;
use crate::errors::ChartflowError;
use crate::extract::Extractor;
use crate::stages::Stage;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::info;

/// Starts one extraction for a date and waits for it.
#[async_trait]
pub trait ExtractLauncher: Send + Sync + Debug {
    /// Runs the extraction.
    async fn launch(&self, date: NaiveDate) -> Result<(), ChartflowError>;
}

/// Runs `<program> extract --date <date>` as a child process.
///
/// API credentials travel through `CLIENTID` / `CLIENTSECRET`.
#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    program: PathBuf,
    config_path: Option<PathBuf>,
    spotify: SpotifyConfig,
}

impl SubprocessLauncher {
    /// Creates a launcher for an explicit program.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, spotify: SpotifyConfig) -> Self {
        Self {
            program: program.into(),
            config_path: None,
            spotify,
        }
    }

    /// Uses `scheduler.extractor_command`, falling back to the running binary.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the running binary cannot be located.
    pub fn from_config(config: &ChartflowConfig) -> Result<Self, ChartflowError> {
        let program = match &config.scheduler.extractor_command {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };
        Ok(Self::new(program, config.spotify.clone()))
    }

    /// Forwards `--config` to the child.
    #[must_use]
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }
}

#[async_trait]
impl ExtractLauncher for SubprocessLauncher {
    async fn launch(&self, date: NaiveDate) -> Result<(), ChartflowError> {
        let mut command = Command::new(&self.program);
        command
            .arg("extract")
            .arg("--date")
            .arg(date.format("%Y-%m-%d").to_string())
            .env("CLIENTID", self.spotify.client_id.expose())
            .env("CLIENTSECRET", self.spotify.client_secret.expose())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }

        info!(program = %self.program.display(), %date, "Starting extractor");
        let mut child = command.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (_, tail, status) = tokio::join!(
            forward_lines(stdout, "stdout", 0),
            forward_lines(stderr, "stderr", STDERR_TAIL),
            child.wait(),
        );
        let status = status?;

        if status.success() {
            Ok(())
        } else {
            Err(ChartflowError::StageExecution(format!(
                "extractor exited with {status}: {}",
                tail.join(" | ")
            )))
        }
    }
}

const STDERR_TAIL: usize = 5;

/// Re-emits every line of a child stream as a log event and returns the
/// last `keep` lines.
async fn forward_lines<R>(stream: Option<R>, name: &'static str, keep: usize) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(keep);
    let Some(stream) = stream else {
        return Vec::new();
    };

    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "chartflow::extractor", stream = name, "{line}");
        if keep == 0 {
            continue;
        }
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

/// Runs an [`Extractor`] inside the scheduler process.
#[derive(Debug, Clone)]
pub struct InProcessLauncher {
    extractor: Extractor,
}

impl InProcessLauncher {
    /// Wraps an extractor.
    #[must_use]
    pub fn new(extractor: Extractor) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl ExtractLauncher for InProcessLauncher {
    async fn launch(&self, date: NaiveDate) -> Result<(), ChartflowError> {
        self.extractor.run(date).await?;
        Ok(())
    }
}

/// `extract_and_upload_to_s3`.
#[derive(Debug, Clone)]
pub struct ExtractStage {
    name: String,
    launcher: Arc<dyn ExtractLauncher>,
}

impl ExtractStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(name: impl Into<String>, launcher: Arc<dyn ExtractLauncher>) -> Self {
        Self {
            name: name.into(),
            launcher,
        }
    }
}

#[async_trait]
impl Stage for ExtractStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let date = ctx.run_date();
        match self.launcher.launch(date).await {
            Ok(()) => StageOutput::ok_value("run_date", serde_json::json!(date)),
            Err(e) => failed(&self.name, e),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("fake-extractor.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn spotify() -> SpotifyConfig {
        SpotifyConfig {
            client_id: "cid".into(),
            client_secret: "csecret".into(),
            ..SpotifyConfig::default()
        }
    }

    #[tokio::test]
    async fn test_subprocess_receives_date_and_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let program = script(
            dir.path(),
            &format!("echo \"$@ $CLIENTID $CLIENTSECRET\" > {}", out.display()),
        );

        let launcher = SubprocessLauncher::new(program, spotify())
            .with_config_path(Some(PathBuf::from("/etc/chartflow.toml")));
        launcher
            .launch(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
            .await
            .unwrap();

        let written = std::fs::read_to_string(out).unwrap();
        assert_eq!(
            written.trim(),
            "extract --date 2024-02-29 --config /etc/chartflow.toml cid csecret"
        );
    }

    #[tokio::test]
    async fn test_subprocess_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(dir.path(), "echo 'bucket missing' >&2\nexit 3");

        let err = SubprocessLauncher::new(program, spotify())
            .launch(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("bucket missing"), "{message}");
    }

    #[tokio::test]
    async fn test_successful_child_output_is_drained() {
        let dir = tempfile::tempdir().unwrap();
        // More than a pipe buffer on each stream.
        let program = script(
            dir.path(),
            "i=0\nwhile [ $i -lt 2000 ]; do echo \"line $i of the extractor log\"; echo \"warn $i\" >&2; i=$((i+1)); done",
        );

        SubprocessLauncher::new(program, spotify())
            .launch(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_forward_lines_keeps_the_tail() {
        let body: &[u8] = b"one\ntwo\nthree\nfour\nfive\nsix\nseven\n";

        let tail = forward_lines(Some(body), "stderr", 5).await;
        assert_eq!(tail, vec!["three", "four", "five", "six", "seven"]);

        assert!(forward_lines(Some(body), "stdout", 0).await.is_empty());
        assert!(forward_lines(None::<&[u8]>, "stdout", 5).await.is_empty());
    }
}
