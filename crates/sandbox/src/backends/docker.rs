//! Docker backend driven through the `docker` CLI.
//!
//! Archive transfers use `docker cp` with `-` as the source or destination,
//! which streams a tar archive over stdin/stdout.

use crate::archive;
use crate::error::{SandboxError, SandboxResult};
use crate::traits::{ExecOutput, PathStat, SandboxId, SandboxRuntime, SandboxSpec};
use async_trait::async_trait;
use bytes::Bytes;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::instrument;

/// Sandbox runtime backed by a local Docker daemon.
pub struct DockerCliBackend {
    binary: String,
}

impl DockerCliBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run the CLI, optionally feeding `stdin`, and collect its output.
    ///
    /// The child is killed if the returned future is dropped.
    async fn run(&self, args: &[&str], stdin: Option<Bytes>) -> SandboxResult<Output> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            SandboxError::Config(format!(
                "failed to spawn {} (is it on PATH?): {e}",
                self.binary
            ))
        })?;

        let Some(data) = stdin else {
            return Ok(child.wait_with_output().await?);
        };

        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::TransferFailed("stdin pipe unavailable".to_string()))?;
        let writer = async move {
            let result = pipe.write_all(&data).await;
            drop(pipe);
            result
        };
        let (written, output) = tokio::join!(writer, child.wait_with_output());
        let output = output?;
        // A failed command closes stdin early; its own status explains why.
        if let Err(e) = written
            && output.status.success()
        {
            return Err(e.into());
        }
        Ok(output)
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("No such container")
        || stderr.contains("Could not find the file")
        || stderr.contains("No such file or directory")
}

/// Map a failed CLI invocation to `NotFound` or the caller's error kind.
fn failure(output: &Output, target: &str, kind: fn(String) -> SandboxError) -> SandboxError {
    let stderr = stderr_of(output);
    if is_not_found(&stderr) {
        SandboxError::NotFound(target.to_string())
    } else {
        kind(stderr)
    }
}

#[async_trait]
impl SandboxRuntime for DockerCliBackend {
    #[instrument(skip(self, spec), fields(backend = "docker", name = %spec.name))]
    async fn create(&self, spec: &SandboxSpec) -> SandboxResult<SandboxId> {
        let binds: Vec<String> = spec
            .binds
            .iter()
            .map(|b| format!("{}:{}", b.volume, b.mount_point))
            .collect();

        let mut args = vec!["create", "--name", spec.name.as_str()];
        for bind in &binds {
            args.push("-v");
            args.push(bind);
        }
        args.push(spec.image.as_str());
        args.extend(spec.command.iter().map(String::as_str));

        let output = self.run(&args, None).await?;
        if !output.status.success() {
            return Err(SandboxError::CreateFailed(stderr_of(&output)));
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(SandboxError::CreateFailed(
                "docker create printed no container id".to_string(),
            ));
        }
        Ok(SandboxId::new(id))
    }

    #[instrument(skip(self), fields(backend = "docker"))]
    async fn start(&self, id: &SandboxId) -> SandboxResult<()> {
        let output = self.run(&["start", id.as_str()], None).await?;
        if !output.status.success() {
            return Err(failure(&output, id.as_str(), SandboxError::StartFailed));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "docker"))]
    async fn stop(&self, id: &SandboxId, timeout: Duration) -> SandboxResult<()> {
        let secs = timeout.as_secs().to_string();
        let output = self.run(&["stop", "-t", &secs, id.as_str()], None).await?;
        if !output.status.success() {
            return Err(failure(&output, id.as_str(), SandboxError::StopFailed));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "docker"))]
    async fn remove(&self, id: &SandboxId, force: bool) -> SandboxResult<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(id.as_str());
        let output = self.run(&args, None).await?;
        if !output.status.success() {
            return Err(failure(&output, id.as_str(), SandboxError::RemoveFailed));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "docker"))]
    async fn exec(&self, id: &SandboxId, argv: &[String]) -> SandboxResult<ExecOutput> {
        let mut args = vec!["exec", id.as_str()];
        args.extend(argv.iter().map(String::as_str));
        let output = self.run(&args, None).await?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() && stderr.contains("No such container") {
            return Err(SandboxError::NotFound(id.to_string()));
        }
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
        })
    }

    #[instrument(skip(self, archive), fields(backend = "docker", size = archive.len()))]
    async fn copy_into(&self, id: &SandboxId, dest_dir: &str, archive: Bytes) -> SandboxResult<()> {
        let target = format!("{id}:{dest_dir}");
        let output = self.run(&["cp", "-", &target], Some(archive)).await?;
        if !output.status.success() {
            return Err(failure(&output, &target, SandboxError::TransferFailed));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "docker"))]
    async fn copy_from(&self, id: &SandboxId, src_path: &str) -> SandboxResult<(Bytes, PathStat)> {
        let source = format!("{id}:{src_path}");
        let output = self.run(&["cp", &source, "-"], None).await?;
        if !output.status.success() {
            return Err(failure(&output, &source, SandboxError::TransferFailed));
        }
        let data = Bytes::from(output.stdout);
        let stat = archive::stream_stat(&data)?;
        Ok((data, stat))
    }

    fn backend_name(&self) -> &'static str {
        "docker"
    }
}
