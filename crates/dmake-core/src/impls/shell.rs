use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::ports::{CommandOutput, CommandRunner};

/// Runs each command with `sh -c` inside a working directory.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    dir: PathBuf,
}

impl ShellRunner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn process_output(command: &str, result: std::io::Result<std::process::Output>) -> CommandOutput {
        match result {
            Ok(output) => {
                let success = output.status.success();
                let exit_code = output.status.code();
                let mut combined = output.stdout;
                combined.extend_from_slice(&output.stderr);

                if success {
                    tracing::debug!(command, "command succeeded");
                } else {
                    tracing::warn!(
                        command,
                        exit_code = ?exit_code,
                        output = %String::from_utf8_lossy(&combined),
                        "command failed"
                    );
                }
                CommandOutput {
                    success,
                    output: combined,
                }
            }
            Err(e) => {
                tracing::error!(command, error = %e, "command could not be started");
                CommandOutput::failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> CommandOutput {
        tracing::info!(command, dir = %self.dir.display(), "running");
        let result = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;
        Self::process_output(command, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("true", true)]
    #[case("false", false)]
    #[case("exit 3", false)]
    #[tokio::test]
    async fn exit_status_decides_success(#[case] command: &str, #[case] success: bool) {
        let dir = tempfile::tempdir().unwrap();
        let output = ShellRunner::new(dir.path()).run(command).await;
        assert_eq!(output.success, success);
    }

    #[tokio::test]
    async fn runs_in_working_directory_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ShellRunner::new(dir.path());

        let output = runner.run("echo hello > out.txt && cat out.txt && echo oops >&2").await;

        assert!(output.success);
        assert!(dir.path().join("out.txt").exists());
        let text = String::from_utf8(output.output).unwrap();
        assert!(text.contains("hello"));
        assert!(text.contains("oops"));
    }

    #[tokio::test]
    async fn missing_directory_is_a_failure() {
        let output = ShellRunner::new("/nonexistent/dmake/dir").run("true").await;
        assert!(!output.success);
    }
}
