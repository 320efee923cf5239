//! CommandRunner port: executes one rule command.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub success: bool,
    /// Combined stdout and stderr.
    pub output: Vec<u8>,
}

impl CommandOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            output: Vec::new(),
        }
    }

    pub fn failed(output: impl Into<Vec<u8>>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command`. A command that cannot be started is reported as an
    /// unsuccessful output, not an error.
    async fn run(&self, command: &str) -> CommandOutput;
}
