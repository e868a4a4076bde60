use log::debug;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::CiteError;

/// A single prompt sent to the language-model service.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub model: Option<String>,
    /// Documents the service should read alongside the prompt.
    pub attachments: Vec<PathBuf>,
    pub timeout: Duration,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>, timeout: Duration) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            attachments: Vec::new(),
            timeout,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<PathBuf>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// A text-in/text-out language-model service.
///
/// Implementations must honour `request.timeout` and release any resources
/// (child processes included) when the returned future is dropped.
pub trait LlmService: Send + Sync {
    fn name(&self) -> &str;

    fn complete<'a>(
        &'a self,
        request: LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, CiteError>> + Send + 'a>>;
}

/// Runs a Claude-style CLI: `<command> [--model m] -p <prompt> [files...]`.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    pub command: String,
}

impl ClaudeCli {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn build_command(&self, request: &LlmRequest) -> Command {
        let mut cmd = Command::new(&self.command);
        if let Some(model) = &request.model {
            cmd.arg("--model").arg(model);
        }
        cmd.arg("-p").arg(&request.prompt);
        for path in &request.attachments {
            cmd.arg(path);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for ClaudeCli {
    fn default() -> Self {
        Self::new("claude")
    }
}

impl LlmService for ClaudeCli {
    fn name(&self) -> &str {
        &self.command
    }

    fn complete<'a>(
        &'a self,
        request: LlmRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, CiteError>> + Send + 'a>> {
        Box::pin(async move {
            let child = self.build_command(&request).spawn().map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CiteError::ToolNotFound(self.command.clone()),
                _ => CiteError::io(PathBuf::from(&self.command), e),
            })?;
            debug!(
                "Started {} (prompt {} chars, {} attachments)",
                self.command,
                request.prompt.len(),
                request.attachments.len()
            );

            // Dropping the child on timeout kills it
            let output = tokio::time::timeout(request.timeout, child.wait_with_output())
                .await
                .map_err(|_| CiteError::Timeout {
                    tool: self.command.clone(),
                    after: request.timeout,
                })?
                .map_err(|e| CiteError::io(PathBuf::from(&self.command), e))?;

            if !output.status.success() {
                return Err(CiteError::ToolFailed {
                    tool: self.command.clone(),
                    status: output.status.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        })
    }
}
