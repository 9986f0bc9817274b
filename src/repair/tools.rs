//! Tool table for the repair conversation.
//!
//! Each handler runs one sandbox operation and renders the outcome as text.
//! Failures become `Error: ...` results instead of propagating, so the model
//! sees them and can correct course.

use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use super::RepairSession;
use crate::llm::{ToolCall, ToolResult, ToolSpec};
use crate::sandbox::{CommandRunner, FileChannel, RunOptions, SandboxHandle};
use crate::stream::ProgressSink;
use crate::util::{truncate_str, truncate_tail};

pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";
pub const RUN_COMMAND: &str = "run_command";
pub const LIST_FILES: &str = "list_files";
pub const TASK_COMPLETE: &str = "task_complete";

/// The five tools offered to the model.
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: READ_FILE.to_string(),
            description: "Read the full content of a file in the project.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Absolute path, or relative to the project root"}
                },
                "required": ["path"]
            }),
        },
        ToolSpec {
            name: WRITE_FILE.to_string(),
            description: "Replace the full content of a file in the project.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Absolute path, or relative to the project root"},
                    "content": {"type": "string", "description": "Complete new file content"}
                },
                "required": ["path", "content"]
            }),
        },
        ToolSpec {
            name: RUN_COMMAND.to_string(),
            description: "Run a shell command in the project and return its exit code and output.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "cwd": {"type": "string", "description": "Working directory, defaults to the project root"}
                },
                "required": ["command"]
            }),
        },
        ToolSpec {
            name: LIST_FILES.to_string(),
            description: "List the entries of a directory in the project.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"}
                },
                "required": ["path"]
            }),
        },
        ToolSpec {
            name: TASK_COMPLETE.to_string(),
            description: "Call when the build passes, or when you cannot make further progress.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "success": {"type": "boolean", "description": "Whether the build now passes"},
                    "message": {"type": "string", "description": "Short summary of what was fixed"}
                },
                "required": ["success", "message"]
            }),
        },
    ]
}

/// Settings the handlers need; borrowed from the agent for one dispatch.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub project_dir: String,
    pub component_path: String,
    pub build_command: String,
    pub command_timeout: Duration,
    pub build_timeout: Duration,
    pub max_output_chars: usize,
}

impl ToolContext {
    fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            let rel = path.trim_start_matches("./");
            format!("{}/{}", self.project_dir.trim_end_matches('/'), rel)
        }
    }

    fn is_build_command(&self, command: &str) -> bool {
        command.contains(&self.build_command)
            || command.contains("npm run build")
            || command.contains("vite build")
    }
}

pub struct ToolDispatcher<'a> {
    pub runner: &'a CommandRunner,
    pub files: &'a FileChannel,
    pub handle: &'a SandboxHandle,
    pub context: &'a ToolContext,
}

fn missing_arg(name: &str) -> String {
    format!("missing required argument '{}'", name)
}

impl ToolDispatcher<'_> {
    /// Execute one tool call against the sandbox.
    pub async fn dispatch(
        &self,
        call: &ToolCall,
        session: &mut RepairSession,
        sink: &ProgressSink,
    ) -> ToolResult {
        let outcome = match call.name.as_str() {
            READ_FILE => self.read_file(call).await,
            WRITE_FILE => self.write_file(call, session, sink).await,
            RUN_COMMAND => self.run_command(call, sink).await,
            LIST_FILES => self.list_files(call).await,
            TASK_COMPLETE => Ok(self.task_complete(call, session, sink)),
            other => Err(format!("unknown tool '{}'", other)),
        };

        match outcome {
            Ok(content) => ToolResult {
                call_id: call.id.clone(),
                content,
                is_error: false,
            },
            Err(message) => {
                warn!(sandbox_id = %self.handle.id, tool = %call.name, error = %message, "tool call failed");
                ToolResult {
                    call_id: call.id.clone(),
                    content: format!("Error: {}", message),
                    is_error: true,
                }
            }
        }
    }

    async fn read_file(&self, call: &ToolCall) -> Result<String, String> {
        let path = call.str_arg("path").ok_or_else(|| missing_arg("path"))?;
        let path = self.context.resolve(path);
        self.files
            .read(self.handle, &path)
            .await
            .map_err(|e| e.to_string())
    }

    async fn write_file(
        &self,
        call: &ToolCall,
        session: &mut RepairSession,
        sink: &ProgressSink,
    ) -> Result<String, String> {
        let path = call.str_arg("path").ok_or_else(|| missing_arg("path"))?;
        let content = call.str_arg("content").ok_or_else(|| missing_arg("content"))?;
        let path = self.context.resolve(path);

        self.files
            .write(self.handle, &path, content)
            .await
            .map_err(|e| e.to_string())?;

        if path == self.context.component_path {
            session.current_code = content.to_string();
            sink.code(content);
            info!(sandbox_id = %self.handle.id, iteration = session.iteration, "component updated");
        }
        Ok(format!("Wrote {} bytes to {}", content.len(), path))
    }

    async fn run_command(&self, call: &ToolCall, sink: &ProgressSink) -> Result<String, String> {
        let command = call
            .str_arg("command")
            .ok_or_else(|| missing_arg("command"))?;
        let cwd = call
            .str_arg("cwd")
            .map(|c| self.context.resolve(c))
            .unwrap_or_else(|| self.context.project_dir.clone());
        let is_build = self.context.is_build_command(command);
        let timeout = if is_build {
            self.context.build_timeout
        } else {
            self.context.command_timeout
        };

        sink.log(format!("Running: {}", truncate_str(command, 80)));
        let output = self
            .runner
            .run(self.handle, command, &RunOptions::new(cwd, timeout))
            .await
            .map_err(|e| e.to_string())?;

        if is_build && output.success() {
            // Completion stays the model's call.
            sink.log("Build succeeded");
        }

        let body = truncate_tail(&output.combined(), self.context.max_output_chars);
        if body.is_empty() {
            Ok(format!("Exit code: {}", output.exit_code))
        } else {
            Ok(format!("Exit code: {}\n{}", output.exit_code, body))
        }
    }

    async fn list_files(&self, call: &ToolCall) -> Result<String, String> {
        let path = call.str_arg("path").ok_or_else(|| missing_arg("path"))?;
        let path = self.context.resolve(path);
        let names = self
            .files
            .list(self.handle, &path)
            .await
            .map_err(|e| e.to_string())?;
        if names.is_empty() {
            Ok("(empty directory)".to_string())
        } else {
            Ok(names.join("\n"))
        }
    }

    fn task_complete(
        &self,
        call: &ToolCall,
        session: &mut RepairSession,
        sink: &ProgressSink,
    ) -> String {
        let success = call.bool_arg("success").unwrap_or(false);
        let message = call.str_arg("message").unwrap_or("").trim();

        session.task_complete = true;
        session.reported_success = Some(success);

        if success {
            info!(sandbox_id = %self.handle.id, iteration = session.iteration, "model reported task complete");
        } else {
            warn!(sandbox_id = %self.handle.id, iteration = session.iteration, reason = message, "model gave up");
        }
        if !message.is_empty() {
            sink.log(message.to_string());
        }
        "Task marked complete.".to_string()
    }
}
