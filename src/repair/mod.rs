//! Tool-calling build repair.
//!
//! ## State machine
//!
//! ```text
//! Generating(iteration = 1)
//!     │ build failed
//!     ▼
//! AwaitingToolCall ──turn──> ExecutingTool ──results──> AwaitingToolCall
//!     │                                                      │
//!     │ task_complete                  turn/iteration ceiling│
//!     ▼                                                      ▼
//!   Done                                           Failed(exhausted)
//! ```
//!
//! One model turn per iteration. Tool calls of a turn run strictly in order,
//! and their results go back with the next turn. Only the model's
//! `task_complete` call ends the loop early; a passing build does not.

pub mod tools;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::llm::{TurnInput, ToolModel};
use crate::sandbox::{CommandRunner, FileChannel, SandboxHandle};
use crate::stream::{ProgressEvent, ProgressSink};
use crate::util::truncate_tail;

pub use tools::{ToolContext, ToolDispatcher, tool_specs};

pub const REPAIR_SYSTEM_PROMPT: &str = r#"You are fixing build errors in a React + TypeScript + Tailwind project generated from a UI sketch.

You have exactly five tools:
- read_file(path): read a file
- write_file(path, content): replace a file's full content
- run_command(command, cwd?): run a shell command, e.g. the build
- list_files(path): list a directory
- task_complete(success, message): finish

Rules:
- Keep the visual design identical; only fix code-level errors.
- Always write complete file contents, never fragments or diffs.
- Do not add comments to the code.
- After each fix, run the build to verify it.
- Call task_complete(success=true) once the build passes. If you cannot fix it, call task_complete(success=false) with the reason."#;

pub const CONTINUE_NUDGE: &str =
    "Continue fixing the build. Run the build to check your changes and call task_complete when it passes.";

/// State of one repair attempt within a request.
#[derive(Debug, Clone)]
pub struct RepairSession {
    /// Request-wide counter; generation + first build is iteration 1.
    pub iteration: u32,
    pub max_iterations: u32,
    /// Set only by the model's `task_complete` call.
    pub task_complete: bool,
    /// The `success` argument of that call.
    pub reported_success: Option<bool>,
    /// Most recent content written to the component path.
    pub current_code: String,
}

impl RepairSession {
    pub fn new(max_iterations: u32, code: impl Into<String>) -> Self {
        Self {
            iteration: 1,
            max_iterations,
            task_complete: false,
            reported_success: None,
            current_code: code.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.task_complete && self.reported_success == Some(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The model called `task_complete`.
    Completed,
    /// `max_repair_turns` model turns without completion.
    TurnLimit,
    /// The request-wide iteration ceiling was reached.
    IterationLimit,
    /// The model could not be reached; the loop cannot continue.
    ModelFailed(String),
    /// The client went away.
    Cancelled,
}

impl StopReason {
    pub fn describe(&self) -> String {
        match self {
            StopReason::Completed => "Repair finished".to_string(),
            StopReason::TurnLimit | StopReason::IterationLimit => {
                "Max iterations reached".to_string()
            }
            StopReason::ModelFailed(e) => format!("Repair stopped: {}", e),
            StopReason::Cancelled => "Client disconnected".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub stop: StopReason,
    pub turns: u32,
}

#[derive(Debug, Clone)]
pub struct RepairSettings {
    pub max_repair_turns: u32,
    pub temperature: f32,
    pub diagnostic_chars: usize,
    pub tools: ToolContext,
}

#[derive(Clone)]
pub struct RepairAgent {
    model: Arc<dyn ToolModel>,
    runner: CommandRunner,
    files: FileChannel,
    settings: RepairSettings,
}

impl RepairAgent {
    pub fn new(
        model: Arc<dyn ToolModel>,
        runner: CommandRunner,
        files: FileChannel,
        settings: RepairSettings,
    ) -> Self {
        Self {
            model,
            runner,
            files,
            settings,
        }
    }

    /// First-turn message: the failing component and its diagnostics.
    pub fn initial_instruction(&self, code: &str, diagnostics: &str) -> String {
        format!(
            "The build of this project failed.\n\nComponent ({path}):\n```tsx\n{code}\n```\n\nBuild output:\n```\n{diag}\n```\n\nFix the errors. The build command is `{build}` in {dir}.",
            path = self.settings.tools.component_path,
            code = code,
            diag = truncate_tail(diagnostics, self.settings.diagnostic_chars),
            build = self.settings.tools.build_command,
            dir = self.settings.tools.project_dir,
        )
    }

    /// Drive the conversation until `task_complete`, a ceiling, a model
    /// failure, or client disconnect. Tool failures never end the loop.
    pub async fn run(
        &self,
        handle: &SandboxHandle,
        session: &mut RepairSession,
        diagnostics: &str,
        sink: &ProgressSink,
    ) -> RepairOutcome {
        let mut turns = 0;
        let finish = |stop: StopReason, turns: u32| RepairOutcome { stop, turns };

        let specs = tool_specs();
        let mut conversation = match self
            .model
            .start_conversation(REPAIR_SYSTEM_PROMPT, &specs, self.settings.temperature)
            .await
        {
            Ok(conversation) => conversation,
            Err(e) => {
                warn!(sandbox_id = %handle.id, error = %e, "could not start repair conversation");
                return finish(StopReason::ModelFailed(e.to_string()), turns);
            }
        };

        let dispatcher = ToolDispatcher {
            runner: &self.runner,
            files: &self.files,
            handle,
            context: &self.settings.tools,
        };
        let mut pending_results = Vec::new();

        while !session.task_complete {
            if sink.is_closed() {
                return finish(StopReason::Cancelled, turns);
            }
            if turns >= self.settings.max_repair_turns {
                info!(sandbox_id = %handle.id, turns, "repair turn ceiling reached");
                return finish(StopReason::TurnLimit, turns);
            }
            if session.iteration >= session.max_iterations {
                info!(sandbox_id = %handle.id, iteration = session.iteration, "iteration ceiling reached");
                return finish(StopReason::IterationLimit, turns);
            }

            turns += 1;
            session.iteration += 1;
            sink.emit(ProgressEvent::Iteration {
                current: session.iteration,
                max: session.max_iterations,
            });

            let text = if turns == 1 {
                self.initial_instruction(&session.current_code, diagnostics)
            } else {
                CONTINUE_NUDGE.to_string()
            };
            let input = TurnInput {
                text: Some(text),
                tool_results: std::mem::take(&mut pending_results),
            };

            let turn = match conversation.send(input).await {
                Ok(turn) => turn,
                Err(e) => {
                    warn!(sandbox_id = %handle.id, iteration = session.iteration, error = %e, "model turn failed");
                    sink.log(format!("Model request failed: {}", e));
                    return finish(StopReason::ModelFailed(e.to_string()), turns);
                }
            };

            if turn.tool_calls.is_empty() {
                let text = turn.free_text.trim();
                info!(sandbox_id = %handle.id, iteration = session.iteration, text = %text, "turn without tool calls");
                if !text.is_empty() {
                    sink.log(crate::util::truncate_str(text, 300));
                }
                continue;
            }

            for call in &turn.tool_calls {
                if session.task_complete {
                    debug!(tool = %call.name, "skipping tool call after task_complete");
                    break;
                }
                if sink.is_closed() {
                    return finish(StopReason::Cancelled, turns);
                }
                debug!(sandbox_id = %handle.id, iteration = session.iteration, tool = %call.name, "dispatching tool");
                let result = dispatcher.dispatch(call, session, sink).await;
                pending_results.push(result);
            }
        }

        info!(sandbox_id = %handle.id, iteration = session.iteration, success = session.succeeded(), "repair complete");
        finish(StopReason::Completed, turns)
    }
}
