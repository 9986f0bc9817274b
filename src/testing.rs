//! Scripted doubles for the sandbox provider and the generation model.
//!
//! Used by unit tests and `tests/pipeline_scenarios.rs`, so the whole
//! pipeline runs without Docker or network access. Outside this crate's own
//! unit tests it needs the `testing` feature.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{SandboxSection, SketchpadToml};
use crate::errors::{ModelError, SandboxError};
use crate::llm::{
    AgentTurn, CodeModel, PromptPart, ToolCall, ToolModel, ToolSession, ToolSpec, TurnInput,
};
use crate::sandbox::{CommandOutput, SandboxProvider};

/// A 1x1 PNG as a data URL.
pub const TEST_IMAGE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Default sandbox settings with no startup wait.
pub fn test_sandbox_section() -> SandboxSection {
    SandboxSection {
        startup_grace_secs: 0,
        ..SandboxSection::default()
    }
}

/// Full configuration with [`test_sandbox_section`] and default ceilings.
pub fn test_config() -> SketchpadToml {
    SketchpadToml {
        sandbox: test_sandbox_section(),
        ..SketchpadToml::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOp {
    Create { template: String },
    Connect { id: String },
    Run { id: String, command: String },
    Write { id: String, path: String },
    Read { id: String, path: String },
    List { id: String, path: String },
    Endpoint { id: String, port: u16 },
    Kill { id: String },
}

#[derive(Default)]
struct FakeSandbox {
    files: BTreeMap<String, String>,
    commands: Vec<String>,
    last_cwd: Option<String>,
}

struct CommandScript {
    pattern: String,
    outputs: VecDeque<CommandOutput>,
}

struct BuildScript {
    pattern: String,
    path: String,
    needle: String,
    diagnostic: String,
}

#[derive(Default)]
struct ProviderState {
    next_id: usize,
    created: usize,
    sandboxes: HashMap<String, FakeSandbox>,
    scripts: Vec<CommandScript>,
    builds: Vec<BuildScript>,
    delays: Vec<(String, Duration)>,
    ops: Vec<ProviderOp>,
    fail_create: Option<String>,
    failing_writes: usize,
}

/// In-memory [`SandboxProvider`]. Commands succeed with empty output unless
/// scripted; files live in a per-sandbox map.
#[derive(Default)]
pub struct ScriptedProvider {
    state: Mutex<ProviderState>,
}

fn output(exit_code: i64, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live sandbox without going through `create`.
    pub fn seed_sandbox(&self) -> String {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = format!("sbx-{}", state.next_id);
        state.sandboxes.insert(id.clone(), FakeSandbox::default());
        id
    }

    /// Simulate the provider reaping a sandbox on its own.
    pub fn forget_sandbox(&self, id: &str) {
        lock(&self.state).sandboxes.remove(id);
    }

    pub fn is_alive(&self, id: &str) -> bool {
        lock(&self.state).sandboxes.contains_key(id)
    }

    /// Commands containing `pattern` return this output.
    pub fn script_command(&self, pattern: &str, exit_code: i64, stdout: &str, stderr: &str) {
        self.script_sequence(pattern, vec![(exit_code, stdout, stderr)]);
    }

    /// Commands containing `pattern` return these outputs in order, then keep
    /// returning the last one.
    pub fn script_sequence(&self, pattern: &str, outputs: Vec<(i64, &str, &str)>) {
        lock(&self.state).scripts.push(CommandScript {
            pattern: pattern.to_string(),
            outputs: outputs
                .into_iter()
                .map(|(code, out, err)| output(code, out, err))
                .collect(),
        });
    }

    /// Commands containing `pattern` fail with `diagnostic` until the file at
    /// `path` contains `needle`.
    pub fn script_build_until(&self, pattern: &str, path: &str, needle: &str, diagnostic: &str) {
        lock(&self.state).builds.push(BuildScript {
            pattern: pattern.to_string(),
            path: path.to_string(),
            needle: needle.to_string(),
            diagnostic: diagnostic.to_string(),
        });
    }

    /// Commands containing `pattern` take `delay` before returning.
    pub fn script_delay(&self, pattern: &str, delay: Duration) {
        lock(&self.state).delays.push((pattern.to_string(), delay));
    }

    pub fn fail_create(&self, message: &str) {
        lock(&self.state).fail_create = Some(message.to_string());
    }

    pub fn fail_next_writes(&self, count: usize) {
        lock(&self.state).failing_writes = count;
    }

    pub fn put_file(&self, id: &str, path: &str, content: &str) {
        let mut state = lock(&self.state);
        if let Some(sandbox) = state.sandboxes.get_mut(id) {
            sandbox.files.insert(path.to_string(), content.to_string());
        }
    }

    pub fn file(&self, id: &str, path: &str) -> Option<String> {
        lock(&self.state)
            .sandboxes
            .get(id)
            .and_then(|s| s.files.get(path).cloned())
    }

    /// Commands run in `id`, in order.
    pub fn commands(&self, id: &str) -> Vec<String> {
        lock(&self.state)
            .sandboxes
            .get(id)
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }

    pub fn last_cwd(&self, id: &str) -> Option<String> {
        lock(&self.state)
            .sandboxes
            .get(id)
            .and_then(|s| s.last_cwd.clone())
    }

    pub fn created_count(&self) -> usize {
        lock(&self.state).created
    }

    pub fn ops(&self) -> Vec<ProviderOp> {
        lock(&self.state).ops.clone()
    }

    fn record(&self, op: ProviderOp) {
        lock(&self.state).ops.push(op);
    }

    fn missing(id: &str) -> SandboxError {
        SandboxError::NotFound { id: id.to_string() }
    }

    fn scripted_output(state: &mut ProviderState, id: &str, command: &str) -> CommandOutput {
        for build in state.builds.iter().rev() {
            if command.contains(&build.pattern) {
                let fixed = state
                    .sandboxes
                    .get(id)
                    .and_then(|s| s.files.get(&build.path))
                    .is_some_and(|content| content.contains(&build.needle));
                return if fixed {
                    output(0, "build ok", "")
                } else {
                    output(1, "", &build.diagnostic)
                };
            }
        }
        for script in state.scripts.iter_mut().rev() {
            if command.contains(&script.pattern) {
                let next = if script.outputs.len() > 1 {
                    script.outputs.pop_front()
                } else {
                    script.outputs.front().cloned()
                };
                return next.unwrap_or_default();
            }
        }
        CommandOutput::default()
    }
}

#[async_trait]
impl SandboxProvider for ScriptedProvider {
    async fn create(&self, template: &str, _timeout: Duration) -> Result<String, SandboxError> {
        let mut state = lock(&self.state);
        state.ops.push(ProviderOp::Create {
            template: template.to_string(),
        });
        if let Some(message) = &state.fail_create {
            return Err(SandboxError::Provision(message.clone()));
        }
        state.next_id += 1;
        state.created += 1;
        let id = format!("sbx-{}", state.next_id);
        state.sandboxes.insert(id.clone(), FakeSandbox::default());
        Ok(id)
    }

    async fn connect(&self, id: &str) -> Result<(), SandboxError> {
        self.record(ProviderOp::Connect { id: id.to_string() });
        if self.is_alive(id) {
            Ok(())
        } else {
            Err(Self::missing(id))
        }
    }

    async fn run(
        &self,
        id: &str,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<CommandOutput, SandboxError> {
        let delay = {
            let mut state = lock(&self.state);
            state.ops.push(ProviderOp::Run {
                id: id.to_string(),
                command: command.to_string(),
            });
            let sandbox = state.sandboxes.get_mut(id).ok_or_else(|| Self::missing(id))?;
            sandbox.commands.push(command.to_string());
            sandbox.last_cwd = cwd.map(str::to_string);
            state
                .delays
                .iter()
                .rev()
                .find(|(pattern, _)| command.contains(pattern))
                .map(|(_, d)| *d)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = lock(&self.state);
        Ok(Self::scripted_output(&mut state, id, command))
    }

    async fn write_file(&self, id: &str, path: &str, content: &str) -> Result<(), SandboxError> {
        let mut state = lock(&self.state);
        state.ops.push(ProviderOp::Write {
            id: id.to_string(),
            path: path.to_string(),
        });
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(SandboxError::Provider("transient write failure".to_string()));
        }
        let sandbox = state.sandboxes.get_mut(id).ok_or_else(|| Self::missing(id))?;
        sandbox.files.insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn read_file(&self, id: &str, path: &str) -> Result<String, SandboxError> {
        let mut state = lock(&self.state);
        state.ops.push(ProviderOp::Read {
            id: id.to_string(),
            path: path.to_string(),
        });
        let sandbox = state.sandboxes.get(id).ok_or_else(|| Self::missing(id))?;
        sandbox
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| SandboxError::FileNotFound {
                path: path.to_string(),
            })
    }

    async fn list_files(&self, id: &str, path: &str) -> Result<Vec<String>, SandboxError> {
        let mut state = lock(&self.state);
        state.ops.push(ProviderOp::List {
            id: id.to_string(),
            path: path.to_string(),
        });
        let sandbox = state.sandboxes.get(id).ok_or_else(|| Self::missing(id))?;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let names: BTreeSet<String> = sandbox
            .files
            .keys()
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            return Err(SandboxError::FileNotFound {
                path: path.to_string(),
            });
        }
        Ok(names.into_iter().collect())
    }

    async fn endpoint(&self, id: &str, port: u16) -> Result<String, SandboxError> {
        self.record(ProviderOp::Endpoint {
            id: id.to_string(),
            port,
        });
        if self.is_alive(id) {
            Ok(format!("https://{}-{}.sandbox.test", port, id))
        } else {
            Err(Self::missing(id))
        }
    }

    async fn kill(&self, id: &str) -> Result<(), SandboxError> {
        let mut state = lock(&self.state);
        state.ops.push(ProviderOp::Kill { id: id.to_string() });
        state
            .sandboxes
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Self::missing(id))
    }
}

/// [`CodeModel`] that replays canned responses and records every call.
pub struct ScriptedCodeModel {
    responses: Mutex<VecDeque<Result<String, ModelError>>>,
    calls: Mutex<Vec<(Vec<PromptPart>, f32)>>,
}

impl ScriptedCodeModel {
    pub fn new(responses: Vec<Result<String, ModelError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Responds once with `code` wrapped in a tsx fence.
    pub fn with_code(code: &str) -> Self {
        Self::new(vec![Ok(format!("Here is the component:\n```tsx\n{}\n```", code))])
    }

    pub fn calls(&self) -> Vec<(Vec<PromptPart>, f32)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl CodeModel for ScriptedCodeModel {
    async fn generate(
        &self,
        parts: &[PromptPart],
        temperature: f32,
    ) -> Result<String, ModelError> {
        lock(&self.calls).push((parts.to_vec(), temperature));
        lock(&self.responses)
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Unavailable("no scripted response left".into())))
    }
}

#[derive(Default)]
struct ToolScript {
    turns: VecDeque<Result<AgentTurn, ModelError>>,
    fallback: Option<AgentTurn>,
    inputs: Vec<TurnInput>,
    systems: Vec<String>,
}

/// [`ToolModel`] that replays canned turns and records every input.
#[derive(Clone)]
pub struct ScriptedToolModel {
    script: Arc<Mutex<ToolScript>>,
}

impl ScriptedToolModel {
    pub fn new(turns: Vec<Result<AgentTurn, ModelError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(ToolScript {
                turns: turns.into(),
                ..ToolScript::default()
            })),
        }
    }

    /// Once the scripted turns run out, answer every turn with `turn`.
    pub fn repeat_when_exhausted(self, turn: AgentTurn) -> Self {
        lock(&self.script).fallback = Some(turn);
        self
    }

    pub fn inputs(&self) -> Vec<TurnInput> {
        lock(&self.script).inputs.clone()
    }

    pub fn systems(&self) -> Vec<String> {
        lock(&self.script).systems.clone()
    }
}

#[async_trait]
impl ToolModel for ScriptedToolModel {
    async fn start_conversation(
        &self,
        system: &str,
        _tools: &[ToolSpec],
        _temperature: f32,
    ) -> Result<Box<dyn ToolSession>, ModelError> {
        lock(&self.script).systems.push(system.to_string());
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl ToolSession for ScriptedToolModel {
    async fn send(&mut self, input: TurnInput) -> Result<AgentTurn, ModelError> {
        let mut script = lock(&self.script);
        script.inputs.push(input);
        match script.turns.pop_front() {
            Some(turn) => turn,
            None => script
                .fallback
                .clone()
                .ok_or_else(|| ModelError::Unavailable("no scripted turn left".into())),
        }
    }
}

static NEXT_CALL_ID: AtomicUsize = AtomicUsize::new(1);

/// An [`AgentTurn`] requesting the given `(tool, input)` calls in order.
pub fn tool_turn(calls: Vec<(&str, Value)>) -> AgentTurn {
    AgentTurn {
        tool_calls: calls
            .into_iter()
            .map(|(name, input)| ToolCall {
                id: format!("call-{}", NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed)),
                name: name.to_string(),
                input,
            })
            .collect(),
        free_text: String::new(),
    }
}
