//! One generation request, end to end.
//!
//! ```text
//! start ─> generate ─> acquire sandbox ─> write component ─> install deps
//!       ─> build ──ok──────────────────────────────────────────> complete
//!               └─fail─> install missing ─> build ──fail─> repair ─> complete
//! ```
//!
//! Only extraction/model failures and sandbox provisioning failures end a
//! request with an `error` event. Everything after the sandbox exists ends in
//! `complete`, carrying the latest code and a success flag.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, info, info_span, warn};

use crate::build_check::{BuildChecker, BuildOutcome};
use crate::config::SketchpadToml;
use crate::deps::{self, DependencyResolver, InstallReport};
use crate::errors::PipelineError;
use crate::generate::{CodeGenerator, ColorPalette};
use crate::llm::{CodeModel, ToolModel};
use crate::quality;
use crate::repair::{RepairAgent, RepairSession, RepairSettings, StopReason, ToolContext};
use crate::sandbox::{AcquireOrigin, CommandRunner, FileChannel, SandboxHandle, SandboxPool};
use crate::stream::{ProgressEvent, ProgressSink};

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Encoded sketch, a `data:` URL or bare base64 PNG.
    pub image: String,
    #[serde(default)]
    pub style_guide: String,
    #[serde(default)]
    pub custom_prompt: String,
    #[serde(default)]
    pub color_palette: ColorPalette,
    #[serde(default)]
    pub existing_sandbox_id: Option<String>,
}

impl GenerationRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            style_guide: String::new(),
            custom_prompt: String::new(),
            color_palette: ColorPalette::default(),
            existing_sandbox_id: None,
        }
    }
}

pub struct GenerationPipeline {
    generator: CodeGenerator,
    pool: Arc<SandboxPool>,
    files: FileChannel,
    resolver: DependencyResolver,
    checker: BuildChecker,
    agent: RepairAgent,
    component_path: String,
    max_iterations: u32,
    quality_score: bool,
}

impl GenerationPipeline {
    /// Wire every component from configuration. The pool's provider is
    /// shared by the runner, file channel, and repair tools.
    pub fn new(
        config: &SketchpadToml,
        pool: Arc<SandboxPool>,
        code_model: Arc<dyn CodeModel>,
        tool_model: Arc<dyn ToolModel>,
    ) -> Self {
        let provider = pool.provider();
        let runner = CommandRunner::new(Arc::clone(&provider));
        let files = FileChannel::new(provider);
        let sandbox = &config.sandbox;
        let repair = &config.repair;

        let checker = BuildChecker::new(
            runner.clone(),
            sandbox.build_command.clone(),
            sandbox.project_dir.clone(),
            repair.build_timeout(),
            repair.diagnostic_chars,
        );
        let resolver = DependencyResolver::new(
            runner.clone(),
            files.clone(),
            sandbox.project_dir.clone(),
            repair.install_timeout(),
        );
        let agent = RepairAgent::new(
            tool_model,
            runner,
            files.clone(),
            RepairSettings {
                max_repair_turns: repair.max_repair_turns,
                temperature: config.model.repair_temperature,
                diagnostic_chars: repair.diagnostic_chars,
                tools: ToolContext {
                    project_dir: sandbox.project_dir.clone(),
                    component_path: sandbox.component_path.clone(),
                    build_command: sandbox.build_command.clone(),
                    command_timeout: repair.command_timeout(),
                    build_timeout: repair.build_timeout(),
                    max_output_chars: repair.tool_output_chars,
                },
            },
        );

        Self {
            generator: CodeGenerator::new(code_model, config.model.generation_temperature),
            pool,
            files,
            resolver,
            checker,
            agent,
            component_path: sandbox.component_path.clone(),
            max_iterations: repair.max_iterations,
            quality_score: repair.quality_score,
        }
    }

    pub fn pool(&self) -> &Arc<SandboxPool> {
        &self.pool
    }

    /// Run one request, reporting through `sink`. Always leaves exactly one
    /// terminal event in the sink unless the client disconnected.
    pub async fn run(&self, request: GenerationRequest, sink: ProgressSink) {
        let request_id = uuid::Uuid::new_v4();
        let span = info_span!("generate", request_id = %request_id);

        async {
            match self.execute(&request, &sink).await {
                Ok(()) => info!("generation finished"),
                Err(PipelineError::Cancelled) => info!("client disconnected, stopping"),
                Err(e) => {
                    warn!(error = %e, "generation failed");
                    sink.error(e.to_string());
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
        sink: &ProgressSink,
    ) -> Result<(), PipelineError> {
        sink.emit(ProgressEvent::Start {
            message: "Starting generation".to_string(),
        });
        sink.emit(ProgressEvent::Iteration {
            current: 1,
            max: self.max_iterations,
        });

        sink.log("Generating code from sketch");
        let code = self
            .generator
            .generate(
                &request.image,
                &request.style_guide,
                &request.custom_prompt,
                &request.color_palette,
            )
            .await?;
        ensure_open(sink)?;
        sink.code(code.as_str());
        let mut session = RepairSession::new(self.max_iterations, code);

        sink.log("Preparing sandbox");
        let acquired = self
            .pool
            .create_or_reuse(request.existing_sandbox_id.as_deref())
            .await
            .map_err(PipelineError::SandboxProvision)?;
        let handle = acquired.handle;
        if let Some(stale) = &acquired.fallback_from {
            sink.log(format!(
                "Sandbox {} is no longer available, created a new one",
                stale
            ));
        } else if acquired.origin == AcquireOrigin::Reused {
            sink.log(format!("Reusing sandbox {}", handle.id));
        }
        ensure_open(sink)?;
        sink.emit(ProgressEvent::Sandbox {
            url: handle.endpoint.clone(),
            sandbox_id: handle.id.clone(),
        });

        let mut outcome = match self
            .files
            .write_with_retry(&handle, &self.component_path, &session.current_code)
            .await
        {
            Ok(()) => self.install_and_build(&handle, &session.current_code, sink).await?,
            Err(e) => {
                // The sandbox still holds whatever was there before, so the
                // draft has not been built yet; repair has to write it.
                warn!(sandbox_id = %handle.id, error = %e, "could not write component");
                sink.log(format!("Writing the component failed: {}", e));
                BuildOutcome::failed(format!("component could not be written: {}", e))
            }
        };

        if !outcome.success {
            let missing = deps::detect_missing(&outcome.diagnostic_text);
            if !missing.is_empty() {
                ensure_open(sink)?;
                let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
                sink.log(format!("Installing missing modules: {}", names.join(", ")));
                let report = self.resolver.install_all(&handle, &missing).await;
                log_install_failures(&report, sink);
                outcome = self.checker.check(&handle).await;
            }
        }

        let success = if outcome.success {
            sink.log("Build succeeded");
            true
        } else {
            ensure_open(sink)?;
            sink.log("Build failed, starting repair agent");
            let repair = self
                .agent
                .run(&handle, &mut session, &outcome.diagnostic_text, sink)
                .await;
            if repair.stop == StopReason::Cancelled {
                return Err(PipelineError::Cancelled);
            }
            sink.log(repair.stop.describe());
            session.succeeded()
        };

        if self.quality_score {
            sink.emit(ProgressEvent::Quality {
                score: quality::score(&session.current_code, success, session.iteration),
            });
        }
        sink.emit(ProgressEvent::Complete {
            code: session.current_code,
            sandbox_url: handle.endpoint,
            sandbox_id: handle.id,
            iterations: session.iteration,
            success,
        });
        Ok(())
    }

    /// Install the draft's imports, then run the first build.
    async fn install_and_build(
        &self,
        handle: &SandboxHandle,
        code: &str,
        sink: &ProgressSink,
    ) -> Result<BuildOutcome, PipelineError> {
        let imports = deps::detect_imports(code);
        if !imports.is_empty() {
            ensure_open(sink)?;
            let names: Vec<String> = imports.iter().map(ToString::to_string).collect();
            sink.log(format!("Installing dependencies: {}", names.join(", ")));
            let report = self.resolver.install_all(handle, &imports).await;
            log_install_failures(&report, sink);
        }

        ensure_open(sink)?;
        sink.log("Building project");
        Ok(self.checker.check(handle).await)
    }
}

fn log_install_failures(report: &InstallReport, sink: &ProgressSink) {
    for (dep, _) in &report.failed {
        sink.log(format!("Could not install {}", dep));
    }
}

fn ensure_open(sink: &ProgressSink) -> Result<(), PipelineError> {
    if sink.is_closed() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}
