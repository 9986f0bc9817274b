//! Docker-backed sandbox provider.
//!
//! One container per sandbox. The container's entry process is `sleep` for
//! the sandbox lifetime, so the daemon reaps it (`auto_remove`) once the
//! lifetime runs out. Every operation is an `exec` of `sh -lc`; file content
//! travels as base64 so no tar upload is needed.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::exec::StartExecResults;
use bollard::models::{ContainerCreateBody, ExecConfig, HostConfig, PortBinding};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, RemoveContainerOptionsBuilder,
};
use bollard::container::LogOutput;
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info};

use super::{CommandOutput, SandboxProvider};
use crate::config::SandboxSection;
use crate::errors::SandboxError;

/// Base64 characters per write command. A multiple of 4 so chunks decode
/// independently.
const WRITE_CHUNK: usize = 48 * 1024;

/// Exit code used by our own shell snippets for "path does not exist".
const MISSING_PATH_EXIT: i64 = 44;

pub struct DockerProvider {
    docker: Docker,
    endpoint_host: String,
    memory: Option<i64>,
    nano_cpus: i64,
    dev_port: u16,
}

impl DockerProvider {
    /// Connect to the local Docker daemon using the environment defaults
    /// (`DOCKER_HOST` or the platform socket).
    pub fn connect(settings: &SandboxSection) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            endpoint_host: settings.endpoint_host.clone(),
            memory: settings.memory_bytes(),
            nano_cpus: (settings.cpus * 1_000_000_000.0) as i64,
            dev_port: settings.dev_port,
        })
    }

    async fn ensure_image(&self, template: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(template).await.is_ok() {
            return Ok(());
        }
        let (from_image, tag) = match template.rsplit_once(':') {
            Some((image, tag)) => (image, tag),
            None => (template, "latest"),
        };
        info!(image = %template, "pulling sandbox image");
        self.docker
            .create_image(
                Some(
                    CreateImageOptionsBuilder::new()
                        .from_image(from_image)
                        .tag(tag)
                        .build(),
                ),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| SandboxError::Provision(format!("failed to pull {}: {}", template, e)))?;
        Ok(())
    }

    async fn exec(
        &self,
        id: &str,
        script: &str,
        cwd: Option<&str>,
    ) -> Result<CommandOutput, SandboxError> {
        let config = ExecConfig {
            cmd: Some(vec!["sh".to_string(), "-lc".to_string(), script.to_string()]),
            working_dir: cwd.map(str::to_string),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, config)
            .await
            .map_err(|e| not_found_or(id, e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| not_found_or(id, e))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg? {
                        LogOutput::StdOut { message } | LogOutput::Console { message } => {
                            stdout.extend_from_slice(&message)
                        }
                        LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(SandboxError::Provider(
                    "exec was detached unexpectedly".to_string(),
                ));
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: observed_exit_code(inspect.exit_code),
        })
    }

    /// Run one of our own helper scripts; any non-zero exit is an error.
    async fn exec_checked(&self, id: &str, script: &str) -> Result<String, SandboxError> {
        let output = self.exec(id, script, None).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(SandboxError::Provider(format!(
                "exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl SandboxProvider for DockerProvider {
    async fn create(&self, template: &str, timeout: Duration) -> Result<String, SandboxError> {
        self.ensure_image(template).await?;

        let name = format!("sketchpad-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        let container_port = format!("{}/tcp", self.dev_port);
        let port_bindings = HashMap::from([(
            container_port,
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                // Empty host port: the daemon picks a free one.
                host_port: Some(String::new()),
            }]),
        )]);

        let body = ContainerCreateBody {
            image: Some(template.to_string()),
            entrypoint: Some(vec!["sleep".to_string()]),
            cmd: Some(vec![timeout.as_secs().max(1).to_string()]),
            labels: Some(HashMap::from([(
                "sketchpad.managed".to_string(),
                "true".to_string(),
            )])),
            host_config: Some(HostConfig {
                auto_remove: Some(true),
                port_bindings: Some(port_bindings),
                memory: self.memory,
                nano_cpus: Some(self.nano_cpus),
                ..HostConfig::default()
            }),
            ..ContainerCreateBody::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&name).build()),
                body,
            )
            .await
            .map_err(|e| SandboxError::Provision(format!("create_container: {}", e)))?;

        self.docker
            .start_container(
                &created.id,
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await
            .map_err(|e| SandboxError::Provision(format!("start_container: {}", e)))?;

        info!(sandbox_id = %created.id, name = %name, image = %template, "container started");
        Ok(created.id)
    }

    async fn connect(&self, id: &str) -> Result<(), SandboxError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
            .map_err(|e| not_found_or(id, e))?;
        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        if running {
            Ok(())
        } else {
            Err(SandboxError::NotFound { id: id.to_string() })
        }
    }

    async fn run(
        &self,
        id: &str,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<CommandOutput, SandboxError> {
        self.exec(id, command, cwd).await
    }

    async fn write_file(&self, id: &str, path: &str, content: &str) -> Result<(), SandboxError> {
        for script in write_scripts(path, content) {
            self.exec_checked(id, &script).await?;
        }
        debug!(sandbox_id = %id, path, bytes = content.len(), "file written");
        Ok(())
    }

    async fn read_file(&self, id: &str, path: &str) -> Result<String, SandboxError> {
        let quoted = shell_quote(path);
        let script = format!(
            "if [ -f {q} ]; then cat -- {q}; else exit {code}; fi",
            q = quoted,
            code = MISSING_PATH_EXIT
        );
        let output = self.exec(id, &script, None).await?;
        match output.exit_code {
            0 => Ok(output.stdout),
            MISSING_PATH_EXIT => Err(SandboxError::FileNotFound {
                path: path.to_string(),
            }),
            code => Err(SandboxError::Provider(format!(
                "reading {} failed with exit code {}: {}",
                path,
                code,
                output.stderr.trim()
            ))),
        }
    }

    async fn list_files(&self, id: &str, path: &str) -> Result<Vec<String>, SandboxError> {
        let quoted = shell_quote(path);
        let script = format!(
            "if [ -d {q} ]; then ls -1A -- {q}; else exit {code}; fi",
            q = quoted,
            code = MISSING_PATH_EXIT
        );
        let output = self.exec(id, &script, None).await?;
        match output.exit_code {
            0 => {
                let mut names: Vec<String> = output
                    .stdout
                    .lines()
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                names.sort();
                Ok(names)
            }
            MISSING_PATH_EXIT => Err(SandboxError::FileNotFound {
                path: path.to_string(),
            }),
            code => Err(SandboxError::Provider(format!(
                "listing {} failed with exit code {}",
                path, code
            ))),
        }
    }

    async fn endpoint(&self, id: &str, port: u16) -> Result<String, SandboxError> {
        let inspect = self
            .docker
            .inspect_container(id, None::<bollard::query_parameters::InspectContainerOptions>)
            .await
            .map_err(|e| not_found_or(id, e))?;
        let settings = inspect.network_settings.unwrap_or_default();

        if let Some(host_port) = settings
            .ports
            .as_ref()
            .and_then(|ports| published_host_port(ports, port))
        {
            return Ok(format!("http://{}:{}", self.endpoint_host, host_port));
        }

        // Not published (e.g. a different port than the dev port): reach the
        // container directly on its bridge address.
        let ip = settings
            .networks
            .as_ref()
            .and_then(|nets| nets.values().find_map(|n| n.ip_address.clone()))
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| {
                SandboxError::Provider(format!("container {} has no address for port {}", id, port))
            })?;
        Ok(format!("http://{}:{}", ip, port))
    }

    async fn kill(&self, id: &str) -> Result<(), SandboxError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptionsBuilder::new().force(true).v(true).build()),
            )
            .await
            .map_err(|e| not_found_or(id, e))?;
        info!(sandbox_id = %id, "container removed");
        Ok(())
    }
}

/// Docker may report no exit code right after the attach stream closes;
/// an unobserved result counts as a failure.
fn observed_exit_code(code: Option<i64>) -> i64 {
    code.unwrap_or(-1)
}

fn not_found_or(id: &str, error: BollardError) -> SandboxError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => SandboxError::NotFound { id: id.to_string() },
        other => SandboxError::Docker(other),
    }
}

/// Single-quote `value` for `sh`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell scripts that recreate `content` at `path`: create the parent
/// directory, truncate, then append base64 chunks.
fn write_scripts(path: &str, content: &str) -> Vec<String> {
    let quoted = shell_quote(path);
    let parent = match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((dir, _)) => dir.to_string(),
    };
    let mut scripts = vec![format!(
        "mkdir -p {} && : > {}",
        shell_quote(&parent),
        quoted
    )];

    let encoded = BASE64.encode(content.as_bytes());
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(rest.len().min(WRITE_CHUNK));
        scripts.push(format!("printf '%s' '{}' | base64 -d >> {}", chunk, quoted));
        rest = tail;
    }
    scripts
}

fn published_host_port(
    ports: &HashMap<String, Option<Vec<PortBinding>>>,
    port: u16,
) -> Option<String> {
    ports
        .get(&format!("{}/tcp", port))?
        .as_ref()?
        .iter()
        .find_map(|b| b.host_port.clone().filter(|p| !p.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_exit_code_is_a_failure() {
        assert_eq!(observed_exit_code(Some(0)), 0);
        assert_eq!(observed_exit_code(Some(2)), 2);
        let output = CommandOutput {
            exit_code: observed_exit_code(None),
            ..Default::default()
        };
        assert!(!output.success());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/app/src/App.tsx"), "'/app/src/App.tsx'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_write_scripts_small_file() {
        let scripts = write_scripts("/home/user/app/src/App.tsx", "hello");
        assert_eq!(scripts.len(), 2);
        assert_eq!(
            scripts[0],
            "mkdir -p '/home/user/app/src' && : > '/home/user/app/src/App.tsx'"
        );
        assert!(scripts[1].contains(&BASE64.encode("hello")));
        assert!(scripts[1].ends_with(">> '/home/user/app/src/App.tsx'"));
    }

    #[test]
    fn test_write_scripts_empty_file_only_truncates() {
        let scripts = write_scripts("/a.txt", "");
        assert_eq!(scripts, vec!["mkdir -p '/' && : > '/a.txt'".to_string()]);
    }

    #[test]
    fn test_write_scripts_chunks_decode_back() {
        let content = "x".repeat(WRITE_CHUNK * 2);
        let scripts = write_scripts("/big.txt", &content);
        assert!(scripts.len() > 2);

        let mut decoded = Vec::new();
        for script in &scripts[1..] {
            let start = script.find("'%s' '").unwrap() + "'%s' '".len();
            let end = script[start..].find('\'').unwrap() + start;
            decoded.extend(BASE64.decode(&script[start..end]).unwrap());
        }
        assert_eq!(String::from_utf8(decoded).unwrap(), content);
    }

    #[test]
    fn test_published_host_port() {
        let ports = HashMap::from([
            (
                "5173/tcp".to_string(),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".into()),
                    host_port: Some("49153".into()),
                }]),
            ),
            ("8080/tcp".to_string(), None),
        ]);
        assert_eq!(published_host_port(&ports, 5173).as_deref(), Some("49153"));
        assert_eq!(published_host_port(&ports, 8080), None);
        assert_eq!(published_host_port(&ports, 3000), None);
    }

    #[test]
    fn test_not_found_mapping() {
        let err = not_found_or(
            "abc",
            BollardError::DockerResponseServerError {
                status_code: 404,
                message: "No such container".into(),
            },
        );
        assert!(matches!(err, SandboxError::NotFound { ref id } if id == "abc"));

        let err = not_found_or(
            "abc",
            BollardError::DockerResponseServerError {
                status_code: 500,
                message: "boom".into(),
            },
        );
        assert!(matches!(err, SandboxError::Docker(_)));
    }
}
