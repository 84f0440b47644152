//! External "generate visualization" backend
//!
//! The generation service is a black box: given a room image reference and
//! a texture reference it eventually produces the URL of a rendered room,
//! or fails. The compositor never looks inside.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::error::GenerationFailure;

/// Asynchronous room + texture → image URL producer
pub trait Generator: Send + Sync {
    fn generate(&self, room: &str, texture: &str) -> BoxFuture<'static, Result<String, GenerationFailure>>;
}

/// Used when no backend is configured; every request fails
pub struct Unconfigured;

impl Generator for Unconfigured {
    fn generate(&self, _room: &str, _texture: &str) -> BoxFuture<'static, Result<String, GenerationFailure>> {
        async { Err(GenerationFailure::new("no generation backend configured")) }.boxed()
    }
}

/// Runs an external program per request
///
/// The program receives the configured arguments followed by the room and
/// texture references. The first non-empty line it prints on stdout is the
/// resulting image URL.
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

}

/// Build the backend described by the configuration
pub fn from_config(config: &GeneratorConfig) -> Arc<dyn Generator> {
    let timeout = config.timeout_secs.map(Duration::from_secs);
    if let Some(endpoint) = config.endpoint() {
        info!("Generation backend: POST {}", endpoint);
        return Arc::new(HttpGenerator::new(endpoint, timeout));
    }
    if let Some(program) = config.command() {
        info!("Generation backend: {} {:?}", program, config.args);
        return Arc::new(CommandGenerator::new(program, config.args.clone(), timeout));
    }
    info!("No generation backend configured; previews only");
    Arc::new(Unconfigured)
}

impl Generator for CommandGenerator {
    fn generate(&self, room: &str, texture: &str) -> BoxFuture<'static, Result<String, GenerationFailure>> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(room)
            .arg(texture)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let program = self.program.clone();
        let timeout = self.timeout;

        async move {
            debug!("Spawning generation backend {}", program);
            let output = command.output();
            let output = match timeout {
                Some(limit) => tokio::time::timeout(limit, output).await.map_err(|_| {
                    GenerationFailure::new(format!("{} timed out after {:?}", program, limit))
                })?,
                None => output.await,
            }
            .map_err(|e| GenerationFailure::new(format!("failed to run {}: {}", program, e)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(GenerationFailure::new(format!(
                    "{} exited with {}: {}",
                    program,
                    output.status,
                    stderr.trim()
                )));
            }

            String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
                .ok_or_else(|| GenerationFailure::new(format!("{} printed no image URL", program)))
        }
        .boxed()
    }
}

/// Posts the room and texture URLs to a visualization endpoint
///
/// The body is `{"roomUrl": .., "textureUrl": ..}` and the service answers
/// `{"imageUrl": ..}`, which may itself be a `data:` URL.
pub struct HttpGenerator {
    endpoint: String,
    agent: ureq::Agent,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VisualizeRequest {
    room_url: String,
    texture_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisualizeResponse {
    image_url: Option<String>,
}

impl HttpGenerator {
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(limit) = timeout {
            builder = builder.timeout(limit);
        }
        Self {
            endpoint: endpoint.into(),
            agent: builder.build(),
        }
    }
}

impl Generator for HttpGenerator {
    fn generate(&self, room: &str, texture: &str) -> BoxFuture<'static, Result<String, GenerationFailure>> {
        let agent = self.agent.clone();
        let endpoint = self.endpoint.clone();
        let request = VisualizeRequest {
            room_url: room.to_string(),
            texture_url: texture.to_string(),
        };

        async move {
            debug!("Posting generation request to {}", endpoint);
            tokio::task::spawn_blocking(move || post_visualize(&agent, &endpoint, &request))
                .await
                .map_err(|e| GenerationFailure::new(format!("generation request aborted: {}", e)))?
        }
        .boxed()
    }
}

fn post_visualize(
    agent: &ureq::Agent,
    endpoint: &str,
    request: &VisualizeRequest,
) -> Result<String, GenerationFailure> {
    let response = agent
        .post(endpoint)
        .send_json(request)
        .map_err(|e| GenerationFailure::new(format!("{} failed: {}", endpoint, e)))?;
    let body: VisualizeResponse = response
        .into_json()
        .map_err(|e| GenerationFailure::new(format!("invalid response from {}: {}", endpoint, e)))?;

    body.image_url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| GenerationFailure::new(format!("{} returned no imageUrl", endpoint)))
}
