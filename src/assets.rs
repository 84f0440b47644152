//! Image loading from the local asset tree, inline data URLs and the web

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::future::{BoxFuture, FutureExt};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::cache::ImageSource;
use crate::config::AssetConfig;
use crate::error::ImageLoadError;
use crate::surface::RasterImage;

/// Largest response body accepted for a remote image
const MAX_REMOTE_BYTES: u64 = 64 * 1024 * 1024;
const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves image URLs against an asset root directory
///
/// Accepted forms:
/// - `data:<mime>;base64,<payload>`
/// - `http://` and `https://` URLs, unless remote loading is disabled
/// - `file:///absolute/path.jpg`
/// - `/assets/room.jpg` or `assets/room.jpg`, relative to the root
pub struct AssetLoader {
    root: PathBuf,
    remote: bool,
    agent: ureq::Agent,
}

enum Location {
    Inline,
    Remote,
    File(PathBuf),
}

impl AssetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote: true,
            agent: ureq::AgentBuilder::new().timeout(REMOTE_TIMEOUT).build(),
        }
    }

    pub fn from_config(config: &AssetConfig) -> Self {
        Self {
            remote: config.remote,
            ..Self::new(config.root.clone())
        }
    }

    fn resolve(&self, url: &str) -> Result<Location, ImageLoadError> {
        if url.starts_with("data:") {
            return Ok(Location::Inline);
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            return if self.remote {
                Ok(Location::Remote)
            } else {
                Err(ImageLoadError::Unsupported(url.to_string()))
            };
        }
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(Location::File(PathBuf::from(path)));
        }

        let relative = Path::new(url.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ImageLoadError::Unsupported(url.to_string()));
        }
        Ok(Location::File(self.root.join(relative)))
    }
}

impl ImageSource for AssetLoader {
    fn load(&self, url: &str) -> BoxFuture<'static, Result<RasterImage, ImageLoadError>> {
        let url = url.to_string();
        let location = self.resolve(&url);
        let agent = self.agent.clone();

        async move {
            let bytes = match location? {
                Location::Inline => decode_data_url(&url)?,
                Location::Remote => fetch_remote(agent, url.clone()).await?,
                Location::File(path) => {
                    tokio::fs::read(&path).await.map_err(|e| {
                        if e.kind() == std::io::ErrorKind::NotFound {
                            ImageLoadError::NotFound(url.clone())
                        } else {
                            ImageLoadError::Io {
                                url: url.clone(),
                                reason: e.to_string(),
                            }
                        }
                    })?
                }
            };

            let decode_url = url.clone();
            tokio::task::spawn_blocking(move || decode_image(&decode_url, &bytes))
                .await
                .map_err(|e| ImageLoadError::Decode {
                    url,
                    reason: e.to_string(),
                })?
        }
        .boxed()
    }
}

/// Download an image body on the blocking pool
async fn fetch_remote(agent: ureq::Agent, url: String) -> Result<Vec<u8>, ImageLoadError> {
    let task_url = url.clone();
    tokio::task::spawn_blocking(move || {
        let url = task_url;
        let response = agent.get(&url).call().map_err(|e| match e {
            ureq::Error::Status(404, _) => ImageLoadError::NotFound(url.clone()),
            other => ImageLoadError::Io {
                url: url.clone(),
                reason: other.to_string(),
            },
        })?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_REMOTE_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| ImageLoadError::Io {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        Ok(bytes)
    })
    .await
    .map_err(|e| ImageLoadError::Io {
        url,
        reason: e.to_string(),
    })?
}

/// Extract the payload of a base64 `data:` URL
fn decode_data_url(url: &str) -> Result<Vec<u8>, ImageLoadError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ImageLoadError::Unsupported(url.to_string()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ImageLoadError::Unsupported(url.to_string()))?;
    if !header.ends_with(";base64") {
        return Err(ImageLoadError::Unsupported(url.to_string()));
    }
    STANDARD
        .decode(payload.trim())
        .map_err(|e| ImageLoadError::Decode {
            url: abbreviate(url),
            reason: e.to_string(),
        })
}

fn decode_image(url: &str, bytes: &[u8]) -> Result<RasterImage, ImageLoadError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| ImageLoadError::Decode {
            url: abbreviate(url),
            reason: e.to_string(),
        })
}

/// Keep data URLs from flooding logs and status messages
fn abbreviate(url: &str) -> String {
    const MAX: usize = 64;
    if url.len() <= MAX {
        return url.to_string();
    }
    let cut = (0..=MAX).rev().find(|i| url.is_char_boundary(*i)).unwrap_or(0);
    format!("{}...", &url[..cut])
}
