//! Web API for driving the visualizer session

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::cache::ImageCache;
use crate::compositor::{FrameReport, SnapshotFormat};
use crate::config::{Config, RoomConfig, TextureConfig};
use crate::dispatcher::SessionHandle;
use crate::geometry::Point2D;
use crate::layout::{fits_device_surface, Size};
use crate::session::{Event, PointerPhase, ViewSnapshot};

/// Shared application state
pub struct AppState {
    /// Loaded configuration; the catalog is read from here
    pub config: Arc<Config>,
    /// Channel into the dispatcher task
    session: SessionHandle,
    /// Shared decoded image cache, reported by `/api/info`
    cache: Arc<ImageCache>,
    /// Whether a generation backend is configured
    generator_enabled: bool,
}

impl AppState {
    pub fn new(config: Arc<Config>, session: SessionHandle, cache: Arc<ImageCache>) -> Self {
        let generator_enabled = config.generator.is_enabled();
        Self {
            config,
            session,
            cache,
            generator_enabled,
        }
    }

    /// Forward an event, mapping a stopped dispatcher to 503
    fn dispatch(&self, event: Event) -> StatusCode {
        if self.session.send(event) {
            StatusCode::ACCEPTED
        } else {
            warn!("Dispatcher unavailable, dropping request");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/catalog", get(get_catalog))
        .route("/api/room", post(select_room))
        .route("/api/texture", post(select_texture))
        .route("/api/zoom", post(set_zoom))
        .route("/api/pan", post(set_pan))
        .route("/api/reveal", post(set_reveal))
        .route("/api/resize", post(resize))
        .route("/api/view/reset", post(reset_view))
        .route("/api/pointer", post(pointer))
        .route("/api/frame", get(get_frame))
        .route("/api/frame/stream", get(frame_stream))
        .route("/api/snapshot", get(get_snapshot))
        .route("/api/info", get(get_info))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Session view plus a summary of the last frame
#[derive(Serialize)]
struct StateResponse {
    #[serde(flatten)]
    view: ViewSnapshot,
    frame_sequence: u64,
    frame: FrameReport,
}

async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    let frame = state.session.frame();
    Json(StateResponse {
        view: (*state.session.view()).clone(),
        frame_sequence: frame.sequence,
        frame: frame.report.clone(),
    })
}

#[derive(Serialize)]
struct CatalogResponse<'a> {
    rooms: &'a [RoomConfig],
    textures: &'a [TextureConfig],
}

async fn get_catalog(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(CatalogResponse {
        rooms: &state.config.rooms,
        textures: &state.config.textures,
    })
    .into_response()
}

#[derive(Deserialize)]
struct RoomRequest {
    id: String,
}

async fn select_room(State(state): State<Arc<AppState>>, Json(req): Json<RoomRequest>) -> impl IntoResponse {
    let Some(room) = state.config.room(&req.id) else {
        return (StatusCode::NOT_FOUND, format!("Unknown room: {}", req.id)).into_response();
    };
    state.dispatch(Event::SelectRoom(room.clone())).into_response()
}

#[derive(Deserialize)]
struct TextureRequest {
    /// `null` clears the texture
    id: Option<String>,
}

async fn select_texture(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TextureRequest>,
) -> impl IntoResponse {
    let texture = match req.id {
        None => None,
        Some(id) => match state.config.texture(&id) {
            Some(texture) => Some(texture.clone()),
            None => return (StatusCode::NOT_FOUND, format!("Unknown texture: {}", id)).into_response(),
        },
    };
    state.dispatch(Event::SelectTexture(texture)).into_response()
}

/// Absolute zoom or a mouse-wheel delta, exactly one of them
#[derive(Deserialize)]
struct ZoomRequest {
    zoom: Option<f64>,
    wheel_delta: Option<f64>,
}

async fn set_zoom(State(state): State<Arc<AppState>>, Json(req): Json<ZoomRequest>) -> impl IntoResponse {
    let event = match (req.zoom, req.wheel_delta) {
        (Some(zoom), None) => Event::SetZoom(zoom),
        (None, Some(delta)) => Event::WheelZoom(delta),
        _ => {
            return (StatusCode::BAD_REQUEST, "Expected exactly one of zoom, wheel_delta").into_response();
        }
    };
    state.dispatch(event).into_response()
}

/// Absolute offset `{x, y}` or relative drag `{dx, dy}`
#[derive(Deserialize)]
struct PanRequest {
    x: Option<f64>,
    y: Option<f64>,
    dx: Option<f64>,
    dy: Option<f64>,
}

async fn set_pan(State(state): State<Arc<AppState>>, Json(req): Json<PanRequest>) -> impl IntoResponse {
    let event = match req {
        PanRequest {
            x: Some(x),
            y: Some(y),
            dx: None,
            dy: None,
        } => Event::SetPan(Point2D::new(x, y)),
        PanRequest {
            x: None,
            y: None,
            dx: Some(dx),
            dy: Some(dy),
        } => Event::PanBy(Point2D::new(dx, dy)),
        _ => return (StatusCode::BAD_REQUEST, "Expected {x, y} or {dx, dy}").into_response(),
    };
    state.dispatch(event).into_response()
}

#[derive(Deserialize)]
struct RevealRequest {
    value: f64,
}

async fn set_reveal(State(state): State<Arc<AppState>>, Json(req): Json<RevealRequest>) -> impl IntoResponse {
    state.dispatch(Event::SetReveal(req.value))
}

#[derive(Deserialize)]
struct ResizeRequest {
    width: f64,
    height: f64,
    dpr: Option<f64>,
}

async fn resize(State(state): State<Arc<AppState>>, Json(req): Json<ResizeRequest>) -> impl IntoResponse {
    if !(req.width > 0.0 && req.height > 0.0 && req.width.is_finite() && req.height.is_finite()) {
        return (StatusCode::BAD_REQUEST, "Width and height must be positive").into_response();
    }
    if req.dpr.is_some_and(|d| !(d > 0.0 && d.is_finite())) {
        return (StatusCode::BAD_REQUEST, "dpr must be positive").into_response();
    }
    let max = state.config.render.max_surface_dimension;
    let dpr = req.dpr.unwrap_or_else(|| state.session.view().device_pixel_ratio);
    if !fits_device_surface(Size::new(req.width, req.height), dpr, max) {
        return (
            StatusCode::BAD_REQUEST,
            format!("Surface larger than {} device pixels per side", max),
        )
            .into_response();
    }
    state
        .dispatch(Event::Resize {
            width: req.width,
            height: req.height,
            device_pixel_ratio: req.dpr,
        })
        .into_response()
}

async fn reset_view(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.dispatch(Event::ResetView)
}

#[derive(Deserialize)]
struct PointerRequest {
    phase: PointerPhase,
    x: f64,
    y: f64,
}

async fn pointer(State(state): State<Arc<AppState>>, Json(req): Json<PointerRequest>) -> impl IntoResponse {
    state.dispatch(Event::Pointer {
        phase: req.phase,
        position: Point2D::new(req.x, req.y),
    })
}

/// Latest rendered frame (JPEG)
async fn get_frame(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let frame = state.session.frame();
    if frame.jpeg.is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, "No frame available").into_response();
    }

    ([(header::CONTENT_TYPE, "image/jpeg")], frame.jpeg.clone()).into_response()
}

#[derive(Deserialize)]
struct SnapshotQuery {
    #[serde(default)]
    format: SnapshotFormat,
}

/// Freshly composed still image, after every pending update
async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SnapshotQuery>,
) -> impl IntoResponse {
    match state.session.snapshot(query.format).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, query.format.content_type())], bytes).into_response(),
        Err(e) => {
            warn!("Snapshot failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Snapshot failed: {}", e)).into_response()
        }
    }
}

/// MJPEG stream of rendered frames, sent when a new frame is available
async fn frame_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    use axum::body::Body;
    use tokio_stream::StreamExt;

    debug!("Frame stream opened");
    let mut last_sequence = 0;
    let stream = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(
        std::time::Duration::from_millis(100), // ~10 fps ceiling
    ))
    .filter_map(move |_| {
        let frame = state.session.frame();
        if frame.jpeg.is_empty() || frame.sequence == last_sequence {
            return None;
        }
        last_sequence = frame.sequence;

        let mut part = Vec::with_capacity(frame.jpeg.len() + 96);
        part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: ");
        part.extend_from_slice(frame.jpeg.len().to_string().as_bytes());
        part.extend_from_slice(b"\r\n\r\n");
        part.extend_from_slice(&frame.jpeg);
        part.extend_from_slice(b"\r\n");

        Some(Ok::<_, std::convert::Infallible>(part))
    });

    (
        [(header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")],
        Body::from_stream(stream),
    )
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    width: u32,
    height: u32,
    grid_cols: u32,
    grid_rows: u32,
    rooms: usize,
    textures: usize,
    cached_images: usize,
    image_loads: u64,
    generator_enabled: bool,
}

async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let frame = state.session.frame();
    let config = &state.config;

    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        width: frame.report.width,
        height: frame.report.height,
        grid_cols: config.render.grid.cols,
        grid_rows: config.render.grid.rows,
        rooms: config.rooms.len(),
        textures: config.textures.len(),
        cached_images: state.cache.len(),
        image_loads: state.cache.loads_started(),
        generator_enabled: state.generator_enabled,
    })
}
