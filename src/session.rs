//! Interactive session: selections, view state and the overlay state machine
//!
//! The session is a plain synchronous state machine. Every user action and
//! every asynchronous completion arrives as an [`Event`]; handling it
//! mutates the [`RenderState`] and returns the [`Effect`]s the dispatcher
//! must carry out (start a load, arm the debounce timer, render, ...).
//!
//! Overlay lifecycle:
//!
//! ```text
//! Idle --select texture--> PreviewOverlay --debounce elapsed--> Generating
//!                               ^      \                          |    |
//!                               |       `--select texture--'      |    |
//!                               +------- generation failed -------+    |
//!                               |                                      v
//!                               +---------- select texture ------- Compared
//! ```
//!
//! Selecting no texture returns to `Idle` from any state. Completions are
//! tagged with the selection epoch they were started for and dropped when
//! the selection has moved on.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, RoomConfig, TextureConfig};
use crate::error::{GenerationFailure, ImageLoadError};
use crate::geometry::Point2D;
use crate::homography::locate_in_quad;
use crate::layout::{
    clamp_reveal, clamp_zoom, compute_layout, fits_device_surface, map_surface_to_image, reveal_at_x,
    reveal_split_x, zoom_by_wheel, Size,
};
use crate::surface::RasterImage;

/// Shown while the generation request is outstanding
pub const STATUS_GENERATING: &str = "Creating realistic visualization...";
/// Shown once the generated image is displayed
pub const STATUS_APPLIED: &str = "New Design Applied!";
/// Shown when generation or its result image fails
pub const STATUS_FAILED: &str = "Visualization failed. Please try again.";

/// Pointer presses this close to the reveal line (CSS px) drag the line
const HANDLE_GRAB_DISTANCE: f64 = 40.0;

/// Reveal percentage a fresh comparison starts at
const DEFAULT_REVEAL: f64 = 50.0;

/// What the compositor draws over the base photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayMode {
    /// Base photo only
    Idle,
    /// Texture warped onto the floor, generation pending
    PreviewOverlay,
    /// Same drawing as `PreviewOverlay`, a generation request is outstanding
    Generating,
    /// Base and generated photo split by the reveal line
    Compared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

/// User-facing status line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub id: u64,
    pub kind: StatusKind,
    pub text: String,
}

/// Everything the compositor needs to draw one frame
#[derive(Debug, Clone)]
pub struct RenderState {
    pub room: Option<RoomConfig>,
    pub texture: Option<TextureConfig>,
    pub base: Option<Arc<RasterImage>>,
    /// The base image could not be loaded
    pub base_failed: bool,
    pub overlay: Option<Arc<RasterImage>>,
    pub after: Option<Arc<RasterImage>>,
    pub mode: OverlayMode,
    /// Reveal line position as a percentage of the container width
    pub reveal: f64,
    pub zoom: f64,
    pub pan: Point2D,
    /// Container size in CSS pixels
    pub container: Size,
    pub device_pixel_ratio: f64,
    pub status: Option<StatusMessage>,
}

/// Which slot a finished image load fills
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    Base,
    Overlay,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerPhase {
    Down,
    Move,
    Up,
}

#[derive(Debug)]
pub enum Event {
    SelectRoom(RoomConfig),
    SelectTexture(Option<TextureConfig>),
    SetZoom(f64),
    WheelZoom(f64),
    SetPan(Point2D),
    PanBy(Point2D),
    SetReveal(f64),
    Resize {
        width: f64,
        height: f64,
        device_pixel_ratio: Option<f64>,
    },
    ResetView,
    Pointer {
        phase: PointerPhase,
        position: Point2D,
    },
    ImageLoaded {
        url: String,
        role: ImageRole,
        epoch: u64,
        result: Result<Arc<RasterImage>, ImageLoadError>,
    },
    GenerationDue {
        epoch: u64,
    },
    GenerationFinished {
        epoch: u64,
        result: Result<String, GenerationFailure>,
    },
    ClearStatus {
        id: u64,
    },
}

/// Work the dispatcher performs on behalf of the session
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    LoadImage { url: String, role: ImageRole, epoch: u64 },
    /// Replace any armed generation timer with a new one
    ScheduleGeneration { epoch: u64, delay: Duration },
    /// Disarm the generation timer and drop any outstanding request
    CancelGeneration,
    Generate { epoch: u64, room_url: String, texture_url: String },
    ScheduleStatusClear { id: u64, after: Duration },
    Render,
}

/// Where a pointer press landed on the photo
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct PointerHit {
    /// Position in the base photo's native pixels
    pub image: Point2D,
    /// `(u, v)` position on the floor outline when the press hit the floor
    pub floor: Option<Point2D>,
}

#[derive(Debug, Clone, Copy)]
enum Drag {
    Reveal,
    Pan { last: Point2D },
}

/// Serializable summary of the session for the API
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ViewSnapshot {
    pub room_id: Option<String>,
    pub texture_id: Option<String>,
    pub mode: OverlayMode,
    pub reveal: f64,
    pub zoom: f64,
    pub pan: Point2D,
    pub container: Size,
    pub device_pixel_ratio: f64,
    pub base_ready: bool,
    pub base_failed: bool,
    pub overlay_ready: bool,
    pub after_ready: bool,
    pub status: Option<StatusMessage>,
    /// Last pointer press that landed on the photo
    pub pointer: Option<PointerHit>,
}

/// Session timings
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub debounce: Duration,
    pub status_ttl: Duration,
    pub default_zoom: f64,
    pub max_surface_dimension: u32,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: Duration::from_millis(config.session.debounce_ms),
            status_ttl: Duration::from_millis(config.session.status_ttl_ms),
            default_zoom: clamp_zoom(config.render.default_zoom),
            max_surface_dimension: config.render.max_surface_dimension,
        }
    }
}

pub struct Session {
    state: RenderState,
    settings: SessionSettings,
    /// Bumped on every room change
    room_epoch: u64,
    /// Bumped on every room or texture change
    selection_epoch: u64,
    next_status_id: u64,
    drag: Option<Drag>,
    last_hit: Option<PointerHit>,
}

impl Session {
    pub fn new(settings: SessionSettings, container: Size, device_pixel_ratio: f64) -> Self {
        Self {
            state: RenderState {
                room: None,
                texture: None,
                base: None,
                base_failed: false,
                overlay: None,
                after: None,
                mode: OverlayMode::Idle,
                reveal: DEFAULT_REVEAL,
                zoom: settings.default_zoom,
                pan: Point2D::default(),
                container,
                device_pixel_ratio,
                status: None,
            },
            settings,
            room_epoch: 0,
            selection_epoch: 0,
            next_status_id: 0,
            drag: None,
            last_hit: None,
        }
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    pub fn mode(&self) -> OverlayMode {
        self.state.mode
    }

    #[cfg(test)]
    pub fn selection_epoch(&self) -> u64 {
        self.selection_epoch
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        let s = &self.state;
        ViewSnapshot {
            room_id: s.room.as_ref().map(|r| r.id.clone()),
            texture_id: s.texture.as_ref().map(|t| t.id.clone()),
            mode: s.mode,
            reveal: s.reveal,
            zoom: s.zoom,
            pan: s.pan,
            container: s.container,
            device_pixel_ratio: s.device_pixel_ratio,
            base_ready: s.base.is_some(),
            base_failed: s.base_failed,
            overlay_ready: s.overlay.is_some(),
            after_ready: s.after.is_some(),
            status: s.status.clone(),
            pointer: self.last_hit,
        }
    }

    /// Apply one event and return the resulting effects
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::SelectRoom(room) => self.select_room(room),
            Event::SelectTexture(texture) => self.select_texture(texture),
            Event::SetZoom(zoom) => {
                if zoom.is_nan() {
                    return Vec::new();
                }
                self.state.zoom = clamp_zoom(zoom);
                vec![Effect::Render]
            }
            Event::WheelZoom(delta) => {
                if !delta.is_finite() {
                    return Vec::new();
                }
                self.state.zoom = zoom_by_wheel(self.state.zoom, delta);
                vec![Effect::Render]
            }
            Event::SetPan(pan) => {
                if !(pan.x.is_finite() && pan.y.is_finite()) {
                    return Vec::new();
                }
                self.state.pan = pan;
                vec![Effect::Render]
            }
            Event::PanBy(delta) => {
                if !(delta.x.is_finite() && delta.y.is_finite()) {
                    return Vec::new();
                }
                self.state.pan = Point2D::new(self.state.pan.x + delta.x, self.state.pan.y + delta.y);
                vec![Effect::Render]
            }
            Event::SetReveal(reveal) => {
                if reveal.is_nan() {
                    return Vec::new();
                }
                self.state.reveal = clamp_reveal(reveal);
                vec![Effect::Render]
            }
            Event::Resize {
                width,
                height,
                device_pixel_ratio,
            } => self.resize(width, height, device_pixel_ratio),
            Event::ResetView => {
                self.state.zoom = self.settings.default_zoom;
                self.state.pan = Point2D::default();
                vec![Effect::Render]
            }
            Event::Pointer { phase, position } => self.pointer(phase, position),
            Event::ImageLoaded {
                url,
                role,
                epoch,
                result,
            } => self.image_loaded(url, role, epoch, result),
            Event::GenerationDue { epoch } => self.generation_due(epoch),
            Event::GenerationFinished { epoch, result } => self.generation_finished(epoch, result),
            Event::ClearStatus { id } => {
                if self.state.status.as_ref().map(|s| s.id) == Some(id) {
                    self.state.status = None;
                    vec![Effect::Render]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn select_room(&mut self, room: RoomConfig) -> Vec<Effect> {
        info!("Room selected: {} ({})", room.id, room.image_url);
        self.room_epoch += 1;
        self.selection_epoch += 1;
        self.drag = None;
        self.last_hit = None;

        let url = room.image_url.clone();
        let s = &mut self.state;
        s.room = Some(room);
        s.texture = None;
        s.base = None;
        s.base_failed = false;
        s.overlay = None;
        s.after = None;
        s.mode = OverlayMode::Idle;
        s.reveal = DEFAULT_REVEAL;
        s.zoom = self.settings.default_zoom;
        s.pan = Point2D::default();
        s.status = None;

        vec![
            Effect::CancelGeneration,
            Effect::LoadImage {
                url,
                role: ImageRole::Base,
                epoch: self.room_epoch,
            },
            Effect::Render,
        ]
    }

    fn select_texture(&mut self, texture: Option<TextureConfig>) -> Vec<Effect> {
        let current = self.state.texture.as_ref().map(|t| t.id.as_str());
        if current == texture.as_ref().map(|t| t.id.as_str()) {
            debug!("Texture selection unchanged");
            return Vec::new();
        }

        self.selection_epoch += 1;
        self.state.overlay = None;
        self.state.after = None;
        self.state.status = None;
        if matches!(self.drag, Some(Drag::Reveal)) {
            self.drag = None;
        }

        let Some(texture) = texture else {
            info!("Texture cleared");
            self.state.texture = None;
            self.state.mode = OverlayMode::Idle;
            return vec![Effect::CancelGeneration, Effect::Render];
        };

        info!("Texture selected: {} ({})", texture.id, texture.texture_url);
        let url = texture.texture_url.clone();
        self.state.texture = Some(texture);
        self.state.mode = OverlayMode::PreviewOverlay;

        let mut effects = vec![
            Effect::CancelGeneration,
            Effect::LoadImage {
                url,
                role: ImageRole::Overlay,
                epoch: self.selection_epoch,
            },
        ];
        if self.state.room.is_some() {
            effects.push(Effect::ScheduleGeneration {
                epoch: self.selection_epoch,
                delay: self.settings.debounce,
            });
        }
        effects.push(Effect::Render);
        effects
    }

    fn resize(&mut self, width: f64, height: f64, device_pixel_ratio: Option<f64>) -> Vec<Effect> {
        if !(width.is_finite() && height.is_finite()) {
            return Vec::new();
        }
        let container = Size::new(width.max(1.0).round(), height.max(1.0).round());
        let dpr = device_pixel_ratio
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(self.state.device_pixel_ratio);
        if !fits_device_surface(container, dpr, self.settings.max_surface_dimension) {
            warn!(
                "Ignoring resize to {}x{} @{}x: exceeds {} device pixels per side",
                container.width, container.height, dpr, self.settings.max_surface_dimension
            );
            return Vec::new();
        }
        if container == self.state.container && dpr == self.state.device_pixel_ratio {
            return Vec::new();
        }
        debug!("Container resized to {}x{} @{}x", container.width, container.height, dpr);
        self.state.container = container;
        self.state.device_pixel_ratio = dpr;
        vec![Effect::Render]
    }

    fn pointer(&mut self, phase: PointerPhase, position: Point2D) -> Vec<Effect> {
        if !(position.x.is_finite() && position.y.is_finite()) {
            return Vec::new();
        }
        let width = self.state.container.width;
        match phase {
            PointerPhase::Down => {
                self.last_hit = self.locate(position);
                let split = reveal_split_x(width, self.state.reveal);
                let comparing = self.state.mode == OverlayMode::Compared && self.state.after.is_some();
                self.drag = if comparing && (position.x - split).abs() <= HANDLE_GRAB_DISTANCE {
                    Some(Drag::Reveal)
                } else {
                    Some(Drag::Pan { last: position })
                };
                Vec::new()
            }
            PointerPhase::Move => match self.drag {
                Some(Drag::Reveal) => {
                    self.state.reveal = reveal_at_x(width, position.x);
                    vec![Effect::Render]
                }
                Some(Drag::Pan { last }) => {
                    self.state.pan = Point2D::new(
                        self.state.pan.x + position.x - last.x,
                        self.state.pan.y + position.y - last.y,
                    );
                    self.drag = Some(Drag::Pan { last: position });
                    vec![Effect::Render]
                }
                None => Vec::new(),
            },
            PointerPhase::Up => {
                self.drag = None;
                Vec::new()
            }
        }
    }

    /// Map a surface point back onto the base photo and its floor outline
    fn locate(&self, position: Point2D) -> Option<PointerHit> {
        let base = self.state.base.as_ref()?;
        let layout = compute_layout(
            self.state.container,
            base.width(),
            base.height(),
            self.state.zoom,
            self.state.pan,
        );
        let image = map_surface_to_image(position, &layout);
        if image.x < 0.0 || image.y < 0.0 || image.x > base.width() as f64 || image.y > base.height() as f64 {
            return None;
        }
        let floor = self
            .state
            .room
            .as_ref()
            .and_then(|r| r.floor.as_ref())
            .and_then(|quad| locate_in_quad(quad, image).ok().flatten());
        Some(PointerHit { image, floor })
    }

    fn image_loaded(
        &mut self,
        url: String,
        role: ImageRole,
        epoch: u64,
        result: Result<Arc<RasterImage>, ImageLoadError>,
    ) -> Vec<Effect> {
        let current = match role {
            ImageRole::Base => self.room_epoch,
            ImageRole::Overlay | ImageRole::After => self.selection_epoch,
        };
        if epoch != current {
            debug!("Discarding stale {:?} image {}", role, url);
            return Vec::new();
        }

        match (role, result) {
            (ImageRole::Base, Ok(image)) => {
                self.state.base = Some(image);
                self.state.base_failed = false;
                vec![Effect::Render]
            }
            (ImageRole::Base, Err(e)) => {
                warn!("Base image unavailable: {}", e);
                self.state.base = None;
                self.state.base_failed = true;
                let mut effects = self.set_status(StatusKind::Error, format!("Error loading image: {}", url), true);
                effects.push(Effect::Render);
                effects
            }
            (ImageRole::Overlay, Ok(image)) => {
                self.state.overlay = Some(image);
                vec![Effect::Render]
            }
            (ImageRole::Overlay, Err(e)) => {
                warn!("Texture unavailable: {}", e);
                let mut effects = self.set_status(StatusKind::Error, format!("Error loading texture: {}", url), true);
                effects.push(Effect::Render);
                effects
            }
            (ImageRole::After, Ok(image)) => {
                if self.state.mode != OverlayMode::Generating {
                    return Vec::new();
                }
                info!("Generated image ready: {}", url);
                self.state.after = Some(image);
                self.state.mode = OverlayMode::Compared;
                self.state.reveal = DEFAULT_REVEAL;
                let mut effects = self.set_status(StatusKind::Success, STATUS_APPLIED.to_string(), true);
                effects.push(Effect::Render);
                effects
            }
            (ImageRole::After, Err(e)) => {
                if self.state.mode != OverlayMode::Generating {
                    return Vec::new();
                }
                self.generation_failed(&e.to_string())
            }
        }
    }

    fn generation_due(&mut self, epoch: u64) -> Vec<Effect> {
        if epoch != self.selection_epoch || self.state.mode != OverlayMode::PreviewOverlay {
            debug!("Ignoring stale generation timer (epoch {})", epoch);
            return Vec::new();
        }
        let (Some(room), Some(texture)) = (&self.state.room, &self.state.texture) else {
            return Vec::new();
        };
        let room_url = room.image_url.clone();
        let texture_url = texture.texture_url.clone();

        info!("Requesting visualization for {} + {}", room_url, texture_url);
        self.state.mode = OverlayMode::Generating;
        let mut effects = vec![Effect::Generate {
            epoch,
            room_url,
            texture_url,
        }];
        effects.extend(self.set_status(StatusKind::Info, STATUS_GENERATING.to_string(), false));
        effects.push(Effect::Render);
        effects
    }

    fn generation_finished(&mut self, epoch: u64, result: Result<String, GenerationFailure>) -> Vec<Effect> {
        if epoch != self.selection_epoch || self.state.mode != OverlayMode::Generating {
            debug!("Discarding stale generation result (epoch {})", epoch);
            return Vec::new();
        }
        match result {
            Ok(url) => vec![Effect::LoadImage {
                url,
                role: ImageRole::After,
                epoch,
            }],
            Err(e) => self.generation_failed(&e.to_string()),
        }
    }

    fn generation_failed(&mut self, reason: &str) -> Vec<Effect> {
        warn!("Visualization failed: {}", reason);
        self.state.mode = OverlayMode::PreviewOverlay;
        self.state.after = None;
        let mut effects = self.set_status(StatusKind::Error, STATUS_FAILED.to_string(), true);
        effects.push(Effect::Render);
        effects
    }

    fn set_status(&mut self, kind: StatusKind, text: String, transient: bool) -> Vec<Effect> {
        self.next_status_id += 1;
        let id = self.next_status_id;
        self.state.status = Some(StatusMessage { id, kind, text });
        if transient {
            vec![Effect::ScheduleStatusClear {
                id,
                after: self.settings.status_ttl,
            }]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn settings() -> SessionSettings {
        SessionSettings {
            debounce: Duration::from_millis(400),
            status_ttl: Duration::from_millis(3000),
            default_zoom: 1.35,
            max_surface_dimension: 4096,
        }
    }

    fn session() -> Session {
        Session::new(settings(), Size::new(800.0, 600.0), 1.0)
    }

    fn room(id: &str) -> RoomConfig {
        RoomConfig {
            id: id.to_string(),
            name: id.to_string(),
            image_url: format!("/rooms/{}.jpg", id),
            floor: None,
        }
    }

    fn texture(id: &str) -> TextureConfig {
        TextureConfig {
            id: id.to_string(),
            name: id.to_string(),
            texture_url: format!("/tiles/{}.jpg", id),
        }
    }

    fn image() -> Arc<RasterImage> {
        Arc::new(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255])))
    }

    fn load_effect(effects: &[Effect], wanted: ImageRole) -> (String, u64) {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::LoadImage { url, role, epoch } if *role == wanted => Some((url.clone(), *epoch)),
                _ => None,
            })
            .expect("load effect")
    }

    /// Drive a session into Compared for room "kitchen" and texture "oak"
    fn compared() -> Session {
        let mut s = session();
        let fx = s.handle(Event::SelectRoom(room("kitchen")));
        let (url, epoch) = load_effect(&fx, ImageRole::Base);
        s.handle(Event::ImageLoaded {
            url,
            role: ImageRole::Base,
            epoch,
            result: Ok(image()),
        });
        let fx = s.handle(Event::SelectTexture(Some(texture("oak"))));
        let (_, epoch) = load_effect(&fx, ImageRole::Overlay);
        s.handle(Event::GenerationDue { epoch });
        let fx = s.handle(Event::GenerationFinished {
            epoch,
            result: Ok("/out/1.png".into()),
        });
        let (url, epoch) = load_effect(&fx, ImageRole::After);
        s.handle(Event::ImageLoaded {
            url,
            role: ImageRole::After,
            epoch,
            result: Ok(image()),
        });
        assert_eq!(s.mode(), OverlayMode::Compared);
        s
    }

    #[test]
    fn test_room_selection_resets_view_and_loads_base() {
        let mut s = session();
        s.handle(Event::SetZoom(3.0));
        s.handle(Event::SetPan(Point2D::new(40.0, 10.0)));

        let fx = s.handle(Event::SelectRoom(room("living")));
        assert_eq!(load_effect(&fx, ImageRole::Base).0, "/rooms/living.jpg");
        assert!(fx.contains(&Effect::CancelGeneration));
        assert_eq!(s.state().zoom, 1.35);
        assert_eq!(s.state().pan, Point2D::default());
        assert_eq!(s.mode(), OverlayMode::Idle);
    }

    #[test]
    fn test_texture_selection_schedules_debounced_generation() {
        let mut s = session();
        s.handle(Event::SelectRoom(room("living")));
        let fx = s.handle(Event::SelectTexture(Some(texture("marble"))));

        assert_eq!(s.mode(), OverlayMode::PreviewOverlay);
        assert!(fx.contains(&Effect::ScheduleGeneration {
            epoch: s.selection_epoch(),
            delay: Duration::from_millis(400),
        }));
        assert_eq!(load_effect(&fx, ImageRole::Overlay).0, "/tiles/marble.jpg");
    }

    #[test]
    fn test_texture_without_room_does_not_generate() {
        let mut s = session();
        let fx = s.handle(Event::SelectTexture(Some(texture("marble"))));
        assert!(!fx.iter().any(|e| matches!(e, Effect::ScheduleGeneration { .. })));
    }

    #[test]
    fn test_reselecting_same_texture_is_noop() {
        let mut s = session();
        s.handle(Event::SelectRoom(room("living")));
        s.handle(Event::SelectTexture(Some(texture("marble"))));
        let epoch = s.selection_epoch();
        assert!(s.handle(Event::SelectTexture(Some(texture("marble")))).is_empty());
        assert_eq!(s.selection_epoch(), epoch);
    }

    #[test]
    fn test_stale_timer_is_ignored() {
        let mut s = session();
        s.handle(Event::SelectRoom(room("living")));
        s.handle(Event::SelectTexture(Some(texture("marble"))));
        let stale = s.selection_epoch();
        s.handle(Event::SelectTexture(Some(texture("slate"))));

        assert!(s.handle(Event::GenerationDue { epoch: stale }).is_empty());
        assert_eq!(s.mode(), OverlayMode::PreviewOverlay);

        let fx = s.handle(Event::GenerationDue {
            epoch: s.selection_epoch(),
        });
        assert_eq!(s.mode(), OverlayMode::Generating);
        assert!(fx.iter().any(|e| matches!(
            e,
            Effect::Generate { texture_url, .. } if texture_url == "/tiles/slate.jpg"
        )));
        assert_eq!(s.state().status.as_ref().unwrap().text, STATUS_GENERATING);
    }

    #[test]
    fn test_generation_success_enters_compared() {
        let s = compared();
        assert_eq!(s.state().reveal, 50.0);
        assert!(s.state().after.is_some());
        assert_eq!(s.state().status.as_ref().unwrap().text, STATUS_APPLIED);
    }

    #[test]
    fn test_generation_failure_falls_back_to_preview() {
        let mut s = session();
        s.handle(Event::SelectRoom(room("living")));
        s.handle(Event::SelectTexture(Some(texture("marble"))));
        let epoch = s.selection_epoch();
        s.handle(Event::GenerationDue { epoch });

        let fx = s.handle(Event::GenerationFinished {
            epoch,
            result: Err(GenerationFailure::new("backend down")),
        });
        assert_eq!(s.mode(), OverlayMode::PreviewOverlay);
        let status = s.state().status.clone().unwrap();
        assert_eq!(status.text, STATUS_FAILED);
        assert_eq!(status.kind, StatusKind::Error);
        assert!(fx.contains(&Effect::ScheduleStatusClear {
            id: status.id,
            after: Duration::from_millis(3000),
        }));

        s.handle(Event::ClearStatus { id: status.id });
        assert!(s.state().status.is_none());
    }

    #[test]
    fn test_failed_result_image_is_a_generation_failure() {
        let mut s = session();
        s.handle(Event::SelectRoom(room("living")));
        s.handle(Event::SelectTexture(Some(texture("marble"))));
        let epoch = s.selection_epoch();
        s.handle(Event::GenerationDue { epoch });
        s.handle(Event::GenerationFinished {
            epoch,
            result: Ok("/out/broken.png".into()),
        });
        s.handle(Event::ImageLoaded {
            url: "/out/broken.png".into(),
            role: ImageRole::After,
            epoch,
            result: Err(ImageLoadError::NotFound("/out/broken.png".into())),
        });
        assert_eq!(s.mode(), OverlayMode::PreviewOverlay);
        assert!(s.state().after.is_none());
    }

    #[test]
    fn test_late_result_after_new_selection_is_dropped() {
        let mut s = session();
        s.handle(Event::SelectRoom(room("living")));
        s.handle(Event::SelectTexture(Some(texture("marble"))));
        let old = s.selection_epoch();
        s.handle(Event::GenerationDue { epoch: old });
        s.handle(Event::SelectTexture(Some(texture("slate"))));

        let fx = s.handle(Event::GenerationFinished {
            epoch: old,
            result: Ok("/out/marble.png".into()),
        });
        assert!(fx.is_empty());
        assert_eq!(s.mode(), OverlayMode::PreviewOverlay);
        assert_eq!(s.state().texture.as_ref().unwrap().id, "slate");
    }

    #[test]
    fn test_clearing_texture_returns_to_idle() {
        let mut s = compared();
        let fx = s.handle(Event::SelectTexture(None));
        assert_eq!(s.mode(), OverlayMode::Idle);
        assert!(s.state().after.is_none());
        assert!(s.state().overlay.is_none());
        assert!(fx.contains(&Effect::CancelGeneration));
    }

    #[test]
    fn test_new_texture_from_compared_goes_back_to_preview() {
        let mut s = compared();
        s.handle(Event::SelectTexture(Some(texture("slate"))));
        assert_eq!(s.mode(), OverlayMode::PreviewOverlay);
        assert!(s.state().after.is_none());
    }

    #[test]
    fn test_base_survives_texture_change() {
        let mut s = session();
        let fx = s.handle(Event::SelectRoom(room("living")));
        let (url, epoch) = load_effect(&fx, ImageRole::Base);
        // texture picked before the base finished loading
        s.handle(Event::SelectTexture(Some(texture("marble"))));
        s.handle(Event::ImageLoaded {
            url,
            role: ImageRole::Base,
            epoch,
            result: Ok(image()),
        });
        assert!(s.state().base.is_some());
    }

    #[test]
    fn test_base_failure_is_reported() {
        let mut s = session();
        let fx = s.handle(Event::SelectRoom(room("living")));
        let (url, epoch) = load_effect(&fx, ImageRole::Base);
        s.handle(Event::ImageLoaded {
            url: url.clone(),
            role: ImageRole::Base,
            epoch,
            result: Err(ImageLoadError::NotFound(url)),
        });
        assert!(s.state().base_failed);
        assert_eq!(s.state().status.as_ref().unwrap().kind, StatusKind::Error);
    }

    #[test]
    fn test_pointer_near_line_drags_reveal() {
        let mut s = compared();
        // reveal 50 on an 800px container puts the line at x = 400
        s.handle(Event::Pointer {
            phase: PointerPhase::Down,
            position: Point2D::new(420.0, 300.0),
        });
        s.handle(Event::Pointer {
            phase: PointerPhase::Move,
            position: Point2D::new(200.0, 300.0),
        });
        s.handle(Event::Pointer {
            phase: PointerPhase::Up,
            position: Point2D::new(200.0, 300.0),
        });
        assert_eq!(s.state().reveal, 25.0);
        assert_eq!(s.state().pan, Point2D::default());
    }

    #[test]
    fn test_pointer_away_from_line_pans() {
        let mut s = compared();
        s.handle(Event::Pointer {
            phase: PointerPhase::Down,
            position: Point2D::new(100.0, 100.0),
        });
        s.handle(Event::Pointer {
            phase: PointerPhase::Move,
            position: Point2D::new(130.0, 90.0),
        });
        s.handle(Event::Pointer {
            phase: PointerPhase::Move,
            position: Point2D::new(140.0, 95.0),
        });
        assert_eq!(s.state().pan, Point2D::new(40.0, -5.0));
        assert_eq!(s.state().reveal, 50.0);

        s.handle(Event::Pointer {
            phase: PointerPhase::Up,
            position: Point2D::new(140.0, 95.0),
        });
        assert!(s
            .handle(Event::Pointer {
                phase: PointerPhase::Move,
                position: Point2D::new(500.0, 500.0),
            })
            .is_empty());
    }

    #[test]
    fn test_view_inputs_are_clamped() {
        let mut s = session();
        s.handle(Event::SetZoom(9.0));
        assert_eq!(s.state().zoom, 4.0);
        s.handle(Event::SetReveal(-3.0));
        assert_eq!(s.state().reveal, 0.0);
        assert!(s.handle(Event::SetReveal(f64::NAN)).is_empty());
        s.handle(Event::ResetView);
        assert_eq!(s.state().zoom, 1.35);
    }

    #[test]
    fn test_resize_only_renders_on_change() {
        let mut s = session();
        assert!(s
            .handle(Event::Resize {
                width: 800.0,
                height: 600.0,
                device_pixel_ratio: None,
            })
            .is_empty());
        assert_eq!(
            s.handle(Event::Resize {
                width: 400.0,
                height: 300.0,
                device_pixel_ratio: Some(2.0),
            }),
            vec![Effect::Render]
        );
        assert_eq!(s.state().device_pixel_ratio, 2.0);
    }

    #[test]
    fn test_oversized_resize_is_ignored() {
        let mut s = session();
        assert!(s
            .handle(Event::Resize {
                width: 1e10,
                height: 1e10,
                device_pixel_ratio: None,
            })
            .is_empty());
        assert!(s
            .handle(Event::Resize {
                width: 3000.0,
                height: 2000.0,
                device_pixel_ratio: Some(2.0),
            })
            .is_empty());
        assert_eq!(s.state().container, Size::new(800.0, 600.0));
        assert_eq!(s.state().device_pixel_ratio, 1.0);

        assert_eq!(
            s.handle(Event::Resize {
                width: 2048.0,
                height: 1536.0,
                device_pixel_ratio: Some(2.0),
            }),
            vec![Effect::Render]
        );
    }

    #[test]
    fn test_pointer_press_locates_floor() {
        let mut s = session();
        let mut living = room("living");
        living.floor = Some(crate::geometry::Quad::new(
            Point2D::new(100.0, 300.0),
            Point2D::new(700.0, 300.0),
            Point2D::new(800.0, 600.0),
            Point2D::new(0.0, 600.0),
        ));
        let fx = s.handle(Event::SelectRoom(living));
        let (url, epoch) = load_effect(&fx, ImageRole::Base);
        s.handle(Event::ImageLoaded {
            url,
            role: ImageRole::Base,
            epoch,
            result: Ok(Arc::new(RgbaImage::new(800, 600))),
        });
        s.handle(Event::SetZoom(1.0));

        s.handle(Event::Pointer {
            phase: PointerPhase::Down,
            position: Point2D::new(400.0, 450.0),
        });
        let hit = s.snapshot().pointer.unwrap();
        assert_eq!(hit.image, Point2D::new(400.0, 450.0));
        let floor = hit.floor.unwrap();
        assert!((floor.x - 0.5).abs() < 1e-9);
        assert!(floor.y > 0.0 && floor.y < 1.0);

        s.handle(Event::Pointer {
            phase: PointerPhase::Down,
            position: Point2D::new(400.0, 100.0),
        });
        let hit = s.snapshot().pointer.unwrap();
        assert!(hit.floor.is_none());

        s.handle(Event::SelectRoom(room("kitchen")));
        assert!(s.snapshot().pointer.is_none());
    }
}
