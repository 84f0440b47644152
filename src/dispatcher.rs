//! Event dispatcher
//!
//! One task owns the [`Session`] and the [`Compositor`]. Commands arrive
//! over a channel; after draining whatever is queued the dispatcher renders
//! once if anything asked for it, so a burst of resize or pan events costs a
//! single frame. Asynchronous work (image loads, the debounced generation
//! request, status expiry) runs in spawned tasks that report back through
//! the same channel. Rasterizing and encoding happen on the blocking pool.

use anyhow::{anyhow, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::ImageCache;
use crate::compositor::{Compositor, FrameReport, SnapshotFormat};
use crate::config::Config;
use crate::generator::Generator;
use crate::layout::Size;
use crate::session::{Effect, Event, Session, SessionSettings, ViewSnapshot};

pub enum Command {
    Event(Event),
    /// Encode the composed frame as of every command queued before this one
    Snapshot {
        format: SnapshotFormat,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
}

/// Most recently rendered frame
#[derive(Debug, Default)]
pub struct Frame {
    /// Increases with every render
    pub sequence: u64,
    /// JPEG encoded, empty until the first successful encode
    pub jpeg: Vec<u8>,
    pub report: FrameReport,
}

/// Lock-free publication of the latest frame and session view
pub struct FrameStore {
    frame: ArcSwap<Frame>,
    view: ArcSwap<ViewSnapshot>,
}

impl FrameStore {
    fn new(view: ViewSnapshot) -> Self {
        Self {
            frame: ArcSwap::from_pointee(Frame::default()),
            view: ArcSwap::from_pointee(view),
        }
    }

    pub fn frame(&self) -> Arc<Frame> {
        self.frame.load_full()
    }

    pub fn view(&self) -> Arc<ViewSnapshot> {
        self.view.load_full()
    }
}

/// Cloneable handle used by the HTTP layer
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
    frames: Arc<FrameStore>,
}

impl SessionHandle {
    /// Queue an event; returns false once the dispatcher has stopped
    pub fn send(&self, event: Event) -> bool {
        self.tx.send(Command::Event(event)).is_ok()
    }

    /// Request a freshly composed still image
    pub async fn snapshot(&self, format: SnapshotFormat) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { format, reply })
            .map_err(|_| anyhow!("dispatcher stopped"))?;
        rx.await.map_err(|_| anyhow!("dispatcher dropped snapshot request"))?
    }

    pub fn frame(&self) -> Arc<Frame> {
        self.frames.frame()
    }

    pub fn view(&self) -> Arc<ViewSnapshot> {
        self.frames.view()
    }
}

pub struct Dispatcher {
    session: Session,
    /// Only locked from blocking tasks
    compositor: Arc<Mutex<Compositor>>,
    cache: Arc<ImageCache>,
    generator: Arc<dyn Generator>,
    frames: Arc<FrameStore>,
    /// Weak so the loop ends once every [`SessionHandle`] and task is gone
    tx: mpsc::WeakUnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
    /// Debounce timer or outstanding generation request; at most one
    generation: Option<JoinHandle<()>>,
    jpeg_quality: u8,
    sequence: u64,
    dirty: bool,
}

impl Dispatcher {
    pub fn new(config: &Config, cache: Arc<ImageCache>, generator: Arc<dyn Generator>) -> (Self, SessionHandle) {
        let session = Session::new(
            SessionSettings::from_config(config),
            Size::new(config.render.width as f64, config.render.height as f64),
            config.render.device_pixel_ratio,
        );
        let frames = Arc::new(FrameStore::new(session.snapshot()));
        let (tx, rx) = mpsc::unbounded_channel();

        let weak = tx.downgrade();
        let handle = SessionHandle {
            tx,
            frames: Arc::clone(&frames),
        };
        let dispatcher = Self {
            session,
            compositor: Arc::new(Mutex::new(Compositor::new(&config.render))),
            cache,
            generator,
            frames,
            tx: weak,
            rx,
            generation: None,
            jpeg_quality: config.render.jpeg_quality,
            sequence: 0,
            dirty: true,
        };
        (dispatcher, handle)
    }

    /// Process commands until every handle is gone
    pub async fn run(mut self) {
        info!("Dispatcher started");
        self.render().await;

        loop {
            let Some(command) = self.rx.recv().await else {
                break;
            };
            self.apply(command).await;
            while let Ok(command) = self.rx.try_recv() {
                self.apply(command).await;
            }
            if self.dirty {
                self.render().await;
            }
            self.frames.view.store(Arc::new(self.session.snapshot()));
        }

        self.cancel_generation();
        info!("Dispatcher stopped");
    }

    async fn apply(&mut self, command: Command) {
        match command {
            Command::Event(event) => self.handle_event(event),
            Command::Snapshot { format, reply } => {
                if self.dirty {
                    self.render().await;
                }
                let quality = self.jpeg_quality;
                let encoded = self
                    .with_compositor(move |c| c.snapshot(format, quality))
                    .await
                    .and_then(|encoded| encoded);
                let _ = reply.send(encoded);
            }
        }
    }

    /// Run `f` against the compositor on the blocking pool
    fn with_compositor<T, F>(&self, f: F) -> impl Future<Output = Result<T>>
    where
        F: FnOnce(&mut Compositor) -> T + Send + 'static,
        T: Send + 'static,
    {
        let compositor = Arc::clone(&self.compositor);
        async move {
            tokio::task::spawn_blocking(move || f(&mut *compositor.lock()))
                .await
                .map_err(|e| anyhow!("compositor task failed: {}", e))
        }
    }

    fn handle_event(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for effect in self.session.handle(event) {
                if let Some(follow_up) = self.execute(effect) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    /// Carry out one effect; resident images complete synchronously
    fn execute(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::Render => {
                self.dirty = true;
                return None;
            }
            Effect::CancelGeneration => {
                self.cancel_generation();
                return None;
            }
            Effect::LoadImage { ref url, role, epoch } => {
                if let Some(image) = self.cache.peek(url) {
                    return Some(Event::ImageLoaded {
                        url: url.clone(),
                        role,
                        epoch,
                        result: Ok(image),
                    });
                }
            }
            _ => {}
        }

        let tx = self.tx.upgrade()?;
        match effect {
            Effect::LoadImage { url, role, epoch } => {
                let cache = Arc::clone(&self.cache);
                tokio::spawn(async move {
                    let result = cache.get(&url).await;
                    let _ = tx.send(Command::Event(Event::ImageLoaded {
                        url,
                        role,
                        epoch,
                        result,
                    }));
                });
            }
            Effect::ScheduleGeneration { epoch, delay } => {
                self.cancel_generation();
                self.generation = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Command::Event(Event::GenerationDue { epoch }));
                }));
            }
            Effect::Generate {
                epoch,
                room_url,
                texture_url,
            } => {
                self.cancel_generation();
                let request = self.generator.generate(&room_url, &texture_url);
                self.generation = Some(tokio::spawn(async move {
                    let result = request.await;
                    let _ = tx.send(Command::Event(Event::GenerationFinished { epoch, result }));
                }));
            }
            Effect::ScheduleStatusClear { id, after } => {
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(Command::Event(Event::ClearStatus { id }));
                });
            }
            Effect::Render | Effect::CancelGeneration => {}
        }
        None
    }

    fn cancel_generation(&mut self) {
        if let Some(task) = self.generation.take() {
            if !task.is_finished() {
                debug!("Cancelling pending generation");
            }
            task.abort();
        }
    }

    async fn render(&mut self) {
        let state = self.session.state().clone();
        let quality = self.jpeg_quality;
        self.dirty = false;

        let rendered = self
            .with_compositor(move |c| {
                let report = c.render(&state);
                (report, c.snapshot(SnapshotFormat::Jpeg, quality))
            })
            .await;
        let (report, jpeg) = match rendered {
            Ok(rendered) => rendered,
            Err(e) => {
                error!("Render failed: {}", e);
                return;
            }
        };
        self.sequence += 1;

        let jpeg = match jpeg {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!("Failed to encode frame: {}", e);
                Vec::new()
            }
        };
        debug!(
            "Frame {} rendered ({:?}): {}x{}, {} blits",
            self.sequence,
            self.session.mode(),
            report.width,
            report.height,
            report.draw_calls
        );
        self.frames.frame.store(Arc::new(Frame {
            sequence: self.sequence,
            jpeg,
            report,
        }));
    }
}

/// Spawn the dispatcher on the current runtime
pub fn spawn(config: &Config, cache: Arc<ImageCache>, generator: Arc<dyn Generator>) -> (JoinHandle<()>, SessionHandle) {
    let (dispatcher, handle) = Dispatcher::new(config, cache, generator);
    (tokio::spawn(dispatcher.run()), handle)
}
