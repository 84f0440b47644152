//! Decoded image cache
//!
//! Images are keyed by their source URL and decoded at most once while they
//! stay resident: a second request for a URL that is still loading awaits
//! the first decode instead of starting another. Capacity is bounded and
//! the least recently used entry is evicted first.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ImageLoadError;
use crate::surface::RasterImage;

/// Something that can fetch and decode an image by URL
pub trait ImageSource: Send + Sync {
    fn load(&self, url: &str) -> BoxFuture<'static, Result<RasterImage, ImageLoadError>>;
}

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<RasterImage>, ImageLoadError>>>;

struct CacheInner {
    capacity: usize,
    entries: HashMap<String, Arc<RasterImage>>,
    /// Least recently used at the front
    order: VecDeque<String>,
    in_flight: HashMap<String, SharedLoad>,
    loads_started: u64,
}

impl CacheInner {
    fn touch(&mut self, url: &str) -> Option<Arc<RasterImage>> {
        let image = self.entries.get(url)?.clone();
        if let Some(pos) = self.order.iter().position(|u| u == url) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
        Some(image)
    }

    fn insert(&mut self, url: String, image: Arc<RasterImage>) {
        if self.entries.insert(url.clone(), image).is_some() {
            self.order.retain(|u| *u != url);
        }
        self.order.push_back(url);

        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            debug!("Evicted {} from image cache", oldest);
        }
    }
}

/// Bounded LRU cache of decoded images, shared by the session and dispatcher
pub struct ImageCache {
    source: Arc<dyn ImageSource>,
    inner: Arc<Mutex<CacheInner>>,
}

impl ImageCache {
    pub fn new(source: Arc<dyn ImageSource>, capacity: usize) -> Self {
        Self {
            source,
            inner: Arc::new(Mutex::new(CacheInner {
                capacity: capacity.max(1),
                entries: HashMap::new(),
                order: VecDeque::new(),
                in_flight: HashMap::new(),
                loads_started: 0,
            })),
        }
    }

    /// Return a resident image without loading, marking it recently used
    pub fn peek(&self, url: &str) -> Option<Arc<RasterImage>> {
        self.inner.lock().touch(url)
    }

    /// Fetch an image, decoding it if it is not resident yet
    pub async fn get(&self, url: &str) -> Result<Arc<RasterImage>, ImageLoadError> {
        let load = {
            let mut inner = self.inner.lock();
            if let Some(image) = inner.touch(url) {
                return Ok(image);
            }
            match inner.in_flight.get(url) {
                Some(pending) => pending.clone(),
                None => {
                    let pending = self.start_load(url);
                    inner.in_flight.insert(url.to_string(), pending.clone());
                    inner.loads_started += 1;
                    pending
                }
            }
        };
        load.await
    }

    fn start_load(&self, url: &str) -> SharedLoad {
        debug!("Loading image: {}", url);
        let decode = self.source.load(url);
        let inner = Arc::clone(&self.inner);
        let key = url.to_string();

        async move {
            let result = decode.await.map(Arc::new);
            let mut inner = inner.lock();
            inner.in_flight.remove(&key);
            match &result {
                Ok(image) => {
                    debug!("Loaded image {}x{}: {}", image.width(), image.height(), key);
                    inner.insert(key, Arc::clone(image));
                }
                Err(e) => warn!("Failed to load image: {}", e),
            }
            result
        }
        .boxed()
        .shared()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Number of decodes actually started since creation
    pub fn loads_started(&self) -> u64 {
        self.inner.lock().loads_started
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory source that fabricates a 4x4 image for any URL not marked broken
    #[derive(Default)]
    pub(crate) struct FakeSource {
        pub calls: AtomicUsize,
        pub broken: Vec<String>,
        pub delay: Option<Duration>,
    }

    impl ImageSource for FakeSource {
        fn load(&self, url: &str) -> BoxFuture<'static, Result<RasterImage, ImageLoadError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let broken = self.broken.iter().any(|b| b == url);
            let url = url.to_string();
            let delay = self.delay;
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                if broken {
                    return Err(ImageLoadError::NotFound(url));
                }
                Ok(RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255])))
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_decode() {
        let source = Arc::new(FakeSource {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let cache = ImageCache::new(source.clone(), 4);

        let (a, b) = tokio::join!(cache.get("room.jpg"), cache.get("room.jpg"));

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.loads_started(), 1);
    }

    #[tokio::test]
    async fn test_least_recently_used_is_evicted() {
        let source = Arc::new(FakeSource::default());
        let cache = ImageCache::new(source.clone(), 2);

        cache.get("a").await.unwrap();
        cache.get("b").await.unwrap();
        assert!(cache.peek("a").is_some());
        cache.get("c").await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.peek("a").is_some());
        assert!(cache.peek("b").is_none());
        assert!(cache.peek("c").is_some());
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let source = Arc::new(FakeSource {
            broken: vec!["missing.png".to_string()],
            ..Default::default()
        });
        let cache = ImageCache::new(source.clone(), 4);

        assert!(matches!(
            cache.get("missing.png").await,
            Err(ImageLoadError::NotFound(_))
        ));
        assert!(cache.get("missing.png").await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_hit_does_not_reload() {
        let source = Arc::new(FakeSource::default());
        let cache = ImageCache::new(source.clone(), 4);
        cache.get("tile.png").await.unwrap();
        cache.get("tile.png").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
