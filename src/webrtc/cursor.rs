//! Cursor change feeds
//!
//! The image feed follows the desktop's cursor-changed notifications and
//! caches bitmaps by serial. The position feed is driven by the host's mouse
//! moves. A [`CursorBridge`] ties one data channel to both feeds: attaching
//! registers the listeners and returns a snapshot to send first, detaching
//! removes them. The bridge refuses to attach twice or detach twice.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::desktop::{CursorImage, DesktopManager};
use crate::error::Result;
use crate::utils::{ListenerId, Listeners};

/// Distinct cursor bitmaps kept around for reuse
const IMAGE_CACHE_CAPACITY: usize = 32;

/// Least recently used cursor bitmaps, keyed by serial
struct ImageCache {
    capacity: usize,
    images: HashMap<u64, Arc<CursorImage>>,
    order: VecDeque<u64>,
}

impl ImageCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            images: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, serial: u64) -> Option<Arc<CursorImage>> {
        let image = self.images.get(&serial).cloned()?;
        self.touch(serial);
        Some(image)
    }

    fn insert(&mut self, image: Arc<CursorImage>) {
        let serial = image.serial;
        if self.images.insert(serial, image).is_some() {
            self.touch(serial);
            return;
        }
        self.order.push_back(serial);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.images.remove(&oldest);
            }
        }
    }

    fn touch(&mut self, serial: u64) {
        if let Some(pos) = self.order.iter().position(|s| *s == serial) {
            self.order.remove(pos);
        }
        self.order.push_back(serial);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.images.len()
    }
}

/// Cursor bitmap feed
pub struct CursorImageFeed {
    desktop: Arc<dyn DesktopManager>,
    listeners: Listeners<Arc<CursorImage>>,
    cache: Mutex<ImageCache>,
    shutdown: CancellationToken,
}

impl CursorImageFeed {
    pub fn new(desktop: Arc<dyn DesktopManager>) -> Self {
        Self {
            desktop,
            listeners: Listeners::new(),
            cache: Mutex::new(ImageCache::new(IMAGE_CACHE_CAPACITY)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Follow the desktop's cursor change notifications until shutdown
    pub fn start(self: &Arc<Self>, tracker: &TaskTracker) {
        let feed = self.clone();
        let mut changes = self.desktop.subscribe_cursor_changes();
        tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = feed.shutdown.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(serial) => feed.refresh(serial),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!("Cursor feed lagged by {} changes", n);
                            feed.refresh(u64::MAX);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!("Cursor image feed stopped");
        });
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn refresh(&self, serial: u64) {
        let cached = self.cache.lock().get(serial);
        let image = match cached {
            Some(image) => image,
            None => match self.fetch() {
                Ok(image) => image,
                Err(e) => {
                    warn!("Failed to get cursor image: {}", e);
                    return;
                }
            },
        };
        self.listeners.publish(image);
    }

    fn fetch(&self) -> Result<Arc<CursorImage>> {
        let image = Arc::new(self.desktop.cursor_image()?);
        self.cache.lock().insert(image.clone());
        Ok(image)
    }

    /// Latest cursor image, fetched from the desktop if none was seen yet
    pub fn get(&self) -> Result<Arc<CursorImage>> {
        match self.listeners.current() {
            Some(image) => Ok(image),
            None => self.fetch(),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> (ListenerId, Option<Arc<CursorImage>>)
    where
        F: Fn(&Arc<CursorImage>) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Cursor position feed
pub struct CursorPositionFeed {
    desktop: Arc<dyn DesktopManager>,
    listeners: Listeners<(i32, i32)>,
}

impl CursorPositionFeed {
    pub fn new(desktop: Arc<dyn DesktopManager>) -> Self {
        Self {
            desktop,
            listeners: Listeners::new(),
        }
    }

    pub fn set(&self, x: i32, y: i32) {
        self.listeners.publish((x, y));
    }

    pub fn current(&self) -> (i32, i32) {
        self.listeners
            .current()
            .unwrap_or_else(|| self.desktop.cursor_position())
    }

    pub fn subscribe<F>(&self, callback: F) -> (ListenerId, Option<(i32, i32)>)
    where
        F: Fn(&(i32, i32)) + Send + Sync + 'static,
    {
        self.listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Change delivered to an attached data channel
#[derive(Debug, Clone)]
pub enum CursorUpdate {
    Image(Arc<CursorImage>),
    Position(i32, i32),
}

/// State to send right after attaching
#[derive(Debug, Clone)]
pub struct CursorSnapshot {
    pub image: Option<Arc<CursorImage>>,
    pub position: (i32, i32),
}

/// Destination of cursor messages
#[async_trait]
pub trait CursorSink: Send + Sync {
    async fn send_cursor_image(&self, image: &CursorImage) -> Result<()>;

    async fn send_cursor_position(&self, x: i32, y: i32) -> Result<()>;
}

/// Per data channel registration on both feeds
pub struct CursorBridge {
    image: Arc<CursorImageFeed>,
    position: Arc<CursorPositionFeed>,
    binding: Mutex<Option<(ListenerId, ListenerId)>>,
}

impl CursorBridge {
    pub fn new(image: Arc<CursorImageFeed>, position: Arc<CursorPositionFeed>) -> Self {
        Self {
            image,
            position,
            binding: Mutex::new(None),
        }
    }

    /// Register on both feeds, forwarding changes into `tx`
    ///
    /// Returns `None` if already attached.
    pub fn attach(&self, tx: mpsc::UnboundedSender<CursorUpdate>) -> Option<CursorSnapshot> {
        let mut binding = self.binding.lock();
        if binding.is_some() {
            return None;
        }

        let image_tx = tx.clone();
        let (image_id, image) = self.image.subscribe(move |image| {
            let _ = image_tx.send(CursorUpdate::Image(image.clone()));
        });
        let (position_id, position) = self.position.subscribe(move |&(x, y)| {
            let _ = tx.send(CursorUpdate::Position(x, y));
        });
        *binding = Some((image_id, position_id));
        drop(binding);

        let image = image.or_else(|| match self.image.get() {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("Failed to get cursor image: {}", e);
                None
            }
        });
        let position = position.unwrap_or_else(|| self.position.current());

        Some(CursorSnapshot { image, position })
    }

    /// Remove both registrations. Returns false if not attached.
    pub fn detach(&self) -> bool {
        match self.binding.lock().take() {
            Some((image_id, position_id)) => {
                self.image.unsubscribe(image_id);
                self.position.unsubscribe(position_id);
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.binding.lock().is_some()
    }
}

/// Send the snapshot, then forward changes until the bridge detaches
pub async fn stream_cursor<S>(
    sink: &S,
    snapshot: CursorSnapshot,
    mut updates: mpsc::UnboundedReceiver<CursorUpdate>,
) where
    S: CursorSink + ?Sized,
{
    if let Some(image) = snapshot.image {
        if let Err(e) = sink.send_cursor_image(&image).await {
            debug!("Failed to send initial cursor image: {}", e);
        }
    }
    let (x, y) = snapshot.position;
    if let Err(e) = sink.send_cursor_position(x, y).await {
        debug!("Failed to send initial cursor position: {}", e);
    }

    while let Some(update) = updates.recv().await {
        let result = match update {
            CursorUpdate::Image(image) => sink.send_cursor_image(&image).await,
            CursorUpdate::Position(x, y) => sink.send_cursor_position(x, y).await,
        };
        if let Err(e) = result {
            debug!("Failed to send cursor update: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::testing::FakeDesktop;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CursorSink for RecordingSink {
        async fn send_cursor_image(&self, image: &CursorImage) -> Result<()> {
            self.sent.lock().push(format!("image:{}", image.serial));
            Ok(())
        }

        async fn send_cursor_position(&self, x: i32, y: i32) -> Result<()> {
            self.sent.lock().push(format!("position:{},{}", x, y));
            Ok(())
        }
    }

    fn feeds() -> (Arc<FakeDesktop>, Arc<CursorImageFeed>, Arc<CursorPositionFeed>) {
        let desktop = FakeDesktop::new();
        let image = Arc::new(CursorImageFeed::new(desktop.clone()));
        let position = Arc::new(CursorPositionFeed::new(desktop.clone()));
        (desktop, image, position)
    }

    #[test]
    fn test_image_cache_evicts_least_recent() {
        let mut cache = ImageCache::new(2);
        cache.insert(Arc::new(FakeDesktop::image(1)));
        cache.insert(Arc::new(FakeDesktop::image(2)));
        assert!(cache.get(1).is_some());

        cache.insert(Arc::new(FakeDesktop::image(3)));
        assert!(cache.get(2).is_none());
        assert!(cache.get(1).is_some());
        assert!(cache.get(3).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_feed_cache_is_bounded() {
        let (desktop, image, _) = feeds();
        for serial in 1..=100 {
            desktop.change_cursor(serial);
            image.refresh(serial);
        }
        assert_eq!(image.cache.lock().len(), IMAGE_CACHE_CAPACITY);
        assert_eq!(image.get().unwrap().serial, 100);
    }

    #[test]
    fn test_attach_once_detach_once() {
        let (_, image, position) = feeds();
        let bridge = CursorBridge::new(image.clone(), position.clone());
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(bridge.attach(tx.clone()).is_some());
        assert!(bridge.attach(tx).is_none());
        assert_eq!(image.listener_count(), 1);
        assert_eq!(position.listener_count(), 1);

        assert!(bridge.detach());
        assert!(!bridge.detach());
        assert_eq!(image.listener_count(), 0);
        assert_eq!(position.listener_count(), 0);
    }

    #[test]
    fn test_snapshot_falls_back_to_desktop() {
        let (desktop, image, position) = feeds();
        desktop.move_to(40, 50);
        let bridge = CursorBridge::new(image, position);
        let (tx, _rx) = mpsc::unbounded_channel();

        let snapshot = bridge.attach(tx).unwrap();
        assert_eq!(snapshot.position, (40, 50));
        assert_eq!(snapshot.image.unwrap().serial, 1);
    }

    #[tokio::test]
    async fn test_initial_messages_come_first() {
        let (_, image, position) = feeds();
        let bridge = CursorBridge::new(image, position.clone());
        let (tx, rx) = mpsc::unbounded_channel();

        position.set(5, 6);
        let snapshot = bridge.attach(tx).unwrap();
        // changes racing the initial send are queued behind it
        position.set(7, 8);
        bridge.detach();

        let sink = RecordingSink::default();
        stream_cursor(&sink, snapshot, rx).await;
        assert_eq!(
            *sink.sent.lock(),
            vec!["image:1", "position:5,6", "position:7,8"]
        );
    }

    #[tokio::test]
    async fn test_detached_bridge_stops_forwarding() {
        let (_, image, position) = feeds();
        let bridge = CursorBridge::new(image, position.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        bridge.attach(tx).unwrap();
        bridge.detach();
        position.set(1, 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_image_feed_follows_desktop() {
        let (desktop, image, position) = feeds();
        let tracker = TaskTracker::new();
        image.start(&tracker);

        let bridge = CursorBridge::new(image.clone(), position);
        let (tx, mut rx) = mpsc::unbounded_channel();
        bridge.attach(tx).unwrap();

        desktop.change_cursor(2);
        let update = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match update {
            CursorUpdate::Image(img) => assert_eq!(img.serial, 2),
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(image.get().unwrap().serial, 2);

        image.shutdown();
        tracker.close();
        tracker.wait().await;
    }
}
