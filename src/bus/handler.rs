//! EventHandler: queue, consumer task, registration, recording, replay

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::middleware::{Middleware, Next};
use super::recording::{self, RecordingBuffer};
use super::{BusError, BusEvent, FilterId, HandlerError, HandlerId, HandlerResult};

/// Async handler stored by the bus
pub type HandlerFn<E> = Arc<dyn Fn(E) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Predicate deciding whether an event is delivered
pub type FilterFn<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Tunables for an `EventHandler`
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// How long the consumer waits on an empty queue before re-checking
    /// whether it should stop
    pub dequeue_timeout: Duration,
    /// Maximum number of events kept while recording; zero behaves as one
    pub recording_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_millis(100),
            recording_capacity: 1000,
        }
    }
}

struct Registration<E> {
    id: HandlerId,
    kind: String,
    filters: Vec<FilterFn<E>>,
    handler: HandlerFn<E>,
}

struct KindFilter<E> {
    id: FilterId,
    kind: String,
    filter: FilterFn<E>,
}

/// State shared between the handle and the consumer task
struct Shared<E> {
    handlers: RwLock<Vec<Registration<E>>>,
    filters: RwLock<Vec<KindFilter<E>>>,
    middleware: RwLock<Vec<Arc<dyn Middleware<E>>>>,
    recording: Mutex<Option<RecordingBuffer<E>>>,
    /// Events emitted but not yet fully dispatched
    pending: AtomicUsize,
    idle: Notify,
    running: AtomicBool,
}

/// Decrements `pending` when dropped, including on cancellation
struct InFlight<'a, E>(&'a Shared<E>);

impl<E> Drop for InFlight<'_, E> {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl<E: BusEvent> Shared<E> {
    async fn dispatch(&self, event: E) {
        let _in_flight = InFlight(self);
        let kind = event.kind().to_string();

        let passes = self
            .filters
            .read()
            .iter()
            .filter(|f| f.kind == kind)
            .all(|f| (f.filter)(&event));
        if !passes {
            debug!(kind = %kind, "event filtered out");
            return;
        }

        let targets: Vec<(HandlerId, Vec<FilterFn<E>>, HandlerFn<E>)> = self
            .handlers
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| (r.id, r.filters.clone(), Arc::clone(&r.handler)))
            .collect();
        let layers: Vec<Arc<dyn Middleware<E>>> = self.middleware.read().clone();

        for (id, filters, handler) in targets {
            if !filters.iter().all(|f| f(&event)) {
                continue;
            }

            let chain = Next::new(&event, &layers, &handler).run();
            let result = match AssertUnwindSafe(chain).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(HandlerError::Panicked),
            };

            if let Err(e) = result {
                error!(kind = %kind, handler = %id, error = %e, "error in event handler");
            }
        }
    }
}

/// Event bus with a single consumer task
///
/// `emit` never blocks. Events are dispatched one at a time in FIFO order.
pub struct EventHandler<E: BusEvent> {
    config: BusConfig,
    shared: Arc<Shared<E>>,
    tx: mpsc::UnboundedSender<E>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<E>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl<E: BusEvent> EventHandler<E> {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            shared: Arc::new(Shared {
                handlers: RwLock::new(Vec::new()),
                filters: RwLock::new(Vec::new()),
                middleware: RwLock::new(Vec::new()),
                recording: Mutex::new(None),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                running: AtomicBool::new(false),
            }),
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            task: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register an async handler for a kind
    pub fn on<F, Fut>(&self, kind: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.on_filtered(kind, Vec::new(), handler)
    }

    /// Register a handler that only sees events passing all of `filters`
    ///
    /// These filters apply to this handler alone; see `add_filter` for
    /// filters shared by every handler of a kind.
    pub fn on_filtered<F, Fut>(
        &self,
        kind: impl Into<String>,
        filters: Vec<FilterFn<E>>,
        handler: F,
    ) -> HandlerId
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = HandlerId(self.allocate_id());
        let kind = kind.into();
        let handler: HandlerFn<E> = Arc::new(move |event| handler(event).boxed());

        debug!(kind = %kind, handler = %id, "registered handler");
        self.shared.handlers.write().push(Registration {
            id,
            kind,
            filters,
            handler,
        });
        id
    }

    /// Unregister a handler; returns false if it was unknown
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.shared.handlers.write();
        let before = handlers.len();
        handlers.retain(|r| r.id != id);
        handlers.len() != before
    }

    /// Add a filter every event of `kind` must pass before any handler runs
    pub fn add_filter<F>(&self, kind: impl Into<String>, filter: F) -> FilterId
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let id = FilterId(self.allocate_id());
        self.shared.filters.write().push(KindFilter {
            id,
            kind: kind.into(),
            filter: Arc::new(filter),
        });
        id
    }

    pub fn remove_filter(&self, id: FilterId) -> bool {
        let mut filters = self.shared.filters.write();
        let before = filters.len();
        filters.retain(|f| f.id != id);
        filters.len() != before
    }

    /// Append a middleware; earlier registrations wrap later ones
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware<E>>) {
        debug!(middleware = middleware.name(), "added middleware");
        self.shared.middleware.write().push(middleware);
    }

    pub fn handler_count(&self, kind: &str) -> usize {
        self.shared
            .handlers
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .count()
    }

    /// Queue an event for dispatch
    pub fn emit(&self, event: E) {
        if let Some(buffer) = self.shared.recording.lock().as_mut() {
            buffer.push(event.clone());
        }

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(event).is_err() {
            // receiver lives as long as self; only reachable during teardown
            drop(InFlight(&*self.shared));
            warn!("event queue closed, dropping event");
        }
    }

    /// Number of events queued or being dispatched
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Spawn the consumer task; a no-op if already running
    pub fn start(&self) {
        let mut task = self.task.lock();
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let rx = Arc::clone(&self.rx);
        let timeout = self.config.dequeue_timeout;

        *task = Some(tokio::spawn(async move {
            let mut rx = rx.lock().await;
            while shared.running.load(Ordering::Acquire) {
                match tokio::time::timeout(timeout, rx.recv()).await {
                    Ok(Some(event)) => shared.dispatch(event).await,
                    Ok(None) => break,
                    Err(_) => continue,
                }
            }
        }));

        info!("event handler started");
    }

    /// Stop the consumer task and wait for it to exit
    ///
    /// Events still queued stay queued and are dispatched after the next
    /// `start`. A handler running at the moment of the call may be
    /// cancelled part-way.
    pub async fn stop(&self) {
        let handle = {
            let mut task = self.task.lock();
            if !self.shared.running.swap(false, Ordering::AcqRel) {
                return;
            }
            task.take()
        };

        if let Some(handle) = handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "event consumer exited abnormally");
                }
            }
        }

        info!("event handler stopped");
    }

    /// Wait until every emitted event has been dispatched
    ///
    /// Returns false if `timeout` elapses first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pending() == 0;
            }
        }
    }

    /// Begin capturing emitted events, clearing any previous capture
    pub fn start_recording(&self) {
        *self.shared.recording.lock() = Some(RecordingBuffer::new(self.config.recording_capacity));
        info!(capacity = self.config.recording_capacity, "started event recording");
    }

    /// Stop capturing and return what was captured, oldest first
    pub fn stop_recording(&self) -> Vec<E> {
        let events = self
            .shared
            .recording
            .lock()
            .take()
            .map(|mut buffer| buffer.drain())
            .unwrap_or_default();
        info!(count = events.len(), "stopped event recording");
        events
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.lock().is_some()
    }

    /// Re-emit events, preserving their relative timing scaled by `speed`
    ///
    /// The first event is emitted at once; each following one after
    /// `(gap to the previous event) / speed`. Out-of-order timestamps give
    /// a zero delay.
    pub async fn replay(&self, events: &[E], speed: f64) -> Result<(), BusError> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(BusError::InvalidSpeed(speed));
        }

        info!(count = events.len(), speed, "replaying events");
        for (i, event) in events.iter().enumerate() {
            if i > 0 {
                let gap = event.occurred_at() - events[i - 1].occurred_at();
                let gap_secs = gap.num_microseconds().unwrap_or(0).max(0) as f64 / 1_000_000.0;
                if gap_secs > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(gap_secs / speed)).await;
                }
            }
            self.emit(event.clone());
        }
        Ok(())
    }

    pub fn save_events(&self, events: &[E], path: &Path) -> Result<(), BusError>
    where
        E: Serialize,
    {
        recording::save_events(events, path)
    }

    pub fn load_events(&self, path: &Path) -> Result<Vec<E>, BusError>
    where
        E: DeserializeOwned,
    {
        recording::load_events(path)
    }
}

impl<E: BusEvent> Default for EventHandler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> Drop for EventHandler<E> {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InputMute, ObsEvent, ObsEventData, ProgramSceneChanged};

    fn scene(name: &str) -> ObsEvent {
        ObsEvent::new(ObsEventData::CurrentProgramSceneChanged(ProgramSceneChanged {
            scene_name: name.to_string(),
            scene_uuid: None,
        }))
    }

    fn mute(name: &str, muted: bool) -> ObsEvent {
        ObsEvent::new(ObsEventData::InputMuteStateChanged(InputMute {
            input_name: name.to_string(),
            input_uuid: None,
            input_muted: muted,
        }))
    }

    fn scene_name(event: &ObsEvent) -> String {
        match &event.data {
            ObsEventData::CurrentProgramSceneChanged(d) => d.scene_name.clone(),
            _ => String::new(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_in_fifo_order() {
        let bus = EventHandler::<ObsEvent>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        bus.on("CurrentProgramSceneChanged", move |event: ObsEvent| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(scene_name(&event));
                Ok(())
            }
        });

        bus.start();
        for name in ["A", "B", "C"] {
            bus.emit(scene(name));
        }
        assert!(bus.drain(Duration::from_secs(2)).await);
        bus.stop().await;

        assert_eq!(*seen.lock(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_kind_filter_blocks_all_handlers() {
        let bus = EventHandler::<ObsEvent>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        bus.on("InputMuteStateChanged", move |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        let filter = bus.add_filter("InputMuteStateChanged", |e: &ObsEvent| {
            matches!(&e.data, ObsEventData::InputMuteStateChanged(d) if d.input_name == "Microphone")
        });

        bus.start();
        bus.emit(mute("Desktop Audio", true));
        bus.emit(mute("Microphone", true));
        assert!(bus.drain(Duration::from_secs(2)).await);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(bus.remove_filter(filter));
        bus.emit(mute("Desktop Audio", true));
        assert!(bus.drain(Duration::from_secs(2)).await);
        bus.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_others() {
        let bus = EventHandler::<ObsEvent>::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.on("CurrentProgramSceneChanged", |_| async { Err(HandlerError::failed("nope")) });
        bus.on("CurrentProgramSceneChanged", |_| async {
            let explode = true;
            if explode {
                panic!("handler blew up");
            }
            Ok(())
        });
        let c = Arc::clone(&count);
        bus.on("CurrentProgramSceneChanged", move |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.start();
        bus.emit(scene("A"));
        bus.emit(scene("B"));
        assert!(bus.drain(Duration::from_secs(2)).await);
        bus.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_off_unregisters() {
        let bus = EventHandler::<ObsEvent>::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let id = bus.on("ExitStarted", move |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        assert_eq!(bus.handler_count("ExitStarted"), 1);
        assert!(bus.off(id));
        assert!(!bus.off(id));

        bus.start();
        bus.emit(ObsEvent::new(ObsEventData::ExitStarted));
        assert!(bus.drain(Duration::from_secs(2)).await);
        bus.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let bus = EventHandler::<ObsEvent>::new();
        bus.start();
        bus.start();
        assert!(bus.is_running());

        bus.stop().await;
        bus.stop().await;
        assert!(!bus.is_running());

        // queued while stopped, delivered after restart
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.on("ExitStarted", move |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        bus.emit(ObsEvent::new(ObsEventData::ExitStarted));
        assert!(!bus.drain(Duration::from_millis(50)).await);

        bus.start();
        assert!(bus.drain(Duration::from_secs(2)).await);
        bus.stop().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recording_is_bounded() {
        let bus = EventHandler::<ObsEvent>::with_config(BusConfig {
            recording_capacity: 2,
            ..Default::default()
        });

        bus.emit(scene("before"));
        bus.start_recording();
        assert!(bus.is_recording());
        for name in ["A", "B", "C"] {
            bus.emit(scene(name));
        }
        let recorded = bus.stop_recording();

        assert!(!bus.is_recording());
        let names: Vec<String> = recorded.iter().map(scene_name).collect();
        assert_eq!(names, vec!["B", "C"]);
        assert!(bus.stop_recording().is_empty());
    }

    #[tokio::test]
    async fn test_replay_rejects_bad_speed() {
        let bus = EventHandler::<ObsEvent>::new();
        assert!(matches!(bus.replay(&[], 0.0).await, Err(BusError::InvalidSpeed(_))));
        assert!(matches!(bus.replay(&[], -1.0).await, Err(BusError::InvalidSpeed(_))));
        assert!(matches!(bus.replay(&[], f64::NAN).await, Err(BusError::InvalidSpeed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_scales_gaps() {
        let bus = EventHandler::<ObsEvent>::new();
        let base = chrono::Utc::now();
        let events = vec![
            scene("A").at(base),
            scene("B").at(base + chrono::Duration::seconds(10)),
            scene("C").at(base + chrono::Duration::seconds(20)),
        ];

        let started = tokio::time::Instant::now();
        bus.replay(&events, 10.0).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2100));
        assert_eq!(bus.pending(), 3);
    }
}
