//! Handler middleware
//!
//! Middleware wraps every handler call. The first registered middleware is
//! the outermost layer. Each layer receives a `Next` continuation that runs
//! the rest of the chain; `Next::run` consumes it, so the inner chain runs
//! at most once. A layer that never calls it suppresses the handler.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tracing::{error, info, warn};

use super::handler::HandlerFn;
use super::{BusEvent, HandlerResult};

/// A layer around handler execution
pub trait Middleware<E: BusEvent>: Send + Sync {
    fn handle<'a>(&'a self, event: &'a E, next: Next<'a, E>) -> BoxFuture<'a, HandlerResult>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The rest of the middleware chain plus the handler itself
pub struct Next<'a, E: BusEvent> {
    event: &'a E,
    layers: &'a [std::sync::Arc<dyn Middleware<E>>],
    handler: &'a HandlerFn<E>,
}

impl<'a, E: BusEvent> Next<'a, E> {
    pub(crate) fn new(
        event: &'a E,
        layers: &'a [std::sync::Arc<dyn Middleware<E>>],
        handler: &'a HandlerFn<E>,
    ) -> Self {
        Self {
            event,
            layers,
            handler,
        }
    }

    /// Run the remaining layers and then the handler
    pub fn run(self) -> BoxFuture<'a, HandlerResult> {
        match self.layers.split_first() {
            Some((layer, rest)) => layer.handle(
                self.event,
                Next {
                    event: self.event,
                    layers: rest,
                    handler: self.handler,
                },
            ),
            None => (self.handler)(self.event.clone()),
        }
    }
}

/// Logs every event before it reaches the handler
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

impl<E: BusEvent> Middleware<E> for LoggingMiddleware {
    fn handle<'a>(&'a self, event: &'a E, next: Next<'a, E>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            info!(kind = event.kind(), occurred_at = %event.occurred_at(), "event");
            next.run().await
        })
    }
}

/// Warns when the inner chain takes longer than `threshold`
#[derive(Debug, Clone, Copy)]
pub struct TimingMiddleware {
    pub threshold: Duration,
}

impl TimingMiddleware {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

impl Default for TimingMiddleware {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl<E: BusEvent> Middleware<E> for TimingMiddleware {
    fn handle<'a>(&'a self, event: &'a E, next: Next<'a, E>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let start = Instant::now();
            let result = next.run().await;
            let elapsed = start.elapsed();
            if elapsed > self.threshold {
                warn!(
                    kind = event.kind(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow handler"
                );
            }
            result
        })
    }
}

/// Logs and swallows errors from the inner chain
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverMiddleware;

impl<E: BusEvent> Middleware<E> for RecoverMiddleware {
    fn handle<'a>(&'a self, event: &'a E, next: Next<'a, E>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            if let Err(e) = next.run().await {
                error!(kind = event.kind(), error = %e, "error handling event");
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::HandlerError;
    use crate::types::{ObsEvent, ObsEventData};
    use futures::FutureExt;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Tag {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        call_next: bool,
    }

    impl Middleware<ObsEvent> for Tag {
        fn handle<'a>(
            &'a self,
            _event: &'a ObsEvent,
            next: Next<'a, ObsEvent>,
        ) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async move {
                self.log.lock().push(format!("{}:pre", self.name));
                let result = if self.call_next { next.run().await } else { Ok(()) };
                self.log.lock().push(format!("{}:post", self.name));
                result
            })
        }
    }

    fn recording_handler(log: Arc<Mutex<Vec<String>>>) -> HandlerFn<ObsEvent> {
        Arc::new(move |_event: ObsEvent| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push("handler".to_string());
                Ok(())
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let layers: Vec<Arc<dyn Middleware<ObsEvent>>> = vec![
            Arc::new(Tag { name: "outer", log: Arc::clone(&log), call_next: true }),
            Arc::new(Tag { name: "inner", log: Arc::clone(&log), call_next: true }),
        ];
        let handler = recording_handler(Arc::clone(&log));
        let event = ObsEvent::new(ObsEventData::ExitStarted);

        Next::new(&event, &layers, &handler).run().await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["outer:pre", "inner:pre", "handler", "inner:post", "outer:post"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_suppresses_inner() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let layers: Vec<Arc<dyn Middleware<ObsEvent>>> = vec![
            Arc::new(Tag { name: "gate", log: Arc::clone(&log), call_next: false }),
            Arc::new(Tag { name: "inner", log: Arc::clone(&log), call_next: true }),
        ];
        let handler = recording_handler(Arc::clone(&log));
        let event = ObsEvent::new(ObsEventData::ExitStarted);

        Next::new(&event, &layers, &handler).run().await.unwrap();

        assert_eq!(*log.lock(), vec!["gate:pre", "gate:post"]);
    }

    #[tokio::test]
    async fn test_recover_swallows_errors() {
        let layers: Vec<Arc<dyn Middleware<ObsEvent>>> = vec![Arc::new(RecoverMiddleware)];
        let handler: HandlerFn<ObsEvent> =
            Arc::new(|_: ObsEvent| async { Err(HandlerError::failed("boom")) }.boxed());
        let event = ObsEvent::new(ObsEventData::ExitStarted);

        assert!(Next::new(&event, &layers, &handler).run().await.is_ok());
        assert!(Next::new(&event, &[], &handler).run().await.is_err());
    }

    #[tokio::test]
    async fn test_timing_passes_result_through() {
        let layers: Vec<Arc<dyn Middleware<ObsEvent>>> =
            vec![Arc::new(TimingMiddleware::new(Duration::from_millis(1))), Arc::new(LoggingMiddleware)];
        let handler: HandlerFn<ObsEvent> = Arc::new(|_: ObsEvent| {
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err(HandlerError::failed("slow and broken"))
            }
            .boxed()
        });
        let event = ObsEvent::new(ObsEventData::ExitStarted);

        let result = Next::new(&event, &layers, &handler).run().await;
        assert_eq!(result, Err(HandlerError::failed("slow and broken")));
    }
}
