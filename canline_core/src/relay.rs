//! Cross-thread event relay and broadcast fan-out.
//!
//! Bus callbacks run on the consumer thread; observers live with the
//! broadcast loop. `EventRelay::emit` is the only sanctioned crossing point:
//! it enqueues without blocking on the broadcast side, and it silently drops
//! events until `start()` has installed the queue. Observer attachment
//! travels through the same queue, so the registry is only ever touched from
//! the broadcast context.

use std::sync::Mutex;

use canline_traits::Observer;
use crossbeam_channel as xch;
use serde::Serialize;
use tracing::{trace, warn};

/// Live-status envelope delivered to every registered observer.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub kind: String,
    /// Epoch seconds.
    pub ts: u64,
    pub data: serde_json::Value,
}

impl StatusEvent {
    pub fn new(kind: &str, ts: u64, data: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            ts,
            data,
        }
    }
}

enum RelayMsg {
    Event(StatusEvent),
    Attach(Box<dyn Observer + Send>),
}

/// Thread-safe hand-off from ingestion threads into the broadcast loop.
pub struct EventRelay {
    tx: Mutex<Option<xch::Sender<RelayMsg>>>,
}

impl Default for EventRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRelay {
    pub fn new() -> Self {
        Self {
            tx: Mutex::new(None),
        }
    }

    /// Install the queue and hand back the consuming side. Events emitted
    /// before this call are dropped, not buffered.
    pub fn start(&self) -> Broadcaster {
        let (tx, rx) = xch::unbounded();
        if let Ok(mut guard) = self.tx.lock() {
            *guard = Some(tx);
        }
        Broadcaster {
            rx,
            observers: Vec::new(),
        }
    }

    /// Disconnect the queue; the broadcast loop drains and exits.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            *guard = None;
        }
    }

    /// Enqueue an event for broadcast. Callable from any thread; never blocks
    /// on the broadcast context's own execution.
    pub fn emit(&self, event: StatusEvent) {
        let guard = match self.tx.lock() {
            Ok(g) => g,
            Err(_) => return,
        };
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(RelayMsg::Event(event)).is_err() {
                    trace!("broadcast loop gone; event dropped");
                }
            }
            None => trace!("no broadcast context registered; event dropped"),
        }
    }

    /// Register an observer. Returns false (and drops the observer) when no
    /// broadcast context is running.
    pub fn attach(&self, observer: Box<dyn Observer + Send>) -> bool {
        let guard = match self.tx.lock() {
            Ok(g) => g,
            Err(_) => return false,
        };
        match guard.as_ref() {
            Some(tx) => tx.send(RelayMsg::Attach(observer)).is_ok(),
            None => false,
        }
    }
}

/// Single consumer owning the observer registry.
pub struct Broadcaster {
    rx: xch::Receiver<RelayMsg>,
    observers: Vec<Box<dyn Observer + Send>>,
}

impl Broadcaster {
    /// Perpetual FIFO consume-and-fan-out loop. Returns once the relay is
    /// stopped and the queue has drained.
    pub fn run(mut self) {
        while let Ok(msg) = self.rx.recv() {
            match msg {
                RelayMsg::Attach(observer) => self.observers.push(observer),
                RelayMsg::Event(event) => self.dispatch(&event),
            }
        }
        trace!("broadcast loop exiting");
    }

    /// Deliver one event to every observer; a failing observer is pruned and
    /// does not affect delivery to the others.
    fn dispatch(&mut self, event: &StatusEvent) {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "unserializable status event dropped");
                return;
            }
        };
        self.observers.retain_mut(|observer| {
            match observer.deliver(&json) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "observer delivery failed; pruned");
                    false
                }
            }
        });
    }

    #[cfg(test)]
    fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        fail_after: Option<usize>,
        delivered: usize,
    }

    impl Observer for Recorder {
        fn deliver(
            &mut self,
            json: &str,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            if let Some(limit) = self.fail_after {
                if self.delivered >= limit {
                    return Err("connection closed".into());
                }
            }
            self.delivered += 1;
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(json.to_string());
            }
            Ok(())
        }
    }

    fn event(kind: &str, n: u64) -> StatusEvent {
        StatusEvent::new(kind, n, serde_json::json!({ "n": n }))
    }

    #[test]
    fn emit_before_start_is_silently_dropped() {
        let relay = EventRelay::new();
        relay.emit(event("arrival", 1));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let broadcaster = relay.start();
        relay.attach(Box::new(Recorder {
            seen: seen.clone(),
            fail_after: None,
            delivered: 0,
        }));
        relay.emit(event("arrival", 2));
        relay.stop();
        broadcaster.run();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("\"n\":2"));
    }

    #[test]
    fn events_are_broadcast_in_fifo_order() {
        let relay = EventRelay::new();
        let broadcaster = relay.start();
        let seen = Arc::new(Mutex::new(Vec::new()));
        relay.attach(Box::new(Recorder {
            seen: seen.clone(),
            fail_after: None,
            delivered: 0,
        }));
        for n in 0..50 {
            relay.emit(event("fill_result", n));
        }
        relay.stop();
        broadcaster.run();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 50);
        for (n, json) in seen.iter().enumerate() {
            assert!(json.contains(&format!("\"n\":{n}")), "out of order: {json}");
        }
    }

    #[test]
    fn dead_observer_is_pruned_without_affecting_others() {
        let relay = EventRelay::new();
        let mut broadcaster = relay.start();
        let healthy = Arc::new(Mutex::new(Vec::new()));
        let flaky = Arc::new(Mutex::new(Vec::new()));
        relay.attach(Box::new(Recorder {
            seen: healthy.clone(),
            fail_after: None,
            delivered: 0,
        }));
        relay.attach(Box::new(Recorder {
            seen: flaky.clone(),
            fail_after: Some(1),
            delivered: 0,
        }));
        for n in 0..3 {
            relay.emit(event("arrival", n));
        }

        // Drain manually so the registry can be inspected afterwards.
        while let Ok(msg) = broadcaster.rx.try_recv() {
            match msg {
                RelayMsg::Attach(o) => broadcaster.observers.push(o),
                RelayMsg::Event(e) => broadcaster.dispatch(&e),
            }
        }

        assert_eq!(healthy.lock().unwrap().len(), 3);
        assert_eq!(flaky.lock().unwrap().len(), 1);
        assert_eq!(broadcaster.observer_count(), 1);
    }
}
