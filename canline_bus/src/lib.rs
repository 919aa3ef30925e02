#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! In-process message broker.
//!
//! Topic-addressed fan-out between the simulator, the ingestion pipeline,
//! and anything else holding a subscription. Publishing never blocks:
//! subscriptions are unbounded channels and a disconnected subscriber is
//! pruned on the next publish. The broker is `Clone`; all clones share the
//! same subscription table.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use canline_traits::BusPublisher;
use crossbeam_channel as xch;
use tracing::{debug, trace, warn};

/// One delivered message.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

struct Subscription {
    topic: String,
    tx: xch::Sender<BusMessage>,
}

#[derive(Clone, Default)]
pub struct InProcBroker {
    subs: Arc<Mutex<Vec<Subscription>>>,
}

impl InProcBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to an exact topic. The receiver buffers without bound, so a
    /// slow consumer delays delivery rather than dropping messages.
    pub fn subscribe(&self, topic: &str) -> xch::Receiver<BusMessage> {
        self.subscribe_many(&[topic])
    }

    /// Subscribe to several topics over one receiver; messages interleave in
    /// publish order.
    pub fn subscribe_many(&self, topics: &[&str]) -> xch::Receiver<BusMessage> {
        let (tx, rx) = xch::unbounded();
        if let Ok(mut subs) = self.subs.lock() {
            for topic in topics {
                subs.push(Subscription {
                    topic: (*topic).to_string(),
                    tx: tx.clone(),
                });
            }
            trace!(?topics, total = subs.len(), "subscription added");
        }
        rx
    }
}

impl BusPublisher for InProcBroker {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut subs = self
            .subs
            .lock()
            .map_err(|_| "broker subscription table poisoned")?;
        subs.retain(|sub| {
            if sub.topic != topic {
                return true;
            }
            sub.tx
                .send(BusMessage {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .is_ok()
        });
        Ok(())
    }
}

/// How often a blocked consumer wakes up to check for shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Background consumption loop over one subscription.
///
/// Spawns exactly one thread that is shut down and joined when the consumer
/// is dropped, preventing thread leaks.
pub struct BusConsumer {
    shutdown: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl BusConsumer {
    pub fn spawn<F>(rx: xch::Receiver<BusMessage>, mut handler: F) -> Self
    where
        F: FnMut(&str, &[u8]) + Send + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    debug!("bus consumer received shutdown signal");
                    break;
                }
                match rx.recv_timeout(SHUTDOWN_POLL) {
                    Ok(msg) => handler(&msg.topic, &msg.payload),
                    Err(xch::RecvTimeoutError::Timeout) => {}
                    Err(xch::RecvTimeoutError::Disconnected) => {
                        debug!("bus consumer channel closed, exiting thread");
                        break;
                    }
                }
            }
            trace!("bus consumer thread exiting cleanly");
        });

        Self {
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Request shutdown without waiting; Drop still joins.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for BusConsumer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            if let Err(e) = handle.join() {
                warn!(?e, "bus consumer thread panicked during shutdown");
            }
        }
    }
}
