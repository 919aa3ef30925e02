pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Outbound side of the message bus. Implementations must be safe to call
/// from any thread; a failed publish is reported, never retried here.
pub trait BusPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// A registered live-status observer. Delivery is best-effort: a returned
/// error marks the observer dead and it is removed from the registry.
pub trait Observer {
    fn deliver(&mut self, json: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
