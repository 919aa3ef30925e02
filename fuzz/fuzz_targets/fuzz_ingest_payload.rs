#![no_main]
use std::sync::Arc;

use canline_core::control::{ControlCfg, ValveController};
use canline_core::ingest::{Ingestor, TOPIC_ARRIVAL, TOPIC_FILL_RESULT};
use canline_core::mocks::{MemPublisher, MemStore};
use canline_core::relay::EventRelay;
use canline_core::spc::SpcCfg;
use canline_traits::MonotonicClock;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes through both message handlers: malformed payloads must
    // be dropped, never panic.
    let mut ingestor = Ingestor::new(
        MemStore::new(),
        MemPublisher::new(),
        Arc::new(EventRelay::new()),
        ValveController::new(ControlCfg::default()),
        SpcCfg::default(),
        Arc::new(MonotonicClock::new()),
        "line1",
        "SIM",
    );
    ingestor.handle_message(TOPIC_ARRIVAL, data);
    ingestor.handle_message(TOPIC_FILL_RESULT, data);
});
