#![forbid(unsafe_code)]

pub mod alerts;
pub mod chat_log;
pub mod pump;
pub mod ring;
pub mod trace;

#[cfg(test)]
mod pump_tests;

pub use alerts::{AlertPump, AlertPumpConfig, DuplicateAlert};
pub use chat_log::{ChatLogConfig, ChatLogStore, LogSink};
pub use pump::{EventPump, PumpConfig, PumpError, PumpEvent, PumpPolicy, Subscription};
pub use ring::{RingBuffer, RingError};
pub use trace::{Direction, TraceStore};
