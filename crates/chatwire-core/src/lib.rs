//! chatwire core: platform identification, shared data model, canonical events.
//!
//! Everything above this crate (interceptor, decoder, tracker, DOM extractor,
//! adapters) funnels its output into the [`Dispatcher`] defined here.

pub mod config;
pub mod error;
pub mod events;
pub mod platform;
pub mod types;

pub use config::CaptureConfig;
pub use error::{Error, Result};
pub use events::{CanonicalEvent, ChannelSink, Dispatcher, EventSink, MemorySink};
pub use platform::Platform;
pub use types::*;
