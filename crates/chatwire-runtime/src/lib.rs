//! Capture session runtime.
//!
//! A [`CaptureSession`] is the explicit context for one page: it owns the
//! platform, endpoint table, dispatcher, conversation tracker, processed-id
//! set and adapters, and hands out the network and page attachment points.

pub mod observer;
pub mod session;

pub use observer::PageObserver;
pub use session::CaptureSession;
