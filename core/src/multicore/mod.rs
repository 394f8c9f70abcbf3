//! Thread-to-core pinning used by the scheduler and admin controller worker threads.

mod pin;

pub use pin::pin_thread_to_core;
