//! Service tests.
//!
//! - Queue tests: FIFO single-flight dispatch, lifecycle ordering, loading
//! - Cancellation tests: waiting/current/timeout paths and settlement races
//! - Streaming tests: queue holds, alias routing, finalize and mid-stream stop

mod streaming;
mod support;
