pub mod backoff;
pub mod clock_sync;
pub mod poll_loop;
pub mod ws_client;

pub use backoff::Activity;
pub use poll_loop::{BlockReason, PollLoop, StepOutcome};
pub use ws_client::{Invalidation, WsClient};
