//! Adaptive polling
//!
//! Invokes an async action on a timer that backs off exponentially while the
//! action fails and snaps back to the base interval on success. Polling can
//! be disabled or hidden at any time; neither cancels an in-flight action.

pub mod scheduler;
pub mod state;

pub use scheduler::{PollSnapshot, Poller, PollerHandle};
pub use state::{DEFAULT_MAX_INTERVAL, PollConfig, PollState};
