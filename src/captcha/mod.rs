pub mod handoff;
pub mod polling;

pub use handoff::{run_handoff, HandoffOutcome};
pub use polling::{poll_until, PollOutcome};
