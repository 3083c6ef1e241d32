pub mod automation;
pub mod browser;
pub mod captcha;
pub mod core;
pub mod http;
pub mod ws;

// --- Primary core exports ---
pub use core::types;
pub use core::types::{Outcome, StatusEvent};
pub use core::AppState;

pub use automation::{AutomationError, AutomationRegistry, RunContext};
pub use ws::ConnectionRegistry;
