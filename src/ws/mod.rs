pub mod broadcast;
pub mod handler;

pub use broadcast::ConnectionRegistry;
