pub mod bridge;
pub mod chat;
pub mod error;
pub mod events;
pub mod initializer;
pub mod relay;
pub mod traits;
