//! Event bus: topic logs, subscriptions and the subscriber handler seam.

pub mod bus;
pub mod handler;

pub use bus::EventBus;
pub use handler::{ChannelHandler, FnHandler, HandlerError, MessageHandler};
