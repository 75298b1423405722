//! Subscriber handler trait and the stock handler types.
//!
//! A subscription owns one `MessageHandler`. The bus calls `handle` once per
//! matching message, in publish order; an `Err` (or a panic) is logged by the
//! bus and never reaches the publisher.

use conductor_types::event::Message;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure reported by a subscriber handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler rejected or failed to process the message.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The consumer side of a channel handler has been dropped.
    #[error("subscriber channel closed")]
    Closed,
}

/// A push-delivery target for bus messages.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Adapts a closure into a `MessageHandler`.
pub struct FnHandler<F>(F);

impl<F> FnHandler<F>
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        (self.0)(message)
    }
}

/// Forwards every delivered message into an unbounded tokio channel.
///
/// Lets async consumers `recv().await` bus traffic without blocking the
/// publisher.
pub struct ChannelHandler {
    sender: mpsc::UnboundedSender<Message>,
}

impl ChannelHandler {
    /// Create a handler and the receiver it feeds.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl MessageHandler for ChannelHandler {
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self.sender
            .send(message.clone())
            .map_err(|_| HandlerError::Closed)
    }
}
