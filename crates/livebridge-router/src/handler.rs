//! Handler trait.

use async_trait::async_trait;
use livebridge_core::{Envelope, HandlerError};

/// Handles envelopes whose topic matched the pattern it was registered with.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Process one envelope.
    ///
    /// Errors are logged by the router and otherwise ignored.
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

/// Adapter turning a synchronous closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Envelope) -> Result<(), HandlerError> + Send + Sync,
{
    /// Wrap `f` under `name`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Envelope) -> Result<(), HandlerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        (self.f)(envelope)
    }
}
