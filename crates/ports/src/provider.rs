//! Pull-based inputs of the stream-fold pipeline.

use async_trait::async_trait;
use rotor_core::UserState;

use crate::error::PortsError;

/// Yields a profile's event history one event at a time.
#[async_trait]
pub trait EventsProvider: Send + Sync {
    /// Next event, `None` when exhausted.
    async fn next_event(&self) -> Result<Option<serde_json::Value>, PortsError>;
}

/// Supplies the seed state of the profile being rebuilt.
#[async_trait]
pub trait UserProvider: Send + Sync {
    /// Current user state.
    async fn user_state(&self) -> Result<UserState, PortsError>;
}

/// [`EventsProvider`] over an in-memory list.
#[derive(Debug, Default)]
pub struct VecEventsProvider {
    events: parking_lot::Mutex<std::collections::VecDeque<serde_json::Value>>,
}

impl VecEventsProvider {
    /// Provider yielding `events` in order.
    pub fn new(events: Vec<serde_json::Value>) -> Self {
        Self {
            events: parking_lot::Mutex::new(events.into()),
        }
    }
}

#[async_trait]
impl EventsProvider for VecEventsProvider {
    async fn next_event(&self) -> Result<Option<serde_json::Value>, PortsError> {
        Ok(self.events.lock().pop_front())
    }
}

#[async_trait]
impl UserProvider for UserState {
    async fn user_state(&self) -> Result<UserState, PortsError> {
        Ok(self.clone())
    }
}
