//! Shared state for the control surface

use std::sync::Arc;

use crate::exchange::Exchange;
use crate::session::SessionController;

pub struct AppState<E: Exchange> {
    pub controller: Arc<SessionController<E>>,
    /// Used directly by the pass-through endpoints
    pub exchange: Arc<E>,
}

impl<E: Exchange> AppState<E> {
    pub fn new(controller: Arc<SessionController<E>>, exchange: Arc<E>) -> Self {
        Self {
            controller,
            exchange,
        }
    }
}

impl<E: Exchange> Clone for AppState<E> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            exchange: Arc::clone(&self.exchange),
        }
    }
}
