use crate::session::ConversationController;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Owner of the single active conversation
    pub controller: Arc<ConversationController>,
}

impl AppState {
    pub fn new(controller: Arc<ConversationController>) -> Self {
        Self { controller }
    }
}
