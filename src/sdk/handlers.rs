use std::sync::Arc;

use super::state::SessionState;
use super::tools::Suggestion;
use super::transcript::Message;

pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;
pub type SuggestionHandler = Arc<dyn Fn(&Suggestion) + Send + Sync>;
pub type StateHandler = Arc<dyn Fn(SessionState) + Send + Sync>;
pub type SpeakingHandler = Arc<dyn Fn(bool) + Send + Sync>;

/// Optional callbacks, run inline on the session task. Keep them short; hand
/// heavy work to another task.
#[derive(Default, Clone)]
pub struct EventHandlers {
    pub on_message: Option<MessageHandler>,
    pub on_suggestion: Option<SuggestionHandler>,
    pub on_state: Option<StateHandler>,
    pub on_speaking: Option<SpeakingHandler>,
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_message", &self.on_message.is_some())
            .field("on_suggestion", &self.on_suggestion.is_some())
            .field("on_state", &self.on_state.is_some())
            .field("on_speaking", &self.on_speaking.is_some())
            .finish()
    }
}

impl EventHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_suggestion<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Suggestion) + Send + Sync + 'static,
    {
        self.on_suggestion = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_state<F>(mut self, handler: F) -> Self
    where
        F: Fn(SessionState) + Send + Sync + 'static,
    {
        self.on_state = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn on_speaking<F>(mut self, handler: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.on_speaking = Some(Arc::new(handler));
        self
    }
}
