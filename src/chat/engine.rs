use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::provider::{CompletionProvider, ProviderError, Turn};

/// Per-session conversation memory in front of a completion provider.
///
/// Histories live for the process lifetime. With `max_turns == 0` they
/// grow without bound; otherwise the oldest turns are dropped.
pub struct ChatEngine {
    provider: Arc<dyn CompletionProvider>,
    sessions: Mutex<HashMap<String, Vec<Turn>>>,
    max_turns: usize,
}

/// Wrap the user's words in the supportive-assistant instruction.
pub fn empathetic_prompt(query: &str) -> String {
    format!(
        "You are a kind and supportive mental health assistant. \
         Respond with empathy and offer thoughtful advice or comfort. \
         Here's what the user shared:\n\n{query}\n\n\
         Please provide a gentle, caring response."
    )
}

impl ChatEngine {
    pub fn new(provider: Arc<dyn CompletionProvider>, max_turns: usize) -> Self {
        Self {
            provider,
            sessions: Mutex::new(HashMap::new()),
            max_turns,
        }
    }

    /// Append the wrapped query to the session, ask the provider with the
    /// whole history, and remember the reply.
    ///
    /// On provider failure the pending user turn is removed again so the
    /// history keeps alternating user/model.
    pub async fn get_response(&self, session_id: &str, query: &str) -> Result<String, ProviderError> {
        let pending = Turn::user(empathetic_prompt(query));
        let history = {
            let mut sessions = self.sessions.lock();
            let turns = sessions.entry(session_id.to_owned()).or_default();
            turns.push(pending.clone());
            turns.clone()
        };

        debug!(session_id, turns = history.len(), "requesting completion");

        match self.provider.generate(&history).await {
            Ok(reply) => {
                let mut sessions = self.sessions.lock();
                let turns = sessions.entry(session_id.to_owned()).or_default();
                turns.push(Turn::model(reply.clone()));
                // Evict whole user/model pairs so history never starts mid-exchange
                while self.max_turns > 0 && turns.len() > self.max_turns {
                    turns.drain(..turns.len().min(2));
                }
                Ok(reply)
            }
            Err(e) => {
                warn!(session_id, error = %e, "completion failed");
                let mut sessions = self.sessions.lock();
                if let Some(turns) = sessions.get_mut(session_id) {
                    if let Some(pos) = turns.iter().rposition(|t| *t == pending) {
                        turns.remove(pos);
                    }
                }
                Err(e)
            }
        }
    }

    /// Snapshot of one session's turns.
    pub fn history(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .lock()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}
