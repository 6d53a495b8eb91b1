use crate::agent::ConversationTurn;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory conversation histories keyed by session id.
///
/// Two concurrent asks on the same session both start from the same
/// history; the later `replace` wins.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Vec<ConversationTurn>>>,
}

impl SessionStore {
    /// Returns `requested` if it names a live session, otherwise opens a new one.
    pub async fn get_or_create(&self, requested: Option<&str>) -> String {
        if let Some(id) = requested {
            if self.sessions.read().await.contains_key(id) {
                return id.to_string();
            }
        }

        let id = Uuid::new_v4().simple().to_string();
        self.sessions.write().await.insert(id.clone(), Vec::new());
        id
    }

    pub async fn history(&self, id: &str) -> Vec<ConversationTurn> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn replace(&self, id: &str, turns: Vec<ConversationTurn>) {
        self.sessions.write().await.insert(id.to_string(), turns);
    }

    pub async fn reset(&self, id: &str) {
        self.replace(id, Vec::new()).await;
    }
}
