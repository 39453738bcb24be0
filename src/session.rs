//! Conversation list state and the store port the orchestrator writes through.
//!
//! [`SessionState`] is a plain value with pure update methods. [`SharedSessions`] wraps it
//! behind a mutex so every mutation is a read-modify-write on the latest state, and hands a
//! snapshot to the debounced saver after each change.

use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ChatError;
use crate::persist::{DebouncedSaver, DynSessionPersistence, StoredSessions};
use crate::types::{Conversation, Message};

/// Port to the conversation store.
///
/// Mutations address conversations by id and are no-ops for ids that no longer exist,
/// so a reply that outlives its conversation is simply dropped.
pub trait SessionStore: Send + Sync {
    /// The selected conversation, if any.
    fn current(&self) -> Option<Conversation>;

    /// Replaces the whole list; the first conversation becomes current.
    fn replace_all(&self, conversations: Vec<Conversation>);

    fn append_message(&self, conversation_id: &str, message: Message);

    /// Overwrites the content of the last message of a conversation.
    fn update_last_message(&self, conversation_id: &str, content: &str);

    fn rename(&self, conversation_id: &str, title: &str);
}

/// All conversations plus the current selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    conversations: Vec<Conversation>,
    current_id: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing list, selecting its first conversation.
    pub fn from_conversations(conversations: Vec<Conversation>) -> Self {
        let current_id = conversations.first().map(|conversation| conversation.id.clone());
        Self {
            conversations,
            current_id,
        }
    }

    /// Rebuilds state from a saved snapshot. A saved selection that no longer exists
    /// falls back to the first conversation.
    pub fn from_stored(stored: StoredSessions) -> Self {
        let mut state = Self::from_conversations(stored.conversations);
        if let Some(id) = stored.current_id.filter(|id| state.find(id).is_some()) {
            state.current_id = Some(id);
        }
        state
    }

    pub fn to_stored(&self) -> StoredSessions {
        StoredSessions {
            conversations: self.conversations.clone(),
            current_id: self.current_id.clone(),
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current_id.as_deref()
    }

    pub fn current(&self) -> Option<&Conversation> {
        let id = self.current_id.as_deref()?;
        self.find(id)
    }

    fn find(&self, id: &str) -> Option<&Conversation> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|conversation| conversation.id == id)
    }

    /// Appends an empty conversation titled `Chat <n>` and selects it. Returns its id.
    pub fn create_conversation(&mut self) -> String {
        let id = Uuid::new_v4().to_string();
        self.conversations.push(Conversation {
            id: id.clone(),
            title: format!("Chat {}", self.conversations.len() + 1),
            messages: Vec::new(),
        });
        self.current_id = Some(id.clone());
        id
    }

    /// Creates `Chat 1` when the list is empty. Returns whether one was created.
    pub fn ensure_conversation(&mut self) -> bool {
        if !self.conversations.is_empty() {
            return false;
        }
        self.create_conversation();
        true
    }

    /// Removes the current conversation; the first remaining one becomes current.
    pub fn delete_current(&mut self) -> Option<Conversation> {
        let id = self.current_id.take()?;
        let index = self
            .conversations
            .iter()
            .position(|conversation| conversation.id == id)?;
        let removed = self.conversations.remove(index);
        self.current_id = self
            .conversations
            .first()
            .map(|conversation| conversation.id.clone());
        Some(removed)
    }

    pub fn select(&mut self, id: &str) -> Result<(), ChatError> {
        if self.find(id).is_none() {
            return Err(ChatError::validation(format!("no conversation with id {id}")));
        }
        self.current_id = Some(id.to_string());
        Ok(())
    }

    /// Sets a trimmed, non-blank title.
    pub fn rename(&mut self, id: &str, title: &str) -> Result<(), ChatError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ChatError::validation("title must not be empty"));
        }
        let conversation = self
            .find_mut(id)
            .ok_or_else(|| ChatError::validation(format!("no conversation with id {id}")))?;
        conversation.title = title.to_string();
        Ok(())
    }

    /// Replaces the text of message `index` in the current conversation.
    pub fn edit_message(&mut self, index: usize, text: &str) -> Result<(), ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::validation("message must not be empty"));
        }
        let id = self
            .current_id
            .clone()
            .ok_or_else(|| ChatError::validation("No chat session selected"))?;
        let message = self
            .find_mut(&id)
            .and_then(|conversation| conversation.messages.get_mut(index))
            .ok_or_else(|| ChatError::validation(format!("no message at index {index}")))?;
        message.content = text.to_string();
        Ok(())
    }

    pub fn append_message(&mut self, id: &str, message: Message) -> bool {
        match self.find_mut(id) {
            Some(conversation) => {
                conversation.messages.push(message);
                true
            }
            None => false,
        }
    }

    pub fn update_last_message(&mut self, id: &str, content: &str) -> bool {
        match self
            .find_mut(id)
            .and_then(|conversation| conversation.messages.last_mut())
        {
            Some(last) => {
                last.content = content.to_string();
                true
            }
            None => false,
        }
    }

    /// Pretty-printed JSON array of every conversation.
    pub fn export_json(&self) -> Result<String, ChatError> {
        serde_json::to_string_pretty(&self.conversations).map_err(|err| ChatError::Persistence {
            message: format!("failed to export conversations: {err}"),
        })
    }

    /// Replaces every conversation with the parsed `json` and selects the first.
    ///
    /// # Errors
    ///
    /// [`ChatError::Import`] when the input is blank, not an array, or holds an entry
    /// without an id, a title or a messages array. State is left untouched on error.
    pub fn import_json(&mut self, json: &str) -> Result<(), ChatError> {
        let conversations = parse_import(json)?;
        *self = Self::from_conversations(conversations);
        Ok(())
    }
}

fn import_error(message: impl Into<String>) -> ChatError {
    ChatError::Import {
        message: message.into(),
    }
}

fn non_empty_string(entry: &Value, field: &str) -> bool {
    entry
        .get(field)
        .and_then(Value::as_str)
        .is_some_and(|value| !value.is_empty())
}

fn parse_import(json: &str) -> Result<Vec<Conversation>, ChatError> {
    if json.trim().is_empty() {
        return Err(import_error("Please paste valid JSON to import"));
    }
    let value: Value = serde_json::from_str(json).map_err(|err| import_error(err.to_string()))?;
    let entries = value
        .as_array()
        .ok_or_else(|| import_error("Invalid format: expected an array"))?;
    for entry in entries {
        let valid = non_empty_string(entry, "id")
            && non_empty_string(entry, "title")
            && entry.get("messages").is_some_and(Value::is_array);
        if !valid {
            return Err(import_error("Invalid session format"));
        }
    }
    serde_json::from_value(value).map_err(|err| import_error(err.to_string()))
}

/// Thread-safe [`SessionStore`] over a [`SessionState`].
#[derive(Default)]
pub struct SharedSessions {
    state: Mutex<SessionState>,
    saver: Option<DebouncedSaver>,
}

impl SharedSessions {
    pub fn new(state: SessionState) -> Self {
        Self {
            state: Mutex::new(state),
            saver: None,
        }
    }

    /// Loads the last saved state and keeps saving every later change to the same store.
    ///
    /// An empty store starts with a fresh `Chat 1`, which is saved right away so the next
    /// start sees it too.
    ///
    /// # Errors
    ///
    /// Whatever [`SessionPersistence::load`](crate::persist::SessionPersistence::load)
    /// returns. Must be called inside a Tokio runtime.
    pub async fn restore(
        persistence: DynSessionPersistence,
        quiet_period: Duration,
    ) -> Result<Self, ChatError> {
        let stored = persistence.load().await?;
        let mut state = SessionState::from_stored(stored);
        let created = state.ensure_conversation();
        info!(
            conversations = state.conversations.len(),
            created_first = created,
            "sessions restored"
        );

        let saver = DebouncedSaver::spawn(persistence, quiet_period);
        if created {
            saver.schedule(state.to_stored());
        }
        Ok(Self::new(state).with_saver(saver))
    }

    /// Sends a snapshot to `saver` after every mutation.
    pub fn with_saver(mut self, saver: DebouncedSaver) -> Self {
        self.saver = Some(saver);
        self
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().conversations.clone()
    }

    /// Applies `change` under the lock, then schedules a save of the result.
    pub fn update<R>(&self, change: impl FnOnce(&mut SessionState) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.state.lock();
            let result = change(&mut state);
            let snapshot = self.saver.as_ref().map(|_| state.to_stored());
            (result, snapshot)
        };
        if let (Some(saver), Some(snapshot)) = (&self.saver, snapshot) {
            saver.schedule(snapshot);
        }
        result
    }

    pub fn create_conversation(&self) -> String {
        self.update(SessionState::create_conversation)
    }

    pub fn delete_current(&self) -> Option<Conversation> {
        self.update(SessionState::delete_current)
    }

    pub fn select(&self, id: &str) -> Result<(), ChatError> {
        self.update(|state| state.select(id))
    }

    pub fn rename_conversation(&self, id: &str, title: &str) -> Result<(), ChatError> {
        self.update(|state| state.rename(id, title))
    }

    pub fn edit_message(&self, index: usize, text: &str) -> Result<(), ChatError> {
        self.update(|state| state.edit_message(index, text))
    }

    pub fn export_json(&self) -> Result<String, ChatError> {
        self.state.lock().export_json()
    }

    pub fn import_json(&self, json: &str) -> Result<(), ChatError> {
        self.update(|state| state.import_json(json))
    }
}

impl SessionStore for SharedSessions {
    fn current(&self) -> Option<Conversation> {
        self.state.lock().current().cloned()
    }

    fn replace_all(&self, conversations: Vec<Conversation>) {
        self.update(|state| *state = SessionState::from_conversations(conversations));
    }

    fn append_message(&self, conversation_id: &str, message: Message) {
        self.update(|state| state.append_message(conversation_id, message));
    }

    fn update_last_message(&self, conversation_id: &str, content: &str) {
        self.update(|state| state.update_last_message(conversation_id, content));
    }

    fn rename(&self, conversation_id: &str, title: &str) {
        if let Err(err) = self.update(|state| state.rename(conversation_id, title)) {
            debug!(conversation = %conversation_id, error = %err, "title not applied");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::persist::SessionPersistence;

    #[derive(Default)]
    struct MemoryPersistence {
        initial: StoredSessions,
        saves: Mutex<Vec<StoredSessions>>,
    }

    #[async_trait]
    impl SessionPersistence for MemoryPersistence {
        async fn save(&self, sessions: &StoredSessions) -> Result<(), ChatError> {
            self.saves.lock().push(sessions.clone());
            Ok(())
        }

        async fn load(&self) -> Result<StoredSessions, ChatError> {
            Ok(self.initial.clone())
        }
    }

    const QUIET: Duration = Duration::from_millis(600);

    fn state_with_two() -> (SessionState, String, String) {
        let mut state = SessionState::new();
        let first = state.create_conversation();
        let second = state.create_conversation();
        (state, first, second)
    }

    #[test]
    fn create_numbers_titles_and_selects() {
        let (state, first, second) = state_with_two();
        assert_eq!(state.conversations()[0].title, "Chat 1");
        assert_eq!(state.conversations()[1].title, "Chat 2");
        assert_ne!(first, second);
        assert_eq!(state.current_id(), Some(second.as_str()));
    }

    #[test]
    fn delete_current_selects_first_remaining() {
        let (mut state, first, second) = state_with_two();
        let removed = state.delete_current().expect("removed");
        assert_eq!(removed.id, second);
        assert_eq!(state.current_id(), Some(first.as_str()));

        state.delete_current();
        assert!(state.conversations().is_empty());
        assert_eq!(state.current_id(), None);
        assert!(state.delete_current().is_none());
    }

    #[test]
    fn rename_trims_and_rejects_blank() {
        let (mut state, first, _) = state_with_two();
        state.rename(&first, "  Trip plans ").expect("rename");
        assert_eq!(state.conversations()[0].title, "Trip plans");
        assert!(matches!(
            state.rename(&first, "   "),
            Err(ChatError::Validation { .. })
        ));
        assert!(state.select("missing").is_err());
    }

    #[test]
    fn edit_message_targets_current_conversation() {
        let (mut state, _, second) = state_with_two();
        state.append_message(&second, Message::user("helo"));
        state.edit_message(0, " hello ").expect("edit");
        assert_eq!(state.current().expect("current").messages[0].content, "hello");
        assert!(state.edit_message(0, "").is_err());
        assert!(state.edit_message(5, "x").is_err());
    }

    #[test]
    fn update_last_message_ignores_unknown_ids() {
        let (mut state, first, _) = state_with_two();
        assert!(!state.update_last_message(&first, "nothing to update"));
        state.append_message(&first, Message::assistant(""));
        assert!(state.update_last_message(&first, "streamed"));
        assert!(!state.update_last_message("gone", "x"));
        assert_eq!(state.conversations()[0].messages[0].content, "streamed");
    }

    #[test]
    fn export_then_import_round_trips() {
        let (mut state, first, second) = state_with_two();
        state.append_message(&first, Message::user("hi"));
        state.append_message(&first, Message::assistant("hello"));
        let json = state.export_json().expect("export");

        let mut restored = SessionState::new();
        restored.import_json(&json).expect("import");
        assert_eq!(restored.conversations(), state.conversations());
        assert_eq!(restored.current_id(), Some(first.as_str()));
        assert_ne!(restored.current_id(), Some(second.as_str()));
    }

    #[test]
    fn malformed_import_leaves_state_untouched() {
        let (mut state, _, _) = state_with_two();
        let before = state.clone();
        for input in [
            "",
            "not json",
            r#"{"id": "1"}"#,
            r#"[{"id": "1", "title": "", "messages": []}]"#,
            r#"[{"id": "1", "title": "A"}]"#,
            r#"[{"id": "1", "title": "A", "messages": [{"role": "robot", "content": "x"}]}]"#,
        ] {
            let err = state.import_json(input).expect_err(input);
            assert!(matches!(err, ChatError::Import { .. }), "{input}: {err:?}");
            assert_eq!(state, before);
        }
    }

    #[test]
    fn shared_sessions_implement_store() {
        let sessions = SharedSessions::new(SessionState::new());
        let id = sessions.create_conversation();
        sessions.append_message(&id, Message::user("q"));
        sessions.append_message(&id, Message::assistant(""));
        sessions.update_last_message(&id, "partial");
        sessions.rename(&id, "Named");

        let current = sessions.current().expect("current");
        assert_eq!(current.title, "Named");
        assert_eq!(current.messages[1].content, "partial");

        sessions.replace_all(Vec::new());
        assert!(sessions.current().is_none());
    }

    #[test]
    fn store_rename_leaves_title_on_blank() {
        let sessions = SharedSessions::new(SessionState::new());
        let id = sessions.create_conversation();
        sessions.rename(&id, "  ");
        assert_eq!(sessions.current().expect("current").title, "Chat 1");
    }

    #[test]
    fn from_stored_restores_selection_or_falls_back() {
        let (state, first, second) = state_with_two();
        let mut stored = state.to_stored();
        assert_eq!(stored.current_id.as_deref(), Some(second.as_str()));
        assert_eq!(SessionState::from_stored(stored.clone()), state);

        stored.current_id = Some("deleted".into());
        let restored = SessionState::from_stored(stored);
        assert_eq!(restored.current_id(), Some(first.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn restore_starts_first_run_with_saved_chat() {
        let store = Arc::new(MemoryPersistence::default());
        let sessions = SharedSessions::restore(store.clone(), QUIET)
            .await
            .expect("restore");

        let current = sessions.current().expect("a chat is selected");
        assert_eq!(current.title, "Chat 1");
        assert!(current.messages.is_empty());

        tokio::time::sleep(QUIET + Duration::from_millis(1)).await;
        let saves = store.saves.lock().clone();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].current_id.as_deref(), Some(current.id.as_str()));
        assert_eq!(saves[0].conversations, vec![current]);
    }

    #[tokio::test(start_paused = true)]
    async fn restore_keeps_saved_selection_without_writing() {
        let (state, _, _) = state_with_two();
        let mut initial = state.to_stored();
        let first = state.conversations()[0].id.clone();
        initial.current_id = Some(first.clone());
        let store = Arc::new(MemoryPersistence {
            initial,
            ..MemoryPersistence::default()
        });

        let sessions = SharedSessions::restore(store.clone(), QUIET)
            .await
            .expect("restore");
        assert_eq!(sessions.snapshot().current_id(), Some(first.as_str()));
        assert_eq!(sessions.conversations().len(), 2);

        tokio::time::sleep(QUIET * 2).await;
        assert!(store.saves.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn streamed_updates_coalesce_into_one_save() {
        let store = Arc::new(MemoryPersistence::default());
        let sessions = SharedSessions::new(SessionState::new())
            .with_saver(DebouncedSaver::spawn(store.clone(), QUIET));
        let id = sessions.create_conversation();
        sessions.append_message(&id, Message::user("q"));
        sessions.append_message(&id, Message::assistant(""));

        let mut reply = String::new();
        for _ in 0..50 {
            reply.push('x');
            sessions.update_last_message(&id, &reply);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.saves.lock().is_empty());

        tokio::time::sleep(QUIET).await;
        let saves = store.saves.lock().clone();
        assert_eq!(saves.len(), 1);
        let saved = &saves[0].conversations[0];
        assert_eq!(saved.messages[1].content.len(), 50);
        assert_eq!(saves[0].current_id.as_deref(), Some(id.as_str()));
    }
}
