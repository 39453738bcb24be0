//! Send and stop for one chat.
//!
//! [`ChatOrchestrator::send`] validates the request, writes the user turn and an empty
//! assistant placeholder into the session store, budgets the prompt, streams the reply
//! into the placeholder and finally kicks off title generation for a conversation's first
//! turn. At most one generation runs at a time; [`ChatOrchestrator::stop`] cancels it.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attachment::{AttachmentFile, prepare_attachments};
use crate::budget::{desired_completion_for, fit_messages_to_budget};
use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::provider::{DynProvider, ReplyRequest};
use crate::registry::ProviderRegistry;
use crate::session::SessionStore;
use crate::title::resolve_title;
use crate::types::{DEFAULT_MODEL, Message, normalize_model};

/// Lifecycle of the single active generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Idle,
    Sending,
    /// `stop` was called and the stream is winding down.
    Aborting,
}

/// How a successful call to [`ChatOrchestrator::send`] ended.
#[derive(Debug)]
pub enum SendOutcome {
    /// The reply streamed to the end. On a conversation's first turn the title request
    /// runs in the background; the handle lets callers wait for it.
    Completed { title_task: Option<JoinHandle<()>> },
    /// The reply was stopped; the placeholder keeps whatever had streamed in.
    Cancelled,
}

struct ActiveGeneration {
    cancel: CancellationToken,
    aborting: bool,
}

struct OrchestratorState {
    model: String,
    api_keys: HashMap<String, String>,
    attachments: Vec<AttachmentFile>,
    active: Option<ActiveGeneration>,
}

/// Drives sends against a [`ProviderRegistry`] and a [`SessionStore`].
pub struct ChatOrchestrator {
    registry: Arc<ProviderRegistry>,
    sessions: Arc<dyn SessionStore>,
    state: Mutex<OrchestratorState>,
}

/// Clears the active generation however `send` exits, including when its future is dropped.
struct ActiveGuard<'a> {
    state: &'a Mutex<OrchestratorState>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.state.lock().active = None;
    }
}

/// Inputs captured once the guards pass.
struct Turn {
    conversation_id: String,
    user_message: String,
    prompt: Vec<Message>,
    first_turn: bool,
    model: String,
    api_key: String,
    files: Vec<AttachmentFile>,
    cancel: CancellationToken,
}

impl ChatOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            registry,
            sessions,
            state: Mutex::new(OrchestratorState {
                model: DEFAULT_MODEL.to_string(),
                api_keys: HashMap::new(),
                attachments: Vec::new(),
                active: None,
            }),
        }
    }

    /// Starts from the configured default model and API keys.
    pub fn from_config(
        config: &ChatConfig,
        registry: Arc<ProviderRegistry>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let orchestrator = Self::new(registry, sessions);
        {
            let mut state = orchestrator.state.lock();
            state.model = config.default_model.clone();
            state.api_keys = config.api_keys.clone();
        }
        orchestrator
    }

    pub fn model(&self) -> String {
        self.state.lock().model.clone()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        self.state.lock().model = model.into();
    }

    /// Stores the key used whenever `model` is selected.
    pub fn set_api_key(&self, model: impl Into<String>, key: impl Into<String>) {
        self.state.lock().api_keys.insert(model.into(), key.into());
    }

    pub fn api_key(&self, model: &str) -> Option<String> {
        self.state.lock().api_keys.get(model).cloned()
    }

    pub fn add_attachments(&self, files: impl IntoIterator<Item = AttachmentFile>) {
        self.state.lock().attachments.extend(files);
    }

    /// Removes the staged file at `index`, if there is one.
    pub fn remove_attachment(&self, index: usize) -> Option<AttachmentFile> {
        let mut state = self.state.lock();
        (index < state.attachments.len()).then(|| state.attachments.remove(index))
    }

    pub fn pending_attachments(&self) -> Vec<AttachmentFile> {
        self.state.lock().attachments.clone()
    }

    pub fn status(&self) -> GenerationStatus {
        match &self.state.lock().active {
            None => GenerationStatus::Idle,
            Some(active) if active.aborting => GenerationStatus::Aborting,
            Some(_) => GenerationStatus::Sending,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status() != GenerationStatus::Idle
    }

    /// Cancels the active generation. Returns `false` when nothing was running.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        match state.active.as_mut() {
            Some(active) => {
                active.aborting = true;
                active.cancel.cancel();
                info!("stopping active generation");
                true
            }
            None => false,
        }
    }

    /// Sends `input` to the current conversation and streams the reply into it.
    ///
    /// # Errors
    ///
    /// [`ChatError::Validation`] when no API key is set for the selected model, the input
    /// is blank, no conversation is selected or another reply is still streaming. Provider,
    /// transport and attachment failures are returned as-is after the partial reply has
    /// been kept. A stop is not an error; it yields [`SendOutcome::Cancelled`].
    pub async fn send(&self, input: &str) -> Result<SendOutcome, ChatError> {
        let turn = self.begin_turn(input)?;
        let _guard = ActiveGuard { state: &self.state };

        info!(
            model = %turn.model,
            conversation = %turn.conversation_id,
            attachments = turn.files.len(),
            "sending message"
        );

        match self.generate(&turn).await {
            Ok(provider) => {
                self.state.lock().attachments.clear();
                let title_task = turn.first_turn.then(|| self.spawn_title(&turn, provider));
                info!(conversation = %turn.conversation_id, "reply completed");
                Ok(SendOutcome::Completed { title_task })
            }
            Err(err) if err.is_cancellation() => {
                info!(conversation = %turn.conversation_id, "reply cancelled");
                Ok(SendOutcome::Cancelled)
            }
            Err(err) => {
                warn!(conversation = %turn.conversation_id, error = %err, "reply failed");
                Err(err)
            }
        }
    }

    /// Runs the guards and registers the new generation.
    fn begin_turn(&self, input: &str) -> Result<Turn, ChatError> {
        let (selected, api_key) = {
            let state = self.state.lock();
            (
                state.model.clone(),
                state.api_keys.get(&state.model).cloned(),
            )
        };
        let api_key = api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ChatError::validation(format!("Please enter your API key for {selected}"))
            })?;

        let user_message = input.trim();
        if user_message.is_empty() {
            return Err(ChatError::validation("Please enter a message"));
        }

        let conversation = self
            .sessions
            .current()
            .ok_or_else(|| ChatError::validation("No chat session selected"))?;

        let mut state = self.state.lock();
        if state.active.is_some() {
            return Err(ChatError::validation("a reply is already being generated"));
        }
        let cancel = CancellationToken::new();
        state.active = Some(ActiveGeneration {
            cancel: cancel.clone(),
            aborting: false,
        });

        let first_turn = conversation.messages.is_empty();
        let mut prompt = conversation.messages;
        prompt.push(Message::user(user_message));

        Ok(Turn {
            conversation_id: conversation.id,
            user_message: user_message.to_string(),
            prompt,
            first_turn,
            model: normalize_model(&selected),
            api_key,
            files: state.attachments.clone(),
            cancel,
        })
    }

    /// Streams one reply into the placeholder; returns the adapter that produced it.
    async fn generate(&self, turn: &Turn) -> Result<DynProvider, ChatError> {
        let id = &turn.conversation_id;
        self.sessions
            .append_message(id, Message::user(turn.user_message.clone()));
        self.sessions.append_message(id, Message::assistant(""));

        let prepared = prepare_attachments(&turn.files)?;
        let mut prompt = turn.prompt.clone();
        prompt.extend(prepared.texts.iter().map(|text| text.to_message()));

        let desired = desired_completion_for(&turn.model, &prompt);
        let fitted = fit_messages_to_budget(&prompt, &turn.model, desired);
        debug!(
            model = %turn.model,
            messages = fitted.messages.len(),
            dropped = prompt.len() - fitted.messages.len(),
            max_completion_tokens = fitted.max_completion_tokens,
            "prompt window fitted"
        );

        let provider = self.registry.resolve(&turn.model)?;
        let request = ReplyRequest {
            model: turn.model.clone(),
            messages: fitted.messages,
            images: prepared.images,
            max_completion_tokens: fitted.max_completion_tokens,
        };

        let mut snapshots = provider
            .stream_reply(request, &turn.api_key, turn.cancel.clone())
            .await?;
        while let Some(snapshot) = snapshots.next().await {
            self.sessions.update_last_message(id, &snapshot?);
        }
        Ok(provider)
    }

    fn spawn_title(&self, turn: &Turn, provider: DynProvider) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let conversation_id = turn.conversation_id.clone();
        let first_message = turn.user_message.clone();
        let model = turn.model.clone();
        let api_key = turn.api_key.clone();

        tokio::spawn(async move {
            let generated = match provider
                .generate_title(&model, &first_message, &api_key)
                .await
            {
                Ok(title) => Some(title),
                Err(err) => {
                    let err = ChatError::TitleGeneration {
                        message: err.to_string(),
                    };
                    warn!(error = %err, "using derived title");
                    None
                }
            };
            if let Some(title) = resolve_title(generated.as_deref(), &first_message) {
                debug!(conversation = %conversation_id, title = %title, "conversation titled");
                sessions.rename(&conversation_id, &title);
            }
        })
    }
}
