#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use kotoba_chat::config::{ChatConfig, build_registry};
use kotoba_chat::error::ChatError;
use kotoba_chat::http::{HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport};
use kotoba_chat::{ChatOrchestrator, SessionState, SharedSessions};
use parking_lot::Mutex;
use serde_json::Value;

/// Canned reply for one outbound request.
pub enum Scripted {
    /// Whole body delivered at once.
    Body { status: u16, body: String },
    /// Event-stream chunks; with `hang` the body stays open after the last chunk.
    Events { chunks: Vec<String>, hang: bool },
}

impl Scripted {
    pub fn json(status: u16, body: Value) -> Self {
        Self::Body {
            status,
            body: body.to_string(),
        }
    }

    pub fn events(chunks: Vec<String>) -> Self {
        Self::Events {
            chunks,
            hang: false,
        }
    }

    pub fn hanging_events(chunks: Vec<String>) -> Self {
        Self::Events { chunks, hang: true }
    }
}

/// Request as seen by the transport.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
    pub streaming: bool,
}

/// Transport answering from a queue of scripted responses, in order.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<Recorded>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().clone()
    }

    fn next(&self, request: HttpRequest, streaming: bool) -> Result<Scripted, ChatError> {
        let body = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        self.requests.lock().push(Recorded {
            url: request.url,
            headers: request.headers,
            body,
            streaming,
        });
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| ChatError::transport("no scripted response left"))
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ChatError> {
        match self.next(request, false)? {
            Scripted::Body { status, body } => Ok(HttpResponse {
                status,
                headers: HashMap::new(),
                body: body.into_bytes(),
            }),
            Scripted::Events { chunks, .. } => Ok(HttpResponse {
                status: 200,
                headers: HashMap::new(),
                body: chunks.concat().into_bytes(),
            }),
        }
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, ChatError> {
        let (status, chunks, hang) = match self.next(request, true)? {
            Scripted::Body { status, body } => (status, vec![body], false),
            Scripted::Events { chunks, hang } => (200, chunks, hang),
        };
        let head = stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<_, ChatError>(chunk.into_bytes())),
        );
        let body = if hang {
            head.chain(stream::pending()).boxed()
        } else {
            head.boxed()
        };
        Ok(HttpStreamResponse {
            status,
            headers: HashMap::new(),
            body,
        })
    }
}

pub fn openai_delta(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices": [{"index": 0, "delta": {"content": text}}]})
    )
}

pub fn gemini_chunk(text: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"candidates": [{"content": {"parts": [{"text": text}]}}]})
    )
}

pub fn done() -> String {
    "data: [DONE]\n\n".to_string()
}

/// Orchestrator over the real adapters with one selected, empty conversation.
pub fn harness(
    transport: Arc<ScriptedTransport>,
    model: &str,
) -> (Arc<ChatOrchestrator>, Arc<SharedSessions>) {
    let registry = build_registry(&ChatConfig::default(), transport).expect("registry");
    let sessions = Arc::new(SharedSessions::new(SessionState::new()));
    sessions.create_conversation();
    let orchestrator = ChatOrchestrator::new(Arc::new(registry), sessions.clone());
    orchestrator.set_model(model);
    orchestrator.set_api_key(model, "sk-test");
    (Arc::new(orchestrator), sessions)
}
