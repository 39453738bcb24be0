mod common;

use std::time::Duration;

use kotoba_chat::attachment::AttachmentFile;
use kotoba_chat::error::ChatError;
use kotoba_chat::{GenerationStatus, Role, SendOutcome, SessionState, SessionStore};
use serde_json::json;

use common::{Scripted, ScriptedTransport, done, gemini_chunk, harness, openai_delta};

async fn await_title(outcome: SendOutcome) {
    match outcome {
        SendOutcome::Completed {
            title_task: Some(task),
        } => task.await.expect("title task"),
        other => panic!("expected a completed first turn, got {other:?}"),
    }
}

#[tokio::test]
async fn streams_reply_into_placeholder_and_titles_first_turn() {
    let transport = ScriptedTransport::new(vec![
        Scripted::events(vec![openai_delta("Hel"), openai_delta("lo!"), done()]),
        Scripted::json(
            200,
            json!({"choices": [{"message": {"content": "\"Friendly Greeting\""}}]}),
        ),
    ]);
    let (orchestrator, sessions) = harness(transport.clone(), "gpt-4-turbo");

    let outcome = orchestrator.send("  hi there ").await.expect("send");
    await_title(outcome).await;

    let conversation = sessions.current().expect("current");
    assert_eq!(conversation.title, "Friendly Greeting");
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[0].role, Role::User);
    assert_eq!(conversation.messages[0].content, "hi there");
    assert_eq!(conversation.messages[1].role, Role::Assistant);
    assert_eq!(conversation.messages[1].content, "Hello!");

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, "https://api.openai.com/v1/chat/completions");
    assert!(requests[0].streaming);
    assert_eq!(requests[0].body["stream"], json!(true));
    assert_eq!(
        requests[0].headers.get("Authorization"),
        Some(&"Bearer sk-test".to_string())
    );
    assert_eq!(requests[0].body["messages"][0]["content"], json!("hi there"));
    assert_eq!(orchestrator.status(), GenerationStatus::Idle);
}

#[tokio::test]
async fn second_turn_sends_history_and_skips_title() {
    let transport = ScriptedTransport::new(vec![
        Scripted::events(vec![openai_delta("first"), done()]),
        Scripted::json(500, json!({"error": {"message": "boom"}})),
        Scripted::events(vec![openai_delta("second"), done()]),
    ]);
    let (orchestrator, sessions) = harness(transport.clone(), "gpt-4-turbo");

    await_title(orchestrator.send("one").await.expect("first")).await;
    let outcome = orchestrator.send("two").await.expect("second");
    assert!(matches!(
        outcome,
        SendOutcome::Completed { title_task: None }
    ));

    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    let contents: Vec<_> = requests[2].body["messages"]
        .as_array()
        .expect("messages")
        .iter()
        .map(|message| message["content"].clone())
        .collect();
    assert_eq!(contents, vec![json!("one"), json!("first"), json!("two")]);
    assert_eq!(sessions.current().expect("current").messages.len(), 4);
}

#[tokio::test]
async fn deepseek_gets_image_note_and_no_image_payload() {
    let transport = ScriptedTransport::new(vec![
        Scripted::events(vec![openai_delta("I can't see images."), done()]),
        Scripted::json(200, json!({"choices": [{"message": {"content": "Image Question"}}]})),
    ]);
    let (orchestrator, sessions) = harness(transport.clone(), "deepseek-chat");
    orchestrator.add_attachments([AttachmentFile::new(
        "cat.png",
        "image/png",
        vec![0x89, b'P', b'N', b'G'],
    )]);

    await_title(orchestrator.send("what is this?").await.expect("send")).await;

    let requests = transport.requests();
    let reply = &requests[0];
    assert_eq!(reply.url, "https://api.deepseek.com/v1/chat/completions");
    let raw = reply.body.to_string();
    assert!(!raw.contains("image_url"), "{raw}");
    assert!(!raw.contains("base64"), "{raw}");
    let messages = reply.body["messages"].as_array().expect("messages");
    let note = messages.last().expect("note")["content"]
        .as_str()
        .expect("text");
    assert!(note.starts_with("🖼️ Attached images (cat.png)."), "{note}");
    assert!(note.contains("does not analyze images"));
    assert!(reply.body.get("max_tokens").is_some());

    assert_eq!(sessions.current().expect("current").title, "Image Question");
    assert!(orchestrator.pending_attachments().is_empty());
}

#[tokio::test]
async fn gemini_walks_fallback_chain_until_query_key_works() {
    let not_found = || Scripted::json(404, json!({"error": {"message": "model not found"}}));
    let transport = ScriptedTransport::new(vec![
        not_found(),
        not_found(),
        not_found(),
        Scripted::json(
            200,
            json!({"candidates": [{"content": {"parts": [{"text": "Sunny"}, {"text": "and warm"}]}}]}),
        ),
        Scripted::json(
            200,
            json!({"candidates": [{"content": {"parts": [{"text": "Weather Chat"}]}}]}),
        ),
    ]);
    let (orchestrator, sessions) = harness(transport.clone(), "gemini-2.5-flash");

    await_title(orchestrator.send("weather?").await.expect("send")).await;

    let urls: Vec<_> = transport
        .requests()
        .into_iter()
        .map(|request| request.url)
        .collect();
    let base = "https://generativelanguage.googleapis.com";
    assert_eq!(
        urls,
        vec![
            format!("{base}/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"),
            format!("{base}/v1beta/models/gemini-2.5-flash:generateContent"),
            format!("{base}/v1/models/gemini-2.5-flash:generateContent"),
            format!("{base}/v1/models/gemini-2.5-flash:generateContent?key=sk-test"),
            format!("{base}/v1beta/models/gemini-2.5-flash:generateContent"),
        ]
    );
    let requests = transport.requests();
    assert!(!requests[3].headers.contains_key("x-goog-api-key"));
    assert_eq!(requests[4].body["generationConfig"]["maxOutputTokens"], json!(16));

    let conversation = sessions.current().expect("current");
    assert_eq!(conversation.messages[1].content, "Sunny\nand warm");
    assert_eq!(conversation.title, "Weather Chat");
}

#[tokio::test]
async fn gemini_stream_success_stops_the_chain() {
    let transport = ScriptedTransport::new(vec![
        Scripted::events(vec![gemini_chunk("Hi "), gemini_chunk("there")]),
        Scripted::json(
            200,
            json!({"candidates": [{"content": {"parts": [{"text": "Greeting"}]}}]}),
        ),
    ]);
    let (orchestrator, sessions) = harness(transport.clone(), "gemini-2.5-flash");

    await_title(orchestrator.send("hello").await.expect("send")).await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].streaming);
    assert!(requests[0].url.ends_with(":streamGenerateContent?alt=sse"));
    assert!(!requests[1].streaming);

    let conversation = sessions.current().expect("current");
    assert_eq!(conversation.messages[1].content, "Hi there");
    assert_eq!(conversation.title, "Greeting");
}

#[tokio::test]
async fn gemini_error_bodies_fall_through_and_last_error_surfaces() {
    let transport = ScriptedTransport::new(vec![
        Scripted::json(404, json!({"error": {"message": "model not found"}})),
        Scripted::json(200, json!({"error": {"message": "quota"}})),
        Scripted::json(200, json!({"error": {"message": "quota again"}})),
        Scripted::json(400, json!({"error": {"message": "last one"}})),
    ]);
    let (orchestrator, sessions) = harness(transport.clone(), "gemini-2.5-flash");

    let err = orchestrator.send("hello").await.expect_err("every rung fails");
    match err {
        ChatError::Provider { provider, message } => {
            assert_eq!(provider, "google_gemini");
            assert_eq!(message, "last one");
        }
        other => panic!("unexpected error type: {other:?}"),
    }
    assert_eq!(transport.requests().len(), 4);
    assert_eq!(orchestrator.status(), GenerationStatus::Idle);
    assert_eq!(sessions.current().expect("current").messages[1].content, "");
}

#[tokio::test]
async fn stop_keeps_streamed_text_and_returns_to_idle() {
    let transport = ScriptedTransport::new(vec![Scripted::hanging_events(vec![
        openai_delta("Hel"),
        openai_delta("lo"),
    ])]);
    let (orchestrator, sessions) = harness(transport, "gpt-4-turbo");

    let sending = orchestrator.clone();
    let handle = tokio::spawn(async move { sending.send("tell me a story").await });

    let mut streamed = String::new();
    for _ in 0..200 {
        streamed = sessions
            .current()
            .expect("current")
            .messages
            .get(1)
            .map(|message| message.content.clone())
            .unwrap_or_default();
        if streamed == "Hello" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(streamed, "Hello");
    assert_eq!(orchestrator.status(), GenerationStatus::Sending);

    let err = orchestrator.send("another").await.expect_err("busy");
    assert!(matches!(err, ChatError::Validation { .. }));

    assert!(orchestrator.stop());
    assert_eq!(orchestrator.status(), GenerationStatus::Aborting);

    let outcome = handle.await.expect("join").expect("cancel is not an error");
    assert!(matches!(outcome, SendOutcome::Cancelled));
    assert_eq!(orchestrator.status(), GenerationStatus::Idle);
    assert!(!orchestrator.is_loading());

    let conversation = sessions.current().expect("current");
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[1].content, "Hello");
    assert_eq!(conversation.title, "Chat 1");
}

#[tokio::test]
async fn failed_title_falls_back_to_derived_one() {
    let transport = ScriptedTransport::new(vec![
        Scripted::events(vec![openai_delta("Sure."), done()]),
        Scripted::json(500, json!({"error": {"message": "overloaded"}})),
    ]);
    let (orchestrator, sessions) = harness(transport.clone(), "gpt-4-turbo");

    await_title(
        orchestrator
            .send("please review https://example.com/pr/1 ```let x = 1;``` before lunch...")
            .await
            .expect("send"),
    )
    .await;

    let title_request = &transport.requests()[1];
    assert!(!title_request.streaming);
    assert_eq!(title_request.body["max_tokens"], json!(16));
    assert_eq!(title_request.body["temperature"], json!(0.2));
    assert_eq!(
        sessions.current().expect("current").title,
        "Please review before lunch"
    );
}

#[tokio::test]
async fn provider_error_keeps_attachments_and_placeholder() {
    let transport = ScriptedTransport::new(vec![Scripted::json(
        401,
        json!({"error": {"message": "Incorrect API key provided"}}),
    )]);
    let (orchestrator, sessions) = harness(transport, "gpt-4o");
    orchestrator.add_attachments([AttachmentFile::new("a.txt", "text/plain", b"x".to_vec())]);

    let err = orchestrator.send("hello").await.expect_err("auth failure");
    assert!(err.is_user_facing());
    match err {
        ChatError::Auth { message } => assert_eq!(message, "Incorrect API key provided"),
        other => panic!("unexpected error type: {other:?}"),
    }
    assert_eq!(orchestrator.pending_attachments().len(), 1);
    assert_eq!(orchestrator.status(), GenerationStatus::Idle);

    let conversation = sessions.current().expect("current");
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[1].content, "");
}

#[tokio::test]
async fn exported_sessions_import_into_fresh_state() {
    let transport = ScriptedTransport::new(vec![
        Scripted::events(vec![openai_delta("pong"), done()]),
        Scripted::json(200, json!({"choices": [{"message": {"content": "Ping Pong"}}]})),
    ]);
    let (orchestrator, sessions) = harness(transport, "gpt-4-turbo");
    await_title(orchestrator.send("ping").await.expect("send")).await;
    sessions.create_conversation();

    let exported = sessions.export_json().expect("export");
    let mut restored = SessionState::new();
    restored.import_json(&exported).expect("import");

    assert_eq!(restored.conversations(), sessions.snapshot().conversations());
    let first = &restored.conversations()[0];
    assert_eq!(restored.current_id(), Some(first.id.as_str()));
    assert_eq!(first.title, "Ping Pong");
    assert_eq!(first.messages[1].content, "pong");
}
