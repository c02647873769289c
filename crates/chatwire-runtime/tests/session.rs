//! Whole-session flows: network capture for ChatGPT, DOM capture for Copilot.

use std::time::Duration;

use chatwire_core::{CanonicalEvent, CaptureConfig, ChannelSink, MemorySink, Message, Platform, Role};
use chatwire_network::{HttpRequest, InterceptionPort, ScriptedFetch, ScriptedResponse};
use chatwire_page::{Document, DomPort, NodeSpec};
use chatwire_runtime::CaptureSession;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

const STREAM: &str = concat!(
    "data: {\"v\":{\"message\":{\"id\":\"a-1\",\"author\":{\"role\":\"assistant\"},\"metadata\":{\"model_slug\":\"gpt-4o\"}},\"conversation_id\":\"59f1b3-aa\"}}\n\n",
    "data: {\"p\":\"/message/content/parts/0\",\"o\":\"append\",\"v\":\"Bon\"}\n\n",
    "data: {\"v\":\"jour\"}\n\n",
    "data: [DONE]\n\n",
);

async fn next_assistant_message(rx: &mut UnboundedReceiver<CanonicalEvent>) -> Message {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no assistant message")
            .expect("channel closed");
        if let CanonicalEvent::MessageExtracted(m) = event {
            if m.message.role == Role::Assistant {
                return m.message;
            }
        }
    }
}

fn messages(sink: &MemorySink) -> Vec<Message> {
    sink.events()
        .into_iter()
        .filter_map(|e| match e {
            CanonicalEvent::MessageExtracted(m) => Some(m.message),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_chatgpt_new_chat_round_trip() {
    let session = CaptureSession::new("chatgpt.com", CaptureConfig::default());
    assert_eq!(session.platform(), Platform::ChatGPT);
    let sink = MemorySink::new();
    let (channel, mut rx) = ChannelSink::new();
    session.subscribe(sink.clone());
    session.subscribe(channel);

    let fetch = ScriptedFetch::new();
    fetch.route(
        "POST",
        "/backend-api/conversation",
        ScriptedResponse::event_stream(vec![STREAM.as_bytes().to_vec()]),
    );
    let port = InterceptionPort::new(fetch.clone());
    assert!(session.install_network(&port));
    assert_eq!(session.navigate("https://chatgpt.com/"), None);

    let request = json!({
        "action": "next",
        "messages": [{"id": "u-1", "author": {"role": "user"}, "content": {"parts": ["Say hello"]}}],
        "parent_message_id": "client-created-root",
        "model": "auto"
    });
    let response = port
        .fetch(HttpRequest::post_json("https://chatgpt.com/backend-api/conversation", &request))
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), STREAM);

    let assistant = next_assistant_message(&mut rx).await;
    assert_eq!(assistant.message_id, "a-1");
    assert_eq!(assistant.content, "Bonjour");
    assert_eq!(assistant.conversation_id, "59f1b3-aa");
    assert_eq!(assistant.model, "gpt-4o");

    let all = messages(&sink);
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].message_id, "u-1");
    assert_eq!(all[0].content, "Say hello");
    assert_eq!(session.tracker().current_id().as_deref(), Some("59f1b3-aa"));
    assert_eq!(sink.count("conversation-changed"), 1);

    assert!(session.uninstall_network(&port));
    assert!(!port.is_installed());
}

#[tokio::test]
async fn test_new_chat_turn_ignores_previous_conversation() {
    let session = CaptureSession::new("chatgpt.com", CaptureConfig::default());
    let sink = MemorySink::new();
    let (channel, mut rx) = ChannelSink::new();
    session.subscribe(sink.clone());
    session.subscribe(channel);

    let fetch = ScriptedFetch::new();
    fetch.route(
        "POST",
        "/backend-api/conversation",
        ScriptedResponse::event_stream(vec![STREAM.as_bytes().to_vec()]),
    );
    let port = InterceptionPort::new(fetch.clone());
    session.install_network(&port);
    session.navigate("https://chatgpt.com/c/old-conv");
    session.navigate("https://chatgpt.com/");

    let request = json!({
        "action": "next",
        "messages": [{"id": "u-9", "author": {"role": "user"}, "content": {"parts": ["Start over"]}}],
        "parent_message_id": "client-created-root"
    });
    let response = port
        .fetch(HttpRequest::post_json("https://chatgpt.com/backend-api/conversation", &request))
        .await
        .unwrap();
    response.text().await.unwrap();
    next_assistant_message(&mut rx).await;

    let all = messages(&sink);
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].message_id, "u-9");
    assert_eq!(all[0].conversation_id, "59f1b3-aa");
    assert_eq!(all[1].conversation_id, "59f1b3-aa");
    assert_eq!(session.tracker().current_id().as_deref(), Some("59f1b3-aa"));
}

#[tokio::test]
async fn test_specific_conversation_sets_tracker() {
    let session = CaptureSession::new("chatgpt.com", CaptureConfig::default());
    let sink = MemorySink::new();
    session.subscribe(sink.clone());

    let fetch = ScriptedFetch::new();
    fetch.route(
        "GET",
        "/backend-api/conversation/59f1b3-aa",
        ScriptedResponse::json(200, &json!({"conversation_id": "59f1b3-aa"})),
    );
    let port = InterceptionPort::new(fetch.clone());
    session.install_network(&port);

    port.fetch(HttpRequest::get("https://chatgpt.com/backend-api/conversation/59f1b3-aa"))
        .await
        .unwrap();

    assert_eq!(sink.count("specific-conversation"), 1);
    assert_eq!(sink.count("chat-completion"), 0);
    assert_eq!(session.tracker().current_id().as_deref(), Some("59f1b3-aa"));
}

#[test]
fn test_copilot_page_capture() {
    let session = CaptureSession::new("copilot.microsoft.com", CaptureConfig::default());
    let sink = MemorySink::new();
    session.subscribe(sink.clone());

    let mut doc = Document::new();
    let observer = session.observe_page(&doc).unwrap();
    assert!(observer.is_extracting());

    let root = doc.root();
    doc.insert(
        root,
        &NodeSpec::new("div")
            .attr("data-tabster", "{}")
            .attr("aria-labelledby", "m1-user-message")
            .child(NodeSpec::new("span").attr("class", "font-ligatures-none").text("Hello")),
    )
    .unwrap();
    let batch = doc.take_records();
    observer.on_batch(&doc, "https://copilot.microsoft.com/chats/Ab12", &batch);

    let all = messages(&sink);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].message_id, "m1");
    assert_eq!(all[0].conversation_id, "Ab12");
    assert_eq!(sink.names(), vec!["conversation-changed", "message-extracted"]);

    observer.stop(&doc);
    assert_eq!(doc.watch_count(), 0);
}

#[test]
fn test_address_tracking_without_dom_profile() {
    let session = CaptureSession::for_platform(Platform::Claude, CaptureConfig::default());
    let doc = Document::new();
    let observer = session.observe_page(&doc).unwrap();
    assert!(!observer.is_extracting());

    observer.on_batch(&doc, "https://claude.ai/chat/ff00-11", &[]);
    observer.on_batch(&doc, "https://claude.ai/chat/ff00-11", &[]);
    assert_eq!(session.tracker().current_id().as_deref(), Some("ff00-11"));
}

#[test]
fn test_observer_failure_keeps_tracking() {
    let session = CaptureSession::new("copilot.microsoft.com", CaptureConfig::default());
    let mut doc = Document::new();
    doc.refuse_observers();
    let observer = session.observe_page(&doc).unwrap();
    assert!(!observer.is_extracting());

    observer.on_batch(&doc, "/chats/Zz9", &[]);
    assert_eq!(session.tracker().current_id().as_deref(), Some("Zz9"));
}

#[test]
fn test_unknown_host_is_inert() {
    let session = CaptureSession::new("example.com", CaptureConfig::default());
    assert_eq!(session.platform(), Platform::Unknown);
    let port = InterceptionPort::new(ScriptedFetch::new());
    assert!(!session.install_network(&port));
    assert!(session.observe_page(&Document::new()).is_none());
    assert_eq!(session.dispatcher().sink_count(), 1);
}
