//! Tracker and extractor driven together over one Copilot page.

use chatwire_core::{CanonicalEvent, CaptureConfig, Dispatcher, MemorySink, Platform, ProcessedIds};
use chatwire_page::{ConversationTracker, Document, DomExtractor, DomPort, DomProfile, NodeSpec};

fn message(marker: &str, text: &str) -> NodeSpec {
    NodeSpec::new("div")
        .attr("data-tabster", "{}")
        .attr("aria-labelledby", marker)
        .child(
            NodeSpec::new("p")
                .child(NodeSpec::new("span").attr("class", "font-ligatures-none").text(text)),
        )
}

#[test]
fn test_messages_carry_tracked_conversation() {
    let dispatcher = Dispatcher::new();
    let sink = MemorySink::new();
    dispatcher.subscribe(sink.clone());
    let tracker = ConversationTracker::new(Platform::Copilot, dispatcher.clone());
    let extractor = DomExtractor::new(
        DomProfile::for_platform(Platform::Copilot).unwrap(),
        dispatcher,
        ProcessedIds::new(),
        tracker.clone(),
        &CaptureConfig::default(),
    );

    let mut doc = Document::new();
    tracker.on_navigation("https://copilot.microsoft.com/");
    assert!(extractor.start(&doc));

    // SPA route change arrives with the first batch.
    let root = doc.root();
    doc.insert(root, &message("q1-user-message", "What is Rust?")).unwrap();
    let batch = doc.take_records();
    tracker.on_mutation_batch("https://copilot.microsoft.com/chats/Ab12");
    extractor.on_mutations(&doc, &batch);

    let stop = doc
        .insert(root, &NodeSpec::new("button").attr("data-testid", "stop-button"))
        .unwrap();
    doc.insert(root, &message("r1-author", "A systems language.")).unwrap();
    let batch = doc.take_records();
    tracker.on_mutation_batch("https://copilot.microsoft.com/chats/Ab12");
    extractor.on_mutations(&doc, &batch);

    doc.remove(stop).unwrap();
    let batch = doc.take_records();
    extractor.on_mutations(&doc, &batch);

    assert_eq!(
        sink.names(),
        vec!["conversation-changed", "message-extracted", "message-extracted"]
    );
    let messages: Vec<_> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            CanonicalEvent::MessageExtracted(m) => Some(m.message),
            _ => None,
        })
        .collect();
    assert!(messages.iter().all(|m| m.conversation_id == "Ab12"));
    assert_eq!(messages[0].content, "What is Rust?");
    assert_eq!(messages[1].message_id, "r1");
    assert_eq!(doc.watch_count(), 0);
}

#[test]
fn test_events_serialize_for_host() {
    let dispatcher = Dispatcher::new();
    let sink = MemorySink::new();
    dispatcher.subscribe(sink.clone());
    let tracker = ConversationTracker::new(Platform::Copilot, dispatcher.clone());
    tracker.on_navigation("/chats/Zz9");

    let json = serde_json::to_value(&sink.events()[0]).unwrap();
    assert_eq!(json["event"], "conversation-changed");
    assert_eq!(json["detail"]["conversationId"], "Zz9");
    assert_eq!(json["detail"]["platform"], "copilot");
}
