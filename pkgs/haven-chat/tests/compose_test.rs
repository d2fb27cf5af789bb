mod common;

use common::*;
use haven_chat::{
    Actor, AttachmentKind, ChangeKind, ChatConfig, ChatError, ComposeController, ConversationId,
    ConversationStore, MemoryDataStore, MemoryFileStorage, MessageStore, OutgoingAttachment, Role,
    SyncEngine, Table,
};
use std::sync::Arc;

struct Harness {
    gated: Arc<GatedStore>,
    files: Arc<MemoryFileStorage>,
    messages: Arc<MessageStore>,
    compose: ComposeController,
    engine: SyncEngine,
    conversation: ConversationId,
}

async fn harness() -> Harness {
    let memory = Arc::new(MemoryDataStore::default());
    seed_profile(&memory, "manager-1", "Max", "manager").await;
    let conversation = seed_conversation(&memory, "tenant-1", "manager-1").await;

    let gated = Arc::new(GatedStore::new(memory));
    let files = Arc::new(MemoryFileStorage::new());
    let config = ChatConfig::default();
    let conversations = Arc::new(ConversationStore::new(
        gated.clone(),
        Actor::new("tenant-1", Role::Tenant),
        &config,
    ));
    let messages = Arc::new(MessageStore::new(gated.clone(), &config));
    let compose = ComposeController::new(
        gated.clone(),
        files.clone(),
        messages.clone(),
        conversations.clone(),
        &config,
    );
    let engine = SyncEngine::new(conversations.clone(), messages.clone());

    conversations.load().await.unwrap();
    messages
        .set_active_conversation(Some(conversation.clone()))
        .await
        .unwrap();

    Harness {
        gated,
        files,
        messages,
        compose,
        engine,
        conversation,
    }
}

#[tokio::test]
async fn test_send_then_echo_yields_one_message() {
    let h = harness().await;

    let sent = h
        .compose
        .send(&h.conversation, "  hello  ", Vec::new())
        .await
        .expect("Failed to send");
    assert!(!sent.id.is_provisional());
    // Whitespace only matters for validation; the body is stored as typed
    assert_eq!(sent.content, "  hello  ");
    assert_eq!(h.gated.inner.rows(Table::Messages)[0]["content"], "  hello  ");
    assert_eq!(sent.sender_id.as_str(), "tenant-1");

    h.engine
        .handle(message_event(ChangeKind::Insert, &sent))
        .await
        .unwrap();

    let messages = h.messages.messages();
    assert_eq!(ids(&messages), vec![sent.id.to_string()]);
    assert_eq!(h.gated.inner.rows(Table::Messages).len(), 1);
    assert_eq!(h.compose.pending(), 0);
}

#[tokio::test]
async fn test_provisional_message_is_visible_until_confirmed() {
    let h = harness().await;
    h.gated.hold_next(1);

    let (sent, temp_id) = tokio::join!(
        h.compose.send(&h.conversation, "on my way", Vec::new()),
        async {
            h.gated.until_waiting(1).await;
            let pending = h.messages.messages();
            assert_eq!(pending.len(), 1);
            assert!(pending[0].id.is_provisional());
            assert_eq!(pending[0].content, "on my way");
            assert_eq!(h.compose.pending(), 1);
            h.gated.release(1);
            pending[0].id.clone()
        }
    );

    let sent = sent.unwrap();
    assert_eq!(ids(&h.messages.messages()), vec![sent.id.to_string()]);
    assert_eq!(h.messages.resolve_id(&temp_id), sent.id);

    // Reading through the temporary id reaches the stored row
    h.messages.mark_read(&[temp_id]).await.unwrap();
    let rows = h.gated.inner.rows(Table::Messages);
    assert_eq!(rows[0]["read_status"], true);
}

#[tokio::test]
async fn test_insert_failure_rolls_back() {
    let h = harness().await;
    h.gated.set_fail_inserts(true);

    let result = h.compose.send(&h.conversation, "hello", Vec::new()).await;

    assert!(matches!(result, Err(ChatError::Send(_))));
    assert!(h.messages.messages().is_empty());
    assert!(h.gated.inner.rows(Table::Messages).is_empty());
    assert_eq!(h.compose.pending(), 0);
}

#[tokio::test]
async fn test_upload_failure_aborts_send() {
    let h = harness().await;
    h.files.set_failing(true);

    let result = h
        .compose
        .send(
            &h.conversation,
            "lease scan",
            vec![OutgoingAttachment::new(
                "lease.pdf",
                "application/pdf",
                b"%PDF-1.7".to_vec(),
            )],
        )
        .await;

    assert!(matches!(result, Err(ChatError::Send(_))));
    assert!(h.messages.messages().is_empty());
    assert_eq!(h.gated.inserts(), 0);
}

#[tokio::test]
async fn test_empty_message_is_rejected_without_io() {
    let h = harness().await;
    let queries = h.gated.queries();

    let result = h.compose.send(&h.conversation, "   ", Vec::new()).await;

    assert!(matches!(result, Err(ChatError::Validation(_))));
    assert!(h.messages.messages().is_empty());
    assert_eq!(h.gated.inserts(), 0);
    assert_eq!(h.gated.queries(), queries);
}

#[tokio::test]
async fn test_unnamed_attachment_is_rejected() {
    let h = harness().await;

    let result = h
        .compose
        .send(
            &h.conversation,
            "",
            vec![OutgoingAttachment::new(" ", "image/png", vec![1, 2, 3])],
        )
        .await;

    assert!(matches!(result, Err(ChatError::Validation(_))));
    assert!(h.files.is_empty());
}

#[tokio::test]
async fn test_attachments_are_uploaded_before_insert() {
    let h = harness().await;
    let photo = vec![0x89, 0x50, 0x4e, 0x47];

    let sent = h
        .compose
        .send(
            &h.conversation,
            "",
            vec![
                OutgoingAttachment::new("leak.png", "image/png", photo.clone()),
                OutgoingAttachment::new("invoice.pdf", "application/pdf", b"%PDF".to_vec()),
            ],
        )
        .await
        .expect("Failed to send attachments");

    assert_eq!(sent.content, "");
    assert_eq!(sent.attachments.len(), 2);
    assert_eq!(sent.attachments[0].kind, AttachmentKind::Image);
    assert_eq!(sent.attachments[0].display_name, "leak.png");
    assert_eq!(sent.attachments[1].kind, AttachmentKind::Document);

    let prefix = format!("chat-attachments/{}/", h.conversation);
    let locator = &sent.attachments[0].locator;
    assert!(locator.starts_with(&prefix));
    assert!(locator.ends_with("-leak.png"));
    assert_eq!(h.files.get(locator), Some(photo));
    assert_eq!(h.files.len(), 2);

    let messages = h.messages.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].attachments, sent.attachments);
}

#[tokio::test]
async fn test_send_to_background_conversation() {
    let h = harness().await;
    let other = seed_conversation(&h.gated.inner, "tenant-1", "manager-2").await;

    let sent = h.compose.send(&other, "hi", Vec::new()).await.unwrap();

    assert!(h.messages.messages().is_empty());
    assert_eq!(sent.conversation_id, other);
    assert_eq!(h.gated.inner.rows(Table::Messages).len(), 1);
}
