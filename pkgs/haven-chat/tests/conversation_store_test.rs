mod common;

use chrono::Duration;
use common::*;
use haven_chat::{
    Actor, ChangeKind, ChatConfig, ChatError, ConversationId, ConversationRow, ConversationStore,
    DataStore, ListStatus, MemoryDataStore, Role, Table,
};
use std::sync::Arc;

struct Fixture {
    memory: Arc<MemoryDataStore>,
    with_max: ConversationId,
    with_mia: ConversationId,
}

/// tenant-1 talks to manager-1 (2 unread) and manager-2 (3 unread, most recent);
/// tenant-9 talks to manager-1 as well
async fn fixture() -> Fixture {
    let memory = Arc::new(MemoryDataStore::default());
    seed_profile(&memory, "tenant-1", "Tina", "tenant").await;
    seed_profile(&memory, "manager-1", "Max", "manager").await;
    seed_profile(&memory, "manager-2", "Mia", "manager").await;

    let with_max = seed_conversation(&memory, "tenant-1", "manager-1").await;
    let with_mia = seed_conversation(&memory, "tenant-1", "manager-2").await;
    let foreign = seed_conversation(&memory, "tenant-9", "manager-1").await;

    seed_messages(&memory, &with_max, "manager-1", "a", 2).await;
    seed_messages(&memory, &with_mia, "manager-2", "b", 3).await;
    seed_messages(&memory, &with_mia, "tenant-1", "t", 1).await;
    seed_messages(&memory, &foreign, "manager-1", "f", 4).await;

    Fixture {
        memory,
        with_max,
        with_mia,
    }
}

fn tenant_store(data_store: Arc<dyn DataStore>) -> ConversationStore {
    ConversationStore::new(
        data_store,
        Actor::new("tenant-1", Role::Tenant),
        &ChatConfig::default(),
    )
}

fn conversation_row(id: &ConversationId, tenant: &str, manager: &str, secs: i64) -> ConversationRow {
    ConversationRow {
        id: id.clone(),
        tenant_id: tenant.into(),
        manager_id: manager.into(),
        last_message_time: Some(base_time() + Duration::seconds(secs)),
        created_at: base_time(),
    }
}

#[tokio::test]
async fn test_load_enriches_and_orders() {
    let fx = fixture().await;
    let store = tenant_store(fx.memory.clone());
    assert_eq!(store.status(), ListStatus::NotLoaded);

    store.load().await.expect("Failed to load conversations");

    let conversations = store.conversations();
    assert_eq!(conversations.len(), 2);
    assert_eq!(conversations[0].id, fx.with_mia);
    assert_eq!(conversations[1].id, fx.with_max);

    assert_eq!(conversations[0].participant.name, "Mia");
    assert!(conversations[0].participant.online);
    assert_eq!(
        conversations[1].participant.avatar_url.as_deref(),
        Some("https://cdn.example.com/manager-1.png")
    );

    assert_eq!(conversations[0].unread_count, 3);
    assert_eq!(conversations[1].unread_count, 2);
    assert_eq!(store.total_unread(), 5);
    assert_eq!(store.status(), ListStatus::Ready);
}

#[tokio::test]
async fn test_load_failure_is_reported() {
    let fx = fixture().await;
    let store = tenant_store(fx.memory.clone());
    fx.memory.set_reachable(false);

    let result = store.load().await;
    assert!(matches!(result, Err(ChatError::Fetch(_))));
    assert!(matches!(store.status(), ListStatus::Failed(_)));

    fx.memory.set_reachable(true);
    store.load().await.unwrap();
    assert_eq!(store.status(), ListStatus::Ready);
}

#[tokio::test]
async fn test_empty_list_is_distinguishable() {
    let memory = Arc::new(MemoryDataStore::default());
    let store = tenant_store(memory);
    store.load().await.unwrap();
    assert_eq!(store.status(), ListStatus::Empty);
}

#[tokio::test]
async fn test_start_conversation_returns_existing() {
    let fx = fixture().await;
    let store = tenant_store(fx.memory.clone());

    let id = store
        .start_conversation(&"manager-1".into())
        .await
        .expect("Failed to start conversation");
    assert_eq!(id, fx.with_max);
    assert_eq!(fx.memory.rows(Table::Conversations).len(), 3);
}

#[tokio::test]
async fn test_start_conversation_twice_returns_same_id() {
    let fx = fixture().await;
    let store = tenant_store(fx.memory.clone());

    let first = store.start_conversation(&"manager-3".into()).await.unwrap();
    let second = store.start_conversation(&"manager-3".into()).await.unwrap();
    assert_eq!(first, second);

    let rows = fx.memory.rows(Table::Conversations);
    assert_eq!(rows.len(), 4);
    let created = rows.iter().find(|r| r["id"] == first.as_str()).unwrap();
    assert_eq!(created["tenant_id"], "tenant-1");
    assert_eq!(created["manager_id"], "manager-3");

    // No profile row for manager-3
    let listed = store.get(&first).unwrap();
    assert_eq!(listed.participant.name, "manager-3");
}

#[tokio::test]
async fn test_concurrent_start_conversation_converges() {
    let fx = fixture().await;
    let gated = Arc::new(GatedStore::new(fx.memory.clone()));
    gated.set_yield_after_query(true);
    let store = tenant_store(gated.clone());

    let other = "manager-3".into();
    let (first, second) = tokio::join!(
        store.start_conversation(&other),
        store.start_conversation(&other)
    );

    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first, second);
    // Both callers raced to insert; the loser retried the lookup
    assert_eq!(gated.inserts(), 2);
    assert_eq!(fx.memory.rows(Table::Conversations).len(), 4);
    assert_eq!(store.conversations().iter().filter(|c| c.id == first).count(), 1);
}

#[tokio::test]
async fn test_manager_start_assigns_roles() {
    let fx = fixture().await;
    let store = ConversationStore::new(
        fx.memory.clone(),
        Actor::new("manager-2", Role::Manager),
        &ChatConfig::default(),
    );

    let id = store.start_conversation(&"tenant-5".into()).await.unwrap();
    let rows = fx.memory.rows(Table::Conversations);
    let created = rows.iter().find(|r| r["id"] == id.as_str()).unwrap();
    assert_eq!(created["tenant_id"], "tenant-5");
    assert_eq!(created["manager_id"], "manager-2");
}

#[tokio::test]
async fn test_start_conversation_with_self_is_rejected() {
    let fx = fixture().await;
    let gated = Arc::new(GatedStore::new(fx.memory.clone()));
    let store = tenant_store(gated.clone());

    let result = store.start_conversation(&"tenant-1".into()).await;
    assert!(matches!(result, Err(ChatError::Validation(_))));
    assert_eq!(gated.queries(), 0);
}

#[tokio::test]
async fn test_apply_change_is_idempotent() {
    let fx = fixture().await;
    let store = tenant_store(fx.memory.clone());
    store.load().await.unwrap();

    let bumped = conversation_row(&fx.with_max, "tenant-1", "manager-1", 60);
    assert!(store.apply_change(ChangeKind::Update, bumped.clone()).await);
    let once = store.conversations();
    assert_eq!(once[0].id, fx.with_max);

    assert!(!store.apply_change(ChangeKind::Update, bumped).await);
    assert_eq!(store.conversations(), once);

    // An older replay is discarded as well
    let stale = conversation_row(&fx.with_max, "tenant-1", "manager-1", 30);
    assert!(!store.apply_change(ChangeKind::Update, stale).await);
    assert_eq!(store.conversations(), once);
}

#[tokio::test]
async fn test_apply_change_appends_new_conversation() {
    let fx = fixture().await;
    let store = tenant_store(fx.memory.clone());
    store.load().await.unwrap();

    let fresh = conversation_row(&"c-new".into(), "tenant-1", "manager-2", 120);
    assert!(store.apply_change(ChangeKind::Insert, fresh.clone()).await);
    assert!(!store.apply_change(ChangeKind::Insert, fresh).await);

    let conversations = store.conversations();
    assert_eq!(conversations.len(), 3);
    assert_eq!(conversations[0].id.as_str(), "c-new");
    assert_eq!(conversations[0].participant.name, "Mia");
    assert_eq!(conversations[0].unread_count, 0);
}

#[tokio::test]
async fn test_apply_change_ignores_foreign_rows_and_deletes() {
    let fx = fixture().await;
    let store = tenant_store(fx.memory.clone());
    store.load().await.unwrap();
    let before = store.conversations();

    let foreign = conversation_row(&"c-foreign".into(), "tenant-9", "manager-2", 500);
    assert!(!store.apply_change(ChangeKind::Insert, foreign).await);

    let deleted = conversation_row(&fx.with_max, "tenant-1", "manager-1", 900);
    assert!(!store.apply_change(ChangeKind::Delete, deleted).await);

    assert_eq!(store.conversations(), before);
}

#[tokio::test]
async fn test_unread_tracking_is_idempotent() {
    let fx = fixture().await;
    let store = tenant_store(fx.memory.clone());
    store.load().await.unwrap();

    let incoming = message("a-new", &fx.with_max, "manager-1", 90);
    assert!(store.record_message(&incoming));
    assert!(!store.record_message(&incoming));
    assert_eq!(store.get(&fx.with_max).unwrap().unread_count, 3);
    assert_eq!(store.conversations()[0].id, fx.with_max);

    let own = message("t-new", &fx.with_max, "tenant-1", 95);
    store.record_message(&own);
    assert_eq!(store.get(&fx.with_max).unwrap().unread_count, 3);

    assert!(store.record_read(&fx.with_max, &incoming.id));
    assert!(!store.record_read(&fx.with_max, &incoming.id));
    assert_eq!(store.get(&fx.with_max).unwrap().unread_count, 2);
    assert_eq!(store.total_unread(), 5);
}

#[tokio::test]
async fn test_reload_keeps_feed_changes_made_while_in_flight() {
    let fx = fixture().await;
    let gated = Arc::new(GatedStore::new(fx.memory.clone()));
    let store = tenant_store(gated.clone());
    store.load().await.unwrap();
    assert_eq!(store.conversations()[0].id, fx.with_mia);

    // Park the reload right after its conversation query
    gated.hold_next(1);
    let bumped = conversation_row(&fx.with_max, "tenant-1", "manager-1", 60);
    let fresh = conversation_row(&"c-live".into(), "tenant-1", "manager-2", 30);
    let incoming = message("a-live", &fx.with_max, "manager-1", 60);

    let (reloaded, _) = tokio::join!(store.load(), async {
        gated.until_waiting(1).await;
        assert!(store.apply_change(ChangeKind::Update, bumped).await);
        assert!(store.apply_change(ChangeKind::Insert, fresh).await);
        assert!(store.record_message(&incoming));
        assert!(store.record_read(&fx.with_mia, &"b-000".into()));
        assert_eq!(store.conversations()[0].id, fx.with_max);
        gated.release(1);
    });
    reloaded.unwrap();

    let conversations = store.conversations();
    let order: Vec<&str> = conversations.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(order, vec![fx.with_max.as_str(), "c-live", fx.with_mia.as_str()]);
    assert_eq!(store.get(&fx.with_max).unwrap().unread_count, 3);
    assert_eq!(store.get(&fx.with_mia).unwrap().unread_count, 2);
    assert_eq!(store.total_unread(), 5);
}

#[tokio::test]
async fn test_overtaken_load_does_not_install() {
    let fx = fixture().await;
    let gated = Arc::new(GatedStore::new(fx.memory.clone()));
    let store = tenant_store(gated.clone());
    store.load().await.unwrap();

    gated.hold_next(1);
    let (first, created) = tokio::join!(store.load(), async {
        gated.until_waiting(1).await;
        let created = seed_conversation(&fx.memory, "tenant-1", "manager-3").await;
        store.load().await.unwrap();
        assert!(store.get(&created).is_some());
        gated.release(1);
        created
    });
    first.unwrap();

    assert!(store.get(&created).is_some());
    assert_eq!(store.conversations().len(), 3);
    assert_eq!(store.status(), ListStatus::Ready);
}

#[tokio::test]
async fn test_foreign_cache_is_bounded() {
    let fx = fixture().await;
    let gated = Arc::new(GatedStore::new(fx.memory.clone()));
    let config = ChatConfig {
        foreign_cache_size: 2,
        ..Default::default()
    };
    let store = ConversationStore::new(
        gated.clone(),
        Actor::new("tenant-1", Role::Tenant),
        &config,
    );
    store.load().await.unwrap();

    let mut foreign = Vec::new();
    for tenant in ["tenant-7", "tenant-8", "tenant-9"] {
        let id = seed_conversation(&fx.memory, tenant, "manager-2").await;
        assert!(!store.ensure_listed(&id).await);
        foreign.push(id);
    }
    assert_eq!(store.foreign_cached(), 2);
    assert_eq!(store.conversations().len(), 2);

    // Remembered ids skip the lookup; the evicted one is looked up again
    let queries = gated.queries();
    assert!(!store.ensure_listed(&foreign[2]).await);
    assert_eq!(gated.queries(), queries);
    assert!(!store.ensure_listed(&foreign[0]).await);
    assert_eq!(gated.queries(), queries + 1);
    assert_eq!(store.foreign_cached(), 2);
}
