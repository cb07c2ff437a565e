//! Integration tests for the roomsync client against an in-process
//! homeserver.

use proptest::prelude::*;
use roomsync_client::{
    CancellationToken, Client, ClientConfig, EventCategory, HttpRequest, HttpResponse, Middleware,
    Next, PowerAction, SyncError, SyncResult, ToggleOutcome, TypeFilter, UnreadCount, CLIENT_PREFIX,
    SYNC_PATH,
};
use roomsync_store::StoreConfig;
use roomsync_testkit::prelude::*;
use roomsync_types::{event_type, Event, EventId, RoomId, UserId};
use serde_json::json;
use std::sync::Mutex;
use std::time::Duration;

fn ids(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .map(|e| e.event_id.as_ref().map(ToString::to_string).unwrap_or_default())
        .collect()
}

fn client_with(server: &Arc<FakeHomeserver>, config: ClientConfig) -> Client {
    Client::open_in_memory(config, Arc::clone(server) as _).unwrap()
}

async fn synced_client(server: &Arc<FakeHomeserver>) -> Client {
    let client = memory_client(server);
    client.sync_once(&CancellationToken::new()).await.unwrap();
    client
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Sync
// ============================================================================

#[tokio::test]
async fn initial_sync_fills_cache_before_notifying() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.push_event(&room, member("@me:test", Some("Me")));
    server.push_events(&room, messages("$m", 3));

    let client = memory_client(&server);
    let store = Arc::clone(client.store());
    let observed = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&observed);
    client.registry().subscribe(
        EventCategory::Timeline,
        TypeFilter::Any,
        move |room, event| {
            let cached = room
                .and_then(|r| store.timeline(r))
                .is_some_and(|timeline| timeline.iter().any(|e| e.event_id == event.event_id));
            seen.lock().unwrap().push(cached);
        },
    );
    let (_, mut messages_rx) = client.registry().subscribe_channel(
        EventCategory::Timeline,
        TypeFilter::Exact(event_type::ROOM_MESSAGE.into()),
    );

    let applied = client.sync_once(&CancellationToken::new()).await.unwrap();
    assert!(applied >= 4);

    let observed = observed.lock().unwrap().clone();
    assert_eq!(observed.len(), 4);
    assert!(observed.iter().all(|cached| *cached));

    let mut delivered = Vec::new();
    while let Ok(dispatched) = messages_rx.try_recv() {
        assert_eq!(dispatched.room.as_ref(), Some(&room));
        delivered.push(dispatched.event);
    }
    assert_eq!(ids(&delivered), vec!["$m0", "$m1", "$m2"]);

    assert_eq!(client.store().resume_token().as_deref(), Some("s1"));
    assert_eq!(client.store().prev_batch(&room).as_deref(), Some("t0"));
    assert_eq!(
        client.search_members(&room, "me"),
        vec![UserId::from("@me:test")]
    );
}

#[tokio::test]
async fn incremental_sync_appends_new_events() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.push_events(&room, messages("$m", 2));
    let client = synced_client(&server).await;

    server.push_event(&room, message_with_id("$late", "@you:test", "late"));
    client.sync_once(&CancellationToken::new()).await.unwrap();

    let timeline = client.store().timeline(&room).unwrap();
    assert_eq!(ids(&timeline), vec!["$m0", "$m1", "$late"]);
    assert_eq!(client.store().resume_token().as_deref(), Some("s2"));
}

#[tokio::test]
async fn sync_requests_bypass_response_cache() {
    let server = Arc::new(FakeHomeserver::default());
    let client = synced_client(&server).await;
    client.sync_once(&CancellationToken::new()).await.unwrap();

    let syncs: Vec<HttpRequest> = server
        .requests()
        .into_iter()
        .filter(|r| r.path.starts_with(SYNC_PATH))
        .collect();
    assert_eq!(syncs.len(), 2);
    assert!(syncs.iter().all(is_no_store));

    // Plain reads are cached for the configured lifetime.
    let cancel = CancellationToken::new();
    client.api().joined_rooms(&cancel).await.unwrap();
    client.api().joined_rooms(&cancel).await.unwrap();
    let joined = format!("{CLIENT_PREFIX}/joined_rooms");
    assert_eq!(server.request_count(&joined), 1);
    assert!(!server.requests().iter().any(|r| r.path == joined && is_no_store(r)));
}

struct CannedSync;

#[async_trait::async_trait]
impl Middleware for CannedSync {
    async fn handle(&self, _request: HttpRequest, _next: Next) -> SyncResult<HttpResponse> {
        Ok(HttpResponse::json_value(200, &json!({ "next_batch": "canned" })))
    }
}

#[tokio::test]
async fn sync_interceptor_short_circuits_until_deregistered() {
    let server = Arc::new(FakeHomeserver::default());
    let client = memory_client(&server);
    let cancel = CancellationToken::new();

    let handle = client.add_sync_interceptor(CannedSync);
    client.sync_once(&cancel).await.unwrap();
    assert_eq!(server.request_count(SYNC_PATH), 0);
    assert_eq!(client.store().resume_token().as_deref(), Some("canned"));

    assert!(handle.deregister());
    client.sync_once(&cancel).await.unwrap();
    assert_eq!(server.request_count(SYNC_PATH), 1);
    assert_eq!(
        server.requests()[0].query_param("since"),
        Some("canned")
    );
}

#[tokio::test]
async fn sync_loop_recovers_from_transport_failures() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.push_events(&room, messages("$m", 2));
    server.fail_next(SYNC_PATH, 2, Failure::Transport);

    let client = memory_client(&server);
    client.start_sync().unwrap();
    assert!(matches!(
        client.start_sync(),
        Err(SyncError::InvalidState(_))
    ));

    let store = Arc::clone(client.store());
    eventually(|| store.timeline(&room).is_some_and(|t| t.len() == 2)).await;

    server.push_event(&room, message_with_id("$live", "@you:test", "live"));
    eventually(|| {
        store
            .timeline(&room)
            .is_some_and(|t| t.last().and_then(|e| e.event_id.clone()) == Some(EventId::from("$live")))
    })
    .await;

    let stats = client.sync_client().stats();
    assert!(stats.failures >= 2);
    assert!(stats.cycles_completed >= 2);

    client.stop_sync().await.unwrap();
    assert!(!client.sync_client().state().is_active());
}

#[tokio::test]
async fn cancelled_poll_keeps_resume_token() {
    let server = Arc::new(FakeHomeserver::default());
    let client = synced_client(&server).await;
    server.hang_syncs(true);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = client.sync_once(&cancel).await;
    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert_eq!(client.store().resume_token().as_deref(), Some("s1"));
    assert_eq!(client.sync_client().stats().cycles_completed, 1);
}

// ============================================================================
// Pagination
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn paginator_returns_full_history_once((history, cached, limit, page) in paging_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (returned, expected) = runtime.block_on(async {
            let server = Arc::new(FakeHomeserver::default());
            let room = test_room();
            server.push_events(&room, messages("$h", history));

            let config = test_config(&server)
                .with_sync(fast_sync_config().with_timeline_limit(cached))
                .with_page_size(page);
            let client = client_with(&server, config);
            let cancel = CancellationToken::new();
            client.sync_once(&cancel).await.unwrap();

            let mut pager = client.room_paginator(&room, limit).unwrap();
            let mut batches = Vec::new();
            for _ in 0..history + 2 {
                if pager.is_on_top() {
                    break;
                }
                let batch = pager.paginate(&cancel).await.unwrap();
                assert!(batch.len() <= limit);
                batches.push(batch);
            }
            assert!(pager.is_on_top());

            let returned: Vec<Event> = batches.into_iter().rev().flatten().collect();
            (ids(&returned), ids(&server.history(&room)))
        });

        prop_assert_eq!(returned, expected);
    }
}

#[tokio::test]
async fn exhausted_history_stops_fetching() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.push_events(&room, messages("$m", 4));
    let client = client_with(&server, test_config(&server).with_page_size(4));
    let cancel = CancellationToken::new();
    let history_path = FakeHomeserver::room_path(&room, "messages");

    // First page holds every event but does not end the history yet.
    let mut pager = client.room_paginator(&room, 3).unwrap();
    let batch = pager.paginate(&cancel).await.unwrap();
    assert_eq!(ids(&batch), vec!["$m1", "$m2", "$m3"]);
    assert!(!pager.is_on_top());
    assert_eq!(server.request_count(&history_path), 1);

    // Second page comes back empty with start == end.
    let batch = pager.paginate(&cancel).await.unwrap();
    assert_eq!(ids(&batch), vec!["$m0"]);
    assert!(pager.is_on_top());
    assert_eq!(server.request_count(&history_path), 2);

    for _ in 0..3 {
        assert!(pager.paginate(&cancel).await.unwrap().is_empty());
    }
    assert_eq!(server.request_count(&history_path), 2);
}

#[tokio::test]
async fn overlapping_page_is_trimmed_at_the_earliest_returned_event() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    let history = messages("$h", 12);
    server.push_events(&room, history.clone());

    let client = client_with(&server, test_config(&server).with_page_size(4));
    client
        .store()
        .append_timeline_events(&room, history[7..].to_vec())
        .unwrap();
    // A token newer than the oldest cached event.
    client.store().set_prev_batch(&room, "t9").unwrap();

    let cancel = CancellationToken::new();
    let mut pager = client.room_paginator(&room, 3).unwrap();
    let mut batches = Vec::new();
    while !pager.is_on_top() {
        batches.push(ids(&pager.paginate(&cancel).await.unwrap()));
    }

    assert_eq!(batches[0], vec!["$h9", "$h10", "$h11"]);
    assert_eq!(batches[1], vec!["$h6", "$h7", "$h8"]);
    let all: Vec<String> = batches.into_iter().rev().flatten().collect();
    assert_eq!(all, ids(&history));
}

#[tokio::test]
async fn page_without_earliest_event_is_kept_whole() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    let history = messages("$h", 12);
    server.push_events(&room, history.clone());

    // The oldest cached event is unknown to the server, so no fetched page
    // can be trimmed at it.
    let client = client_with(&server, test_config(&server).with_page_size(4));
    let mut cached = vec![message_with_id("$local", "@me:test", "local")];
    cached.extend_from_slice(&history[8..10]);
    client.store().append_timeline_events(&room, cached).unwrap();
    client.store().set_prev_batch(&room, "t10").unwrap();

    let mut pager = client.room_paginator(&room, 10).unwrap();
    let batch = pager.paginate(&CancellationToken::new()).await.unwrap();
    assert_eq!(
        ids(&batch),
        vec!["$h3", "$h4", "$h5", "$h6", "$h7", "$h8", "$h9", "$local", "$h8", "$h9"]
    );
    assert_eq!(pager.buffered(), 1);
}

#[tokio::test]
async fn paginator_derives_token_from_context_after_eviction() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.push_events(&room, messages("$h", 12));

    // Evicting beyond the cap drops the pagination token.
    let client = memory_client_with_store(
        &server,
        StoreConfig::default().with_timeline_keep_last(5),
    );
    client.sync_once(&CancellationToken::new()).await.unwrap();
    assert_eq!(client.store().timeline(&room).unwrap().len(), 5);
    assert_eq!(client.store().prev_batch(&room), None);

    let cancel = CancellationToken::new();
    let mut pager = client.room_paginator(&room, 3).unwrap();
    assert_eq!(
        ids(&pager.paginate(&cancel).await.unwrap()),
        vec!["$h9", "$h10", "$h11"]
    );
    assert_eq!(
        ids(&pager.paginate(&cancel).await.unwrap()),
        vec!["$h6", "$h7", "$h8"]
    );
    assert_eq!(server.request_count(&FakeHomeserver::room_path(&room, "context")), 1);
    assert_eq!(client.store().prev_batch(&room).as_deref(), Some("t7"));
}

#[tokio::test]
async fn failed_page_ends_pagination_with_buffered_events() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.push_events(&room, messages("$h", 30));
    let client = client_with(
        &server,
        test_config(&server).with_sync(fast_sync_config().with_timeline_limit(4)),
    );
    client.sync_once(&CancellationToken::new()).await.unwrap();

    server.fail_next(FakeHomeserver::room_path(&room, "messages"), 1, Failure::Status(500));
    let mut pager = client.room_paginator(&room, 10).unwrap();
    let batch = pager.paginate(&CancellationToken::new()).await.unwrap();
    assert_eq!(ids(&batch), vec!["$h26", "$h27", "$h28", "$h29"]);
    assert!(pager.is_on_top());
}

// ============================================================================
// Room queries
// ============================================================================

#[tokio::test]
async fn room_timeline_falls_back_to_one_remote_page() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.push_events(&room, messages("$m", 3));
    let client = memory_client(&server);
    let cancel = CancellationToken::new();

    let latest = client.room_timeline(&room, &cancel).await.unwrap();
    assert_eq!(ids(&latest), vec!["$m0", "$m1", "$m2"]);
    assert!(client.store().timeline(&room).is_none());

    client.store().set_prev_batch(&room, "t1").unwrap();
    let forward = client.room_timeline(&room, &cancel).await.unwrap();
    assert_eq!(ids(&forward), vec!["$m1", "$m2"]);

    assert!(matches!(
        client.room_timeline(&RoomId::from("!cold:test"), &Client::offline()).await,
        Err(SyncError::Cancelled)
    ));
}

#[tokio::test]
async fn room_state_is_fetched_once_and_cached() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.set_state(&room, create("@me:test", Some("m.space")));
    server.set_state(&room, member("@a:test", Some("Alice")));
    server.set_state(&room, member("@b:test", Some("Bob")));
    let client = memory_client(&server);
    let cancel = CancellationToken::new();

    let members = client
        .room_states_of_type(&room, event_type::ROOM_MEMBER, &cancel)
        .await
        .unwrap();
    assert_eq!(members.len(), 2);
    let requests = server.request_count(&FakeHomeserver::room_path(&room, "state"));
    assert_eq!(requests, 1);

    assert!(client.room_is_space(&room, &cancel).await);
    assert_eq!(client.search_members(&room, "bo"), vec![UserId::from("@b:test")]);
    assert_eq!(
        server.request_count(&FakeHomeserver::room_path(&room, "state")),
        requests
    );

    let missing = client
        .room_state(&room, event_type::ROOM_NAME, "", &cancel)
        .await;
    assert!(missing.unwrap_err().is_not_found());
}

#[tokio::test]
async fn ensure_members_fetches_once() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.set_state(&room, member("@a:test", Some("Alice")));
    server.set_state(&room, member("@b:test", Some("Bob")));
    server.set_state(&room, membership("@c:test", "leave"));
    server.set_delay(Duration::from_millis(30));
    let client = memory_client(&server);
    let cancel = CancellationToken::new();
    let members_path = FakeHomeserver::room_path(&room, "members");

    let (first, second) = tokio::join!(
        client.room_ensure_members(&room, &cancel),
        client.room_ensure_members(&room, &cancel)
    );
    first.unwrap();
    second.unwrap();
    client.room_ensure_members(&room, &cancel).await.unwrap();

    assert_eq!(server.request_count(&members_path), 1);
    let request = server
        .requests()
        .into_iter()
        .find(|r| r.path.starts_with(&members_path))
        .unwrap();
    assert_eq!(request.query_param("membership"), Some("join"));

    assert_eq!(client.search_members(&room, "ali"), vec![UserId::from("@a:test")]);
    assert!(client
        .store()
        .state_event(&room, event_type::ROOM_MEMBER, "@c:test")
        .is_none());
}

#[tokio::test]
async fn failed_ensure_members_can_be_retried() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.set_state(&room, member("@a:test", Some("Alice")));
    let members_path = FakeHomeserver::room_path(&room, "members");
    server.fail_next(members_path.as_str(), 1, Failure::Status(502));
    let client = memory_client(&server);
    let cancel = CancellationToken::new();

    assert!(client.room_ensure_members(&room, &cancel).await.is_err());
    client.room_ensure_members(&room, &cancel).await.unwrap();
    assert_eq!(server.request_count(&members_path), 2);
    assert_eq!(client.room_members(&room, &cancel).await.unwrap().len(), 1);
}

#[tokio::test]
async fn member_names_flag_ambiguity() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.push_event(&room, member("@a:test", Some("Sam")));
    server.push_event(&room, member("@b:test", Some("Sam")));
    server.push_event(&room, member("@c:test", Some("Cy")));
    let client = synced_client(&server).await;
    let cancel = CancellationToken::new();

    let sam = client
        .member_name(&room, &UserId::from("@a:test"), true, &cancel)
        .await;
    assert_eq!(sam.name, "Sam");
    assert!(sam.ambiguous);

    let unchecked = client
        .member_name(&room, &UserId::from("@a:test"), false, &cancel)
        .await;
    assert!(!unchecked.ambiguous);

    let names = client
        .member_names(
            &room,
            &[UserId::from("@c:test"), UserId::from("@ghost:test")],
            true,
            &cancel,
        )
        .await;
    assert_eq!(names[0].name, "Cy");
    assert!(!names[0].ambiguous);
    assert_eq!(names[1].name, "@ghost:test");
}

// ============================================================================
// Authorization
// ============================================================================

#[tokio::test]
async fn power_checks_use_levels_and_creator() {
    let server = Arc::new(FakeHomeserver::default());
    let cancel = CancellationToken::new();

    let own = RoomId::from("!own:test");
    server.set_state(&own, create("@me:test", None));
    server.set_state(&own, power_levels(&[("@me:test", 0)], 0));

    let moderated = RoomId::from("!moderated:test");
    server.set_state(&moderated, create("@boss:test", None));
    server.set_state(&moderated, power_levels(&[("@me:test", 50)], 0));

    let guest = RoomId::from("!guest:test");
    server.set_state(&guest, create("@boss:test", None));
    server.set_state(&guest, power_levels(&[], 0));

    let bare = RoomId::from("!bare:test");
    server.set_state(&bare, create("@me:test", None));

    let client = memory_client(&server);

    assert!(client.has_power(&own, PowerAction::Ban, &cancel).await);
    assert!(client.has_power(&moderated, PowerAction::Kick, &cancel).await);
    assert!(!client.has_power(&guest, PowerAction::Ban, &cancel).await);
    assert!(client.has_power(&bare, PowerAction::Redact, &cancel).await);
    assert!(
        !client
            .has_power(&RoomId::from("!unknown:test"), PowerAction::Invite, &cancel)
            .await
    );
    assert!(client.is_room_creator(&bare, &cancel).await);
    assert!(!client.is_room_creator(&guest, &cancel).await);
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test]
async fn failed_send_leaves_cache_untouched() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.push_events(&room, messages("$m", 2));
    let client = synced_client(&server).await;
    let cancel = CancellationToken::new();

    server.fail_next(FakeHomeserver::room_path(&room, "send"), 1, Failure::Status(500));
    let result = client
        .send_room_event(&room, event_type::ROOM_MESSAGE, json!({ "body": "hi" }), &cancel)
        .await;
    assert!(matches!(result, Err(SyncError::Http { status: 500, .. })));
    assert_eq!(server.history(&room).len(), 2);
    assert_eq!(client.store().timeline(&room).unwrap().len(), 2);

    assert!(matches!(
        client.send_room_event(&room, "", json!({}), &cancel).await,
        Err(SyncError::InvalidArgument(_))
    ));

    // A successful send is only cached once it comes back through sync.
    let id = client
        .send_room_event(&room, event_type::ROOM_MESSAGE, json!({ "body": "hi" }), &cancel)
        .await
        .unwrap();
    assert_eq!(client.store().timeline(&room).unwrap().len(), 2);
    client.sync_once(&cancel).await.unwrap();
    let timeline = client.store().timeline(&room).unwrap();
    assert_eq!(timeline.last().and_then(|e| e.event_id.clone()), Some(id));
}

#[tokio::test]
async fn toggle_reaction_adds_then_removes() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    let target = EventId::from("$target");
    server.push_event(&room, message_with_id("$target", "@you:test", "hello"));
    let client = synced_client(&server).await;
    let cancel = CancellationToken::new();
    let me = UserId::from("@me:test");

    let added = client
        .toggle_reaction(&room, &target, "👍", &cancel)
        .await
        .unwrap();
    let reaction_id = match added {
        ToggleOutcome::Added(id) => id,
        other => panic!("expected a new reaction, got {other:?}"),
    };
    client.sync_once(&cancel).await.unwrap();
    let summary = client.reactions(&room, &target);
    assert_eq!(summary.count("👍"), 1);
    assert_eq!(summary.own_reaction("👍", &me), Some(&reaction_id));

    let removed = client
        .toggle_reaction(&room, &target, "👍", &cancel)
        .await
        .unwrap();
    assert!(matches!(removed, ToggleOutcome::Removed(_)));
    client.sync_once(&cancel).await.unwrap();
    assert_eq!(client.reactions(&room, &target).count("👍"), 0);
}

#[tokio::test]
async fn reactions_are_ranked_by_count() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    let target = EventId::from("$target");
    server.push_event(&room, message_with_id("$target", "@you:test", "hello"));
    server.push_event(&room, reaction("$r1", "@a:test", "$target", "a"));
    server.push_event(&room, reaction("$r2", "@b:test", "$target", "b"));
    server.push_event(&room, reaction("$r3", "@c:test", "$target", "b"));
    server.push_event(&room, reaction("$r4", "@d:test", "$elsewhere", "b"));
    server.push_event(&room, redaction("$x1", "@a:test", "$r1"));
    server.push_event(&room, reaction("$r5", "@e:test", "$target", "c"));
    let client = synced_client(&server).await;

    let summary = client.reactions(&room, &target);
    assert_eq!(summary.keys(), vec![("b", 2), ("c", 1)]);
    assert!(summary.reacted("b", &UserId::from("@c:test")));
}

// ============================================================================
// Per-user events
// ============================================================================

#[tokio::test]
async fn failed_upload_rolls_back_user_event() {
    let server = Arc::new(FakeHomeserver::default());
    let client = memory_client(&server);
    let cancel = CancellationToken::new();
    let settings = "org.example.settings";
    let account_data = format!("{CLIENT_PREFIX}/user");

    client
        .store()
        .set_user_event(Event::new(settings, json!({ "theme": "dark" })))
        .unwrap();

    server.fail_next(account_data.as_str(), 1, Failure::Status(500));
    let result = client
        .set_user_event(Event::new(settings, json!({ "theme": "light" })), &cancel)
        .await;
    assert!(result.is_err());
    assert_eq!(
        client.store().user_event(settings).unwrap().content,
        json!({ "theme": "dark" })
    );

    server.fail_next(account_data.as_str(), 1, Failure::Transport);
    let fresh = "org.example.fresh";
    assert!(client
        .set_user_event(Event::new(fresh, json!({ "on": true })), &cancel)
        .await
        .is_err());
    assert!(client.store().user_event(fresh).is_none());

    client
        .set_user_event(Event::new(settings, json!({ "theme": "light" })), &cancel)
        .await
        .unwrap();
    assert_eq!(server.account_data(settings), Some(json!({ "theme": "light" })));
    assert_eq!(
        client.user_event(settings, &Client::offline()).await.unwrap().content,
        json!({ "theme": "light" })
    );
}

#[tokio::test]
async fn direct_rooms_come_from_account_data_or_membership() {
    let server = Arc::new(FakeHomeserver::default());
    let dm = RoomId::from("!dm:test");
    let invited = RoomId::from("!invited:test");
    let group = RoomId::from("!group:test");
    server.set_account_data(event_type::DIRECT, json!({ "@friend:test": ["!dm:test"] }));
    server.set_state(
        &invited,
        state(
            event_type::ROOM_MEMBER,
            "@me:test",
            json!({ "membership": "join", "is_direct": true }),
        ),
    );
    server.set_state(&group, member("@me:test", None));
    let client = memory_client(&server);
    let cancel = CancellationToken::new();

    assert!(client.is_direct(&dm, &cancel).await);
    assert!(client.is_direct(&invited, &cancel).await);
    assert!(!client.is_direct(&group, &cancel).await);
    assert!(client.store().user_event(event_type::DIRECT).is_some());
}

#[tokio::test]
async fn room_tags_are_cached_as_room_account_data() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.set_tag(&room, "m.favourite", json!({ "order": 0.5 }));
    let client = memory_client(&server);

    client
        .update_room_tags(&room, &CancellationToken::new())
        .await
        .unwrap();
    let tags = client
        .room_event(&room, event_type::TAG, &Client::offline())
        .await
        .unwrap();
    assert_eq!(tags.content["tags"]["m.favourite"]["order"], json!(0.5));
}

// ============================================================================
// Read markers
// ============================================================================

fn put_room_marker(client: &Client, room: &RoomId, event: Event) {
    let mut batch = client.store().write();
    batch.put_room_account_data(room, event);
    batch.commit().unwrap();
}

fn put_receipt(client: &Client, room: &RoomId, event: Event) {
    let mut batch = client.store().write();
    batch.put_ephemeral(room, event);
    batch.commit().unwrap();
}

#[tokio::test]
async fn mark_as_read_skips_events_already_read() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.push_events(&room, messages("$m", 3));
    let client = synced_client(&server).await;
    let cancel = CancellationToken::new();
    let markers = FakeHomeserver::room_path(&room, "read_markers");

    put_room_marker(&client, &room, fully_read("$m2"));
    client
        .mark_room_as_read(&room, &EventId::from("$m2"), &cancel)
        .await
        .unwrap();
    assert_eq!(server.request_count(&markers), 0);

    client
        .mark_room_as_read(&room, &EventId::from("$m1"), &cancel)
        .await
        .unwrap();
    assert_eq!(server.request_count(&markers), 1);
    assert_eq!(
        server.read_markers(&room),
        Some(json!({ "m.fully_read": "$m1", "m.read": "$m1" }))
    );
}

#[tokio::test]
async fn unread_counts_follow_markers_and_receipts() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.push_events(&room, messages("$m", 5));
    let client = synced_client(&server).await;
    let cancel = CancellationToken::new();

    assert_eq!(client.room_latest_read_event(&room), None);
    assert_eq!(
        client.room_count_unread(&room),
        UnreadCount { count: 5, more: true }
    );
    assert_eq!(client.room_is_unread(&room, &cancel).await, None);

    put_receipt(&client, &room, receipt("$m2", "@me:test"));
    put_receipt(&client, &room, receipt("$m4", "@you:test"));
    assert_eq!(client.room_latest_read_event(&room), Some(EventId::from("$m2")));
    assert_eq!(
        client.room_count_unread(&room),
        UnreadCount { count: 2, more: false }
    );
    assert_eq!(client.room_is_unread(&room, &cancel).await, Some(true));

    put_room_marker(&client, &room, fully_read("$m4"));
    assert_eq!(
        client.room_count_unread(&room),
        UnreadCount { count: 0, more: false }
    );
    assert_eq!(client.room_is_unread(&room, &cancel).await, Some(false));
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn reopened_session_resumes_from_disk() {
    let server = Arc::new(FakeHomeserver::default());
    let room = test_room();
    server.push_event(&room, member("@a:test", Some("Alice")));
    server.push_events(&room, messages("$m", 3));

    let TestAccount { client, dir } = TestAccount::open(&server);
    client.sync_once(&CancellationToken::new()).await.unwrap();
    client.close().await.unwrap();
    // The directory lock is held until the session is dropped.
    drop(client);

    let reopened = TestAccount::reopen(&server, &dir);
    assert_eq!(reopened.store().resume_token().as_deref(), Some("s1"));
    assert_eq!(reopened.store().timeline(&room).unwrap().len(), 4);
    assert_eq!(reopened.search_members(&room, "al"), vec![UserId::from("@a:test")]);

    server.push_event(&room, message_with_id("$next", "@a:test", "next"));
    reopened.sync_once(&CancellationToken::new()).await.unwrap();
    let syncs: Vec<HttpRequest> = server
        .requests()
        .into_iter()
        .filter(|r| r.path.starts_with(SYNC_PATH))
        .collect();
    assert_eq!(syncs.last().and_then(|r| r.query_param("since")), Some("s1"));
    assert_eq!(reopened.store().timeline(&room).unwrap().len(), 5);
    reopened.close().await.unwrap();
}
