use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

use huddle_api::service::GroupChannelService;
use huddle_bus::MemoryBus;
use huddle_gateway::{SseSubscriber, Subscriber, SubscriptionRegistry, TransportError};
use huddle_store::Database;
use huddle_types::dto::{GroupMessageDto, PageRequest};
use huddle_types::models::{MessageKind, User};
use huddle_types::ChatError;

fn setup() -> (Arc<Database>, Arc<MemoryBus>, GroupChannelService) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let bus = Arc::new(MemoryBus::new());
    let service = GroupChannelService::new(db.clone(), bus.clone());
    (db, bus, service)
}

fn seed_user(db: &Database, name: &str) -> User {
    let user = User::new(name);
    db.create_user(&user).unwrap();
    user
}

fn page(page: u32, size: u32) -> PageRequest {
    PageRequest { page, size }
}

const EPOCH: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Transport double that records everything sent to it.
struct RecordingSubscriber {
    id: Uuid,
    sent: Mutex<Vec<String>>,
}

impl RecordingSubscriber {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn messages(&self) -> Vec<GroupMessageDto> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }
}

#[async_trait]
impl Subscriber for RecordingSubscriber {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn close(&self) {}

    async fn closed(&self) {
        std::future::pending::<()>().await;
    }
}

async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn create_then_list() {
    let (db, _bus, service) = setup();
    let alice = seed_user(&db, "alice");

    let profile = service
        .create_channel(&alice.id.to_string(), "Room A")
        .await
        .unwrap();
    assert_eq!(profile.name, "Room A");
    assert_eq!(profile.members.len(), 1);
    assert_eq!(profile.members[0].id, alice.id);
    assert!(profile.invited.is_empty());

    let slice = service
        .get_all_channels(&alice.id.to_string(), EPOCH, page(0, 10))
        .await
        .unwrap();
    assert_eq!(slice.items.len(), 1);
    assert_eq!(slice.items[0].name, "Room A");
    assert!(!slice.has_next);
}

#[tokio::test]
async fn invite_then_accept() {
    let (db, _bus, service) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");

    let channel = service
        .create_channel(&alice.id.to_string(), "R")
        .await
        .unwrap();
    let channel_id = channel.id.to_string();

    let invite = service
        .invite_to_channel(&alice.id.to_string(), &bob.id.to_string(), &channel_id)
        .await
        .unwrap();
    assert_eq!(invite.kind, MessageKind::Invite);
    assert_eq!(invite.from.as_ref().unwrap().id, alice.id);
    assert_eq!(invite.channel_id, channel.id);

    let join = service
        .accept_invitation(&bob.id.to_string(), &channel_id)
        .await
        .unwrap();
    assert_eq!(join.kind, MessageKind::Join);
    assert_eq!(join.from.as_ref().unwrap().id, bob.id);

    let profile = service
        .get_channel_profile(&bob.id.to_string(), &channel_id)
        .await
        .unwrap();
    let mut member_ids: Vec<Uuid> = profile.members.iter().map(|m| m.id).collect();
    member_ids.sort();
    let mut expected = vec![alice.id, bob.id];
    expected.sort();
    assert_eq!(member_ids, expected);
    assert!(profile.invited.is_empty());
}

#[tokio::test]
async fn kick_forbidden_paths() {
    let (db, _bus, service) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");

    let channel = service
        .create_channel(&alice.id.to_string(), "room")
        .await
        .unwrap();
    let channel_id = channel.id.to_string();

    // Non-member cannot kick.
    let err = service
        .remove_from_channel(&bob.id.to_string(), &alice.id.to_string(), &channel_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvalidOperation(_)));

    // Self-kick goes through leave, not kick.
    let err = service
        .remove_from_channel(&alice.id.to_string(), &alice.id.to_string(), &channel_id)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::InvalidOperation(_)));
}

#[tokio::test]
async fn leave_last_member_unlists_the_channel() {
    let (db, _bus, service) = setup();
    let alice = seed_user(&db, "alice");

    let channel = service
        .create_channel(&alice.id.to_string(), "solo")
        .await
        .unwrap();

    let leave = service
        .leave_channel(&alice.id.to_string(), &channel.id.to_string())
        .await
        .unwrap();
    assert_eq!(leave.kind, MessageKind::Leave);

    let slice = service
        .get_all_channels(&alice.id.to_string(), EPOCH, page(0, 10))
        .await
        .unwrap();
    assert!(slice.items.is_empty());
}

#[tokio::test]
async fn delivery_reaches_live_sse_subscriber() {
    let (db, bus, service) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");
    let carol = seed_user(&db, "carol");

    let registry = SubscriptionRegistry::new(bus.clone());
    registry.start();

    let channel = service
        .create_channel(&alice.id.to_string(), "room")
        .await
        .unwrap();
    let channel_id = channel.id.to_string();
    service
        .invite_to_channel(&alice.id.to_string(), &bob.id.to_string(), &channel_id)
        .await
        .unwrap();
    service
        .accept_invitation(&bob.id.to_string(), &channel_id)
        .await
        .unwrap();

    // Bob listens over SSE; a recording handle checks payload content.
    let (tx, mut rx) = mpsc::channel(16);
    let sse = Arc::new(SseSubscriber::new(tx));
    registry.subscribe(bob.id, sse.clone()).await.unwrap();
    sse.send_connect().await.unwrap();
    assert!(rx.recv().await.is_some()); // the connect event

    let recorder = RecordingSubscriber::new();
    registry.subscribe(bob.id, recorder.clone()).await.unwrap();

    let invite = service
        .invite_to_channel(&alice.id.to_string(), &carol.id.to_string(), &channel_id)
        .await
        .unwrap();

    // Exactly one message event on the SSE handle.
    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("no SSE event arrived");
    assert!(event.is_some());
    assert!(rx.try_recv().is_err());

    wait_until(|| !recorder.messages().is_empty()).await;
    let received = recorder.messages();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, invite.id);
    assert_eq!(received[0].kind, MessageKind::Invite);
    assert_eq!(received[0].from.as_ref().unwrap().id, alice.id);

    registry.stop().await;
}

#[tokio::test]
async fn transitions_publish_to_post_transition_members_only() {
    let (db, bus, service) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");
    let carol = seed_user(&db, "carol");

    let registry = SubscriptionRegistry::new(bus.clone());
    registry.start();

    let listeners = [
        (alice.id, RecordingSubscriber::new()),
        (bob.id, RecordingSubscriber::new()),
        (carol.id, RecordingSubscriber::new()),
    ];
    for (user_id, handle) in &listeners {
        registry.subscribe(*user_id, handle.clone()).await.unwrap();
    }
    let (alice_sub, bob_sub, carol_sub) =
        (&listeners[0].1, &listeners[1].1, &listeners[2].1);

    let channel = service
        .create_channel(&alice.id.to_string(), "room")
        .await
        .unwrap();
    let channel_id = channel.id.to_string();
    service
        .invite_to_channel(&alice.id.to_string(), &bob.id.to_string(), &channel_id)
        .await
        .unwrap();
    service
        .accept_invitation(&bob.id.to_string(), &channel_id)
        .await
        .unwrap();

    // INVITE goes to the members, not the invitee.
    service
        .invite_to_channel(&alice.id.to_string(), &carol.id.to_string(), &channel_id)
        .await
        .unwrap();
    wait_until(|| {
        alice_sub.messages().iter().any(|m| m.kind == MessageKind::Invite && m.from.as_ref().unwrap().id == alice.id)
            && bob_sub.messages().iter().any(|m| m.kind == MessageKind::Invite)
    })
    .await;
    assert!(carol_sub.messages().is_empty());

    // JOIN reaches the new member too.
    service
        .accept_invitation(&carol.id.to_string(), &channel_id)
        .await
        .unwrap();
    wait_until(|| {
        carol_sub.messages().iter().any(|m| m.kind == MessageKind::Join)
    })
    .await;

    // KICK is not delivered to the kicked user.
    service
        .remove_from_channel(&alice.id.to_string(), &carol.id.to_string(), &channel_id)
        .await
        .unwrap();
    wait_until(|| {
        alice_sub.messages().iter().any(|m| m.kind == MessageKind::Kick)
            && bob_sub.messages().iter().any(|m| m.kind == MessageKind::Kick)
    })
    .await;
    assert!(!carol_sub
        .messages()
        .iter()
        .any(|m| m.kind == MessageKind::Kick));

    registry.stop().await;
}

#[tokio::test]
async fn send_message_and_read_history() {
    let (db, _bus, service) = setup();
    let alice = seed_user(&db, "alice");
    let bob = seed_user(&db, "bob");

    let channel = service
        .create_channel(&alice.id.to_string(), "room")
        .await
        .unwrap();
    let channel_id = channel.id.to_string();

    let sent = service
        .send_message(&alice.id.to_string(), &channel_id, "hello there")
        .await
        .unwrap();
    assert_eq!(sent.kind, MessageKind::Text);
    assert_eq!(sent.payload, "hello there");

    // Outsiders may neither post nor read.
    assert!(matches!(
        service
            .send_message(&bob.id.to_string(), &channel_id, "intruding")
            .await,
        Err(ChatError::InvalidOperation(_))
    ));
    assert!(matches!(
        service
            .get_channel_messages(&bob.id.to_string(), &channel_id, page(0, 10))
            .await,
        Err(ChatError::InvalidOperation(_))
    ));

    let history = service
        .get_channel_messages(&alice.id.to_string(), &channel_id, page(0, 10))
        .await
        .unwrap();
    assert_eq!(history.items.len(), 2);
    assert_eq!(history.items[0].kind, MessageKind::Text);
    assert_eq!(history.items[1].kind, MessageKind::Create);
}

#[tokio::test]
async fn identifier_and_page_validation_comes_first() {
    let (db, _bus, service) = setup();
    let alice = seed_user(&db, "alice");

    assert!(matches!(
        service.create_channel("not-a-uuid", "room").await,
        Err(ChatError::Validation(_))
    ));
    assert!(matches!(
        service
            .invite_to_channel(&alice.id.to_string(), "nope", &Uuid::now_v7().to_string())
            .await,
        Err(ChatError::Validation(_))
    ));
    assert!(matches!(
        service
            .get_all_channels(&alice.id.to_string(), EPOCH, page(0, 0))
            .await,
        Err(ChatError::Validation(_))
    ));

    // Referential failures surface after validation.
    assert!(matches!(
        service
            .create_channel(&Uuid::now_v7().to_string(), "room")
            .await,
        Err(ChatError::UserDoesNotExist)
    ));
    assert!(matches!(
        service
            .leave_channel(&alice.id.to_string(), &Uuid::now_v7().to_string())
            .await,
        Err(ChatError::ChannelDoesNotExist)
    ));
}

#[tokio::test]
async fn profile_is_member_only() {
    let (db, _bus, service) = setup();
    let alice = seed_user(&db, "alice");
    let mallory = seed_user(&db, "mallory");

    let channel = service
        .create_channel(&alice.id.to_string(), "private-ish")
        .await
        .unwrap();

    assert!(matches!(
        service
            .get_channel_profile(&mallory.id.to_string(), &channel.id.to_string())
            .await,
        Err(ChatError::InvalidOperation(_))
    ));
}
