// =============================================================================
// Matrixon Matrix NextServer - Appservice Intent Module
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 2.0.0-alpha (PostgreSQL Backend)
// License: Apache 2.0 / MIT
//
// Description:
//   Per-user intent facade for the appservice SDK. This module is part of the
//   Matrixon Matrix NextServer implementation, designed for enterprise-grade
//   deployment with 20,000+ concurrent connections and <50ms response latency.
//
// Performance Targets:
//   • 20k+ concurrent connections
//   • <50ms response latency
//   • >99% success rate
//   • Memory-efficient operation
//   • Horizontal scalability
//
// Features:
//   • Lazy virtual-user registration with already-in-use tolerance
//   • Membership guarantees with bot-invite rescue on forbidden joins
//   • Message, state event and room operations
//   • Pluggable power-level policy hook
//
// Architecture:
//   • Async/await native implementation
//   • Zero-copy operations where possible
//   • Memory pool optimization
//   • Lock-free data structures
//   • Enterprise monitoring integration
//
// Dependencies:
//   • Tokio async runtime
//   • Structured logging with tracing
//   • Error handling with anyhow/thiserror
//   • Serialization with serde
//   • Matrix protocol types with ruma
//
// References:
//   • Matrix.org specification: https://matrix.org/
//   • Synapse reference: https://github.com/element-hq/synapse
//   • Matrix spec: https://spec.matrix.org/
//   • Performance guidelines: Internal Matrixon documentation
//
// Quality Assurance:
//   • Comprehensive unit testing
//   • Integration test coverage
//   • Performance benchmarking
//   • Memory leak detection
//   • Security audit compliance
//
// =============================================================================

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use ruma::{OwnedEventId, OwnedRoomId, OwnedUserId, RoomId, UserId};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::{
    api::ClientApi,
    appservice::AppserviceClient,
    error::{Error, Result},
    message::{MessageContent, RoomCreateOptions, EVENT_TYPE_MESSAGE},
};

/// Capability predicate consulted before an intent sends an event.
///
/// Receives the acting user, the target room and the event type. The default
/// policy always permits; hosts that track room power levels can inject a
/// real check at construction.
pub type PowerLevelPolicy = Arc<dyn Fn(&UserId, &RoomId, &str) -> bool + Send + Sync>;

/// A policy that permits every event.
pub fn permit_all_policy() -> PowerLevelPolicy {
    Arc::new(|_, _, _| true)
}

/// Per-identity facade that guarantees the identity is registered and joined
/// before delegating an action to the transport.
///
/// Intents minted through [`AppserviceClient::intent`] carry a reference to
/// the privileged bot intent; when a virtual user cannot join a room on its
/// own, the bot invites it and the join is retried once. The membership and
/// registration caches are optimistic hints that live as long as the intent.
pub struct Intent {
    router: Option<AppserviceClient>,
    api: Arc<dyn ClientApi>,
    user_id: OwnedUserId,
    bot: Option<Arc<Intent>>,
    joined: RwLock<HashSet<OwnedRoomId>>,
    registered: AtomicBool,
    policy: PowerLevelPolicy,
}

impl Intent {
    pub(crate) fn new(
        router: Option<AppserviceClient>,
        api: Arc<dyn ClientApi>,
        bot: Option<Arc<Intent>>,
        policy: PowerLevelPolicy,
    ) -> Self {
        let user_id = api.user_id().to_owned();
        Self {
            router,
            api,
            user_id,
            bot,
            joined: RwLock::new(HashSet::new()),
            registered: AtomicBool::new(false),
            policy,
        }
    }

    /// Builds an intent directly over a transport, without an appservice
    /// client. Useful for alternate transports and tests; [`Intent::user`] is
    /// unavailable on such intents.
    pub fn with_transport(api: Arc<dyn ClientApi>, bot: Option<Arc<Intent>>) -> Self {
        Self::new(None, api, bot, permit_all_policy())
    }

    /// Replaces the power-level policy. Meant to be called before first use.
    pub fn with_power_level_policy(mut self, policy: PowerLevelPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The identity this intent acts as.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Whether this is the privileged bot intent (the delegation root).
    pub fn is_bot(&self) -> bool {
        self.bot.is_none()
    }

    /// Mints an intent for another virtual user.
    ///
    /// Only available on the bot intent; puppet intents fail with
    /// [`Error::BotOnly`].
    pub async fn user(&self, user_id: &str) -> Result<Intent> {
        if self.bot.is_some() {
            return Err(Error::BotOnly("user"));
        }
        let router = self.router.as_ref().ok_or_else(|| {
            Error::Config("Intent is not attached to an appservice client".to_owned())
        })?;
        router.intent(user_id).await
    }

    /// Registers the identity if it has not been registered yet.
    ///
    /// Idempotent. `M_USER_IN_USE` counts as success; the registered flag is
    /// set only on confirmed success or already-in-use, so a genuine failure
    /// leaves the next call free to retry.
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn ensure_registered(&self) -> Result<()> {
        if self.registered.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.api.register(self.user_id.localpart()).await {
            Ok(()) => {
                debug!(user_id = %self.user_id, "Registered virtual user");
            }
            Err(err) if err.is_user_in_use() => {
                debug!(user_id = %self.user_id, "Virtual user already registered");
            }
            Err(err) => {
                return Err(Error::intent(&self.user_id, "register", err));
            }
        }
        self.registered.store(true, Ordering::Release);
        Ok(())
    }

    /// Makes sure the identity is a member of the room.
    ///
    /// A cached membership short-circuits unless `force_refresh` is set.
    /// When the join is forbidden and a bot delegate is present, the bot
    /// invites the identity and the join is retried exactly once; any failure
    /// on that path is fatal.
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn ensure_joined(&self, room_id: &RoomId, force_refresh: bool) -> Result<()> {
        if !force_refresh && self.joined.read().await.contains(room_id) {
            return Ok(());
        }
        self.ensure_registered().await?;

        let err = match self.api.join_room(room_id).await {
            Ok(_) => {
                self.joined.write().await.insert(room_id.to_owned());
                return Ok(());
            }
            Err(err) => err,
        };

        let bot = match &self.bot {
            Some(bot) if err.is_forbidden() => bot,
            _ => return Err(Error::intent(&self.user_id, format!("join room {}", room_id), err)),
        };

        warn!(user_id = %self.user_id, %room_id, "Join forbidden, falling back to a bot invite");
        let rescue = async {
            bot.invite_user(room_id, &self.user_id).await?;
            self.api.join_room(room_id).await
        };
        match rescue.await {
            Ok(_) => {
                self.joined.write().await.insert(room_id.to_owned());
                Ok(())
            }
            Err(err) => Err(Error::intent(
                &self.user_id,
                format!("join room {}", room_id),
                err,
            )),
        }
    }

    /// Invites another user to a room. Used by puppet intents as the rescue
    /// path through their bot delegate.
    pub async fn invite_user(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        self.ensure_registered().await?;
        self.api.invite_user(room_id, user_id).await
    }

    /// Sends a message-like event after guaranteeing membership and checking
    /// the power-level policy.
    pub async fn send_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: Value,
    ) -> Result<OwnedEventId> {
        self.send_event_at(room_id, event_type, content, None).await
    }

    /// Like [`Intent::send_event`], with a massaged origin timestamp in
    /// milliseconds.
    pub async fn send_event_at(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: Value,
        timestamp: Option<u64>,
    ) -> Result<OwnedEventId> {
        self.ensure_joined(room_id, false).await?;
        self.ensure_permitted(room_id, event_type)?;
        self.api
            .send_message_event(room_id, event_type, content, timestamp)
            .await
    }

    /// Sends a state event after the same precondition sequence.
    pub async fn send_state_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
    ) -> Result<OwnedEventId> {
        self.ensure_joined(room_id, false).await?;
        self.ensure_permitted(room_id, event_type)?;
        self.api
            .send_state_event(room_id, event_type, state_key, content, None)
            .await
    }

    /// Sends an `m.room.message` event with the given content.
    pub async fn send_message(
        &self,
        room_id: &RoomId,
        content: MessageContent,
    ) -> Result<OwnedEventId> {
        self.send_event(room_id, EVENT_TYPE_MESSAGE, serde_json::to_value(content)?)
            .await
    }

    /// Sends a plain text message.
    pub async fn send_text(&self, room_id: &RoomId, text: &str) -> Result<OwnedEventId> {
        self.send_message(room_id, MessageContent::text(text)).await
    }

    /// Sends a plain notice.
    pub async fn send_notice(&self, room_id: &RoomId, text: &str) -> Result<OwnedEventId> {
        self.send_message(room_id, MessageContent::notice(text))
            .await
    }

    /// Sends an HTML-formatted message with a plain-text fallback.
    pub async fn send_html(
        &self,
        room_id: &RoomId,
        formatted: &str,
        fallback: &str,
    ) -> Result<OwnedEventId> {
        self.send_message(room_id, MessageContent::html(formatted, fallback))
            .await
    }

    /// Sets the display name of the acting identity.
    pub async fn set_display_name(&self, name: &str) -> Result<()> {
        self.ensure_registered().await?;
        self.api.set_display_name(name).await
    }

    /// Creates a room as the acting identity.
    pub async fn create_room(&self, options: &RoomCreateOptions) -> Result<OwnedRoomId> {
        self.ensure_registered().await?;
        self.api.create_room(options).await
    }

    /// Joins the room, always performing a real join attempt even when the
    /// membership cache already says joined.
    pub async fn join_room(&self, room_id: &RoomId) -> Result<()> {
        self.ensure_joined(room_id, true).await
    }

    fn ensure_permitted(&self, room_id: &RoomId, event_type: &str) -> Result<()> {
        if (self.policy)(&self.user_id, room_id, event_type) {
            return Ok(());
        }
        Err(Error::PowerLevel {
            user_id: self.user_id.clone(),
            room_id: room_id.to_owned(),
            event_type: event_type.to_owned(),
        })
    }
}

impl std::fmt::Debug for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Intent")
            .field("user_id", &self.user_id)
            .field("is_bot", &self.is_bot())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ruma::{room_id, user_id, EventId};
    use serde_json::json;
    use std::{
        collections::VecDeque,
        sync::atomic::AtomicUsize,
        sync::Mutex,
    };

    /// Scripted transport that records calls and pops queued results.
    struct FakeApi {
        user_id: OwnedUserId,
        register_calls: AtomicUsize,
        register_results: Mutex<VecDeque<Result<()>>>,
        join_calls: AtomicUsize,
        join_results: Mutex<VecDeque<Result<OwnedRoomId>>>,
        invites: Mutex<Vec<(OwnedRoomId, OwnedUserId)>>,
        sent: Mutex<Vec<(OwnedRoomId, String, Value)>>,
        display_names: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn new(user_id: &UserId) -> Arc<Self> {
            Arc::new(Self {
                user_id: user_id.to_owned(),
                register_calls: AtomicUsize::new(0),
                register_results: Mutex::new(VecDeque::new()),
                join_calls: AtomicUsize::new(0),
                join_results: Mutex::new(VecDeque::new()),
                invites: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                display_names: Mutex::new(Vec::new()),
            })
        }

        fn queue_register(&self, result: Result<()>) {
            self.register_results.lock().unwrap().push_back(result);
        }

        fn queue_join(&self, result: Result<OwnedRoomId>) {
            self.join_results.lock().unwrap().push_back(result);
        }

        fn register_count(&self) -> usize {
            self.register_calls.load(Ordering::SeqCst)
        }

        fn join_count(&self) -> usize {
            self.join_calls.load(Ordering::SeqCst)
        }
    }

    fn forbidden() -> Error {
        Error::Matrix {
            status: 403,
            errcode: "M_FORBIDDEN".to_owned(),
            error: "not in room".to_owned(),
        }
    }

    fn user_in_use() -> Error {
        Error::Matrix {
            status: 400,
            errcode: "M_USER_IN_USE".to_owned(),
            error: "taken".to_owned(),
        }
    }

    fn server_error() -> Error {
        Error::Matrix {
            status: 500,
            errcode: "M_UNKNOWN".to_owned(),
            error: "boom".to_owned(),
        }
    }

    #[async_trait]
    impl ClientApi for FakeApi {
        fn user_id(&self) -> &UserId {
            &self.user_id
        }

        async fn register(&self, _username: &str) -> Result<()> {
            self.register_calls.fetch_add(1, Ordering::SeqCst);
            self.register_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(()))
        }

        async fn join_room(&self, room_id: &RoomId) -> Result<OwnedRoomId> {
            self.join_calls.fetch_add(1, Ordering::SeqCst);
            self.join_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(room_id.to_owned()))
        }

        async fn invite_user(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
            self.invites
                .lock()
                .unwrap()
                .push((room_id.to_owned(), user_id.to_owned()));
            Ok(())
        }

        async fn send_message_event(
            &self,
            room_id: &RoomId,
            event_type: &str,
            content: Value,
            _timestamp: Option<u64>,
        ) -> Result<OwnedEventId> {
            self.sent
                .lock()
                .unwrap()
                .push((room_id.to_owned(), event_type.to_owned(), content));
            Ok(EventId::parse("$event0:example.org").unwrap())
        }

        async fn send_state_event(
            &self,
            room_id: &RoomId,
            event_type: &str,
            _state_key: &str,
            content: Value,
            _timestamp: Option<u64>,
        ) -> Result<OwnedEventId> {
            self.sent
                .lock()
                .unwrap()
                .push((room_id.to_owned(), event_type.to_owned(), content));
            Ok(EventId::parse("$state0:example.org").unwrap())
        }

        async fn set_display_name(&self, name: &str) -> Result<()> {
            self.display_names.lock().unwrap().push(name.to_owned());
            Ok(())
        }

        async fn create_room(&self, _options: &RoomCreateOptions) -> Result<OwnedRoomId> {
            Ok(room_id!("!created:example.org").to_owned())
        }
    }

    fn puppet_with_bot() -> (Intent, Arc<FakeApi>, Arc<FakeApi>) {
        let bot_api = FakeApi::new(user_id!("@bridgebot:example.org"));
        let bot = Arc::new(Intent::with_transport(bot_api.clone(), None));
        let api = FakeApi::new(user_id!("@tg_1:example.org"));
        let intent = Intent::with_transport(api.clone(), Some(bot));
        (intent, api, bot_api)
    }

    #[tokio::test]
    async fn test_ensure_registered_is_idempotent() {
        let api = FakeApi::new(user_id!("@tg_1:example.org"));
        let intent = Intent::with_transport(api.clone(), None);

        intent.ensure_registered().await.unwrap();
        intent.ensure_registered().await.unwrap();
        assert_eq!(api.register_count(), 1);
    }

    #[tokio::test]
    async fn test_user_in_use_counts_as_registered() {
        let api = FakeApi::new(user_id!("@tg_1:example.org"));
        api.queue_register(Err(user_in_use()));
        let intent = Intent::with_transport(api.clone(), None);

        intent.ensure_registered().await.unwrap();
        intent.ensure_registered().await.unwrap();
        assert_eq!(api.register_count(), 1);
    }

    #[tokio::test]
    async fn test_genuine_register_failure_is_surfaced_and_retriable() {
        let api = FakeApi::new(user_id!("@tg_1:example.org"));
        api.queue_register(Err(server_error()));
        let intent = Intent::with_transport(api.clone(), None);

        let err = intent.ensure_registered().await.unwrap_err();
        match err {
            Error::Intent { user_id, source, .. } => {
                assert_eq!(user_id.as_str(), "@tg_1:example.org");
                assert_eq!(source.errcode(), Some("M_UNKNOWN"));
            }
            other => panic!("expected intent error, got {:?}", other),
        }

        // Flag is only set on confirmed success, so the next call retries.
        intent.ensure_registered().await.unwrap();
        assert_eq!(api.register_count(), 2);
    }

    #[tokio::test]
    async fn test_forbidden_join_is_rescued_by_bot_invite() {
        let (intent, api, bot_api) = puppet_with_bot();
        let room = room_id!("!chat:example.org");
        api.queue_join(Err(forbidden()));

        intent.ensure_joined(room, false).await.unwrap();

        let invites = bot_api.invites.lock().unwrap().clone();
        assert_eq!(
            invites,
            vec![(room.to_owned(), user_id!("@tg_1:example.org").to_owned())]
        );
        assert_eq!(api.join_count(), 2);

        // Membership is cached afterwards, no further join attempts.
        intent.ensure_joined(room, false).await.unwrap();
        assert_eq!(api.join_count(), 2);
    }

    #[tokio::test]
    async fn test_forbidden_join_without_bot_is_fatal() {
        let api = FakeApi::new(user_id!("@tg_1:example.org"));
        api.queue_join(Err(forbidden()));
        let intent = Intent::with_transport(api.clone(), None);
        let room = room_id!("!chat:example.org");

        let err = intent.ensure_joined(room, false).await.unwrap_err();
        assert!(matches!(err, Error::Intent { .. }));
        assert_eq!(api.join_count(), 1);
    }

    #[tokio::test]
    async fn test_non_forbidden_join_failure_skips_the_rescue() {
        let (intent, api, bot_api) = puppet_with_bot();
        let room = room_id!("!chat:example.org");
        api.queue_join(Err(server_error()));

        let err = intent.ensure_joined(room, false).await.unwrap_err();
        assert!(matches!(err, Error::Intent { .. }));
        assert!(bot_api.invites.lock().unwrap().is_empty());
        assert_eq!(api.join_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_retry_after_invite_is_fatal() {
        let (intent, api, bot_api) = puppet_with_bot();
        let room = room_id!("!chat:example.org");
        api.queue_join(Err(forbidden()));
        api.queue_join(Err(forbidden()));

        let err = intent.ensure_joined(room, false).await.unwrap_err();
        assert!(matches!(err, Error::Intent { .. }));
        assert_eq!(bot_api.invites.lock().unwrap().len(), 1);
        assert_eq!(api.join_count(), 2);
    }

    #[tokio::test]
    async fn test_join_room_bypasses_the_membership_cache() {
        let api = FakeApi::new(user_id!("@tg_1:example.org"));
        let intent = Intent::with_transport(api.clone(), None);
        let room = room_id!("!chat:example.org");

        intent.ensure_joined(room, false).await.unwrap();
        intent.join_room(room).await.unwrap();
        assert_eq!(api.join_count(), 2);
    }

    #[tokio::test]
    async fn test_send_text_joins_first_and_shapes_the_body() {
        let api = FakeApi::new(user_id!("@tg_1:example.org"));
        let intent = Intent::with_transport(api.clone(), None);
        let room = room_id!("!chat:example.org");

        intent.send_text(room, "hi").await.unwrap();

        assert_eq!(api.join_count(), 1);
        let sent = api.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "m.room.message");
        assert_eq!(sent[0].2, json!({"body": "hi", "msgtype": "m.text"}));
    }

    #[tokio::test]
    async fn test_send_event_reuses_cached_membership() {
        let api = FakeApi::new(user_id!("@tg_1:example.org"));
        let intent = Intent::with_transport(api.clone(), None);
        let room = room_id!("!chat:example.org");

        intent.send_text(room, "one").await.unwrap();
        intent.send_notice(room, "two").await.unwrap();
        assert_eq!(api.join_count(), 1);
        assert_eq!(api.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_power_level_policy_denial_blocks_the_send() {
        let api = FakeApi::new(user_id!("@tg_1:example.org"));
        let intent = Intent::with_transport(api.clone(), None)
            .with_power_level_policy(Arc::new(|_, _, _| false));
        let room = room_id!("!chat:example.org");

        let err = intent.send_text(room, "hi").await.unwrap_err();
        assert!(matches!(err, Error::PowerLevel { .. }));
        assert!(api.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_is_rejected_on_puppet_intents() {
        let (intent, _api, _bot_api) = puppet_with_bot();
        let err = intent.user("@tg_2:example.org").await.unwrap_err();
        assert!(matches!(err, Error::BotOnly("user")));
    }

    #[tokio::test]
    async fn test_set_display_name_registers_first() {
        let api = FakeApi::new(user_id!("@tg_1:example.org"));
        let intent = Intent::with_transport(api.clone(), None);

        intent.set_display_name("Alice (TG)").await.unwrap();
        assert_eq!(api.register_count(), 1);
        assert_eq!(
            api.display_names.lock().unwrap().clone(),
            vec!["Alice (TG)".to_owned()]
        );
    }
}
