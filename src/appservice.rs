// =============================================================================
// Matrixon Matrix NextServer - Appservice Identity Router Module
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
//   Identity router for the appservice SDK. This module is part of the Matrixon
//   Matrix NextServer implementation, designed for enterprise-grade deployment
//   with 20,000+ concurrent connections and <50ms response latency.
//
// Performance Targets:
//   • 20k+ concurrent connections
//   • <50ms response latency
//   • >99% success rate
//   • Memory-efficient operation
//   • Horizontal scalability
//
// Features:
//   • Memoized per-user connection contexts over one transport
//   • Bot and puppet intent construction
//   • Registration namespace ownership warnings
//   • Injectable power-level policy for all minted intents
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
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use ruma::{OwnedUserId, UserId};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::{
    api::ClientApi,
    config::{NamespaceRegex, Registration},
    error::Result,
    http::HttpClient,
    intent::{permit_all_policy, Intent, PowerLevelPolicy},
};

/// Routes actions onto one application-service connection, attributing each
/// to a virtual user.
///
/// Holds the bot's own connection context and mints derived contexts for
/// virtual users on demand. Contexts are memoized for the process lifetime;
/// the population is expected to be bounded by the bridged user base, and
/// growth is logged at debug level.
#[derive(Clone)]
pub struct AppserviceClient {
    inner: Arc<Inner>,
}

struct Inner {
    root: Arc<HttpClient>,
    bot_user_id: OwnedUserId,
    user_namespaces: NamespaceRegex,
    contexts: RwLock<HashMap<OwnedUserId, Arc<HttpClient>>>,
    policy: PowerLevelPolicy,
}

impl AppserviceClient {
    /// Creates a client from a homeserver URL, the server's name and an
    /// appservice registration. The bot acts as
    /// `@{sender_localpart}:{server_name}`.
    pub fn new(homeserver: Url, server_name: &str, registration: &Registration) -> Result<Self> {
        Self::with_policy(homeserver, server_name, registration, permit_all_policy())
    }

    /// Like [`AppserviceClient::new`], with a power-level policy every minted
    /// intent consults before sending events.
    pub fn with_policy(
        homeserver: Url,
        server_name: &str,
        registration: &Registration,
        policy: PowerLevelPolicy,
    ) -> Result<Self> {
        let bot_user_id = UserId::parse(format!(
            "@{}:{}",
            registration.sender_localpart, server_name
        ))?;
        let root = Arc::new(HttpClient::new(
            homeserver,
            registration.as_token.clone(),
            bot_user_id.clone(),
        )?);
        let user_namespaces = NamespaceRegex::try_from(registration.namespaces.users.as_slice())?;

        Ok(Self {
            inner: Arc::new(Inner {
                root,
                bot_user_id,
                user_namespaces,
                contexts: RwLock::new(HashMap::new()),
                policy,
            }),
        })
    }

    /// The appservice's own privileged identity.
    pub fn bot_user_id(&self) -> &UserId {
        &self.inner.bot_user_id
    }

    /// Returns the memoized connection context for a virtual user, deriving
    /// it from the bot's context on first access.
    pub async fn context(&self, user_id: &UserId) -> Arc<HttpClient> {
        if let Some(context) = self.inner.contexts.read().await.get(user_id) {
            return Arc::clone(context);
        }

        let mut contexts = self.inner.contexts.write().await;
        let cached = contexts.len() + 1;
        match contexts.entry(user_id.to_owned()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let context = Arc::new(self.inner.root.for_user(user_id.to_owned()));
                debug!(%user_id, cached, "Derived appservice context");
                Arc::clone(entry.insert(context))
            }
        }
    }

    /// An intent acting as the appservice bot itself. The bot intent is the
    /// root of the delegation chain and carries no bot delegate.
    pub fn bot_intent(&self) -> Intent {
        Intent::new(
            Some(self.clone()),
            Arc::clone(&self.inner.root) as Arc<dyn ClientApi>,
            None,
            Arc::clone(&self.inner.policy),
        )
    }

    /// An intent acting as the given virtual user, with the bot intent as
    /// its delegate for invite rescues.
    ///
    /// Fails fatally when the identifier is not a well-formed
    /// `@localpart:domain` user ID.
    pub async fn intent(&self, user_id: &str) -> Result<Intent> {
        let user_id = UserId::parse(user_id)?;
        if !self.inner.user_namespaces.is_empty() && !self.inner.user_namespaces.is_match(user_id.as_str()) {
            warn!(%user_id, "Puppeting a user outside the registration's user namespaces");
        }

        let context = self.context(&user_id).await;
        let bot = Arc::new(self.bot_intent());
        Ok(Intent::new(
            Some(self.clone()),
            context as Arc<dyn ClientApi>,
            Some(bot),
            Arc::clone(&self.inner.policy),
        ))
    }
}

impl std::fmt::Debug for AppserviceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppserviceClient")
            .field("bot_user_id", &self.inner.bot_user_id)
            .finish_non_exhaustive()
    }
}
