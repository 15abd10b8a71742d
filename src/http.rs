// =============================================================================
// Matrixon Matrix NextServer - Appservice HTTP Transport Module
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
//   HTTP transport for the appservice SDK. This module is part of the Matrixon
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
//   • Client-server API v3 request building
//   • Per-request acting-identity injection (user_id query parameter)
//   • Derived per-user contexts sharing one transport and txn counter
//   • Standard Matrix error decoding
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
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Method;
use ruma::{EventId, OwnedEventId, OwnedRoomId, OwnedUserId, RoomId, UserId};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};
use url::Url;

use crate::{
    api::ClientApi,
    error::{Error, Result},
    message::RoomCreateOptions,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One connection context over the shared appservice transport.
///
/// The root context acts as the appservice bot; [`HttpClient::for_user`]
/// derives child contexts that act as virtual users while sharing the parent's
/// connection pool, token and transaction counter. A derived context never
/// owns a counter of its own.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Arc<Transport>,
    user_id: OwnedUserId,
}

/// Transport state owned by the root context.
#[derive(Debug)]
struct Transport {
    homeserver: Url,
    as_token: String,
    http: reqwest::Client,
    txn_id: AtomicU64,
}

/// Standard Matrix error body, `{"errcode": ..., "error": ...}`.
#[derive(Debug, Deserialize)]
struct MatrixErrorBody {
    errcode: String,
    #[serde(default)]
    error: String,
}

impl HttpClient {
    /// Creates the root context for one appservice connection.
    pub fn new(homeserver: Url, as_token: impl Into<String>, user_id: OwnedUserId) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            inner: Arc::new(Transport {
                homeserver,
                as_token: as_token.into(),
                http,
                txn_id: AtomicU64::new(0),
            }),
            user_id,
        })
    }

    /// Derives a context acting as `user_id` over the same transport.
    pub fn for_user(&self, user_id: OwnedUserId) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            user_id,
        }
    }

    /// The identity this context attributes its requests to.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Whether two contexts share one transport (and thus one txn counter).
    pub fn shares_transport_with(&self, other: &HttpClient) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Draws the next transaction ID from the counter shared with the root.
    fn next_txn_id(&self) -> String {
        self.inner.txn_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Builds a client-server API v3 URL with the acting identity and the
    /// appservice token injected as query parameters.
    fn endpoint(&self, segments: &[&str], timestamp: Option<u64>) -> Result<Url> {
        let mut url = self.inner.homeserver.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| Error::Config("Homeserver URL cannot be a base".to_owned()))?;
            path.pop_if_empty();
            path.extend(["_matrix", "client", "v3"]);
            path.extend(segments);
        }
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("user_id", self.user_id.as_str());
            query.append_pair("access_token", &self.inner.as_token);
            if let Some(ts) = timestamp {
                query.append_pair("ts", &ts.to_string());
            }
        }
        Ok(url)
    }

    /// Sends one request and decodes the JSON response.
    ///
    /// Non-2xx responses become [`Error::Matrix`] when the body carries a
    /// standard errcode, [`Error::BadServerResponse`] otherwise.
    async fn request(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value> {
        // The token lives in the query string, so log the path only.
        debug!(%method, path = url.path(), user_id = %self.user_id, "Sending appservice request");

        let mut request = self.inner.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            if bytes.is_empty() {
                return Ok(Value::Object(Default::default()));
            }
            return serde_json::from_slice(&bytes).map_err(|e| {
                Error::BadServerResponse(format!("Invalid JSON in {} response: {}", status, e))
            });
        }

        match serde_json::from_slice::<MatrixErrorBody>(&bytes) {
            Ok(body) => Err(Error::Matrix {
                status: status.as_u16(),
                errcode: body.errcode,
                error: body.error,
            }),
            Err(_) => Err(Error::BadServerResponse(format!(
                "{} with undecodable error body",
                status
            ))),
        }
    }
}

fn room_id_from(response: &Value) -> Result<OwnedRoomId> {
    let raw = response
        .get("room_id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::BadServerResponse("Missing room_id in response".to_owned()))?;
    RoomId::parse(raw).map_err(|e| Error::BadServerResponse(format!("Invalid room_id: {}", e)))
}

fn event_id_from(response: &Value) -> Result<OwnedEventId> {
    let raw = response
        .get("event_id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::BadServerResponse("Missing event_id in response".to_owned()))?;
    EventId::parse(raw).map_err(|e| Error::BadServerResponse(format!("Invalid event_id: {}", e)))
}

#[async_trait]
impl ClientApi for HttpClient {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[instrument(skip(self), fields(user_id = %self.user_id))]
    async fn register(&self, username: &str) -> Result<()> {
        let url = self.endpoint(&["register"], None)?;
        let body = json!({
            "type": "m.login.application_service",
            "username": username,
        });
        self.request(Method::POST, url, Some(&body)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %self.user_id))]
    async fn join_room(&self, room_id: &RoomId) -> Result<OwnedRoomId> {
        let url = self.endpoint(&["join", room_id.as_str()], None)?;
        let response = self.request(Method::POST, url, Some(&json!({}))).await?;
        room_id_from(&response)
    }

    #[instrument(skip(self), fields(user_id = %self.user_id))]
    async fn invite_user(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        let url = self.endpoint(&["rooms", room_id.as_str(), "invite"], None)?;
        let body = json!({ "user_id": user_id });
        self.request(Method::POST, url, Some(&body)).await?;
        Ok(())
    }

    #[instrument(skip(self, content), fields(user_id = %self.user_id))]
    async fn send_message_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: Value,
        timestamp: Option<u64>,
    ) -> Result<OwnedEventId> {
        let txn_id = self.next_txn_id();
        let url = self.endpoint(
            &["rooms", room_id.as_str(), "send", event_type, &txn_id],
            timestamp,
        )?;
        let response = self.request(Method::PUT, url, Some(&content)).await?;
        event_id_from(&response)
    }

    #[instrument(skip(self, content), fields(user_id = %self.user_id))]
    async fn send_state_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
        timestamp: Option<u64>,
    ) -> Result<OwnedEventId> {
        let url = self.endpoint(
            &["rooms", room_id.as_str(), "state", event_type, state_key],
            timestamp,
        )?;
        let response = self.request(Method::PUT, url, Some(&content)).await?;
        event_id_from(&response)
    }

    #[instrument(skip(self), fields(user_id = %self.user_id))]
    async fn set_display_name(&self, name: &str) -> Result<()> {
        let url = self.endpoint(&["profile", self.user_id.as_str(), "displayname"], None)?;
        let body = json!({ "displayname": name });
        self.request(Method::PUT, url, Some(&body)).await?;
        Ok(())
    }

    #[instrument(skip(self, options), fields(user_id = %self.user_id))]
    async fn create_room(&self, options: &RoomCreateOptions) -> Result<OwnedRoomId> {
        let url = self.endpoint(&["createRoom"], None)?;
        let body = serde_json::to_value(options)?;
        let response = self.request(Method::POST, url, Some(&body)).await?;
        room_id_from(&response)
    }
}
