// =============================================================================
// Matrixon Matrix NextServer - Appservice Transport Contract Module
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
//   Transport contract the intent layer delegates to. This module is part of the
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
//   • Registration, join and invite operations
//   • Message and state event sending
//   • Profile and room creation operations
//   • Trait seam for alternate transports and test fakes
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

use async_trait::async_trait;
use ruma::{OwnedEventId, OwnedRoomId, RoomId, UserId};
use serde_json::Value;

use crate::{error::Result, message::RoomCreateOptions};

/// Client-server operations the intent layer needs from its transport.
///
/// Implemented by [`HttpClient`](crate::http::HttpClient) for real homeservers.
/// Every operation acts as the identity returned by [`ClientApi::user_id`];
/// failures surface as [`Error`](crate::error::Error) values whose Matrix
/// errcode distinguishes "already exists" and "forbidden" conditions.
#[async_trait]
pub trait ClientApi: Send + Sync {
    /// The identity all operations are attributed to.
    fn user_id(&self) -> &UserId;

    /// Registers the given localpart as an appservice user.
    ///
    /// Fails with `M_USER_IN_USE` when the localpart is already taken.
    async fn register(&self, username: &str) -> Result<()>;

    /// Joins the room as the acting identity.
    ///
    /// Fails with `M_FORBIDDEN` when the identity is not allowed in.
    async fn join_room(&self, room_id: &RoomId) -> Result<OwnedRoomId>;

    /// Invites another user to a room the acting identity is in.
    async fn invite_user(&self, room_id: &RoomId, user_id: &UserId) -> Result<()>;

    /// Sends a message-like event, optionally with a massaged origin timestamp
    /// (milliseconds since the epoch).
    async fn send_message_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: Value,
        timestamp: Option<u64>,
    ) -> Result<OwnedEventId>;

    /// Sends a state event under the given state key.
    async fn send_state_event(
        &self,
        room_id: &RoomId,
        event_type: &str,
        state_key: &str,
        content: Value,
        timestamp: Option<u64>,
    ) -> Result<OwnedEventId>;

    /// Sets the display name of the acting identity.
    async fn set_display_name(&self, name: &str) -> Result<()>;

    /// Creates a room with the given options and returns its ID.
    async fn create_room(&self, options: &RoomCreateOptions) -> Result<OwnedRoomId>;
}
