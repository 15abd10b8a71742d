// =============================================================================
// Matrixon Matrix NextServer - Appservice Message Builders Module
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
//   Message and room-creation body builders for the appservice SDK. This module is
//   part of the Matrixon Matrix NextServer implementation, designed for
//   enterprise-grade deployment with 20,000+ concurrent connections and <50ms
//   response latency.
//
// Performance Targets:
//   • 20k+ concurrent connections
//   • <50ms response latency
//   • >99% success rate
//   • Memory-efficient operation
//   • Horizontal scalability
//
// Features:
//   • Plain-text and HTML-formatted m.room.message bodies
//   • Notice vs. normal message type selection
//   • Room creation options with omitted-when-absent fields
//   • Serde-backed wire shapes
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

use ruma::OwnedUserId;
use serde::{Deserialize, Serialize};

/// Event type of ordinary room messages.
pub const EVENT_TYPE_MESSAGE: &str = "m.room.message";

/// `msgtype` of a normal text message.
pub const MSGTYPE_TEXT: &str = "m.text";

/// `msgtype` of a notice (bot output that clients render de-emphasized).
pub const MSGTYPE_NOTICE: &str = "m.notice";

/// `format` marker for HTML-formatted message bodies.
pub const FORMAT_HTML: &str = "org.matrix.custom.html";

/// Content of an `m.room.message` event.
///
/// Optional fields are omitted from the serialized body entirely rather than
/// sent as null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    /// Plain-text body, or the fallback text of a formatted message
    pub body: String,
    /// `m.text` or `m.notice`
    pub msgtype: String,
    /// Format marker, only present for formatted messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// HTML body, only present for formatted messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
}

impl MessageContent {
    /// A plain `m.text` message.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            msgtype: MSGTYPE_TEXT.to_owned(),
            format: None,
            formatted_body: None,
        }
    }

    /// A plain `m.notice` message.
    pub fn notice(body: impl Into<String>) -> Self {
        Self {
            msgtype: MSGTYPE_NOTICE.to_owned(),
            ..Self::text(body)
        }
    }

    /// An HTML-formatted `m.text` message with a plain-text fallback body.
    pub fn html(formatted: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self {
            body: fallback.into(),
            msgtype: MSGTYPE_TEXT.to_owned(),
            format: Some(FORMAT_HTML.to_owned()),
            formatted_body: Some(formatted.into()),
        }
    }

    /// An HTML-formatted `m.notice` message with a plain-text fallback body.
    pub fn html_notice(formatted: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self {
            msgtype: MSGTYPE_NOTICE.to_owned(),
            ..Self::html(formatted, fallback)
        }
    }

    /// Converts the message into the notice variant, keeping the body as-is.
    pub fn into_notice(mut self) -> Self {
        self.msgtype = MSGTYPE_NOTICE.to_owned();
        self
    }
}

/// Room directory visibility for `/createRoom`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Published to the public room directory
    Public,
    /// Not published (the default)
    #[default]
    Private,
}

/// Parameters for `/createRoom`.
///
/// All optional fields are omitted from the request body when unset.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoomCreateOptions {
    /// Local alias to bind to the new room
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_alias_name: Option<String>,
    /// Public or private directory visibility
    pub visibility: Visibility,
    /// Display name for the room
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Topic for the room
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Whether the room is a direct chat
    pub is_direct: bool,
    /// Users to invite on creation
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invite: Vec<OwnedUserId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ruma::user_id;
    use serde_json::json;

    #[test]
    fn test_text_message_shape() {
        let content = serde_json::to_value(MessageContent::text("hi")).unwrap();
        assert_eq!(content, json!({"body": "hi", "msgtype": "m.text"}));
    }

    #[test]
    fn test_notice_message_shape() {
        let content = serde_json::to_value(MessageContent::notice("hi")).unwrap();
        assert_eq!(content, json!({"body": "hi", "msgtype": "m.notice"}));
    }

    #[test]
    fn test_html_message_carries_fallback_body() {
        let content = serde_json::to_value(MessageContent::html("<b>hi</b>", "hi")).unwrap();
        assert_eq!(
            content,
            json!({
                "body": "hi",
                "msgtype": "m.text",
                "format": "org.matrix.custom.html",
                "formatted_body": "<b>hi</b>",
            })
        );
    }

    #[test]
    fn test_into_notice_preserves_formatting() {
        let content = MessageContent::html("<i>x</i>", "x").into_notice();
        assert_eq!(content.msgtype, MSGTYPE_NOTICE);
        assert_eq!(content.formatted_body.as_deref(), Some("<i>x</i>"));
    }

    #[test]
    fn test_default_room_options_omit_unset_fields() {
        let body = serde_json::to_value(RoomCreateOptions::default()).unwrap();
        assert_eq!(body, json!({"visibility": "private", "is_direct": false}));
    }

    #[test]
    fn test_full_room_options() {
        let options = RoomCreateOptions {
            room_alias_name: Some("bridge".to_owned()),
            visibility: Visibility::Public,
            name: Some("Bridge".to_owned()),
            topic: Some("Puppets".to_owned()),
            is_direct: true,
            invite: vec![user_id!("@alice:example.org").to_owned()],
        };
        let body = serde_json::to_value(options).unwrap();
        assert_eq!(
            body,
            json!({
                "room_alias_name": "bridge",
                "visibility": "public",
                "name": "Bridge",
                "topic": "Puppets",
                "is_direct": true,
                "invite": ["@alice:example.org"],
            })
        );
    }
}
