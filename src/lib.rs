// =============================================================================
// Matrixon Matrix NextServer - Appservice SDK Library
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
//   Appservice SDK for bridges that puppet many virtual users over a single
//   application-service connection. This crate is part of the Matrixon Matrix
//   NextServer implementation, designed for enterprise-grade deployment with
//   20,000+ concurrent connections and <50ms response latency.
//
// Performance Targets:
//   • 20k+ concurrent connections
//   • <50ms response latency
//   • >99% success rate
//   • Memory-efficient operation
//   • Horizontal scalability
//
// Features:
//   • Per-user intents with lazy registration and membership guarantees
//   • Bot-invite rescue for rooms a virtual user cannot self-join
//   • Memoized derived connection contexts sharing one txn counter
//   • Registration file handling and namespace checks
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

//! Per-user intent layer for Matrix application services.
//!
//! A bridge authenticates once as an appservice and then acts as many virtual
//! users. [`AppserviceClient`] owns that single connection and memoizes one
//! derived context per virtual user; [`Intent`] wraps a context and makes sure
//! the user is registered and in the target room before every action. A
//! virtual user that cannot join a room on its own is invited by the
//! privileged bot intent and the join is retried once.
//!
//! ```no_run
//! use matrixon_appservice::{AppserviceClient, Registration};
//! use ruma::room_id;
//! use url::Url;
//!
//! # async fn run() -> matrixon_appservice::Result<()> {
//! let registration = Registration::from_file("telegram-registration.yaml")?;
//! let client = AppserviceClient::new(
//!     Url::parse("https://matrix.example.org").expect("valid URL"),
//!     "example.org",
//!     &registration,
//! )?;
//!
//! let alice = client.intent("@tg_alice:example.org").await?;
//! alice.set_display_name("Alice (Telegram)").await?;
//! alice.send_text(room_id!("!bridged:example.org"), "hi").await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod appservice;
pub mod config;
pub mod error;
pub mod http;
pub mod intent;
pub mod message;

pub use api::ClientApi;
pub use appservice::AppserviceClient;
pub use config::{Namespace, NamespaceRegex, Namespaces, Registration};
pub use error::{Error, Result, ERRCODE_FORBIDDEN, ERRCODE_USER_IN_USE};
pub use http::HttpClient;
pub use intent::{permit_all_policy, Intent, PowerLevelPolicy};
pub use message::{
    MessageContent, RoomCreateOptions, Visibility, EVENT_TYPE_MESSAGE, FORMAT_HTML,
    MSGTYPE_NOTICE, MSGTYPE_TEXT,
};
