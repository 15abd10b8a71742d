// =============================================================================
// Matrixon Matrix NextServer - Appservice Registration Module
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
//   Appservice registration file handling. This module is part of the Matrixon
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
//   • YAML registration file loading
//   • Appservice and homeserver token handling
//   • User/alias/room namespace declarations
//   • Compiled namespace regular expressions
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

use std::path::Path;

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Appservice registration, as handed to the homeserver in a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    /// Unique identifier of this appservice
    pub id: String,
    /// URL the homeserver pushes transactions to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Token the appservice authenticates to the homeserver with
    pub as_token: String,
    /// Token the homeserver authenticates to the appservice with
    pub hs_token: String,
    /// Localpart of the appservice's own privileged (bot) user
    pub sender_localpart: String,
    /// Namespaces the appservice claims
    #[serde(default)]
    pub namespaces: Namespaces,
    /// Whether the homeserver should rate-limit the appservice
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited: Option<bool>,
}

impl Registration {
    /// Loads a registration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let registration = Self::from_yaml(&raw)?;
        debug!(id = %registration.id, path = %path.display(), "Loaded appservice registration");
        Ok(registration)
    }

    /// Parses a registration from a YAML string.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| Error::Config(format!("Invalid appservice registration: {}", e)))
    }
}

/// User, alias and room namespaces claimed by an appservice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Namespaces {
    #[serde(default)]
    pub users: Vec<Namespace>,
    #[serde(default)]
    pub aliases: Vec<Namespace>,
    #[serde(default)]
    pub rooms: Vec<Namespace>,
}

/// One namespace declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    /// Whether the appservice is the only one allowed to act in this namespace
    #[serde(default)]
    pub exclusive: bool,
    /// Regular expression the namespaced identifiers match
    pub regex: String,
}

/// Compiled regular expressions for one namespace kind.
#[derive(Debug, Clone)]
pub struct NamespaceRegex {
    exclusive: Option<RegexSet>,
    non_exclusive: Option<RegexSet>,
}

impl NamespaceRegex {
    /// Whether the namespace claims this identifier at all.
    pub fn is_match(&self, haystack: &str) -> bool {
        if self.is_exclusive_match(haystack) {
            return true;
        }
        match &self.non_exclusive {
            Some(non_exclusive) => non_exclusive.is_match(haystack),
            None => false,
        }
    }

    /// Whether the namespace claims this identifier exclusively.
    pub fn is_exclusive_match(&self, haystack: &str) -> bool {
        match &self.exclusive {
            Some(exclusive) => exclusive.is_match(haystack),
            None => false,
        }
    }

    /// Whether the namespace has no patterns at all.
    pub fn is_empty(&self) -> bool {
        self.exclusive.is_none() && self.non_exclusive.is_none()
    }
}

impl TryFrom<&[Namespace]> for NamespaceRegex {
    type Error = Error;

    fn try_from(value: &[Namespace]) -> Result<Self> {
        let mut exclusive = vec![];
        let mut non_exclusive = vec![];

        for namespace in value {
            if namespace.exclusive {
                exclusive.push(namespace.regex.clone());
            } else {
                non_exclusive.push(namespace.regex.clone());
            }
        }

        let compile = |patterns: Vec<String>| -> Result<Option<RegexSet>> {
            if patterns.is_empty() {
                return Ok(None);
            }
            RegexSet::new(patterns)
                .map(Some)
                .map_err(|e| Error::Config(format!("Invalid namespace regex: {}", e)))
        };

        Ok(NamespaceRegex {
            exclusive: compile(exclusive)?,
            non_exclusive: compile(non_exclusive)?,
        })
    }
}
