// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Flow Identifier Value Object
//!
//! Type-safe identifier for research flows.
//!
//! ## Overview
//!
//! Flow identifiers are ULID-backed so that:
//!
//! - **Type Safety**: a `FlowId` cannot be confused with a [`TaskId`] or any
//!   other entity id at compile time
//! - **Temporal Ordering**: ULIDs embed a millisecond timestamp, so flows sort
//!   naturally by creation time
//! - **Interoperability**: the canonical string form round-trips through JSON,
//!   logs and the control API unchanged
//!
//! Callers may also supply their own identifier string at flow creation; it is
//! validated as a ULID on the way in.
//!
//! [`TaskId`]: super::task_id::TaskId

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::FlowError;

/// Flow entity identifier for type-safe flow management.
///
/// Immutable value object wrapping a ULID. Ordering follows creation time
/// (ULID natural order).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(Ulid);

impl FlowId {
    /// Creates a new flow id with the current timestamp.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parses a caller-supplied id string.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] when the string is not a valid ULID
    /// or is the nil ULID.
    pub fn parse(s: &str) -> Result<Self, FlowError> {
        let ulid = Ulid::from_string(s)
            .map_err(|e| FlowError::validation(format!("Invalid flow id '{}': {}", s, e)))?;
        if ulid.0 == 0 {
            return Err(FlowError::validation("Flow id cannot be the nil ULID"));
        }
        Ok(Self(ulid))
    }

    /// Creates a flow id from a specific millisecond timestamp.
    ///
    /// Useful for range queries over flow registries.
    pub fn from_timestamp_ms(timestamp_ms: u64) -> Self {
        Self(Ulid::from_parts(timestamp_ms, rand_suffix()))
    }

    /// Returns the embedded creation timestamp in milliseconds.
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }

    /// Returns the underlying ULID.
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Ulid> for FlowId {
    fn from(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

// Random low bits for ids minted from a bare timestamp. Uniqueness within the
// same millisecond is what matters here, not cryptographic quality.
fn rand_suffix() -> u128 {
    use std::hash::{BuildHasher, Hasher};
    let seed = std::collections::hash_map::RandomState::new();
    let mut hasher = seed.build_hasher();
    hasher.write_u64(std::process::id() as u64);
    hasher.finish() as u128
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests flow id creation and uniqueness guarantees.
    ///
    /// # Test Scenario
    ///
    /// Creates two flow ids with a small time delay between them, then
    /// verifies they are unique and properly ordered by timestamp.
    #[test]
    fn test_flow_id_creation() {
        let id1 = FlowId::new();

        // Sleep for 1ms to ensure different timestamps
        std::thread::sleep(std::time::Duration::from_millis(1));

        let id2 = FlowId::new();

        assert_ne!(id1, id2);

        // ULIDs have millisecond resolution, so id2 sorts after id1
        assert!(id2 > id1);
    }

    /// Tests round-tripping a flow id through its canonical string form.
    #[test]
    fn test_flow_id_parse_roundtrip() {
        let id = FlowId::new();
        let parsed = FlowId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    /// Tests that malformed and nil ids are rejected at the boundary.
    #[test]
    fn test_flow_id_parse_rejects_invalid() {
        assert!(FlowId::parse("not-a-ulid").is_err());
        assert!(FlowId::parse("").is_err());
        assert!(FlowId::parse("00000000000000000000000000").is_err());
    }

    /// Tests time-based ordering with specific timestamps.
    #[test]
    fn test_flow_id_time_ordering() {
        let timestamp1 = 1_640_995_200_000; // 2022-01-01
        let timestamp2 = 1_640_995_260_000; // 2022-01-01 + 1 minute

        let id1 = FlowId::from_timestamp_ms(timestamp1);
        let id2 = FlowId::from_timestamp_ms(timestamp2);

        assert!(id2 > id1);
        assert_eq!(id1.timestamp_ms(), timestamp1);
        assert_eq!(id2.timestamp_ms(), timestamp2);
    }

    /// Tests JSON serialization preserves the canonical string form.
    #[test]
    fn test_flow_id_serialization() {
        let id = FlowId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));

        let back: FlowId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
