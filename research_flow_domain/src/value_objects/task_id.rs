// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Type-safe identifier for scheduler tasks. Same ULID-backed shape as
//! [`FlowId`](super::flow_id::FlowId); kept distinct so the two id spaces can
//! never be mixed in signatures.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::FlowError;

/// Task identifier value object (ULID-backed, time-ordered).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Ulid);

impl TaskId {
    /// Creates a new task id with the current timestamp.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parses a caller-supplied id string.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] when the string is not a valid ULID.
    pub fn parse(s: &str) -> Result<Self, FlowError> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| FlowError::validation(format!("Invalid task id '{}': {}", s, e)))
    }

    /// Returns the embedded creation timestamp in milliseconds.
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
