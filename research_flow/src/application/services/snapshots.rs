// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Flow-State Snapshots
//!
//! Optional persistence of a [`ReportState`] as a JSON document at any
//! checkpoint. The document schema is the state's serde form exactly, so
//! snapshots round-trip across process restarts and can seed continuation
//! flows.

use std::path::Path;

use research_flow_domain::{FlowError, ReportState};

/// Writes `state` as pretty-printed JSON at `path`, creating parent
/// directories as needed.
pub fn save_snapshot(state: &ReportState, path: &Path) -> Result<(), FlowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, state.to_json()?)?;
    Ok(())
}

/// Restores a state from a snapshot written by [`save_snapshot`].
///
/// # Errors
///
/// Returns [`FlowError::Transformation`] for malformed documents and
/// [`FlowError::Validation`] when the snapshot violates state invariants.
pub fn load_snapshot(path: &Path) -> Result<ReportState, FlowError> {
    let body = std::fs::read_to_string(path)?;
    ReportState::from_json(&body)
}
