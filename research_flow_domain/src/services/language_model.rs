// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Infrastructure port for remote language models.
//!
//! Pipeline stages never talk to a model client directly; they go through the
//! guarded wrapper in the application crate, which applies retry and a circuit
//! breaker keyed by the model identifier (`provider:model`).

use async_trait::async_trait;

use crate::error::FlowError;

/// Port for a remote completion model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Stable identifier in `provider:model` form.
    ///
    /// Used as the circuit-breaker key, so two handles with the same id share
    /// breaker state.
    fn id(&self) -> &str;

    /// Produces a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Implementations map provider failures onto the domain taxonomy; the
    /// retry layer keys on [`FlowError::is_transient`].
    async fn complete(&self, prompt: &str) -> Result<String, FlowError>;
}
