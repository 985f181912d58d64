// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Guarded Language Model
//!
//! Every model call a stage makes goes through this wrapper, which applies
//! retry-with-backoff and a process-wide circuit breaker keyed by the model
//! identifier (`model:<provider:model>`). Two guards built for the same id
//! share breaker state, so a degraded provider trips once for all stages.

use std::sync::Arc;

use tracing::debug;

use research_flow_domain::{Configuration, FlowError, LanguageModel};

use crate::infrastructure::resilience::{BreakerConfig, CircuitBreaker, RetryPolicy};

/// Language model handle wrapped in retry and circuit breaking.
#[derive(Clone)]
pub struct GuardedModel {
    model: Arc<dyn LanguageModel>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
}

impl GuardedModel {
    /// Wraps `model` with the retry posture from `config` and the shared
    /// breaker for its id.
    pub fn new(model: Arc<dyn LanguageModel>, config: &Configuration) -> Self {
        let breaker = CircuitBreaker::instance_with(
            &format!("model:{}", model.id()),
            BreakerConfig::default(),
        );
        Self {
            model,
            breaker,
            policy: RetryPolicy::from_config(config),
        }
    }

    /// Model identifier (`provider:model`).
    pub fn id(&self) -> &str {
        self.model.id()
    }

    /// Completes `prompt` through the protection stack.
    ///
    /// # Errors
    ///
    /// Propagates the final typed error after retries are exhausted, or
    /// [`FlowError::CircuitOpen`] when the breaker is shedding load.
    pub async fn complete(&self, prompt: &str) -> Result<String, FlowError> {
        debug!(model = self.model.id(), prompt_len = prompt.len(), "model call");
        self.policy
            .execute(|| self.breaker.call(|| self.model.complete(prompt)))
            .await
    }
}
