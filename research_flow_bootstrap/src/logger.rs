// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bootstrap Logger
//!
//! One-shot tracing initialization for hosts and tests.
//!
//! The engine itself only emits `tracing` events; wiring a subscriber is a
//! host concern and happens here, exactly once per process. The filter
//! defaults to the `RUST_LOG` environment variable, falling back to `info`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initializes the global tracing subscriber.
///
/// Idempotent: later calls are no-ops, so tests may call it freely. When
/// `filter` is `None` the `RUST_LOG` variable is consulted, defaulting to
/// `info`.
pub fn init_tracing(filter: Option<&str>) {
    INIT.call_once(|| {
        let env_filter = match filter {
            Some(directives) => EnvFilter::new(directives),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    });
}
