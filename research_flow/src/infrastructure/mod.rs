// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Infrastructure layer: resilience primitives, runtime (scheduler, events),
//! search registry, guarded models, error reporting, metrics, configuration
//! loading and logging context.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod reporting;
pub mod resilience;
pub mod runtime;
pub mod search;
