// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Bootstrap Module
//!
//! The bootstrap module sits **outside** the enterprise application layers
//! (domain, application, infrastructure) and provides host-process wiring:
//!
//! - **Logging setup** - one-shot tracing subscriber initialization
//! - **Shutdown coordination** - signal handling, grace periods, and the
//!   cooperative cancellation token used by flows and the scheduler
//! - **Exit codes** - Unix exit code mapping for process entry points
//!
//! The engine library (`research-flow`) consumes the cancellation token;
//! everything else here is for hosts embedding the engine.

pub mod exit_code;
pub mod logger;
pub mod shutdown;

pub use exit_code::ExitCode;
pub use logger::init_tracing;
pub use shutdown::{CancellationToken, ShutdownCoordinator};
