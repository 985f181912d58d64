// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Runtime infrastructure: the event bus, the bounded-concurrency task
//! scheduler, and supervised spawning helpers.

pub mod event_bus;
pub mod scheduler;
pub mod supervisor;

pub use event_bus::{EventBus, Subscriber};
pub use scheduler::{SchedulerMetrics, TaskOptions, TaskScheduler};
pub use supervisor::{join_supervised, spawn_supervised, AppResult};
