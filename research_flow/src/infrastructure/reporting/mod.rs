// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Error reporting infrastructure: ring buffer, counters, alert rules and
//! the operator query surface.

pub mod reporter;

pub use reporter::{
    Alert, AlertRule, AlertSink, ErrorGroup, ErrorReport, ErrorReporter, ErrorStats, GroupBy,
    LogAlertSink, TrendInterval, RING_CAPACITY,
};
