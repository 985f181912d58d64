// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Language model infrastructure: the guarded wrapper applying retry and
//! circuit breaking to every model call.

pub mod guarded;

pub use guarded::GuardedModel;
