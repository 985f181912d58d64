// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Configuration infrastructure: environment/override layering over the
//! typed domain record.

pub mod loader;

pub use loader::{load_configuration, load_from_env, RuntimeEnv};
