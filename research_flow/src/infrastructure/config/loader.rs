// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Configuration Loader
//!
//! Layers runtime configuration on top of [`Configuration::default`]:
//!
//! 1. Defaults (the documented table)
//! 2. A caller-supplied override mapping (lowercase field names)
//! 3. Process environment variables (field names uppercased, e.g.
//!    `MAX_RETRIES`, `SEARCH_API`; `FALLBACK_APIS` is comma-separated)
//!
//! The environment wins over the mapping unless the caller opts out with
//! `env_wins = false`. `ENVIRONMENT=development|production` additionally
//! gates traceback inclusion in error envelopes and reports.

use std::collections::BTreeMap;

use config::{Config, Environment};
use serde_json::Value;

use research_flow_domain::{Configuration, FlowError};

/// Deployment environment, from the `ENVIRONMENT` variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEnv {
    Development,
    Production,
}

impl RuntimeEnv {
    /// Reads `ENVIRONMENT`, defaulting to production (the safe default for
    /// traceback exposure).
    pub fn detect() -> Self {
        match std::env::var("ENVIRONMENT") {
            Ok(v) if v.eq_ignore_ascii_case("development") => RuntimeEnv::Development,
            _ => RuntimeEnv::Production,
        }
    }

    /// Whether error payloads may carry tracebacks.
    pub fn include_traceback(&self) -> bool {
        matches!(self, RuntimeEnv::Development)
    }
}

/// Loads a [`Configuration`] from defaults, an override mapping and the
/// environment.
///
/// # Errors
///
/// Returns [`FlowError::Configuration`] for unparseable values or failed
/// cross-field validation.
pub fn load_configuration(
    overrides: &BTreeMap<String, Value>,
    env_wins: bool,
) -> Result<Configuration, FlowError> {
    let defaults = Config::try_from(&Configuration::default()).map_err(cfg_err)?;
    let override_source = Config::try_from(overrides).map_err(cfg_err)?;
    let env_source = Environment::default()
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("fallback_apis");

    let builder = Config::builder().add_source(defaults);
    let builder = if env_wins {
        builder.add_source(override_source).add_source(env_source)
    } else {
        builder.add_source(env_source).add_source(override_source)
    };

    let merged = builder.build().map_err(cfg_err)?;
    let configuration: Configuration = merged.try_deserialize().map_err(cfg_err)?;
    configuration.validate()?;
    Ok(configuration)
}

/// Loads a [`Configuration`] from defaults and the environment only.
pub fn load_from_env() -> Result<Configuration, FlowError> {
    load_configuration(&BTreeMap::new(), true)
}

fn cfg_err(e: config::ConfigError) -> FlowError {
    FlowError::configuration(e.to_string())
}
