// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Authentication and Authorization Ports
//!
//! The control API authenticates every operation through a pluggable
//! [`AuthGate`] and authorizes it against a permission string (for example
//! `research:write`). OAuth flows, password hashing and token persistence are
//! deliberately outside this workspace; hosts bring their own gate and
//! [`IdentityStore`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Caller-supplied credential accepted by the control API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// OAuth bearer access token.
    Bearer(String),
    /// Static API key.
    ApiKey(String),
}

/// Authenticated caller identity with resolved permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable subject identifier (user id, client id).
    pub subject: String,

    /// Granted permission strings, e.g. `research:read`.
    pub permissions: BTreeSet<String>,
}

impl Principal {
    /// Creates a principal with the given subject and permissions.
    pub fn new<I, S>(subject: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject: subject.into(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    /// True when the principal carries `permission`.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Port for authenticating credentials and authorizing operations.
#[async_trait]
pub trait AuthGate: Send + Sync {
    /// Resolves a credential to a principal.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Authentication`] for unknown or expired
    /// credentials.
    async fn authenticate(&self, credential: &Credential) -> Result<Principal, FlowError>;

    /// True when `principal` may perform the operation guarded by
    /// `permission`.
    fn authorize(&self, principal: &Principal, permission: &str) -> bool {
        principal.has_permission(permission)
    }
}

/// Port for looking up stored identities.
///
/// Account, client and token persistence live behind this trait; the engine
/// never touches identity storage directly.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Finds a principal by subject identifier.
    async fn find_principal(&self, subject: &str) -> Result<Option<Principal>, FlowError>;
}
