// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Progress Value Object
//!
//! Fractional completion of a flow, validated on construction and monotonic
//! under [`Progress::advance_to`].
//!
//! ## Invariants
//!
//! - The inner value always lies in `[0.0, 1.0]`
//! - `advance_to` ignores regressions: observers may report progress out of
//!   order and the recorded value never moves backwards
//! - `Progress::COMPLETE` (1.0) is reached exactly when a flow completes

use serde::{Deserialize, Serialize};

use crate::error::FlowError;

/// Fractional completion in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Progress(f64);

impl Progress {
    /// No work performed yet.
    pub const NONE: Progress = Progress(0.0);

    /// All work performed.
    pub const COMPLETE: Progress = Progress(1.0);

    /// Creates a progress value, validating the range.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Validation`] for values outside `[0.0, 1.0]` or
    /// non-finite values.
    pub fn new(value: f64) -> Result<Self, FlowError> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(FlowError::validation(format!(
                "Progress must be within [0.0, 1.0], got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Creates a progress value, clamping into `[0.0, 1.0]`.
    ///
    /// Non-finite input clamps to 0.0.
    pub fn saturating(value: f64) -> Self {
        if !value.is_finite() {
            return Self::NONE;
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Advances to `value` if it is ahead of the current position.
    ///
    /// Regressions are ignored so that out-of-order observer callbacks never
    /// move recorded progress backwards.
    pub fn advance_to(&mut self, value: Progress) {
        if value.0 > self.0 {
            self.0 = value.0;
        }
    }

    /// Returns the inner fraction.
    pub fn value(&self) -> f64 {
        self.0
    }

    /// True when the value is exactly 1.0.
    pub fn is_complete(&self) -> bool {
        self.0 >= 1.0
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::NONE
    }
}

impl std::fmt::Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.0}%", self.0 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_range_validation() {
        assert!(Progress::new(0.0).is_ok());
        assert!(Progress::new(1.0).is_ok());
        assert!(Progress::new(0.5).is_ok());
        assert!(Progress::new(-0.01).is_err());
        assert!(Progress::new(1.01).is_err());
        assert!(Progress::new(f64::NAN).is_err());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut p = Progress::NONE;
        p.advance_to(Progress::saturating(0.4));
        assert_eq!(p.value(), 0.4);

        // Regressions are ignored
        p.advance_to(Progress::saturating(0.2));
        assert_eq!(p.value(), 0.4);

        p.advance_to(Progress::COMPLETE);
        assert!(p.is_complete());
    }

    #[test]
    fn test_progress_saturating_clamps() {
        assert_eq!(Progress::saturating(7.0).value(), 1.0);
        assert_eq!(Progress::saturating(-3.0).value(), 0.0);
        assert_eq!(Progress::saturating(f64::INFINITY).value(), 0.0);
    }

    proptest::proptest! {
        /// Saturation always lands in range, and advancing over any sequence
        /// of observations never moves the recorded value backwards.
        #[test]
        fn prop_progress_stays_in_range_and_monotonic(values in proptest::collection::vec(-10.0f64..10.0, 0..32)) {
            let mut progress = Progress::NONE;
            let mut high_water = 0.0f64;

            for value in values {
                let next = Progress::saturating(value);
                proptest::prop_assert!((0.0..=1.0).contains(&next.value()));

                progress.advance_to(next);
                proptest::prop_assert!(progress.value() >= high_water);
                high_water = progress.value();
            }
        }
    }
}
