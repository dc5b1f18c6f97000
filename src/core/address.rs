//! Target address validation.
//!
//! A [`TargetAddress`] is a syntactically plausible email address. No case
//! folding happens anywhere: the backend's `emailAddress` must match the
//! configured string byte for byte.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ShrError};

const ADDRESS_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

fn address_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ADDRESS_PATTERN).expect("ADDRESS_PATTERN compiles"))
}

/// A validated, immutable principal address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetAddress(String);

impl TargetAddress {
    /// Validate the format of a single address.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(ShrError::InvalidAddress {
                address: raw.to_string(),
                reason: "address is empty".to_string(),
            });
        }
        if raw.trim() != raw {
            return Err(ShrError::InvalidAddress {
                address: raw.to_string(),
                reason: "address has surrounding whitespace".to_string(),
            });
        }
        if !address_regex().is_match(raw) {
            return Err(ShrError::InvalidAddress {
                address: raw.to_string(),
                reason: "expected local@domain.tld".to_string(),
            });
        }
        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TargetAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TargetAddress {
    type Error = ShrError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TargetAddress> for String {
    fn from(value: TargetAddress) -> Self {
        value.0
    }
}

/// Validate the configured target list before a run starts.
///
/// The list must be non-empty, every entry well-formed, no entry repeated, and
/// the acting account (when known) must not be a target.
pub fn validate_targets(raw: &[String], acting: Option<&str>) -> Result<Vec<TargetAddress>> {
    if raw.is_empty() {
        return Err(ShrError::NoTargets);
    }

    let mut seen = HashSet::with_capacity(raw.len());
    let mut targets = Vec::with_capacity(raw.len());
    for entry in raw {
        let address = TargetAddress::parse(entry)?;
        if !seen.insert(address.clone()) {
            return Err(ShrError::DuplicateTarget {
                address: address.0,
            });
        }
        if acting.is_some_and(|me| me == address.as_str()) {
            return Err(ShrError::SelfTarget {
                address: address.0,
            });
        }
        targets.push(address);
    }
    Ok(targets)
}
