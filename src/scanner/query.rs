//! Search query builder for "files shared with an address".

#![allow(missing_docs)]

use crate::core::address::TargetAddress;

/// A search for files on which an address holds any role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    address: String,
}

impl SearchQuery {
    #[must_use]
    pub fn shared_with(address: &TargetAddress) -> Self {
        Self {
            address: address.as_str().to_string(),
        }
    }

    /// The address the query selects on.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Drive query-language form of the predicate.
    #[must_use]
    pub fn render(&self) -> String {
        let quoted = escape_literal(&self.address);
        format!("'{quoted}' in readers or '{quoted}' in writers or '{quoted}' in owners")
    }
}

/// Escape a value for use inside a single-quoted query literal.
fn escape_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
