//! Symbol normalization and allow-list validation.

use std::collections::HashSet;
use std::fmt;

use crate::errors::MarketDataError;

/// Default maximum symbol length.
pub const DEFAULT_MAX_SYMBOL_LENGTH: usize = 15;

/// Rules a raw symbol must satisfy before any provider is contacted.
#[derive(Clone, Debug)]
pub struct SymbolPolicy {
    /// Upper-cased symbols that may be quoted. Empty means any well-formed symbol.
    allowed: HashSet<String>,
    max_length: usize,
}

impl SymbolPolicy {
    pub fn new<I, S>(allowed: I, max_length: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|s| s.as_ref().trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            max_length,
        }
    }

    /// Accept any well-formed symbol.
    pub fn permissive() -> Self {
        Self::new(Vec::<String>::new(), DEFAULT_MAX_SYMBOL_LENGTH)
    }

    pub fn is_restricted(&self) -> bool {
        !self.allowed.is_empty()
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for SymbolPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

/// A validated, upper-cased ticker or pair (`AAPL`, `BRK.B`, `EUR/USD`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize and validate a raw symbol.
    pub fn parse(raw: &str, policy: &SymbolPolicy) -> Result<Self, MarketDataError> {
        let normalized = raw.trim().to_uppercase();

        if normalized.is_empty() {
            return Err(MarketDataError::InvalidSymbol("empty symbol".to_string()));
        }

        if normalized.chars().count() > policy.max_length {
            return Err(MarketDataError::InvalidSymbol(format!(
                "{} exceeds {} characters",
                normalized, policy.max_length
            )));
        }

        if let Some(bad) = normalized.chars().find(|c| !is_symbol_char(*c)) {
            return Err(MarketDataError::InvalidSymbol(format!(
                "{} contains '{}'",
                normalized, bad
            )));
        }

        if policy.is_restricted() && !policy.allowed.contains(&normalized) {
            return Err(MarketDataError::InvalidSymbol(format!(
                "{} is not in the allow-list",
                normalized
            )));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a currency pair written `BASE/QUOTE` (`EUR/USD`) into its legs.
    pub fn as_pair(&self) -> Option<(&str, &str)> {
        let (base, quote) = self.0.split_once('/')?;
        let is_code = |s: &str| s.len() == 3 && s.chars().all(|c| c.is_ascii_uppercase());
        (is_code(base) && is_code(quote)).then_some((base, quote))
    }
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '=' | '^' | '/' | ':')
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
