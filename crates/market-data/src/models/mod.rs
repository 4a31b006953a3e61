//! Market data models
//!
//! This module contains the core data types for quote routing:
//! - `types` - Type aliases for common identifiers (ProviderId, Currency)
//! - `symbol` - Validated symbols and the allow-list policy (Symbol, SymbolPolicy)
//! - `quote` - Quote data structures (Quote, QuoteOutcome, QuoteSource)
//! - `status` - Diagnostic snapshots (QuoteStatus, ProviderStatus, CircuitTestReport)

mod quote;
mod status;
mod symbol;
mod types;

pub use quote::{Quote, QuoteOutcome, QuoteSource};
pub use status::{CircuitTestReport, ProbeOutcome, ProviderStatus, QuoteStatus};
pub use symbol::{Symbol, SymbolPolicy, DEFAULT_MAX_SYMBOL_LENGTH};
pub use types::{Currency, ProviderId};
