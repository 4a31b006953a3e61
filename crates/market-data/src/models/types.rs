use std::borrow::Cow;

/// Provider identifier - mostly static constants ("YAHOO", "FINNHUB", ...)
pub type ProviderId = Cow<'static, str>;

/// Currency code (ISO 4217)
pub type Currency = String;
