// src/logging.rs
// tracing setup plus wrappers that keep identifying data out of log lines.

use std::fmt;

use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber. `RUST_LOG` wins over `default_filter`.
/// Safe to call more than once; later calls are ignored.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Shows only the first 4 characters of an onion host.
pub struct RedactedOnion<'a>(pub &'a str);

impl fmt::Display for RedactedOnion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get(..4) {
            Some(head) if self.0.len() > 12 => write!(f, "{}...onion", head),
            _ => write!(f, "[REDACTED ONION]"),
        }
    }
}

impl fmt::Debug for RedactedOnion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Shows only the first 8 characters of a row id.
pub struct ShortId<'a>(pub &'a str);

impl fmt::Display for ShortId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get(..8) {
            Some(head) => write!(f, "{}", head),
            None => write!(f, "{}", self.0),
        }
    }
}
