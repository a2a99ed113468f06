//! Uploads are gated by a shared secret. The client sends it in the `apikey` form field, and it
//! must exactly match one entry of a `;`-delimited allow-list.
//!
//! The allow-list is not held by the server. It is asked for on every check from a
//! [KeySource](crate::auth::KeySource), so a source that reads live configuration lets the list
//! change without a restart.

/// Allow-list read from the process environment.
pub mod env;

/// Allow-list fixed at construction.
pub mod fixed;

pub use env::EnvKeys;
pub use fixed::FixedKeys;

/// Separator between entries of an allow-list.
pub const KEY_SEPARATOR: char = ';';

/// Provides the current allow-list.
pub trait KeySource {
    /// The raw, `;`-delimited allow-list as it stands right now.
    fn allow_list(&self) -> String;
}

/// Split a raw allow-list into its entries. Empty entries are dropped.
pub fn split_keys(raw: &str) -> Vec<&str> {
    raw.split(KEY_SEPARATOR).filter(|k| !k.is_empty()).collect()
}

/// Decides whether an upload key is allowed.
pub struct Authorizer {
    source: Box<dyn KeySource + Send + Sync>,
}

impl Authorizer {
    pub fn new(source: impl KeySource + Send + Sync + 'static) -> Authorizer {
        Authorizer {
            source: Box::new(source),
        }
    }

    /// True iff `key` is non-empty and equals an entry of the current allow-list.
    pub fn authorize(&self, key: &str) -> bool {
        if key.is_empty() {
            return false;
        }
        let raw = self.source.allow_list();
        split_keys(&raw).iter().any(|k| *k == key)
    }
}
