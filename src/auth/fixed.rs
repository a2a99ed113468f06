use crate::auth::{
    KeySource,
    KEY_SEPARATOR,
};

/// An allow-list that never changes.
pub struct FixedKeys {
    keys: Vec<String>,
}

impl FixedKeys {
    pub fn new(keys: Vec<String>) -> FixedKeys {
        FixedKeys {
            keys,
        }
    }

    /// Build from a `;`-delimited list, the same format the environment uses.
    pub fn from_list(raw: &str) -> FixedKeys {
        FixedKeys::new(raw.split(KEY_SEPARATOR).map(String::from).collect())
    }
}

impl KeySource for FixedKeys {
    fn allow_list(&self) -> String {
        self.keys.join(&KEY_SEPARATOR.to_string())
    }
}
