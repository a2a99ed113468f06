use std::env;

use log::debug;

use crate::auth::KeySource;

/// Name of the environment variable holding the allow-list unless configured otherwise.
pub const DEFAULT_KEYS_VAR: &str = "API_KEYS";

/// Reads the allow-list from an environment variable each time it is asked.
///
/// An unset or non-unicode variable is an empty list, which rejects every key.
pub struct EnvKeys {
    var: String,
}

impl EnvKeys {
    pub fn new(var: &str) -> EnvKeys {
        EnvKeys {
            var: var.to_string(),
        }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

impl Default for EnvKeys {
    fn default() -> EnvKeys {
        EnvKeys::new(DEFAULT_KEYS_VAR)
    }
}

impl KeySource for EnvKeys {
    fn allow_list(&self) -> String {
        match env::var(&self.var) {
            Ok(v) => v,
            Err(e) => {
                debug!("no allow-list in {}: {}", &self.var, e);
                String::new()
            },
        }
    }
}
