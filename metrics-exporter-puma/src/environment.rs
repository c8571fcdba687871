use std::{collections::HashMap, sync::Arc};

const DEFAULT_ENVIRONMENT_NAME: &str = "development";

/// Read-only access to environment variables.
///
/// A variable that is present but empty is still considered set.
pub trait Environment: Send {
    /// Returns the value of the variable `key`, or `None` if it is not set.
    fn var(&self, key: &str) -> Option<String>;

    /// Returns `true` if the variable `key` is set.
    fn is_set(&self, key: &str) -> bool {
        self.var(key).is_some()
    }
}

/// The environment of the current process.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnv;

impl Environment for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        // Values that aren't valid Unicode are treated as unset.
        std::env::var(key).ok()
    }
}

impl Environment for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl<E: Environment + Sync> Environment for &E {
    fn var(&self, key: &str) -> Option<String> {
        (**self).var(key)
    }
}

impl<E: Environment + Sync + ?Sized> Environment for Arc<E> {
    fn var(&self, key: &str) -> Option<String> {
        (**self).var(key)
    }
}

/// Returns the application's deployment environment name.
///
/// This follows the Rack/Rails convention: `RAILS_ENV`, then `RACK_ENV`, and finally `development`. Empty values are
/// skipped.
pub fn environment_name(env: &dyn Environment) -> String {
    ["RAILS_ENV", "RACK_ENV"]
        .iter()
        .filter_map(|key| env.var(key))
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{environment_name, Environment};

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn empty_values_are_set() {
        let env = env(&[("DD_ENV", "")]);
        assert!(env.is_set("DD_ENV"));
        assert!(!env.is_set("DD_SERVICE"));
    }

    #[test]
    fn environment_name_precedence() {
        assert_eq!(environment_name(&env(&[])), "development");
        assert_eq!(environment_name(&env(&[("RACK_ENV", "staging")])), "staging");
        assert_eq!(
            environment_name(&env(&[("RAILS_ENV", "production"), ("RACK_ENV", "staging")])),
            "production"
        );
        assert_eq!(environment_name(&env(&[("RAILS_ENV", ""), ("RACK_ENV", "staging")])), "staging");
    }
}
