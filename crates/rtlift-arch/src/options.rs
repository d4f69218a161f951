//! User-settable architecture options and their persisted form.
//!
//! Options are a string-keyed map of scalar items, lists and nested
//! dictionaries. An architecture must restore exactly what it saved:
//! `load(save(x))` yields an architecture whose `save` is equal to `x`'s.

use crate::{ArchError, ArchitectureRegistry, ProcessorArchitecture};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One option value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Item(String),
    List(Vec<OptionValue>),
    Dict(BTreeMap<String, OptionValue>),
}

impl OptionValue {
    /// Returns the text of a scalar item.
    pub fn as_item(&self) -> Option<&str> {
        match self {
            Self::Item(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        Self::Item(s.to_string())
    }
}

/// Options keyed by name, in a stable order.
pub type UserOptions = BTreeMap<String, OptionValue>;

/// The architecture part of a saved project: its name and its options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorOptions {
    pub architecture: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: UserOptions,
}

impl ProcessorOptions {
    /// Records the name and current options of `arch`.
    pub fn capture(arch: &dyn ProcessorArchitecture) -> Self {
        Self {
            architecture: arch.name().to_string(),
            options: arch.save_user_options(),
        }
    }

    /// Creates the named architecture and applies the saved options.
    pub fn restore(
        &self,
        registry: &ArchitectureRegistry,
    ) -> Result<Box<dyn ProcessorArchitecture>, ArchError> {
        let mut arch = registry.create(&self.architecture)?;
        arch.load_user_options(&self.options)?;
        log::debug!(
            "restored architecture {} with {} option(s)",
            arch.name(),
            self.options.len()
        );
        Ok(arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_value_json_shape() {
        let mut dict = BTreeMap::new();
        dict.insert("a".to_string(), OptionValue::from("1"));
        let mut opts = UserOptions::new();
        opts.insert("mode".into(), OptionValue::from("real"));
        opts.insert(
            "list".into(),
            OptionValue::List(vec!["x".into(), "y".into()]),
        );
        opts.insert("dict".into(), OptionValue::Dict(dict));

        let json = serde_json::to_string(&opts).unwrap();
        assert_eq!(
            json,
            r#"{"dict":{"a":"1"},"list":["x","y"],"mode":"real"}"#
        );
        let back: UserOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
    }
}
