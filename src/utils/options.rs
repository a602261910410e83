//! Option value conversion and merging utilities.

use crate::config::OptionValue;
use std::collections::BTreeMap;

/// Convert an OptionValue map to `key=value` config file lines
/// - Bool(true) -> key=1
/// - Bool(false) -> key=0
/// - String(s) -> key=s
/// - Number(n) -> key=n
pub fn options_to_lines(options: &BTreeMap<String, OptionValue>) -> Vec<String> {
    options
        .iter()
        .map(|(key, value)| match value {
            OptionValue::Bool(flag) => format!("{}={}", key, u8::from(*flag)),
            OptionValue::String(s) => format!("{}={}", key, s),
            OptionValue::Number(n) => format!("{}={}", key, n),
        })
        .collect()
}

/// Merge two option maps, with overrides taking precedence over defaults
pub fn merge_options(
    defaults: &BTreeMap<String, OptionValue>,
    overrides: &BTreeMap<String, OptionValue>,
) -> BTreeMap<String, OptionValue> {
    let mut merged = defaults.clone();
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }
    merged
}
