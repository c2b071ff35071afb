//! Lenient query parameter parsing shared by the streaming endpoints.

use std::collections::HashMap;

pub type QueryParams = HashMap<String, String>;

/// `true` for `true`, `1`, `yes` or `on` (any case); `false` otherwise.
pub fn flag(params: &QueryParams, name: &str) -> bool {
    params.get(name).is_some_and(|v| {
        matches!(
            v.to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        )
    })
}

/// A strictly positive integer, or `default` when absent or unparsable.
pub fn positive_or(params: &QueryParams, name: &str, default: u64) -> u64 {
    params
        .get(name)
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
