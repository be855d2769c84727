//! Configuration and input fixtures

use iam_steward::config::StewardConfig;
use iam_steward::retry::RetryConfig;
use serde_json::{Map, Value};
use std::time::Duration;

/// Configuration with millisecond backoff so retries do not slow tests down.
pub fn fast_config() -> StewardConfig {
    StewardConfig {
        retry: RetryConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            timeout: Duration::from_secs(2),
            jitter: false,
        },
        ..StewardConfig::default()
    }
}

/// The field map a routing layer would hand over, from a JSON object literal.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}
