//! Environment-variable config overrides, in the same idiom the rest of
//! this lineage uses for its own port/host configuration: read the
//! variable, try to parse it, fall back to the caller-supplied default and
//! log a warning if the variable was present but malformed. A missing
//! variable is the normal case and is not logged at all.

use std::str::FromStr;

/// Overlay an environment-variable override onto `default`. Parse failures
/// degrade to `default` rather than aborting construction.
pub fn overlay<T>(var: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(var) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var, raw, "failed to parse environment override, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Overlay a string override (no parsing involved).
pub fn overlay_string(var: &str, default: impl Into<String>) -> String {
    std::env::var(var).unwrap_or_else(|_| default.into())
}
