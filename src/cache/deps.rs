//! Dependency fingerprints for conditional invalidation.

/// Suffix appended to a primary key to address its fingerprint.
pub const DEPS_SUFFIX: &str = ":deps";

/// Key under which the fingerprint for `key` is stored.
pub fn deps_key(key: &str) -> String {
    format!("{}{}", key, DEPS_SUFFIX)
}

/// Order-independent fingerprint of a dependency list: sorted, then joined with `|`.
pub fn fingerprint<S: AsRef<str>>(dependencies: &[S]) -> String {
    let mut parts: Vec<&str> = dependencies.iter().map(AsRef::as_ref).collect();
    parts.sort_unstable();
    parts.join("|")
}
