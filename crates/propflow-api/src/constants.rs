//! API constants

/// Version segment of every control route.
pub const API_VERSION: &str = "v0";

/// Prefix of the control routes, e.g. `/api/v0/migration/status`.
pub const API_PREFIX: &str = "/api/v0";

/// Ceiling on concurrently served requests when `HTTP_CONCURRENCY_LIMIT` is unset.
pub const DEFAULT_HTTP_CONCURRENCY_LIMIT: usize = 1_000;
