/// Persisted entity definitions.
pub mod models;
/// Storage error types shared by every backend.
pub mod storage;
/// Store traits and their backends.
pub mod store;
