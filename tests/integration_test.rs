// tests/integration_test.rs

//! Black-box integration tests for playhub-core: end-to-end flows across
//! more than one subsystem, run against the in-memory fake backends.

mod integration {
    pub mod cache_and_sync_test;
    pub mod lock_and_transaction_test;
    pub mod realtime_test;
    pub mod test_helpers;
}
