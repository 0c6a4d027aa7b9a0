// tests/property_test.rs

//! Property-based tests covering the universally-quantified invariants
//! that hold across the core's concurrency and routing primitives.

#[path = "integration/test_helpers.rs"]
mod test_helpers;

mod property {
    pub mod conflict_versioning_test;
    pub mod lock_fencing_test;
    pub mod router_exclusion_test;
}
