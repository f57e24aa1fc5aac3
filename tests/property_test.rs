// tests/property_test.rs

//! Property-based tests for palisade
//!
//! These tests use property-based testing to verify invariants that should
//! always hold, regardless of input values.

mod property {
    pub mod hba_diff_test;
    pub mod retry_jitter_test;
    pub mod state_codec_test;
}
