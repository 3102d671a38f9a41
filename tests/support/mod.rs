//! Helpers shared by the integration tests.

#[path = "../../src/test_support/socket_guard.rs"]
pub mod socket_guard;
