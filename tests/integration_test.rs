// tests/integration_test.rs

//! Integration tests for minicdn
//!
//! These tests boot the real `axum` router behind a real TCP listener, in
//! front of a mocked HTTP origin, and drive it with an actual HTTP client —
//! end to end, not through any in-process shortcut.

mod integration {
    pub mod file_handler_test;
    pub mod test_helpers;
}
