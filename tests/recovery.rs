//! Integration tests for `src/recovery.rs`.

#[path = "recovery/timeout_requeue_test.rs"]
mod timeout_requeue_test;
