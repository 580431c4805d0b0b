//! Property-based tests for specialization.
