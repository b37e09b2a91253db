//! Deterministic, pure logic shared by the repair pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod retry;
pub mod text;
pub mod types;
pub mod verdict;
