//! Invariant tests module
//!
//! This module contains tests that verify critical invariants:
//! - Presignatures are spent at most once
//! - Finalized signers match the custodial key
//! - Nothing unverified reaches a chain
