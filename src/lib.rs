#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

//! A per-party execution engine for SPDZ-style multi-party computation
//!
//! Parties hold MAC-authenticated secret shares and jointly execute compiled
//! programs over a prime field or the ring `Z/2^n`, plus a binary domain for
//! bit-level work. The crate provides the share algebra, the register-file
//! processor with its batched open/multiply machinery and I/O surface, and
//! the extension boundary behind which a pluggable protocol backend
//! implements the actual MPC primitives.

pub mod algebra;
pub mod clients;
pub mod config;
pub mod error;
pub mod ext;
pub mod marshal;
pub mod opening;
pub mod persistence;
pub mod processor;
pub mod program;
pub mod stream;
pub mod sts;

#[cfg(any(test, feature = "test_helpers"))]
pub mod test_helpers;

/// The id of a party in an MPC, for readability
pub type PartyId = u64;

/// The first party, holder of the clear-value injection slot
pub const PARTY0: PartyId = 0;
/// The second party
pub const PARTY1: PartyId = 1;
/// The third party
pub const PARTY2: PartyId = 2;
