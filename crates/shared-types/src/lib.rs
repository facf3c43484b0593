//! # Shared Types Crate
//!
//! Vocabulary shared by every kernel crate: resource keys and roles, volume
//! classes and mount modes, the [`KernelError`] taxonomy, the [`Component`]
//! lifecycle contract and the closed [`Command`] surface with its
//! [`CommandEnvelope`].
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: cross-crate types are defined here only.
//! - **Closed Sum Types**: commands and their results are enums, so handlers
//!   match exhaustively.
//! - **Fail Closed**: an unknown resource or an ambiguous role never maps to a
//!   permissive default.

pub mod commands;
pub mod component;
pub mod entities;
pub mod envelope;
pub mod errors;

pub use commands::*;
pub use component::*;
pub use entities::*;
pub use envelope::{unix_now, CommandEnvelope};
pub use errors::*;
