//! Shared type definitions for the tickhook workspace.
//!
//! # Modules
//!
//! - [`address`] -- Checked code-address newtype
//! - [`tick`] -- Tick phase, arguments, and event payloads

pub mod address;
pub mod tick;

pub use address::Address;
pub use tick::{TickEvent, TickEventArguments, TickPhase};
