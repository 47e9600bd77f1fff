//! Tick interception, timing, and two-phase dispatch for an opaque host.
//!
//! The host program runs a recurring simulation step (a "tick") that this
//! crate cannot recompile or call. Instead it locates the tick routine by
//! byte signature, redirects control flow at two points of it, and turns
//! each pass through the routine into a pair of synchronous notifications:
//! BEFORE the tick runs and AFTER it finishes, each carrying the host's tick
//! count and the measured time between ticks.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `tickhook-config.yaml` into
//!   strongly-typed structs.
//! - [`clock`] -- [`MonotonicClock`] trait, [`SteadyClock`], and
//!   [`ManualClock`].
//! - [`image`] -- [`CodeImage`]: bounds-checked reads, pattern scans, and
//!   relative-jump following over a copy of host code.
//! - [`signature`] -- Byte patterns, the [`AddressResolver`] trait, and
//!   [`SignatureResolver`].
//! - [`redirect`] -- The [`Redirector`] trait and the in-process
//!   [`RedirectTable`].
//! - [`timing`] -- [`TickTimer`] duration bookkeeping.
//! - [`dispatch`] -- [`TickDispatcher`] BEFORE/AFTER routines and the
//!   [`TickCounter`] accessor.
//! - [`hook`] -- [`TickHook`], the one-time activation lifecycle object.
//!
//! [`MonotonicClock`]: clock::MonotonicClock
//! [`SteadyClock`]: clock::SteadyClock
//! [`ManualClock`]: clock::ManualClock
//! [`CodeImage`]: image::CodeImage
//! [`AddressResolver`]: signature::AddressResolver
//! [`SignatureResolver`]: signature::SignatureResolver
//! [`Redirector`]: redirect::Redirector
//! [`RedirectTable`]: redirect::RedirectTable
//! [`TickTimer`]: timing::TickTimer
//! [`TickDispatcher`]: dispatch::TickDispatcher
//! [`TickCounter`]: dispatch::TickCounter
//! [`TickHook`]: hook::TickHook

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod hook;
pub mod image;
pub mod redirect;
pub mod signature;
pub mod timing;
