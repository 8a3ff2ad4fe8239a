//! Request lifecycle primitives.
//!
//! # Data Flow
//! ```text
//! Caller:
//!     AbortController::abort() → watch channel flips to true
//!
//! Handler (per request):
//!     AbortSignal::aborted()   → pre-dispatch short-circuit
//!     AbortSignal::cancelled() → raced against the in-flight exchange
//!     SettleOnce::try_settle() → exactly one outcome per request
//! ```
//!
//! # Design Decisions
//! - The signal is consumed, never produced, by the handler
//! - Aborting is idempotent; late aborts after settlement are no-ops

pub mod abort;
pub mod settle;

pub use abort::{AbortController, AbortSignal};
pub use settle::SettleOnce;
