//! Witness trace generation for a zkEVM arithmetization.
//!
//! The [`Hub`] is driven by the hooks of a host EVM: conflation, block and
//! transaction boundaries, context entries and exits, and the pre- and
//! post-execution of every opcode. For each hook it appends a
//! [`TraceSection`](section::TraceSection) to the trace, made of typed rows
//! (stack, context, account, storage, transaction, miscellaneous and
//! scenario fragments), and hands the work of proving arithmetic, memory
//! copies, hashing and encodings to the sub-modules in [`module`].
//!
//! Facts that are only known later (whether a context reverts, the gas a
//! child returns, whether an account self-destructs by the end of the
//! transaction) are resolved through deferred actions, so that once a
//! conflation ends every fragment holds its final values.
//!
//! # Usage
//!
//! ```ignore
//! let mut hub = Hub::new(TracerConfig::default());
//! hub.trace_start_conflation(1)?;
//! hub.trace_start_block(&header)?;
//! hub.trace_start_transaction(&world, &tx)?;
//! // ... one hook per execution event ...
//! hub.trace_end_transaction(&world, &tx, success, &logs, &self_destructs)?;
//! hub.trace_end_block(&header, &body)?;
//! hub.trace_end_conflation(&world)?;
//!
//! let mut trace = Trace::default();
//! hub.commit(&mut trace);
//! ```
//!
//! Any hook returning an error leaves the hub poisoned: later hooks fail with
//! [`TracerError::Poisoned`].

// Execution state
pub mod callstack;
mod defer;
pub mod hub;
pub mod metadata;

// Per-opcode analysis
pub mod gas;
pub mod opcode;
pub mod precompile;
pub mod signals;

// Trace rows
pub mod fragment;
pub mod section;

// Sub-modules
pub mod module;

// Host interface and utilities
pub mod config;
pub mod error;
pub mod host;
pub mod testing_utils;
pub mod util;

pub use crate::config::TracerConfig;
pub use crate::error::{TracerError, TracerResult};
pub use crate::hub::Hub;
