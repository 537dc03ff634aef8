//! `tracecap`: reconstructs a call graph and Callgrind profile from a live
//! ETM instruction trace.
//!
//! The pipeline is decoder events → [`recorder::TransitionRecorder`] →
//! [`tree_walker::reconstruct`] → [`emit::graphviz`]/[`emit::callgrind`],
//! with [`name::NameCache`] supplying the stable, deduplicated `(file,
//! function)` identifiers the emitters need. [`session::run_session`] wires
//! one sampling window of this together; [`cli`] and [`error`] are the
//! ambient configuration/error-reporting layers around it.

pub mod cli;
pub mod decoder;
pub mod emit;
pub mod error;
pub mod name;
pub mod recorder;
pub mod runtime;
pub mod session;
pub mod symbols;
pub mod tree_walker;

pub use name::SymbolResolver;
