//! TUI debugger for the register machine.
//!
//! Provides an interactive terminal-based debugger with:
//! - Register and flag panel
//! - Memory view of any segment
//! - Step/run/breakpoint controls
//! - Disassembly view

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
