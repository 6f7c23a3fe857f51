//! An out-of-the-box coding agent that assembles file and shell tools, tool
//! servers and a model provider.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring agent functionality into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod session;
pub mod tools;

pub use session::{
    Session, SessionBuilder, SessionError, render_system_prompt,
};

/// Re-exports of [`rewind_core`] crate.
pub mod core {
    pub use rewind_core::*;
}

/// Re-exports of [`rewind_mcp`] crate.
pub mod mcp {
    pub use rewind_mcp::*;
}
