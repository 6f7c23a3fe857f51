//! An abstraction layer for different LLMs.
//!
//! This crate establishes an unified protocol for the agent loop to talk
//! with various supported LLMs, so that the loop can switch between them
//! without touching the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to. The only exception
//! is a handful of convenience accessors on messages.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
