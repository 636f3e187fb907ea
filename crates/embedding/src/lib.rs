//! Embedding crate
//!
//! Token id lookup plus the rotary tables that inject absolute positions into
//! attention queries and keys.

pub mod positional;
pub mod token;

pub use positional::*;
pub use token::*;
