//! Exceptions, aborts and sub-module signals of the current opcode.

mod exceptions;
mod platform_controller;

pub use exceptions::*;
pub use platform_controller::*;
