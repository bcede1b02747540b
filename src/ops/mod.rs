//! # Backend Primitives
//!
//! This module holds the tensor operations the layers are built from. Every operation
//! returns its forward value together with a backward closure, so a caller can run the
//! forward pass, compute a loss, and then route the upstream gradient back through the
//! closures in reverse order.
//!
//! ## Submodules
//!
//! - [`cpu`] — Multi-threaded CPU operations (the only backend)
//!
//! ## Extending the Backend
//!
//! To add a new operation:
//!
//! 1. Implement it in `cpu::my_op`, returning `(value, Box<backward>)`
//! 2. Re-export it from [`crate::backprop`] with user-facing docs
//! 3. Keep shape checks as assertions here; layers validate and report errors first
//!
//! ## Notes
//!
//! - Backward closures own clones of what they need, so they are `'static`
//! - Closures are `Fn`, allowing multiple invocations if needed

use crate::tensors::Ten32;

pub mod cpu;

/// Backward closure of a unary tensor operation.
pub type FnTen32To = dyn Fn(&Ten32) -> Ten32 + Send + Sync;

/// Backward closure of a binary tensor operation, yielding one gradient per operand.
pub type FnToDoubleTen32 = dyn Fn(&Ten32) -> (Ten32, Ten32) + Send + Sync;

/// Backward closure of a scalar-valued loss.
pub type FnF32Ten32 = dyn Fn(f32) -> Ten32 + Send + Sync;
