//! DWARF location-expression evaluation: the stack machine (§4.7), location lists, frames, and
//! the member/frame-base resolver built on top of them (§4.8).
//!
//! Grounded on `DwarfExpression.cpp` (the opcode evaluator and `mc_find_frame_base`) and
//! `mc_member.cpp` (`mc_member_resolve`) in the original source.

pub mod context;
pub mod expr;
pub mod frame;
pub mod location;
pub mod member;
pub mod stack;
pub mod types;

pub use context::{ExpressionContext, RegisterCursor};
pub use expr::{DwarfExpression, DwarfOp};
pub use frame::Frame;
pub use location::{Location, LocationList, LocationListEntry};
pub use stack::ExpressionStack;
pub use types::{Member, Type, Variable};
