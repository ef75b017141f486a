//! Type, Variable and Member descriptors consumed by the evaluator and the heap comparator
//! (SPEC_FULL.md §3). Already-parsed DWARF metadata; parsing itself is out of scope (§1).

use crate::dwarf::location::LocationList;
use crate::util::Address;

/// A struct/class/union member: either a constant offset from the containing type's base, or a
/// DWARF expression that computes the member's address given the base (SPEC_FULL.md §4.8).
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub type_id: TypeId,
    pub location: MemberLocation,
}

#[derive(Debug, Clone)]
pub enum MemberLocation {
    ConstantOffset(u64),
    Expression(crate::dwarf::expr::DwarfExpression),
}

/// Opaque handle into whatever type dictionary the host maintains; this crate only needs
/// identity and equality over it, not its contents (§1: type/frame metadata is consumed
/// already-parsed).
pub type TypeId = u32;

/// A DWARF type record, tagged by kind.
#[derive(Debug, Clone)]
pub struct Type {
    pub id: TypeId,
    pub kind: TypeKind,
    pub byte_size: usize,
    /// Present for array types.
    pub element_count: Option<usize>,
    /// Present for struct/class/union types, in declaration order.
    pub members: Vec<Member>,
    /// Present for array/pointer/typedef/const/volatile types: the type being modified.
    pub subtype: Option<TypeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Base,
    Enum,
    Typedef,
    Const,
    Volatile,
    Pointer,
    Reference,
    Array,
    Struct,
    Class,
    Union,
    Subroutine,
}

impl Type {
    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, TypeKind::Struct | TypeKind::Class | TypeKind::Union)
    }

    pub fn is_pointer_like(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer | TypeKind::Reference)
    }
}

/// A variable: either a static global with a direct address, or a local/dynamic global resolved
/// through a [`LocationList`] against the current frame.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub type_id: TypeId,
    pub is_global: bool,
    pub direct_address: Option<Address>,
    pub location: Option<LocationList>,
    pub scope_start_offset: u64,
}
