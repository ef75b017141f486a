//! A DWARF subprogram or lexical-scope frame (SPEC_FULL.md §3).

use crate::dwarf::location::LocationList;
use crate::dwarf::types::Variable;
use crate::object_info::ObjectInformation;

/// A subprogram or lexical scope. `parent` links an inlined subroutine back to the physical
/// subprogram frame it was inlined into, for frame-base resolution (DWARF delegates an inlined
/// scope's frame base to its enclosing subprogram).
pub struct Frame {
    pub low_pc: u64,
    pub high_pc: u64,
    pub frame_base: LocationList,
    pub children: Vec<Frame>,
    pub variables: Vec<Variable>,
    pub object_info: ObjectInformation,
    pub parent: Option<Box<Frame>>,
}

impl Frame {
    pub fn contains_ip(&self, ip_offset: u64) -> bool {
        ip_offset >= self.low_pc && ip_offset < self.high_pc
    }

    /// The frame whose `frame_base` should be used: this frame's own, unless it has no
    /// frame-base entries of its own (an inlined scope), in which case its parent's.
    pub fn frame_base_owner(&self) -> &Frame {
        if self.frame_base.entries.is_empty() {
            self.parent.as_deref().map(Frame::frame_base_owner).unwrap_or(self)
        } else {
            self
        }
    }
}
