//! A checkpoint/restore core for a stateful model checker.
//!
//! This crate captures, deduplicates, compares, and restores the user-space memory image of a
//! target process under analysis, so that a model checker can backtrack through branching
//! schedules of interleaved actions without paying for a full copy at every explored state.
//!
//! Three subsystems, built bottom-up:
//! * [`page_store`]: deduplicated, reference-counted storage of fixed-size memory pages.
//! * [`region`] and [`snapshot`]: a region is captured Flat, Chunked (page-store indices) or
//!   Privatized (per-worker fan-out); a [`snapshot::Snapshot`] is an ordered collection of
//!   regions plus stack/fd/ignored-region metadata.
//! * [`dwarf`] and [`heap_compare`]: a small stack-machine evaluator for DWARF location
//!   expressions, and a structural comparator that walks two snapshots' heaps type-guided where
//!   possible.
//!
//! [`address_space::AddressSpace`] is the read surface shared by all three: the same DWARF
//! evaluation or heap walk runs unmodified whether it targets live process memory or a prior
//! snapshot. [`checkpoint::Checkpoint`] ties the subsystems together: it owns the page store and
//! drives capture/restore, coordinating soft-dirty reset and parent-snapshot sharing.
//!
//! Out of scope, treated as external collaborators: the exploration algorithm that decides when
//! to snapshot, the target's request/transition model, process control (ptrace), and loading
//! DWARF debug info from ELF files — this crate consumes already-parsed type/frame metadata.

#[macro_use]
extern crate log;

pub mod address_space;
pub mod checkpoint;
pub mod dwarf;
pub mod error;
pub mod heap_compare;
pub mod memory_map;
pub mod object_info;
pub mod options;
pub mod page_store;
pub mod process_mem;
pub mod region;
pub mod snapshot;
pub mod softdirty;
pub mod util;

pub use checkpoint::Checkpoint;
pub use error::{CoreError, CoreResult, EvaluationError, TypeMismatch};
pub use options::Options;
pub use page_store::PageStore;
