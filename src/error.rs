//! The error taxonomy for the checkpoint/restore core (see SPEC_FULL.md §7).
//!
//! `CoreError` covers every fatal condition: once one of these propagates out of a public entry
//! point, the current exploration attempt is over and the target process state is no longer
//! trustworthy. `EvaluationError` and `TypeMismatch` are narrower, recoverable error types that a
//! caller may catch and continue past (e.g. marking one variable unresolved, or one heap region
//! as "not equal").

use crate::util::Address;
use std::io;

/// Fatal errors. Propagating one of these out of the core means the current exploration attempt
/// must be abandoned; the target process is left in an undefined state.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    /// `mmap`/`mremap`/`open` (or any other resource-allocating syscall) failed.
    #[error("OS resource exhausted while performing `{operation}`: {source}")]
    OsResourceExhausted {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// An unrecoverable `pread`/`pwrite` against `/proc/<pid>/mem` (after retrying `EINTR` and
    /// short transfers).
    #[error("failed to {action} {len} bytes at {addr} in pid {pid}: {source}")]
    TargetReadFailed {
        action: &'static str,
        addr: Address,
        len: usize,
        pid: i32,
        #[source]
        source: io::Error,
    },

    /// A programming-error-level invariant was violated: refcount underflow, an unaligned
    /// address where page alignment is a precondition, more than one RW/exec/RO segment
    /// discovered for a single ELF object, etc.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A line of `/proc/<pid>/maps` (or another ambient pseudo-file) could not be parsed.
    #[error("could not parse `{file}` line: `{line}`")]
    MapFormatError { file: &'static str, line: String },

    /// A DWARF expression evaluation failed. Surfaced here only on paths that choose to make it
    /// fatal; most callers match `EvaluationError` directly instead.
    #[error("DWARF expression evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),
}

/// Errors raised while evaluating a [`crate::dwarf::DwarfExpression`] (SPEC_FULL.md §4.7).
/// Recoverable: the caller may mark the variable being resolved as unavailable and continue.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("opcode requires a register cursor, but none was supplied")]
    MissingStackContext,
    #[error("opcode requires a frame base, but none was supplied")]
    MissingFrameBase,
    #[error("opcode requires an object base address, but none was supplied")]
    NoBaseAddress,
    #[error("unsupported DWARF operation")]
    UnsupportedOperation,
}

/// Raised by the heap comparator when two regions being compared disagree on size in a way that
/// makes structural comparison meaningless. Recoverable: the comparator treats this as "not
/// equal" rather than propagating a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMismatch;

impl std::fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "type/size mismatch while comparing heap regions")
    }
}

impl std::error::Error for TypeMismatch {}

pub type CoreResult<T> = Result<T, CoreError>;
