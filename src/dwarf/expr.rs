//! The DWARF location-expression opcode set and its evaluator (SPEC_FULL.md §4.7).
//!
//! Grounded directly on `DwarfExpression::evaluate` in the original source: a single function
//! iterates the ops, mutating an [`ExpressionStack`]; per §9's re-architecture note, it is
//! expressed here as a pure `(ops, context, stack) -> Result<(), EvalError>` rather than the
//! source's giant switch with fall-through exceptions.

use crate::address_space::ReadOptions;
use crate::dwarf::context::ExpressionContext;
use crate::dwarf::stack::ExpressionStack;
use crate::error::{CoreResult, EvaluationError};

/// One DWARF location-expression opcode, already decoded from its wire encoding (decoding from
/// raw `.debug_info` bytes is out of scope, see SPEC_FULL.md §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwarfOp {
    /// `DW_OP_breg0`..`DW_OP_breg31`: read register `reg` and push `register + offset`.
    Breg { reg: u16, offset: i64 },
    /// `DW_OP_fbreg`: push `frame_base + offset`.
    Fbreg { offset: i64 },
    /// `DW_OP_call_frame_cfa`.
    CallFrameCfa,
    /// `DW_OP_addr`: push `object_info.base_address + offset`.
    Addr { offset: u64 },
    /// `DW_OP_lit0`..`DW_OP_lit31`.
    Lit(u8),
    /// `DW_OP_const1u`..`DW_OP_const8u`, `DW_OP_constu`.
    ConstU(u64),
    /// `DW_OP_const1s`..`DW_OP_const8s`, `DW_OP_consts`. Sign-extended to stack width.
    ConstS(i64),
    Dup,
    Drop,
    Swap,
    Over,
    Plus,
    Minus,
    Mul,
    And,
    Or,
    Xor,
    PlusUconst(u64),
    Not,
    Neg,
    Nop,
    Deref,
    /// `DW_OP_deref_size`: not used by this core's producers, always rejected.
    DerefSize(u8),
}

/// A sequence of [`DwarfOp`]s computing a variable or member's storage location.
#[derive(Debug, Clone, Default)]
pub struct DwarfExpression {
    pub ops: Vec<DwarfOp>,
}

impl DwarfExpression {
    pub fn new(ops: Vec<DwarfOp>) -> Self {
        DwarfExpression { ops }
    }

    /// Evaluate this expression against `context`, mutating `stack` in place. On any error the
    /// stack's contents are unspecified (SPEC_FULL.md §4.7): callers must discard it.
    pub fn evaluate(&self, context: &ExpressionContext, stack: &mut ExpressionStack) -> CoreResult<()> {
        for op in &self.ops {
            eval_one(*op, context, stack)?;
        }
        Ok(())
    }
}

fn eval_one(op: DwarfOp, context: &ExpressionContext, stack: &mut ExpressionStack) -> CoreResult<()> {
    match op {
        DwarfOp::Lit(n) => stack.push(n as u64)?,
        DwarfOp::ConstU(v) => stack.push(v)?,
        DwarfOp::ConstS(v) => stack.push(v as u64)?,
        DwarfOp::Breg { reg, offset } => {
            let cursor = context.cursor()?;
            let reg_value = cursor.read_register(reg)?;
            stack.push(reg_value.wrapping_add(offset as u64))?;
        }
        DwarfOp::Fbreg { offset } => {
            let base = context.frame_base()?;
            stack.push(base.wrapping_add(offset as u64))?;
        }
        DwarfOp::CallFrameCfa => {
            let cursor = context.cursor()?;
            let caller = cursor.unwind_one_frame()?;
            let sp_reg = caller.stack_pointer_register();
            let sp = caller.read_register(sp_reg)?;
            stack.push(sp)?;
        }
        DwarfOp::Addr { offset } => {
            let info = context.object_info()?;
            stack.push(info.base_address.as_usize() as u64 + offset)?;
        }
        DwarfOp::Dup => {
            let top = stack.top()?;
            stack.push(top)?;
        }
        DwarfOp::Drop => {
            stack.pop()?;
        }
        DwarfOp::Swap => {
            let a = stack.pop()?;
            let b = stack.pop()?;
            stack.push(a)?;
            stack.push(b)?;
        }
        DwarfOp::Over => {
            let a = stack.pop()?;
            let b = stack.pop()?;
            stack.push(b)?;
            stack.push(a)?;
            stack.push(b)?;
        }
        DwarfOp::Plus => {
            let b = stack.pop()?;
            let a = stack.pop()?;
            stack.push(a.wrapping_add(b))?;
        }
        DwarfOp::Minus => {
            let b = stack.pop()?;
            let a = stack.pop()?;
            stack.push(a.wrapping_sub(b))?;
        }
        DwarfOp::Mul => {
            let b = stack.pop()?;
            let a = stack.pop()?;
            stack.push(a.wrapping_mul(b))?;
        }
        DwarfOp::And => {
            let b = stack.pop()?;
            let a = stack.pop()?;
            stack.push(a & b)?;
        }
        DwarfOp::Or => {
            let b = stack.pop()?;
            let a = stack.pop()?;
            stack.push(a | b)?;
        }
        DwarfOp::Xor => {
            let b = stack.pop()?;
            let a = stack.pop()?;
            stack.push(a ^ b)?;
        }
        DwarfOp::PlusUconst(v) => {
            let a = stack.pop()?;
            stack.push(a.wrapping_add(v))?;
        }
        DwarfOp::Not => {
            let a = stack.pop()?;
            stack.push(!a)?;
        }
        DwarfOp::Neg => {
            let a = stack.pop()?;
            stack.push(a.wrapping_neg())?;
        }
        DwarfOp::Nop => {}
        DwarfOp::Deref => {
            let address_space = context.address_space()?;
            let addr = stack.pop()?;
            let addr = unsafe { crate::util::Address::from_usize(addr as usize) };
            let mut buf = [0u8; std::mem::size_of::<usize>()];
            address_space.read(&mut buf, addr, ReadOptions::default())?;
            stack.push(usize::from_ne_bytes(buf) as u64)?;
        }
        DwarfOp::DerefSize(_) => return Err(EvaluationError::UnsupportedOperation.into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_const() {
        let expr = DwarfExpression::new(vec![DwarfOp::Lit(21), DwarfOp::PlusUconst(42)]);
        let mut stack = ExpressionStack::new();
        expr.evaluate(&ExpressionContext::empty(), &mut stack).unwrap();
        assert_eq!(stack.pop().unwrap(), 63);
    }

    #[test]
    fn test_fbreg() {
        let expr = DwarfExpression::new(vec![DwarfOp::Fbreg { offset: 16 }]);
        let mut context = ExpressionContext::empty();
        context.frame_base = Some(0x1000);
        let mut stack = ExpressionStack::new();
        expr.evaluate(&context, &mut stack).unwrap();
        assert_eq!(stack.pop().unwrap(), 0x1010);
    }

    #[test]
    fn test_fbreg_without_frame_base_fails() {
        let expr = DwarfExpression::new(vec![DwarfOp::Fbreg { offset: 16 }]);
        let mut stack = ExpressionStack::new();
        let result = expr.evaluate(&ExpressionContext::empty(), &mut stack);
        assert!(result.is_err());
    }

    #[test]
    fn test_deref_reads_live_variable() {
        use crate::address_space::AddressSpace;
        use crate::process_mem::ProcessMemory;

        let x: u64 = 0xABCD_1234;
        let addr = &x as *const u64 as u64;
        let expr = DwarfExpression::new(vec![DwarfOp::ConstU(addr), DwarfOp::Deref]);

        let address_space = AddressSpace::live(ProcessMemory::for_self());
        let mut context = ExpressionContext::empty();
        context.address_space = Some(&address_space);

        let mut stack = ExpressionStack::new();
        expr.evaluate(&context, &mut stack).unwrap();
        assert_eq!(stack.pop().unwrap(), x);
    }

    #[test]
    fn test_stack_manipulation() {
        let expr = DwarfExpression::new(vec![
            DwarfOp::Lit(1),
            DwarfOp::Lit(2),
            DwarfOp::Swap,
        ]);
        let mut stack = ExpressionStack::new();
        expr.evaluate(&ExpressionContext::empty(), &mut stack).unwrap();
        assert_eq!(stack.pop().unwrap(), 1);
        assert_eq!(stack.pop().unwrap(), 2);
    }

    #[test]
    fn test_deref_size_is_unsupported() {
        let expr = DwarfExpression::new(vec![DwarfOp::Lit(0), DwarfOp::DerefSize(4)]);
        let mut stack = ExpressionStack::new();
        let result = expr.evaluate(&ExpressionContext::empty(), &mut stack);
        assert!(result.is_err());
    }
}
