//! End-to-end DWARF expression scenarios against a live AddressSpace (spec scenarios: "DWARF
//! add-const", "DWARF deref", "Frame base").

use mc_snapshot_core::address_space::AddressSpace;
use mc_snapshot_core::dwarf::context::ExpressionContext;
use mc_snapshot_core::dwarf::expr::{DwarfExpression, DwarfOp};
use mc_snapshot_core::dwarf::stack::ExpressionStack;
use mc_snapshot_core::process_mem::ProcessMemory;

#[test]
fn add_const_scenario() {
    let expr = DwarfExpression::new(vec![DwarfOp::Lit(21), DwarfOp::PlusUconst(42)]);
    let mut stack = ExpressionStack::new();
    expr.evaluate(&ExpressionContext::empty(), &mut stack).unwrap();
    assert_eq!(stack.pop().unwrap(), 63);
}

#[test]
fn deref_scenario_reads_host_variable() {
    let value: u64 = 0x1122_3344_5566_7788;
    let addr = &value as *const u64 as u64;

    let expr = DwarfExpression::new(vec![DwarfOp::ConstU(addr), DwarfOp::Deref]);
    let address_space = AddressSpace::live(ProcessMemory::for_self());
    let mut context = ExpressionContext::empty();
    context.address_space = Some(&address_space);

    let mut stack = ExpressionStack::new();
    expr.evaluate(&context, &mut stack).unwrap();
    assert_eq!(stack.pop().unwrap(), value);
}

#[test]
fn frame_base_scenario() {
    let expr = DwarfExpression::new(vec![DwarfOp::Fbreg { offset: 16 }]);
    let mut context = ExpressionContext::empty();
    context.frame_base = Some(0x1000);

    let mut stack = ExpressionStack::new();
    expr.evaluate(&context, &mut stack).unwrap();
    assert_eq!(stack.pop().unwrap(), 0x1010);
}
