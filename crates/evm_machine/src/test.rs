use super::*;
use crate::assembler::assemble;

extern crate std;
use std::format;
use std::vec;

const STACK_CAP: usize = 32;

fn assemble_code(source: &str) -> std::vec::Vec<u8> {
    let mut buffer = [0u8; 512];
    let length = assemble(source, &mut buffer).unwrap();
    buffer[..length].to_vec()
}

fn run(source: &str) -> Execution<STACK_CAP> {
    let code = assemble_code(source);
    Machine::<STACK_CAP>::new(&code).run()
}

fn top(source: &str) -> Word {
    let execution = run(source);
    assert!(execution.success(), "{source} failed with {:?}", execution.error);
    *execution.top().unwrap()
}

fn word(value: u128) -> Word {
    Word::new(value)
}

fn negative(value: u128) -> Word {
    Word::ZERO.wrapping_sub(word(value))
}

#[test]
fn test_add_then_stop() {
    let (stack, success) = execute(&[0x60, 0x01, 0x60, 0x02, 0x01, 0x00]);
    assert!(success);
    assert_eq!(stack.as_slice(), &[word(3)]);
}

#[test]
fn test_stack_is_reported_top_first() {
    let execution = run("PUSH 1\nPUSH 2\nPUSH 3");
    assert!(execution.success());
    assert_eq!(execution.stack(), &[word(3), word(2), word(1)]);
    assert_eq!(execution.pc, 6);
}

#[test]
fn test_stop_reports_top_first() {
    let execution = run("PUSH 1\nPUSH 2\nSTOP\nPUSH 3");
    assert!(execution.success());
    assert_eq!(execution.stack(), &[word(2), word(1)]);
    assert_eq!(execution.pc, 5);
}

#[test]
fn test_empty_code() {
    let (stack, success) = execute(&[]);
    assert!(success);
    assert!(stack.is_empty());
}

#[test]
fn test_push_reads_big_endian() {
    assert_eq!(top("PUSH2 0x0102"), word(0x0102));
    assert_eq!(top("PUSH4 0xff"), word(0xff));
    assert_eq!(top("PUSH0"), Word::ZERO);
    assert_eq!(top("PUSH32 -1"), Word::MAX);
}

#[test]
fn test_push1_without_immediate_is_truncated() {
    let (stack, success) = execute(&[0x60]);
    assert!(!success);
    assert!(stack.is_empty());
}

#[test]
fn test_push32_one_byte_short() {
    let mut code = vec![0x7f];
    code.extend_from_slice(&[0xff; 31]);
    let execution = Machine::<STACK_CAP>::new(&code).run();
    assert!(!execution.success());
    assert!(execution.stack().is_empty());
    assert_eq!(
        execution.error,
        Some(MachineError::TruncatedPush { pc: 0, width: 32, available: 31 })
    );
}

#[test]
fn test_push_exactly_filling_code() {
    let mut code = vec![0x7f];
    code.extend_from_slice(&[0xff; 32]);
    let (stack, success) = execute(&code);
    assert!(success);
    assert_eq!(stack.as_slice(), &[Word::MAX]);
}

#[test]
fn test_truncated_push_keeps_current_stack() {
    let execution = run("PUSH 7\nPUSH 9\n.byte 0x61 0x01");
    assert!(!execution.success());
    assert_eq!(execution.stack(), &[word(9), word(7)]);
    assert_eq!(
        execution.error,
        Some(MachineError::TruncatedPush { pc: 4, width: 2, available: 1 })
    );
}

#[test]
fn test_division_by_zero_is_zero() {
    let (stack, success) = execute(&[0x60, 0xff, 0x60, 0x00, 0x04]);
    assert!(success);
    assert_eq!(stack.first(), Some(&Word::ZERO));
    assert_eq!(top("PUSH 0\nPUSH 10\nMOD"), Word::ZERO);
    assert_eq!(top("PUSH 0\nPUSH 10\nSDIV"), Word::ZERO);
    assert_eq!(top("PUSH 0\nPUSH 10\nSMOD"), Word::ZERO);
}

#[test]
fn test_operand_order() {
    // The first pop is the left hand operand.
    assert_eq!(top("PUSH 1\nPUSH 3\nSUB"), word(2));
    assert_eq!(top("PUSH 2\nPUSH 10\nDIV"), word(5));
    assert_eq!(top("PUSH 3\nPUSH 10\nMOD"), word(1));
    assert_eq!(top("PUSH 2\nPUSH 10\nEXP"), word(100));
    assert_eq!(top("PUSH 9\nPUSH 10\nLT"), Word::ZERO);
    assert_eq!(top("PUSH 9\nPUSH 10\nGT"), Word::ONE);
}

#[test]
fn test_arithmetic_wraps() {
    assert_eq!(top("PUSH 2\nPUSH -1\nADD"), word(1));
    assert_eq!(top("PUSH 2\nPUSH -1\nMUL"), negative(2));
    assert_eq!(top("PUSH 1\nPUSH 0\nSUB"), Word::MAX);
    assert_eq!(top("PUSH 256\nPUSH 2\nEXP"), Word::ZERO);
}

#[test]
fn test_signed_division() {
    assert_eq!(top("PUSH -1\nPUSH -2\nSDIV"), word(2));
    assert_eq!(top("PUSH 2\nPUSH -7\nSDIV"), negative(3));
    assert_eq!(top("PUSH -3\nPUSH -10\nSMOD"), negative(1));
    assert_eq!(top("PUSH 3\nPUSH -10\nSMOD"), negative(1));
}

#[test]
fn test_modular_arithmetic() {
    assert_eq!(top("PUSH 8\nPUSH 10\nPUSH 10\nADDMOD"), word(4));
    assert_eq!(top("PUSH 2\nPUSH 2\nPUSH -1\nADDMOD"), word(1));
    assert_eq!(top("PUSH 0\nPUSH 2\nPUSH 3\nADDMOD"), Word::ZERO);
    assert_eq!(top("PUSH 8\nPUSH 10\nPUSH 10\nMULMOD"), word(4));
    assert_eq!(top("PUSH 12\nPUSH -1\nPUSH -1\nMULMOD"), word(9));
    assert_eq!(top("PUSH 0\nPUSH 2\nPUSH 3\nMULMOD"), Word::ZERO);
}

#[test]
fn test_exp_by_zero_is_one() {
    assert_eq!(top("PUSH0\nPUSH 0\nEXP"), Word::ONE);
    assert_eq!(top("PUSH0\nPUSH -1\nEXP"), Word::ONE);
}

#[test]
fn test_signextend() {
    assert_eq!(top("PUSH 0xff\nPUSH 0\nSIGNEXTEND"), Word::MAX);
    assert_eq!(top("PUSH 0x7f\nPUSH 0\nSIGNEXTEND"), word(0x7f));
    assert_eq!(top("PUSH 0xff\nPUSH 31\nSIGNEXTEND"), word(0xff));
    assert_eq!(top("PUSH 0xff\nPUSH -1\nSIGNEXTEND"), word(0xff));
}

#[test]
fn test_signed_comparisons() {
    assert_eq!(top("PUSH 9\nPUSH -1\nSLT"), Word::ONE);
    assert_eq!(top("PUSH 9\nPUSH -1\nLT"), Word::ZERO);
    assert_eq!(top("PUSH -1\nPUSH 9\nSGT"), Word::ONE);
    assert_eq!(top("PUSH -1\nPUSH 9\nGT"), Word::ZERO);
    assert_eq!(top("PUSH 5\nPUSH 5\nSLT"), Word::ZERO);
}

#[test]
fn test_eq_compares_raw_words() {
    assert_eq!(top("PUSH 10\nPUSH 10\nEQ"), Word::ONE);
    assert_eq!(top("PUSH -1\nPUSH -1\nEQ"), Word::ONE);
    assert_eq!(top("PUSH 5\nPUSH -5\nEQ"), Word::ZERO);
}

#[test]
fn test_iszero() {
    assert_eq!(top("PUSH0\nISZERO"), Word::ONE);
    assert_eq!(top("PUSH 7\nISZERO"), Word::ZERO);
}

#[test]
fn test_pop() {
    let execution = run("PUSH 1\nPUSH 2\nPOP");
    assert!(execution.success());
    assert_eq!(execution.stack(), &[word(1)]);
}

#[test]
fn test_underflow_halts_with_stack_intact() {
    let execution = run("PUSH 1\nADD\nPUSH 2");
    assert!(!execution.success());
    assert_eq!(execution.stack(), &[word(1)]);
    assert_eq!(
        execution.error,
        Some(MachineError::StackUnderFlow { pc: 2, op: 0x01 })
    );
}

#[test]
fn test_underflow_on_ternary_op() {
    let execution = run("PUSH 1\nPUSH 2\nMULMOD");
    assert_eq!(execution.stack(), &[word(2), word(1)]);
    assert!(matches!(
        execution.error,
        Some(MachineError::StackUnderFlow { op: 0x09, .. })
    ));
}

#[test]
fn test_pop_on_empty_stack() {
    let (stack, success) = execute(&[0x50]);
    assert!(!success);
    assert!(stack.is_empty());
}

#[test]
fn test_overflow_halts() {
    let code = [0x5f, 0x5f, 0x5f];
    let execution = Machine::<2>::new(&code).run();
    assert_eq!(execution.error, Some(MachineError::StackOverflow { pc: 2 }));
    assert_eq!(execution.stack(), &[Word::ZERO, Word::ZERO]);
}

#[test]
fn test_execute_stack_limit() {
    let code = vec![0x5f; STACK_LIMIT];
    let (stack, success) = execute(&code);
    assert!(success);
    assert_eq!(stack.len(), STACK_LIMIT);

    let code = vec![0x5f; STACK_LIMIT + 1];
    let (stack, success) = execute(&code);
    assert!(!success);
    assert_eq!(stack.len(), STACK_LIMIT);
}

#[test]
fn test_unknown_opcode_is_rejected_by_default() {
    let execution = run("PUSH 1\n.byte 0xfe\nPUSH 2");
    assert!(!execution.success());
    assert_eq!(execution.stack(), &[word(1)]);
    assert_eq!(execution.error, Some(MachineError::InvalidOp { pc: 2, op: 0xfe }));
}

#[test]
fn test_unknown_opcode_can_be_ignored() {
    let code = assemble_code("PUSH 1\n.byte 0xfe 0x0c\nPUSH 2");
    let execution = Machine::<STACK_CAP>::new(&code)
        .with_unknown_ops(UnknownOps::Ignore)
        .run();
    assert!(execution.success());
    assert_eq!(execution.stack(), &[word(2), word(1)]);
}

#[test]
fn test_step_by_step() -> Result<(), MachineError> {
    let code = assemble_code("PUSH 4\nPUSH 5\nMUL\nSTOP\nPOP");
    let mut machine = Machine::<STACK_CAP>::new(&code);

    assert_eq!(machine.step()?, Step::Continue);
    assert_eq!(machine.pc(), 2);
    assert_eq!(machine.stack(), &[word(4)]);
    assert_eq!(machine.step()?, Step::Continue);
    assert_eq!(machine.step()?, Step::Continue);
    assert_eq!(machine.stack(), &[word(20)]);
    assert_eq!(machine.step()?, Step::Halted);
    assert!(machine.is_halted());
    assert_eq!(machine.step()?, Step::Halted);
    assert_eq!(machine.pc(), 6);
    Ok(())
}

#[test]
fn test_step_after_failure_stays_halted() {
    let mut machine = Machine::<STACK_CAP>::new(&[0x01, 0x5f]);
    assert!(machine.step().is_err());
    assert_eq!(machine.step(), Ok(Step::Halted));
    assert!(machine.stack().is_empty());
}

#[test]
fn test_opcode_table() {
    assert_eq!(Ops::try_from(0x0b), Ok(Ops::SignExtend));
    assert_eq!(Ops::try_from(0x5f), Ok(Ops::Push0));
    assert_eq!(Ops::try_from(0x60), Err(0x60));
    assert_eq!(Ops::try_from(0x0c), Err(0x0c));
    assert_eq!(Ops::from_mnemonic("addmod"), Some(Ops::AddMod));
    assert_eq!(Ops::from_mnemonic("PUSH1"), None);
    for byte in 0..=u8::MAX {
        if let Ok(op) = Ops::try_from(byte) {
            assert_eq!(u8::from(op), byte);
            assert_eq!(Ops::from_mnemonic(op.mnemonic()), Some(op));
        }
    }
}

#[test]
fn test_push_width() {
    assert_eq!(push_width(0x5f), None);
    assert_eq!(push_width(0x60), Some(1));
    assert_eq!(push_width(0x7f), Some(32));
    assert_eq!(push_width(0x80), None);
    assert_eq!(push_opcode(1), Some(0x60));
    assert_eq!(push_opcode(32), Some(0x7f));
    assert_eq!(push_opcode(0), None);
    assert_eq!(push_opcode(33), None);
}

#[test]
fn test_error_messages() {
    let err = MachineError::TruncatedPush { pc: 3, width: 2, available: 1 };
    assert_eq!(
        format!("{err}"),
        "PUSH2 at 3 needs 2 immediate bytes but only 1 remain"
    );
    let err = MachineError::InvalidOp { pc: 0, op: 0xfe };
    assert_eq!(format!("{err}"), "the value 0xfe at 0 is an invalid opcode");
    assert_eq!(err.pc(), 0);
}
