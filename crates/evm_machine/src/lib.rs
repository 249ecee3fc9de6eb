#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

use heapless::Vec;
use thiserror_no_std::Error;
use variant_count::VariantCount;

pub mod arithmetic;
pub mod assembler;
pub mod builder;


/// This module implements a stack machine over 256-bit words covering the
/// arithmetic, comparison and push subset of the Ethereum virtual machine.
///
/// A machine borrows a byte slice of code and owns a fixed capacity operand
/// stack. Each step decodes one opcode at the program counter, moves the
/// program counter past the opcode and any immediate bytes, and then applies
/// the opcode to the stack. Execution ends at `STOP`, at the end of the code,
/// or at the first failure. In every case the stack is handed back top first.
///
/// Binary operators pop `a` first and `b` second, so `SUB` computes `a - b`
/// where `a` was on top of the stack.
pub type Word = ethnum::U256;

/// Operand stack depth used by [`execute`].
pub const STACK_LIMIT: usize = 1024;

const PUSH1: u8 = 0x60;
const PUSH32: u8 = 0x7f;

/// Number of immediate bytes following `byte` when it is one of PUSH1..PUSH32.
pub fn push_width(byte: u8) -> Option<usize> {
    if (PUSH1..=PUSH32).contains(&byte) {
        Some(usize::from(byte.wrapping_sub(PUSH1).wrapping_add(1)))
    } else {
        None
    }
}

/// Opcode byte for the PUSHn instruction carrying `width` immediate bytes.
pub fn push_opcode(width: usize) -> Option<u8> {
    let width = u8::try_from(width).ok()?;
    if (1..=32).contains(&width) {
        Some(PUSH1.wrapping_add(width).wrapping_sub(1))
    } else {
        None
    }
}

#[repr(u8)] // Discriminant is the opcode byte
#[derive(VariantCount, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ops {
    Stop = 0x00,
    Add = 0x01,
    Mul = 0x02,
    Sub = 0x03,
    Div = 0x04,
    SDiv = 0x05,
    Mod = 0x06,
    SMod = 0x07,
    AddMod = 0x08,
    MulMod = 0x09,
    Exp = 0x0a,
    SignExtend = 0x0b,
    Lt = 0x10,
    Gt = 0x11,
    Slt = 0x12,
    Sgt = 0x13,
    Eq = 0x14,
    IsZero = 0x15,
    Pop = 0x50,
    Push0 = 0x5f,
}

const OPS: [Ops; Ops::VARIANT_COUNT] = [
    Ops::Stop,
    Ops::Add,
    Ops::Mul,
    Ops::Sub,
    Ops::Div,
    Ops::SDiv,
    Ops::Mod,
    Ops::SMod,
    Ops::AddMod,
    Ops::MulMod,
    Ops::Exp,
    Ops::SignExtend,
    Ops::Lt,
    Ops::Gt,
    Ops::Slt,
    Ops::Sgt,
    Ops::Eq,
    Ops::IsZero,
    Ops::Pop,
    Ops::Push0,
];

impl Ops {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Ops::Stop => "STOP",
            Ops::Add => "ADD",
            Ops::Mul => "MUL",
            Ops::Sub => "SUB",
            Ops::Div => "DIV",
            Ops::SDiv => "SDIV",
            Ops::Mod => "MOD",
            Ops::SMod => "SMOD",
            Ops::AddMod => "ADDMOD",
            Ops::MulMod => "MULMOD",
            Ops::Exp => "EXP",
            Ops::SignExtend => "SIGNEXTEND",
            Ops::Lt => "LT",
            Ops::Gt => "GT",
            Ops::Slt => "SLT",
            Ops::Sgt => "SGT",
            Ops::Eq => "EQ",
            Ops::IsZero => "ISZERO",
            Ops::Pop => "POP",
            Ops::Push0 => "PUSH0",
        }
    }

    /// Case-insensitive lookup by mnemonic.
    pub fn from_mnemonic(name: &str) -> Option<Ops> {
        OPS.iter()
            .copied()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(name))
    }

    /// How many words the opcode pops before producing its result.
    pub fn operand_count(self) -> usize {
        match self {
            Ops::Stop | Ops::Push0 => 0,
            Ops::IsZero | Ops::Pop => 1,
            Ops::AddMod | Ops::MulMod => 3,
            _ => 2,
        }
    }
}

impl From<Ops> for u8 {
    fn from(op: Ops) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Ops {
    type Error = u8;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        OPS.iter()
            .copied()
            .find(|op| u8::from(*op) == value)
            .ok_or(value)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    #[error("PUSH{width} at {pc} needs {width} immediate bytes but only {available} remain")]
    TruncatedPush { pc: usize, width: usize, available: usize },
    #[error("opcode {op:#04x} at {pc} would underflow the stack")]
    StackUnderFlow { pc: usize, op: u8 },
    #[error("opcode at {pc} would overflow the stack")]
    StackOverflow { pc: usize },
    #[error("the value {op:#04x} at {pc} is an invalid opcode")]
    InvalidOp { pc: usize, op: u8 },
}

impl MachineError {
    /// Offset of the opcode that stopped the machine.
    pub fn pc(&self) -> usize {
        match self {
            Self::TruncatedPush { pc, .. }
            | Self::StackUnderFlow { pc, .. }
            | Self::StackOverflow { pc }
            | Self::InvalidOp { pc, .. } => *pc,
        }
    }
}

/// What the machine does with a byte that is neither a known opcode nor a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownOps {
    /// Halt with [`MachineError::InvalidOp`].
    #[default]
    Reject,
    /// Skip the byte without touching the stack.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Halted,
}

/// Final state of a run.
#[derive(Debug, Clone)]
pub struct Execution<const STACK_SIZE: usize> {
    /// Stack contents, top of stack first.
    pub stack: Vec<Word, STACK_SIZE>,
    pub error: Option<MachineError>,
    pub pc: usize,
}

impl<const STACK_SIZE: usize> Execution<STACK_SIZE> {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    pub fn stack(&self) -> &[Word] {
        self.stack.as_slice()
    }

    pub fn top(&self) -> Option<&Word> {
        self.stack.first()
    }
}

/// Runs `code` on an empty stack and returns the stack top first together
/// with the success flag.
pub fn execute(code: &[u8]) -> (Vec<Word, STACK_LIMIT>, bool) {
    let execution = Machine::<STACK_LIMIT>::new(code).run();
    let success = execution.success();
    (execution.stack, success)
}

pub struct Machine<'a, const STACK_SIZE: usize> {
    code: &'a [u8],
    pc: usize,
    stack: Vec<Word, STACK_SIZE>,
    unknown_ops: UnknownOps,
    halted: bool,
}

impl<'a, const STACK_SIZE: usize> Machine<'a, STACK_SIZE> {
    pub fn new(code: &'a [u8]) -> Self {
        Self {
            code,
            pc: 0,
            stack: Vec::new(),
            unknown_ops: UnknownOps::default(),
            halted: false,
        }
    }

    pub fn with_unknown_ops(mut self, unknown_ops: UnknownOps) -> Self {
        self.unknown_ops = unknown_ops;
        self
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Current stack, bottom first.
    pub fn stack(&self) -> &[Word] {
        self.stack.as_slice()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Steps until the machine halts and returns the stack top first.
    pub fn run(mut self) -> Execution<STACK_SIZE> {
        let error = loop {
            match self.step() {
                Ok(Step::Continue) => continue,
                Ok(Step::Halted) => break None,
                Err(err) => {
                    #[cfg(feature = "step-tracing")]
                    tracing::debug!(pc = err.pc(), depth = self.stack.len(), error = %err, "machine halted abnormally");
                    break Some(err);
                }
            }
        };
        let mut stack = self.stack;
        stack.reverse();
        Execution {
            stack,
            error,
            pc: self.pc,
        }
    }

    /// Executes the instruction at the program counter.
    ///
    /// A failed step leaves the stack as it was before the instruction and
    /// halts the machine.
    pub fn step(&mut self) -> Result<Step, MachineError> {
        if self.halted {
            return Ok(Step::Halted);
        }
        let pc = self.pc;
        let Some(&byte) = self.code.get(pc) else {
            self.halted = true;
            return Ok(Step::Halted);
        };
        self.pc = next_pc(pc);
        let result = self.dispatch(pc, byte);
        if !matches!(result, Ok(Step::Continue)) {
            self.halted = true;
        }
        result
    }

    fn dispatch(&mut self, pc: usize, byte: u8) -> Result<Step, MachineError> {
        if let Some(width) = push_width(byte) {
            #[cfg(feature = "step-tracing")]
            tracing::trace!(pc, opcode = byte, width, depth = self.stack.len(), "executing push");
            let start = self.pc;
            let available = self.code.len().saturating_sub(start);
            let immediate = start
                .checked_add(width)
                .and_then(|end| self.code.get(start..end))
                .ok_or(MachineError::TruncatedPush { pc, width, available })?;
            let value = arithmetic::from_be_slice(immediate);
            self.push(pc, value)?;
            self.pc = start.saturating_add(width);
            return Ok(Step::Continue);
        }

        let op = match Ops::try_from(byte) {
            Ok(op) => op,
            Err(op) => {
                #[cfg(feature = "step-tracing")]
                tracing::trace!(pc, opcode = op, "unknown opcode");
                return match self.unknown_ops {
                    UnknownOps::Reject => Err(MachineError::InvalidOp { pc, op }),
                    UnknownOps::Ignore => Ok(Step::Continue),
                };
            }
        };

        #[cfg(feature = "step-tracing")]
        tracing::trace!(pc, opcode = op.mnemonic(), depth = self.stack.len(), "executing opcode");

        // Checked up front so a failing opcode leaves the stack untouched.
        if self.stack.len() < op.operand_count() {
            return Err(MachineError::StackUnderFlow { pc, op: byte });
        }

        match op {
            Ops::Stop => return Ok(Step::Halted),
            Ops::Add => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, a.wrapping_add(b))?;
            }
            Ops::Mul => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, a.wrapping_mul(b))?;
            }
            Ops::Sub => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, a.wrapping_sub(b))?;
            }
            Ops::Div => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, arithmetic::div(a, b))?;
            }
            Ops::SDiv => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, arithmetic::sdiv(a, b))?;
            }
            Ops::Mod => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, arithmetic::rem(a, b))?;
            }
            Ops::SMod => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, arithmetic::smod(a, b))?;
            }
            Ops::AddMod => {
                let (a, b, c) = self.pop3(pc, byte)?;
                self.push(pc, arithmetic::addmod(a, b, c))?;
            }
            Ops::MulMod => {
                let (a, b, c) = self.pop3(pc, byte)?;
                self.push(pc, arithmetic::mulmod(a, b, c))?;
            }
            Ops::Exp => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, arithmetic::exp(a, b))?;
            }
            Ops::SignExtend => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, arithmetic::signextend(a, b))?;
            }
            Ops::Lt => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, arithmetic::from_bool(a < b))?;
            }
            Ops::Gt => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, arithmetic::from_bool(a > b))?;
            }
            Ops::Slt => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, arithmetic::from_bool(arithmetic::normalize(a) < arithmetic::normalize(b)))?;
            }
            Ops::Sgt => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, arithmetic::from_bool(arithmetic::normalize(a) > arithmetic::normalize(b)))?;
            }
            Ops::Eq => {
                let (a, b) = self.pop2(pc, byte)?;
                self.push(pc, arithmetic::from_bool(a == b))?;
            }
            Ops::IsZero => {
                let a = self.pop(pc, byte)?;
                self.push(pc, arithmetic::from_bool(a == Word::ZERO))?;
            }
            Ops::Pop => {
                let _ = self.pop(pc, byte)?;
            }
            Ops::Push0 => {
                self.push(pc, Word::ZERO)?;
            }
        }

        Ok(Step::Continue)
    }

    fn pop(&mut self, pc: usize, op: u8) -> Result<Word, MachineError> {
        self.stack
            .pop()
            .ok_or(MachineError::StackUnderFlow { pc, op })
    }

    fn pop2(&mut self, pc: usize, op: u8) -> Result<(Word, Word), MachineError> {
        let a = self.pop(pc, op)?;
        let b = self.pop(pc, op)?;
        Ok((a, b))
    }

    fn pop3(&mut self, pc: usize, op: u8) -> Result<(Word, Word, Word), MachineError> {
        let (a, b) = self.pop2(pc, op)?;
        let c = self.pop(pc, op)?;
        Ok((a, b, c))
    }

    fn push(&mut self, pc: usize, value: Word) -> Result<(), MachineError> {
        if self.stack.push(value).is_err() {
            return Err(MachineError::StackOverflow { pc });
        }
        Ok(())
    }
}

fn next_pc(pc: usize) -> usize {
    // Code is a slice, so an in-bounds pc is always below usize::MAX.
    pc.saturating_add(1)
}

#[cfg(test)]
mod test;
