// Line oriented assembler for machine code.
//
//     PUSH1 0x01      ; explicit immediate width
//     PUSH 300        ; narrowest width that holds the value
//     PUSH -1         ; negative values are two's complement
//     ADD
//     .byte 0x60      ; raw bytes, for code no mnemonic can express

use heapless::Vec;

use crate::builder::{BuilderError, CodeBuilder, Op};
use crate::{Ops, Word};

// `.byte` plus one full PUSH32 worth of bytes and then some.
const MAX_TOKENS: usize = 40;

#[derive(Debug)]
pub enum AssemblerError {
    Kind(AssemblerErrorKind),
    WithLine { line: u32, kind: AssemblerErrorKind },
}

impl AssemblerError {
    fn with_line(self, line: u32) -> Self {
        match self {
            AssemblerError::WithLine { .. } => self,
            AssemblerError::Kind(kind) => AssemblerError::WithLine { line, kind },
        }
    }

    pub fn line_number(&self) -> Option<u32> {
        match self {
            Self::Kind(_) => None,
            Self::WithLine { line, .. } => Some(*line),
        }
    }

    pub fn error_kind(&self) -> &AssemblerErrorKind {
        match self {
            Self::Kind(kind) => kind,
            Self::WithLine { kind, .. } => kind,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AssemblerErrorKind {
    TooManyTokens,
    InvalidDirective,
    InvalidInstruction,
    InvalidNumber,
    MissingOperand,
    UnexpectedOperand,
    LineNumberOverflow,
    Builder(BuilderError),
}

impl From<BuilderError> for AssemblerError {
    fn from(err: BuilderError) -> Self {
        AssemblerError::Kind(AssemblerErrorKind::Builder(err))
    }
}

impl From<AssemblerErrorKind> for AssemblerError {
    fn from(kind: AssemblerErrorKind) -> Self {
        AssemblerError::Kind(kind)
    }
}

pub struct Assembler<'a> {
    builder: CodeBuilder<'a>,
    line_number: u32,
}

impl<'a> Assembler<'a> {
    pub fn new(builder: CodeBuilder<'a>) -> Self {
        Self {
            builder,
            line_number: 0,
        }
    }

    pub fn add_line(&mut self, line: &str) -> Result<(), AssemblerError> {
        self.line_number = self
            .line_number
            .checked_add(1)
            .ok_or(AssemblerError::Kind(AssemblerErrorKind::LineNumberOverflow))?;
        let line_number = self.line_number;
        let line = strip_comment(line).trim();
        if line.is_empty() {
            return Ok(());
        }

        let mut tokens: Vec<&str, MAX_TOKENS> = Vec::new();
        for token in line.split_whitespace() {
            tokens.push(token).map_err(|_| {
                AssemblerError::Kind(AssemblerErrorKind::TooManyTokens).with_line(line_number)
            })?;
        }

        self.handle_tokens(&tokens)
            .map_err(|err| err.with_line(line_number))
    }

    /// Returns the length of the assembled code.
    pub fn finish(self) -> usize {
        self.builder.finish()
    }

    fn handle_tokens(&mut self, tokens: &[&str]) -> Result<(), AssemblerError> {
        let Some((first, operands)) = tokens.split_first() else {
            return Ok(());
        };
        if first.starts_with('.') {
            return self.handle_directive(first, operands);
        }
        let op = parse_op(first, operands)?;
        self.builder.add_op(op)?;
        Ok(())
    }

    fn handle_directive(&mut self, directive: &str, operands: &[&str]) -> Result<(), AssemblerError> {
        if !directive.eq_ignore_ascii_case(".byte") {
            return Err(AssemblerErrorKind::InvalidDirective.into());
        }
        if operands.is_empty() {
            return Err(AssemblerErrorKind::MissingOperand.into());
        }
        for token in operands {
            let value = parse_word(token)?;
            if value > Word::from(u8::MAX) {
                return Err(AssemblerErrorKind::InvalidNumber.into());
            }
            let (_, low) = value.into_words();
            self.builder.add_op(Op::Raw(low as u8))?;
        }
        Ok(())
    }
}

/// Assembles `source` in to `buffer` and returns the code length.
pub fn assemble(source: &str, buffer: &mut [u8]) -> Result<usize, AssemblerError> {
    let mut assembler = Assembler::new(CodeBuilder::new(buffer));
    for line in source.lines() {
        assembler.add_line(line)?;
    }
    Ok(assembler.finish())
}

fn parse_op(mnemonic: &str, operands: &[&str]) -> Result<Op, AssemblerError> {
    if mnemonic.eq_ignore_ascii_case("PUSH") {
        return Ok(Op::Push(single_operand(operands)?));
    }
    if let Some(width) = push_width_suffix(mnemonic) {
        return Ok(Op::PushN {
            width,
            value: single_operand(operands)?,
        });
    }
    let op = Ops::from_mnemonic(mnemonic).ok_or(AssemblerErrorKind::InvalidInstruction)?;
    if !operands.is_empty() {
        return Err(AssemblerErrorKind::UnexpectedOperand.into());
    }
    Ok(Op::Code(op))
}

// `PUSH<n>` for n in 1..=32; `PUSH0` is a plain opcode.
fn push_width_suffix(mnemonic: &str) -> Option<usize> {
    let prefix = mnemonic.get(..4)?;
    if !prefix.eq_ignore_ascii_case("PUSH") {
        return None;
    }
    let width = mnemonic.get(4..)?.parse::<usize>().ok()?;
    (1..=32).contains(&width).then_some(width)
}

fn single_operand(operands: &[&str]) -> Result<Word, AssemblerError> {
    match operands {
        [] => Err(AssemblerErrorKind::MissingOperand.into()),
        [token] => parse_word(token),
        _ => Err(AssemblerErrorKind::UnexpectedOperand.into()),
    }
}

fn parse_word(token: &str) -> Result<Word, AssemblerError> {
    if let Some(magnitude) = token.strip_prefix('-') {
        return Ok(Word::ZERO.wrapping_sub(parse_unsigned(magnitude)?));
    }
    parse_unsigned(token)
}

fn parse_unsigned(token: &str) -> Result<Word, AssemblerError> {
    let parsed = match token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        Some(hex) => Word::from_str_radix(hex, 16),
        None => Word::from_str_radix(token, 10),
    };
    parsed.map_err(|_| AssemblerError::Kind(AssemblerErrorKind::InvalidNumber))
}

fn strip_comment(line: &str) -> &str {
    match line.split(';').next() {
        Some(part) => part,
        None => line,
    }
}
