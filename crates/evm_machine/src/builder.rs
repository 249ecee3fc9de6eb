use super::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    #[error("the code buffer is too small")]
    BufferTooSmall,
    #[error("PUSH{0} is not a push instruction")]
    PushWidthOutOfRange(usize),
    #[error("value does not fit in {0} bytes")]
    ValueTooWide(usize),
}

/// A single instruction to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Code(Ops),
    /// Push using the narrowest encoding, PUSH0 for zero.
    Push(Word),
    /// Push with an explicit immediate width of 1 to 32 bytes.
    PushN { width: usize, value: Word },
    /// A byte emitted as is, whatever it decodes to.
    Raw(u8),
}

impl From<Ops> for Op {
    fn from(op: Ops) -> Self {
        Op::Code(op)
    }
}

/// Writes encoded instructions in to a caller supplied buffer.
pub struct CodeBuilder<'a> {
    buffer: &'a mut [u8],
    free: usize,
}

impl<'a> CodeBuilder<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, free: 0 }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.free
    }

    pub fn is_empty(&self) -> bool {
        self.free == 0
    }

    pub fn code(&self) -> &[u8] {
        self.buffer.get(..self.free).unwrap_or_default()
    }

    pub fn add_op(&mut self, op: Op) -> Result<(), BuilderError> {
        match op {
            Op::Code(op) => self.add_byte(op.into()),
            Op::Raw(byte) => self.add_byte(byte),
            Op::Push(value) => {
                let width = byte_width(value);
                if width == 0 {
                    self.add_byte(Ops::Push0.into())
                } else {
                    self.add_push(width, value)
                }
            }
            Op::PushN { width, value } => self.add_push(width, value),
        }
    }

    pub fn add_ops(&mut self, ops: &[Op]) -> Result<(), BuilderError> {
        for op in ops {
            self.add_op(*op)?;
        }
        Ok(())
    }

    /// Returns the length of the encoded code.
    pub fn finish(self) -> usize {
        self.free
    }

    fn add_push(&mut self, width: usize, value: Word) -> Result<(), BuilderError> {
        let opcode = push_opcode(width).ok_or(BuilderError::PushWidthOutOfRange(width))?;
        if byte_width(value) > width {
            return Err(BuilderError::ValueTooWide(width));
        }
        let bytes = value.to_be_bytes();
        let immediate = bytes
            .get(bytes.len().saturating_sub(width)..)
            .ok_or(BuilderError::ValueTooWide(width))?;

        let end = self
            .free
            .checked_add(1)
            .and_then(|start| start.checked_add(width))
            .ok_or(BuilderError::BufferTooSmall)?;
        if end > self.buffer.len() {
            return Err(BuilderError::BufferTooSmall);
        }
        self.add_byte(opcode)?;
        self.add_bytes(immediate)
    }

    fn add_byte(&mut self, byte: u8) -> Result<(), BuilderError> {
        let slot = self
            .buffer
            .get_mut(self.free)
            .ok_or(BuilderError::BufferTooSmall)?;
        *slot = byte;
        self.free = self.free.checked_add(1).ok_or(BuilderError::BufferTooSmall)?;
        Ok(())
    }

    fn add_bytes(&mut self, bytes: &[u8]) -> Result<(), BuilderError> {
        let end = self
            .free
            .checked_add(bytes.len())
            .ok_or(BuilderError::BufferTooSmall)?;
        let target = self
            .buffer
            .get_mut(self.free..end)
            .ok_or(BuilderError::BufferTooSmall)?;
        target.copy_from_slice(bytes);
        self.free = end;
        Ok(())
    }
}

/// Number of bytes needed to hold `value` big-endian, zero for zero.
pub fn byte_width(value: Word) -> usize {
    let bits = 256usize.saturating_sub(value.leading_zeros() as usize);
    bits.div_ceil(8)
}
