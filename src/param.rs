//! Parameter marshaling across the trust boundary
//!
//! A command carries four parameter slots. Each slot is a tagged sum type
//! ([`Param`]) so the tag can never drift from the content; the packed
//! 4-bit-per-slot tag word is still produced and checked at the boundary.

use crate::error::{TeeError, TeeResult};

/// Number of parameter slots per command
pub const PARAM_COUNT: usize = 4;

/// Wire tag of a parameter slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ParamType {
    None = 0x0,
    ValueInput = 0x1,
    ValueOutput = 0x2,
    ValueInout = 0x3,
    MemrefInput = 0x5,
    MemrefOutput = 0x6,
    MemrefInout = 0x7,
}

impl ParamType {
    pub fn is_value(&self) -> bool {
        matches!(self, ParamType::ValueInput | ParamType::ValueOutput | ParamType::ValueInout)
    }

    pub fn is_memref(&self) -> bool {
        matches!(
            self,
            ParamType::MemrefInput | ParamType::MemrefOutput | ParamType::MemrefInout
        )
    }
}

impl TryFrom<u32> for ParamType {
    type Error = TeeError;

    fn try_from(tag: u32) -> TeeResult<Self> {
        Ok(match tag {
            0x0 => ParamType::None,
            0x1 => ParamType::ValueInput,
            0x2 => ParamType::ValueOutput,
            0x3 => ParamType::ValueInout,
            0x5 => ParamType::MemrefInput,
            0x6 => ParamType::MemrefOutput,
            0x7 => ParamType::MemrefInout,
            _ => return Err(TeeError::BadParameters),
        })
    }
}

/// Pack four slot tags, slot 0 in the low nibble.
pub const fn encode_types(t0: u32, t1: u32, t2: u32, t3: u32) -> u32 {
    (t3 & 0xF) << 12 | (t2 & 0xF) << 8 | (t1 & 0xF) << 4 | (t0 & 0xF)
}

/// Extract slot `index`'s raw nibble from a tag word.
pub const fn decode_type(types: u32, index: usize) -> u32 {
    (types >> (4 * index as u32)) & 0x0F
}

/// Pack four typed tags into a tag word
pub const fn param_types(t0: ParamType, t1: ParamType, t2: ParamType, t3: ParamType) -> u32 {
    encode_types(t0 as u32, t1 as u32, t2 as u32, t3 as u32)
}

/// Expected slot types of a command
pub type ParamShape = [ParamType; PARAM_COUNT];

/// Decode and validate a whole tag word
pub fn decode_types(types: u32) -> TeeResult<ParamShape> {
    if types >> 16 != 0 {
        return Err(TeeError::BadParameters);
    }
    Ok([
        ParamType::try_from(decode_type(types, 0))?,
        ParamType::try_from(decode_type(types, 1))?,
        ParamType::try_from(decode_type(types, 2))?,
        ParamType::try_from(decode_type(types, 3))?,
    ])
}

/// Data flow direction of a slot, seen from the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    Inout,
}

impl Direction {
    fn readable(&self) -> bool {
        matches!(self, Direction::Input | Direction::Inout)
    }

    fn writable(&self) -> bool {
        matches!(self, Direction::Output | Direction::Inout)
    }
}

/// One parameter slot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Param {
    #[default]
    None,
    Value { dir: Direction, a: u32, b: u32 },
    /// `buffer == None` models a null pointer. `size` is the declared extent
    /// on the way in and the produced (or required) extent on the way out.
    MemRef { dir: Direction, buffer: Option<Vec<u8>>, size: usize },
}

impl Param {
    pub fn value_input(a: u32, b: u32) -> Self {
        Param::Value { dir: Direction::Input, a, b }
    }

    pub fn value_output() -> Self {
        Param::Value { dir: Direction::Output, a: 0, b: 0 }
    }

    pub fn value_inout(a: u32, b: u32) -> Self {
        Param::Value { dir: Direction::Inout, a, b }
    }

    pub fn memref_input(data: impl Into<Vec<u8>>) -> Self {
        let buffer = data.into();
        let size = buffer.len();
        Param::MemRef { dir: Direction::Input, buffer: Some(buffer), size }
    }

    /// Output buffer with room for `capacity` bytes
    pub fn memref_output(capacity: usize) -> Self {
        Param::MemRef {
            dir: Direction::Output,
            buffer: Some(vec![0u8; capacity]),
            size: capacity,
        }
    }

    /// In/out buffer carrying `data`, with at least `capacity` bytes of room
    pub fn memref_inout(data: &[u8], capacity: usize) -> Self {
        let mut buffer = data.to_vec();
        buffer.resize(capacity.max(data.len()), 0);
        let size = buffer.len();
        Param::MemRef { dir: Direction::Inout, buffer: Some(buffer), size }
    }

    /// A memref whose pointer is null
    pub fn null_memref(dir: Direction, size: usize) -> Self {
        Param::MemRef { dir, buffer: None, size }
    }

    pub fn param_type(&self) -> ParamType {
        match self {
            Param::None => ParamType::None,
            Param::Value { dir: Direction::Input, .. } => ParamType::ValueInput,
            Param::Value { dir: Direction::Output, .. } => ParamType::ValueOutput,
            Param::Value { dir: Direction::Inout, .. } => ParamType::ValueInout,
            Param::MemRef { dir: Direction::Input, .. } => ParamType::MemrefInput,
            Param::MemRef { dir: Direction::Output, .. } => ParamType::MemrefOutput,
            Param::MemRef { dir: Direction::Inout, .. } => ParamType::MemrefInout,
        }
    }

    /// Structural check of a memref: zero-length is fine, null with a
    /// nonzero length is not, and the declared size must fit the buffer.
    pub fn check(&self) -> TeeResult<()> {
        match self {
            Param::MemRef { buffer: None, size, .. } if *size > 0 => Err(TeeError::BadParameters),
            Param::MemRef { buffer: Some(buf), size, .. } if *size > buf.len() => {
                Err(TeeError::BadParameters)
            }
            _ => Ok(()),
        }
    }

    /// Integer pair of a readable value slot
    pub fn value(&self) -> TeeResult<(u32, u32)> {
        match self {
            Param::Value { dir, a, b } if dir.readable() => Ok((*a, *b)),
            _ => Err(TeeError::BadParameters),
        }
    }

    pub fn set_value(&mut self, new_a: u32, new_b: u32) -> TeeResult<()> {
        match self {
            Param::Value { dir, a, b } if dir.writable() => {
                *a = new_a;
                *b = new_b;
                Ok(())
            }
            _ => Err(TeeError::BadParameters),
        }
    }

    /// Bytes of a readable memref slot
    pub fn input_bytes(&self) -> TeeResult<&[u8]> {
        self.check()?;
        match self {
            Param::MemRef { dir, buffer, size } if dir.readable() => {
                Ok(buffer.as_deref().map(|b| &b[..*size]).unwrap_or(&[]))
            }
            _ => Err(TeeError::BadParameters),
        }
    }

    /// Write `data` into a writable memref. When it does not fit, the size
    /// is set to the required length and `ShortBuffer` is returned.
    pub fn write_output(&mut self, data: &[u8]) -> TeeResult<()> {
        self.check()?;
        match self {
            Param::MemRef { dir, buffer, size } if dir.writable() => {
                let capacity = buffer.as_ref().map(|b| (*size).min(b.len())).unwrap_or(0);
                if data.len() > capacity {
                    *size = data.len();
                    return Err(TeeError::ShortBuffer { required: data.len() });
                }
                if let Some(buf) = buffer.as_mut() {
                    buf[..data.len()].copy_from_slice(data);
                }
                *size = data.len();
                Ok(())
            }
            _ => Err(TeeError::BadParameters),
        }
    }

    /// Report `required` bytes back through a memref's size
    pub fn set_required(&mut self, required: usize) {
        if let Param::MemRef { size, .. } = self {
            *size = required;
        }
    }

    /// Usable room of a writable memref
    pub fn capacity(&self) -> usize {
        match self {
            Param::MemRef { dir, buffer: Some(buf), size } if dir.writable() => (*size).min(buf.len()),
            _ => 0,
        }
    }

    /// Bytes the callee produced in a memref slot
    pub fn output_bytes(&self) -> Option<&[u8]> {
        match self {
            Param::MemRef { buffer: Some(buf), size, .. } => buf.get(..*size),
            Param::MemRef { buffer: None, .. } => Some(&[][..]),
            _ => None,
        }
    }

    pub fn size(&self) -> Option<usize> {
        match self {
            Param::MemRef { size, .. } => Some(*size),
            _ => None,
        }
    }
}

/// The four-slot parameter vector of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(pub [Param; PARAM_COUNT]);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, index: usize, param: Param) -> Self {
        self.0[index] = param;
        self
    }

    /// Tag word describing the current contents
    pub fn param_types(&self) -> u32 {
        encode_types(
            self.0[0].param_type() as u32,
            self.0[1].param_type() as u32,
            self.0[2].param_type() as u32,
            self.0[3].param_type() as u32,
        )
    }

    /// Check the caller's declared tag word against the command's expected
    /// shape and against what each slot actually carries.
    pub fn check_shape(&self, declared: u32, expected: &ParamShape) -> TeeResult<()> {
        let declared = decode_types(declared)?;
        for (i, param) in self.0.iter().enumerate() {
            if declared[i] != expected[i] || param.param_type() != declared[i] {
                log::debug!(
                    "param slot {} rejected: declared={:?} expected={:?} carried={:?}",
                    i,
                    declared[i],
                    expected[i],
                    param.param_type()
                );
                return Err(TeeError::BadParameters);
            }
            param.check()?;
        }
        Ok(())
    }
}

impl std::ops::Index<usize> for Params {
    type Output = Param;

    fn index(&self, index: usize) -> &Param {
        &self.0[index]
    }
}

impl std::ops::IndexMut<usize> for Params {
    fn index_mut(&mut self, index: usize) -> &mut Param {
        &mut self.0[index]
    }
}
