//! Minimal SPIR-V module decoder.
//!
//! Only the instructions reflection needs are interpreted: entry points,
//! decorations, type declarations, integer constants and global variables.
//! Everything else is skipped by word count.

use crate::error::{ReloadError, Result};
use std::collections::HashMap;

pub(crate) const MAGIC: u32 = 0x0723_0203;
const HEADER_WORDS: usize = 5;
const MAX_TYPE_DEPTH: u32 = 64;

pub(crate) mod op {
    pub const ENTRY_POINT: u32 = 15;
    pub const TYPE_VOID: u32 = 19;
    pub const TYPE_BOOL: u32 = 20;
    pub const TYPE_INT: u32 = 21;
    pub const TYPE_FLOAT: u32 = 22;
    pub const TYPE_VECTOR: u32 = 23;
    pub const TYPE_MATRIX: u32 = 24;
    pub const TYPE_IMAGE: u32 = 25;
    pub const TYPE_SAMPLER: u32 = 26;
    pub const TYPE_SAMPLED_IMAGE: u32 = 27;
    pub const TYPE_ARRAY: u32 = 28;
    pub const TYPE_RUNTIME_ARRAY: u32 = 29;
    pub const TYPE_STRUCT: u32 = 30;
    pub const TYPE_POINTER: u32 = 32;
    pub const TYPE_RAY_QUERY: u32 = 4472;
    pub const TYPE_ACCELERATION_STRUCTURE: u32 = 5341;
    pub const CONSTANT: u32 = 43;
    pub const VARIABLE: u32 = 59;
    pub const DECORATE: u32 = 71;
    pub const MEMBER_DECORATE: u32 = 72;
}

pub(crate) mod decoration {
    pub const BLOCK: u32 = 2;
    pub const BUFFER_BLOCK: u32 = 3;
    pub const ARRAY_STRIDE: u32 = 6;
    pub const MATRIX_STRIDE: u32 = 7;
    pub const BUILT_IN: u32 = 11;
    pub const LOCATION: u32 = 30;
    pub const BINDING: u32 = 33;
    pub const DESCRIPTOR_SET: u32 = 34;
    pub const OFFSET: u32 = 35;
}

pub(crate) mod storage_class {
    pub const UNIFORM_CONSTANT: u32 = 0;
    pub const INPUT: u32 = 1;
    pub const UNIFORM: u32 = 2;
    pub const PUSH_CONSTANT: u32 = 9;
    pub const STORAGE_BUFFER: u32 = 12;
}

pub(crate) mod execution_model {
    pub const VERTEX: u32 = 0;
}

pub(crate) mod dim {
    pub const BUFFER: u32 = 5;
    pub const SUBPASS_DATA: u32 = 6;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Type {
    Void,
    Bool,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, count: u32 },
    Image { dim: u32, sampled: u32 },
    Sampler,
    SampledImage,
    Array { element: u32, length: u32 },
    RuntimeArray { element: u32 },
    Struct { members: Vec<u32> },
    Pointer { storage_class: u32, pointee: u32 },
    /// Declared but irrelevant to reflection, e.g. acceleration structures.
    Opaque(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Decorations {
    pub location: Option<u32>,
    pub binding: Option<u32>,
    pub set: Option<u32>,
    pub array_stride: Option<u32>,
    pub builtin: bool,
    pub block: bool,
    pub buffer_block: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct MemberDecorations {
    pub offset: Option<u32>,
    pub matrix_stride: Option<u32>,
    pub builtin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntryPoint {
    pub execution_model: u32,
    pub name: String,
    pub interface: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Variable {
    pub id: u32,
    pub pointer_type: u32,
    pub storage_class: u32,
}

/// The declarations of a SPIR-V module, indexed by result id.
#[derive(Debug, Default)]
pub(crate) struct SpirvModule {
    pub entry_points: Vec<EntryPoint>,
    pub variables: Vec<Variable>,
    types: HashMap<u32, Type>,
    constants: HashMap<u32, u32>,
    decorations: HashMap<u32, Decorations>,
    member_decorations: HashMap<(u32, u32), MemberDecorations>,
}

fn malformed(message: impl Into<String>) -> ReloadError {
    ReloadError::MalformedBinary(message.into())
}

fn operand(operands: &[u32], index: usize, opcode: u32) -> Result<u32> {
    operands
        .get(index)
        .copied()
        .ok_or_else(|| malformed(format!("opcode {opcode} is missing operand {index}")))
}

/// Decodes a nul-terminated literal string, returning it and the number of
/// words it occupied.
pub(crate) fn decode_string(words: &[u32]) -> Result<(String, usize)> {
    let mut bytes = Vec::new();
    for (index, word) in words.iter().enumerate() {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                let text = String::from_utf8(bytes)
                    .map_err(|_| malformed("literal string is not UTF-8"))?;
                return Ok((text, index + 1));
            }
            bytes.push(byte);
        }
    }
    Err(malformed("unterminated literal string"))
}

impl SpirvModule {
    pub fn parse(words: &[u32]) -> Result<Self> {
        if words.len() < HEADER_WORDS {
            return Err(malformed(format!(
                "{} words is shorter than the module header",
                words.len()
            )));
        }
        if words[0] != MAGIC {
            return Err(malformed(format!("bad magic number {:#010x}", words[0])));
        }

        let mut module = Self::default();
        let mut cursor = HEADER_WORDS;
        while cursor < words.len() {
            let first = words[cursor];
            let word_count = (first >> 16) as usize;
            let opcode = first & 0xffff;
            if word_count == 0 || cursor + word_count > words.len() {
                return Err(malformed(format!(
                    "instruction at word {cursor} overruns the module"
                )));
            }
            module.record(opcode, &words[cursor + 1..cursor + word_count])?;
            cursor += word_count;
        }
        Ok(module)
    }

    fn record(&mut self, opcode: u32, operands: &[u32]) -> Result<()> {
        let arg = |index| operand(operands, index, opcode);
        match opcode {
            op::ENTRY_POINT => {
                let (name, name_words) = decode_string(operands.get(2..).unwrap_or_default())?;
                self.entry_points.push(EntryPoint {
                    execution_model: arg(0)?,
                    name,
                    interface: operands[2 + name_words..].to_vec(),
                });
            }
            op::TYPE_VOID => self.declare(arg(0)?, Type::Void),
            op::TYPE_BOOL => self.declare(arg(0)?, Type::Bool),
            op::TYPE_INT => self.declare(
                arg(0)?,
                Type::Int {
                    width: arg(1)?,
                    signed: arg(2)? != 0,
                },
            ),
            op::TYPE_FLOAT => self.declare(arg(0)?, Type::Float { width: arg(1)? }),
            op::TYPE_VECTOR => self.declare(
                arg(0)?,
                Type::Vector {
                    component: arg(1)?,
                    count: arg(2)?,
                },
            ),
            op::TYPE_MATRIX => self.declare(
                arg(0)?,
                Type::Matrix {
                    column: arg(1)?,
                    count: arg(2)?,
                },
            ),
            op::TYPE_IMAGE => self.declare(
                arg(0)?,
                Type::Image {
                    dim: arg(2)?,
                    sampled: arg(6)?,
                },
            ),
            op::TYPE_SAMPLER => self.declare(arg(0)?, Type::Sampler),
            op::TYPE_SAMPLED_IMAGE => self.declare(arg(0)?, Type::SampledImage),
            op::TYPE_ARRAY => {
                let length_id = arg(2)?;
                let length = self
                    .constants
                    .get(&length_id)
                    .copied()
                    .ok_or_else(|| malformed(format!("array length %{length_id} is not a constant")))?;
                self.declare(
                    arg(0)?,
                    Type::Array {
                        element: arg(1)?,
                        length,
                    },
                );
            }
            op::TYPE_RUNTIME_ARRAY => {
                self.declare(arg(0)?, Type::RuntimeArray { element: arg(1)? })
            }
            op::TYPE_STRUCT => self.declare(
                arg(0)?,
                Type::Struct {
                    members: operands.get(1..).unwrap_or_default().to_vec(),
                },
            ),
            op::TYPE_POINTER => self.declare(
                arg(0)?,
                Type::Pointer {
                    storage_class: arg(1)?,
                    pointee: arg(2)?,
                },
            ),
            op::TYPE_RAY_QUERY | op::TYPE_ACCELERATION_STRUCTURE => {
                self.declare(arg(0)?, Type::Opaque(opcode))
            }
            op::CONSTANT => {
                self.constants.insert(arg(1)?, arg(2)?);
            }
            op::VARIABLE => self.variables.push(Variable {
                pointer_type: arg(0)?,
                id: arg(1)?,
                storage_class: arg(2)?,
            }),
            op::DECORATE => {
                let target = arg(0)?;
                let value = operands.get(2).copied();
                let entry = self.decorations.entry(target).or_default();
                match arg(1)? {
                    decoration::BLOCK => entry.block = true,
                    decoration::BUFFER_BLOCK => entry.buffer_block = true,
                    decoration::BUILT_IN => entry.builtin = true,
                    decoration::LOCATION => entry.location = value,
                    decoration::BINDING => entry.binding = value,
                    decoration::DESCRIPTOR_SET => entry.set = value,
                    decoration::ARRAY_STRIDE => entry.array_stride = value,
                    _ => {}
                }
            }
            op::MEMBER_DECORATE => {
                let key = (arg(0)?, arg(1)?);
                let value = operands.get(3).copied();
                let entry = self.member_decorations.entry(key).or_default();
                match arg(2)? {
                    decoration::OFFSET => entry.offset = value,
                    decoration::MATRIX_STRIDE => entry.matrix_stride = value,
                    decoration::BUILT_IN => entry.builtin = true,
                    _ => {}
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn declare(&mut self, id: u32, ty: Type) {
        self.types.insert(id, ty);
    }

    pub fn ty(&self, id: u32) -> Result<&Type> {
        self.types
            .get(&id)
            .ok_or_else(|| malformed(format!("reference to undeclared type %{id}")))
    }

    pub fn decorations(&self, id: u32) -> Decorations {
        self.decorations.get(&id).copied().unwrap_or_default()
    }

    pub fn member_decorations(&self, struct_id: u32, member: u32) -> MemberDecorations {
        self.member_decorations
            .get(&(struct_id, member))
            .copied()
            .unwrap_or_default()
    }

    pub fn variable(&self, id: u32) -> Option<&Variable> {
        self.variables.iter().find(|v| v.id == id)
    }

    /// Type id a variable points at.
    pub fn pointee(&self, variable: &Variable) -> Result<u32> {
        match self.ty(variable.pointer_type)? {
            Type::Pointer { pointee, .. } => Ok(*pointee),
            other => Err(malformed(format!(
                "variable %{} has non-pointer type {other:?}",
                variable.id
            ))),
        }
    }

    /// Strips array wrappers, returning the element type id and the total
    /// element count. Runtime arrays count as one.
    pub fn unwrap_arrays(&self, mut id: u32) -> Result<(u32, u32)> {
        let mut count = 1u32;
        loop {
            match self.ty(id)? {
                Type::Array { element, length } => {
                    count = count.saturating_mul(*length);
                    id = *element;
                }
                Type::RuntimeArray { element } => id = *element,
                _ => return Ok((id, count)),
            }
        }
    }

    /// Byte size of a type under its explicit layout decorations.
    ///
    /// Structs measure to the end of their furthest member; runtime arrays
    /// contribute nothing.
    pub fn size_of(&self, id: u32) -> Result<u32> {
        self.size_at_depth(id, 0)
    }

    fn size_at_depth(&self, id: u32, depth: u32) -> Result<u32> {
        if depth > MAX_TYPE_DEPTH {
            return Err(malformed(format!(
                "type %{id} nests deeper than {MAX_TYPE_DEPTH}"
            )));
        }
        let inner = |id| self.size_at_depth(id, depth + 1);
        Ok(match self.ty(id)? {
            Type::Bool => 4,
            Type::Int { width, .. } | Type::Float { width } => width / 8,
            Type::Vector { component, count } => checked_mul(inner(*component)?, *count, id)?,
            Type::Matrix { column, count } => checked_mul(inner(*column)?, *count, id)?,
            Type::Array { element, length } => {
                let stride = match self.decorations(id).array_stride {
                    Some(stride) => stride,
                    None => inner(*element)?,
                };
                checked_mul(stride, *length, id)?
            }
            Type::RuntimeArray { .. } => 0,
            Type::Pointer { .. } => 8,
            Type::Struct { members } => {
                let mut end = 0;
                let mut packed = 0;
                for (index, member) in members.iter().enumerate() {
                    let layout = self.member_decorations(id, index as u32);
                    let offset = layout.offset.unwrap_or(packed);
                    let size = match (self.ty(*member)?, layout.matrix_stride) {
                        (Type::Matrix { count, .. }, Some(stride)) => {
                            checked_mul(stride, *count, id)?
                        }
                        _ => inner(*member)?,
                    };
                    packed = offset
                        .checked_add(size)
                        .ok_or_else(|| malformed(format!("struct %{id} overflows u32")))?;
                    end = end.max(packed);
                }
                end
            }
            Type::Void
            | Type::Image { .. }
            | Type::Sampler
            | Type::SampledImage
            | Type::Opaque(_) => 0,
        })
    }
}

fn checked_mul(a: u32, b: u32, id: u32) -> Result<u32> {
    a.checked_mul(b)
        .ok_or_else(|| malformed(format!("size of type %{id} overflows u32")))
}
