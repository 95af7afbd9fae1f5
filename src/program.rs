//! Program representation and bytecode image serialization.
//!
//! A [`Program`] bundles the instruction sequence with its tables map (the
//! shared label / entry-point symbol table). The on-disk image is
//! little-endian throughout:
//!
//! ```text
//! magic:        'V' 'M' 'C' 0x01
//! num_tables:   u32
//! tables:       num_tables x { keylen: u32 (includes NUL); key bytes; value: i64 }
//! num_instrs:   u32
//! instrs:       num_instrs x { size: u32; payload }
//!   payload ::= opcode: u8
//!               argc:   u8
//!               argc x { is_reg: u8; datalen: u32; data }
//! ```
//!
//! Table references carry no flag byte on disk; their payload is the bare
//! symbol name, and the loader re-tags any non-register value whose payload
//! names a table entry. String immediates always end in NUL, so they are
//! never captured by that rule.

use crate::errors::VmError;
use crate::isa::OpCode;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, read_bytes};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use vmasm_derive::BinaryCodec;

/// Magic bytes identifying a serialized image.
const MAGIC: [u8; 3] = *b"VMC";

/// Current image format version.
const FORMAT_VERSION: u8 = 0x01;

/// Fixed four-byte image header.
#[derive(Debug, PartialEq, Eq, BinaryCodec)]
struct ImageHeader {
    magic: [u8; 3],
    version: u8,
}

/// A decoded instruction: opcode plus its ordered operand list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub code: OpCode,
    pub args: Vec<Value>,
}

impl Instruction {
    /// Creates an instruction from an opcode and its operands.
    pub fn new(code: OpCode, args: Vec<Value>) -> Self {
        Self { code, args }
    }
}

/// A compiled program: the instruction sequence plus the tables map.
///
/// The tables map holds both label bindings and `#table` entry points; a
/// `BTreeMap` keeps serialization and disassembly deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub tables: BTreeMap<String, i64>,
}

fn decode_error(reason: impl Into<String>) -> VmError {
    VmError::DecodeError {
        reason: reason.into(),
    }
}

/// Writes a u32 length prefix followed by the bytes themselves.
fn write_sized<S: EncodeSink>(out: &mut S, bytes: &[u8]) {
    (bytes.len() as u32).encode(out);
    out.write(bytes);
}

/// Reads a u32 length prefix and that many bytes.
fn read_sized<'a>(input: &mut &'a [u8]) -> Result<&'a [u8], DecodeError> {
    let len = u32::decode(input)? as usize;
    read_bytes(input, len)
}

impl Encode for Value {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (self.is_reg() as u8).encode(out);
        write_sized(out, self.raw());
    }
}

impl Decode for Value {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let is_reg = u8::decode(input)? != 0;
        let data = read_sized(input)?;

        if is_reg {
            if data.len() != 1 {
                return Err(DecodeError::InvalidValue);
            }
            return Ok(Value::Register(data[0]));
        }
        Ok(Value::Immediate(data.to_vec()))
    }
}

impl Encode for Instruction {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (self.code as u8).encode(out);
        (self.args.len() as u8).encode(out);
        for arg in &self.args {
            arg.encode(out);
        }
    }
}

impl Decode for Instruction {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let code = OpCode::try_from(u8::decode(input)?).map_err(|_| DecodeError::InvalidValue)?;
        let argc = u8::decode(input)?;

        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(Value::decode(input)?);
        }
        Ok(Instruction { code, args })
    }
}

impl Encode for Program {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        ImageHeader {
            magic: MAGIC,
            version: FORMAT_VERSION,
        }
        .encode(out);

        (self.tables.len() as u32).encode(out);
        for (name, index) in &self.tables {
            let mut key = Vec::with_capacity(name.len() + 1);
            key.extend_from_slice(name.as_bytes());
            key.push(0);
            write_sized(out, &key);
            index.encode(out);
        }

        (self.instructions.len() as u32).encode(out);
        for instr in &self.instructions {
            write_sized(out, &Encode::to_bytes(instr));
        }
    }
}

impl Program {
    /// Serializes the program to a portable binary image.
    pub fn to_bytes(&self) -> Vec<u8> {
        Encode::to_bytes(self)
    }

    /// Deserializes a program from its binary image.
    ///
    /// Validates the magic header and version, then recovers table-reference
    /// tags by name lookup.
    pub fn from_bytes(data: &[u8]) -> Result<Self, VmError> {
        let mut input = data;

        let header =
            ImageHeader::decode(&mut input).map_err(|_| decode_error("truncated header"))?;
        if header.magic != MAGIC {
            return Err(decode_error("bad magic"));
        }
        if header.version != FORMAT_VERSION {
            return Err(decode_error("unsupported version"));
        }

        let num_tables = u32::decode(&mut input)?;
        let mut tables = BTreeMap::new();
        for _ in 0..num_tables {
            let key = read_sized(&mut input)?;
            let end = key.iter().position(|&b| b == 0).unwrap_or(key.len());
            let name = std::str::from_utf8(&key[..end])
                .map_err(|_| decode_error("table name is not valid UTF-8"))?;
            let index = i64::decode(&mut input)?;
            tables.insert(name.to_string(), index);
        }

        let num_instructions = u32::decode(&mut input)?;
        let mut instructions = Vec::new();
        for _ in 0..num_instructions {
            let mut record = read_sized(&mut input)?;
            let instr = Instruction::decode(&mut record)?;
            if !record.is_empty() {
                return Err(decode_error("trailing bytes in instruction record"));
            }
            instructions.push(instr);
        }

        if !input.is_empty() {
            return Err(decode_error("trailing bytes"));
        }

        let mut program = Program {
            instructions,
            tables,
        };
        program.recover_table_refs();
        Ok(program)
    }

    /// Re-tags deserialized table references.
    ///
    /// A non-register value whose payload is non-empty, not NUL-terminated,
    /// valid UTF-8 and present in the tables map is a table reference.
    /// String immediates always carry a trailing NUL and fall through.
    fn recover_table_refs(&mut self) {
        let tables = &self.tables;
        for instr in &mut self.instructions {
            for arg in &mut instr.args {
                let Value::Immediate(data) = arg else {
                    continue;
                };
                if data.is_empty() || data.last() == Some(&0) {
                    continue;
                }
                if let Ok(name) = std::str::from_utf8(data)
                    && tables.contains_key(name)
                {
                    *arg = Value::Table(name.to_string());
                }
            }
        }
    }

    /// Writes the serialized image to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), VmError> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes()).map_err(|e| VmError::IoError {
            path: path.display().to_string(),
            source: e.to_string(),
        })
    }

    /// Reads and deserializes an image file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VmError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| VmError::IoError {
            path: path.display().to_string(),
            source: e.to_string(),
        })?;
        Self::from_bytes(&data)
    }
}
