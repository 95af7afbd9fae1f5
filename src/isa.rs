//! Instruction set definition.
//!
//! Sixteen opcodes, file-encoded as a single byte in declaration order.
//! The assembler matches mnemonics case-insensitively; the image loader
//! decodes opcode bytes through `TryFrom<u8>`.

use crate::errors::VmError;

/// VM opcode.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum OpCode {
    /// No effect.
    Nop = 0,
    /// Unconditional jump to an absolute instruction index.
    Jmp = 1,
    /// Write a value into a register.
    Mov = 2,
    /// Integer addition.
    Add = 3,
    /// Integer subtraction.
    Sub = 4,
    /// Integer negation of a register.
    Neg = 5,
    /// Copy the register file into the snapshot bank.
    SnapSave = 6,
    /// Swap the register file with the snapshot bank.
    SnapSwap = 7,
    /// Clear the snapshot bank.
    SnapClear = 8,
    /// Clear the register file.
    RegsClear = 9,
    /// Jump if the source reads as zero.
    Jz = 10,
    /// Jump if the source reads as nonzero.
    Jnz = 11,
    /// Jump if the source reads as positive.
    Jg = 12,
    /// Jump if the source reads as negative.
    Jl = 13,
    /// Stop execution with success.
    Halt = 14,
    /// Invoke a host syscall.
    Sys = 15,
}

impl OpCode {
    /// Returns the assembly mnemonic for this opcode.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            OpCode::Nop => "nop",
            OpCode::Jmp => "jmp",
            OpCode::Mov => "mov",
            OpCode::Add => "add",
            OpCode::Sub => "sub",
            OpCode::Neg => "neg",
            OpCode::SnapSave => "snap_save",
            OpCode::SnapSwap => "snap_swap",
            OpCode::SnapClear => "snap_clear",
            OpCode::RegsClear => "regs_clear",
            OpCode::Jz => "jz",
            OpCode::Jnz => "jnz",
            OpCode::Jg => "jg",
            OpCode::Jl => "jl",
            OpCode::Halt => "halt",
            OpCode::Sys => "sys",
        }
    }

    /// Looks up an opcode by its lowercased mnemonic.
    pub fn from_mnemonic(name: &str) -> Option<OpCode> {
        Some(match name {
            "nop" => OpCode::Nop,
            "jmp" => OpCode::Jmp,
            "mov" => OpCode::Mov,
            "add" => OpCode::Add,
            "sub" => OpCode::Sub,
            "neg" => OpCode::Neg,
            "snap_save" => OpCode::SnapSave,
            "snap_swap" => OpCode::SnapSwap,
            "snap_clear" => OpCode::SnapClear,
            "regs_clear" => OpCode::RegsClear,
            "jz" => OpCode::Jz,
            "jnz" => OpCode::Jnz,
            "jg" => OpCode::Jg,
            "jl" => OpCode::Jl,
            "halt" => OpCode::Halt,
            "sys" => OpCode::Sys,
            _ => return None,
        })
    }

    /// Fixed operand count, or `None` for the variadic `sys` (which takes
    /// at least the call id).
    pub const fn arity(&self) -> Option<usize> {
        match self {
            OpCode::Nop
            | OpCode::SnapSave
            | OpCode::SnapSwap
            | OpCode::SnapClear
            | OpCode::RegsClear
            | OpCode::Halt => Some(0),
            OpCode::Jmp => Some(1),
            OpCode::Mov | OpCode::Neg => Some(2),
            OpCode::Jz | OpCode::Jnz | OpCode::Jg | OpCode::Jl => Some(2),
            OpCode::Add | OpCode::Sub => Some(3),
            OpCode::Sys => None,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = VmError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => OpCode::Nop,
            1 => OpCode::Jmp,
            2 => OpCode::Mov,
            3 => OpCode::Add,
            4 => OpCode::Sub,
            5 => OpCode::Neg,
            6 => OpCode::SnapSave,
            7 => OpCode::SnapSwap,
            8 => OpCode::SnapClear,
            9 => OpCode::RegsClear,
            10 => OpCode::Jz,
            11 => OpCode::Jnz,
            12 => OpCode::Jg,
            13 => OpCode::Jl,
            14 => OpCode::Halt,
            15 => OpCode::Sys,
            _ => return Err(VmError::InvalidInstruction { opcode: value }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OpCode; 16] = [
        OpCode::Nop,
        OpCode::Jmp,
        OpCode::Mov,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Neg,
        OpCode::SnapSave,
        OpCode::SnapSwap,
        OpCode::SnapClear,
        OpCode::RegsClear,
        OpCode::Jz,
        OpCode::Jnz,
        OpCode::Jg,
        OpCode::Jl,
        OpCode::Halt,
        OpCode::Sys,
    ];

    #[test]
    fn byte_roundtrip() {
        for op in ALL {
            assert_eq!(OpCode::try_from(op as u8).unwrap(), op);
        }
    }

    #[test]
    fn mnemonic_roundtrip() {
        for op in ALL {
            assert_eq!(OpCode::from_mnemonic(op.mnemonic()), Some(op));
        }
    }

    #[test]
    fn mnemonics_are_lowercase_only() {
        assert_eq!(OpCode::from_mnemonic("MOV"), None);
        assert_eq!(OpCode::from_mnemonic("frobnicate"), None);
    }

    #[test]
    fn try_from_invalid_byte() {
        assert!(matches!(
            OpCode::try_from(16),
            Err(VmError::InvalidInstruction { opcode: 16 })
        ));
        assert!(matches!(
            OpCode::try_from(0xFF),
            Err(VmError::InvalidInstruction { opcode: 0xFF })
        ));
    }
}
