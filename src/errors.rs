use vmasm_derive::Error;

use crate::types::encoding::DecodeError;

/// Errors that can occur during assembly, image (de)serialization or
/// execution.
#[derive(Debug, Error)]
pub enum VmError {
    /// Unrecognized instruction mnemonic during assembly.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),
    /// Wrong number of operands for an instruction.
    #[error("{mnemonic} expects {expected} operand(s), got {actual}")]
    ArityMismatch {
        mnemonic: &'static str,
        expected: usize,
        actual: usize,
    },
    /// Register index outside the 64-slot register file.
    #[error("register index out of range (0-63): {0}")]
    RegisterOutOfRange(String),
    /// Malformed byte in a byte-array literal.
    #[error("invalid byte: {0}")]
    InvalidByte(String),
    /// Byte value in a byte-array literal exceeds 255.
    #[error("byte value out of range (0-255): {0}")]
    ByteOutOfRange(String),
    /// Malformed integer literal.
    #[error("invalid integer literal: {0}")]
    InvalidInteger(String),
    /// Malformed float literal.
    #[error("invalid float literal: {0}")]
    InvalidFloat(String),
    /// Unsupported escape sequence in a string literal.
    #[error("invalid escape sequence: \\{0}")]
    InvalidEscape(char),
    /// String literal ended inside an escape sequence.
    #[error("unfinished escape sequence")]
    UnfinishedEscape,
    /// String literal missing its closing quote.
    #[error("unterminated string literal")]
    UnterminatedString,
    /// Byte-array literal missing its closing bracket.
    #[error("unterminated byte array")]
    UnterminatedArray,
    /// Malformed `#table` directive.
    #[error("invalid table definition syntax")]
    InvalidTableDirective,
    /// Assembly error with source location context.
    #[error("{file}:{line}: {source}")]
    AssemblyError {
        file: String,
        line: usize,
        source: String,
    },
    /// File I/O error.
    #[error("{path}: {source}")]
    IoError { path: String, source: String },
    /// Failed to decode a bytecode image.
    #[error("invalid bytecode image: {reason}")]
    DecodeError { reason: String },
    /// Unknown opcode byte at execution time.
    #[error("invalid instruction: {opcode:#04x}")]
    InvalidInstruction { opcode: u8 },
    /// Register access outside the register file.
    #[error("register index {index} out of bounds")]
    InvalidRegisterIndex { index: u8 },
    /// Branch target outside the instruction sequence.
    #[error("program counter {pc} out of range (0-{len})")]
    PcOutOfRange { pc: i64, len: usize },
    /// Operand was expected to name a register.
    #[error("{instruction} expects a register operand")]
    ExpectedRegister { instruction: &'static str },
    /// `sys` with no arguments at execution time.
    #[error("sys requires at least a call id")]
    EmptySyscall,
    /// Call to a syscall id with no registered handler.
    #[error("undefined syscall: {id}")]
    UndefinedSyscall { id: u8 },
    /// A syscall handler failed.
    #[error("syscall {id} failed: {source}")]
    SyscallFailed { id: u8, source: String },
    /// Format string consumed more arguments than were passed.
    #[error("not enough arguments for format string")]
    MissingFormatArgument,
    /// Arguments left over after the format string was fully processed.
    #[error("{count} unused argument(s) after format string")]
    UnusedFormatArguments { count: usize },
    /// Unsupported `%` specifier in a format string.
    #[error("invalid format specifier: %{0}")]
    InvalidFormatSpecifier(char),
}

impl From<DecodeError> for VmError {
    fn from(err: DecodeError) -> Self {
        VmError::DecodeError {
            reason: match err {
                DecodeError::UnexpectedEof => "unexpected end of input".to_string(),
                DecodeError::InvalidValue => "malformed value".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            VmError::UnknownOpcode("frobnicate".into()).to_string(),
            "unknown opcode: frobnicate"
        );
        assert_eq!(
            VmError::AssemblyError {
                file: "demo.vmasm".into(),
                line: 3,
                source: "unterminated string literal".into(),
            }
            .to_string(),
            "demo.vmasm:3: unterminated string literal"
        );
        assert_eq!(
            VmError::InvalidInstruction { opcode: 0xFF }.to_string(),
            "invalid instruction: 0xff"
        );
        assert_eq!(
            VmError::UndefinedSyscall { id: 9 }.to_string(),
            "undefined syscall: 9"
        );
    }

    #[test]
    fn decode_error_conversion() {
        let err: VmError = DecodeError::UnexpectedEof.into();
        assert!(matches!(err, VmError::DecodeError { ref reason } if reason.contains("end of input")));
    }
}
