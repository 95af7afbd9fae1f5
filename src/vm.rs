//! Core virtual machine implementation.
//!
//! A register machine with a 64-slot register file, a 64-slot snapshot bank
//! the program controls explicitly, and a host syscall dispatch table.
//! Branch opcodes write an absolute instruction index into the program
//! counter and raise a branch flag; the step loop advances by one when the
//! flag is clear and seeks to the written index when it is set.

use crate::errors::VmError;
use crate::isa::OpCode;
use crate::program::{Instruction, Program};
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

/// Size of the register file and of the snapshot bank.
pub const REGISTER_COUNT: usize = 64;

/// Entry point used when none is named.
pub const DEFAULT_ENTRY: &str = "main";

/// Host-provided syscall callable.
///
/// Handlers receive the machine itself so they can read registers and
/// mutate engine state.
pub type SyscallHandler = dyn Fn(&mut VirtualMachine, &[Value]) -> Result<(), VmError>;

/// Outcome of a single executed instruction.
enum Step {
    /// Proceed with the step loop.
    Continue,
    /// Stop execution with success.
    Halt,
}

/// Register-based bytecode virtual machine.
pub struct VirtualMachine {
    instructions: Vec<Instruction>,
    tables: BTreeMap<String, i64>,
    registers: Vec<Value>,
    snapshot: Vec<Value>,
    syscalls: HashMap<u8, Rc<SyscallHandler>>,
    pc: i64,
    branched: bool,
}

fn cleared_bank() -> Vec<Value> {
    vec![Value::default(); REGISTER_COUNT]
}

impl VirtualMachine {
    /// Creates a machine that owns the given program.
    pub fn new(program: Program) -> Self {
        Self {
            instructions: program.instructions,
            tables: program.tables,
            registers: cleared_bank(),
            snapshot: cleared_bank(),
            syscalls: HashMap::new(),
            pc: 0,
            branched: false,
        }
    }

    /// Registers a syscall handler under the given id.
    ///
    /// Id 0 is reserved and rejected. Registering an id twice replaces the
    /// prior handler. Returns whether the handler was installed.
    pub fn register_syscall(
        &mut self,
        id: u8,
        handler: impl Fn(&mut VirtualMachine, &[Value]) -> Result<(), VmError> + 'static,
    ) -> bool {
        if id == 0 {
            return false;
        }
        self.syscalls.insert(id, Rc::new(handler));
        true
    }

    /// Returns the value in register `index`.
    pub fn get_register(&self, index: u8) -> Result<&Value, VmError> {
        self.registers
            .get(index as usize)
            .ok_or(VmError::InvalidRegisterIndex { index })
    }

    /// Stores a value into register `index`.
    pub fn set_register(&mut self, index: u8, value: Value) -> Result<(), VmError> {
        let slot = self
            .registers
            .get_mut(index as usize)
            .ok_or(VmError::InvalidRegisterIndex { index })?;
        *slot = value;
        Ok(())
    }

    /// Runs the program from the named entry point.
    ///
    /// The start index is the entry's binding in the tables map, 0 when
    /// absent. Running off the end of the instruction sequence terminates
    /// with success; a branch outside the sequence is an error.
    pub fn execute(&mut self, entry: &str) -> Result<(), VmError> {
        self.pc = self.tables.get(entry).copied().unwrap_or(0);

        loop {
            let len = self.instructions.len() as i64;
            if self.pc == len {
                return Ok(());
            }
            if self.pc < 0 || self.pc > len {
                return Err(VmError::PcOutOfRange {
                    pc: self.pc,
                    len: self.instructions.len(),
                });
            }

            let instruction = self.instructions[self.pc as usize].clone();
            self.branched = false;
            match self.exec(&instruction)? {
                Step::Halt => return Ok(()),
                Step::Continue => {
                    if !self.branched {
                        self.pc += 1;
                    }
                }
            }
        }
    }

    /// Executes a single instruction.
    fn exec(&mut self, instruction: &Instruction) -> Result<Step, VmError> {
        match instruction.code {
            OpCode::Nop => {}
            OpCode::Jmp => self.op_jmp(instruction)?,
            OpCode::Mov => self.op_mov(instruction)?,
            OpCode::Add => self.op_add(instruction)?,
            OpCode::Sub => self.op_sub(instruction)?,
            OpCode::Neg => self.op_neg(instruction)?,
            OpCode::SnapSave => self.snapshot = self.registers.clone(),
            OpCode::SnapSwap => std::mem::swap(&mut self.registers, &mut self.snapshot),
            OpCode::SnapClear => self.snapshot = cleared_bank(),
            OpCode::RegsClear => self.registers = cleared_bank(),
            OpCode::Jz => self.op_branch_if(instruction, |v| v == 0)?,
            OpCode::Jnz => self.op_branch_if(instruction, |v| v != 0)?,
            OpCode::Jg => self.op_branch_if(instruction, |v| v > 0)?,
            OpCode::Jl => self.op_branch_if(instruction, |v| v < 0)?,
            OpCode::Halt => return Ok(Step::Halt),
            OpCode::Sys => self.op_sys(instruction)?,
        }
        Ok(Step::Continue)
    }

    /// Fetches operand `index`, failing on malformed instructions from
    /// hand-crafted images.
    fn operand<'a>(&self, instruction: &'a Instruction, index: usize) -> Result<&'a Value, VmError> {
        instruction
            .args
            .get(index)
            .ok_or(VmError::ArityMismatch {
                mnemonic: instruction.code.mnemonic(),
                expected: instruction.code.arity().unwrap_or(index + 1),
                actual: instruction.args.len(),
            })
    }

    /// Requires operand `index` to name a register and returns its index.
    fn register_operand(&self, instruction: &Instruction, index: usize) -> Result<u8, VmError> {
        self.operand(instruction, index)?
            .register_index()
            .ok_or(VmError::ExpectedRegister {
                instruction: instruction.code.mnemonic(),
            })
    }

    /// The uniform three-way read applied to jump targets, branch sources
    /// and `mov`'s source: register contents, table binding, or immediate.
    fn resolve(&self, value: &Value) -> Result<i64, VmError> {
        match value {
            Value::Register(index) => Ok(self.get_register(*index)?.as_i64()),
            Value::Table(name) => Ok(self.tables.get(name).copied().unwrap_or(0)),
            Value::Immediate(_) => Ok(value.as_i64()),
        }
    }

    /// Arithmetic operand read: register contents, or the raw payload bytes
    /// reinterpreted as i64. Unlike [`Self::resolve`] there is no table
    /// lookup; a table reference participates as its name's bytes.
    fn int_operand(&self, value: &Value) -> Result<i64, VmError> {
        match value {
            Value::Register(index) => Ok(self.get_register(*index)?.as_i64()),
            other => Ok(other.as_i64()),
        }
    }

    /// Records an absolute branch target for the step loop.
    fn branch_to(&mut self, target: i64) {
        self.pc = target;
        self.branched = true;
    }

    fn op_jmp(&mut self, instruction: &Instruction) -> Result<(), VmError> {
        let target = self.resolve(self.operand(instruction, 0)?)?;
        self.branch_to(target);
        Ok(())
    }

    fn op_branch_if(
        &mut self,
        instruction: &Instruction,
        condition: impl Fn(i64) -> bool,
    ) -> Result<(), VmError> {
        let value = self.resolve(self.operand(instruction, 0)?)?;
        if condition(value) {
            let target = self.resolve(self.operand(instruction, 1)?)?;
            self.branch_to(target);
        }
        Ok(())
    }

    fn op_mov(&mut self, instruction: &Instruction) -> Result<(), VmError> {
        let dst = self.register_operand(instruction, 1)?;
        let value = match self.operand(instruction, 0)? {
            Value::Register(index) => self.get_register(*index)?.clone(),
            // table references materialize to their resolved index
            Value::Table(name) => Value::from_i64(self.tables.get(name).copied().unwrap_or(0)),
            immediate => immediate.clone(),
        };
        self.set_register(dst, value)
    }

    fn op_add(&mut self, instruction: &Instruction) -> Result<(), VmError> {
        let a = self.int_operand(self.operand(instruction, 0)?)?;
        let b = self.int_operand(self.operand(instruction, 1)?)?;
        let dst = self.register_operand(instruction, 2)?;
        self.set_register(dst, Value::from_i64(a.wrapping_add(b)))
    }

    fn op_sub(&mut self, instruction: &Instruction) -> Result<(), VmError> {
        let a = self.int_operand(self.operand(instruction, 0)?)?;
        let b = self.int_operand(self.operand(instruction, 1)?)?;
        let dst = self.register_operand(instruction, 2)?;
        self.set_register(dst, Value::from_i64(a.wrapping_sub(b)))
    }

    fn op_neg(&mut self, instruction: &Instruction) -> Result<(), VmError> {
        let src = self.register_operand(instruction, 0)?;
        let dst = self.register_operand(instruction, 1)?;
        let value = self.get_register(src)?.as_i64();
        self.set_register(dst, Value::from_i64(value.wrapping_neg()))
    }

    fn op_sys(&mut self, instruction: &Instruction) -> Result<(), VmError> {
        let Some(id_arg) = instruction.args.first() else {
            return Err(VmError::EmptySyscall);
        };
        let id = id_arg.as_u8();
        let args: Vec<Value> = instruction.args[1..].to_vec();

        let handler = self
            .syscalls
            .get(&id)
            .cloned()
            .ok_or(VmError::UndefinedSyscall { id })?;
        handler(self, &args).map_err(|e| VmError::SyscallFailed {
            id,
            source: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble_source;

    fn run_source(source: &str) -> VirtualMachine {
        let program = assemble_source(source).expect("assembly failed");
        let mut vm = VirtualMachine::new(program);
        vm.execute(DEFAULT_ENTRY).expect("execution failed");
        vm
    }

    fn run_expect_err(source: &str) -> VmError {
        let program = assemble_source(source).expect("assembly failed");
        let mut vm = VirtualMachine::new(program);
        vm.execute(DEFAULT_ENTRY).expect_err("expected error")
    }

    fn reg_i64(vm: &VirtualMachine, index: u8) -> i64 {
        vm.get_register(index).unwrap().as_i64()
    }

    // ==================== Moves ====================

    #[test]
    fn mov_immediate() {
        let vm = run_source("mov 42, R0\nmov -1, R1");
        assert_eq!(reg_i64(&vm, 0), 42);
        assert_eq!(reg_i64(&vm, 1), -1);
    }

    #[test]
    fn mov_copies_register_value_verbatim() {
        let vm = run_source("mov \"hi\", R0\nmov R0, R1");
        assert_eq!(vm.get_register(0).unwrap(), &Value::from_str("hi"));
        assert_eq!(vm.get_register(1).unwrap(), &Value::from_str("hi"));
    }

    #[test]
    fn mov_materializes_table_ref_to_index() {
        let vm = run_source("mov #spot, R0\nhalt\nspot:\nnop");
        assert_eq!(vm.get_register(0).unwrap(), &Value::from_i64(2));
    }

    #[test]
    fn mov_missing_table_name_reads_zero() {
        let vm = run_source("mov #nothing, R0");
        assert_eq!(reg_i64(&vm, 0), 0);
    }

    #[test]
    fn mov_requires_register_destination() {
        let err = run_expect_err("mov 1, 2");
        assert!(matches!(
            err,
            VmError::ExpectedRegister { instruction: "mov" }
        ));
    }

    // ==================== Arithmetic ====================

    #[test]
    fn add_and_sub() {
        let vm = run_source("mov 3, R0\nmov 4, R1\nadd R0, R1, R2\nsub R2, 7, R3");
        assert_eq!(reg_i64(&vm, 2), 7);
        assert_eq!(reg_i64(&vm, 3), 0);
    }

    #[test]
    fn add_wraps_on_overflow() {
        let vm = run_source("mov 9223372036854775807, R0\nadd R0, 1, R1");
        assert_eq!(reg_i64(&vm, 1), i64::MIN);
    }

    #[test]
    fn add_reads_double_payload_as_raw_bits() {
        // operands are always reinterpreted as int64
        let vm = run_source("add 1.5, 0, R0");
        assert_eq!(reg_i64(&vm, 0), 1.5f64.to_bits() as i64);
    }

    #[test]
    fn add_reads_table_ref_as_raw_bytes_not_binding() {
        // arithmetic has no table lookup: the name's bytes participate
        let vm = run_source("#table counter\nadd #counter, 1, R0");
        let raw = Value::table("counter").as_i64();
        assert_eq!(reg_i64(&vm, 0), raw.wrapping_add(1));
        assert_ne!(reg_i64(&vm, 0), 1); // not tables["counter"] + 1
    }

    #[test]
    fn neg_register() {
        let vm = run_source("mov 42, R0\nneg R0, R1");
        assert_eq!(reg_i64(&vm, 1), -42);
    }

    // ==================== Snapshot bank ====================

    #[test]
    fn snapshot_save_and_swap() {
        let vm = run_source("mov 1, R0\nsnap_save\nmov 2, R0\nsnap_swap");
        assert_eq!(reg_i64(&vm, 0), 1);
    }

    #[test]
    fn snapshot_swap_twice_restores() {
        let vm = run_source("mov 1, R0\nsnap_save\nmov 2, R0\nsnap_swap\nsnap_swap");
        assert_eq!(reg_i64(&vm, 0), 2);
    }

    #[test]
    fn snapshot_clear_empties_bank() {
        let vm = run_source("mov 5, R0\nsnap_save\nsnap_clear\nsnap_swap");
        assert_eq!(vm.get_register(0).unwrap(), &Value::default());
    }

    #[test]
    fn regs_clear_empties_file() {
        let vm = run_source("mov 5, R0\nregs_clear");
        assert_eq!(vm.get_register(0).unwrap(), &Value::default());
    }

    // ==================== Control flow ====================

    #[test]
    fn jmp_skips_instructions() {
        let vm = run_source("jmp over\nmov 1, R0\nover:\nmov 2, R1\nhalt");
        assert_eq!(reg_i64(&vm, 0), 0);
        assert_eq!(reg_i64(&vm, 1), 2);
    }

    #[test]
    fn jmp_through_register_target() {
        let vm = run_source("mov 3, R9\njmp R9\nmov 1, R0\nmov 2, R1\nhalt");
        assert_eq!(reg_i64(&vm, 0), 0);
        assert_eq!(reg_i64(&vm, 1), 2);
    }

    #[test]
    fn conditional_branches() {
        let vm = run_source("mov 0, R0\njz R0, ok\nhalt\nok:\nmov 1, R1\nhalt");
        assert_eq!(reg_i64(&vm, 1), 1);

        let vm = run_source("mov 5, R0\njz R0, skip\nmov 1, R1\nskip:\nhalt");
        assert_eq!(reg_i64(&vm, 1), 1);

        let vm = run_source("mov 5, R0\njnz R0, ok\nhalt\nok:\nmov 1, R1\nhalt");
        assert_eq!(reg_i64(&vm, 1), 1);

        let vm = run_source("mov 5, R0\njg R0, ok\nhalt\nok:\nmov 1, R1\nhalt");
        assert_eq!(reg_i64(&vm, 1), 1);

        let vm = run_source("mov -5, R0\njl R0, ok\nhalt\nok:\nmov 1, R1\nhalt");
        assert_eq!(reg_i64(&vm, 1), 1);
    }

    #[test]
    fn countdown_loop() {
        let vm = run_source(
            "mov 5, R0\nloop:\nsub R0, 1, R0\nadd R1, 1, R1\njnz R0, loop\nhalt",
        );
        assert_eq!(reg_i64(&vm, 0), 0);
        assert_eq!(reg_i64(&vm, 1), 5);
    }

    #[test]
    fn halt_stops_execution() {
        let vm = run_source("mov 1, R0\nhalt\nmov 2, R0");
        assert_eq!(reg_i64(&vm, 0), 1);
    }

    #[test]
    fn running_off_the_end_succeeds() {
        let vm = run_source("mov 1, R0");
        assert_eq!(reg_i64(&vm, 0), 1);
    }

    #[test]
    fn branch_to_one_past_the_end_succeeds() {
        let vm = run_source("mov 1, R0\njmp 2");
        assert_eq!(reg_i64(&vm, 0), 1);
    }

    #[test]
    fn branch_out_of_range_fails() {
        assert!(matches!(
            run_expect_err("jmp 99"),
            VmError::PcOutOfRange { pc: 99, len: 1 }
        ));
        assert!(matches!(
            run_expect_err("jmp -3"),
            VmError::PcOutOfRange { pc: -3, .. }
        ));
    }

    // ==================== Entry points ====================

    #[test]
    fn named_entry_point() {
        let program = assemble_source("#table start\nstart:\nmov 42, R0\nhalt").unwrap();
        let mut vm = VirtualMachine::new(program);
        vm.execute("start").unwrap();
        assert_eq!(reg_i64(&vm, 0), 42);
    }

    #[test]
    fn missing_entry_starts_at_zero() {
        let vm = run_source("mov 7, R0\nhalt");
        assert_eq!(reg_i64(&vm, 0), 7);
    }

    // ==================== Syscalls ====================

    #[test]
    fn syscall_dispatch_and_engine_access() {
        let program = assemble_source("mov 20, R1\nsys 7, R1, 22").unwrap();
        let mut vm = VirtualMachine::new(program);
        vm.register_syscall(7, |vm, args| {
            let a = match args[0] {
                Value::Register(index) => vm.get_register(index)?.as_i64(),
                ref other => other.as_i64(),
            };
            let b = args[1].as_i64();
            vm.set_register(0, Value::from_i64(a + b))
        });
        vm.execute(DEFAULT_ENTRY).unwrap();
        assert_eq!(reg_i64(&vm, 0), 42);
    }

    #[test]
    fn undefined_syscall_fails() {
        assert!(matches!(
            run_expect_err("sys 9"),
            VmError::UndefinedSyscall { id: 9 }
        ));
    }

    #[test]
    fn syscall_error_is_wrapped_with_id() {
        let program = assemble_source("sys 3").unwrap();
        let mut vm = VirtualMachine::new(program);
        vm.register_syscall(3, |_, _| Err(VmError::EmptySyscall));
        let err = vm.execute(DEFAULT_ENTRY).unwrap_err();
        assert!(matches!(err, VmError::SyscallFailed { id: 3, .. }));
    }

    #[test]
    fn syscall_id_zero_is_rejected() {
        let mut vm = VirtualMachine::new(Program::default());
        assert!(!vm.register_syscall(0, |_, _| Ok(())));
        assert!(vm.register_syscall(1, |_, _| Ok(())));
    }

    #[test]
    fn reregistering_replaces_handler() {
        let program = assemble_source("sys 5").unwrap();
        let mut vm = VirtualMachine::new(program);
        vm.register_syscall(5, |vm, _| vm.set_register(0, Value::from_i64(1)));
        vm.register_syscall(5, |vm, _| vm.set_register(0, Value::from_i64(2)));
        vm.execute(DEFAULT_ENTRY).unwrap();
        assert_eq!(reg_i64(&vm, 0), 2);
    }

    // ==================== Range errors ====================

    #[test]
    fn register_access_out_of_range() {
        let mut vm = VirtualMachine::new(Program::default());
        assert!(matches!(
            vm.get_register(64),
            Err(VmError::InvalidRegisterIndex { index: 64 })
        ));
        assert!(matches!(
            vm.set_register(200, Value::default()),
            Err(VmError::InvalidRegisterIndex { index: 200 })
        ));
    }

    #[test]
    fn crafted_image_with_bad_register_index_fails_at_access() {
        let program = Program {
            instructions: vec![Instruction::new(
                OpCode::Mov,
                vec![Value::from_i64(1), Value::Register(70)],
            )],
            tables: BTreeMap::new(),
        };
        let mut vm = VirtualMachine::new(program);
        assert!(matches!(
            vm.execute(DEFAULT_ENTRY),
            Err(VmError::InvalidRegisterIndex { index: 70 })
        ));
    }

    #[test]
    fn pc_sequence_is_deterministic() {
        // same program, cleared registers: identical final state across runs
        let source = "mov 3, R0\nloop:\nsub R0, 1, R0\njnz R0, loop\nhalt";
        let a = run_source(source);
        let b = run_source(source);
        for i in 0..REGISTER_COUNT as u8 {
            assert_eq!(a.get_register(i).unwrap(), b.get_register(i).unwrap());
        }
    }
}
