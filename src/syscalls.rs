//! Stock host syscalls installed by the `run` verb.
//!
//! - id 1 `print`: format-driven output (`%d %f %s %c %x %%`)
//! - id 2 `exit`: terminate the process with the given status

use crate::errors::VmError;
use crate::value::Value;
use crate::vm::VirtualMachine;
use std::io::{self, Write};
use std::process;

/// Syscall id of `print`.
pub const SYS_PRINT: u8 = 1;
/// Syscall id of `exit`.
pub const SYS_EXIT: u8 = 2;

/// Registers the stock syscalls on the given machine.
pub fn install(vm: &mut VirtualMachine) {
    vm.register_syscall(SYS_PRINT, sys_print);
    vm.register_syscall(SYS_EXIT, sys_exit);
}

/// Reads an argument as i64, indirecting through the register file when the
/// argument names a register.
fn arg_as_i64(vm: &VirtualMachine, arg: &Value) -> Result<i64, VmError> {
    match arg {
        Value::Register(index) => Ok(vm.get_register(*index)?.as_i64()),
        other => Ok(other.as_i64()),
    }
}

fn arg_as_f64(vm: &VirtualMachine, arg: &Value) -> Result<f64, VmError> {
    match arg {
        Value::Register(index) => Ok(vm.get_register(*index)?.as_f64()),
        other => Ok(other.as_f64()),
    }
}

fn arg_as_string(vm: &VirtualMachine, arg: &Value) -> Result<String, VmError> {
    match arg {
        Value::Register(index) => Ok(vm.get_register(*index)?.as_string()),
        other => Ok(other.as_string()),
    }
}

/// Expands the format string against the remaining arguments.
///
/// Specifiers: `%d` i64, `%f` double, `%s` string, `%c` character from an
/// int, `%x` lowercase hex, `%%` literal percent. Too few arguments for the
/// specifiers, or arguments left over afterwards, are errors.
pub fn render(vm: &VirtualMachine, args: &[Value]) -> Result<String, VmError> {
    let Some(first) = args.first() else {
        return Err(VmError::ArityMismatch {
            mnemonic: "print",
            expected: 1,
            actual: 0,
        });
    };
    let fmt = arg_as_string(vm, first)?;

    let mut out = String::with_capacity(fmt.len());
    let mut arg_index = 1;
    let chars: Vec<char> = fmt.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '%' || i + 1 == chars.len() {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        i += 1;
        let spec = chars[i];
        i += 1;

        if spec == '%' {
            out.push('%');
            continue;
        }

        let arg = args
            .get(arg_index)
            .ok_or(VmError::MissingFormatArgument)?;
        arg_index += 1;

        match spec {
            'd' => out.push_str(&arg_as_i64(vm, arg)?.to_string()),
            'f' => out.push_str(&arg_as_f64(vm, arg)?.to_string()),
            's' => out.push_str(&arg_as_string(vm, arg)?),
            'c' => out.push((arg_as_i64(vm, arg)? as u8) as char),
            'x' => out.push_str(&format!("{:x}", arg_as_i64(vm, arg)?)),
            other => return Err(VmError::InvalidFormatSpecifier(other)),
        }
    }

    if arg_index < args.len() {
        return Err(VmError::UnusedFormatArguments {
            count: args.len() - arg_index,
        });
    }

    Ok(out)
}

fn sys_print(vm: &mut VirtualMachine, args: &[Value]) -> Result<(), VmError> {
    let text = render(vm, args)?;
    let mut stdout = io::stdout();
    stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.flush())
        .map_err(|e| VmError::IoError {
            path: "<stdout>".to_string(),
            source: e.to_string(),
        })
}

fn sys_exit(vm: &mut VirtualMachine, args: &[Value]) -> Result<(), VmError> {
    let Some(first) = args.first() else {
        return Err(VmError::ArityMismatch {
            mnemonic: "exit",
            expected: 1,
            actual: 0,
        });
    };
    let status = arg_as_i64(vm, first)?;
    process::exit(status as i32);
}
