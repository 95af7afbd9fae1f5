//! Renders a program back to canonical assembly source.
//!
//! Instructions are emitted one per line, indented four spaces, arguments
//! comma-separated. A table entry bound to an instruction index is printed
//! as a `name:` line before that instruction; entries that never surface as
//! a label (unreachable indices, collision losers, pure `#table`
//! declarations on empty programs) trail as `#table name` lines.

use crate::program::{Instruction, Program};
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::Write;

/// Renders the whole program as assembly source.
pub fn disassemble(program: &Program) -> String {
    // index -> label name; later keys win on collision
    let mut label_map: HashMap<i64, &str> = HashMap::new();
    for (name, index) in &program.tables {
        label_map.insert(*index, name);
    }

    let mut out = String::new();
    let mut emitted: HashSet<&str> = HashSet::new();

    for (i, instruction) in program.instructions.iter().enumerate() {
        if let Some(name) = label_map.get(&(i as i64)) {
            let _ = writeln!(out, "{name}:");
            emitted.insert(*name);
        }
        out.push_str(&render_instruction(instruction, &label_map));
        out.push('\n');
    }

    for name in program.tables.keys() {
        if !emitted.contains(name.as_str()) {
            let _ = writeln!(out, "#table {name}");
        }
    }

    out
}

fn render_instruction(instruction: &Instruction, label_map: &HashMap<i64, &str>) -> String {
    let mut line = format!("    {}", instruction.code.mnemonic());
    for (i, arg) in instruction.args.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        line.push(' ');
        line.push_str(&render_value(arg, label_map));
    }
    line
}

fn render_value(value: &Value, label_map: &HashMap<i64, &str>) -> String {
    match value {
        Value::Register(index) => format!("R{index}"),
        Value::Table(name) => format!("#{name}"),
        Value::Immediate(data) => {
            if data.len() == 8 {
                let d = value.as_f64();
                if is_sane_double(d) {
                    return format_double(d);
                }

                let n = value.as_i64();
                return match label_map.get(&n) {
                    Some(name) => (*name).to_string(),
                    None => n.to_string(),
                };
            }

            if data.last() == Some(&0) {
                return format_string(&value.as_string());
            }

            format_byte_array(data)
        }
    }
}

/// Decides whether an 8-byte payload reads as a plausible double.
///
/// Accepts the infinities, +0 and normal values up to ±1e300. Subnormals
/// and NaN patterns read as int64 instead: small positive integers are
/// subnormal bit patterns and small negative integers are NaN bit
/// patterns, and both must keep rendering as integers. The all-zero
/// payload renders as `0`.
fn is_sane_double(d: f64) -> bool {
    if d.is_nan() {
        return false;
    }
    if d.is_infinite() {
        return true;
    }
    if !(-1e300..=1e300).contains(&d) {
        return false;
    }

    let bits = d.to_bits();
    let exponent = (bits >> 52) & 0x7FF;
    exponent != 0 || bits == 0
}

fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "nan".to_string();
    }
    if d.is_infinite() {
        return if d < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if d == 0.0 {
        return "0".to_string();
    }

    if d == d.floor() {
        // keep a decimal point so the listing re-assembles as a float
        if d.abs() < 1e15 {
            return format!("{d:.1}");
        }
        return format!("{d:e}");
    }

    format!("{d}")
}

fn format_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn format_byte_array(bytes: &[u8]) -> String {
    let mut out = String::from("[");
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "{byte:#04x}");
    }
    out.push(']');
    out
}
