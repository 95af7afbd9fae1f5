//! VMAsm command-line toolkit.
//!
//! # Usage
//! ```text
//! vmasm <command> [options] [file...]
//! ```
//!
//! # Commands
//! - `run <image>`: load a bytecode image and execute it from `main`
//! - `build <src...>`: assemble source files into a bytecode image
//! - `disasm <image>`: render an image back to assembly
//!
//! # Options
//! - `-o, --output <file>`: output file path
//! - `-v, --verbose`: enable status messages
//! - `-h, --help`: print the help message
//!
//! Any failure prints a single error line and exits with status 1.

use std::env;
use std::fs;
use std::process;
use vmasm::assembler::assemble_files;
use vmasm::disassembler::disassemble;
use vmasm::errors::VmError;
use vmasm::program::Program;
use vmasm::syscalls;
use vmasm::utils::log::{self, Level};
use vmasm::vm::{DEFAULT_ENTRY, VirtualMachine};

const DEFAULT_OUTPUT: &str = "a.vmc";

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        process::exit(1);
    }

    let command = args[1].as_str();
    if command == "--help" || command == "-h" {
        print_usage(&args[0]);
        process::exit(0);
    }

    let mut files: Vec<String> = Vec::new();
    let mut output: Option<String> = None;
    let mut verbose = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            "-v" | "--verbose" => {
                verbose = true;
                i += 1;
            }
            k @ ("-o" | "--output") => {
                i += 1;
                if i >= args.len() {
                    eprintln!("{k} requires an argument");
                    process::exit(1);
                }
                output = Some(args[i].clone());
                i += 1;
            }
            other if other.starts_with('-') => {
                eprintln!("Unexpected option: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
            _ => {
                files.push(args[i].clone());
                i += 1;
            }
        }
    }

    log::init(if verbose { Level::Info } else { Level::Warn });

    let result = match command {
        "run" => cmd_run(&files),
        "build" => cmd_build(&files, output),
        "disasm" => cmd_disasm(&files, output),
        other => {
            eprintln!("Unknown command '{}'\n", other);
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn cmd_run(files: &[String]) -> Result<(), VmError> {
    let Some(input) = files.first() else {
        eprintln!("No input file specified for run");
        process::exit(1);
    };

    let program = Program::load(input)?;
    let mut vm = VirtualMachine::new(program);
    syscalls::install(&mut vm);
    vm.execute(DEFAULT_ENTRY)
}

fn cmd_build(files: &[String], output: Option<String>) -> Result<(), VmError> {
    if files.is_empty() {
        eprintln!("No input files specified for build");
        process::exit(1);
    }

    let out_path = output.unwrap_or_else(|| DEFAULT_OUTPUT.to_string());
    log::info(&format!(
        "compiling {} file(s) to {}",
        files.len(),
        out_path
    ));

    let program = assemble_files(files)?;
    program.save(&out_path)?;

    log::info(&format!(
        "compilation successful, output written to {}",
        out_path
    ));
    Ok(())
}

fn cmd_disasm(files: &[String], output: Option<String>) -> Result<(), VmError> {
    let Some(input) = files.first() else {
        eprintln!("No input file specified for disasm");
        process::exit(1);
    };

    let program = Program::load(input)?;
    let text = disassemble(&program);

    match output {
        Some(path) => fs::write(&path, text).map_err(|e| VmError::IoError {
            path,
            source: e.to_string(),
        }),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

const USAGE: &str = "\
VMAsm Tools

USAGE:
    {program} <command> [options] [file...]

COMMANDS:
    run <image>            Execute a bytecode image from the main entry
    build <src...>         Assemble source files to bytecode (default a.vmc)
    disasm <image>         Disassemble bytecode to assembly

OPTIONS:
    -o, --output <file>    Specify output file
    -v, --verbose          Enable status messages
    -h, --help             Show this help message

EXAMPLES:
    # Assemble and run
    {program} build program.vmasm -o program.vmc
    {program} run program.vmc

    # Inspect an image
    {program} disasm program.vmc
";

fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
