use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use etc::chunk::{Chunk, disassemble};
use etc::diagnostic::{self, Diagnostic, ansi::AnsiRenderer};
use etc::{InterpretError, Vm, VmOptions, compiler};

/// Exit status when the script cannot be read.
const EXIT_IO: u8 = 74;

#[derive(Parser)]
#[command(name = "etc", version, about = "Run an etc script")]
struct Cli {
    /// Script to run
    file: PathBuf,
    /// Print the compiled bytecode before running
    #[arg(long)]
    disassemble: bool,
    /// Report errors as JSON, one object per line
    #[arg(long, conflicts_with = "pretty")]
    json: bool,
    /// Report errors with a source snippet
    #[arg(long)]
    pretty: bool,
    /// Stop after compiling
    #[arg(long)]
    no_run: bool,
    /// Log every executed instruction (needs RUST_LOG=trace)
    #[arg(long)]
    trace: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Could not read '{}': {}", cli.file.display(), e);
            return ExitCode::from(EXIT_IO);
        }
    };

    match run(&cli, &source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&cli, &source, &e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(cli: &Cli, source: &str) -> Result<(), InterpretError> {
    let mut chunk = Chunk::new();
    compiler::compile(source, &mut chunk).map_err(InterpretError::Compile)?;

    if cli.disassemble {
        let name = cli.file.file_name().map_or_else(|| "script".into(), |n| n.to_string_lossy());
        print!("{}", disassemble(&chunk, &name));
    }
    if cli.no_run {
        return Ok(());
    }

    let mut vm = Vm::new().with_options(VmOptions { trace: cli.trace });
    vm.load(chunk)?;
    vm.run()?;
    Ok(())
}

fn report(cli: &Cli, source: &str, error: &InterpretError) {
    if !cli.json && !cli.pretty {
        eprintln!("{error}");
        return;
    }
    let diagnostics: Vec<Diagnostic> =
        diagnostic::from_interpret_error(error).into_iter().map(|d| d.with_source(source)).collect();
    let renderer = AnsiRenderer { use_color: std::io::stderr().is_terminal() };
    for d in &diagnostics {
        if cli.json {
            eprintln!("{}", diagnostic::json::render(d));
        } else {
            eprint!("{}", renderer.render(d));
        }
    }
}
