use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

use kiln::asm;
use kiln::config::RuntimeConfig;
use kiln::platform::OsPlatform;
use kiln::vm::bytecode;
use kiln::vm::disasm::{Listing, format_assembly};
use kiln::vm::{Assembly, Vm};

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum ListingFormatArg {
    #[default]
    Human,
    Json,
}

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "A stack-based bytecode virtual machine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program (.kbc bytecode or .kasm text)
    Run {
        /// The program to run
        file: PathBuf,

        /// Arguments visible to the program through ProcessArg
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        program_args: Vec<String>,

        /// Config file (defaults to kiln.toml in the current directory)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Eval stack capacity per executor
        #[arg(long)]
        eval_stack: Option<usize>,

        /// Call stack capacity per executor
        #[arg(long)]
        call_stack: Option<usize>,

        /// Log every executed instruction
        #[arg(long)]
        trace: bool,
    },
    /// Assemble a .kasm file into bytecode
    Asm {
        /// The assembly source
        src: PathBuf,

        /// Output bytecode file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the instructions of a program
    Disasm {
        /// The program to list (.kbc bytecode or .kasm text)
        file: PathBuf,

        /// Listing format (human or json)
        #[arg(long, value_enum, default_value = "human")]
        format: ListingFormatArg,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let trace = matches!(cli.command, Commands::Run { trace: true, .. });
    init_logging(trace);

    match cli.command {
        Commands::Run {
            file,
            program_args,
            config,
            eval_stack,
            call_stack,
            trace,
        } => {
            let mut runtime = match load_config(config.as_deref()) {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            if let Some(capacity) = eval_stack {
                runtime.eval_stack_capacity = capacity;
            }
            if let Some(capacity) = call_stack {
                runtime.call_stack_capacity = capacity;
            }
            runtime.trace |= trace;

            let assembly = match load_program(&file) {
                Ok(assembly) => Arc::new(assembly),
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            };

            let vm = Vm::new(runtime, Arc::new(OsPlatform::new(program_args)));
            let outcome = vm.run(&assembly);
            if let Some(message) = &outcome.message {
                eprintln!("{}: {}", outcome.code, message);
            }
            return ExitCode::from(outcome.code.exit_code());
        }
        Commands::Asm { src, output } => {
            if let Err(e) = assemble_file(&src, &output) {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Commands::Disasm { file, format } => {
            if let Err(e) = disassemble_file(&file, format) {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

/// Install a stderr subscriber. `RUST_LOG` overrides the default filter.
fn init_logging(trace: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if trace { "kiln=trace" } else { "warn" }));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig, String> {
    let result = match path {
        Some(path) => RuntimeConfig::load(path),
        None => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            RuntimeConfig::discover(&cwd)
        }
    };
    result.map_err(|e| e.to_string())
}

/// Load bytecode if the file carries the container magic, else assemble it as text.
fn load_program(path: &Path) -> Result<Assembly, String> {
    let data =
        std::fs::read(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    if bytecode::is_bytecode(&data) {
        return bytecode::deserialize(&data).map_err(|e| format!("{}: {}", path.display(), e));
    }
    let source = String::from_utf8(data)
        .map_err(|_| format!("{}: neither bytecode nor utf-8 text", path.display()))?;
    asm::assemble(&source).map_err(|e| format!("{}:{}", path.display(), e))
}

fn assemble_file(src: &Path, output: &Path) -> Result<(), String> {
    let source = std::fs::read_to_string(src)
        .map_err(|e| format!("failed to read {}: {}", src.display(), e))?;
    let assembly = asm::assemble(&source).map_err(|e| format!("{}:{}", src.display(), e))?;
    bytecode::save(output, &assembly).map_err(|e| format!("{}: {}", output.display(), e))
}

fn disassemble_file(path: &Path, format: ListingFormatArg) -> Result<(), String> {
    let assembly = load_program(path)?;
    match format {
        ListingFormatArg::Human => {
            let listing = format_assembly(&assembly).map_err(|e| e.to_string())?;
            print!("{}", listing);
        }
        ListingFormatArg::Json => {
            let listing = Listing::new(&assembly).map_err(|e| e.to_string())?;
            let json = serde_json::to_string_pretty(&listing).map_err(|e| e.to_string())?;
            println!("{}", json);
        }
    }
    Ok(())
}
