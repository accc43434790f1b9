use std::io;
use std::path::Path;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{error, info, warn};
use vm::logging::{self, category_error, category_program, category_trace};
use vm::{Debugger, Vm, VmConfig, VmStatus, assemble, disassemble, render_vm_error};

const STACK_CAPACITY_ENV: &str = "PHYTO_STACK_CAPACITY";
const MAX_PAGES_ENV: &str = "PHYTO_MAX_PAGES";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct CliConfig {
    source: Option<String>,
    emit_path: Option<String>,
    disasm: bool,
    trace: bool,
    debug: bool,
    max_steps: Option<u64>,
    stack_capacity: Option<usize>,
    max_pages: Option<usize>,
    help: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli_args(&args).map_err(io::Error::other)?;
    if cli.help {
        print_usage();
        return Ok(());
    }
    logging::init(if cli.trace { "vm=trace,info" } else { "info" })?;

    let source = cli
        .source
        .as_deref()
        .ok_or_else(|| io::Error::other("missing program path (see --help)"))?;
    let code = load_program(Path::new(source))?;
    info!(
        "{} loaded {} ({} bytes)",
        category_program(),
        source,
        code.len()
    );

    if let Some(output_path) = cli.emit_path.as_ref() {
        std::fs::write(output_path, &code)?;
        println!("wrote {} bytes to {}", code.len(), output_path);
        return Ok(());
    }
    if cli.disasm {
        print!("{}", disassemble(&code)?);
        return Ok(());
    }

    let config = vm_config(&cli)?;
    let mut vm = Vm::with_config(code, config);

    if cli.debug {
        return run_debugger(&mut vm);
    }

    let status = match cli.max_steps {
        Some(limit) => vm.run_with_limit(limit),
        None => vm.run(),
    };
    match status {
        Ok(VmStatus::Halted) => {
            println!("vm halted after {} step(s)", vm.steps());
            println!("stack: {:?}", vm.stack().as_slice());
            Ok(())
        }
        Ok(VmStatus::Running) => {
            warn!(
                "{} step budget of {} exhausted at offset {}",
                category_trace(),
                vm.steps(),
                vm.position()
            );
            println!("stack: {:?}", vm.stack().as_slice());
            Err(Box::new(io::Error::other("step budget exhausted")))
        }
        Err(err) => {
            error!("{} {}", category_error(), render_vm_error(&vm, &err));
            Err(Box::new(err))
        }
    }
}

fn parse_cli_args(args: &[String]) -> Result<CliConfig, String> {
    let mut cfg = CliConfig::default();
    let mut index = 0usize;

    if args.first().is_some_and(|first| first == "debug") {
        cfg.debug = true;
        index = 1;
    }

    while index < args.len() {
        match args[index].as_str() {
            "-h" | "--help" => {
                cfg.help = true;
                index += 1;
            }
            "--debug" => {
                cfg.debug = true;
                index += 1;
            }
            "--trace" => {
                cfg.trace = true;
                index += 1;
            }
            "--disasm" => {
                cfg.disasm = true;
                index += 1;
            }
            "--emit" => {
                let path = args
                    .get(index + 1)
                    .ok_or_else(|| "missing value for --emit".to_string())?;
                cfg.emit_path = Some(path.clone());
                index += 2;
            }
            "--max-steps" => {
                cfg.max_steps = Some(parse_number(args.get(index + 1), "--max-steps")?);
                index += 2;
            }
            "--stack-capacity" => {
                cfg.stack_capacity = Some(parse_number(args.get(index + 1), "--stack-capacity")?);
                index += 2;
            }
            "--max-pages" => {
                cfg.max_pages = Some(parse_number(args.get(index + 1), "--max-pages")?);
                index += 2;
            }
            value if value.starts_with('-') => {
                return Err(format!("unknown flag '{value}'"));
            }
            path => {
                if cfg.source.is_some() {
                    return Err("multiple program paths provided".to_string());
                }
                cfg.source = Some(path.to_string());
                index += 1;
            }
        }
    }

    if cfg.help {
        return Ok(cfg);
    }
    if cfg.emit_path.is_some() && cfg.disasm {
        return Err("--emit cannot be combined with --disasm".to_string());
    }
    if (cfg.emit_path.is_some() || cfg.disasm) && (cfg.debug || cfg.max_steps.is_some()) {
        return Err("--emit/--disasm cannot be combined with debug or --max-steps".to_string());
    }
    if cfg.debug && cfg.max_steps.is_some() {
        return Err("debug mode does not take --max-steps".to_string());
    }
    Ok(cfg)
}

fn parse_number<T: std::str::FromStr>(raw: Option<&String>, flag: &str) -> Result<T, String> {
    let raw = raw.ok_or_else(|| format!("missing value for {flag}"))?;
    raw.parse::<T>()
        .map_err(|_| format!("invalid {flag} value '{raw}'"))
}

/// Flags win over the environment, which wins over the defaults.
fn vm_config(cli: &CliConfig) -> Result<VmConfig, Box<dyn std::error::Error>> {
    let mut config = VmConfig::default();
    let stack_capacity = match cli.stack_capacity {
        Some(capacity) => Some(capacity),
        None => env_number(STACK_CAPACITY_ENV)?,
    };
    if let Some(capacity) = stack_capacity {
        config.stack_capacity = capacity;
    }
    config.max_pages = match cli.max_pages {
        Some(max_pages) => Some(max_pages),
        None => env_number(MAX_PAGES_ENV)?,
    };
    Ok(config)
}

fn env_number(key: &str) -> Result<Option<usize>, Box<dyn std::error::Error>> {
    match std::env::var(key) {
        Ok(value) => Ok(Some(value.parse()?)),
        Err(_) => Ok(None),
    }
}

/// `.pasm` files are assembled; anything else is treated as raw bytecode.
fn load_program(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let is_assembly = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pasm"));
    if is_assembly {
        let source = std::fs::read_to_string(path)?;
        Ok(assemble(&source)?)
    } else {
        Ok(std::fs::read(path)?)
    }
}

fn run_debugger(vm: &mut Vm) -> Result<(), Box<dyn std::error::Error>> {
    println!("phyto-vm debugger, type 'help' for commands");
    let mut debugger = Debugger::new();
    let mut editor = DefaultEditor::new()?;
    let mut stdout = io::stdout();
    loop {
        match editor.readline("(phyto) ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                if debugger.handle_command(line, vm, &mut stdout).is_quit() {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(Box::new(io::Error::other(err.to_string()))),
        }
    }
    println!("stack: {:?}", vm.stack().as_slice());
    Ok(())
}

fn print_usage() {
    println!("Usage:");
    println!("  phyto-vm-run <program.pasm|program.phyto>");
    println!("  phyto-vm-run [--trace] [--max-steps <n>] <program>");
    println!("  phyto-vm-run [--stack-capacity <n>] [--max-pages <n>] <program>");
    println!("  phyto-vm-run --emit <output.phyto> <program.pasm>");
    println!("  phyto-vm-run --disasm <program>");
    println!("  phyto-vm-run debug <program>");
    println!();
    println!("Environment:");
    println!("  {STACK_CAPACITY_ENV}  operand stack capacity (default 65536)");
    println!("  {MAX_PAGES_ENV}       maximum live memory pages (default unbounded)");
    println!("  RUST_LOG             tracing filter (default info)");
}
