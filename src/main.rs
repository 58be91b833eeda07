//! `basicc` CLI front end (spec.md §6)
//!
//! Out of the compiler core proper (spec.md §1): this binary only parses
//! flags, drives `basicc::compile_to_ir`/`compile_file`, and maps the
//! result to a process exit code. Grounded on the teacher's `main.rs` use
//! of `clap::Parser` derive plus an explicit `process::exit(1)` on error
//! rather than propagating a `Result` out of `main`.

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};

use basicc::config::{BackendConfig, EmitStage, ProjectConfig};

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "basicc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ahead-of-time compiler for the patch-basic dialect", long_about = None)]
struct Cli {
    /// Input .basic source file
    input: PathBuf,

    /// Output path (defaults to the input filename without its extension)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Stop after the external backend emits assembly; don't link
    #[arg(short = 'c')]
    compile_only: bool,

    /// Stop after this compiler emits IR text; don't invoke the backend
    #[arg(long)]
    emit_ir: bool,

    /// Alias for `-c`: stop after assembly, matching spec.md's flag name
    #[arg(long)]
    emit_asm: bool,

    /// Run the resulting executable immediately after a successful build
    #[arg(long)]
    run: bool,

    /// Echo backend/linker subprocess invocations
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Pass a profiling flag through to the backend
    #[arg(long)]
    profile: bool,

    /// Keep `<base>.ir` / `<base>.s` after a successful build
    #[arg(long)]
    keep_temps: bool,

    /// Target triple passed to the backend
    #[arg(long)]
    target: Option<String>,

    /// Enable the backend's multiply-add fusion flag (default: on)
    #[arg(long, conflicts_with = "disable_madd_fusion")]
    enable_madd_fusion: bool,

    /// Disable the backend's multiply-add fusion flag
    #[arg(long)]
    disable_madd_fusion: bool,

    /// Diagnostic output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Project-level defaults file (defaults to `basicc.toml` in the
    /// current directory if present)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let output = cli.output.clone().unwrap_or_else(|| {
        let stem = cli.input.file_stem().unwrap_or_default();
        PathBuf::from(stem)
    });

    let emit_stage = if cli.emit_ir {
        EmitStage::Ir
    } else if cli.compile_only || cli.emit_asm {
        EmitStage::Assembly
    } else {
        EmitStage::Executable
    };

    let config_path = cli
        .config
        .clone()
        .or_else(|| Some(PathBuf::from("basicc.toml")).filter(|p| p.exists()));
    let project = match &config_path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => match ProjectConfig::from_toml(&text) {
                Ok(project) => project,
                Err(e) => {
                    eprintln!("error: {e}");
                    process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("error: failed to read {}: {e}", path.display());
                process::exit(1);
            }
        },
        None => ProjectConfig::default(),
    };

    let mut config = BackendConfig::default().merge_project_defaults(&project);
    if let Some(target) = &cli.target {
        config.target = Some(target.clone());
    }
    if cli.disable_madd_fusion {
        config.madd_fusion = false;
    } else if cli.enable_madd_fusion {
        config.madd_fusion = true;
    }
    config.keep_temps = cli.keep_temps;
    config.verbose = cli.verbose;
    config.profile = cli.profile;
    config.emit_stage = emit_stage;

    let source = match std::fs::read_to_string(&cli.input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to read {}: {e}", cli.input.display());
            process::exit(1);
        }
    };

    let result = match std::panic::catch_unwind(|| basicc::compile_to_ir(&source)) {
        Ok(result) => result,
        Err(_) => {
            eprintln!("internal compiler error: compiler panicked");
            process::exit(1);
        }
    };
    report_diagnostics(&result, cli.format);
    if cli.profile {
        report_profile(&result.stats);
    }

    if !result.success() {
        process::exit(1);
    }

    let ir = result.ir.expect("success() implies IR was produced");
    if let Err(e) = basicc::backend::link(&ir, &output, &config) {
        eprint!("{e}");
        process::exit(1);
    }

    if cli.verbose {
        println!("compiled {} -> {}", cli.input.display(), output.display());
    }

    if cli.run && emit_stage == EmitStage::Executable {
        match process::Command::new(&output).status() {
            Ok(status) => process::exit(status.code().unwrap_or(1)),
            Err(e) => {
                eprintln!("error: failed to run {}: {e}", output.display());
                process::exit(1);
            }
        }
    }
}

fn report_profile(stats: &basicc::ProfileStats) {
    eprintln!("lines lexed:        {}", stats.lines_lexed);
    eprintln!("statements parsed:  {}", stats.statements_parsed);
    eprintln!("symbols declared:   {}", stats.symbols_declared);
    eprintln!("basic blocks built: {}", stats.basic_blocks_built);
    eprintln!("IR lines emitted:   {}", stats.ir_lines_emitted);
}

fn report_diagnostics(result: &basicc::CompileOutput, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            for warning in &result.warnings {
                eprintln!("{warning}");
            }
            for error in &result.errors {
                eprintln!("{error}");
            }
        }
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "errors": result.errors,
                "warnings": result.warnings,
            });
            println!("{}", serde_json::to_string_pretty(&payload).unwrap());
        }
    }
}
