use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use kiln::diagnostics::render_error;
use kiln::{Backend, CompileError, Config};

#[derive(Parser)]
#[command(name = "kilnc", version, about = "Lower type-checked kiln programs to native code or C")]
struct Cli {
    /// Log lowering progress (same as RUST_LOG=kiln=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to kiln.toml (defaults to the nearest one above the program)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LowerArgs {
    /// Type-checked program in JSON form
    program: PathBuf,

    /// Array bounds checks off (overrides kiln.toml)
    #[arg(long)]
    no_bounds_checks: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Lower and link a native executable
    Build {
        #[command(flatten)]
        args: LowerArgs,
        /// Output binary path
        #[arg(short, long, default_value = "a.out")]
        output: PathBuf,
        /// Lowering backend (overrides kiln.toml)
        #[arg(long, value_enum)]
        backend: Option<Backend>,
    },
    /// Write the C translation unit
    EmitC {
        #[command(flatten)]
        args: LowerArgs,
        /// Output path; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write the relocatable object produced by the IR backend
    EmitObj {
        #[command(flatten)]
        args: LowerArgs,
        /// Output object path
        #[arg(short, long, default_value = "out.o")]
        output: PathBuf,
    },
    /// Print the verified Cranelift IR of every function
    EmitIr {
        #[command(flatten)]
        args: LowerArgs,
    },
    /// Lower with both backends and report diagnostics without writing output
    Check {
        #[command(flatten)]
        args: LowerArgs,
    },
    /// Build into a temporary directory and run, forwarding the exit status
    Run {
        #[command(flatten)]
        args: LowerArgs,
        /// Lowering backend (overrides kiln.toml)
        #[arg(long, value_enum)]
        backend: Option<Backend>,
    },
}

impl Commands {
    fn args(&self) -> &LowerArgs {
        match self {
            Commands::Build { args, .. }
            | Commands::EmitC { args, .. }
            | Commands::EmitObj { args, .. }
            | Commands::EmitIr { args }
            | Commands::Check { args }
            | Commands::Run { args, .. } => args,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    kiln::init_tracing_with(cli.verbose.then_some("kiln=debug"));

    let args = cli.command.args();
    let filename = args.program.display().to_string();
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            render_error(None, &filename, &err);
            std::process::exit(1);
        }
    }
}

fn resolve_config(cli: &Cli, args: &LowerArgs) -> Result<Config, CompileError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => {
            let start = args
                .program
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Config::discover(&start)?
        }
    };
    if args.no_bounds_checks {
        config.bounds_checks = false;
    }
    Ok(config)
}

/// Runs the selected command; the result is the process exit status.
fn run(cli: &Cli) -> Result<i32, CompileError> {
    let args = cli.command.args();
    let config = resolve_config(cli, args)?;
    let program = kiln::load_program(&args.program)?;

    match &cli.command {
        Commands::Build { output, backend, .. } => {
            let backend = backend.unwrap_or(config.backend);
            kiln::build_executable(&program, &config, backend, output)?;
            Ok(0)
        }
        Commands::EmitC { output, .. } => {
            let source = kiln::lower_to_c(&program, &config)?;
            match output {
                Some(path) => std::fs::write(path, source)
                    .map_err(|e| CompileError::input(format!("failed to write '{}': {e}", path.display())))?,
                None => print!("{source}"),
            }
            Ok(0)
        }
        Commands::EmitObj { output, .. } => {
            let object = kiln::lower_to_object(&program, &config)?;
            std::fs::write(output, object)
                .map_err(|e| CompileError::input(format!("failed to write '{}': {e}", output.display())))?;
            Ok(0)
        }
        Commands::EmitIr { .. } => {
            print!("{}", kiln::lower_to_clif(&program, &config)?);
            Ok(0)
        }
        Commands::Check { .. } => {
            kiln::check_program(&program, &config)?;
            eprintln!("{}: ok ({} function(s))", args.program.display(), program.functions.len());
            Ok(0)
        }
        Commands::Run { backend, .. } => {
            let backend = backend.unwrap_or(config.backend);
            let dir = std::env::temp_dir().join(format!("kiln_run_{}", std::process::id()));
            std::fs::create_dir_all(&dir)
                .map_err(|e| CompileError::input(format!("failed to create '{}': {e}", dir.display())))?;
            let exe = dir.join("program");
            let built = kiln::build_executable(&program, &config, backend, &exe);
            let status = built.and_then(|()| {
                std::process::Command::new(&exe)
                    .status()
                    .map_err(|e| CompileError::input(format!("failed to run '{}': {e}", exe.display())))
            });
            let _ = std::fs::remove_dir_all(&dir);
            Ok(status?.code().unwrap_or(1))
        }
    }
}
