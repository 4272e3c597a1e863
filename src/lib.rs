pub mod ast;
pub mod builtins;
pub mod closures;
pub mod codegen;
pub mod config;
pub mod csource;
pub mod diagnostics;
pub mod session;
pub mod span;
pub mod symbols;
pub mod typemap;
pub mod types;
pub mod visit;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Once, OnceLock};

use ast::Program;
use codegen::IrBackend;
use csource::CBackend;
use session::LoweringSession;

pub use config::{Backend, Config};
pub use diagnostics::CompileError;

const RUNTIME_SOURCE: &str = include_str!("../runtime/kiln_runtime.c");
const RUNTIME_HEADER_SOURCE: &str = include_str!("../runtime/kiln_runtime.h");

/// Install the stderr subscriber once, filtered by `RUST_LOG`. Without
/// `RUST_LOG` nothing is installed.
pub fn init_tracing() {
    init_tracing_with(None);
}

/// Like [`init_tracing`], but `directives` (e.g. `"kiln=debug"`) take
/// precedence over `RUST_LOG`.
pub fn init_tracing_with(directives: Option<&str>) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = match directives {
            Some(d) => EnvFilter::new(d),
            None if std::env::var_os("RUST_LOG").is_some() => EnvFilter::from_default_env(),
            None => return,
        };
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init();
    });
}

/// Read a type-checked program from its JSON form.
pub fn load_program(path: &Path) -> Result<Program, CompileError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CompileError::input(format!("failed to read '{}': {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| CompileError::input(format!("invalid program JSON in '{}': {e}", path.display())))
}

/// Lower through Cranelift to a relocatable object. Lambda lifting runs on a
/// private copy; `program` is left untouched.
pub fn lower_to_object(program: &Program, config: &Config) -> Result<Vec<u8>, CompileError> {
    let mut session = LoweringSession::new(IrBackend::new(config)?);
    let lifted = closures::lift_lambdas(program, &mut session.registry);
    codegen::lower_program(&mut session, &lifted);
    session.finish()?.emit()
}

/// Textual Cranelift IR of every lowered function.
pub fn lower_to_clif(program: &Program, config: &Config) -> Result<String, CompileError> {
    let mut session = LoweringSession::new(IrBackend::new(config)?.capture_ir());
    let lifted = closures::lift_lambdas(program, &mut session.registry);
    codegen::lower_program(&mut session, &lifted);
    let backend = session.finish()?;
    Ok(backend.ir_text().unwrap_or_default().to_string())
}

/// Lower to one C translation unit.
pub fn lower_to_c(program: &Program, config: &Config) -> Result<String, CompileError> {
    let mut session = LoweringSession::new(CBackend::new(config));
    let lifted = closures::lift_lambdas(program, &mut session.registry);
    csource::lower_program(&mut session, &lifted);
    Ok(session.finish()?.into_source())
}

/// Lower with both backends and report every diagnostic either produced.
/// An error both backends hit is reported once.
pub fn check_program(program: &Program, config: &Config) -> Result<(), CompileError> {
    let mut errors: Vec<CompileError> = Vec::new();
    let results = [lower_to_object(program, config).err(), lower_to_c(program, config).err()];
    for err in results.into_iter().flatten() {
        let flat = match err {
            CompileError::Many(many) => many,
            single => vec![single],
        };
        for e in flat {
            let text = e.to_string();
            if !errors.iter().any(|seen| seen.to_string() == text) {
                errors.push(e);
            }
        }
    }
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(CompileError::Many(errors)),
    }
}

/// Lower `program` with `backend` and link it with the runtime into `output`.
pub fn build_executable(program: &Program, config: &Config, backend: Backend, output: &Path) -> Result<(), CompileError> {
    let runtime = runtime_files()?;
    match backend {
        Backend::Ir => {
            let object = lower_to_object(program, config)?;
            let obj_path = output.with_extension("o");
            std::fs::write(&obj_path, &object)
                .map_err(|e| CompileError::link(format!("failed to write object file: {e}")))?;
            let mut cmd = Command::new(&config.cc);
            cmd.arg(&obj_path).arg(&runtime.source).arg("-I").arg(&runtime.dir);
            let result = link(cmd, config, output);
            let _ = std::fs::remove_file(&obj_path);
            result
        }
        Backend::C => {
            let source = lower_to_c(program, config)?;
            let c_path = output.with_extension("c");
            std::fs::write(&c_path, source)
                .map_err(|e| CompileError::link(format!("failed to write C source: {e}")))?;
            let mut cmd = Command::new(&config.cc);
            cmd.arg(config.opt_level.c_flag())
                .arg("-fwrapv")
                .arg("-I")
                .arg(&runtime.dir)
                .arg(&c_path)
                .arg(&runtime.source);
            let result = link(cmd, config, output);
            let _ = std::fs::remove_file(&c_path);
            result
        }
    }
}

struct RuntimeFiles {
    dir: PathBuf,
    source: PathBuf,
}

/// Write the runtime sources once per process.
fn runtime_files() -> Result<&'static RuntimeFiles, CompileError> {
    static CACHE: OnceLock<Result<RuntimeFiles, String>> = OnceLock::new();
    let result = CACHE.get_or_init(|| {
        (|| -> Result<RuntimeFiles, CompileError> {
            let dir = std::env::temp_dir().join(format!("kiln_runtime_{}", std::process::id()));
            std::fs::create_dir_all(&dir)
                .map_err(|e| CompileError::link(format!("failed to create runtime dir: {e}")))?;
            let source = dir.join("kiln_runtime.c");
            std::fs::write(&source, RUNTIME_SOURCE)
                .map_err(|e| CompileError::link(format!("failed to write runtime source: {e}")))?;
            std::fs::write(dir.join(csource::RUNTIME_HEADER), RUNTIME_HEADER_SOURCE)
                .map_err(|e| CompileError::link(format!("failed to write runtime header: {e}")))?;
            tracing::debug!(dir = %dir.display(), "runtime sources written");
            Ok(RuntimeFiles { dir, source })
        })()
        .map_err(|e| e.to_string())
    });
    match result {
        Ok(files) => Ok(files),
        Err(msg) => Err(CompileError::link(msg.clone())),
    }
}

fn link(mut cmd: Command, config: &Config, output: &Path) -> Result<(), CompileError> {
    cmd.args(&config.c_flags).arg("-lpthread").arg("-lm").arg("-o").arg(output);
    tracing::debug!(?cmd, "linking");
    let out = cmd
        .output()
        .map_err(|e| CompileError::link(format!("failed to invoke '{}': {e}", config.cc)))?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        return Err(CompileError::link(format!("{} failed:\n{}", config.cc, stderr.trim_end())));
    }
    tracing::info!(output = %output.display(), "linked executable");
    Ok(())
}
