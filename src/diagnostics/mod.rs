use crate::span::Span;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String, span: Span },

    #[error("undefined function '{name}'")]
    UndefinedFunction { name: String, span: Span },

    #[error("type mismatch: {msg}")]
    TypeMismatch { msg: String, span: Span },

    #[error("unsupported construct: {msg}")]
    UnsupportedConstruct { msg: String, span: Span },

    #[error("out of memory: {msg}")]
    OutOfMemory { msg: String },

    #[error("backend verification failed in '{function}': {msg}")]
    BackendVerification { function: String, msg: String },

    #[error("config error: {msg}")]
    Config { msg: String, path: PathBuf },

    #[error("input error: {msg}")]
    Input { msg: String },

    #[error("link error: {msg}")]
    Link { msg: String },

    #[error("{} error(s) during lowering", .0.len())]
    Many(Vec<CompileError>),
}

impl CompileError {
    pub fn undefined_variable(name: impl Into<String>, span: Span) -> Self {
        Self::UndefinedVariable { name: name.into(), span }
    }

    pub fn undefined_function(name: impl Into<String>, span: Span) -> Self {
        Self::UndefinedFunction { name: name.into(), span }
    }

    pub fn type_mismatch(msg: impl Into<String>, span: Span) -> Self {
        Self::TypeMismatch { msg: msg.into(), span }
    }

    pub fn unsupported(msg: impl Into<String>, span: Span) -> Self {
        Self::UnsupportedConstruct { msg: msg.into(), span }
    }

    pub fn out_of_memory(msg: impl Into<String>) -> Self {
        Self::OutOfMemory { msg: msg.into() }
    }

    pub fn verification(function: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::BackendVerification { function: function.into(), msg: msg.into() }
    }

    pub fn config(msg: impl Into<String>, path: PathBuf) -> Self {
        Self::Config { msg: msg.into(), path }
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input { msg: msg.into() }
    }

    pub fn link(msg: impl Into<String>) -> Self {
        Self::Link { msg: msg.into() }
    }

    /// Short tag used in the plain `error[kind]` rendering.
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::UndefinedVariable { .. } => "undefined-variable",
            CompileError::UndefinedFunction { .. } => "undefined-function",
            CompileError::TypeMismatch { .. } => "type-mismatch",
            CompileError::UnsupportedConstruct { .. } => "unsupported-construct",
            CompileError::OutOfMemory { .. } => "out-of-memory",
            CompileError::BackendVerification { .. } => "backend-verification",
            CompileError::Config { .. } => "config",
            CompileError::Input { .. } => "input",
            CompileError::Link { .. } => "link",
            CompileError::Many(_) => "many",
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::UndefinedVariable { span, .. }
            | CompileError::UndefinedFunction { span, .. }
            | CompileError::TypeMismatch { span, .. }
            | CompileError::UnsupportedConstruct { span, .. } => Some(*span),
            _ => None,
        }
    }

    /// Flattens `Many` so callers can count and inspect individual diagnostics.
    pub fn flatten(&self) -> Vec<&CompileError> {
        match self {
            CompileError::Many(errors) => errors.iter().flat_map(|e| e.flatten()).collect(),
            other => vec![other],
        }
    }
}

/// Error sink shared by one lowering session. A function whose lowering fails
/// pushes its error here and the session moves on to the next function.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: CompileError) {
        tracing::debug!(kind = err.kind(), "{err}");
        self.errors.push(err);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompileError> {
        self.errors.iter()
    }

    /// A single error is returned as itself; several become `Many`.
    pub fn into_result(mut self) -> Result<(), CompileError> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(CompileError::Many(self.errors)),
        }
    }
}

/// Render a CompileError with ariadne when a span and the source text are
/// available, otherwise as plain `error[kind]` lines on stderr.
pub fn render_error(source: Option<&str>, filename: &str, err: &CompileError) {
    eprint!("{}", render_to_string(source, filename, err));
}

pub fn render_to_string(source: Option<&str>, filename: &str, err: &CompileError) -> String {
    use ariadne::{Config, Label, Report, ReportKind, Source};

    if let CompileError::Many(errors) = err {
        return errors.iter().map(|e| render_to_string(source, filename, e)).collect();
    }

    if let (Some(src), Some(span)) = (source, err.span().filter(|s| !s.is_dummy())) {
        let mut out = Vec::new();
        let written = Report::build(ReportKind::Error, (), span.start)
            .with_config(Config::default().with_color(false))
            .with_message(format!("{} error", err.kind()))
            .with_label(Label::new(span.range()).with_message(err.to_string()))
            .finish()
            .write(Source::from(src), &mut out);
        if written.is_ok() {
            return String::from_utf8_lossy(&out).into_owned();
        }
    }

    match err {
        CompileError::Config { msg, path } => {
            format!("error[config]: {msg}\n  --> {}\n", path.display())
        }
        other => format!("error[{}]: {other}\n  --> {filename}\n", other.kind()),
    }
}
