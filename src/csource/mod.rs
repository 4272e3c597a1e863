//! C source backend.
//!
//! Lowers the same lambda-lifted program the Cranelift path consumes into a
//! single C translation unit. Expressions are emitted three-address style:
//! anything with side effects (calls, allocation) is materialized into a
//! `__tN` temporary in evaluation order, so the C compiler's freedom over
//! argument evaluation order never changes behavior.

mod expr;
mod matching;
mod stmt;
pub mod typemap;
pub mod writer;

use crate::ast::Program;
use crate::builtins::{Abi, RUNTIME};
use crate::config::Config;
use crate::diagnostics::CompileError;
use crate::session::{FnPlan, LoweringSession, Registry, SpawnWrapper};
use crate::symbols::{Globals, SymbolTable};
use crate::typemap::{DataLayout, TypeMapper};
use crate::types::KilnType;
use typemap::{c_ident, from_slot, to_slot, CTypeMapper};
use writer::CWriter;

pub const RUNTIME_HEADER: &str = "kiln_runtime.h";

/// Backend context for the C path: the sections of the translation unit
/// under construction.
pub struct CBackend {
    types: CTypeMapper,
    bounds_checks: bool,
    type_decls: Vec<String>,
    prototypes: Vec<String>,
    functions: Vec<String>,
}

impl CBackend {
    pub fn new(config: &Config) -> Self {
        if !config.bounds_checks {
            tracing::warn!("array bounds checks disabled");
        }
        Self {
            types: CTypeMapper::new(Some(DataLayout::host())),
            bounds_checks: config.bounds_checks,
            type_decls: Vec::new(),
            prototypes: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Assemble the translation unit.
    pub fn into_source(self) -> String {
        let mut out = String::new();
        out.push_str("/* Generated by kilnc. Do not edit. */\n");
        out.push_str(&format!("#include \"{RUNTIME_HEADER}\"\n\n"));
        for f in RUNTIME {
            out.push_str(&extern_decl(f.symbol, f.params, f.ret));
            out.push('\n');
        }
        for section in [&self.type_decls, &self.prototypes] {
            if !section.is_empty() {
                out.push('\n');
            }
            for decl in section {
                out.push_str(decl);
                out.push('\n');
            }
        }
        for func in &self.functions {
            out.push('\n');
            out.push_str(func);
        }
        tracing::info!(bytes = out.len(), functions = self.functions.len(), "C translation unit emitted");
        out
    }

    fn declare_types(&mut self, program: &Program, registry: &Registry) {
        for decl in &program.enums {
            let variants: Vec<String> =
                decl.variants.iter().enumerate().map(|(i, v)| format!("{v} = {i}")).collect();
            self.type_decls.push(format!("/* enum {}: {} */", decl.name, variants.join(", ")));
        }
        for decl in &program.structs {
            let name = c_ident(&decl.name);
            self.type_decls.push(format!("typedef struct {name} {name};"));
        }
        for decl in &program.structs {
            let mut w = CWriter::new();
            w.open(&format!("struct {}", c_ident(&decl.name)));
            if decl.fields.is_empty() {
                w.line("char unused;");
            }
            for field in &decl.fields {
                let ty = self.types.map(&field.ty);
                w.line(&format!("{ty} {};", c_ident(&field.name)));
            }
            w.close(";");
            self.type_decls.push(w.finish_decl());
        }
        for lambda in registry.lambdas().filter(|l| l.has_env()) {
            let mut w = CWriter::new();
            w.open("typedef struct");
            for cap in &lambda.captures {
                let ty = self.types.map(&cap.ty);
                w.line(&format!("{ty} {};", c_ident(&cap.name)));
            }
            w.close(&format!(" {};", env_type_name(&lambda.name)));
            self.type_decls.push(w.finish_decl());
        }
    }

    fn declare_prototypes(&mut self, program: &Program, registry: &Registry) {
        for wrapper in registry.spawn_wrappers() {
            self.prototypes.push(format!("static void* {}(void*);", wrapper.name));
        }
        for lambda in registry.lambdas() {
            let sig = signature(&mut self.types, &FnPlan::for_lambda(lambda), None);
            self.prototypes.push(format!("{sig};"));
        }
        for func in program.functions.iter().filter(|f| f.name != "main") {
            let sig = signature(&mut self.types, &FnPlan::for_function(func), None);
            self.prototypes.push(format!("{sig};"));
        }
    }

    fn define(&mut self, plan: &FnPlan<'_>, globals: &Globals, registry: &Registry) -> Result<(), CompileError> {
        let env = CEnv { types: &mut self.types, globals, registry, bounds_checks: self.bounds_checks };
        let text = stmt::lower_function(plan, env)?;
        self.functions.push(text);
        tracing::debug!(function = plan.name, "lowered to C");
        Ok(())
    }

    /// The trampoline the runtime runs on the task's thread: unpack the
    /// argument slots, call the target, free the slots, box the result.
    fn define_wrapper(&mut self, wrapper: &SpawnWrapper, globals: &Globals) -> Result<(), CompileError> {
        if !globals.has_function(&wrapper.callee) {
            return Err(CompileError::undefined_function(wrapper.callee.clone(), crate::span::Span::dummy()));
        }
        let mut w = CWriter::new();
        w.open(&format!("static void* {}(void* args)", wrapper.name));
        let args: Vec<String> = wrapper
            .param_types
            .iter()
            .enumerate()
            .map(|(i, ty)| from_slot(&format!("((KilnSlot*)args)[{i}]"), ty))
            .collect();
        let call = format!("{}({})", user_fn_name(&wrapper.callee), args.join(", "));
        let free_args = wrapper.arg_count() > 0;
        if wrapper.return_type.is_void() {
            w.line(&format!("{call};"));
            if free_args {
                w.line("__kiln_free(args);");
            }
            w.line("return NULL;");
        } else {
            let ret_ty = self.types.map(&wrapper.return_type);
            w.line(&format!("{ret_ty} result = {call};"));
            if free_args {
                w.line("__kiln_free(args);");
            }
            w.line("KilnSlot* boxed = (KilnSlot*)__kiln_alloc(sizeof(KilnSlot));");
            w.line(&to_slot("boxed[0]", "result", &wrapper.return_type));
            w.line("return boxed;");
        }
        w.close("");
        self.functions.push(w.finish(&wrapper.name)?);
        tracing::debug!(wrapper = %wrapper.name, callee = %wrapper.callee, "spawn wrapper defined");
        Ok(())
    }
}

fn extern_decl(symbol: &str, params: &[Abi], ret: Abi) -> String {
    let params = if params.is_empty() {
        "void".to_string()
    } else {
        params.iter().map(|p| p.c_type()).collect::<Vec<_>>().join(", ")
    };
    format!("extern {} {symbol}({params});", ret.c_type())
}

/// C name of a source function. `main` keeps its name; everything else is
/// prefixed so user names never collide with C or runtime symbols.
pub fn user_fn_name(name: &str) -> String {
    if name == "main" { "main".to_string() } else { format!("kiln_{}", c_ident(name)) }
}

fn plan_fn_name(plan: &FnPlan<'_>) -> String {
    if plan.lifted { plan.name.to_string() } else { user_fn_name(plan.name) }
}

pub fn env_type_name(lambda_name: &str) -> String {
    format!("{lambda_name}_env")
}

/// `static R name(params)`, with parameter names when defining.
fn signature(types: &mut CTypeMapper, plan: &FnPlan<'_>, names: Option<&[String]>) -> String {
    if plan.is_main {
        return "int main(void)".to_string();
    }
    let ret = if plan.return_type.is_void() { "void".to_string() } else { types.map(plan.return_type) };
    let mut params = Vec::with_capacity(plan.params.len() + 1);
    if plan.env_captures.is_some() {
        params.push(if names.is_some() { "void* env".to_string() } else { "void*".to_string() });
    }
    for (i, p) in plan.params.iter().enumerate() {
        let ty = types.map(&p.ty);
        params.push(match names.and_then(|n| n.get(i)) {
            Some(name) => format!("{ty} {name}"),
            None => ty,
        });
    }
    if params.is_empty() {
        params.push("void".to_string());
    }
    format!("static {ret} {}({})", plan_fn_name(plan), params.join(", "))
}

/// Module-wide state a function lowering borrows from the backend.
pub struct CEnv<'a> {
    pub types: &'a mut CTypeMapper,
    pub globals: &'a Globals,
    pub registry: &'a Registry,
    pub bounds_checks: bool,
}

/// A lowered expression: C code plus the semantic type it has.
#[derive(Debug, Clone, PartialEq)]
struct CValue {
    code: String,
    ty: KilnType,
}

impl CValue {
    fn new(code: impl Into<String>, ty: KilnType) -> Self {
        Self { code: code.into(), ty }
    }

    fn void() -> Self {
        Self::new("0", KilnType::Void)
    }

    /// Identifiers and plain literals: safe to repeat without re-evaluation.
    fn is_atom(&self) -> bool {
        !self.code.is_empty() && self.code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    }

    /// Temps and constants: nothing emitted later can change what they read.
    /// Locals, element slots and fields can be rewritten by a later side effect.
    fn is_stable(&self) -> bool {
        let code = self.code.as_str();
        if let Some(n) = code.strip_prefix("__t") {
            return !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit());
        }
        matches!(code, "true" | "false" | "NULL" | "NAN" | "INFINITY" | "(-INFINITY)")
            || (code.starts_with('"') && code.ends_with('"'))
            || (!code.is_empty() && code.chars().all(|c| c.is_ascii_digit() || "().-+eL ".contains(c)))
    }
}

/// Storage for a name in the function being lowered.
#[derive(Debug, Clone)]
enum CSlot {
    Local(String),
    /// A `let`-bound lambda that never escapes; holds the C locals the
    /// captured values were snapshotted into.
    Direct { lambda: u32, captures: Vec<String> },
}

struct FnContext<'a> {
    out: CWriter,
    env: CEnv<'a>,
    symbols: SymbolTable<CSlot>,
    next_temp: u32,
    next_local: u32,
    return_type: KilnType,
    is_main: bool,
    fn_name: String,
    loop_depth: usize,
}

impl FnContext<'_> {
    fn c_type(&mut self, ty: &KilnType) -> String {
        self.env.types.map(ty)
    }

    fn fresh_temp(&mut self) -> String {
        let name = format!("__t{}", self.next_temp);
        self.next_temp += 1;
        name
    }

    /// Unique C name for a source-level local.
    fn fresh_local(&mut self, name: &str) -> String {
        let local = format!("{}_{}", c_ident(name).trim_start_matches('_'), self.next_local);
        self.next_local += 1;
        local
    }

    /// `T __tN = code;`
    fn temp(&mut self, ty: &KilnType, code: &str) -> CValue {
        let name = self.fresh_temp();
        let c_ty = self.c_type(ty);
        self.out.line(&format!("{c_ty} {name} = {code};"));
        CValue::new(name, ty.clone())
    }

    /// Make `value` safe to mention more than once.
    fn hoist(&mut self, value: CValue) -> CValue {
        if value.is_atom() {
            value
        } else {
            self.temp(&value.ty.clone(), &value.code)
        }
    }

    fn bind_local(&mut self, name: &str, ty: &KilnType, init: &str) -> Result<(), CompileError> {
        let local = self.fresh_local(name);
        let c_ty = self.c_type(ty);
        self.out.line(&format!("{c_ty} {local} = {init};"));
        self.symbols.insert(name, CSlot::Local(local), ty.clone())
    }

    fn emit_runtime_panic(&mut self, msg: &str) {
        self.out.line(&format!("__kiln_panic({});", typemap::c_string_literal(msg)));
    }

    /// Int to float promotion where the destination type asks for it.
    fn coerce(&self, value: CValue, to: &KilnType) -> CValue {
        match (&value.ty, to) {
            (KilnType::Int, KilnType::Float) => CValue::new(format!("(double){}", value.code), KilnType::Float),
            _ => value,
        }
    }
}

/// Lowers an already lambda-lifted program into the session's translation
/// unit. Each failing function reports to the session's diagnostics and
/// lowering moves on to the next one.
pub fn lower_program(session: &mut LoweringSession<CBackend>, program: &Program) {
    let LoweringSession { registry, diagnostics, backend } = session;
    let globals = Globals::from_program(program);

    backend.declare_types(program, registry);
    backend.declare_prototypes(program, registry);

    for wrapper in registry.spawn_wrappers() {
        if let Err(e) = backend.define_wrapper(wrapper, &globals) {
            diagnostics.push(e);
        }
    }
    for lambda in registry.lambdas() {
        if let Err(e) = backend.define(&FnPlan::for_lambda(lambda), &globals, registry) {
            diagnostics.push(e);
        }
    }
    for func in &program.functions {
        tracing::trace!(function = %func.name, "lowering function");
        if let Err(e) = backend.define(&FnPlan::for_function(func), &globals, registry) {
            diagnostics.push(e);
        }
    }
}
