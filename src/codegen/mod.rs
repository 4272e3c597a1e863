pub mod lower;
pub mod runtime;
pub mod spawn;
pub mod typemap;

use std::collections::HashMap;
use std::fmt::Write as _;

use cranelift_codegen::ir::{AbiParam, Signature, UserFuncName};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{DataId, FuncId, Linkage, Module};
use cranelift_object::{ObjectBuilder, ObjectModule};

use crate::ast::Program;
use crate::config::Config;
use crate::diagnostics::CompileError;
use crate::session::{FnPlan, LoweringSession, Registry};
use crate::symbols::Globals;
use crate::typemap::{DataLayout, TypeMapper};
use crate::types::KilnType;
use lower::{lower_function, LowerEnv};
use runtime::RuntimeRegistry;
use typemap::IrTypeMapper;

/// Backend context for the Cranelift path: the object module under
/// construction plus everything declared in it so far.
pub struct IrBackend {
    module: ObjectModule,
    runtime: RuntimeRegistry,
    types: IrTypeMapper,
    func_ids: HashMap<String, FuncId>,
    strings: HashMap<String, DataId>,
    bounds_checks: bool,
    verify: bool,
    clif: Option<String>,
}

impl IrBackend {
    pub fn new(config: &Config) -> Result<Self, CompileError> {
        let mut flag_builder = settings::builder();
        let flag = |e: settings::SetError| CompileError::verification("<isa>", format!("settings error: {e}"));
        flag_builder.set("is_pic", "true").map_err(flag)?;
        flag_builder.set("opt_level", config.opt_level.cranelift_name()).map_err(flag)?;
        flag_builder
            .set("enable_verifier", if config.verify { "true" } else { "false" })
            .map_err(flag)?;

        let triple = if config.target == "host" {
            target_lexicon::Triple::host()
        } else {
            config.target.parse::<target_lexicon::Triple>().map_err(|e| {
                CompileError::config(format!("unknown target '{}': {e}", config.target), "kiln.toml".into())
            })?
        };
        let isa_builder = cranelift_codegen::isa::lookup(triple)
            .map_err(|e| CompileError::config(format!("unsupported target: {e}"), "kiln.toml".into()))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| CompileError::verification("<isa>", format!("ISA error: {e}")))?;
        let pointer_bytes = isa.pointer_bytes() as u32;

        let obj_builder = ObjectBuilder::new(isa, "kiln_module", cranelift_module::default_libcall_names())
            .map_err(|e| CompileError::verification("<module>", format!("object builder error: {e}")))?;
        let mut module = ObjectModule::new(obj_builder);
        let runtime = RuntimeRegistry::new(&mut module)?;

        if !config.bounds_checks {
            tracing::warn!("array bounds checks disabled");
        }

        Ok(Self {
            module,
            runtime,
            types: IrTypeMapper::new(Some(DataLayout { pointer_bytes })),
            func_ids: HashMap::new(),
            strings: HashMap::new(),
            bounds_checks: config.bounds_checks,
            verify: config.verify,
            clif: None,
        })
    }

    /// Keep the textual IR of every function lowered from now on.
    pub fn capture_ir(mut self) -> Self {
        self.clif = Some(String::new());
        self
    }

    pub fn ir_text(&self) -> Option<&str> {
        self.clif.as_deref()
    }

    pub fn emit(self) -> Result<Vec<u8>, CompileError> {
        let product = self.module.finish();
        let bytes = product
            .emit()
            .map_err(|e| CompileError::verification("<module>", format!("emit error: {e}")))?;
        tracing::info!(bytes = bytes.len(), "object module emitted");
        Ok(bytes)
    }

    fn signature(&mut self, params: &[KilnType], has_env: bool, ret: &KilnType, is_main: bool) -> Signature {
        let mut sig = self.module.make_signature();
        if has_env {
            sig.params.push(AbiParam::new(cranelift_codegen::ir::types::I64));
        }
        for p in params {
            sig.params.push(AbiParam::new(self.types.map(p)));
        }
        if is_main {
            sig.returns.push(AbiParam::new(cranelift_codegen::ir::types::I64));
        } else if !ret.is_void() {
            sig.returns.push(AbiParam::new(self.types.map(ret)));
        }
        sig
    }

    fn declare(&mut self, name: &str, sig: &Signature, linkage: Linkage) -> Result<(), CompileError> {
        let id = self
            .module
            .declare_function(name, linkage, sig)
            .map_err(|e| CompileError::verification(name, format!("declare function error: {e}")))?;
        self.func_ids.insert(name.to_string(), id);
        Ok(())
    }

    fn declare_all(&mut self, program: &Program, registry: &Registry) -> Result<(), CompileError> {
        for func in &program.functions {
            let is_main = func.name == "main";
            let params: Vec<KilnType> = func.params.iter().map(|p| p.ty.clone()).collect();
            let sig = self.signature(&params, false, &func.return_type, is_main);
            let linkage = if is_main { Linkage::Export } else { Linkage::Local };
            self.declare(&func.name, &sig, linkage)?;
        }
        for lambda in registry.lambdas() {
            let plan = FnPlan::for_lambda(lambda);
            let params: Vec<KilnType> = plan.params.iter().map(|p| p.ty.clone()).collect();
            let sig = self.signature(&params, plan.env_captures.is_some(), plan.return_type, false);
            self.declare(plan.name, &sig, Linkage::Local)?;
        }
        for wrapper in registry.spawn_wrappers() {
            let sig = spawn::wrapper_signature(&self.module);
            self.declare(&wrapper.name, &sig, Linkage::Local)?;
        }
        Ok(())
    }

    fn define(&mut self, plan: &FnPlan<'_>, globals: &Globals, registry: &Registry) -> Result<(), CompileError> {
        let id = *self
            .func_ids
            .get(plan.name)
            .ok_or_else(|| CompileError::undefined_function(plan.name, crate::span::Span::dummy()))?;
        let params: Vec<KilnType> = plan.params.iter().map(|p| p.ty.clone()).collect();
        let sig = self.signature(&params, plan.env_captures.is_some(), plan.return_type, plan.is_main);

        let mut ctx = self.module.make_context();
        ctx.func.signature = sig;
        ctx.func.name = UserFuncName::user(0, id.as_u32());

        let mut builder_ctx = FunctionBuilderContext::new();
        {
            let builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
            let env = LowerEnv {
                module: &mut self.module,
                runtime: &self.runtime,
                types: &mut self.types,
                globals,
                registry,
                func_ids: &self.func_ids,
                strings: &mut self.strings,
                bounds_checks: self.bounds_checks,
            };
            lower_function(plan, builder, env)?;
        }
        self.finish_function(plan.name, id, ctx)
    }

    /// Verify, record the IR text if requested, and hand the function to the module.
    fn finish_function(&mut self, name: &str, id: FuncId, mut ctx: Context) -> Result<(), CompileError> {
        if self.verify {
            cranelift_codegen::verify_function(&ctx.func, self.module.isa())
                .map_err(|e| CompileError::verification(name, e.to_string()))?;
        }
        if let Some(text) = &mut self.clif {
            let _ = writeln!(text, "; kiln: {name}\n{}", ctx.func.display());
        }
        self.module
            .define_function(id, &mut ctx)
            .map_err(|e| CompileError::verification(name, format!("define function error: {e:?}")))?;
        self.module.clear_context(&mut ctx);
        tracing::debug!(function = name, "lowered");
        Ok(())
    }
}

/// Lowers an already lambda-lifted program into the session's object module.
/// Each failing function reports to the session's diagnostics and lowering
/// moves on to the next one.
pub fn lower_program(session: &mut LoweringSession<IrBackend>, program: &Program) {
    let LoweringSession { registry, diagnostics, backend } = session;
    let globals = Globals::from_program(program);

    if let Err(e) = backend.declare_all(program, registry) {
        diagnostics.push(e);
        return;
    }

    for wrapper in registry.spawn_wrappers() {
        if let Err(e) = spawn::define_wrapper(backend, wrapper) {
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
