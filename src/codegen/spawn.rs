use cranelift_codegen::ir::immediates::Offset32;
use cranelift_codegen::ir::{types, AbiParam, InstBuilder, MemFlags, Signature, UserFuncName};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::Module;

use crate::diagnostics::CompileError;
use crate::session::SpawnWrapper;
use crate::span::Span;

use super::lower::POINTER_SIZE;
use super::typemap::{from_slot, to_slot};
use super::IrBackend;

/// Every task wrapper is `(args: void*) -> void*`.
pub fn wrapper_signature(module: &dyn Module) -> Signature {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(types::I64));
    sig.returns.push(AbiParam::new(types::I64));
    sig
}

/// Define the trampoline the runtime runs on the task's thread: unpack the
/// argument box, call the target, free the box, and return the result boxed
/// (null for void targets).
pub fn define_wrapper(backend: &mut IrBackend, wrapper: &SpawnWrapper) -> Result<(), CompileError> {
    let id = *backend
        .func_ids
        .get(&wrapper.name)
        .ok_or_else(|| CompileError::undefined_function(wrapper.name.clone(), Span::dummy()))?;
    let callee_id = *backend
        .func_ids
        .get(&wrapper.callee)
        .ok_or_else(|| CompileError::undefined_function(wrapper.callee.clone(), Span::dummy()))?;
    let alloc_id = backend.runtime.get("__kiln_alloc")?;
    let free_id = backend.runtime.get("__kiln_free")?;

    let mut ctx = backend.module.make_context();
    ctx.func.signature = wrapper_signature(&backend.module);
    ctx.func.name = UserFuncName::user(0, id.as_u32());

    let mut builder_ctx = FunctionBuilderContext::new();
    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
        let entry_block = builder.create_block();
        builder.append_block_params_for_function_params(entry_block);
        builder.switch_to_block(entry_block);
        builder.seal_block(entry_block);
        let args_ptr = builder.block_params(entry_block)[0];

        let mut args = Vec::with_capacity(wrapper.arg_count());
        for (i, ty) in wrapper.param_types.iter().enumerate() {
            let raw = builder.ins().load(types::I64, MemFlags::new(), args_ptr, Offset32::new(i as i32 * POINTER_SIZE));
            args.push(from_slot(raw, ty, &mut builder));
        }

        let callee_ref = backend.module.declare_func_in_func(callee_id, builder.func);
        let call = builder.ins().call(callee_ref, &args);
        let result = builder.inst_results(call).first().copied();

        if wrapper.arg_count() > 0 {
            let free_ref = backend.module.declare_func_in_func(free_id, builder.func);
            builder.ins().call(free_ref, &[args_ptr]);
        }

        let boxed = match result {
            Some(val) if !wrapper.return_type.is_void() => {
                let slot = to_slot(val, &wrapper.return_type, &mut builder);
                let size = builder.ins().iconst(types::I64, i64::from(POINTER_SIZE));
                let alloc_ref = backend.module.declare_func_in_func(alloc_id, builder.func);
                let call = builder.ins().call(alloc_ref, &[size]);
                let ptr = builder.inst_results(call)[0];
                builder.ins().store(MemFlags::new(), slot, ptr, Offset32::new(0));
                ptr
            }
            _ => builder.ins().iconst(types::I64, 0),
        };
        builder.ins().return_(&[boxed]);
        builder.seal_all_blocks();
        builder.finalize();
    }

    tracing::debug!(wrapper = %wrapper.name, callee = %wrapper.callee, "spawn wrapper defined");
    backend.finish_function(&wrapper.name, id, ctx)
}
