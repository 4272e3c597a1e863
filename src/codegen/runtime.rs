use std::collections::HashMap;

use cranelift_codegen::ir::{types, AbiParam};
use cranelift_module::{FuncId, Linkage, Module};

use crate::builtins::{Abi, RuntimeFn, RUNTIME};
use crate::diagnostics::CompileError;

/// Registry of runtime (kiln_runtime.c) functions declared in the Cranelift module.
pub struct RuntimeRegistry {
    ids: HashMap<&'static str, FuncId>,
}

/// Cranelift type for an ABI class; `None` for void.
pub fn abi_type(abi: Abi) -> Option<types::Type> {
    match abi {
        Abi::Int | Abi::Str | Abi::Ptr => Some(types::I64),
        Abi::Float => Some(types::F64),
        Abi::Bool => Some(types::I32), // C int
        Abi::Void => None,
    }
}

impl RuntimeRegistry {
    /// Declare every runtime function from the shared ABI table as an import.
    pub fn new(module: &mut dyn Module) -> Result<Self, CompileError> {
        let mut reg = RuntimeRegistry { ids: HashMap::new() };
        for f in RUNTIME {
            reg.declare(module, f)?;
        }
        Ok(reg)
    }

    /// Look up a runtime function by its full C name.
    pub fn get(&self, name: &str) -> Result<FuncId, CompileError> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| CompileError::undefined_function(name, crate::span::Span::dummy()))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn declare(&mut self, module: &mut dyn Module, f: &'static RuntimeFn) -> Result<(), CompileError> {
        let mut sig = module.make_signature();
        for &p in f.params {
            if let Some(ty) = abi_type(p) {
                sig.params.push(AbiParam::new(ty));
            }
        }
        if let Some(ty) = abi_type(f.ret) {
            sig.returns.push(AbiParam::new(ty));
        }
        let id = module
            .declare_function(f.symbol, Linkage::Import, &sig)
            .map_err(|e| CompileError::verification(f.symbol, format!("declare error: {e}")))?;
        self.ids.insert(f.symbol, id);
        Ok(())
    }
}
