use std::collections::HashMap;

use cranelift_codegen::ir::{types, InstBuilder, MemFlags, Value};
use cranelift_frontend::FunctionBuilder;

use crate::typemap::{DataLayout, TypeMapper};
use crate::types::KilnType;

/// Semantic types to Cranelift value types.
#[derive(Debug, Default)]
pub struct IrTypeMapper {
    cache: HashMap<KilnType, types::Type>,
    layout: Option<DataLayout>,
}

impl IrTypeMapper {
    pub fn new(layout: Option<DataLayout>) -> Self {
        Self { cache: HashMap::new(), layout }
    }
}

/// Void has no value; it maps to `INVALID` and never reaches a signature or variable.
pub fn kiln_to_cranelift(ty: &KilnType) -> types::Type {
    match ty {
        KilnType::Int => types::I64,
        KilnType::Float => types::F64,
        KilnType::Bool => types::I8,
        KilnType::Void => types::INVALID,
        KilnType::String => types::I64,       // const char*
        KilnType::Array(_) => types::I64,     // [len][slots...]
        KilnType::Struct(_) => types::I64,    // field slots
        KilnType::Enum(_) => types::I64,      // discriminant
        KilnType::Fn(_, _) => types::I64,     // [fn_ptr][env_ptr]
        KilnType::Optional(_) => types::I64,  // box, 0 = none
        KilnType::Result(_, _) => types::I64, // box
        KilnType::Future(_) => types::I64,    // task handle
    }
}

impl TypeMapper for IrTypeMapper {
    type Backend = types::Type;

    fn map_uncached(&self, ty: &KilnType) -> types::Type {
        kiln_to_cranelift(ty)
    }

    fn cache(&mut self) -> &mut HashMap<KilnType, types::Type> {
        &mut self.cache
    }

    fn layout(&self) -> Option<&DataLayout> {
        self.layout.as_ref()
    }

    fn is_integer(&self, backend: &types::Type) -> bool {
        backend.is_int() && *backend != types::I8
    }

    fn is_float(&self, backend: &types::Type) -> bool {
        backend.is_float()
    }
}

/// Convert a value to an 8-byte slot for arrays, struct fields, boxes and environments.
pub fn to_slot(val: Value, ty: &KilnType, builder: &mut FunctionBuilder<'_>) -> Value {
    match ty {
        KilnType::Float => builder.ins().bitcast(types::I64, MemFlags::new(), val),
        KilnType::Bool => builder.ins().uextend(types::I64, val),
        _ => val,
    }
}

/// Convert an 8-byte slot back to the semantic type's representation.
pub fn from_slot(val: Value, ty: &KilnType, builder: &mut FunctionBuilder<'_>) -> Value {
    match ty {
        KilnType::Float => builder.ins().bitcast(types::F64, MemFlags::new(), val),
        KilnType::Bool => builder.ins().ireduce(types::I8, val),
        _ => val,
    }
}
