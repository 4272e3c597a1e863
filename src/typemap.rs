use std::collections::HashMap;

use crate::types::KilnType;

/// Target data layout; only pointer width matters to lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLayout {
    pub pointer_bytes: u32,
}

impl DataLayout {
    pub fn host() -> Self {
        Self { pointer_bytes: std::mem::size_of::<usize>() as u32 }
    }
}

/// Converts semantic types to a backend's type representation.
///
/// `map` is memoized per semantic type through the cache the implementor
/// exposes; implementors only write `map_uncached` and the classifiers.
pub trait TypeMapper {
    type Backend: Clone + PartialEq;

    fn map_uncached(&self, ty: &KilnType) -> Self::Backend;

    fn cache(&mut self) -> &mut HashMap<KilnType, Self::Backend>;

    fn layout(&self) -> Option<&DataLayout>;

    /// Integer backend types. The boolean representation is not an integer.
    fn is_integer(&self, backend: &Self::Backend) -> bool;

    fn is_float(&self, backend: &Self::Backend) -> bool;

    fn map(&mut self, ty: &KilnType) -> Self::Backend {
        if let Some(hit) = self.cache().get(ty) {
            return hit.clone();
        }
        let mapped = self.map_uncached(ty);
        self.cache().insert(ty.clone(), mapped.clone());
        mapped
    }

    fn is_numeric(&self, backend: &Self::Backend) -> bool {
        self.is_integer(backend) || self.is_float(backend)
    }

    /// Two semantic types may be stored in the same location.
    fn compatible(&mut self, a: &KilnType, b: &KilnType) -> bool {
        self.map(a) == self.map(b)
    }

    /// Size in bytes, `0` without a layout.
    fn size_of(&self, ty: &KilnType) -> u32 {
        let Some(layout) = self.layout() else { return 0 };
        match ty {
            KilnType::Int | KilnType::Float | KilnType::Enum(_) => 8,
            KilnType::Bool => 1,
            KilnType::Void => 0,
            _ => layout.pointer_bytes,
        }
    }

    /// Alignment in bytes, `1` without a layout.
    fn align_of(&self, ty: &KilnType) -> u32 {
        match self.size_of(ty) {
            0 => 1,
            n => n,
        }
    }
}
