use std::collections::HashMap;

use crate::ast::{EnumDecl, Pattern, Program, StructDecl};
use crate::diagnostics::CompileError;
use crate::types::KilnType;

/// A name's storage location plus its semantic type.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding<L> {
    pub location: L,
    pub ty: KilnType,
}

/// Scoped name resolution for one function being lowered. `L` is the
/// backend's storage location (a Cranelift `Variable`, a C identifier).
#[derive(Debug)]
pub struct SymbolTable<L> {
    scopes: Vec<HashMap<String, Binding<L>>>,
}

impl<L> Default for SymbolTable<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> SymbolTable<L> {
    pub fn new() -> Self {
        Self { scopes: vec![HashMap::new()] }
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Drops every binding made since the matching `push_scope`. The root
    /// scope (parameters) is never popped.
    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn insert(&mut self, name: &str, location: L, ty: KilnType) -> Result<(), CompileError> {
        let depth = self.scopes.len();
        let Some(scope) = self.scopes.last_mut() else {
            return Err(CompileError::out_of_memory("symbol table has no scope"));
        };
        scope
            .try_reserve(1)
            .map_err(|e| CompileError::out_of_memory(format!("binding '{name}': {e}")))?;
        tracing::trace!(name, depth, "bind");
        scope.insert(name.to_string(), Binding { location, ty });
        Ok(())
    }

    pub fn lookup_binding(&self, name: &str) -> Option<&Binding<L>> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    pub fn lookup(&self, name: &str) -> Option<&L> {
        self.lookup_binding(name).map(|b| &b.location)
    }

    pub fn lookup_type(&self, name: &str) -> Option<&KilnType> {
        self.lookup_binding(name).map(|b| &b.ty)
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }
}

/// Program-wide declarations every function lowering consults.
#[derive(Debug, Default)]
pub struct Globals {
    functions: HashMap<String, KilnType>,
    structs: HashMap<String, StructDecl>,
    enums: HashMap<String, EnumDecl>,
    /// `Enum::Variant` and `Enum_Variant` → (enum name, discriminant).
    variants: HashMap<String, (String, i64)>,
}

impl Globals {
    pub fn from_program(program: &Program) -> Self {
        let mut globals = Globals::default();
        for func in &program.functions {
            globals.functions.insert(func.name.clone(), func.signature());
        }
        for decl in &program.structs {
            globals.structs.insert(decl.name.clone(), decl.clone());
        }
        for decl in &program.enums {
            for (i, variant) in decl.variants.iter().enumerate() {
                let entry = (decl.name.clone(), i as i64);
                globals.variants.insert(format!("{}::{}", decl.name, variant), entry.clone());
                globals.variants.insert(format!("{}_{}", decl.name, variant), entry);
            }
            globals.enums.insert(decl.name.clone(), decl.clone());
        }
        globals
    }

    pub fn function(&self, name: &str) -> Option<&KilnType> {
        self.functions.get(name)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn struct_decl(&self, name: &str) -> Option<&StructDecl> {
        self.structs.get(name)
    }

    pub fn enum_decl(&self, name: &str) -> Option<&EnumDecl> {
        self.enums.get(name)
    }

    /// Resolves a qualified variant name to its discriminant.
    pub fn enum_variant(&self, name: &str) -> Option<(&str, i64)> {
        self.variants.get(name).map(|(e, i)| (e.as_str(), *i))
    }

    /// Bare variant name as used in match patterns: `Red` matches `Color::Red`
    /// when exactly one enum declares it.
    pub fn bare_variant(&self, name: &str) -> Option<(&str, i64)> {
        if let Some(found) = self.enum_variant(name) {
            return Some(found);
        }
        let mut hits = self.enums.values().filter_map(|decl| {
            decl.variants.iter().position(|v| v == name).map(|i| (decl.name.as_str(), i as i64))
        });
        let first = hits.next()?;
        if hits.next().is_some() { None } else { Some(first) }
    }

    pub fn is_variant_name(&self, name: &str) -> bool {
        self.bare_variant(name).is_some()
    }

    /// Names a pattern binds and their types, given the scrutinee's type.
    pub fn pattern_bindings(&self, pattern: &Pattern, scrutinee: &KilnType) -> Vec<(String, KilnType)> {
        let mut out = Vec::new();
        self.collect_pattern_bindings(pattern, scrutinee, &mut out);
        out
    }

    fn collect_pattern_bindings(
        &self,
        pattern: &Pattern,
        scrutinee: &KilnType,
        out: &mut Vec<(String, KilnType)>,
    ) {
        match pattern {
            Pattern::Wildcard | Pattern::Literal(_) | Pattern::Range { .. } => {}
            Pattern::Binding(name) => {
                if !self.is_variant_name(name) {
                    out.push((name.clone(), scrutinee.clone()));
                }
            }
            Pattern::Or(alts) => {
                for alt in alts {
                    self.collect_pattern_bindings(alt, scrutinee, out);
                }
            }
            Pattern::Struct { name, fields } => {
                let decl = self.struct_decl(name);
                for (field, sub) in fields {
                    let ty = decl
                        .and_then(|d| d.field_index(field))
                        .map(|(_, ty)| ty.clone())
                        .unwrap_or(KilnType::Int);
                    self.collect_pattern_bindings(sub, &ty, out);
                }
            }
            Pattern::Guard { pattern, .. } => self.collect_pattern_bindings(pattern, scrutinee, out),
        }
    }
}
