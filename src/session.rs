use std::collections::{BTreeMap, HashMap};

use crate::ast::{Block, Function, Param};
use crate::diagnostics::{CompileError, Diagnostics};
use crate::span::Span;
use crate::types::KilnType;

/// How a lifted lambda receives its captured values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LambdaStyle {
    /// `fn(env_ptr, params...)`; captures are unpacked from an environment record.
    Environment,
    /// `fn(captures..., params...)`; captures are passed as leading arguments.
    Direct,
}

/// A lambda lifted into a top-level function.
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaInfo {
    pub id: u32,
    pub name: String,
    pub params: Vec<Param>,
    /// Captured names with their types, in first-use order.
    pub captures: Vec<Param>,
    /// Already rewritten: nested lambdas are `Expr::Closure` references.
    pub body: Block,
    pub return_type: KilnType,
    pub style: LambdaStyle,
    pub escapes: bool,
    pub defined_in: String,
}

impl LambdaInfo {
    pub fn lifted_name(id: u32) -> String {
        format!("__lambda_{id}")
    }

    pub fn has_env(&self) -> bool {
        self.style == LambdaStyle::Environment
    }

    /// Bound directly at its `let`: calls pass the captured values, no closure object exists.
    pub fn is_direct_binding(&self) -> bool {
        !self.escapes
    }

    /// Source-level type of the lambda value.
    pub fn fn_type(&self) -> KilnType {
        KilnType::func(self.params.iter().map(|p| p.ty.clone()).collect(), self.return_type.clone())
    }
}

/// A synthesized `(void* args) -> void* boxed_result` trampoline for `spawn`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnWrapper {
    pub name: String,
    pub callee: String,
    pub param_types: Vec<KilnType>,
    pub return_type: KilnType,
}

impl SpawnWrapper {
    pub fn arg_count(&self) -> usize {
        self.param_types.len()
    }
}

/// What to lower: a source function or a lifted lambda, flattened into
/// the parameter list its lowered signature takes.
pub struct FnPlan<'p> {
    pub name: &'p str,
    pub params: Vec<Param>,
    /// Set for environment-style lambdas: the hidden first parameter
    /// points at a record holding these captures.
    pub env_captures: Option<&'p [Param]>,
    pub return_type: &'p KilnType,
    pub body: &'p Block,
    pub is_main: bool,
    /// A lifted lambda rather than a source function.
    pub lifted: bool,
    pub span: Span,
}

impl<'p> FnPlan<'p> {
    pub fn for_function(func: &'p Function) -> Self {
        FnPlan {
            name: &func.name,
            params: func.params.clone(),
            env_captures: None,
            return_type: &func.return_type,
            body: &func.body,
            is_main: func.name == "main",
            lifted: false,
            span: func.span,
        }
    }

    pub fn for_lambda(lambda: &'p LambdaInfo) -> Self {
        if lambda.has_env() {
            FnPlan {
                name: &lambda.name,
                params: lambda.params.clone(),
                env_captures: Some(&lambda.captures),
                return_type: &lambda.return_type,
                body: &lambda.body,
                is_main: false,
                lifted: true,
                span: Span::dummy(),
            }
        } else {
            FnPlan {
                name: &lambda.name,
                params: lambda.captures.iter().chain(&lambda.params).cloned().collect(),
                env_captures: None,
                return_type: &lambda.return_type,
                body: &lambda.body,
                is_main: false,
                lifted: true,
                span: Span::dummy(),
            }
        }
    }
}

/// Lambda and spawn-wrapper registries for one compilation unit.
#[derive(Debug, Default)]
pub struct Registry {
    next_lambda_id: u32,
    lambdas: BTreeMap<u32, LambdaInfo>,
    wrappers: Vec<SpawnWrapper>,
    wrapper_index: HashMap<(String, usize), usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids are handed out before the lambda body is lifted, so enclosing
    /// lambdas get lower ids than the lambdas nested in them.
    pub fn reserve_lambda_id(&mut self) -> u32 {
        let id = self.next_lambda_id;
        self.next_lambda_id += 1;
        id
    }

    pub fn register_lambda(&mut self, info: LambdaInfo) {
        tracing::debug!(
            lambda = %info.name,
            captures = info.captures.len(),
            style = ?info.style,
            defined_in = %info.defined_in,
            "lifted lambda"
        );
        self.lambdas.insert(info.id, info);
    }

    pub fn lambda(&self, id: u32) -> Option<&LambdaInfo> {
        self.lambdas.get(&id)
    }

    /// Lifted lambdas in id order.
    pub fn lambdas(&self) -> impl Iterator<Item = &LambdaInfo> {
        self.lambdas.values()
    }

    pub fn lambda_count(&self) -> usize {
        self.lambdas.len()
    }

    /// Returns the wrapper for (callee, arity), creating it on first request.
    pub fn register_spawn(
        &mut self,
        callee: &str,
        param_types: &[KilnType],
        return_type: &KilnType,
    ) -> &SpawnWrapper {
        let key = (callee.to_string(), param_types.len());
        let index = match self.wrapper_index.get(&key) {
            Some(&index) => index,
            None => {
                let name = format!("__spawn_wrapper_{callee}");
                tracing::debug!(wrapper = %name, callee, "registered spawn wrapper");
                self.wrappers.push(SpawnWrapper {
                    name,
                    callee: callee.to_string(),
                    param_types: param_types.to_vec(),
                    return_type: return_type.clone(),
                });
                let index = self.wrappers.len() - 1;
                self.wrapper_index.insert(key, index);
                index
            }
        };
        &self.wrappers[index]
    }

    pub fn spawn_wrapper(&self, callee: &str, arg_count: usize) -> Option<&SpawnWrapper> {
        self.wrapper_index
            .get(&(callee.to_string(), arg_count))
            .and_then(|&i| self.wrappers.get(i))
    }

    pub fn spawn_wrappers(&self) -> &[SpawnWrapper] {
        &self.wrappers
    }
}

/// Everything one lowering owns: the registries, the error sink, and the
/// backend context `B` (an object module or a C text buffer). Independent
/// sessions share nothing.
pub struct LoweringSession<B> {
    pub registry: Registry,
    pub diagnostics: Diagnostics,
    pub backend: B,
}

impl<B> LoweringSession<B> {
    pub fn new(backend: B) -> Self {
        Self { registry: Registry::new(), diagnostics: Diagnostics::new(), backend }
    }

    pub fn report(&mut self, err: CompileError) {
        self.diagnostics.push(err);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// Fails with every collected diagnostic, or hands back the backend.
    pub fn finish(self) -> Result<B, CompileError> {
        self.diagnostics.into_result()?;
        Ok(self.backend)
    }
}
