//! Lambda lifting.
//!
//! `lift_lambdas` rewrites every `Expr::Lambda` in a private copy of the
//! program into an `Expr::Closure { id, captures }` reference and registers
//! the lifted body as `__lambda_<id>` in the session registry. It also
//! registers one spawn wrapper per distinct (callee, arity) it meets.
//!
//! Style selection:
//! - a lambda escapes unless it is the direct initializer of a `let` whose
//!   name is only ever called (never read as a value, never called from
//!   inside another lambda)
//! - escaping lambdas with captures get an environment record
//! - everything else takes its captures as leading parameters

use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::builtins;
use crate::session::{LambdaInfo, LambdaStyle, Registry};
use crate::symbols::Globals;
use crate::types::KilnType;
use crate::visit::{walk_expr, walk_expr_mut, walk_stmt, walk_stmt_mut, Visitor, VisitMut};

pub fn lift_lambdas(program: &Program, registry: &mut Registry) -> Program {
    let globals = Globals::from_program(program);
    let mut lifted = program.clone();
    for func in &mut lifted.functions {
        let mut lifter = Lifter::new(registry, &globals, func);
        lifter.visit_function_mut(func);
    }
    tracing::debug!(
        lambdas = registry.lambda_count(),
        wrappers = registry.spawn_wrappers().len(),
        "lambda lifting done"
    );
    lifted
}

/// Free variables of a lambda, in first-use order, typed through `outer`.
/// Names `outer` cannot resolve are not captures (globals, builtins, or
/// names the backend will report as undefined).
pub fn capture_set(
    params: &[Param],
    body: &Block,
    globals: &Globals,
    outer: &dyn Fn(&str) -> Option<KilnType>,
) -> Vec<Param> {
    let mut collector = FreeVarCollector {
        scopes: vec![params.iter().map(|p| p.name.clone()).collect()],
        globals,
        outer,
        seen: HashSet::new(),
        captures: Vec::new(),
    };
    collector.visit_block(body);
    collector.captures
}

// ── capture analysis ─────────────────────────────────────────────────

struct FreeVarCollector<'a> {
    scopes: Vec<HashSet<String>>,
    globals: &'a Globals,
    outer: &'a dyn Fn(&str) -> Option<KilnType>,
    seen: HashSet<String>,
    captures: Vec<Param>,
}

impl FreeVarCollector<'_> {
    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }

    fn bind(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn consider(&mut self, name: &str) {
        if matches!(name, "true" | "false" | "none") {
            return;
        }
        if self.is_local(name) || self.seen.contains(name) {
            return;
        }
        if self.globals.enum_variant(name).is_some() {
            return;
        }
        if let Some(ty) = (self.outer)(name) {
            self.seen.insert(name.to_string());
            self.captures.push(Param { name: name.to_string(), ty });
        }
    }
}

impl Visitor for FreeVarCollector<'_> {
    fn visit_block(&mut self, block: &Block) {
        self.scopes.push(HashSet::new());
        for stmt in &block.stmts {
            self.visit_stmt(&stmt.node);
        }
        self.scopes.pop();
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, value, .. } => {
                self.visit_expr(value);
                self.bind(name);
            }
            Stmt::For { var, iterable, body } => {
                self.visit_expr(iterable);
                self.scopes.push(HashSet::from([var.clone()]));
                self.visit_block(body);
                self.scopes.pop();
            }
            other => walk_stmt(self, other),
        }
    }

    fn visit_expr(&mut self, expr: &TypedExpr) {
        match &expr.expr {
            Expr::Ident(name) => self.consider(name),
            Expr::Call { callee, args } => {
                if self.is_local(callee) || !builtins::is_builtin(callee) {
                    self.consider(callee);
                }
                for arg in args {
                    self.visit_expr(arg);
                }
            }
            Expr::Assign { target: AssignTarget::Var(name), value } => {
                self.consider(name);
                self.visit_expr(value);
            }
            Expr::Closure { captures, .. } => {
                for name in captures {
                    self.consider(name);
                }
            }
            Expr::Lambda { params, body } => {
                self.scopes.push(params.iter().map(|p| p.name.clone()).collect());
                self.visit_block(body);
                self.scopes.pop();
            }
            Expr::Match { scrutinee, arms } => {
                self.visit_expr(scrutinee);
                for arm in arms {
                    let names = arm.pattern.bindings(&|n: &str| self.globals.is_variant_name(n));
                    self.scopes.push(names.into_iter().collect());
                    self.visit_pattern(&arm.pattern);
                    self.visit_expr(&arm.body);
                    self.scopes.pop();
                }
            }
            _ => walk_expr(self, expr),
        }
    }
}

// ── escape analysis ──────────────────────────────────────────────────

/// Names read as values anywhere in a function, plus names called from
/// inside a lambda body (the lambda has to capture the callee as a value).
struct ValueUseCollector {
    lambda_depth: usize,
    uses: HashSet<String>,
}

impl Visitor for ValueUseCollector {
    fn visit_expr(&mut self, expr: &TypedExpr) {
        match &expr.expr {
            Expr::Ident(name) => {
                self.uses.insert(name.clone());
            }
            Expr::Assign { target: AssignTarget::Var(name), .. } => {
                self.uses.insert(name.clone());
            }
            Expr::Call { callee, .. } if self.lambda_depth > 0 => {
                self.uses.insert(callee.clone());
            }
            _ => {}
        }
        if let Expr::Lambda { .. } = &expr.expr {
            self.lambda_depth += 1;
            walk_expr(self, expr);
            self.lambda_depth -= 1;
        } else {
            walk_expr(self, expr);
        }
    }
}

fn value_uses(func: &Function) -> HashSet<String> {
    let mut collector = ValueUseCollector { lambda_depth: 0, uses: HashSet::new() };
    collector.visit_function(func);
    collector.uses
}

// ── lifting ──────────────────────────────────────────────────────────

struct Lifter<'a> {
    registry: &'a mut Registry,
    globals: &'a Globals,
    function: String,
    scopes: Vec<HashMap<String, KilnType>>,
    value_uses: HashSet<String>,
    pending_let: Option<String>,
}

impl<'a> Lifter<'a> {
    fn new(registry: &'a mut Registry, globals: &'a Globals, func: &Function) -> Self {
        Self {
            registry,
            globals,
            function: func.name.clone(),
            scopes: vec![func.params.iter().map(|p| (p.name.clone(), p.ty.clone())).collect()],
            value_uses: value_uses(func),
            pending_let: None,
        }
    }

    fn lookup(&self, name: &str) -> Option<KilnType> {
        self.scopes.iter().rev().find_map(|s| s.get(name).cloned())
    }

    fn bind(&mut self, name: &str, ty: KilnType) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), ty);
        }
    }

    fn lift(&mut self, expr: &mut TypedExpr, let_name: Option<String>) {
        let Expr::Lambda { params, body } = &mut expr.expr else { return };
        let params = std::mem::take(params);
        let mut body = std::mem::take(body);

        let id = self.registry.reserve_lambda_id();

        self.scopes.push(params.iter().map(|p| (p.name.clone(), p.ty.clone())).collect());
        self.visit_block_mut(&mut body);
        self.scopes.pop();

        let captures = capture_set(&params, &body, self.globals, &|name: &str| self.lookup(name));
        let escapes = match &let_name {
            Some(name) => self.value_uses.contains(name),
            None => true,
        };
        let style = if escapes && !captures.is_empty() {
            LambdaStyle::Environment
        } else {
            LambdaStyle::Direct
        };
        let return_type = match &expr.ty {
            KilnType::Fn(_, ret) => (**ret).clone(),
            _ => KilnType::Void,
        };

        let capture_names = captures.iter().map(|c| c.name.clone()).collect();
        self.registry.register_lambda(LambdaInfo {
            id,
            name: LambdaInfo::lifted_name(id),
            params,
            captures,
            body,
            return_type,
            style,
            escapes,
            defined_in: self.function.clone(),
        });
        expr.expr = Expr::Closure { id, captures: capture_names };
    }

    fn register_spawn(&mut self, call: &TypedExpr) {
        let Expr::Call { callee, args } = &call.expr else { return };
        if self.lookup(callee).is_some() {
            return;
        }
        if let Some(KilnType::Fn(params, ret)) = self.globals.function(callee)
            && params.len() == args.len()
        {
            self.registry.register_spawn(callee, params, ret);
        }
    }
}

impl VisitMut for Lifter<'_> {
    fn visit_block_mut(&mut self, block: &mut Block) {
        self.scopes.push(HashMap::new());
        for stmt in &mut block.stmts {
            self.visit_stmt_mut(&mut stmt.node);
        }
        self.scopes.pop();
    }

    fn visit_stmt_mut(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Let { name, ty, value } => {
                if let Expr::Lambda { .. } = &value.expr {
                    self.pending_let = Some(name.clone());
                }
                self.visit_expr_mut(value);
                self.pending_let = None;
                self.bind(name, ty.clone());
            }
            Stmt::For { var, iterable, body } => {
                self.visit_expr_mut(iterable);
                let elem = iterable.ty.element().cloned().unwrap_or(KilnType::Int);
                self.scopes.push(HashMap::from([(var.clone(), elem)]));
                self.visit_block_mut(body);
                self.scopes.pop();
            }
            other => walk_stmt_mut(self, other),
        }
    }

    fn visit_expr_mut(&mut self, expr: &mut TypedExpr) {
        let let_name = self.pending_let.take();
        if let Expr::Lambda { .. } = &expr.expr {
            self.lift(expr, let_name);
            return;
        }
        match &mut expr.expr {
            Expr::Match { scrutinee, arms } => {
                self.visit_expr_mut(scrutinee);
                let scrutinee_ty = scrutinee.ty.clone();
                for arm in arms {
                    let bound = self.globals.pattern_bindings(&arm.pattern, &scrutinee_ty);
                    self.scopes.push(bound.into_iter().collect());
                    self.visit_pattern_mut(&mut arm.pattern);
                    self.visit_expr_mut(&mut arm.body);
                    self.scopes.pop();
                }
            }
            Expr::Spawn { call } => {
                self.visit_expr_mut(call);
                self.register_spawn(call);
            }
            _ => walk_expr_mut(self, expr),
        }
    }
}
