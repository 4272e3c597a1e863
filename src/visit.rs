//! AST visitor infrastructure.
//!
//! - `Visitor` walks by shared reference (analysis passes such as capture collection)
//! - `VisitMut` walks by mutable reference (rewriting passes such as lambda lifting)
//!
//! Override only the methods you need and call the matching `walk_*` function
//! inside the override to keep the default recursion. Omitting the walk call
//! prunes traversal at that node.
//!
//! Backends do not use these traits: lowering matches every node explicitly.

use crate::ast::*;

// ============================================================================
// Visitor Trait (Read-Only)
// ============================================================================

pub trait Visitor: Sized {
    fn visit_program(&mut self, program: &Program) {
        walk_program(self, program);
    }

    fn visit_function(&mut self, func: &Function) {
        walk_function(self, func);
    }

    fn visit_block(&mut self, block: &Block) {
        walk_block(self, block);
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &TypedExpr) {
        walk_expr(self, expr);
    }

    fn visit_arm(&mut self, arm: &MatchArm) {
        walk_arm(self, arm);
    }

    fn visit_pattern(&mut self, pattern: &Pattern) {
        walk_pattern(self, pattern);
    }
}

pub fn walk_program<V: Visitor>(v: &mut V, program: &Program) {
    for func in &program.functions {
        v.visit_function(func);
    }
}

pub fn walk_function<V: Visitor>(v: &mut V, func: &Function) {
    v.visit_block(&func.body);
}

pub fn walk_block<V: Visitor>(v: &mut V, block: &Block) {
    for stmt in &block.stmts {
        v.visit_stmt(&stmt.node);
    }
}

pub fn walk_stmt<V: Visitor>(v: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Let { value, .. } => v.visit_expr(value),
        Stmt::Expr(expr) => v.visit_expr(expr),
        Stmt::Return(value) => {
            if let Some(value) = value {
                v.visit_expr(value);
            }
        }
        Stmt::If { condition, then_block, else_block } => {
            v.visit_expr(condition);
            v.visit_block(then_block);
            if let Some(else_block) = else_block {
                v.visit_block(else_block);
            }
        }
        Stmt::While { condition, body } => {
            v.visit_expr(condition);
            v.visit_block(body);
        }
        Stmt::For { iterable, body, .. } => {
            v.visit_expr(iterable);
            v.visit_block(body);
        }
        Stmt::Break | Stmt::Continue => {}
        Stmt::Block(block) => v.visit_block(block),
    }
}

pub fn walk_expr<V: Visitor>(v: &mut V, expr: &TypedExpr) {
    match &expr.expr {
        Expr::Literal(_) | Expr::Ident(_) | Expr::Closure { .. } => {}
        Expr::Unary { operand, .. } => v.visit_expr(operand),
        Expr::Binary { lhs, rhs, .. } => {
            v.visit_expr(lhs);
            v.visit_expr(rhs);
        }
        Expr::Assign { target, value } => {
            match target {
                AssignTarget::Var(_) => {}
                AssignTarget::Index { array, index } => {
                    v.visit_expr(array);
                    v.visit_expr(index);
                }
                AssignTarget::Field { object, .. } => v.visit_expr(object),
            }
            v.visit_expr(value);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                v.visit_expr(arg);
            }
        }
        Expr::MethodCall { object, args, .. } => {
            v.visit_expr(object);
            for arg in args {
                v.visit_expr(arg);
            }
        }
        Expr::Index { array, index } => {
            v.visit_expr(array);
            v.visit_expr(index);
        }
        Expr::ArrayLit(elements) => {
            for elem in elements {
                v.visit_expr(elem);
            }
        }
        Expr::StructLit { fields, .. } => {
            for (_, value) in fields {
                v.visit_expr(value);
            }
        }
        Expr::FieldAccess { object, .. } => v.visit_expr(object),
        Expr::Match { scrutinee, arms } => {
            v.visit_expr(scrutinee);
            for arm in arms {
                v.visit_arm(arm);
            }
        }
        Expr::Lambda { body, .. } => v.visit_block(body),
        Expr::If { condition, then_branch, else_branch } => {
            v.visit_expr(condition);
            v.visit_expr(then_branch);
            v.visit_expr(else_branch);
        }
        Expr::Try { operand } => v.visit_expr(operand),
        Expr::Spawn { call } => v.visit_expr(call),
    }
}

pub fn walk_arm<V: Visitor>(v: &mut V, arm: &MatchArm) {
    v.visit_pattern(&arm.pattern);
    v.visit_expr(&arm.body);
}

pub fn walk_pattern<V: Visitor>(v: &mut V, pattern: &Pattern) {
    match pattern {
        Pattern::Wildcard | Pattern::Literal(_) | Pattern::Binding(_) | Pattern::Range { .. } => {}
        Pattern::Or(alts) => {
            for alt in alts {
                v.visit_pattern(alt);
            }
        }
        Pattern::Struct { fields, .. } => {
            for (_, sub) in fields {
                v.visit_pattern(sub);
            }
        }
        Pattern::Guard { pattern, condition } => {
            v.visit_pattern(pattern);
            v.visit_expr(condition);
        }
    }
}

// ============================================================================
// VisitMut Trait (Mutable)
// ============================================================================

pub trait VisitMut: Sized {
    fn visit_function_mut(&mut self, func: &mut Function) {
        walk_function_mut(self, func);
    }

    fn visit_block_mut(&mut self, block: &mut Block) {
        walk_block_mut(self, block);
    }

    fn visit_stmt_mut(&mut self, stmt: &mut Stmt) {
        walk_stmt_mut(self, stmt);
    }

    fn visit_expr_mut(&mut self, expr: &mut TypedExpr) {
        walk_expr_mut(self, expr);
    }

    fn visit_arm_mut(&mut self, arm: &mut MatchArm) {
        walk_arm_mut(self, arm);
    }

    fn visit_pattern_mut(&mut self, pattern: &mut Pattern) {
        walk_pattern_mut(self, pattern);
    }
}

pub fn walk_function_mut<V: VisitMut>(v: &mut V, func: &mut Function) {
    v.visit_block_mut(&mut func.body);
}

pub fn walk_block_mut<V: VisitMut>(v: &mut V, block: &mut Block) {
    for stmt in &mut block.stmts {
        v.visit_stmt_mut(&mut stmt.node);
    }
}

pub fn walk_stmt_mut<V: VisitMut>(v: &mut V, stmt: &mut Stmt) {
    match stmt {
        Stmt::Let { value, .. } => v.visit_expr_mut(value),
        Stmt::Expr(expr) => v.visit_expr_mut(expr),
        Stmt::Return(value) => {
            if let Some(value) = value {
                v.visit_expr_mut(value);
            }
        }
        Stmt::If { condition, then_block, else_block } => {
            v.visit_expr_mut(condition);
            v.visit_block_mut(then_block);
            if let Some(else_block) = else_block {
                v.visit_block_mut(else_block);
            }
        }
        Stmt::While { condition, body } => {
            v.visit_expr_mut(condition);
            v.visit_block_mut(body);
        }
        Stmt::For { iterable, body, .. } => {
            v.visit_expr_mut(iterable);
            v.visit_block_mut(body);
        }
        Stmt::Break | Stmt::Continue => {}
        Stmt::Block(block) => v.visit_block_mut(block),
    }
}

pub fn walk_expr_mut<V: VisitMut>(v: &mut V, expr: &mut TypedExpr) {
    match &mut expr.expr {
        Expr::Literal(_) | Expr::Ident(_) | Expr::Closure { .. } => {}
        Expr::Unary { operand, .. } => v.visit_expr_mut(operand),
        Expr::Binary { lhs, rhs, .. } => {
            v.visit_expr_mut(lhs);
            v.visit_expr_mut(rhs);
        }
        Expr::Assign { target, value } => {
            match target {
                AssignTarget::Var(_) => {}
                AssignTarget::Index { array, index } => {
                    v.visit_expr_mut(array);
                    v.visit_expr_mut(index);
                }
                AssignTarget::Field { object, .. } => v.visit_expr_mut(object),
            }
            v.visit_expr_mut(value);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                v.visit_expr_mut(arg);
            }
        }
        Expr::MethodCall { object, args, .. } => {
            v.visit_expr_mut(object);
            for arg in args {
                v.visit_expr_mut(arg);
            }
        }
        Expr::Index { array, index } => {
            v.visit_expr_mut(array);
            v.visit_expr_mut(index);
        }
        Expr::ArrayLit(elements) => {
            for elem in elements {
                v.visit_expr_mut(elem);
            }
        }
        Expr::StructLit { fields, .. } => {
            for (_, value) in fields {
                v.visit_expr_mut(value);
            }
        }
        Expr::FieldAccess { object, .. } => v.visit_expr_mut(object),
        Expr::Match { scrutinee, arms } => {
            v.visit_expr_mut(scrutinee);
            for arm in arms {
                v.visit_arm_mut(arm);
            }
        }
        Expr::Lambda { body, .. } => v.visit_block_mut(body),
        Expr::If { condition, then_branch, else_branch } => {
            v.visit_expr_mut(condition);
            v.visit_expr_mut(then_branch);
            v.visit_expr_mut(else_branch);
        }
        Expr::Try { operand } => v.visit_expr_mut(operand),
        Expr::Spawn { call } => v.visit_expr_mut(call),
    }
}

pub fn walk_arm_mut<V: VisitMut>(v: &mut V, arm: &mut MatchArm) {
    v.visit_pattern_mut(&mut arm.pattern);
    v.visit_expr_mut(&mut arm.body);
}

pub fn walk_pattern_mut<V: VisitMut>(v: &mut V, pattern: &mut Pattern) {
    match pattern {
        Pattern::Wildcard | Pattern::Literal(_) | Pattern::Binding(_) | Pattern::Range { .. } => {}
        Pattern::Or(alts) => {
            for alt in alts {
                v.visit_pattern_mut(alt);
            }
        }
        Pattern::Struct { fields, .. } => {
            for (_, sub) in fields {
                v.visit_pattern_mut(sub);
            }
        }
        Pattern::Guard { pattern, condition } => {
            v.visit_pattern_mut(pattern);
            v.visit_expr_mut(condition);
        }
    }
}
