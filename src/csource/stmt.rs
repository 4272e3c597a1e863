use crate::ast::{Block, Expr, Stmt, TypedExpr};
use crate::diagnostics::CompileError;
use crate::session::FnPlan;
use crate::span::Span;
use crate::symbols::SymbolTable;
use crate::types::KilnType;

use super::typemap::{c_ident, zero_value};
use super::writer::CWriter;
use super::{env_type_name, CEnv, CSlot, FnContext};

/// `code` without one pair of parentheses that wraps all of it, so
/// conditions read `if (a < b)` rather than `if ((a < b))`.
pub(super) fn condition(code: &str) -> &str {
    let Some(inner) = code.strip_prefix('(').and_then(|c| c.strip_suffix(')')) else {
        return code;
    };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for ch in inner.chars() {
        if in_string {
            match (escaped, ch) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return code;
                }
            }
            _ => {}
        }
    }
    if depth == 0 { inner } else { code }
}

impl FnContext<'_> {
    fn lower_block(&mut self, block: &Block, terminated: &mut bool) -> Result<(), CompileError> {
        for stmt in &block.stmts {
            self.lower_stmt(&stmt.node, stmt.span, terminated)?;
        }
        Ok(())
    }

    fn lower_scoped_block(&mut self, block: &Block, terminated: &mut bool) -> Result<(), CompileError> {
        self.symbols.push_scope();
        let result = self.lower_block(block, terminated);
        self.symbols.pop_scope();
        result
    }

    fn lower_stmt(&mut self, stmt: &Stmt, span: Span, terminated: &mut bool) -> Result<(), CompileError> {
        if *terminated {
            return Ok(());
        }
        match stmt {
            Stmt::Let { name, ty, value } => self.lower_let(name, ty, value),
            Stmt::Expr(expr) => {
                let val = self.lower_expr(expr)?;
                if !val.ty.is_void() && !val.is_atom() {
                    self.out.line(&format!("(void){};", val.code));
                }
                Ok(())
            }
            Stmt::Return(value) => {
                match value {
                    Some(expr) => {
                        let val = self.lower_expr(expr)?;
                        if self.is_main && !expr.ty.is_void() {
                            self.out.line(&format!("return (int)({});", val.code));
                        } else if expr.ty.is_void() || self.return_type.is_void() {
                            self.emit_default_return();
                        } else {
                            let ret_ty = self.return_type.clone();
                            let val = self.coerce(val, &ret_ty);
                            self.out.line(&format!("return {};", val.code));
                        }
                    }
                    None => self.emit_default_return(),
                }
                *terminated = true;
                Ok(())
            }
            Stmt::If { condition, then_block, else_block } => {
                self.lower_if(condition, then_block, else_block.as_ref(), terminated)
            }
            Stmt::While { condition, body } => self.lower_while(condition, body),
            Stmt::For { .. } => Err(CompileError::unsupported("for loops are not supported", span)),
            Stmt::Break | Stmt::Continue => {
                let keyword = if matches!(stmt, Stmt::Break) { "break" } else { "continue" };
                if self.loop_depth == 0 {
                    return Err(CompileError::unsupported(format!("{keyword} outside of a loop"), span));
                }
                self.out.line(&format!("{keyword};"));
                *terminated = true;
                Ok(())
            }
            Stmt::Block(block) => {
                self.out.open("");
                let result = self.lower_scoped_block(block, terminated);
                self.out.close("");
                result
            }
        }
    }

    fn lower_let(&mut self, name: &str, ty: &KilnType, value: &TypedExpr) -> Result<(), CompileError> {
        if let Expr::Closure { id, .. } = &value.expr {
            let registry = self.env.registry;
            if let Some(info) = registry.lambda(*id).filter(|info| info.is_direct_binding()) {
                // Captured values are copied at the binding, as a closure would.
                let mut captures = Vec::with_capacity(info.captures.len());
                for cap in &info.captures {
                    let val = self.load_local(&cap.name, value.span)?;
                    let local = self.fresh_local(&cap.name);
                    let c_ty = self.c_type(&cap.ty);
                    self.out.line(&format!("{c_ty} {local} = {};", val.code));
                    captures.push(local);
                }
                tracing::trace!(name, lambda = *id, "direct lambda binding");
                return self.symbols.insert(name, CSlot::Direct { lambda: *id, captures }, ty.clone());
            }
        }
        if ty.is_void() || value.ty.is_void() {
            return Err(CompileError::type_mismatch(
                format!("cannot bind '{name}' to a value of type void"),
                value.span,
            ));
        }
        let val = self.lower_expr(value)?;
        let val = self.coerce(val, ty);
        self.bind_local(name, ty, &val.code)
    }

    fn lower_if(
        &mut self,
        cond: &TypedExpr,
        then_block: &Block,
        else_block: Option<&Block>,
        terminated: &mut bool,
    ) -> Result<(), CompileError> {
        let cond_val = self.lower_expr(cond)?;
        self.out.open(&format!("if ({})", condition(&cond_val.code)));
        let mut then_terminated = false;
        self.lower_scoped_block(then_block, &mut then_terminated)?;
        if let Some(else_blk) = else_block {
            self.out.else_branch();
            let mut else_terminated = false;
            self.lower_scoped_block(else_blk, &mut else_terminated)?;
            *terminated = then_terminated && else_terminated;
        }
        self.out.close("");
        Ok(())
    }

    /// The condition is re-evaluated at the top of every iteration, and may
    /// need statements of its own, so the loop tests it with a `break`.
    fn lower_while(&mut self, cond: &TypedExpr, body: &Block) -> Result<(), CompileError> {
        self.out.open("while (1)");
        let cond_val = self.lower_expr(cond)?;
        self.out.line(&format!("if (!{}) break;", cond_val.code));
        self.loop_depth += 1;
        let mut body_terminated = false;
        let result = self.lower_scoped_block(body, &mut body_terminated);
        self.loop_depth -= 1;
        result?;
        self.out.close("");
        Ok(())
    }

    fn emit_default_return(&mut self) {
        if self.is_main {
            self.out.line("return 0;");
        } else if self.return_type.is_void() {
            self.out.line("return;");
        } else {
            self.out.line(&format!("return {};", zero_value(&self.return_type)));
        }
    }
}

pub(super) fn lower_function(plan: &FnPlan<'_>, env: CEnv<'_>) -> Result<String, CompileError> {
    if plan.is_main && !plan.params.is_empty() {
        return Err(CompileError::unsupported("main cannot take parameters", plan.span));
    }

    let mut ctx = FnContext {
        out: CWriter::new(),
        env,
        symbols: SymbolTable::new(),
        next_temp: 0,
        next_local: 0,
        return_type: plan.return_type.clone(),
        is_main: plan.is_main,
        fn_name: plan.name.to_string(),
        loop_depth: 0,
    };

    let names: Vec<String> = plan.params.iter().map(|p| ctx.fresh_local(&p.name)).collect();
    let header = super::signature(ctx.env.types, plan, Some(&names));
    ctx.out.open(&header);

    if let Some(captures) = plan.env_captures {
        let env_ty = env_type_name(plan.name);
        ctx.out.line(&format!("{env_ty}* env_rec = ({env_ty}*)env;"));
        for cap in captures {
            let local = ctx.fresh_local(&cap.name);
            let c_ty = ctx.c_type(&cap.ty);
            ctx.out.line(&format!("{c_ty} {local} = env_rec->{};", c_ident(&cap.name)));
            ctx.symbols.insert(&cap.name, CSlot::Local(local), cap.ty.clone())?;
        }
    }
    for (param, name) in plan.params.iter().zip(names) {
        ctx.symbols.insert(&param.name, CSlot::Local(name), param.ty.clone())?;
    }

    let mut terminated = false;
    ctx.lower_block(plan.body, &mut terminated)?;
    if !terminated {
        ctx.emit_default_return();
    }
    ctx.out.close("");
    let fn_name = std::mem::take(&mut ctx.fn_name);
    ctx.out.finish(&fn_name)
}
