mod matching;

use std::collections::HashMap;

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::immediates::Offset32;
use cranelift_codegen::ir::{types, AbiParam, Block as IrBlock, InstBuilder, MemFlags, TrapCode, Value};
use cranelift_frontend::{FunctionBuilder, Variable};
use cranelift_module::{DataDescription, DataId, FuncId, Module};

use crate::ast::{parse_float, parse_int, AssignTarget, BinOp, Block, Expr, Literal, Stmt, TypedExpr, UnaryOp};
use crate::builtins::{self, Abi, RuntimeFn, Special};
use crate::diagnostics::CompileError;
use crate::session::{FnPlan, Registry};
use crate::span::Span;
use crate::symbols::{Globals, SymbolTable};
use crate::typemap::TypeMapper;
use crate::types::KilnType;

use super::runtime::RuntimeRegistry;
use super::typemap::{from_slot, to_slot, IrTypeMapper};

/// Size of a pointer in bytes. Arrays, struct fields, boxes and closure
/// environments all use pointer-sized slots.
pub const POINTER_SIZE: i32 = 8;

/// Module-wide state a function lowering borrows from the backend.
pub struct LowerEnv<'a> {
    pub module: &'a mut dyn Module,
    pub runtime: &'a RuntimeRegistry,
    pub types: &'a mut IrTypeMapper,
    pub globals: &'a Globals,
    pub registry: &'a Registry,
    pub func_ids: &'a HashMap<String, FuncId>,
    /// Interned string literals, one data object per distinct text.
    pub strings: &'a mut HashMap<String, DataId>,
    pub bounds_checks: bool,
}

/// Storage for a name in the function being lowered.
#[derive(Debug, Clone)]
enum Slot {
    Var(Variable),
    /// A `let`-bound lambda that never escapes: calls go straight to the
    /// lifted function with the captured values snapshotted at the `let`.
    Direct { lambda: u32, captures: Vec<Variable> },
}

struct LowerContext<'a> {
    builder: FunctionBuilder<'a>,
    env: LowerEnv<'a>,
    symbols: SymbolTable<Slot>,
    next_var: u32,
    return_type: KilnType,
    is_main: bool,
    fn_name: String,
    /// Stack of (continue_target, break_target) blocks for break/continue
    loop_stack: Vec<(IrBlock, IrBlock)>,
}

impl<'a> LowerContext<'a> {
    fn finalize(self) {
        self.builder.finalize();
    }

    fn backend_error(&self, msg: impl Into<String>) -> CompileError {
        CompileError::verification(self.fn_name.clone(), msg)
    }

    fn ir_type(&mut self, ty: &KilnType) -> types::Type {
        self.env.types.map(ty)
    }

    fn new_var(&mut self, ty: types::Type) -> Variable {
        let var = Variable::from_u32(self.next_var);
        self.next_var += 1;
        self.builder.declare_var(var, ty);
        var
    }

    /// Bind `name` in the innermost scope to a fresh variable holding `val`.
    fn bind_value(&mut self, name: &str, val: Value, ty: &KilnType) -> Result<(), CompileError> {
        let ir_ty = self.ir_type(ty);
        let var = self.new_var(ir_ty);
        self.builder.def_var(var, val);
        self.symbols.insert(name, Slot::Var(var), ty.clone())
    }

    /// Current value of a local that is stored in a variable.
    fn load_local(&mut self, name: &str, span: Span) -> Result<Value, CompileError> {
        match self.symbols.lookup(name).cloned() {
            Some(Slot::Var(var)) => Ok(self.builder.use_var(var)),
            Some(Slot::Direct { .. }) => Err(CompileError::unsupported(
                format!("lambda '{name}' is bound directly and has no value"),
                span,
            )),
            None => Err(CompileError::undefined_variable(name, span)),
        }
    }

    /// Call a runtime function that returns a value.
    fn call_runtime(&mut self, name: &str, args: &[Value]) -> Result<Value, CompileError> {
        let id = self.env.runtime.get(name)?;
        let func_ref = self.env.module.declare_func_in_func(id, self.builder.func);
        let call = self.builder.ins().call(func_ref, args);
        match self.builder.inst_results(call).first() {
            Some(v) => Ok(*v),
            None => Err(self.backend_error(format!("runtime function {name} returns no value"))),
        }
    }

    /// Call a runtime function that returns void.
    fn call_runtime_void(&mut self, name: &str, args: &[Value]) -> Result<(), CompileError> {
        let id = self.env.runtime.get(name)?;
        let func_ref = self.env.module.declare_func_in_func(id, self.builder.func);
        self.builder.ins().call(func_ref, args);
        Ok(())
    }

    /// Null-terminated string in the data section; identical texts share one object.
    fn create_data_str(&mut self, s: &str) -> Result<Value, CompileError> {
        let data_id = match self.env.strings.get(s) {
            Some(id) => *id,
            None => {
                let mut data_desc = DataDescription::new();
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                data_desc.define(bytes.into_boxed_slice());

                let data_id = self
                    .env
                    .module
                    .declare_anonymous_data(false, false)
                    .map_err(|e| self.backend_error(format!("declare data error: {e}")))?;
                self.env
                    .module
                    .define_data(data_id, &data_desc)
                    .map_err(|e| self.backend_error(format!("define data error: {e}")))?;
                self.env.strings.insert(s.to_string(), data_id);
                data_id
            }
        };
        let gv = self.env.module.declare_data_in_func(data_id, self.builder.func);
        Ok(self.builder.ins().global_value(types::I64, gv))
    }

    fn alloc(&mut self, bytes: i64) -> Result<Value, CompileError> {
        let size = self.builder.ins().iconst(types::I64, bytes);
        self.call_runtime("__kiln_alloc", &[size])
    }

    fn store_slot(&mut self, val: Value, ty: &KilnType, ptr: Value, offset: i32) {
        let slot = to_slot(val, ty, &mut self.builder);
        self.builder.ins().store(MemFlags::new(), slot, ptr, Offset32::new(offset));
    }

    fn load_slot(&mut self, ty: &KilnType, ptr: Value, offset: i32) -> Value {
        let raw = self.builder.ins().load(types::I64, MemFlags::new(), ptr, Offset32::new(offset));
        from_slot(raw, ty, &mut self.builder)
    }

    /// Print `msg` through the runtime (which exits with status 1) and trap.
    fn emit_runtime_panic(&mut self, msg: &str) -> Result<(), CompileError> {
        let msg_val = self.create_data_str(msg)?;
        self.call_runtime_void("__kiln_panic", &[msg_val])?;
        self.builder.ins().trap(TrapCode::unwrap_user(1));
        Ok(())
    }

    /// Int to float promotion where the destination type asks for it.
    fn coerce(&mut self, val: Value, from: &KilnType, to: &KilnType) -> Value {
        match (from, to) {
            (KilnType::Int, KilnType::Float) => self.builder.ins().fcvt_from_sint(types::F64, val),
            _ => val,
        }
    }

    fn promote_to_float(&mut self, val: Value) -> Value {
        if self.builder.func.dfg.value_type(val).is_float() {
            val
        } else {
            self.builder.ins().fcvt_from_sint(types::F64, val)
        }
    }

    /// Emit a return with the default value for the current function's return type.
    fn emit_default_return(&mut self) {
        if self.is_main {
            let zero = self.builder.ins().iconst(types::I64, 0);
            self.builder.ins().return_(&[zero]);
            return;
        }
        if self.return_type.is_void() {
            self.builder.ins().return_(&[]);
            return;
        }
        let ret_ty = self.return_type.clone();
        let ir_ty = self.ir_type(&ret_ty);
        let zero = if ir_ty == types::F64 {
            self.builder.ins().f64const(0.0)
        } else {
            self.builder.ins().iconst(ir_ty, 0)
        };
        self.builder.ins().return_(&[zero]);
    }

    // ── statements ─────────────────────────────────────────────────────

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
                self.lower_expr(expr)?;
                Ok(())
            }
            Stmt::Return(value) => {
                match value {
                    Some(expr) => {
                        let val = self.lower_expr(expr)?;
                        if expr.ty.is_void() || (self.return_type.is_void() && !self.is_main) {
                            self.emit_default_return();
                        } else if self.is_main {
                            let ret = self.main_exit_code(val);
                            self.builder.ins().return_(&[ret]);
                        } else {
                            let ret_ty = self.return_type.clone();
                            let val = self.coerce(val, &expr.ty, &ret_ty);
                            self.builder.ins().return_(&[val]);
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
            Stmt::Break => {
                let Some(&(_, exit_bb)) = self.loop_stack.last() else {
                    return Err(CompileError::unsupported("break outside of a loop", span));
                };
                self.builder.ins().jump(exit_bb, &[]);
                *terminated = true;
                Ok(())
            }
            Stmt::Continue => {
                let Some(&(header_bb, _)) = self.loop_stack.last() else {
                    return Err(CompileError::unsupported("continue outside of a loop", span));
                };
                self.builder.ins().jump(header_bb, &[]);
                *terminated = true;
                Ok(())
            }
            Stmt::Block(block) => self.lower_scoped_block(block, terminated),
        }
    }

    /// `main` returns the process exit status as I64 whatever its source type.
    fn main_exit_code(&mut self, val: Value) -> Value {
        let ty = self.builder.func.dfg.value_type(val);
        if ty == types::I64 {
            val
        } else if ty.is_float() {
            self.builder.ins().fcvt_to_sint_sat(types::I64, val)
        } else {
            self.builder.ins().uextend(types::I64, val)
        }
    }

    fn lower_let(&mut self, name: &str, ty: &KilnType, value: &TypedExpr) -> Result<(), CompileError> {
        if let Expr::Closure { id, .. } = &value.expr {
            let registry = self.env.registry;
            if let Some(info) = registry.lambda(*id).filter(|info| info.is_direct_binding()) {
                let mut captures = Vec::with_capacity(info.captures.len());
                for cap in &info.captures {
                    let val = self.load_local(&cap.name, value.span)?;
                    let ir_ty = self.ir_type(&cap.ty);
                    let var = self.new_var(ir_ty);
                    self.builder.def_var(var, val);
                    captures.push(var);
                }
                tracing::trace!(name, lambda = *id, "direct lambda binding");
                return self.symbols.insert(name, Slot::Direct { lambda: *id, captures }, ty.clone());
            }
        }
        if ty.is_void() || value.ty.is_void() {
            return Err(CompileError::type_mismatch(
                format!("cannot bind '{name}' to a value of type void"),
                value.span,
            ));
        }
        let val = self.lower_expr(value)?;
        let val = self.coerce(val, &value.ty, ty);
        self.bind_value(name, val, ty)
    }

    fn lower_if(
        &mut self,
        condition: &TypedExpr,
        then_block: &Block,
        else_block: Option<&Block>,
        terminated: &mut bool,
    ) -> Result<(), CompileError> {
        let cond_val = self.lower_expr(condition)?;

        let then_bb = self.builder.create_block();
        let merge_bb = self.builder.create_block();

        if let Some(else_blk) = else_block {
            let else_bb = self.builder.create_block();
            self.builder.ins().brif(cond_val, then_bb, &[], else_bb, &[]);

            self.builder.switch_to_block(then_bb);
            self.builder.seal_block(then_bb);
            let mut then_terminated = false;
            self.lower_scoped_block(then_block, &mut then_terminated)?;
            if !then_terminated {
                self.builder.ins().jump(merge_bb, &[]);
            }

            self.builder.switch_to_block(else_bb);
            self.builder.seal_block(else_bb);
            let mut else_terminated = false;
            self.lower_scoped_block(else_blk, &mut else_terminated)?;
            if !else_terminated {
                self.builder.ins().jump(merge_bb, &[]);
            }

            if then_terminated && else_terminated {
                *terminated = true;
            }
        } else {
            self.builder.ins().brif(cond_val, then_bb, &[], merge_bb, &[]);

            self.builder.switch_to_block(then_bb);
            self.builder.seal_block(then_bb);
            let mut then_terminated = false;
            self.lower_scoped_block(then_block, &mut then_terminated)?;
            if !then_terminated {
                self.builder.ins().jump(merge_bb, &[]);
            }
        }

        if !*terminated {
            self.builder.switch_to_block(merge_bb);
            self.builder.seal_block(merge_bb);
        }
        Ok(())
    }

    fn lower_while(&mut self, condition: &TypedExpr, body: &Block) -> Result<(), CompileError> {
        let header_bb = self.builder.create_block();
        let body_bb = self.builder.create_block();
        let exit_bb = self.builder.create_block();

        self.builder.ins().jump(header_bb, &[]);

        self.builder.switch_to_block(header_bb);
        let cond_val = self.lower_expr(condition)?;
        self.builder.ins().brif(cond_val, body_bb, &[], exit_bb, &[]);

        self.builder.switch_to_block(body_bb);
        self.builder.seal_block(body_bb);
        self.loop_stack.push((header_bb, exit_bb));
        let mut body_terminated = false;
        let result = self.lower_scoped_block(body, &mut body_terminated);
        self.loop_stack.pop();
        result?;
        if !body_terminated {
            self.builder.ins().jump(header_bb, &[]);
        }

        self.builder.seal_block(header_bb);
        self.builder.switch_to_block(exit_bb);
        self.builder.seal_block(exit_bb);
        Ok(())
    }

    // ── expressions ────────────────────────────────────────────────────

    fn lower_expr(&mut self, expr: &TypedExpr) -> Result<Value, CompileError> {
        tracing::trace!(ty = %expr.ty, "lower expression");
        let span = expr.span;
        match &expr.expr {
            Expr::Literal(lit) => self.lower_literal(lit, span),
            Expr::Ident(name) => self.lower_ident(name, span),
            Expr::Unary { op, operand } => {
                let val = self.lower_expr(operand)?;
                Ok(match op {
                    UnaryOp::Neg if self.builder.func.dfg.value_type(val).is_float() => self.builder.ins().fneg(val),
                    UnaryOp::Neg => self.builder.ins().ineg(val),
                    UnaryOp::Not => self.builder.ins().icmp_imm(IntCC::Equal, val, 0),
                })
            }
            Expr::Binary { op, lhs, rhs } => {
                if op.is_logical() {
                    self.lower_logical(*op, lhs, rhs)
                } else {
                    self.lower_binop(*op, lhs, rhs, span)
                }
            }
            Expr::Assign { target, value } => self.lower_assign(target, value, span),
            Expr::Call { callee, args } => self.lower_call(callee, args, &expr.ty, span),
            Expr::MethodCall { object, method, args } => self.lower_method_call(object, method, args, &expr.ty, span),
            Expr::Index { array, index } => {
                let arr = self.lower_expr(array)?;
                let idx = self.lower_expr(index)?;
                let addr = self.element_addr(arr, idx)?;
                Ok(self.load_slot(&expr.ty, addr, 0))
            }
            Expr::ArrayLit(elements) => {
                let elem_ty = expr.ty.element().cloned().unwrap_or(KilnType::Int);
                let arr = self.alloc(i64::from(POINTER_SIZE) * (elements.len() as i64 + 1))?;
                let len = self.builder.ins().iconst(types::I64, elements.len() as i64);
                self.builder.ins().store(MemFlags::new(), len, arr, Offset32::new(0));
                for (i, elem) in elements.iter().enumerate() {
                    let val = self.lower_expr(elem)?;
                    let val = self.coerce(val, &elem.ty, &elem_ty);
                    self.store_slot(val, &elem_ty, arr, (i as i32 + 1) * POINTER_SIZE);
                }
                Ok(arr)
            }
            Expr::StructLit { name, fields } => self.lower_struct_lit(name, fields, span),
            Expr::FieldAccess { object, field } => {
                let obj = self.lower_expr(object)?;
                let (index, field_ty) = self.resolve_field(&object.ty, field, span)?;
                Ok(self.load_slot(&field_ty, obj, index as i32 * POINTER_SIZE))
            }
            Expr::Match { scrutinee, arms } => self.lower_match(scrutinee, arms, &expr.ty, span),
            Expr::Lambda { .. } => Err(CompileError::unsupported("lambda reached lowering without being lifted", span)),
            Expr::Closure { id, .. } => self.lower_closure_create(*id, span),
            Expr::Spawn { call } => self.lower_spawn(call, span),
            Expr::If { condition, then_branch, else_branch } => {
                self.lower_if_expr(condition, then_branch, else_branch, &expr.ty)
            }
            Expr::Try { operand } => self.lower_try(operand, span),
        }
    }

    fn lower_literal(&mut self, lit: &Literal, span: Span) -> Result<Value, CompileError> {
        match lit {
            Literal::Int(text) => {
                let n = parse_int(text, span)?;
                Ok(self.builder.ins().iconst(types::I64, n))
            }
            Literal::Float(text) => {
                let f = parse_float(text, span)?;
                Ok(self.builder.ins().f64const(f))
            }
            Literal::Bool(b) => Ok(self.builder.ins().iconst(types::I8, i64::from(*b))),
            Literal::Str(s) => self.create_data_str(s),
        }
    }

    fn lower_ident(&mut self, name: &str, span: Span) -> Result<Value, CompileError> {
        match name {
            "true" => return Ok(self.builder.ins().iconst(types::I8, 1)),
            "false" => return Ok(self.builder.ins().iconst(types::I8, 0)),
            "none" => return Ok(self.builder.ins().iconst(types::I64, 0)),
            _ => {}
        }
        if let Some((_, discriminant)) = self.env.globals.enum_variant(name) {
            return Ok(self.builder.ins().iconst(types::I64, discriminant));
        }
        if self.symbols.lookup(name).is_some() {
            return self.load_local(name, span);
        }
        // A declared function used as a value becomes an environment-less closure.
        if self.env.globals.has_function(name) {
            if let Some(&id) = self.env.func_ids.get(name) {
                let func_ref = self.env.module.declare_func_in_func(id, self.builder.func);
                let fn_ptr = self.builder.ins().func_addr(types::I64, func_ref);
                let null = self.builder.ins().iconst(types::I64, 0);
                return self.call_runtime("__kiln_closure_new", &[fn_ptr, null]);
            }
        }
        Err(CompileError::undefined_variable(name, span))
    }

    /// `&&` / `||` branch around the right operand; the merge block takes the result as an I8 parameter.
    fn lower_logical(&mut self, op: BinOp, lhs: &TypedExpr, rhs: &TypedExpr) -> Result<Value, CompileError> {
        let l = self.lower_expr(lhs)?;
        let rhs_bb = self.builder.create_block();
        let merge_bb = self.builder.create_block();
        self.builder.append_block_param(merge_bb, types::I8);

        if op == BinOp::And {
            self.builder.ins().brif(l, rhs_bb, &[], merge_bb, &[l]);
        } else {
            self.builder.ins().brif(l, merge_bb, &[l], rhs_bb, &[]);
        }

        self.builder.switch_to_block(rhs_bb);
        self.builder.seal_block(rhs_bb);
        let r = self.lower_expr(rhs)?;
        self.builder.ins().jump(merge_bb, &[r]);

        self.builder.switch_to_block(merge_bb);
        self.builder.seal_block(merge_bb);
        Ok(self.builder.block_params(merge_bb)[0])
    }

    /// Each branch stores into a shared variable and jumps to the merge block.
    fn lower_if_expr(
        &mut self,
        condition: &TypedExpr,
        then_branch: &TypedExpr,
        else_branch: &TypedExpr,
        result_ty: &KilnType,
    ) -> Result<Value, CompileError> {
        let cond_val = self.lower_expr(condition)?;
        let result = if result_ty.is_void() {
            None
        } else {
            let ir_ty = self.ir_type(result_ty);
            Some(self.new_var(ir_ty))
        };

        let then_bb = self.builder.create_block();
        let else_bb = self.builder.create_block();
        let merge_bb = self.builder.create_block();
        self.builder.ins().brif(cond_val, then_bb, &[], else_bb, &[]);

        for (bb, branch) in [(then_bb, then_branch), (else_bb, else_branch)] {
            self.builder.switch_to_block(bb);
            self.builder.seal_block(bb);
            let val = self.lower_expr(branch)?;
            if let Some(var) = result {
                let val = self.coerce(val, &branch.ty, result_ty);
                self.builder.def_var(var, val);
            }
            self.builder.ins().jump(merge_bb, &[]);
        }

        self.builder.switch_to_block(merge_bb);
        self.builder.seal_block(merge_bb);
        Ok(match result {
            Some(var) => self.builder.use_var(var),
            None => self.builder.ins().iconst(types::I64, 0),
        })
    }

    /// `operand?`: an error box is returned as is, so the enclosing function
    /// must itself return a result.
    fn lower_try(&mut self, operand: &TypedExpr, span: Span) -> Result<Value, CompileError> {
        let KilnType::Result(ok_ty, _) = &operand.ty else {
            return Err(CompileError::type_mismatch(format!("'?' applied to non-result type {}", operand.ty), span));
        };
        if self.is_main || !matches!(self.return_type, KilnType::Result(..)) {
            return Err(CompileError::type_mismatch(
                format!("'?' used in '{}', which does not return a result", self.fn_name),
                span,
            ));
        }
        let boxed = self.lower_expr(operand)?;
        let tag = self.builder.ins().load(types::I64, MemFlags::new(), boxed, Offset32::new(0));

        let ok_bb = self.builder.create_block();
        let err_bb = self.builder.create_block();
        self.builder.ins().brif(tag, ok_bb, &[], err_bb, &[]);

        self.builder.switch_to_block(err_bb);
        self.builder.seal_block(err_bb);
        self.builder.ins().return_(&[boxed]);

        self.builder.switch_to_block(ok_bb);
        self.builder.seal_block(ok_bb);
        if ok_ty.is_void() {
            return Ok(self.builder.ins().iconst(types::I64, 0));
        }
        Ok(self.load_slot(ok_ty, boxed, POINTER_SIZE))
    }

    fn lower_binop(&mut self, op: BinOp, lhs: &TypedExpr, rhs: &TypedExpr, span: Span) -> Result<Value, CompileError> {
        let l = self.lower_expr(lhs)?;
        let r = self.lower_expr(rhs)?;

        if lhs.ty == KilnType::String || rhs.ty == KilnType::String {
            return match op {
                BinOp::Eq | BinOp::Neq => {
                    let eq = self.call_runtime("__kiln_string_eq", &[l, r])?;
                    let cc = if op == BinOp::Eq { IntCC::NotEqual } else { IntCC::Equal };
                    Ok(self.builder.ins().icmp_imm(cc, eq, 0))
                }
                BinOp::Add => Err(CompileError::unsupported(
                    "string concatenation is not supported by the IR backend",
                    span,
                )),
                _ => Err(CompileError::type_mismatch(
                    format!("operator '{}' cannot be applied to strings", op.symbol()),
                    span,
                )),
            };
        }

        let is_float = self.builder.func.dfg.value_type(l).is_float() || self.builder.func.dfg.value_type(r).is_float();
        if is_float {
            let l = self.promote_to_float(l);
            let r = self.promote_to_float(r);
            let ins = self.builder.ins();
            return Ok(match op {
                BinOp::Add => ins.fadd(l, r),
                BinOp::Sub => ins.fsub(l, r),
                BinOp::Mul => ins.fmul(l, r),
                BinOp::Div => ins.fdiv(l, r),
                BinOp::Eq => ins.fcmp(FloatCC::Equal, l, r),
                BinOp::Neq => ins.fcmp(FloatCC::OrderedNotEqual, l, r),
                BinOp::Lt => ins.fcmp(FloatCC::LessThan, l, r),
                BinOp::Gt => ins.fcmp(FloatCC::GreaterThan, l, r),
                BinOp::LtEq => ins.fcmp(FloatCC::LessThanOrEqual, l, r),
                BinOp::GtEq => ins.fcmp(FloatCC::GreaterThanOrEqual, l, r),
                BinOp::Mod => {
                    return Err(CompileError::type_mismatch("operator '%' requires int operands", span));
                }
                BinOp::And | BinOp::Or => unreachable!("logical operators are lowered by lower_logical"),
            });
        }

        let ins = self.builder.ins();
        Ok(match op {
            BinOp::Add => ins.iadd(l, r),
            BinOp::Sub => ins.isub(l, r),
            BinOp::Mul => ins.imul(l, r),
            BinOp::Div => ins.sdiv(l, r),
            BinOp::Mod => ins.srem(l, r),
            BinOp::Eq => ins.icmp(IntCC::Equal, l, r),
            BinOp::Neq => ins.icmp(IntCC::NotEqual, l, r),
            BinOp::Lt => ins.icmp(IntCC::SignedLessThan, l, r),
            BinOp::Gt => ins.icmp(IntCC::SignedGreaterThan, l, r),
            BinOp::LtEq => ins.icmp(IntCC::SignedLessThanOrEqual, l, r),
            BinOp::GtEq => ins.icmp(IntCC::SignedGreaterThanOrEqual, l, r),
            BinOp::And | BinOp::Or => unreachable!("logical operators are lowered by lower_logical"),
        })
    }

    fn lower_assign(&mut self, target: &AssignTarget, value: &TypedExpr, span: Span) -> Result<Value, CompileError> {
        match target {
            AssignTarget::Var(name) => {
                let binding = self.symbols.lookup_binding(name).map(|b| (b.location.clone(), b.ty.clone()));
                match binding {
                    Some((Slot::Var(var), ty)) => {
                        let val = self.lower_expr(value)?;
                        let val = self.coerce(val, &value.ty, &ty);
                        self.builder.def_var(var, val);
                        Ok(val)
                    }
                    Some((Slot::Direct { .. }, _)) => Err(CompileError::unsupported(
                        format!("cannot assign to directly bound lambda '{name}'"),
                        span,
                    )),
                    None => Err(CompileError::undefined_variable(name, span)),
                }
            }
            AssignTarget::Index { array, index } => {
                let elem_ty = array.ty.element().cloned().unwrap_or(KilnType::Int);
                let arr = self.lower_expr(array)?;
                let idx = self.lower_expr(index)?;
                let addr = self.element_addr(arr, idx)?;
                let val = self.lower_expr(value)?;
                let val = self.coerce(val, &value.ty, &elem_ty);
                self.store_slot(val, &elem_ty, addr, 0);
                Ok(val)
            }
            AssignTarget::Field { object, field } => {
                let obj = self.lower_expr(object)?;
                let (index, field_ty) = self.resolve_field(&object.ty, field, span)?;
                let val = self.lower_expr(value)?;
                let val = self.coerce(val, &value.ty, &field_ty);
                self.store_slot(val, &field_ty, obj, index as i32 * POINTER_SIZE);
                Ok(val)
            }
        }
    }

    /// Address of `arr[idx]`, bounds-checked unless disabled.
    fn element_addr(&mut self, arr: Value, idx: Value) -> Result<Value, CompileError> {
        if self.env.bounds_checks {
            let len = self.builder.ins().load(types::I64, MemFlags::new(), arr, Offset32::new(0));
            let negative = self.builder.ins().icmp_imm(IntCC::SignedLessThan, idx, 0);
            let past_end = self.builder.ins().icmp(IntCC::SignedGreaterThanOrEqual, idx, len);
            let out_of_bounds = self.builder.ins().bor(negative, past_end);

            let fail_bb = self.builder.create_block();
            let ok_bb = self.builder.create_block();
            self.builder.ins().brif(out_of_bounds, fail_bb, &[], ok_bb, &[]);

            self.builder.switch_to_block(fail_bb);
            self.builder.seal_block(fail_bb);
            self.emit_runtime_panic("Runtime Error: Array index out of bounds")?;

            self.builder.switch_to_block(ok_bb);
            self.builder.seal_block(ok_bb);
        }
        let offset = self.builder.ins().imul_imm(idx, i64::from(POINTER_SIZE));
        let offset = self.builder.ins().iadd_imm(offset, i64::from(POINTER_SIZE));
        Ok(self.builder.ins().iadd(arr, offset))
    }

    fn resolve_field(&self, object_ty: &KilnType, field: &str, span: Span) -> Result<(usize, KilnType), CompileError> {
        let KilnType::Struct(struct_name) = object_ty else {
            return Err(CompileError::type_mismatch(
                format!("field access '.{field}' on non-struct type {object_ty}"),
                span,
            ));
        };
        let decl = self
            .env
            .globals
            .struct_decl(struct_name)
            .ok_or_else(|| CompileError::type_mismatch(format!("unknown struct '{struct_name}'"), span))?;
        decl.field_index(field)
            .map(|(i, ty)| (i, ty.clone()))
            .ok_or_else(|| CompileError::type_mismatch(format!("struct '{struct_name}' has no field '{field}'"), span))
    }

    fn lower_struct_lit(&mut self, name: &str, fields: &[(String, TypedExpr)], span: Span) -> Result<Value, CompileError> {
        let globals = self.env.globals;
        let decl = globals
            .struct_decl(name)
            .ok_or_else(|| CompileError::type_mismatch(format!("unknown struct '{name}'"), span))?;

        let mut seen: Vec<&str> = Vec::with_capacity(fields.len());
        for (field, _) in fields {
            if decl.field_index(field).is_none() {
                return Err(CompileError::type_mismatch(format!("struct '{name}' has no field '{field}'"), span));
            }
            if seen.contains(&field.as_str()) {
                return Err(CompileError::type_mismatch(
                    format!("field '{field}' specified more than once in '{name}' literal"),
                    span,
                ));
            }
            seen.push(field);
        }
        if let Some(missing) = decl.fields.iter().find(|f| !seen.contains(&f.name.as_str())) {
            return Err(CompileError::type_mismatch(
                format!("missing field '{}' in '{name}' literal", missing.name),
                span,
            ));
        }

        let ptr = self.alloc(i64::from(POINTER_SIZE) * decl.fields.len().max(1) as i64)?;
        for (field, value) in fields {
            let Some((index, field_ty)) = decl.field_index(field) else { continue };
            let val = self.lower_expr(value)?;
            let val = self.coerce(val, &value.ty, field_ty);
            self.store_slot(val, field_ty, ptr, index as i32 * POINTER_SIZE);
        }
        Ok(ptr)
    }

    // ── calls ──────────────────────────────────────────────────────────

    fn lower_args(&mut self, args: &[TypedExpr], param_tys: &[KilnType]) -> Result<Vec<Value>, CompileError> {
        let mut vals = Vec::with_capacity(args.len());
        for (arg, ty) in args.iter().zip(param_tys) {
            let val = self.lower_expr(arg)?;
            vals.push(self.coerce(val, &arg.ty, ty));
        }
        Ok(vals)
    }

    fn check_arity(callee: &str, expected: usize, got: usize, span: Span) -> Result<(), CompileError> {
        if expected == got {
            Ok(())
        } else {
            Err(CompileError::type_mismatch(
                format!("'{callee}' expects {expected} argument(s), got {got}"),
                span,
            ))
        }
    }

    /// Direct call of a function declared in this module.
    fn call_declared(&mut self, name: &str, args: &[Value], ret: &KilnType, span: Span) -> Result<Value, CompileError> {
        let id = *self
            .env
            .func_ids
            .get(name)
            .ok_or_else(|| CompileError::undefined_function(name, span))?;
        let func_ref = self.env.module.declare_func_in_func(id, self.builder.func);
        let call = self.builder.ins().call(func_ref, args);
        let result = self.builder.inst_results(call).first().copied();
        match result {
            Some(v) if !ret.is_void() => Ok(v),
            _ => Ok(self.builder.ins().iconst(types::I64, 0)),
        }
    }

    fn lower_call(&mut self, callee: &str, args: &[TypedExpr], ty: &KilnType, span: Span) -> Result<Value, CompileError> {
        if let Some(special) = builtins::special(callee) {
            return self.lower_special(special, callee, args, span);
        }
        if let Some(runtime_fn) = builtins::lookup(callee) {
            return self.lower_builtin_call(callee, runtime_fn, args, span);
        }

        let local = self.symbols.lookup_binding(callee).map(|b| (b.location.clone(), b.ty.clone()));
        match local {
            Some((Slot::Direct { lambda, captures }, _)) => {
                let registry = self.env.registry;
                let info = registry
                    .lambda(lambda)
                    .ok_or_else(|| CompileError::unsupported(format!("unknown lambda id {lambda}"), span))?;
                Self::check_arity(callee, info.params.len(), args.len(), span)?;
                let mut vals: Vec<Value> = captures.iter().map(|v| self.builder.use_var(*v)).collect();
                let param_tys: Vec<KilnType> = info.params.iter().map(|p| p.ty.clone()).collect();
                vals.extend(self.lower_args(args, &param_tys)?);
                return self.call_declared(&info.name, &vals, &info.return_type, span);
            }
            Some((Slot::Var(var), KilnType::Fn(param_tys, ret))) => {
                Self::check_arity(callee, param_tys.len(), args.len(), span)?;
                let closure = self.builder.use_var(var);
                let vals = self.lower_args(args, &param_tys)?;
                return self.call_closure(closure, &param_tys, &ret, &vals);
            }
            Some((Slot::Var(_), other)) => {
                return Err(CompileError::type_mismatch(format!("'{callee}' of type {other} is not callable"), span));
            }
            None => {}
        }

        let globals = self.env.globals;
        if let Some(KilnType::Fn(param_tys, ret)) = globals.function(callee) {
            Self::check_arity(callee, param_tys.len(), args.len(), span)?;
            let vals = self.lower_args(args, param_tys)?;
            return self.call_declared(callee, &vals, ret, span);
        }

        tracing::debug!(callee, %ty, "unresolved call");
        Err(CompileError::undefined_function(callee, span))
    }

    /// Call a closure object `[fn_ptr][env_ptr]`: environment-style lifted
    /// functions take the environment as a hidden first argument.
    fn call_closure(&mut self, closure: Value, param_tys: &[KilnType], ret: &KilnType, args: &[Value]) -> Result<Value, CompileError> {
        let fn_ptr = self.builder.ins().load(types::I64, MemFlags::new(), closure, Offset32::new(0));
        let env_ptr = self.builder.ins().load(types::I64, MemFlags::new(), closure, Offset32::new(POINTER_SIZE));

        let mut plain_sig = self.env.module.make_signature();
        for ty in param_tys {
            let ir_ty = self.ir_type(ty);
            plain_sig.params.push(AbiParam::new(ir_ty));
        }
        let ret_ty = if ret.is_void() { None } else { Some(self.ir_type(ret)) };
        if let Some(t) = ret_ty {
            plain_sig.returns.push(AbiParam::new(t));
        }
        let mut env_sig = plain_sig.clone();
        env_sig.params.insert(0, AbiParam::new(types::I64));

        let with_env_bb = self.builder.create_block();
        let without_env_bb = self.builder.create_block();
        let merge_bb = self.builder.create_block();
        if let Some(t) = ret_ty {
            self.builder.append_block_param(merge_bb, t);
        }
        self.builder.ins().brif(env_ptr, with_env_bb, &[], without_env_bb, &[]);

        self.builder.switch_to_block(with_env_bb);
        self.builder.seal_block(with_env_bb);
        let sig_ref = self.builder.import_signature(env_sig);
        let mut full_args = Vec::with_capacity(args.len() + 1);
        full_args.push(env_ptr);
        full_args.extend_from_slice(args);
        let call = self.builder.ins().call_indirect(sig_ref, fn_ptr, &full_args);
        let results = self.builder.inst_results(call).to_vec();
        self.builder.ins().jump(merge_bb, &results);

        self.builder.switch_to_block(without_env_bb);
        self.builder.seal_block(without_env_bb);
        let sig_ref = self.builder.import_signature(plain_sig);
        let call = self.builder.ins().call_indirect(sig_ref, fn_ptr, args);
        let results = self.builder.inst_results(call).to_vec();
        self.builder.ins().jump(merge_bb, &results);

        self.builder.switch_to_block(merge_bb);
        self.builder.seal_block(merge_bb);
        match ret_ty {
            Some(_) => Ok(self.builder.block_params(merge_bb)[0]),
            None => Ok(self.builder.ins().iconst(types::I64, 0)),
        }
    }

    fn lower_builtin_call(&mut self, name: &str, f: &'static RuntimeFn, args: &[TypedExpr], span: Span) -> Result<Value, CompileError> {
        Self::check_arity(name, f.params.len(), args.len(), span)?;
        let mut vals = Vec::with_capacity(args.len());
        for (arg, abi) in args.iter().zip(f.params) {
            let val = self.lower_expr(arg)?;
            let val = match abi {
                Abi::Bool => self.builder.ins().uextend(types::I32, val),
                Abi::Float => self.promote_to_float(val),
                _ => val,
            };
            vals.push(val);
        }
        match f.ret {
            Abi::Void => {
                self.call_runtime_void(f.symbol, &vals)?;
                Ok(self.builder.ins().iconst(types::I64, 0))
            }
            Abi::Bool => {
                let raw = self.call_runtime(f.symbol, &vals)?;
                Ok(self.builder.ins().icmp_imm(IntCC::NotEqual, raw, 0))
            }
            _ => self.call_runtime(f.symbol, &vals),
        }
    }

    fn lower_special(&mut self, special: Special, name: &str, args: &[TypedExpr], span: Span) -> Result<Value, CompileError> {
        match special {
            Special::Print | Special::Println => {
                if special == Special::Println && args.is_empty() {
                    self.call_runtime_void("__kiln_print_newline", &[])?;
                    return Ok(self.builder.ins().iconst(types::I64, 0));
                }
                Self::check_arity(name, 1, args.len(), span)?;
                let arg = &args[0];
                let val = self.lower_expr(arg)?;
                match &arg.ty {
                    KilnType::Int => self.call_runtime_void("__kiln_print_int", &[val])?,
                    KilnType::Float => self.call_runtime_void("__kiln_print_float", &[val])?,
                    KilnType::Bool => {
                        let wide = self.builder.ins().uextend(types::I32, val);
                        self.call_runtime_void("__kiln_print_bool", &[wide])?;
                    }
                    KilnType::String => self.call_runtime_void("__kiln_print_str", &[val])?,
                    other => {
                        return Err(CompileError::type_mismatch(format!("cannot print a value of type {other}"), arg.span));
                    }
                }
                if special == Special::Println {
                    self.call_runtime_void("__kiln_print_newline", &[])?;
                }
                Ok(self.builder.ins().iconst(types::I64, 0))
            }
            Special::Assert => {
                if args.is_empty() || args.len() > 2 {
                    return Err(CompileError::type_mismatch(
                        format!("'assert' expects 1 or 2 argument(s), got {}", args.len()),
                        span,
                    ));
                }
                let cond = self.lower_expr(&args[0])?;
                let msg = match args.get(1) {
                    Some(m) => self.lower_expr(m)?,
                    None => self.create_data_str("assertion failed")?,
                };
                let wide = self.builder.ins().uextend(types::I32, cond);
                self.call_runtime_void("__kiln_assert", &[wide, msg])?;
                Ok(self.builder.ins().iconst(types::I64, 0))
            }
            Special::Min | Special::Max => {
                Self::check_arity(name, 2, args.len(), span)?;
                let a = self.lower_expr(&args[0])?;
                let b = self.lower_expr(&args[1])?;
                let float = args.iter().any(|a| a.ty == KilnType::Float);
                let symbol = match (special == Special::Min, float) {
                    (true, false) => "__kiln_min_int",
                    (false, false) => "__kiln_max_int",
                    (true, true) => "__kiln_min_float",
                    (false, true) => "__kiln_max_float",
                };
                let (a, b) = if float { (self.promote_to_float(a), self.promote_to_float(b)) } else { (a, b) };
                self.call_runtime(symbol, &[a, b])
            }
            Special::Abs => {
                Self::check_arity(name, 1, args.len(), span)?;
                let val = self.lower_expr(&args[0])?;
                let symbol = if args[0].ty == KilnType::Float { "__kiln_abs_float" } else { "__kiln_abs_int" };
                self.call_runtime(symbol, &[val])
            }
            Special::Len => {
                Self::check_arity(name, 1, args.len(), span)?;
                let val = self.lower_expr(&args[0])?;
                match &args[0].ty {
                    KilnType::Array(_) => Ok(self.builder.ins().load(types::I64, MemFlags::new(), val, Offset32::new(0))),
                    KilnType::String => self.call_runtime("__kiln_string_len", &[val]),
                    other => Err(CompileError::type_mismatch(format!("len() of non-array type {other}"), span)),
                }
            }
            Special::TypeOf => {
                Self::check_arity(name, 1, args.len(), span)?;
                self.create_data_str(&args[0].ty.to_string())
            }
            Special::Some | Special::Ok | Special::Err => {
                Self::check_arity(name, 1, args.len(), span)?;
                let val = self.lower_expr(&args[0])?;
                let slot = to_slot(val, &args[0].ty, &mut self.builder);
                let symbol = match special {
                    Special::Some => "__kiln_some",
                    Special::Ok => "__kiln_ok",
                    _ => "__kiln_err",
                };
                self.call_runtime(symbol, &[slot])
            }
        }
    }

    fn lower_method_call(
        &mut self,
        object: &TypedExpr,
        method: &str,
        args: &[TypedExpr],
        ty: &KilnType,
        span: Span,
    ) -> Result<Value, CompileError> {
        match (method, &object.ty) {
            ("await", KilnType::Future(inner)) if args.is_empty() => {
                let future = self.lower_expr(object)?;
                let boxed = self.call_runtime("__kiln_await", &[future])?;
                if inner.is_void() {
                    self.call_runtime_void("__kiln_free", &[boxed])?;
                    return Ok(self.builder.ins().iconst(types::I64, 0));
                }
                let val = self.load_slot(inner, boxed, 0);
                self.call_runtime_void("__kiln_free", &[boxed])?;
                Ok(val)
            }
            ("len", _) if args.is_empty() => self.lower_special(Special::Len, "len", std::slice::from_ref(object), span),
            (_, KilnType::Struct(struct_name)) => {
                let mangled = format!("{struct_name}_{method}");
                let globals = self.env.globals;
                let Some(KilnType::Fn(param_tys, ret)) = globals.function(&mangled) else {
                    return Err(CompileError::undefined_function(format!("{struct_name}.{method}"), span));
                };
                Self::check_arity(&mangled, param_tys.len(), args.len() + 1, span)?;
                let receiver = self.lower_expr(object)?;
                let mut vals = vec![receiver];
                vals.extend(self.lower_args(args, &param_tys[1..])?);
                self.call_declared(&mangled, &vals, ret, span)
            }
            (_, other) => {
                tracing::debug!(method, %ty, "unresolved method");
                Err(CompileError::undefined_function(format!("{other}.{method}"), span))
            }
        }
    }

    // ── closures and tasks ─────────────────────────────────────────────

    fn lower_closure_create(&mut self, id: u32, span: Span) -> Result<Value, CompileError> {
        let registry = self.env.registry;
        let info = registry
            .lambda(id)
            .ok_or_else(|| CompileError::unsupported(format!("closure references unknown lambda id {id}"), span))?;
        let func_id = *self
            .env
            .func_ids
            .get(&info.name)
            .ok_or_else(|| CompileError::undefined_function(info.name.clone(), span))?;
        let func_ref = self.env.module.declare_func_in_func(func_id, self.builder.func);
        let fn_ptr = self.builder.ins().func_addr(types::I64, func_ref);

        let env_ptr = if info.has_env() {
            let env = self.alloc(i64::from(POINTER_SIZE) * info.captures.len() as i64)?;
            for (i, cap) in info.captures.iter().enumerate() {
                let val = self.load_local(&cap.name, span)?;
                self.store_slot(val, &cap.ty, env, i as i32 * POINTER_SIZE);
            }
            env
        } else if info.captures.is_empty() {
            self.builder.ins().iconst(types::I64, 0)
        } else {
            return Err(CompileError::unsupported(
                format!("lambda {} with captures used as a value without an environment", info.name),
                span,
            ));
        };
        self.call_runtime("__kiln_closure_new", &[fn_ptr, env_ptr])
    }

    /// `spawn f(args)`: box the arguments and hand the wrapper to the runtime.
    fn lower_spawn(&mut self, call: &TypedExpr, span: Span) -> Result<Value, CompileError> {
        let Expr::Call { callee, args } = &call.expr else {
            return Err(CompileError::unsupported("spawn target must be a function call", span));
        };
        if self.symbols.lookup(callee).is_some() {
            return Err(CompileError::unsupported(
                format!("spawn of local '{callee}': only declared functions can be spawned"),
                span,
            ));
        }
        let registry = self.env.registry;
        let wrapper = registry.spawn_wrapper(callee, args.len()).ok_or_else(|| {
            CompileError::unsupported(format!("spawn of '{callee}' has no registered task wrapper"), span)
        })?;

        let args_box = if args.is_empty() {
            self.builder.ins().iconst(types::I64, 0)
        } else {
            let boxed = self.alloc(i64::from(POINTER_SIZE) * args.len() as i64)?;
            for (i, (arg, ty)) in args.iter().zip(&wrapper.param_types).enumerate() {
                let val = self.lower_expr(arg)?;
                let val = self.coerce(val, &arg.ty, ty);
                self.store_slot(val, ty, boxed, i as i32 * POINTER_SIZE);
            }
            boxed
        };

        let wrapper_id = *self
            .env
            .func_ids
            .get(&wrapper.name)
            .ok_or_else(|| CompileError::undefined_function(wrapper.name.clone(), span))?;
        let func_ref = self.env.module.declare_func_in_func(wrapper_id, self.builder.func);
        let wrapper_ptr = self.builder.ins().func_addr(types::I64, func_ref);
        self.call_runtime("__kiln_spawn", &[wrapper_ptr, args_box])
    }
}

/// Lower one function body into `builder`. Captures of environment-style
/// lambdas are unpacked from the environment record at entry.
pub fn lower_function<'a>(plan: &FnPlan<'_>, mut builder: FunctionBuilder<'a>, env: LowerEnv<'a>) -> Result<(), CompileError> {
    let entry_block = builder.create_block();
    builder.append_block_params_for_function_params(entry_block);
    builder.switch_to_block(entry_block);
    builder.seal_block(entry_block);
    let param_vals: Vec<Value> = builder.block_params(entry_block).to_vec();

    let mut ctx = LowerContext {
        builder,
        env,
        symbols: SymbolTable::new(),
        next_var: 0,
        return_type: plan.return_type.clone(),
        is_main: plan.is_main,
        fn_name: plan.name.to_string(),
        loop_stack: Vec::new(),
    };

    let mut values = param_vals.into_iter();
    if let Some(captures) = plan.env_captures {
        let env_ptr = values
            .next()
            .ok_or_else(|| ctx.backend_error("environment parameter missing"))?;
        for (i, cap) in captures.iter().enumerate() {
            let val = ctx.load_slot(&cap.ty, env_ptr, i as i32 * POINTER_SIZE);
            ctx.bind_value(&cap.name, val, &cap.ty)?;
        }
    }
    for (param, val) in plan.params.iter().zip(values) {
        ctx.bind_value(&param.name, val, &param.ty)?;
    }

    let mut terminated = false;
    ctx.lower_block(plan.body, &mut terminated)?;
    if !terminated {
        ctx.emit_default_return();
    }

    ctx.builder.seal_all_blocks();
    ctx.finalize();
    Ok(())
}
