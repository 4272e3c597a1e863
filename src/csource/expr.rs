use crate::ast::{parse_float, parse_int, AssignTarget, BinOp, Expr, Literal, TypedExpr, UnaryOp};
use crate::builtins::{self, Abi, RuntimeFn, Special};
use crate::diagnostics::CompileError;
use crate::span::Span;
use crate::types::KilnType;

use super::typemap::{c_ident, c_string_literal, from_slot, slot_bits, to_slot};
use super::{env_type_name, user_fn_name, CSlot, CValue, FnContext};

const OUT_OF_BOUNDS: &str = "Runtime Error: Array index out of bounds";

/// C spelling of an int literal. `i64::MIN` has no literal form in C.
pub(super) fn int_code(n: i64) -> String {
    if n == i64::MIN {
        "(-9223372036854775807LL - 1)".to_string()
    } else if n < 0 {
        format!("(-{}LL)", n.unsigned_abs())
    } else {
        format!("{n}LL")
    }
}

pub(super) fn float_code(f: f64) -> String {
    if f.is_nan() {
        return "NAN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "INFINITY".to_string() } else { "(-INFINITY)".to_string() };
    }
    let text = format!("{f:?}");
    if text.starts_with('-') { format!("({text})") } else { text }
}

impl FnContext<'_> {
    pub(super) fn lower_expr(&mut self, expr: &TypedExpr) -> Result<CValue, CompileError> {
        tracing::trace!(ty = %expr.ty, "lower expression");
        let span = expr.span;
        match &expr.expr {
            Expr::Literal(lit) => lower_literal(lit, span),
            Expr::Ident(name) => self.lower_ident(name, &expr.ty, span),
            Expr::Unary { op, operand } => {
                let val = self.lower_expr(operand)?;
                Ok(match op {
                    UnaryOp::Neg => CValue::new(format!("(-{})", val.code), val.ty),
                    UnaryOp::Not => CValue::new(format!("(!{})", val.code), KilnType::Bool),
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
                let mut earlier = [self.lower_expr(array)?];
                let idx = self.lower_after(&mut earlier, index)?;
                let [arr] = earlier;
                let arr = self.hoist(arr);
                let idx = self.hoist(idx);
                let slot = self.element_slot(&arr.code, &idx.code);
                Ok(CValue::new(from_slot(&slot, &expr.ty), expr.ty.clone()))
            }
            Expr::ArrayLit(elements) => {
                let elem_ty = expr.ty.element().cloned().unwrap_or(KilnType::Int);
                let arr = self.fresh_temp();
                self.out.line(&format!(
                    "KilnSlot* {arr} = (KilnSlot*)__kiln_alloc(sizeof(KilnSlot) * {});",
                    elements.len() + 1
                ));
                self.out.line(&format!("{arr}[0].i = {};", elements.len()));
                for (i, elem) in elements.iter().enumerate() {
                    let val = self.lower_expr(elem)?;
                    let val = self.coerce(val, &elem_ty);
                    self.out.line(&to_slot(&format!("{arr}[{}]", i + 1), &val.code, &elem_ty));
                }
                Ok(CValue::new(arr, expr.ty.clone()))
            }
            Expr::StructLit { name, fields } => self.lower_struct_lit(name, fields, span),
            Expr::FieldAccess { object, field } => {
                let obj = self.lower_expr(object)?;
                let obj = self.hoist(obj);
                let field_ty = self.resolve_field(&object.ty, field, span)?;
                Ok(CValue::new(format!("{}->{}", obj.code, c_ident(field)), field_ty))
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

    pub(super) fn load_local(&self, name: &str, span: Span) -> Result<CValue, CompileError> {
        match self.symbols.lookup_binding(name) {
            Some(binding) => match &binding.location {
                CSlot::Local(local) => Ok(CValue::new(local.clone(), binding.ty.clone())),
                CSlot::Direct { .. } => Err(CompileError::unsupported(
                    format!("lambda '{name}' is bound directly and has no value"),
                    span,
                )),
            },
            None => Err(CompileError::undefined_variable(name, span)),
        }
    }

    fn lower_ident(&mut self, name: &str, ty: &KilnType, span: Span) -> Result<CValue, CompileError> {
        match name {
            "true" | "false" => return Ok(CValue::new(name, KilnType::Bool)),
            "none" => return Ok(CValue::new("NULL", ty.clone())),
            _ => {}
        }
        if let Some((enum_name, discriminant)) = self.env.globals.enum_variant(name) {
            return Ok(CValue::new(int_code(discriminant), KilnType::Enum(enum_name.to_string())));
        }
        if self.symbols.lookup(name).is_some() {
            return self.load_local(name, span);
        }
        // A declared function used as a value becomes an environment-less closure.
        if let Some(sig) = self.env.globals.function(name).cloned() {
            let code = format!("(KilnClosure*)__kiln_closure_new((void*){}, NULL)", user_fn_name(name));
            return Ok(self.temp(&sig, &code));
        }
        Err(CompileError::undefined_variable(name, span))
    }

    /// Lower `next` after `earlier` has already been evaluated. When `next`
    /// needs statements of its own, any earlier value that reads mutable
    /// state is copied to a temp ahead of them, so operands and arguments
    /// observe left-to-right evaluation.
    pub(super) fn lower_after(&mut self, earlier: &mut [CValue], next: &TypedExpr) -> Result<CValue, CompileError> {
        let inner = self.out.detached();
        let outer = std::mem::replace(&mut self.out, inner);
        let val = self.lower_expr(next);
        let stmts = std::mem::replace(&mut self.out, outer);
        let val = val?;

        if !stmts.is_empty() {
            for value in earlier.iter_mut().filter(|v| !v.is_stable()) {
                let pinned = self.temp(&value.ty.clone(), &value.code);
                *value = pinned;
            }
            self.out.splice(stmts);
        }
        Ok(val)
    }

    /// `leading` (already lowered) followed by each of `exprs`, in order.
    fn lower_in_order(&mut self, leading: Vec<CValue>, exprs: &[TypedExpr]) -> Result<Vec<CValue>, CompileError> {
        let mut values = leading;
        values.reserve(exprs.len());
        for expr in exprs {
            let val = self.lower_after(&mut values, expr)?;
            values.push(val);
        }
        Ok(values)
    }

    /// Native `&&`/`||` when the right operand is a pure expression; when
    /// it needs statements of its own they run inside an `if` on the left
    /// operand, so a short-circuited right side is never evaluated.
    fn lower_logical(&mut self, op: BinOp, lhs: &TypedExpr, rhs: &TypedExpr) -> Result<CValue, CompileError> {
        let l = self.lower_expr(lhs)?;
        let inner = self.out.nested();
        let outer = std::mem::replace(&mut self.out, inner);
        let r = self.lower_expr(rhs);
        let rhs_stmts = std::mem::replace(&mut self.out, outer);
        let r = r?;

        if rhs_stmts.is_empty() {
            return Ok(CValue::new(format!("({} {} {})", l.code, op.symbol(), r.code), KilnType::Bool));
        }
        let result = self.temp(&KilnType::Bool, &l.code);
        if op == BinOp::And {
            self.out.open(&format!("if ({})", result.code));
        } else {
            self.out.open(&format!("if (!{})", result.code));
        }
        self.out.splice(rhs_stmts);
        self.out.line(&format!("{} = {};", result.code, r.code));
        self.out.close("");
        Ok(result)
    }

    fn lower_if_expr(
        &mut self,
        condition: &TypedExpr,
        then_branch: &TypedExpr,
        else_branch: &TypedExpr,
        result_ty: &KilnType,
    ) -> Result<CValue, CompileError> {
        let cond = self.lower_expr(condition)?;
        let result = if result_ty.is_void() {
            None
        } else {
            let name = self.fresh_temp();
            let c_ty = self.c_type(result_ty);
            self.out.line(&format!("{c_ty} {name};"));
            Some(CValue::new(name, result_ty.clone()))
        };

        self.out.open(&format!("if ({})", cond.code));
        self.lower_branch(then_branch, result.as_ref())?;
        self.out.else_branch();
        self.lower_branch(else_branch, result.as_ref())?;
        self.out.close("");
        Ok(result.unwrap_or_else(CValue::void))
    }

    fn lower_branch(&mut self, branch: &TypedExpr, result: Option<&CValue>) -> Result<(), CompileError> {
        let val = self.lower_expr(branch)?;
        match result {
            Some(result) => {
                let val = self.coerce(val, &result.ty);
                self.out.line(&format!("{} = {};", result.code, val.code));
            }
            None if !val.ty.is_void() && !val.is_atom() => self.out.line(&format!("(void){};", val.code)),
            None => {}
        }
        Ok(())
    }

    /// `operand?`: an error box is returned as is.
    fn lower_try(&mut self, operand: &TypedExpr, span: Span) -> Result<CValue, CompileError> {
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
        let boxed = self.hoist(boxed);
        self.out.line(&format!("if ({}->tag != KILN_TAG_OK) return {};", boxed.code, boxed.code));
        if ok_ty.is_void() {
            return Ok(CValue::void());
        }
        Ok(self.temp(ok_ty, &from_slot(&format!("{}->value", boxed.code), ok_ty)))
    }

    fn lower_binop(&mut self, op: BinOp, lhs: &TypedExpr, rhs: &TypedExpr, span: Span) -> Result<CValue, CompileError> {
        let mut earlier = [self.lower_expr(lhs)?];
        let r = self.lower_after(&mut earlier, rhs)?;
        let [l] = earlier;

        if lhs.ty == KilnType::String || rhs.ty == KilnType::String {
            return match op {
                BinOp::Eq => Ok(CValue::new(format!("(__kiln_string_eq({}, {}) != 0)", l.code, r.code), KilnType::Bool)),
                BinOp::Neq => Ok(CValue::new(format!("(__kiln_string_eq({}, {}) == 0)", l.code, r.code), KilnType::Bool)),
                BinOp::Add => {
                    let code = format!("__kiln_string_concat({}, {})", l.code, r.code);
                    Ok(self.temp(&KilnType::String, &code))
                }
                _ => Err(CompileError::type_mismatch(
                    format!("operator '{}' cannot be applied to strings", op.symbol()),
                    span,
                )),
            };
        }

        if l.ty == KilnType::Float || r.ty == KilnType::Float {
            let l = self.coerce(l, &KilnType::Float);
            let r = self.coerce(r, &KilnType::Float);
            let ty = if op.is_comparison() { KilnType::Bool } else { KilnType::Float };
            return match op {
                BinOp::Mod => Err(CompileError::type_mismatch("operator '%' requires int operands", span)),
                // Ordered: NaN compares unequal to nothing.
                BinOp::Neq => Ok(CValue::new(format!("(islessgreater({}, {}) != 0)", l.code, r.code), ty)),
                _ => Ok(CValue::new(format!("({} {} {})", l.code, op.symbol(), r.code), ty)),
            };
        }

        Ok(match op {
            BinOp::Div => CValue::new(format!("__kiln_div({}, {})", l.code, r.code), l.ty),
            BinOp::Mod => CValue::new(format!("__kiln_rem({}, {})", l.code, r.code), l.ty),
            op if op.is_comparison() => CValue::new(format!("({} {} {})", l.code, op.symbol(), r.code), KilnType::Bool),
            op => CValue::new(format!("({} {} {})", l.code, op.symbol(), r.code), l.ty),
        })
    }

    fn lower_assign(&mut self, target: &AssignTarget, value: &TypedExpr, span: Span) -> Result<CValue, CompileError> {
        match target {
            AssignTarget::Var(name) => {
                let binding = self.symbols.lookup_binding(name).map(|b| (b.location.clone(), b.ty.clone()));
                match binding {
                    Some((CSlot::Local(local), ty)) => {
                        let val = self.lower_expr(value)?;
                        let val = self.coerce(val, &ty);
                        self.out.line(&format!("{local} = {};", val.code));
                        Ok(CValue::new(local, ty))
                    }
                    Some((CSlot::Direct { .. }, _)) => Err(CompileError::unsupported(
                        format!("cannot assign to directly bound lambda '{name}'"),
                        span,
                    )),
                    None => Err(CompileError::undefined_variable(name, span)),
                }
            }
            AssignTarget::Index { array, index } => {
                let elem_ty = array.ty.element().cloned().unwrap_or(KilnType::Int);
                let mut earlier = [self.lower_expr(array)?];
                let idx = self.lower_after(&mut earlier, index)?;
                let [arr] = earlier;
                let mut earlier = [self.hoist(arr), self.hoist(idx)];
                self.check_index(&earlier[0].code, &earlier[1].code);
                let val = self.lower_after(&mut earlier, value)?;
                let [arr, idx] = earlier;
                let val = self.coerce(val, &elem_ty);
                let val = self.hoist(val);
                self.out.line(&to_slot(&slot_at(&arr.code, &idx.code), &val.code, &elem_ty));
                Ok(val)
            }
            AssignTarget::Field { object, field } => {
                let obj = self.lower_expr(object)?;
                let mut earlier = [self.hoist(obj)];
                let field_ty = self.resolve_field(&object.ty, field, span)?;
                let val = self.lower_after(&mut earlier, value)?;
                let [obj] = earlier;
                let val = self.coerce(val, &field_ty);
                let val = self.hoist(val);
                self.out.line(&format!("{}->{} = {};", obj.code, c_ident(field), val.code));
                Ok(val)
            }
        }
    }

    /// Slot lvalue of `arr[idx]`, bounds-checked unless disabled.
    fn element_slot(&mut self, arr: &str, idx: &str) -> String {
        self.check_index(arr, idx);
        slot_at(arr, idx)
    }

    fn check_index(&mut self, arr: &str, idx: &str) {
        if self.env.bounds_checks {
            self.out.line(&format!(
                "if ({idx} < 0 || {idx} >= {arr}[0].i) __kiln_panic({});",
                c_string_literal(OUT_OF_BOUNDS)
            ));
        }
    }

    pub(super) fn resolve_field(&self, object_ty: &KilnType, field: &str, span: Span) -> Result<KilnType, CompileError> {
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
            .map(|(_, ty)| ty.clone())
            .ok_or_else(|| CompileError::type_mismatch(format!("struct '{struct_name}' has no field '{field}'"), span))
    }

    fn lower_struct_lit(&mut self, name: &str, fields: &[(String, TypedExpr)], span: Span) -> Result<CValue, CompileError> {
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

        let c_name = c_ident(name);
        let ptr = self.fresh_temp();
        self.out.line(&format!("{c_name}* {ptr} = ({c_name}*)__kiln_alloc(sizeof({c_name}));"));
        for (field, value) in fields {
            let Some((_, field_ty)) = decl.field_index(field) else { continue };
            let val = self.lower_expr(value)?;
            let val = self.coerce(val, field_ty);
            self.out.line(&format!("{ptr}->{} = {};", c_ident(field), val.code));
        }
        Ok(CValue::new(ptr, KilnType::Struct(name.to_string())))
    }

    // ── calls ──────────────────────────────────────────────────────────

    /// Arguments after `leading`, each coerced to its parameter type.
    fn lower_args(&mut self, leading: Vec<CValue>, args: &[TypedExpr], param_tys: &[KilnType]) -> Result<Vec<CValue>, CompileError> {
        let skip = leading.len();
        let mut values = self.lower_in_order(leading, args)?;
        for (val, ty) in values.iter_mut().skip(skip).zip(param_tys) {
            *val = self.coerce(val.clone(), ty);
        }
        Ok(values)
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

    /// Call a C function by name; void calls become statements.
    fn call_named(&mut self, c_name: &str, args: &[String], ret: &KilnType) -> CValue {
        let call = format!("{c_name}({})", args.join(", "));
        if ret.is_void() {
            self.out.line(&format!("{call};"));
            CValue::void()
        } else {
            self.temp(ret, &call)
        }
    }

    fn lower_call(&mut self, callee: &str, args: &[TypedExpr], ty: &KilnType, span: Span) -> Result<CValue, CompileError> {
        if let Some(special) = builtins::special(callee) {
            return self.lower_special(special, callee, args, ty, span);
        }
        if let Some(runtime_fn) = builtins::lookup(callee) {
            return self.lower_builtin_call(callee, runtime_fn, args, span);
        }

        let local = self.symbols.lookup_binding(callee).map(|b| (b.location.clone(), b.ty.clone()));
        match local {
            Some((CSlot::Direct { lambda, captures }, _)) => {
                let registry = self.env.registry;
                let info = registry
                    .lambda(lambda)
                    .ok_or_else(|| CompileError::unsupported(format!("unknown lambda id {lambda}"), span))?;
                Self::check_arity(callee, info.params.len(), args.len(), span)?;
                let param_tys: Vec<KilnType> = info.params.iter().map(|p| p.ty.clone()).collect();
                let mut codes = captures;
                codes.extend(self.lower_args(Vec::new(), args, &param_tys)?.into_iter().map(|v| v.code));
                return Ok(self.call_named(&info.name, &codes, &info.return_type));
            }
            Some((CSlot::Local(local), KilnType::Fn(param_tys, ret))) => {
                Self::check_arity(callee, param_tys.len(), args.len(), span)?;
                let closure = CValue::new(local, KilnType::Fn(param_tys.clone(), ret.clone()));
                let mut values = self.lower_args(vec![closure], args, &param_tys)?;
                let closure = values.remove(0);
                let codes: Vec<String> = values.into_iter().map(|v| v.code).collect();
                return Ok(self.call_closure(closure, &param_tys, &ret, &codes));
            }
            Some((CSlot::Local(_), other)) => {
                return Err(CompileError::type_mismatch(format!("'{callee}' of type {other} is not callable"), span));
            }
            None => {}
        }

        let globals = self.env.globals;
        if let Some(KilnType::Fn(param_tys, ret)) = globals.function(callee) {
            Self::check_arity(callee, param_tys.len(), args.len(), span)?;
            let codes: Vec<String> = self.lower_args(Vec::new(), args, param_tys)?.into_iter().map(|v| v.code).collect();
            return Ok(self.call_named(&user_fn_name(callee), &codes, ret));
        }

        tracing::debug!(callee, %ty, "unresolved call");
        Err(CompileError::undefined_function(callee, span))
    }

    /// Call through a `KilnClosure`: environment-style lifted functions take
    /// the environment as a hidden first argument.
    fn call_closure(&mut self, closure: CValue, param_tys: &[KilnType], ret: &KilnType, args: &[String]) -> CValue {
        let c = self.hoist(closure).code;
        let ret_c = if ret.is_void() { "void".to_string() } else { self.c_type(ret) };
        let plain: Vec<String> = param_tys.iter().map(|t| self.c_type(t)).collect();
        let env_params = std::iter::once("void*".to_string()).chain(plain.iter().cloned()).collect::<Vec<_>>().join(", ");
        let plain_params = if plain.is_empty() { "void".to_string() } else { plain.join(", ") };

        let env_args = std::iter::once(format!("{c}->env")).chain(args.iter().cloned()).collect::<Vec<_>>().join(", ");
        let with_env = format!("(({ret_c} (*)({env_params})){c}->fn)({env_args})");
        let without_env = format!("(({ret_c} (*)({plain_params})){c}->fn)({})", args.join(", "));

        if ret.is_void() {
            self.out.line(&format!("if ({c}->env) {with_env}; else {without_env};"));
            CValue::void()
        } else {
            self.temp(ret, &format!("{c}->env ? {with_env} : {without_env}"))
        }
    }

    fn lower_builtin_call(&mut self, name: &str, f: &'static RuntimeFn, args: &[TypedExpr], span: Span) -> Result<CValue, CompileError> {
        Self::check_arity(name, f.params.len(), args.len(), span)?;
        let values = self.lower_in_order(Vec::new(), args)?;
        let mut codes = Vec::with_capacity(values.len());
        for (val, abi) in values.into_iter().zip(f.params) {
            let val = if *abi == Abi::Float { self.coerce(val, &KilnType::Float) } else { val };
            codes.push(val.code);
        }
        let call = format!("{}({})", f.symbol, codes.join(", "));
        Ok(match f.ret {
            Abi::Void => {
                self.out.line(&format!("{call};"));
                CValue::void()
            }
            Abi::Bool => self.temp(&KilnType::Bool, &format!("{call} != 0")),
            other => self.temp(&other.semantic(), &call),
        })
    }

    fn lower_special(
        &mut self,
        special: Special,
        name: &str,
        args: &[TypedExpr],
        ty: &KilnType,
        span: Span,
    ) -> Result<CValue, CompileError> {
        match special {
            Special::Print | Special::Println => {
                if special == Special::Println && args.is_empty() {
                    self.out.line("__kiln_print_newline();");
                    return Ok(CValue::void());
                }
                Self::check_arity(name, 1, args.len(), span)?;
                let arg = &args[0];
                let val = self.lower_expr(arg)?;
                let helper = match &arg.ty {
                    KilnType::Int => "__kiln_print_int",
                    KilnType::Float => "__kiln_print_float",
                    KilnType::Bool => "__kiln_print_bool",
                    KilnType::String => "__kiln_print_str",
                    other => {
                        return Err(CompileError::type_mismatch(format!("cannot print a value of type {other}"), arg.span));
                    }
                };
                self.out.line(&format!("{helper}({});", val.code));
                if special == Special::Println {
                    self.out.line("__kiln_print_newline();");
                }
                Ok(CValue::void())
            }
            Special::Assert => {
                if args.is_empty() || args.len() > 2 {
                    return Err(CompileError::type_mismatch(
                        format!("'assert' expects 1 or 2 argument(s), got {}", args.len()),
                        span,
                    ));
                }
                let mut values = self.lower_in_order(Vec::new(), args)?.into_iter();
                let cond = values.next().map(|v| v.code).unwrap_or_default();
                let msg = values.next().map(|v| v.code).unwrap_or_else(|| c_string_literal("assertion failed"));
                self.out.line(&format!("__kiln_assert({cond}, {msg});"));
                Ok(CValue::void())
            }
            Special::Min | Special::Max => {
                Self::check_arity(name, 2, args.len(), span)?;
                let mut earlier = [self.lower_expr(&args[0])?];
                let b = self.lower_after(&mut earlier, &args[1])?;
                let [a] = earlier;
                let float = args.iter().any(|a| a.ty == KilnType::Float);
                let symbol = match (special == Special::Min, float) {
                    (true, false) => "__kiln_min_int",
                    (false, false) => "__kiln_max_int",
                    (true, true) => "__kiln_min_float",
                    (false, true) => "__kiln_max_float",
                };
                let result_ty = if float { KilnType::Float } else { KilnType::Int };
                let a = self.coerce(a, &result_ty);
                let b = self.coerce(b, &result_ty);
                Ok(self.temp(&result_ty, &format!("{symbol}({}, {})", a.code, b.code)))
            }
            Special::Abs => {
                Self::check_arity(name, 1, args.len(), span)?;
                let val = self.lower_expr(&args[0])?;
                let (symbol, result_ty) = if args[0].ty == KilnType::Float {
                    ("__kiln_abs_float", KilnType::Float)
                } else {
                    ("__kiln_abs_int", KilnType::Int)
                };
                Ok(self.temp(&result_ty, &format!("{symbol}({})", val.code)))
            }
            Special::Len => {
                Self::check_arity(name, 1, args.len(), span)?;
                let val = self.lower_expr(&args[0])?;
                match &args[0].ty {
                    KilnType::Array(_) => {
                        let arr = self.hoist(val);
                        Ok(CValue::new(format!("{}[0].i", arr.code), KilnType::Int))
                    }
                    KilnType::String => Ok(self.temp(&KilnType::Int, &format!("__kiln_string_len({})", val.code))),
                    other => Err(CompileError::type_mismatch(format!("len() of non-array type {other}"), span)),
                }
            }
            Special::TypeOf => {
                Self::check_arity(name, 1, args.len(), span)?;
                Ok(CValue::new(c_string_literal(&args[0].ty.to_string()), KilnType::String))
            }
            Special::Some | Special::Ok | Special::Err => {
                Self::check_arity(name, 1, args.len(), span)?;
                let val = self.lower_expr(&args[0])?;
                let symbol = match special {
                    Special::Some => "__kiln_some",
                    Special::Ok => "__kiln_ok",
                    _ => "__kiln_err",
                };
                let code = format!("(KilnBox*){symbol}({})", slot_bits(&val.code, &args[0].ty));
                Ok(self.temp(ty, &code))
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
    ) -> Result<CValue, CompileError> {
        match (method, &object.ty) {
            ("await", KilnType::Future(inner)) if args.is_empty() => {
                let future = self.lower_expr(object)?;
                let boxed = self.fresh_temp();
                self.out.line(&format!("void* {boxed} = __kiln_await({});", future.code));
                if inner.is_void() {
                    self.out.line(&format!("__kiln_free({boxed});"));
                    return Ok(CValue::void());
                }
                let val = self.temp(inner, &from_slot(&format!("((KilnSlot*){boxed})[0]"), inner));
                self.out.line(&format!("__kiln_free({boxed});"));
                Ok(val)
            }
            ("len", _) if args.is_empty() => {
                self.lower_special(Special::Len, "len", std::slice::from_ref(object), ty, span)
            }
            (_, KilnType::Struct(struct_name)) => {
                let mangled = format!("{struct_name}_{method}");
                let globals = self.env.globals;
                let Some(KilnType::Fn(param_tys, ret)) = globals.function(&mangled) else {
                    return Err(CompileError::undefined_function(format!("{struct_name}.{method}"), span));
                };
                Self::check_arity(&mangled, param_tys.len(), args.len() + 1, span)?;
                let receiver = self.lower_expr(object)?;
                let values = self.lower_args(vec![receiver], args, &param_tys[1..])?;
                let codes: Vec<String> = values.into_iter().map(|v| v.code).collect();
                Ok(self.call_named(&user_fn_name(&mangled), &codes, ret))
            }
            (_, other) => {
                tracing::debug!(method, %ty, "unresolved method");
                Err(CompileError::undefined_function(format!("{other}.{method}"), span))
            }
        }
    }

    // ── closures and tasks ─────────────────────────────────────────────

    fn lower_closure_create(&mut self, id: u32, span: Span) -> Result<CValue, CompileError> {
        let registry = self.env.registry;
        let info = registry
            .lambda(id)
            .ok_or_else(|| CompileError::unsupported(format!("closure references unknown lambda id {id}"), span))?;

        let env = if info.has_env() {
            let env_ty = env_type_name(&info.name);
            let env = self.fresh_temp();
            self.out.line(&format!("{env_ty}* {env} = ({env_ty}*)__kiln_alloc(sizeof({env_ty}));"));
            for cap in &info.captures {
                let val = self.load_local(&cap.name, span)?;
                self.out.line(&format!("{env}->{} = {};", c_ident(&cap.name), val.code));
            }
            env
        } else if info.captures.is_empty() {
            "NULL".to_string()
        } else {
            return Err(CompileError::unsupported(
                format!("lambda {} with captures used as a value without an environment", info.name),
                span,
            ));
        };
        let code = format!("(KilnClosure*)__kiln_closure_new((void*){}, {env})", info.name);
        Ok(self.temp(&info.fn_type(), &code))
    }

    /// `spawn f(args)`: box the arguments and hand the wrapper to the runtime.
    fn lower_spawn(&mut self, call: &TypedExpr, span: Span) -> Result<CValue, CompileError> {
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
            "NULL".to_string()
        } else {
            let boxed = self.fresh_temp();
            self.out.line(&format!(
                "KilnSlot* {boxed} = (KilnSlot*)__kiln_alloc(sizeof(KilnSlot) * {});",
                args.len()
            ));
            for (i, (arg, ty)) in args.iter().zip(&wrapper.param_types).enumerate() {
                let val = self.lower_expr(arg)?;
                let val = self.coerce(val, ty);
                self.out.line(&to_slot(&format!("{boxed}[{i}]"), &val.code, ty));
            }
            boxed
        };
        let code = format!("__kiln_spawn((void*){}, {args_box})", wrapper.name);
        Ok(self.temp(&KilnType::future(wrapper.return_type.clone()), &code))
    }
}

fn slot_at(arr: &str, idx: &str) -> String {
    format!("{arr}[{idx} + 1]")
}

fn lower_literal(lit: &Literal, span: Span) -> Result<CValue, CompileError> {
    Ok(match lit {
        Literal::Int(text) => CValue::new(int_code(parse_int(text, span)?), KilnType::Int),
        Literal::Float(text) => CValue::new(float_code(parse_float(text, span)?), KilnType::Float),
        Literal::Bool(b) => CValue::new(if *b { "true" } else { "false" }, KilnType::Bool),
        Literal::Str(s) => CValue::new(c_string_literal(s), KilnType::String),
    })
}
