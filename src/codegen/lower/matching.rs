use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{types, Block as IrBlock, InstBuilder, Value};
use cranelift_frontend::Variable;

use crate::ast::{Literal, MatchArm, Pattern, TypedExpr};
use crate::diagnostics::CompileError;
use crate::span::Span;
use crate::types::KilnType;

use super::{parse_float, parse_int, LowerContext, POINTER_SIZE};

/// Blocks and slots shared by every arm of one match.
struct MatchFrame<'t> {
    scrutinee: Variable,
    scrutinee_ty: &'t KilnType,
    result: Option<Variable>,
    result_ty: &'t KilnType,
    merge: IrBlock,
}

impl LowerContext<'_> {
    /// One check block and one body block per arm, created up front in arm
    /// order, then a trap block and a merge block. Arm i's failed check
    /// falls through to arm i+1; the last arm's falls into the trap.
    pub(super) fn lower_match(
        &mut self,
        scrutinee: &TypedExpr,
        arms: &[MatchArm],
        result_ty: &KilnType,
        span: Span,
    ) -> Result<Value, CompileError> {
        if arms.is_empty() {
            return Err(CompileError::type_mismatch("match expression has no arms", span));
        }
        let scrut_val = self.lower_expr(scrutinee)?;
        let scrut_ir = self.ir_type(&scrutinee.ty);
        let scrut_var = self.new_var(scrut_ir);
        self.builder.def_var(scrut_var, scrut_val);

        let result = if result_ty.is_void() {
            None
        } else {
            let ir_ty = self.ir_type(result_ty);
            Some(self.new_var(ir_ty))
        };

        let checks: Vec<IrBlock> = arms.iter().map(|_| self.builder.create_block()).collect();
        let bodies: Vec<IrBlock> = arms.iter().map(|_| self.builder.create_block()).collect();
        let trap_bb = self.builder.create_block();
        let merge_bb = self.builder.create_block();

        let frame = MatchFrame {
            scrutinee: scrut_var,
            scrutinee_ty: &scrutinee.ty,
            result,
            result_ty,
            merge: merge_bb,
        };

        self.builder.ins().jump(checks[0], &[]);
        for (i, arm) in arms.iter().enumerate() {
            let next = checks.get(i + 1).copied().unwrap_or(trap_bb);
            self.builder.switch_to_block(checks[i]);
            self.builder.seal_block(checks[i]);
            self.symbols.push_scope();
            let lowered = self.lower_arm(&frame, arm, bodies[i], next, span);
            self.symbols.pop_scope();
            lowered?;
        }

        self.builder.switch_to_block(trap_bb);
        self.builder.seal_block(trap_bb);
        self.emit_runtime_panic("Runtime Error: no match arm matched")?;

        self.builder.switch_to_block(merge_bb);
        self.builder.seal_block(merge_bb);
        Ok(match frame.result {
            Some(var) => self.builder.use_var(var),
            None => self.builder.ins().iconst(types::I64, 0),
        })
    }

    fn lower_arm(
        &mut self,
        frame: &MatchFrame<'_>,
        arm: &MatchArm,
        body_bb: IrBlock,
        next_bb: IrBlock,
        span: Span,
    ) -> Result<(), CompileError> {
        let scrut = self.builder.use_var(frame.scrutinee);
        match &arm.pattern {
            Pattern::Guard { pattern, condition } => {
                if let Some(test) = self.pattern_test(pattern, scrut, frame.scrutinee_ty, span)? {
                    let guard_bb = self.builder.create_block();
                    self.builder.ins().brif(test, guard_bb, &[], next_bb, &[]);
                    self.builder.switch_to_block(guard_bb);
                    self.builder.seal_block(guard_bb);
                }
                // The guard sees the pattern's bindings.
                self.bind_pattern(pattern, scrut, frame.scrutinee_ty, span)?;
                let cond = self.lower_expr(condition)?;
                self.builder.ins().brif(cond, body_bb, &[], next_bb, &[]);
                self.builder.switch_to_block(body_bb);
                self.builder.seal_block(body_bb);
            }
            pattern => {
                match self.pattern_test(pattern, scrut, frame.scrutinee_ty, span)? {
                    Some(test) => {
                        self.builder.ins().brif(test, body_bb, &[], next_bb, &[]);
                    }
                    None => {
                        self.builder.ins().jump(body_bb, &[]);
                    }
                }
                self.builder.switch_to_block(body_bb);
                self.builder.seal_block(body_bb);
                self.bind_pattern(pattern, scrut, frame.scrutinee_ty, span)?;
            }
        }

        let val = self.lower_expr(&arm.body)?;
        if let Some(var) = frame.result {
            let val = self.coerce(val, &arm.body.ty, frame.result_ty);
            self.builder.def_var(var, val);
        }
        self.builder.ins().jump(frame.merge, &[]);
        Ok(())
    }

    /// Discriminant when `name` names a variant of the scrutinee's enum, or
    /// failing that a unique bare variant; otherwise `name` is a binding.
    fn variant_discriminant(&self, name: &str, ty: &KilnType) -> Option<i64> {
        if let KilnType::Enum(enum_name) = ty {
            if let Some(decl) = self.env.globals.enum_decl(enum_name) {
                if let Some(i) = decl.variants.iter().position(|v| v == name) {
                    return Some(i as i64);
                }
            }
        }
        self.env.globals.bare_variant(name).map(|(_, i)| i)
    }

    /// The I8 condition under which `pattern` matches, or `None` when it
    /// always matches.
    fn pattern_test(
        &mut self,
        pattern: &Pattern,
        scrut: Value,
        ty: &KilnType,
        span: Span,
    ) -> Result<Option<Value>, CompileError> {
        match pattern {
            Pattern::Wildcard => Ok(None),
            Pattern::Binding(name) => match self.variant_discriminant(name, ty) {
                Some(discriminant) => Ok(Some(self.builder.ins().icmp_imm(IntCC::Equal, scrut, discriminant))),
                None => Ok(None),
            },
            Pattern::Literal(lit) => self.literal_test(lit, scrut, span).map(Some),
            Pattern::Range { start, end } => {
                let scrut_is_float = self.builder.func.dfg.value_type(scrut).is_float();
                if scrut_is_float || matches!(start, Literal::Float(_)) || matches!(end, Literal::Float(_)) {
                    let lo = self.literal_as_float(start, span)?;
                    let hi = self.literal_as_float(end, span)?;
                    let x = self.promote_to_float(scrut);
                    let lo = self.builder.ins().f64const(lo);
                    let hi = self.builder.ins().f64const(hi);
                    let ge = self.builder.ins().fcmp(FloatCC::GreaterThanOrEqual, x, lo);
                    let lt = self.builder.ins().fcmp(FloatCC::LessThan, x, hi);
                    return Ok(Some(self.builder.ins().band(ge, lt)));
                }
                let lo = range_bound_int(start, span)?;
                let hi = range_bound_int(end, span)?;
                let ge = self.builder.ins().icmp_imm(IntCC::SignedGreaterThanOrEqual, scrut, lo);
                let lt = self.builder.ins().icmp_imm(IntCC::SignedLessThan, scrut, hi);
                Ok(Some(self.builder.ins().band(ge, lt)))
            }
            Pattern::Or(alternatives) => {
                let globals = self.env.globals;
                if alternatives.iter().any(|alt| !alt.bindings(&|n: &str| globals.is_variant_name(n)).is_empty()) {
                    return Err(CompileError::unsupported("bindings inside or-patterns", span));
                }
                let mut tests = Vec::with_capacity(alternatives.len());
                for alt in alternatives {
                    match self.pattern_test(alt, scrut, ty, span)? {
                        Some(test) => tests.push(test),
                        None => return Ok(None),
                    }
                }
                let mut iter = tests.into_iter();
                let Some(first) = iter.next() else {
                    return Err(CompileError::type_mismatch("empty or-pattern", span));
                };
                Ok(Some(iter.fold(first, |acc, t| self.builder.ins().bor(acc, t))))
            }
            Pattern::Struct { name, fields } => {
                let globals = self.env.globals;
                let decl = globals
                    .struct_decl(name)
                    .ok_or_else(|| CompileError::type_mismatch(format!("unknown struct '{name}' in pattern"), span))?;
                let mut combined: Option<Value> = None;
                for (field, sub) in fields {
                    let (index, field_ty) = decl.field_index(field).ok_or_else(|| {
                        CompileError::type_mismatch(format!("struct '{name}' has no field '{field}'"), span)
                    })?;
                    let field_val = self.load_slot(field_ty, scrut, index as i32 * POINTER_SIZE);
                    if let Some(test) = self.pattern_test(sub, field_val, field_ty, span)? {
                        combined = Some(match combined {
                            Some(acc) => self.builder.ins().band(acc, test),
                            None => test,
                        });
                    }
                }
                Ok(combined)
            }
            Pattern::Guard { .. } => Err(CompileError::unsupported("guard nested inside another pattern", span)),
        }
    }

    fn literal_test(&mut self, lit: &Literal, scrut: Value, span: Span) -> Result<Value, CompileError> {
        let scrut_is_float = self.builder.func.dfg.value_type(scrut).is_float();
        match lit {
            Literal::Int(text) if !scrut_is_float => {
                let n = parse_int(text, span)?;
                Ok(self.builder.ins().icmp_imm(IntCC::Equal, scrut, n))
            }
            Literal::Int(_) | Literal::Float(_) => {
                let f = self.literal_as_float(lit, span)?;
                let x = self.promote_to_float(scrut);
                let c = self.builder.ins().f64const(f);
                Ok(self.builder.ins().fcmp(FloatCC::Equal, x, c))
            }
            Literal::Bool(b) => Ok(self.builder.ins().icmp_imm(IntCC::Equal, scrut, i64::from(*b))),
            Literal::Str(s) => {
                let expected = self.create_data_str(s)?;
                let eq = self.call_runtime("__kiln_string_eq", &[scrut, expected])?;
                Ok(self.builder.ins().icmp_imm(IntCC::NotEqual, eq, 0))
            }
        }
    }

    fn literal_as_float(&self, lit: &Literal, span: Span) -> Result<f64, CompileError> {
        match lit {
            Literal::Int(text) => parse_int(text, span).map(|n| n as f64),
            Literal::Float(text) => parse_float(text, span),
            _ => Err(CompileError::type_mismatch("range bounds must be numeric", span)),
        }
    }

    /// Bind the names a (matched) pattern introduces.
    fn bind_pattern(&mut self, pattern: &Pattern, scrut: Value, ty: &KilnType, span: Span) -> Result<(), CompileError> {
        match pattern {
            Pattern::Binding(name) => {
                if self.variant_discriminant(name, ty).is_none() {
                    self.bind_value(name, scrut, ty)?;
                }
                Ok(())
            }
            Pattern::Struct { name, fields } => {
                let globals = self.env.globals;
                let Some(decl) = globals.struct_decl(name) else {
                    return Err(CompileError::type_mismatch(format!("unknown struct '{name}' in pattern"), span));
                };
                for (field, sub) in fields {
                    let Some((index, field_ty)) = decl.field_index(field) else { continue };
                    if sub.bindings(&|n: &str| globals.is_variant_name(n)).is_empty() {
                        continue;
                    }
                    let field_val = self.load_slot(field_ty, scrut, index as i32 * POINTER_SIZE);
                    self.bind_pattern(sub, field_val, field_ty, span)?;
                }
                Ok(())
            }
            Pattern::Guard { pattern, .. } => self.bind_pattern(pattern, scrut, ty, span),
            Pattern::Wildcard | Pattern::Literal(_) | Pattern::Range { .. } | Pattern::Or(_) => Ok(()),
        }
    }
}

fn range_bound_int(lit: &Literal, span: Span) -> Result<i64, CompileError> {
    match lit {
        Literal::Int(text) => parse_int(text, span),
        _ => Err(CompileError::type_mismatch("range bounds must be numeric", span)),
    }
}
