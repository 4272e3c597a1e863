use crate::ast::{parse_float, parse_int, Literal, MatchArm, Pattern, TypedExpr};
use crate::diagnostics::CompileError;
use crate::span::Span;
use crate::types::KilnType;

use super::expr::{float_code, int_code};
use super::stmt::condition;
use super::typemap::{c_ident, c_string_literal, zero_value};
use super::{CValue, FnContext};

const NO_ARM_MATCHED: &str = "Runtime Error: no match arm matched";

impl FnContext<'_> {
    /// A match is a `do { ... } while (0)` holding one `if` per arm in arm
    /// order; the arm that matches stores its value and breaks out. Falling
    /// off the last arm panics.
    pub(super) fn lower_match(
        &mut self,
        scrutinee: &TypedExpr,
        arms: &[MatchArm],
        result_ty: &KilnType,
        span: Span,
    ) -> Result<CValue, CompileError> {
        if arms.is_empty() {
            return Err(CompileError::type_mismatch("match expression has no arms", span));
        }
        let scrut = self.lower_expr(scrutinee)?;
        let scrut = self.temp(&scrutinee.ty, &scrut.code);

        let result = if result_ty.is_void() {
            None
        } else {
            Some(self.temp(result_ty, zero_value(result_ty)))
        };

        self.out.open("do");
        let mut irrefutable = false;
        for arm in arms {
            self.symbols.push_scope();
            let lowered = self.lower_arm(arm, &scrut, result.as_ref(), span);
            self.symbols.pop_scope();
            if lowered? {
                irrefutable = true;
                break;
            }
        }
        if !irrefutable {
            self.emit_runtime_panic(NO_ARM_MATCHED);
        }
        self.out.close(" while (0);");

        Ok(result.unwrap_or_else(CValue::void))
    }

    /// Returns whether the arm always matches, which makes later arms dead.
    fn lower_arm(
        &mut self,
        arm: &MatchArm,
        scrut: &CValue,
        result: Option<&CValue>,
        span: Span,
    ) -> Result<bool, CompileError> {
        let (pattern, guard) = match &arm.pattern {
            Pattern::Guard { pattern, condition } => (pattern.as_ref(), Some(condition.as_ref())),
            pattern => (pattern, None),
        };

        let test = self.pattern_test(pattern, &scrut.code, &scrut.ty, span)?;
        let always = test.is_none() && guard.is_none();
        match &test {
            Some(test) => self.out.open(&format!("if ({})", condition(test))),
            None => self.out.open(""),
        }
        // The guard sees the pattern's bindings.
        self.bind_pattern(pattern, &scrut.code, &scrut.ty, span)?;
        if let Some(cond) = guard {
            let cond = self.lower_expr(cond)?;
            self.out.open(&format!("if ({})", condition(&cond.code)));
        }

        let val = self.lower_expr(&arm.body)?;
        match result {
            Some(result) => {
                let val = self.coerce(val, &result.ty);
                self.out.line(&format!("{} = {};", result.code, val.code));
            }
            None if !val.ty.is_void() && !val.is_atom() => self.out.line(&format!("(void){};", val.code)),
            None => {}
        }
        self.out.line("break;");

        if guard.is_some() {
            self.out.close("");
        }
        self.out.close("");
        Ok(always)
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

    /// The C condition under which `pattern` matches `scrut`, or `None` when
    /// it always matches.
    fn pattern_test(
        &self,
        pattern: &Pattern,
        scrut: &str,
        ty: &KilnType,
        span: Span,
    ) -> Result<Option<String>, CompileError> {
        match pattern {
            Pattern::Wildcard => Ok(None),
            Pattern::Binding(name) => Ok(self
                .variant_discriminant(name, ty)
                .map(|d| format!("({scrut} == {})", int_code(d)))),
            Pattern::Literal(lit) => literal_test(lit, scrut, ty, span).map(Some),
            Pattern::Range { start, end } => {
                let float = *ty == KilnType::Float
                    || matches!(start, Literal::Float(_))
                    || matches!(end, Literal::Float(_));
                if float {
                    let lo = float_code(literal_as_float(start, span)?);
                    let hi = float_code(literal_as_float(end, span)?);
                    let x = as_double(scrut, ty);
                    return Ok(Some(format!("({x} >= {lo} && {x} < {hi})")));
                }
                let lo = int_code(range_bound_int(start, span)?);
                let hi = int_code(range_bound_int(end, span)?);
                Ok(Some(format!("({scrut} >= {lo} && {scrut} < {hi})")))
            }
            Pattern::Or(alternatives) => {
                let globals = self.env.globals;
                if alternatives.iter().any(|alt| !alt.bindings(&|n: &str| globals.is_variant_name(n)).is_empty()) {
                    return Err(CompileError::unsupported("bindings inside or-patterns", span));
                }
                if alternatives.is_empty() {
                    return Err(CompileError::type_mismatch("empty or-pattern", span));
                }
                let mut tests = Vec::with_capacity(alternatives.len());
                for alt in alternatives {
                    match self.pattern_test(alt, scrut, ty, span)? {
                        Some(test) => tests.push(test),
                        None => return Ok(None),
                    }
                }
                Ok(Some(join_tests(tests, " || ")))
            }
            Pattern::Struct { name, fields } => {
                let globals = self.env.globals;
                let decl = globals
                    .struct_decl(name)
                    .ok_or_else(|| CompileError::type_mismatch(format!("unknown struct '{name}' in pattern"), span))?;
                let mut tests = Vec::new();
                for (field, sub) in fields {
                    let (_, field_ty) = decl.field_index(field).ok_or_else(|| {
                        CompileError::type_mismatch(format!("struct '{name}' has no field '{field}'"), span)
                    })?;
                    let access = format!("{scrut}->{}", c_ident(field));
                    if let Some(test) = self.pattern_test(sub, &access, field_ty, span)? {
                        tests.push(test);
                    }
                }
                Ok((!tests.is_empty()).then(|| join_tests(tests, " && ")))
            }
            Pattern::Guard { .. } => Err(CompileError::unsupported("guard nested inside another pattern", span)),
        }
    }

    /// Bind the names a (matched) pattern introduces.
    fn bind_pattern(&mut self, pattern: &Pattern, scrut: &str, ty: &KilnType, span: Span) -> Result<(), CompileError> {
        match pattern {
            Pattern::Binding(name) => {
                if self.variant_discriminant(name, ty).is_none() {
                    self.bind_local(name, ty, scrut)?;
                }
                Ok(())
            }
            Pattern::Struct { name, fields } => {
                let globals = self.env.globals;
                let Some(decl) = globals.struct_decl(name) else {
                    return Err(CompileError::type_mismatch(format!("unknown struct '{name}' in pattern"), span));
                };
                for (field, sub) in fields {
                    let Some((_, field_ty)) = decl.field_index(field) else { continue };
                    if sub.bindings(&|n: &str| globals.is_variant_name(n)).is_empty() {
                        continue;
                    }
                    let access = format!("{scrut}->{}", c_ident(field));
                    self.bind_pattern(sub, &access, field_ty, span)?;
                }
                Ok(())
            }
            Pattern::Guard { pattern, .. } => self.bind_pattern(pattern, scrut, ty, span),
            Pattern::Wildcard | Pattern::Literal(_) | Pattern::Range { .. } | Pattern::Or(_) => Ok(()),
        }
    }
}

fn join_tests(tests: Vec<String>, op: &str) -> String {
    if tests.len() == 1 {
        tests.into_iter().collect()
    } else {
        format!("({})", tests.join(op))
    }
}

fn as_double(scrut: &str, ty: &KilnType) -> String {
    if *ty == KilnType::Float { scrut.to_string() } else { format!("(double){scrut}") }
}

fn literal_test(lit: &Literal, scrut: &str, ty: &KilnType, span: Span) -> Result<String, CompileError> {
    match lit {
        Literal::Int(text) if *ty != KilnType::Float => Ok(format!("({scrut} == {})", int_code(parse_int(text, span)?))),
        Literal::Int(_) | Literal::Float(_) => {
            let f = float_code(literal_as_float(lit, span)?);
            Ok(format!("({} == {f})", as_double(scrut, ty)))
        }
        Literal::Bool(true) => Ok(scrut.to_string()),
        Literal::Bool(false) => Ok(format!("(!{scrut})")),
        Literal::Str(s) => Ok(format!("(__kiln_string_eq({scrut}, {}) != 0)", c_string_literal(s))),
    }
}

fn literal_as_float(lit: &Literal, span: Span) -> Result<f64, CompileError> {
    match lit {
        Literal::Int(text) => parse_int(text, span).map(|n| n as f64),
        Literal::Float(text) => parse_float(text, span),
        _ => Err(CompileError::type_mismatch("range bounds must be numeric", span)),
    }
}

fn range_bound_int(lit: &Literal, span: Span) -> Result<i64, CompileError> {
    match lit {
        Literal::Int(text) => parse_int(text, span),
        _ => Err(CompileError::type_mismatch("range bounds must be numeric", span)),
    }
}
