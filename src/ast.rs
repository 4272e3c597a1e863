use serde::{Deserialize, Serialize};

use crate::diagnostics::CompileError;
use crate::span::{Span, Spanned};
use crate::types::KilnType;

/// A fully type-checked program, the sole input of lowering.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<Function>,
    #[serde(default)]
    pub structs: Vec<StructDecl>,
    #[serde(default)]
    pub enums: Vec<EnumDecl>,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn struct_decl(&self, name: &str) -> Option<&StructDecl> {
        self.structs.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: KilnType,
    pub body: Block,
    #[serde(default)]
    pub span: Span,
}

impl Function {
    pub fn signature(&self) -> KilnType {
        KilnType::func(self.params.iter().map(|p| p.ty.clone()).collect(), self.return_type.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: KilnType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<Param>,
}

impl StructDecl {
    pub fn field_index(&self, field: &str) -> Option<(usize, &KilnType)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == field).map(|(i, f)| (i, &f.ty))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Spanned<Stmt>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stmt {
    Let {
        name: String,
        ty: KilnType,
        value: TypedExpr,
    },
    Expr(TypedExpr),
    Return(Option<TypedExpr>),
    If {
        condition: TypedExpr,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        condition: TypedExpr,
        body: Block,
    },
    For {
        var: String,
        iterable: TypedExpr,
        body: Block,
    },
    Break,
    Continue,
    Block(Block),
}

/// An expression together with the semantic type the checker assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedExpr {
    pub expr: Expr,
    pub ty: KilnType,
    #[serde(default)]
    pub span: Span,
}

impl TypedExpr {
    pub fn new(expr: Expr, ty: KilnType) -> Self {
        Self { expr, ty, span: Span::dummy() }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<TypedExpr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<TypedExpr>,
        rhs: Box<TypedExpr>,
    },
    Assign {
        target: AssignTarget,
        value: Box<TypedExpr>,
    },
    Call {
        callee: String,
        args: Vec<TypedExpr>,
    },
    MethodCall {
        object: Box<TypedExpr>,
        method: String,
        args: Vec<TypedExpr>,
    },
    Index {
        array: Box<TypedExpr>,
        index: Box<TypedExpr>,
    },
    ArrayLit(Vec<TypedExpr>),
    StructLit {
        name: String,
        fields: Vec<(String, TypedExpr)>,
    },
    FieldAccess {
        object: Box<TypedExpr>,
        field: String,
    },
    Match {
        scrutinee: Box<TypedExpr>,
        arms: Vec<MatchArm>,
    },
    /// `if c { a } else { b }` used as a value; both branches are
    /// expressions and exactly one of them is evaluated.
    If {
        condition: Box<TypedExpr>,
        then_branch: Box<TypedExpr>,
        else_branch: Box<TypedExpr>,
    },
    /// `operand?`: the ok payload of a result, or an early return of the
    /// error result from the enclosing function.
    Try {
        operand: Box<TypedExpr>,
    },
    /// Anonymous function; the node's type is `Fn(params, ret)`.
    Lambda {
        params: Vec<Param>,
        body: Block,
    },
    /// `spawn f(args)`; `call` is always an `Expr::Call`.
    Spawn {
        call: Box<TypedExpr>,
    },
    /// Reference to a lifted lambda. Only produced by `closures::lift_lambdas`.
    Closure {
        id: u32,
        captures: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignTarget {
    Var(String),
    Index {
        array: Box<TypedExpr>,
        index: Box<TypedExpr>,
    },
    Field {
        object: Box<TypedExpr>,
        field: String,
    },
}

/// Literal values keep their source text; lowering parses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Int(String),
    Float(String),
    Bool(bool),
    Str(String),
}

/// Value of an int literal's text; `_` separators are allowed.
pub fn parse_int(text: &str, span: Span) -> Result<i64, CompileError> {
    text.replace('_', "")
        .parse::<i64>()
        .map_err(|_| CompileError::type_mismatch(format!("invalid int literal '{text}'"), span))
}

pub fn parse_float(text: &str, span: Span) -> Result<f64, CompileError> {
    text.replace('_', "")
        .parse::<f64>()
        .map_err(|_| CompileError::type_mismatch(format!("invalid float literal '{text}'"), span))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Gt | BinOp::LtEq | BinOp::GtEq)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::LtEq => "<=",
            BinOp::GtEq => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub body: TypedExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    Wildcard,
    Literal(Literal),
    /// Binds the scrutinee, unless the name is an enum variant, which compares.
    Binding(String),
    Or(Vec<Pattern>),
    /// Half-open: `start <= x < end`.
    Range {
        start: Literal,
        end: Literal,
    },
    Struct {
        name: String,
        fields: Vec<(String, Pattern)>,
    },
    Guard {
        pattern: Box<Pattern>,
        condition: Box<TypedExpr>,
    },
}

impl Pattern {
    /// Names this pattern binds, in binding order.
    pub fn bindings(&self, is_enum_variant: &dyn Fn(&str) -> bool) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_bindings(is_enum_variant, &mut out);
        out
    }

    fn collect_bindings(&self, is_enum_variant: &dyn Fn(&str) -> bool, out: &mut Vec<String>) {
        match self {
            Pattern::Wildcard | Pattern::Literal(_) | Pattern::Range { .. } => {}
            Pattern::Binding(name) => {
                if !is_enum_variant(name) {
                    out.push(name.clone());
                }
            }
            Pattern::Or(alts) => {
                for alt in alts {
                    alt.collect_bindings(is_enum_variant, out);
                }
            }
            Pattern::Struct { fields, .. } => {
                for (_, sub) in fields {
                    sub.collect_bindings(is_enum_variant, out);
                }
            }
            Pattern::Guard { pattern, .. } => pattern.collect_bindings(is_enum_variant, out),
        }
    }
}

/// Terse constructors for hand-built ASTs.
pub mod build {
    use super::*;

    pub fn int(value: i64) -> TypedExpr {
        TypedExpr::new(Expr::Literal(Literal::Int(value.to_string())), KilnType::Int)
    }

    pub fn float(text: &str) -> TypedExpr {
        TypedExpr::new(Expr::Literal(Literal::Float(text.to_string())), KilnType::Float)
    }

    pub fn boolean(value: bool) -> TypedExpr {
        TypedExpr::new(Expr::Literal(Literal::Bool(value)), KilnType::Bool)
    }

    pub fn string(value: &str) -> TypedExpr {
        TypedExpr::new(Expr::Literal(Literal::Str(value.to_string())), KilnType::String)
    }

    pub fn ident(name: &str, ty: KilnType) -> TypedExpr {
        TypedExpr::new(Expr::Ident(name.to_string()), ty)
    }

    /// Result type follows the checker's rules: comparisons and logic give
    /// bool, arithmetic gives float when either side is float.
    pub fn binary(op: BinOp, lhs: TypedExpr, rhs: TypedExpr) -> TypedExpr {
        let ty = if op.is_comparison() || op.is_logical() {
            KilnType::Bool
        } else if lhs.ty == KilnType::Float || rhs.ty == KilnType::Float {
            KilnType::Float
        } else {
            lhs.ty.clone()
        };
        TypedExpr::new(Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, ty)
    }

    pub fn unary(op: UnaryOp, operand: TypedExpr) -> TypedExpr {
        let ty = operand.ty.clone();
        TypedExpr::new(Expr::Unary { op, operand: Box::new(operand) }, ty)
    }

    pub fn call(callee: &str, args: Vec<TypedExpr>, ty: KilnType) -> TypedExpr {
        TypedExpr::new(Expr::Call { callee: callee.to_string(), args }, ty)
    }

    pub fn method(object: TypedExpr, method: &str, args: Vec<TypedExpr>, ty: KilnType) -> TypedExpr {
        TypedExpr::new(
            Expr::MethodCall { object: Box::new(object), method: method.to_string(), args },
            ty,
        )
    }

    pub fn index(array: TypedExpr, index: TypedExpr) -> TypedExpr {
        let ty = array.ty.element().cloned().unwrap_or(KilnType::Int);
        TypedExpr::new(Expr::Index { array: Box::new(array), index: Box::new(index) }, ty)
    }

    pub fn array(elem: KilnType, elements: Vec<TypedExpr>) -> TypedExpr {
        TypedExpr::new(Expr::ArrayLit(elements), KilnType::array(elem))
    }

    pub fn struct_lit(name: &str, fields: Vec<(&str, TypedExpr)>) -> TypedExpr {
        TypedExpr::new(
            Expr::StructLit {
                name: name.to_string(),
                fields: fields.into_iter().map(|(f, e)| (f.to_string(), e)).collect(),
            },
            KilnType::Struct(name.to_string()),
        )
    }

    pub fn field(object: TypedExpr, field: &str, ty: KilnType) -> TypedExpr {
        TypedExpr::new(Expr::FieldAccess { object: Box::new(object), field: field.to_string() }, ty)
    }

    pub fn assign(name: &str, value: TypedExpr) -> TypedExpr {
        let ty = value.ty.clone();
        TypedExpr::new(
            Expr::Assign { target: AssignTarget::Var(name.to_string()), value: Box::new(value) },
            ty,
        )
    }

    pub fn assign_index(array: TypedExpr, index: TypedExpr, value: TypedExpr) -> TypedExpr {
        let ty = value.ty.clone();
        TypedExpr::new(
            Expr::Assign {
                target: AssignTarget::Index { array: Box::new(array), index: Box::new(index) },
                value: Box::new(value),
            },
            ty,
        )
    }

    pub fn assign_field(object: TypedExpr, field: &str, value: TypedExpr) -> TypedExpr {
        let ty = value.ty.clone();
        TypedExpr::new(
            Expr::Assign {
                target: AssignTarget::Field { object: Box::new(object), field: field.to_string() },
                value: Box::new(value),
            },
            ty,
        )
    }

    pub fn match_expr(scrutinee: TypedExpr, arms: Vec<MatchArm>, ty: KilnType) -> TypedExpr {
        TypedExpr::new(Expr::Match { scrutinee: Box::new(scrutinee), arms }, ty)
    }

    pub fn arm(pattern: Pattern, body: TypedExpr) -> MatchArm {
        MatchArm { pattern, body }
    }

    pub fn lit_int(value: i64) -> Pattern {
        Pattern::Literal(Literal::Int(value.to_string()))
    }

    pub fn range(start: i64, end: i64) -> Pattern {
        Pattern::Range { start: Literal::Int(start.to_string()), end: Literal::Int(end.to_string()) }
    }

    pub fn guard(pattern: Pattern, condition: TypedExpr) -> Pattern {
        Pattern::Guard { pattern: Box::new(pattern), condition: Box::new(condition) }
    }

    /// Expression-bodied lambda: the body is `return body;`.
    pub fn lambda(params: Vec<(&str, KilnType)>, body: TypedExpr) -> TypedExpr {
        let params: Vec<Param> = params.into_iter().map(|(n, t)| param(n, t)).collect();
        let ty = KilnType::func(params.iter().map(|p| p.ty.clone()).collect(), body.ty.clone());
        TypedExpr::new(Expr::Lambda { params, body: block(vec![ret(body)]) }, ty)
    }

    /// The branch types agree except for int/float, which gives float.
    pub fn if_expr(condition: TypedExpr, then_branch: TypedExpr, else_branch: TypedExpr) -> TypedExpr {
        let ty = if then_branch.ty == KilnType::Float || else_branch.ty == KilnType::Float {
            KilnType::Float
        } else {
            then_branch.ty.clone()
        };
        TypedExpr::new(
            Expr::If {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            ty,
        )
    }

    pub fn try_(operand: TypedExpr) -> TypedExpr {
        let ty = match &operand.ty {
            KilnType::Result(ok, _) => ok.as_ref().clone(),
            other => other.clone(),
        };
        TypedExpr::new(Expr::Try { operand: Box::new(operand) }, ty)
    }

    pub fn spawn(call: TypedExpr) -> TypedExpr {
        let ty = KilnType::future(call.ty.clone());
        TypedExpr::new(Expr::Spawn { call: Box::new(call) }, ty)
    }

    pub fn param(name: &str, ty: KilnType) -> Param {
        Param { name: name.to_string(), ty }
    }

    pub fn let_(name: &str, value: TypedExpr) -> Spanned<Stmt> {
        let ty = value.ty.clone();
        Spanned::dummy(Stmt::Let { name: name.to_string(), ty, value })
    }

    pub fn expr(value: TypedExpr) -> Spanned<Stmt> {
        Spanned::dummy(Stmt::Expr(value))
    }

    pub fn ret(value: TypedExpr) -> Spanned<Stmt> {
        Spanned::dummy(Stmt::Return(Some(value)))
    }

    pub fn ret_void() -> Spanned<Stmt> {
        Spanned::dummy(Stmt::Return(None))
    }

    pub fn if_(
        condition: TypedExpr,
        then_stmts: Vec<Spanned<Stmt>>,
        else_stmts: Option<Vec<Spanned<Stmt>>>,
    ) -> Spanned<Stmt> {
        Spanned::dummy(Stmt::If {
            condition,
            then_block: block(then_stmts),
            else_block: else_stmts.map(block),
        })
    }

    pub fn while_(condition: TypedExpr, body: Vec<Spanned<Stmt>>) -> Spanned<Stmt> {
        Spanned::dummy(Stmt::While { condition, body: block(body) })
    }

    pub fn block(stmts: Vec<Spanned<Stmt>>) -> Block {
        Block { stmts }
    }

    pub fn func(
        name: &str,
        params: Vec<(&str, KilnType)>,
        return_type: KilnType,
        stmts: Vec<Spanned<Stmt>>,
    ) -> Function {
        Function {
            name: name.to_string(),
            params: params.into_iter().map(|(n, t)| param(n, t)).collect(),
            return_type,
            body: block(stmts),
            span: Span::dummy(),
        }
    }

    pub fn program(functions: Vec<Function>) -> Program {
        Program { functions, structs: Vec::new(), enums: Vec::new() }
    }
}
