mod common;
use common::*;
use kiln::ast::{Function, Program, StructDecl};

fn point_ty() -> KilnType {
    KilnType::Struct("Point".into())
}

fn p() -> TypedExpr {
    ident("p", point_ty())
}

fn with_point(functions: Vec<Function>) -> Program {
    Program {
        functions,
        structs: vec![StructDecl {
            name: "Point".into(),
            fields: vec![param("x", KilnType::Int), param("y", KilnType::Float)],
        }],
        enums: Vec::new(),
    }
}

fn point(x: i64, y: &str) -> TypedExpr {
    struct_lit("Point", vec![("x", int(x)), ("y", float(y))])
}

#[test]
fn construct_and_read_fields() {
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("p", point(3, "4.5")),
            println(field(p(), "x", KilnType::Int)),
            println(field(p(), "y", KilnType::Float)),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&with_point(vec![main])) else { return };
    assert_eq!(out, "3\n4.5\n");
}

#[test]
fn literal_field_order_does_not_matter() {
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("p", struct_lit("Point", vec![("y", float("1.0")), ("x", int(8))])),
            ret(field(p(), "x", KilnType::Int)),
        ],
    );
    let Some(code) = exit_code_of(&with_point(vec![main])) else { return };
    assert_eq!(code, 8);
}

#[test]
fn field_assignment_is_visible_through_aliases() {
    let shift = func(
        "shift",
        vec![("p", point_ty())],
        KilnType::Void,
        vec![expr(assign_field(p(), "x", binary(BinOp::Add, field(p(), "x", KilnType::Int), int(10))))],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("p", point(1, "0.0")),
            expr(call("shift", vec![p()], KilnType::Void)),
            expr(call("shift", vec![p()], KilnType::Void)),
            ret(field(p(), "x", KilnType::Int)),
        ],
    );
    let Some(code) = exit_code_of(&with_point(vec![shift, main])) else { return };
    assert_eq!(code, 21);
}

#[test]
fn struct_returned_from_function() {
    let make = func(
        "make",
        vec![("x", KilnType::Int)],
        KilnType::Struct("Point".into()),
        vec![ret(struct_lit("Point", vec![("x", ident("x", KilnType::Int)), ("y", float("0.5"))]))],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("p", call("make", vec![int(6)], point_ty())),
            println(binary(BinOp::Mul, field(p(), "y", KilnType::Float), field(p(), "x", KilnType::Int))),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&with_point(vec![make, main])) else { return };
    assert_eq!(out, "3.0\n");
}

#[test]
fn method_call_dispatches_to_mangled_function() {
    let norm1 = func(
        "Point_norm1",
        vec![("self", point_ty()), ("scale", KilnType::Int)],
        KilnType::Int,
        vec![ret(binary(
            BinOp::Mul,
            field(ident("self", point_ty()), "x", KilnType::Int),
            ident("scale", KilnType::Int),
        ))],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![let_("p", point(7, "0.0")), ret(method(p(), "norm1", vec![int(3)], KilnType::Int))],
    );
    let Some(code) = exit_code_of(&with_point(vec![norm1, main])) else { return };
    assert_eq!(code, 21);
}

#[test]
fn array_of_structs() {
    let points = KilnType::array(point_ty());
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("ps", array(point_ty(), vec![point(1, "0.0"), point(2, "0.0")])),
            let_("second", index(ident("ps", points), int(1))),
            ret(field(ident("second", point_ty()), "x", KilnType::Int)),
        ],
    );
    let Some(code) = exit_code_of(&with_point(vec![main])) else { return };
    assert_eq!(code, 2);
}

#[test]
fn missing_field_is_rejected() {
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![let_("p", struct_lit("Point", vec![("x", int(1))])), ret(int(0))],
    );
    let (ir, c) = lower_errors(&with_point(vec![main]));
    for errors in [ir, c] {
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), "type-mismatch");
        assert!(errors[0].to_string().contains("missing field 'y'"), "{}", errors[0]);
    }
}
