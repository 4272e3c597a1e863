mod common;
use common::*;

fn i(name: &str) -> TypedExpr {
    ident(name, KilnType::Int)
}

fn int_to_int() -> KilnType {
    KilnType::func(vec![KilnType::Int], KilnType::Int)
}

#[test]
fn lambda_without_captures() {
    let prog = main_only(vec![
        let_("inc", lambda(vec![("n", KilnType::Int)], binary(BinOp::Add, i("n"), int(1)))),
        ret(call("inc", vec![int(41)], KilnType::Int)),
    ]);
    let Some(code) = exit_code_of(&prog) else { return };
    assert_eq!(code, 42);
}

#[test]
fn lambda_captures_local_by_value() {
    let prog = main_only(vec![
        let_("x", int(10)),
        let_("add_x", lambda(vec![("n", KilnType::Int)], binary(BinOp::Add, i("n"), i("x")))),
        println(call("add_x", vec![int(5)], KilnType::Int)),
        expr(assign("x", int(100))),
        println(call("add_x", vec![int(5)], KilnType::Int)),
        ret(int(0)),
    ]);
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "15\n15\n");
}

#[test]
fn closure_escapes_its_defining_function() {
    let make_adder = func(
        "make_adder",
        vec![("k", KilnType::Int)],
        int_to_int(),
        vec![ret(lambda(vec![("n", KilnType::Int)], binary(BinOp::Add, i("n"), i("k"))))],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("add3", call("make_adder", vec![int(3)], int_to_int())),
            let_("add7", call("make_adder", vec![int(7)], int_to_int())),
            println(call("add3", vec![int(1)], KilnType::Int)),
            println(call("add7", vec![int(1)], KilnType::Int)),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&program(vec![make_adder, main])) else { return };
    assert_eq!(out, "4\n8\n");
}

#[test]
fn closure_passed_as_argument() {
    let apply_twice = func(
        "apply_twice",
        vec![("f", int_to_int()), ("v", KilnType::Int)],
        KilnType::Int,
        vec![ret(call("f", vec![call("f", vec![i("v")], KilnType::Int)], KilnType::Int))],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("m", int(3)),
            let_("triple", lambda(vec![("n", KilnType::Int)], binary(BinOp::Mul, i("n"), i("m")))),
            ret(call("apply_twice", vec![ident("triple", int_to_int()), int(2)], KilnType::Int)),
        ],
    );
    let Some(code) = exit_code_of(&program(vec![apply_twice, main])) else { return };
    assert_eq!(code, 18);
}

#[test]
fn named_function_used_as_value() {
    let square = func(
        "square",
        vec![("n", KilnType::Int)],
        KilnType::Int,
        vec![ret(binary(BinOp::Mul, i("n"), i("n")))],
    );
    let apply = func(
        "apply",
        vec![("f", int_to_int()), ("v", KilnType::Int)],
        KilnType::Int,
        vec![ret(call("f", vec![i("v")], KilnType::Int))],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![ret(call("apply", vec![ident("square", int_to_int()), int(6)], KilnType::Int))],
    );
    let Some(code) = exit_code_of(&program(vec![square, apply, main])) else { return };
    assert_eq!(code, 36);
}

#[test]
fn lambda_capturing_several_types() {
    let prog = main_only(vec![
        let_("label", string("total")),
        let_("scale", float("0.5")),
        let_("base", int(4)),
        let_(
            "report",
            TypedExpr::new(
                Expr::Lambda {
                    params: vec![param("n", KilnType::Int)],
                    body: block(vec![
                        println(ident("label", KilnType::String)),
                        ret(binary(
                            BinOp::Mul,
                            binary(BinOp::Add, i("n"), i("base")),
                            ident("scale", KilnType::Float),
                        )),
                    ]),
                },
                KilnType::func(vec![KilnType::Int], KilnType::Float),
            ),
        ),
        println(call("report", vec![int(6)], KilnType::Float)),
        ret(int(0)),
    ]);
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "total\n5.0\n");
}

#[test]
fn nested_lambda_captures_through_outer() {
    // let outer = |a| { let inner = |b| a + b + c; return inner(1) }
    let inner = lambda(
        vec![("b", KilnType::Int)],
        binary(BinOp::Add, binary(BinOp::Add, i("a"), i("b")), i("c")),
    );
    let outer = TypedExpr::new(
        Expr::Lambda {
            params: vec![param("a", KilnType::Int)],
            body: block(vec![let_("inner", inner), ret(call("inner", vec![int(1)], KilnType::Int))]),
        },
        int_to_int(),
    );
    let prog = main_only(vec![
        let_("c", int(100)),
        let_("outer", outer),
        ret(call("outer", vec![int(20)], KilnType::Int)),
    ]);
    let Some(code) = exit_code_of(&prog) else { return };
    assert_eq!(code, 121);
}
