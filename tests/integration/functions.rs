mod common;
use common::*;

fn i(name: &str) -> TypedExpr {
    ident(name, KilnType::Int)
}

#[test]
fn add_returns_sum_through_both_backends() {
    let add = func(
        "add",
        vec![("a", KilnType::Int), ("b", KilnType::Int)],
        KilnType::Int,
        vec![ret(binary(BinOp::Add, i("a"), i("b")))],
    );
    let main = func("main", vec![], KilnType::Int, vec![ret(call("add", vec![int(2), int(3)], KilnType::Int))]);
    let Some(code) = exit_code_of(&program(vec![add, main])) else { return };
    assert_eq!(code, 5);
}

#[test]
fn recursive_factorial() {
    let factorial = func(
        "factorial",
        vec![("n", KilnType::Int)],
        KilnType::Int,
        vec![
            if_(binary(BinOp::LtEq, i("n"), int(1)), vec![ret(int(1))], None),
            ret(binary(
                BinOp::Mul,
                i("n"),
                call("factorial", vec![binary(BinOp::Sub, i("n"), int(1))], KilnType::Int),
            )),
        ],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![println(call("factorial", vec![int(20)], KilnType::Int)), ret(int(0))],
    );
    let Some(out) = stdout_of(&program(vec![factorial, main])) else { return };
    assert_eq!(out, "2432902008176640000\n");
}

#[test]
fn mutual_recursion_defined_after_use() {
    let is_even = func(
        "is_even",
        vec![("n", KilnType::Int)],
        KilnType::Bool,
        vec![
            if_(binary(BinOp::Eq, i("n"), int(0)), vec![ret(boolean(true))], None),
            ret(call("is_odd", vec![binary(BinOp::Sub, i("n"), int(1))], KilnType::Bool)),
        ],
    );
    let is_odd = func(
        "is_odd",
        vec![("n", KilnType::Int)],
        KilnType::Bool,
        vec![
            if_(binary(BinOp::Eq, i("n"), int(0)), vec![ret(boolean(false))], None),
            ret(call("is_even", vec![binary(BinOp::Sub, i("n"), int(1))], KilnType::Bool)),
        ],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            println(call("is_even", vec![int(10)], KilnType::Bool)),
            println(call("is_odd", vec![int(7)], KilnType::Bool)),
            println(call("is_even", vec![int(3)], KilnType::Bool)),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&program(vec![main, is_even, is_odd])) else { return };
    assert_eq!(out, "true\ntrue\nfalse\n");
}

#[test]
fn mixed_parameter_types() {
    let describe = func(
        "describe",
        vec![("label", KilnType::String), ("scale", KilnType::Float), ("loud", KilnType::Bool)],
        KilnType::Float,
        vec![
            if_(ident("loud", KilnType::Bool), vec![println(ident("label", KilnType::String))], None),
            ret(binary(BinOp::Mul, ident("scale", KilnType::Float), float("2.0"))),
        ],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            println(call("describe", vec![string("big"), float("1.5"), boolean(true)], KilnType::Float)),
            println(call("describe", vec![string("quiet"), float("0.5"), boolean(false)], KilnType::Float)),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&program(vec![describe, main])) else { return };
    assert_eq!(out, "big\n3.0\n1.0\n");
}

#[test]
fn parameters_are_mutable_locals() {
    let countdown = func(
        "countdown",
        vec![("n", KilnType::Int)],
        KilnType::Int,
        vec![
            let_("steps", int(0)),
            while_(
                binary(BinOp::Gt, i("n"), int(0)),
                vec![
                    expr(assign("n", binary(BinOp::Sub, i("n"), int(2)))),
                    expr(assign("steps", binary(BinOp::Add, i("steps"), int(1)))),
                ],
            ),
            ret(i("steps")),
        ],
    );
    let main = func("main", vec![], KilnType::Int, vec![ret(call("countdown", vec![int(9)], KilnType::Int))]);
    let Some(code) = exit_code_of(&program(vec![countdown, main])) else { return };
    assert_eq!(code, 5);
}

#[test]
fn function_names_that_collide_with_c_keywords() {
    let double = func(
        "double",
        vec![("int", KilnType::Int)],
        KilnType::Int,
        vec![ret(binary(BinOp::Mul, i("int"), int(2)))],
    );
    let main = func("main", vec![], KilnType::Int, vec![ret(call("double", vec![int(21)], KilnType::Int))]);
    let Some(code) = exit_code_of(&program(vec![double, main])) else { return };
    assert_eq!(code, 42);
}

#[test]
fn void_call_result_is_discarded() {
    let shout = func("shout", vec![], KilnType::Void, vec![println(string("hey"))]);
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![expr(call("shout", vec![], KilnType::Void)), expr(call("shout", vec![], KilnType::Void)), ret(int(0))],
    );
    let Some(out) = stdout_of(&program(vec![shout, main])) else { return };
    assert_eq!(out, "hey\nhey\n");
}

fn sub() -> kiln::ast::Function {
    func(
        "sub",
        vec![("a", KilnType::Int), ("b", KilnType::Int)],
        KilnType::Int,
        vec![ret(binary(BinOp::Sub, i("a"), i("b")))],
    )
}

#[test]
fn arguments_evaluate_left_to_right() {
    let ints = KilnType::array(KilnType::Int);
    let reset = func(
        "reset",
        vec![("xs", ints.clone())],
        KilnType::Int,
        vec![expr(assign_index(ident("xs", ints.clone()), int(0), int(0))), ret(int(0))],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("x", int(1)),
            println(call("sub", vec![i("x"), assign("x", int(10))], KilnType::Int)),
            let_("xs", array(KilnType::Int, vec![int(7)])),
            println(call(
                "sub",
                vec![index(ident("xs", ints.clone()), int(0)), call("reset", vec![ident("xs", ints)], KilnType::Int)],
                KilnType::Int,
            )),
            println(call("max", vec![i("x"), assign("x", int(3))], KilnType::Int)),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&program(vec![sub(), reset, main])) else { return };
    assert_eq!(out, "-9\n7\n10\n");
}

#[test]
fn closure_value_is_read_before_its_arguments() {
    let int_fn = KilnType::func(vec![KilnType::Int], KilnType::Int);
    let double = lambda(vec![("n", KilnType::Int)], binary(BinOp::Mul, i("n"), int(2)));
    let negate = lambda(vec![("n", KilnType::Int)], unary(UnaryOp::Neg, i("n")));
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("f", double),
            println(call("f", vec![call("apply", vec![assign("f", negate)], KilnType::Int)], KilnType::Int)),
            println(call("f", vec![int(4)], KilnType::Int)),
            ret(int(0)),
        ],
    );
    // apply(g) = g(5)
    let apply = func(
        "apply",
        vec![("g", int_fn)],
        KilnType::Int,
        vec![ret(call("g", vec![int(5)], KilnType::Int))],
    );
    let Some(out) = stdout_of(&program(vec![apply, main])) else { return };
    assert_eq!(out, "-10\n-4\n");
}

fn parse_result() -> KilnType {
    KilnType::Result(Box::new(KilnType::Int), Box::new(KilnType::String))
}

#[test]
fn try_propagates_the_first_error() {
    // parse(n) = err("negative") for n < 0, otherwise ok(n * 2)
    let parse = func(
        "parse",
        vec![("n", KilnType::Int)],
        parse_result(),
        vec![
            if_(
                binary(BinOp::Lt, i("n"), int(0)),
                vec![ret(call("err", vec![string("negative")], parse_result()))],
                None,
            ),
            ret(call("ok", vec![binary(BinOp::Mul, i("n"), int(2))], parse_result())),
        ],
    );
    let total = func(
        "total",
        vec![("a", KilnType::Int), ("b", KilnType::Int)],
        parse_result(),
        vec![
            let_("x", try_(call("parse", vec![i("a")], parse_result()))),
            println(i("x")),
            let_("y", try_(call("parse", vec![i("b")], parse_result()))),
            println(binary(BinOp::Add, i("x"), i("y"))),
            ret(call("ok", vec![binary(BinOp::Add, i("x"), i("y"))], parse_result())),
        ],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            expr(call("total", vec![int(1), int(2)], parse_result())),
            expr(call("total", vec![int(-1), int(5)], parse_result())),
            expr(call("total", vec![int(3), int(-4)], parse_result())),
            println(string("done")),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&program(vec![parse, total, main])) else { return };
    assert_eq!(out, "2\n6\n6\ndone\n");
}
