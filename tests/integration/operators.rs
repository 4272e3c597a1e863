mod common;
use common::*;
use kiln::Backend;

fn int_var(name: &str) -> TypedExpr {
    ident(name, KilnType::Int)
}

#[test]
fn integer_arithmetic() {
    let Some(out) = stdout_of(&printing(vec![
        binary(BinOp::Add, int(40), int(2)),
        binary(BinOp::Sub, int(3), int(10)),
        binary(BinOp::Mul, int(6), int(7)),
        binary(BinOp::Div, int(17), int(5)),
        binary(BinOp::Mod, int(17), int(5)),
        binary(BinOp::Div, int(-17), int(5)),
        binary(BinOp::Mod, int(-17), int(5)),
    ])) else {
        return;
    };
    assert_eq!(out, "42\n-7\n42\n3\n2\n-3\n-2\n");
}

#[test]
fn precedence_comes_from_tree_shape() {
    // (2 + 3) * 4 and 2 + 3 * 4
    let Some(out) = stdout_of(&printing(vec![
        binary(BinOp::Mul, binary(BinOp::Add, int(2), int(3)), int(4)),
        binary(BinOp::Add, int(2), binary(BinOp::Mul, int(3), int(4))),
    ])) else {
        return;
    };
    assert_eq!(out, "20\n14\n");
}

#[test]
fn mixed_arithmetic_promotes_to_float() {
    let Some(out) = stdout_of(&printing(vec![
        binary(BinOp::Add, int(1), float("2.0")),
        binary(BinOp::Mul, float("1.5"), int(3)),
        binary(BinOp::Div, int(7), float("2.0")),
    ])) else {
        return;
    };
    assert_eq!(out, "3.0\n4.5\n3.5\n");
}

#[test]
fn comparisons() {
    let Some(out) = stdout_of(&printing(vec![
        binary(BinOp::Lt, int(1), int(2)),
        binary(BinOp::GtEq, int(1), int(2)),
        binary(BinOp::Eq, int(5), int(5)),
        binary(BinOp::Neq, int(5), int(5)),
        binary(BinOp::LtEq, float("2.5"), int(3)),
        binary(BinOp::Gt, int(-1), int(-2)),
    ])) else {
        return;
    };
    assert_eq!(out, "true\nfalse\ntrue\nfalse\ntrue\ntrue\n");
}

#[test]
fn string_equality() {
    let Some(out) = stdout_of(&printing(vec![
        binary(BinOp::Eq, string("abc"), string("abc")),
        binary(BinOp::Neq, string("abc"), string("abd")),
        binary(BinOp::Eq, string(""), string("x")),
    ])) else {
        return;
    };
    assert_eq!(out, "true\ntrue\nfalse\n");
}

#[test]
fn logical_operators_short_circuit() {
    // probe() prints and returns true; it must run only when needed.
    let probe = func(
        "probe",
        vec![],
        KilnType::Bool,
        vec![println(string("probe")), ret(boolean(true))],
    );
    let probe_call = || call("probe", vec![], KilnType::Bool);
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            println(binary(BinOp::And, boolean(false), probe_call())),
            println(binary(BinOp::Or, boolean(true), probe_call())),
            println(binary(BinOp::And, boolean(true), probe_call())),
            println(binary(BinOp::Or, boolean(false), probe_call())),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&program(vec![probe, main])) else { return };
    assert_eq!(out, "false\ntrue\nprobe\ntrue\nprobe\ntrue\n");
}

#[test]
fn unary_operators() {
    let prog = main_only(vec![
        let_("x", int(9)),
        let_("f", float("1.25")),
        println(unary(UnaryOp::Neg, int_var("x"))),
        println(unary(UnaryOp::Neg, ident("f", KilnType::Float))),
        println(unary(UnaryOp::Not, binary(BinOp::Lt, int_var("x"), int(3)))),
        ret(int(0)),
    ]);
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "-9\n-1.25\ntrue\n");
}

#[test]
fn integer_overflow_wraps() {
    let prog = main_only(vec![
        let_("x", int(i64::MAX)),
        println(binary(BinOp::Add, int_var("x"), int(1))),
        ret(int(0)),
    ]);
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "-9223372036854775808\n");
}

#[test]
fn division_by_zero_fails_at_run_time() {
    let prog = main_only(vec![
        let_("zero", int(0)),
        println(binary(BinOp::Div, int(1), int_var("zero"))),
        ret(int(0)),
    ]);
    for backend in [Backend::Ir, Backend::C] {
        let Some(out) = run_with(&prog, backend) else { return };
        assert_ne!(out.code, 0, "{backend:?} should fail");
        assert_eq!(out.stdout, "");
    }
    let Some(out) = run_with(&prog, Backend::C) else { return };
    assert!(out.stderr.contains("Division by zero"), "{}", out.stderr);
}

#[test]
fn operands_evaluate_left_to_right() {
    // set(xs) overwrites xs[0] and returns 0; the left operand was read first.
    let ints = KilnType::array(KilnType::Int);
    let set = func(
        "set",
        vec![("xs", ints.clone())],
        KilnType::Int,
        vec![expr(assign_index(ident("xs", ints.clone()), int(0), int(10))), ret(int(0))],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("xs", array(KilnType::Int, vec![int(1)])),
            println(binary(BinOp::Add, index(ident("xs", ints.clone()), int(0)), call("set", vec![ident("xs", ints.clone())], KilnType::Int))),
            println(index(ident("xs", ints), int(0))),
            let_("x", int(1)),
            println(binary(BinOp::Add, int_var("x"), assign("x", int(5)))),
            println(int_var("x")),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&program(vec![set, main])) else { return };
    assert_eq!(out, "1\n10\n6\n5\n");
}

#[test]
fn index_is_read_before_assignment_in_value() {
    let ints = KilnType::array(KilnType::Int);
    let prog = main_only(vec![
        let_("xs", array(KilnType::Int, vec![int(0), int(0), int(0)])),
        let_("i", int(0)),
        expr(assign_index(ident("xs", ints.clone()), int_var("i"), assign("i", int(2)))),
        println(index(ident("xs", ints.clone()), int(0))),
        println(index(ident("xs", ints), int(2))),
        ret(int(0)),
    ]);
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "2\n0\n");
}

#[test]
fn nan_is_unequal_to_nothing() {
    let prog = main_only(vec![
        let_("zero", float("0.0")),
        let_("nan", binary(BinOp::Div, ident("zero", KilnType::Float), ident("zero", KilnType::Float))),
        println(binary(BinOp::Neq, ident("nan", KilnType::Float), ident("nan", KilnType::Float))),
        println(binary(BinOp::Eq, ident("nan", KilnType::Float), ident("nan", KilnType::Float))),
        println(binary(BinOp::Neq, float("1.0"), float("2.0"))),
        println(binary(BinOp::Neq, float("1.5"), int(2))),
        println(binary(BinOp::Neq, float("1.5"), float("1.5"))),
        ret(int(0)),
    ]);
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "false\nfalse\ntrue\ntrue\nfalse\n");
}
