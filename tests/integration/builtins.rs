mod common;
use common::*;

fn s(value: &str) -> TypedExpr {
    string(value)
}

fn str_call(name: &str, args: Vec<TypedExpr>) -> TypedExpr {
    call(name, args, KilnType::String)
}

#[test]
fn string_helpers() {
    let Some(out) = stdout_of(&printing(vec![
        str_call("str_upper", vec![s("MixEd")]),
        str_call("str_lower", vec![s("MixEd")]),
        str_call("str_trim", vec![s("  padded \t")]),
        call("str_contains", vec![s("haystack"), s("st")], KilnType::Bool),
        call("str_contains", vec![s("haystack"), s("needle")], KilnType::Bool),
        str_call("substring", vec![s("kiln lowering"), int(5), int(8)]),
        call("len", vec![s("hello")], KilnType::Int),
    ])) else {
        return;
    };
    assert_eq!(out, "MIXED\nmixed\npadded\ntrue\nfalse\nlow\n5\n");
}

#[test]
fn substring_clamps_its_bounds() {
    let Some(out) = stdout_of(&printing(vec![
        str_call("substring", vec![s("abc"), int(-3), int(2)]),
        str_call("substring", vec![s("abc"), int(1), int(99)]),
        str_call("substring", vec![s("abc"), int(2), int(1)]),
        call("len", vec![str_call("substring", vec![s("abc"), int(3), int(3)])], KilnType::Int),
    ])) else {
        return;
    };
    assert_eq!(out, "ab\nbc\n\n0\n");
}

#[test]
fn module_aliases_resolve_to_the_same_builtins() {
    let Some(out) = stdout_of(&printing(vec![
        str_call("String::upper", vec![s("abc")]),
        str_call("String::substring", vec![s("abcdef"), int(1), int(3)]),
        call("Math::sqrt", vec![float("16.0")], KilnType::Float),
        call("Math::pow", vec![float("2.0"), float("10.0")], KilnType::Float),
    ])) else {
        return;
    };
    assert_eq!(out, "ABC\nbc\n4.0\n1024.0\n");
}

#[test]
fn conversions() {
    let Some(out) = stdout_of(&printing(vec![
        str_call("int_to_string", vec![int(-120)]),
        str_call("float_to_string", vec![float("2.5")]),
        str_call("float_to_string", vec![float("3.0")]),
        binary(BinOp::Add, call("string_to_int", vec![s("41")], KilnType::Int), int(1)),
    ])) else {
        return;
    };
    assert_eq!(out, "-120\n2.5\n3.0\n42\n");
}

#[test]
fn math_helpers() {
    let Some(out) = stdout_of(&printing(vec![
        call("sqrt", vec![float("2.25")], KilnType::Float),
        call("floor", vec![float("2.7")], KilnType::Float),
        call("ceil", vec![float("2.1")], KilnType::Float),
        call("floor", vec![float("-2.5")], KilnType::Float),
        call("pow", vec![float("3.0"), float("2.0")], KilnType::Float),
    ])) else {
        return;
    };
    assert_eq!(out, "1.5\n2.0\n3.0\n-3.0\n9.0\n");
}

#[test]
fn min_max_abs_follow_argument_types() {
    let Some(out) = stdout_of(&printing(vec![
        call("min", vec![int(3), int(-4)], KilnType::Int),
        call("max", vec![int(3), int(-4)], KilnType::Int),
        call("min", vec![float("1.5"), float("0.5")], KilnType::Float),
        call("max", vec![int(2), float("2.5")], KilnType::Float),
        call("abs", vec![int(-17)], KilnType::Int),
        call("abs", vec![float("-0.75")], KilnType::Float),
    ])) else {
        return;
    };
    assert_eq!(out, "-4\n3\n0.5\n2.5\n17\n0.75\n");
}

#[test]
fn typeof_reports_semantic_types() {
    let Some(out) = stdout_of(&printing(vec![
        call("typeof", vec![int(1)], KilnType::String),
        call("typeof", vec![float("1.0")], KilnType::String),
        call("typeof", vec![s("x")], KilnType::String),
        call("typeof", vec![array(KilnType::Bool, vec![boolean(true)])], KilnType::String),
    ])) else {
        return;
    };
    assert_eq!(out, "int\nfloat\nstring\n[bool]\n");
}

#[test]
fn file_round_trip() {
    let path = || s("kiln_builtin_test.txt");
    let prog = main_only(vec![
        println(call("file_exists", vec![path()], KilnType::Bool)),
        println(call("write_file", vec![path(), s("first")], KilnType::Bool)),
        println(call("append_file", vec![path(), s(" second")], KilnType::Bool)),
        println(call("File::read", vec![path()], KilnType::String)),
        println(call("File::exists", vec![path()], KilnType::Bool)),
        println(call("delete_file", vec![path()], KilnType::Bool)),
        println(call("file_exists", vec![path()], KilnType::Bool)),
        ret(int(0)),
    ]);
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "false\ntrue\ntrue\nfirst second\ntrue\ntrue\nfalse\n");
}

#[test]
fn time_and_rand_are_callable() {
    let prog = main_only(vec![
        let_("t", call("time_now", vec![], KilnType::Int)),
        let_("r", call("rand", vec![], KilnType::Int)),
        expr(call("sleep", vec![int(1)], KilnType::Void)),
        println(binary(BinOp::Gt, ident("t", KilnType::Int), int(0))),
        println(binary(BinOp::GtEq, ident("r", KilnType::Int), int(0))),
        println(binary(BinOp::GtEq, call("Time::now", vec![], KilnType::Int), ident("t", KilnType::Int))),
        ret(int(0)),
    ]);
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "true\ntrue\ntrue\n");
}

#[test]
fn exit_sets_status() {
    let prog = main_only(vec![
        println(s("before")),
        expr(call("exit", vec![int(7)], KilnType::Void)),
        println(s("after")),
        ret(int(0)),
    ]);
    let Some(out) = run_both(&prog) else { return };
    assert_eq!(out.code, 7);
    assert_eq!(out.stdout, "before\n");
}

#[test]
fn failed_assert_reports_message() {
    let prog = main_only(vec![
        expr(call("assert", vec![boolean(true)], KilnType::Void)),
        expr(call("assert", vec![binary(BinOp::Eq, int(1), int(2)), s("one is not two")], KilnType::Void)),
        ret(int(0)),
    ]);
    let Some(out) = run_both(&prog) else { return };
    assert_eq!(out.code, 1);
    assert!(out.stderr.contains("Assertion failed: one is not two"), "{}", out.stderr);
}

#[test]
fn panic_builtin_exits_nonzero() {
    let prog = main_only(vec![expr(call("panic", vec![s("boom")], KilnType::Void)), ret(int(0))]);
    let Some(out) = run_both(&prog) else { return };
    assert_eq!(out.code, 1);
    assert!(out.stderr.contains("boom"), "{}", out.stderr);
}

#[test]
fn system_returns_command_status() {
    let prog = main_only(vec![ret(call("System::exec", vec![s("exit 0")], KilnType::Int))]);
    let Some(code) = exit_code_of(&prog) else { return };
    assert_eq!(code, 0);
}
