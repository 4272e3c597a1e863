mod common;
use common::*;
use kiln::Backend;

fn ints() -> KilnType {
    KilnType::array(KilnType::Int)
}

fn xs() -> TypedExpr {
    ident("xs", ints())
}

fn i(name: &str) -> TypedExpr {
    ident(name, KilnType::Int)
}

#[test]
fn literal_index_and_len() {
    let prog = main_only(vec![
        let_("xs", array(KilnType::Int, vec![int(10), int(20), int(30)])),
        println(index(xs(), int(0))),
        println(index(xs(), int(2))),
        println(call("len", vec![xs()], KilnType::Int)),
        println(method(xs(), "len", vec![], KilnType::Int)),
        ret(int(0)),
    ]);
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "10\n30\n3\n3\n");
}

#[test]
fn element_assignment_and_loop_sum() {
    let prog = main_only(vec![
        let_("xs", array(KilnType::Int, vec![int(0), int(0), int(0), int(0)])),
        let_("i", int(0)),
        while_(
            binary(BinOp::Lt, i("i"), call("len", vec![xs()], KilnType::Int)),
            vec![
                expr(assign_index(xs(), i("i"), binary(BinOp::Mul, i("i"), i("i")))),
                expr(assign("i", binary(BinOp::Add, i("i"), int(1)))),
            ],
        ),
        let_("sum", int(0)),
        expr(assign("i", int(0))),
        while_(
            binary(BinOp::Lt, i("i"), int(4)),
            vec![
                expr(assign("sum", binary(BinOp::Add, i("sum"), index(xs(), i("i"))))),
                expr(assign("i", binary(BinOp::Add, i("i"), int(1)))),
            ],
        ),
        ret(i("sum")),
    ]);
    let Some(code) = exit_code_of(&prog) else { return };
    assert_eq!(code, 0 + 1 + 4 + 9);
}

#[test]
fn float_and_string_elements() {
    let floats = KilnType::array(KilnType::Float);
    let strings = KilnType::array(KilnType::String);
    let prog = main_only(vec![
        let_("fs", array(KilnType::Float, vec![float("1.5"), float("2.25")])),
        let_("ss", array(KilnType::String, vec![string("a"), string("bc")])),
        println(binary(BinOp::Add, index(ident("fs", floats.clone()), int(0)), index(ident("fs", floats), int(1)))),
        println(index(ident("ss", strings), int(1))),
        ret(int(0)),
    ]);
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "3.75\nbc\n");
}

#[test]
fn arrays_are_shared_by_reference() {
    let fill = func(
        "fill",
        vec![("xs", ints()), ("v", KilnType::Int)],
        KilnType::Void,
        vec![expr(assign_index(xs(), int(1), i("v")))],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("xs", array(KilnType::Int, vec![int(1), int(2), int(3)])),
            expr(call("fill", vec![xs(), int(99)], KilnType::Void)),
            ret(index(xs(), int(1))),
        ],
    );
    let Some(code) = exit_code_of(&program(vec![fill, main])) else { return };
    assert_eq!(code, 99);
}

#[test]
fn empty_array_has_zero_len() {
    let prog = main_only(vec![
        let_("xs", array(KilnType::Int, vec![])),
        ret(call("len", vec![xs()], KilnType::Int)),
    ]);
    let Some(code) = exit_code_of(&prog) else { return };
    assert_eq!(code, 0);
}

#[test]
fn in_bounds_indices_do_not_trap() {
    let mut stmts = vec![let_("xs", array(KilnType::Int, vec![int(7), int(8), int(9)]))];
    for n in 0..=2 {
        stmts.push(println(index(xs(), int(n))));
    }
    stmts.push(ret(int(0)));
    let Some(out) = stdout_of(&main_only(stmts)) else { return };
    assert_eq!(out, "7\n8\n9\n");
}

fn out_of_bounds(idx: i64) -> kiln::ast::Program {
    main_only(vec![
        let_("xs", array(KilnType::Int, vec![int(7), int(8), int(9)])),
        let_("k", int(idx)),
        println(index(xs(), i("k"))),
        ret(int(0)),
    ])
}

#[test]
fn negative_index_traps() {
    let Some(out) = run_both(&out_of_bounds(-1)) else { return };
    assert_ne!(out.code, 0);
    assert_eq!(out.stdout, "");
}

#[test]
fn index_past_end_traps() {
    let Some(out) = run_both(&out_of_bounds(3)) else { return };
    assert_ne!(out.code, 0);
    assert!(out.stderr.contains("index out of bounds"), "{}", out.stderr);
}

#[test]
fn store_out_of_bounds_traps() {
    let prog = main_only(vec![
        let_("xs", array(KilnType::Int, vec![int(1)])),
        expr(assign_index(xs(), int(5), int(0))),
        ret(int(0)),
    ]);
    for backend in [Backend::Ir, Backend::C] {
        let Some(out) = run_with(&prog, backend) else { return };
        assert_ne!(out.code, 0, "{backend:?}");
    }
}
