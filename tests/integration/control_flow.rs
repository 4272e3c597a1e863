mod common;
use common::*;
use kiln::ast::Block;
use kiln::span::Spanned;

fn i(name: &str) -> TypedExpr {
    ident(name, KilnType::Int)
}

fn incr(name: &str, by: i64) -> Spanned<Stmt> {
    expr(assign(name, binary(BinOp::Add, i(name), int(by))))
}

#[test]
fn if_else_branches() {
    let classify = func(
        "classify",
        vec![("x", KilnType::Int)],
        KilnType::String,
        vec![
            if_(binary(BinOp::Gt, i("x"), int(0)), vec![ret(string("positive"))], None),
            if_(
                binary(BinOp::Lt, i("x"), int(0)),
                vec![ret(string("negative"))],
                Some(vec![ret(string("zero"))]),
            ),
        ],
    );
    let classify_of = |n| call("classify", vec![int(n)], KilnType::String);
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![println(classify_of(5)), println(classify_of(-3)), println(classify_of(0)), ret(int(0))],
    );
    let Some(out) = stdout_of(&program(vec![classify, main])) else { return };
    assert_eq!(out, "positive\nnegative\nzero\n");
}

#[test]
fn while_loop_accumulates() {
    let prog = main_only(vec![
        let_("i", int(0)),
        let_("sum", int(0)),
        while_(
            binary(BinOp::Lt, i("i"), int(10)),
            vec![expr(assign("sum", binary(BinOp::Add, i("sum"), i("i")))), incr("i", 1)],
        ),
        ret(i("sum")),
    ]);
    let Some(code) = exit_code_of(&prog) else { return };
    assert_eq!(code, 45);
}

#[test]
fn break_and_continue() {
    // Sum odd numbers below 20, stopping once i reaches 9.
    let prog = main_only(vec![
        let_("i", int(0)),
        let_("sum", int(0)),
        while_(
            boolean(true),
            vec![
                incr("i", 1),
                if_(binary(BinOp::GtEq, i("i"), int(9)), vec![Spanned::dummy(Stmt::Break)], None),
                if_(
                    binary(BinOp::Eq, binary(BinOp::Mod, i("i"), int(2)), int(0)),
                    vec![Spanned::dummy(Stmt::Continue)],
                    None,
                ),
                expr(assign("sum", binary(BinOp::Add, i("sum"), i("i")))),
            ],
        ),
        ret(i("sum")),
    ]);
    let Some(code) = exit_code_of(&prog) else { return };
    assert_eq!(code, 1 + 3 + 5 + 7);
}

#[test]
fn nested_loops_break_innermost_only() {
    let prog = main_only(vec![
        let_("outer", int(0)),
        let_("count", int(0)),
        while_(
            binary(BinOp::Lt, i("outer"), int(3)),
            vec![
                let_("inner", int(0)),
                while_(
                    boolean(true),
                    vec![
                        if_(binary(BinOp::Eq, i("inner"), int(2)), vec![Spanned::dummy(Stmt::Break)], None),
                        incr("inner", 1),
                        incr("count", 1),
                    ],
                ),
                incr("outer", 1),
            ],
        ),
        ret(i("count")),
    ]);
    let Some(code) = exit_code_of(&prog) else { return };
    assert_eq!(code, 6);
}

#[test]
fn block_scoping_shadows_and_restores() {
    let prog = main_only(vec![
        let_("x", int(1)),
        Spanned::dummy(Stmt::Block(Block {
            stmts: vec![let_("x", int(2)), println(i("x"))],
        })),
        println(i("x")),
        ret(int(0)),
    ]);
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "2\n1\n");
}

#[test]
fn assignment_in_branch_is_visible_after() {
    let prog = main_only(vec![
        let_("x", int(1)),
        if_(
            binary(BinOp::Gt, i("x"), int(0)),
            vec![expr(assign("x", int(10)))],
            Some(vec![expr(assign("x", int(20)))]),
        ),
        ret(i("x")),
    ]);
    let Some(code) = exit_code_of(&prog) else { return };
    assert_eq!(code, 10);
}

#[test]
fn early_return_from_void_function() {
    let early = func(
        "early",
        vec![("x", KilnType::Int)],
        KilnType::Void,
        vec![
            if_(binary(BinOp::Gt, i("x"), int(0)), vec![println(int(1)), ret_void()], None),
            println(int(2)),
        ],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            expr(call("early", vec![int(5)], KilnType::Void)),
            expr(call("early", vec![int(-1)], KilnType::Void)),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&program(vec![early, main])) else { return };
    assert_eq!(out, "1\n2\n");
}

#[test]
fn while_condition_with_call_is_reevaluated() {
    let below = func(
        "below",
        vec![("n", KilnType::Int)],
        KilnType::Bool,
        vec![ret(binary(BinOp::Lt, i("n"), int(4)))],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("n", int(0)),
            while_(call("below", vec![i("n")], KilnType::Bool), vec![println(i("n")), incr("n", 1)]),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&program(vec![below, main])) else { return };
    assert_eq!(out, "0\n1\n2\n3\n");
}

#[test]
fn if_expression_evaluates_one_branch() {
    let noisy = |name: &str, value: i64| {
        func(name, vec![], KilnType::Int, vec![println(string(name)), ret(int(value))])
    };
    let pick = func(
        "pick",
        vec![("x", KilnType::Int)],
        KilnType::Int,
        vec![ret(if_expr(
            binary(BinOp::Lt, i("x"), int(3)),
            call("left", vec![], KilnType::Int),
            call("right", vec![], KilnType::Int),
        ))],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            println(call("pick", vec![int(1)], KilnType::Int)),
            println(call("pick", vec![int(7)], KilnType::Int)),
            println(if_expr(boolean(true), int(1), float("2.5"))),
            println(binary(BinOp::Add, int(100), if_expr(boolean(false), int(1), int(2)))),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&program(vec![noisy("left", 10), noisy("right", 20), pick, main])) else { return };
    assert_eq!(out, "left\n10\nright\n20\n1.0\n102\n");
}
