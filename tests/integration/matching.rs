mod common;
use common::*;
use kiln::ast::{EnumDecl, Function, Literal, MatchArm, Program, StructDecl};

fn i(name: &str) -> TypedExpr {
    ident(name, KilnType::Int)
}

/// `fn classify(x: <ty>) -> string { return match x { arms } }` plus a main
/// printing `classify(v)` for every input.
fn classify_program(ty: KilnType, arms: Vec<MatchArm>, inputs: Vec<TypedExpr>) -> Program {
    let classify = func(
        "classify",
        vec![("x", ty.clone())],
        KilnType::String,
        vec![ret(match_expr(ident("x", ty), arms, KilnType::String))],
    );
    let mut stmts: Vec<_> = inputs
        .into_iter()
        .map(|v| println(call("classify", vec![v], KilnType::String)))
        .collect();
    stmts.push(ret(int(0)));
    program(vec![classify, func("main", vec![], KilnType::Int, stmts)])
}

#[test]
fn literal_arm_then_wildcard() {
    let prog = classify_program(
        KilnType::Int,
        vec![arm(lit_int(1), string("a")), arm(Pattern::Wildcard, string("b"))],
        vec![int(1), int(2)],
    );
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "a\nb\n");
}

#[test]
fn first_matching_arm_wins() {
    let prog = classify_program(
        KilnType::Int,
        vec![
            arm(range(0, 10), string("digit")),
            arm(lit_int(5), string("five")),
            arm(Pattern::Wildcard, string("other")),
        ],
        vec![int(5), int(10), int(-1)],
    );
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "digit\nother\nother\n");
}

#[test]
fn range_is_half_open() {
    let prog = classify_program(
        KilnType::Int,
        vec![arm(range(1, 3), string("in")), arm(Pattern::Wildcard, string("out"))],
        vec![int(0), int(1), int(2), int(3)],
    );
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "out\nin\nin\nout\n");
}

#[test]
fn or_pattern() {
    let prog = classify_program(
        KilnType::Int,
        vec![
            arm(Pattern::Or(vec![lit_int(2), lit_int(3), lit_int(5), lit_int(7)]), string("prime")),
            arm(Pattern::Wildcard, string("composite")),
        ],
        vec![int(3), int(4), int(7)],
    );
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "prime\ncomposite\nprime\n");
}

#[test]
fn binding_with_guard() {
    let prog = classify_program(
        KilnType::Int,
        vec![
            arm(guard(Pattern::Binding("n".into()), binary(BinOp::Lt, i("n"), int(0))), string("negative")),
            arm(Pattern::Binding("n".into()), string("non-negative")),
        ],
        vec![int(-4), int(0), int(9)],
    );
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "negative\nnon-negative\nnon-negative\n");
}

#[test]
fn bound_value_is_usable_in_arm_body() {
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("v", int(20)),
            ret(match_expr(
                i("v"),
                vec![
                    arm(lit_int(0), int(100)),
                    arm(Pattern::Binding("n".into()), binary(BinOp::Add, i("n"), int(1))),
                ],
                KilnType::Int,
            )),
        ],
    );
    let Some(code) = exit_code_of(&program(vec![main])) else { return };
    assert_eq!(code, 21);
}

#[test]
fn string_literal_patterns() {
    let prog = classify_program(
        KilnType::String,
        vec![
            arm(Pattern::Literal(Literal::Str("hi".into())), string("greeting")),
            arm(Pattern::Literal(Literal::Str("bye".into())), string("farewell")),
            arm(Pattern::Wildcard, string("unknown")),
        ],
        vec![string("bye"), string("hi"), string("yo")],
    );
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "farewell\ngreeting\nunknown\n");
}

#[test]
fn float_range_pattern() {
    let prog = classify_program(
        KilnType::Float,
        vec![
            arm(
                Pattern::Range { start: Literal::Float("0.0".into()), end: Literal::Float("0.5".into()) },
                string("low"),
            ),
            arm(Pattern::Wildcard, string("high")),
        ],
        vec![float("0.25"), float("0.5")],
    );
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "low\nhigh\n");
}

#[test]
fn enum_variants_compare_by_discriminant() {
    let color = KilnType::Enum("Color".into());
    let name = func(
        "name",
        vec![("c", color.clone())],
        KilnType::String,
        vec![ret(match_expr(
            ident("c", color.clone()),
            vec![
                arm(Pattern::Binding("Red".into()), string("red")),
                arm(Pattern::Binding("Green".into()), string("green")),
                arm(Pattern::Binding("other".into()), string("something else")),
            ],
            KilnType::String,
        ))],
    );
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            println(call("name", vec![ident("Green", color.clone())], KilnType::String)),
            println(call("name", vec![ident("Blue", color.clone())], KilnType::String)),
            println(call("name", vec![ident("Red", color)], KilnType::String)),
            ret(int(0)),
        ],
    );
    let prog = Program {
        functions: vec![name, main],
        structs: Vec::new(),
        enums: vec![EnumDecl { name: "Color".into(), variants: vec!["Red".into(), "Green".into(), "Blue".into()] }],
    };
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "green\nsomething else\nred\n");
}

#[test]
fn struct_pattern_tests_and_binds_fields() {
    let pair = KilnType::Struct("Pair".into());
    let describe: Function = func(
        "describe",
        vec![("p", pair.clone())],
        KilnType::Int,
        vec![ret(match_expr(
            ident("p", pair.clone()),
            vec![
                arm(
                    Pattern::Struct { name: "Pair".into(), fields: vec![("a".into(), lit_int(0)), ("b".into(), Pattern::Binding("b".into()))] },
                    i("b"),
                ),
                arm(
                    Pattern::Struct { name: "Pair".into(), fields: vec![("a".into(), Pattern::Binding("a".into()))] },
                    binary(BinOp::Mul, i("a"), int(10)),
                ),
            ],
            KilnType::Int,
        ))],
    );
    let make = |a, b| struct_lit("Pair", vec![("a", int(a)), ("b", int(b))]);
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            println(call("describe", vec![make(0, 7)], KilnType::Int)),
            println(call("describe", vec![make(4, 7)], KilnType::Int)),
            ret(int(0)),
        ],
    );
    let prog = Program {
        functions: vec![describe, main],
        structs: vec![StructDecl { name: "Pair".into(), fields: vec![param("a", KilnType::Int), param("b", KilnType::Int)] }],
        enums: Vec::new(),
    };
    let Some(out) = stdout_of(&prog) else { return };
    assert_eq!(out, "7\n40\n");
}

#[test]
fn no_matching_arm_panics() {
    let prog = classify_program(
        KilnType::Int,
        vec![arm(lit_int(1), string("one")), arm(lit_int(2), string("two"))],
        vec![int(1), int(3)],
    );
    let Some(out) = run_both(&prog) else { return };
    assert_ne!(out.code, 0);
    assert_eq!(out.stdout, "one\n");
    assert!(out.stderr.contains("no match arm matched"), "{}", out.stderr);
}

#[test]
fn match_as_statement_with_void_arms() {
    let main = func(
        "main",
        vec![],
        KilnType::Int,
        vec![
            let_("v", int(2)),
            expr(match_expr(
                i("v"),
                vec![
                    arm(lit_int(1), call("println", vec![string("one")], KilnType::Void)),
                    arm(Pattern::Wildcard, call("println", vec![string("many")], KilnType::Void)),
                ],
                KilnType::Void,
            )),
            ret(int(0)),
        ],
    );
    let Some(out) = stdout_of(&program(vec![main])) else { return };
    assert_eq!(out, "many\n");
}
