mod common;

use common::*;
use ratc::ast::{AssignOp, BinaryOp, Item, Param, Procedure, Statement, VectorEntry, Vectors};

#[test]
fn if_equal() {
    let program = main(vec![if_at(
        2,
        bin(BinaryOp::Eq, id("r16"), num(5)),
        set(id("r17"), num(1)),
        None,
    )]);

    assert_eq!(
        listing(&program),
        vec![
            "main:",
            "cpi r16, 5",
            "brne main@if_end@2",
            "ldi r17, 1",
            "main@if_end@2:",
        ]
    );
}

#[test]
fn if_else() {
    let program = main(vec![if_at(
        4,
        bin(BinaryOp::Lt, id("r16"), num(10)),
        set(id("r17"), num(1)),
        Some(set(id("r17"), num(2))),
    )]);

    assert_eq!(
        listing(&program),
        vec![
            "main:",
            "cpi r16, 10",
            "brsh main@if_else@4",
            "ldi r17, 1",
            "rjmp main@if_end@4",
            "main@if_else@4:",
            "ldi r17, 2",
            "main@if_end@4:",
        ]
    );
}

#[test]
fn mirrored_comparisons_are_equivalent() {
    use BinaryOp::*;

    let compile = |condition| {
        let program = main(vec![if_at(1, condition, set(id("r18"), num(0)), None)]);
        instructions(&program)
    };

    assert_eq!(
        compile(bin(Gt, id("r16"), id("r17"))),
        compile(bin(Lt, id("r17"), id("r16")))
    );

    assert_eq!(
        compile(bin(Le, id("r16"), id("r17"))),
        compile(bin(Ge, id("r17"), id("r16")))
    );

    assert_eq!(
        compile(bin(Gt, id("r16"), id("r17")))[..2],
        ["cp r17, r16", "brsh main@if_end@1"]
    );
}

#[test]
fn conjunction_keeps_order() {
    use BinaryOp::*;

    let condition = bin(
        LogicalAnd,
        bin(Eq, id("r16"), num(1)),
        bin(Eq, id("r17"), num(2)),
    );

    let program = main(vec![if_at(1, condition, set(id("r18"), num(0)), None)]);
    assert_eq!(
        instructions(&program),
        vec![
            "cpi r16, 1",
            "brne main@if_end@1",
            "cpi r17, 2",
            "brne main@if_end@1",
            "clr r18",
        ]
    );
}

#[test]
fn bit_test_skips_one_instruction() {
    let program = main(vec![
        if_at(1, index(id("r16"), num(3)), set(id("r17"), num(1)), None),
        if_at(2, not(index(id("r16"), num(4))), instr("nop", vec![]), None),
    ]);

    assert_eq!(
        listing(&program),
        vec!["main:", "sbrc r16, 3", "ldi r17, 1", "sbrs r16, 4", "nop"]
    );
}

#[test]
fn skipped_body_must_be_single_instruction() {
    let program = main(vec![if_at(1, index(id("r16"), num(3)), set(id("Z"), num(0)), None)]);
    assert_eq!(error(&program), "Single instructions expected (but 2 found)");
}

#[test]
fn braced_body_uses_branch() {
    let body = || at(Statement::Block(vec![set(group(&["r25", "r24"]), num(0x1234))]));
    let program = main(vec![
        if_at(3, index(id("r16"), num(3)), body(), None),
        if_at(4, arrow(id("PINB"), "PINB1"), body(), None),
    ]);

    assert_eq!(
        listing(&program),
        vec![
            "main:",
            "sbrs r16, 3",
            "rjmp main@if_end@3",
            "ldi r25, 18",
            "ldi r24, 52",
            "main@if_end@3:",
            "sbis 22, 1",
            "rjmp main@if_end@4",
            "ldi r25, 18",
            "ldi r24, 52",
            "main@if_end@4:",
        ]
    );
}

#[test]
fn counted_loop() {
    let program = main(vec![line(
        Statement::Loop {
            condition: Some(at(set_expr(id("r16"), num(10)))),
            body: vec![instr("nop", vec![])],
        },
        3,
    )]);

    assert_eq!(
        listing(&program),
        vec![
            "main:",
            "ldi r16, 10",
            "main@loop@3:",
            "nop",
            "dec r16",
            "brne main@loop@3",
            "main@loopEnd@3:",
        ]
    );
}

#[test]
fn endless_loop_with_break() {
    let program = main(vec![line(
        Statement::Loop {
            condition: None,
            body: vec![if_at(
                6,
                bin(BinaryOp::Eq, id("r16"), num(0)),
                at(Statement::Break),
                None,
            )],
        },
        5,
    )]);

    assert_eq!(
        listing(&program),
        vec![
            "main:",
            "main@loop@5:",
            "tst r16",
            "breq main@loopEnd@5",
            "rjmp main@loop@5",
            "main@loopEnd@5:",
        ]
    );
}

#[test]
fn break_outside_loop() {
    let program = main(vec![at(Statement::Break)]);
    assert_eq!(error(&program), "Parent cycle not found");
}

#[test]
fn forward_reference() {
    let program = main(vec![
        instr("rjmp", vec![id("later")]),
        instr("nop", vec![]),
        label("later"),
    ]);

    assert_eq!(binary(&program), vec![0x01, 0xc0, 0x00, 0x00]);
}

#[test]
fn missing_label() {
    let program = main(vec![instr("rjmp", vec![id("nowhere")])]);
    assert_eq!(error(&program), "Label not found: nowhere");
}

fn inline(name: &str, params: &[(&str, &str)], body: Vec<ratc::source::Located<Statement>>) -> Item {
    let params = params
        .iter()
        .map(|&(param, register)| Param {
            name: common::name(param),
            binding: at(id(register)),
        })
        .collect();

    Item::Procedure(Procedure {
        params,
        inline: true,
        ..procedure(name, body)
    })
}

fn expand(name: &str, args: Vec<ratc::ast::Expr>) -> ratc::source::Located<Statement> {
    at(Statement::Call(call(name, args)))
}

#[test]
fn recursive_inline() {
    let program = program(vec![
        inline("blink", &[], vec![expand("blink", vec![])]),
        Item::Procedure(procedure("main", vec![expand("blink", vec![])])),
    ]);

    assert_eq!(error(&program), "Recursive inline call: blink");
}

#[test]
fn recursion_is_detected_before_binding() {
    // 300 no cabe en r20: el error de recursión debe ganar
    let program = program(vec![
        inline("blink", &[("count", "r20")], vec![expand("blink", vec![num(300)])]),
        Item::Procedure(procedure("main", vec![expand("blink", vec![num(1)])])),
    ]);

    assert_eq!(error(&program), "Recursive inline call: blink");
}

#[test]
fn inline_expansions_get_unique_labels() {
    let pulse = inline(
        "pulse",
        &[("count", "r20")],
        vec![
            label("again"),
            compound(AssignOp::Sub, id("count"), num(1)),
            instr("brne", vec![id("again")]),
        ],
    );

    let program = program(vec![
        pulse,
        Item::Procedure(procedure(
            "main",
            vec![expand("pulse", vec![num(3)]), expand("pulse", vec![id("r17")])],
        )),
    ]);

    assert_eq!(
        listing(&program),
        vec![
            "main:",
            "ldi r20, 3",
            "main_inl0@again:",
            "dec r20",
            "brne main_inl0@again",
            "mov r20, r17",
            "main_inl1@again:",
            "dec r20",
            "brne main_inl1@again",
        ]
    );
}

#[test]
fn inner_parameter_shadows_outer() {
    let program = program(vec![
        inline("inner", &[("value", "r21")], vec![set(id("r16"), id("value"))]),
        inline(
            "outer",
            &[("value", "r20")],
            vec![expand("inner", vec![id("value")]), set(id("r17"), id("value"))],
        ),
        Item::Procedure(procedure("main", vec![expand("outer", vec![num(5)])])),
    ]);

    assert_eq!(
        instructions(&program),
        vec!["ldi r20, 5", "mov r21, r20", "mov r16, r21", "mov r17, r20"]
    );
}

#[test]
fn interrupt_vectors() {
    let mut program = program(vec![
        Item::Procedure(procedure("main", vec![instr("rjmp", vec![id("main")])])),
        Item::Procedure(procedure("handler", vec![instr("reti", vec![])])),
    ]);

    program.vectors = Some(at(Vectors {
        entries: vec![VectorEntry {
            name: at(name("INT0")),
            instruction: at(asm("rjmp", vec![id("handler")])),
        }],
    }));

    let lines = listing(&program);
    assert_eq!(lines[0], "rjmp main ; RESET");
    assert_eq!(lines[1], "rjmp handler ; INT0");
    assert_eq!(lines[2], "reti ; INT1");
    assert_eq!(lines[19], "main:");
}

#[test]
fn unknown_vector() {
    let mut program = main(vec![]);
    program.vectors = Some(at(Vectors {
        entries: vec![VectorEntry {
            name: at(name("TIMER9_OVF")),
            instruction: at(asm("reti", vec![])),
        }],
    }));

    assert_eq!(error(&program), "Unknown interrupt vector: TIMER9_OVF");
}
