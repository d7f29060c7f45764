mod common;

use common::*;
use ratc::ast::{AssignOp, BinaryOp, DataType, Item, VarDecl};

#[test]
fn self_assignment_emits_nothing() {
    let program = main(vec![set(id("r16"), id("r16"))]);
    assert_eq!(listing(&program), vec!["main:"]);
}

#[test]
fn constants() {
    let program = main(vec![
        set(id("r16"), num(0)),
        set(id("r17"), num(200)),
        set(id("r18"), num(-1)),
        set(id("r19"), num('A' as i32)),
    ]);

    assert_eq!(
        instructions(&program),
        vec!["clr r16", "ldi r17, 200", "ldi r18, 255", "ldi r19, 65"]
    );
}

#[test]
fn increments() {
    let program = main(vec![
        compound(AssignOp::Add, id("r16"), num(1)),
        compound(AssignOp::Sub, id("r16"), num(1)),
        compound(AssignOp::Add, id("r16"), num(5)),
        compound(AssignOp::Sub, id("r16"), num(5)),
    ]);

    assert_eq!(
        instructions(&program),
        vec!["inc r16", "dec r16", "subi r16, 251", "subi r16, 5"]
    );
}

#[test]
fn word_additions() {
    let program = main(vec![
        compound(AssignOp::Add, group(&["r25", "r24"]), num(10)),
        compound(AssignOp::Sub, id("X"), num(63)),
        compound(AssignOp::Add, id("Z"), num(0x40)),
        compound(AssignOp::Add, group(&["r19", "r18"]), num(1)),
    ]);

    assert_eq!(
        instructions(&program),
        vec![
            "adiw r25:r24, 10",
            "sbiw X, 63",
            "subi r30, 192",
            "sbci r31, 255",
            "subi r18, 255",
            "sbci r19, 255",
        ]
    );
}

#[test]
fn pair_moves() {
    let program = main(vec![
        set(group(&["r25", "r24"]), group(&["r23", "r22"])),
        set(group(&["r25", "r24"]), group(&["r23", "r24"])),
        set(group(&["r19", "r18"]), num(0x1200)),
    ]);

    assert_eq!(
        instructions(&program),
        vec!["movw r25:r24, r23:r22", "mov r25, r23", "ldi r19, 18", "clr r18"]
    );
}

#[test]
fn expression_chain_folds_constants() {
    use BinaryOp::*;

    // (r2 << 3) + r3 - r4 - 5 + 2 * 2
    let value = bin(
        Add,
        bin(
            Sub,
            bin(Sub, bin(Add, bin(Shl, id("r2"), num(3)), id("r3")), id("r4")),
            num(5),
        ),
        bin(Mul, num(2), num(2)),
    );

    let program = main(vec![set(id("r16"), value)]);
    assert_eq!(
        instructions(&program),
        vec![
            "mov r16, r2",
            "lsl r16",
            "lsl r16",
            "lsl r16",
            "add r16, r3",
            "sub r16, r4",
            "dec r16",
        ]
    );
}

#[test]
fn destination_inside_expression() {
    let program = main(vec![set(id("r16"), bin(BinaryOp::Add, id("r17"), id("r16")))]);
    assert_eq!(
        error(&program),
        "Destination register can't be used inside the expression: r16"
    );
}

#[test]
fn value_too_big() {
    let program = main(vec![set(id("r16"), num(300))]);
    assert_eq!(error(&program), "Value too big");
}

#[test]
fn io_ports_and_bits() {
    let program = program(vec![
        Item::Pin {
            name: at(name("led")),
            pin: at("B3".to_string()),
        },
        Item::Procedure(procedure(
            "main",
            vec![
                set(id("r16"), id("PINB")),
                set(id("PORTB"), id("r16")),
                set(arrow(id("led"), "port"), num(1)),
                set(arrow(id("PORTD"), "PD2"), num(0)),
            ],
        )),
    ]);

    assert_eq!(
        instructions(&program),
        vec!["in r16, 22", "out 24, r16", "sbi 24, 3", "cbi 18, 2"]
    );
}

#[test]
fn register_bits() {
    let program = main(vec![
        set(index(id("r16"), num(3)), num(1)),
        set(index(id("r16"), num(0)), num(0)),
        set(index(id("r17"), num(7)), index(id("r16"), num(3))),
    ]);

    assert_eq!(
        instructions(&program),
        vec!["sbr r16, 8", "cbr r16, 1", "bst r16, 3", "bld r17, 7"]
    );
}

#[test]
fn variables_in_ram() {
    let var = |name: &str, data_type| {
        Item::Var(VarDecl {
            name: at(common::name(name)),
            data_type,
            length: None,
        })
    };

    let program = program(vec![
        var("counter", DataType::Byte),
        var("total", DataType::Word),
        Item::Procedure(procedure(
            "main",
            vec![
                set(id("counter"), id("r16")),
                set(id("total"), group(&["r25", "r24"])),
                set(id("r17"), id("counter")),
            ],
        )),
    ]);

    assert_eq!(
        instructions(&program),
        vec!["sts 96, r16", "sts 98, r25", "sts 97, r24", "lds r17, 96"]
    );
}

#[test]
fn zero_argument_warning() {
    let program = main(vec![compound(AssignOp::Add, id("r16"), num(0))]);
    assert_eq!(warnings(&program), vec!["zero argument"]);
}

#[test]
fn external_variables_need_gcc() {
    let program = program(vec![Item::ExternVar(VarDecl {
        name: at(name("buffer")),
        data_type: DataType::Byte,
        length: None,
    })]);

    assert_eq!(error(&program), "External objects can be used only in GCC-mode");
}

#[test]
fn ramend_needs_ram() {
    let device = ratc::device::Device {
        ram_start: 0,
        ram_size: 0,
        ..device()
    };

    let program = main(vec![set(id("r16"), id("RAMEND"))]);
    match render_on(&program, &device, ratc::output::Format::Asm) {
        Ok(_) => panic!("compilation was expected to fail"),
        Err(error) => assert_eq!(error.val().to_string(), "Device has no RAM"),
    }
}
