mod common;

use common::*;
use ratc::{
    ast::{DataBlock, DataWidth, Expr, Item},
    output::{Format, Formats},
};

fn bytes(values: &[i32]) -> Item {
    Item::Data(DataBlock {
        width: DataWidth::Byte,
        items: values.iter().map(|&value| at(num(value))).collect(),
    })
}

fn org(address: i32) -> Item {
    Item::Directive {
        name: at(name("org")),
        args: vec![at(num(address))],
    }
}

/// `main` carga la dirección de `table` en Z.
fn table_program() -> ratc::ast::Program {
    program(vec![
        Item::Procedure(procedure(
            "main",
            vec![set(id("Z"), id("table")), instr("ret", vec![])],
        )),
        Item::Label(name("table")),
        Item::Data(DataBlock {
            width: DataWidth::Byte,
            items: vec![at(Expr::Str("hi!".into()))],
        }),
    ])
}

#[test]
fn hex_data_record() {
    let program = program(vec![bytes(&[0x12, 0x34])]);
    assert_eq!(
        text(&program, Format::Hex),
        ":020000001234B8\n:00000001FF\n"
    );
}

#[test]
fn hex_records_rebuild_the_image() {
    let values: Vec<i32> = (0..40).collect();
    let program = program(vec![org(0x06), bytes(&values)]);

    let hex = text(&program, Format::Hex);
    let lines: Vec<_> = hex.lines().collect();

    // 10 bytes hasta el límite de 16, luego 16 y 14
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with(":0A000600"));
    assert!(lines[1].starts_with(":10001000"));
    assert!(lines[2].starts_with(":0E002000"));
    assert_eq!(lines[3], ":00000001FF");

    assert_eq!(decode_hex(&hex, 0), binary(&program));
}

#[test]
fn hex_segments_above_64k() {
    let values: Vec<i32> = (0..16).map(|value| value * 3).collect();
    let program = program(vec![org(0xfff8), bytes(&values)]);

    let hex = text(&program, Format::Hex);
    let lines: Vec<_> = hex.lines().collect();

    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with(":08FFF800"));
    assert_eq!(lines[1], ":020000021000EC");
    assert!(lines[2].starts_with(":08000000"));

    let image = decode_hex(&hex, 0);
    assert_eq!(image.len(), 0x1_0008);
    assert_eq!(image, binary(&program));
}

#[test]
fn symbol_map_follows_org() {
    let program = program(vec![
        org(0x40),
        Item::Procedure(procedure("main", vec![instr("ret", vec![])])),
        Item::Procedure(procedure("idle", vec![instr("sleep", vec![])])),
    ]);

    assert_eq!(text(&program, Format::Map), "0040: main\n0042: idle\n");
}

#[test]
fn odd_org_is_rejected() {
    let program = program(vec![
        org(0x41),
        Item::Procedure(procedure("main", vec![instr("ret", vec![])])),
    ]);

    assert_eq!(error(&program), "Wrong org address: 65");
}

#[test]
fn dangling_org_is_rejected() {
    let program = program(vec![org(0x40)]);
    assert_eq!(error(&program), "Invalid directive: org");
}

#[test]
fn plain_listing_resolves_addresses() {
    assert_eq!(
        listing(&table_program()),
        vec![
            "main:",
            "ldi r31, 0",
            "ldi r30, 6",
            "ret",
            "table:",
            ".db 104, 105, 33",
        ]
    );
}

#[test]
fn gcc_listing_keeps_symbols() {
    let text = text(&table_program(), Format::Gcc);
    let lines: Vec<String> = text
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect();

    assert_eq!(
        lines,
        vec![
            "#include <avr/io.h>",
            ".global main",
            "main:",
            "ldi R31, hi8(table)",
            "ldi R30, lo8(table)",
            "ret",
            "table:",
            ".byte 104, 105, 33, 0",
        ]
    );
}

#[test]
fn binary_image() {
    let program = main(vec![set(id("r16"), num(0xff)), instr("ret", vec![])]);

    // ldi r16, 0xff; ret
    assert_eq!(binary(&program), vec![0x0f, 0xef, 0x08, 0x95]);
}

#[test]
fn format_selection() {
    let selected = formats(&[Format::Hex, Format::Map]);
    assert_eq!(selected, Formats::HEX | Formats::MAP);
    assert!(!selected.contains(Formats::GCC));
}
