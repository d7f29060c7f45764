//! Constructores de árboles sintácticos para las pruebas de integración.

#![allow(dead_code)]

use ratc::{
    ast::*,
    device::Device,
    error::{CompileError, Warning},
    output::{Artifact, Format, Formats, Options, Outputs},
    source::{Located, Location},
};

use std::rc::Rc;

pub fn device() -> Device {
    serde_json::from_str(include_str!("../data/atmega8.json")).unwrap()
}

pub fn line<T>(value: T, line: u32) -> Located<T> {
    Located::at(value, Location::point("test.rat".into(), line, 1))
}

pub fn at<T>(value: T) -> Located<T> {
    line(value, 1)
}

pub fn name(name: &str) -> Identifier {
    Rc::from(name)
}

pub fn id(name: &str) -> Expr {
    Expr::Ident(self::name(name))
}

pub fn num(value: i32) -> Expr {
    Expr::Number(value)
}

pub fn group(names: &[&str]) -> Expr {
    Expr::Group(names.iter().map(|name| at(id(name))).collect())
}

pub fn bin(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(at(left)),
        right: Box::new(at(right)),
    }
}

pub fn not(operand: Expr) -> Expr {
    Expr::Prefix {
        op: PrefixOp::Not,
        operand: Box::new(at(operand)),
    }
}

pub fn index(base: Expr, index: Expr) -> Expr {
    Expr::Index {
        base: Box::new(at(base)),
        index: Box::new(at(index)),
    }
}

pub fn arrow(base: Expr, member: &str) -> Expr {
    Expr::Arrow {
        base: Box::new(at(base)),
        member: Box::new(at(id(member))),
    }
}

pub fn call(name: &str, args: Vec<Expr>) -> Call {
    Call {
        name: at(self::name(name)),
        args: args
            .into_iter()
            .map(|value| Argument {
                name: None,
                value: at(value),
            })
            .collect(),
    }
}

pub fn set_expr(target: Expr, value: Expr) -> Expr {
    Expr::Assign {
        op: AssignOp::Set,
        target: Box::new(at(target)),
        value: Box::new(at(value)),
    }
}

pub fn set(target: Expr, value: Expr) -> Located<Statement> {
    at(Statement::Expr(set_expr(target, value)))
}

pub fn compound(op: AssignOp, target: Expr, value: Expr) -> Located<Statement> {
    at(Statement::Expr(Expr::Assign {
        op,
        target: Box::new(at(target)),
        value: Box::new(at(value)),
    }))
}

pub fn asm(mnemonic: &str, operands: Vec<Expr>) -> AsmInstruction {
    AsmInstruction {
        mnemonic: at(name(mnemonic)),
        operands: operands.into_iter().map(at).collect(),
    }
}

pub fn instr(mnemonic: &str, operands: Vec<Expr>) -> Located<Statement> {
    at(Statement::Asm(asm(mnemonic, operands)))
}

pub fn label(name: &str) -> Located<Statement> {
    at(Statement::Label {
        name: self::name(name),
        global: false,
    })
}

pub fn if_at(
    line_number: u32,
    condition: Expr,
    then: Located<Statement>,
    otherwise: Option<Located<Statement>>,
) -> Located<Statement> {
    line(
        Statement::If {
            condition: at(condition),
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        },
        line_number,
    )
}

pub fn procedure(name: &str, body: Vec<Located<Statement>>) -> Procedure {
    Procedure {
        name: at(self::name(name)),
        params: Vec::new(),
        body,
        inline: false,
    }
}

pub fn program(items: Vec<Item>) -> Program {
    Program {
        vectors: None,
        items: items.into_iter().map(at).collect(),
    }
}

/// Programa con un único procedimiento `main`.
pub fn main(body: Vec<Located<Statement>>) -> Program {
    program(vec![Item::Procedure(procedure("main", body))])
}

/// Compila y escribe un formato.
pub fn render(
    program: &Program,
    format: Format,
) -> Result<(Vec<u8>, Vec<Located<Warning>>), Located<CompileError>> {
    render_on(program, &device(), format)
}

pub fn render_on(
    program: &Program,
    device: &Device,
    format: Format,
) -> Result<(Vec<u8>, Vec<Located<Warning>>), Located<CompileError>> {
    let mut outputs = Outputs::new(format.flag(), Options::default());
    let warnings = ratc::compile(program, device, &mut outputs)?;

    let mut artifacts = outputs.finish()?;
    assert_eq!(artifacts.len(), 1);

    let (_, artifact) = artifacts.remove(0);
    let mut bytes = Vec::new();
    artifact.write(&mut bytes).unwrap();

    Ok((bytes, warnings))
}

/// Listado en el dialecto simple, con espacios normalizados.
pub fn listing(program: &Program) -> Vec<String> {
    let (bytes, _) = render(program, Format::Asm).unwrap_or_else(|error| {
        panic!("compilation failed: {} at {}", error.val(), error.location())
    });

    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Solo las instrucciones del listado, sin etiquetas.
pub fn instructions(program: &Program) -> Vec<String> {
    listing(program)
        .into_iter()
        .filter(|line| !line.ends_with(':'))
        .collect()
}

pub fn error(program: &Program) -> String {
    match render(program, Format::Asm) {
        Ok(_) => panic!("compilation was expected to fail"),
        Err(error) => error.val().to_string(),
    }
}

pub fn warnings(program: &Program) -> Vec<String> {
    match render(program, Format::Asm) {
        Ok((_, warnings)) => warnings.iter().map(|warning| warning.val().to_string()).collect(),
        Err(error) => panic!("compilation failed: {}", error.val()),
    }
}

pub fn binary(program: &Program) -> Vec<u8> {
    render(program, Format::Binary).unwrap().0
}

pub fn text(program: &Program, format: Format) -> String {
    String::from_utf8(render(program, format).unwrap().0).unwrap()
}

pub fn formats(formats: &[Format]) -> Formats {
    formats
        .iter()
        .fold(Formats::empty(), |acc, format| acc | format.flag())
}

/// Decodifica un archivo Intel HEX a una imagen que comienza en 0.
///
/// Verifica la suma de cada registro y que el último sea el de fin.
pub fn decode_hex(text: &str, fill: u8) -> Vec<u8> {
    let mut image = Vec::new();
    let mut segment = 0usize;
    let mut ended = false;

    for line in text.lines() {
        assert!(!ended, "record after end of file: {}", line);
        assert!(line.starts_with(':'), "missing record mark: {}", line);

        let record: Vec<u8> = (1..line.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&line[i..i + 2], 16).unwrap())
            .collect();

        let sum = record.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte));
        assert_eq!(sum, 0, "checksum mismatch: {}", line);

        let count = record[0] as usize;
        assert_eq!(record.len(), count + 5, "wrong length: {}", line);

        let offset = u16::from_be_bytes([record[1], record[2]]) as usize;
        let data = &record[4..4 + count];

        match record[3] {
            0x00 => {
                let start = segment + offset;
                if image.len() < start + count {
                    image.resize(start + count, fill);
                }

                image[start..start + count].copy_from_slice(data);
            }

            0x01 => ended = true,
            0x02 => segment = (u16::from_be_bytes([data[0], data[1]]) as usize) << 4,
            kind => panic!("unexpected record type {}", kind),
        }
    }

    assert!(ended, "missing end of file record");
    image
}
