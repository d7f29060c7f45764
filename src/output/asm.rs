//! Salida en texto ensamblador.
//!
//! Hay dos dialectos. El dialecto simple imprime los valores diferidos
//! ya evaluados y los pares de registros como `r25:r24`. El dialecto
//! gcc produce un archivo apto para `avr-as`: los registros van en
//! mayúscula, los pares se nombran por su registro bajo, las expresiones
//! diferidas se imprimen simbólicamente y los símbolos externos quedan
//! a cargo del enlazador.

use super::{Artifact, Backend, Format, Linkage};
use crate::{
    arch::{Deferred, Instruction, LabelRef, Operand},
    assembler::{Assembler, Content, Data, Listing},
    ast::{BinaryOp, DataWidth},
    error::Compiled,
};

use std::{
    io::{self, Write},
    rc::Rc,
};

/// Diferencias entre dialectos de texto.
trait Dialect {
    fn operand(&self, listing: &Listing, source: &Operand, resolved: &Operand) -> String;

    fn label(&self, name: &str) -> String;

    fn data(
        &self,
        output: &mut dyn Write,
        listing: &Listing,
        data: &Data,
        values: &[i32],
    ) -> io::Result<()>;
}

struct Plain;

impl Dialect for Plain {
    fn operand(&self, listing: &Listing, source: &Operand, resolved: &Operand) -> String {
        match source {
            Operand::Label(label) => listing.target(label).to_string(),
            Operand::Deferred(_) | Operand::Extern(_) => resolved.to_string(),
            other => other.to_string(),
        }
    }

    fn label(&self, name: &str) -> String {
        name.to_string()
    }

    fn data(
        &self,
        output: &mut dyn Write,
        _listing: &Listing,
        data: &Data,
        values: &[i32],
    ) -> io::Result<()> {
        let directive = match data.width {
            DataWidth::Byte => ".db",
            DataWidth::Word => ".dw",
            DataWidth::Dword => ".dd",
        };

        emit!(output, directive, "{}", join(values.iter()))
    }
}

struct Gcc;

impl Gcc {
    fn label_ref(&self, listing: &Listing, label: &LabelRef) -> String {
        self.label(listing.target(label))
    }

    fn deferred(&self, listing: &Listing, deferred: &Deferred) -> String {
        use BinaryOp::{And, Shr};

        match deferred {
            Deferred::Const(value) => value.to_string(),
            Deferred::Address(label) => self.label_ref(listing, label),
            Deferred::Negate(inner) => format!("-({})", self.deferred(listing, inner)),

            Deferred::Binary(And, inner, mask) if **mask == Deferred::Const(0xff) => {
                match &**inner {
                    Deferred::Binary(Shr, value, shift) if **shift == Deferred::Const(8) => {
                        format!("hi8({})", self.deferred(listing, value))
                    }

                    value => format!("lo8({})", self.deferred(listing, value)),
                }
            }

            Deferred::Binary(op, left, right) => {
                let side = |side: &Deferred| match side {
                    Deferred::Binary(..) => format!("({})", self.deferred(listing, side)),
                    _ => self.deferred(listing, side),
                };

                format!("{}{}{}", side(&**left), op, side(&**right))
            }
        }
    }
}

impl Dialect for Gcc {
    fn operand(&self, listing: &Listing, source: &Operand, _resolved: &Operand) -> String {
        match source {
            Operand::Reg(reg) => format!("R{}", reg.number()),
            Operand::Pair(pair) => format!("R{}", pair.low().number()),
            Operand::Label(label) => self.label_ref(listing, label),
            Operand::Deferred(deferred) => self.deferred(listing, deferred),
            other => other.to_string(),
        }
    }

    fn label(&self, name: &str) -> String {
        if name.contains('@') {
            format!("_{}", name.replace('@', "_"))
        } else {
            name.to_string()
        }
    }

    fn data(
        &self,
        output: &mut dyn Write,
        listing: &Listing,
        data: &Data,
        values: &[i32],
    ) -> io::Result<()> {
        // Los valores simbólicos se imprimen por nombre
        let mut items: Vec<_> = data
            .values
            .iter()
            .zip(values)
            .map(|(source, value)| match source {
                Deferred::Const(_) => value.to_string(),
                symbolic => self.deferred(listing, symbolic),
            })
            .collect();

        match data.width {
            DataWidth::Byte => {
                if items.len() % 2 == 1 {
                    items.push(0.to_string());
                }

                emit!(output, ".byte", "{}", items.join(", "))
            }

            DataWidth::Word => emit!(output, ".word", "{}", items.join(", ")),

            DataWidth::Dword if data.values.iter().all(|value| matches!(value, Deferred::Const(_))) => {
                let words = values
                    .iter()
                    .flat_map(|&value| vec![value & 0xffff, (value >> 16) & 0xffff]);

                emit!(output, ".word", "{}", join(words))
            }

            // Un símbolo no se puede partir en palabras
            DataWidth::Dword => emit!(output, ".long", "{}", items.join(", ")),
        }
    }
}

fn join<I, T>(items: I) -> String
where
    I: Iterator<Item = T>,
    T: ToString,
{
    items
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_instruction(
    output: &mut dyn Write,
    dialect: &dyn Dialect,
    listing: &Listing,
    source: &Instruction,
    resolved: &Instruction,
) -> io::Result<()> {
    let operands = source
        .operands()
        .iter()
        .zip(resolved.operands())
        .map(|(source, resolved)| dialect.operand(listing, source, resolved));

    let operands = join(operands);
    let mnemonic = source.mnemonic();

    match (operands.is_empty(), source.comment()) {
        (true, None) => emit!(output, mnemonic),
        (_, None) => emit!(output, mnemonic, "{}", operands),
        (_, Some(comment)) => emit!(output, mnemonic, "{:12}; {}", operands, comment),
    }
}

fn write_listing(
    output: &mut dyn Write,
    dialect: &dyn Dialect,
    listing: &Listing,
) -> io::Result<()> {
    for (index, section) in listing.sections.iter().enumerate() {
        if index > 0 || section.origin != 0 {
            emit!(output, ".org", "{}", section.origin)?;
        }

        for line in &section.lines {
            match &line.content {
                // Las etiquetas de sondeo son internas
                Content::Label(name) if name.starts_with('?') => (),
                Content::Label(name) => writeln!(output, "{}:", dialect.label(name))?,

                Content::Instruction { source, resolved } => {
                    write_instruction(output, dialect, listing, source, resolved)?
                }

                Content::Data { source, values } => dialect.data(output, listing, source, values)?,
            }
        }
    }

    Ok(())
}

#[derive(Default)]
pub struct PlainAsm {
    assembler: Assembler,
}

impl Backend for PlainAsm {
    fn format(&self) -> Format {
        Format::Asm
    }

    fn assembler(&mut self) -> &mut Assembler {
        &mut self.assembler
    }

    fn finish(self: Box<Self>) -> Compiled<Box<dyn Artifact>> {
        let listing = self.assembler.resolve(false)?;
        Ok(Box::new(PlainFile { listing }))
    }
}

pub struct PlainFile {
    listing: Listing,
}

impl Artifact for PlainFile {
    fn write(&self, output: &mut dyn Write) -> io::Result<()> {
        write_listing(output, &Plain, &self.listing)
    }
}

#[derive(Default)]
pub struct GccAsm {
    assembler: Assembler,
    externs: Vec<Rc<str>>,
    globals: Vec<Rc<str>>,
}

impl Backend for GccAsm {
    fn format(&self) -> Format {
        Format::Gcc
    }

    fn assembler(&mut self) -> &mut Assembler {
        &mut self.assembler
    }

    fn declare(&mut self, symbol: Rc<str>, linkage: Linkage) {
        let symbols = match linkage {
            Linkage::Extern => &mut self.externs,
            Linkage::Global => &mut self.globals,
        };

        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }

    fn links_externals(&self) -> bool {
        true
    }

    fn finish(self: Box<Self>) -> Compiled<Box<dyn Artifact>> {
        let GccAsm {
            assembler,
            externs,
            globals,
        } = *self;

        let listing = assembler.resolve(true)?;
        Ok(Box::new(GccFile {
            listing,
            externs,
            globals,
        }))
    }
}

pub struct GccFile {
    listing: Listing,
    externs: Vec<Rc<str>>,
    globals: Vec<Rc<str>>,
}

impl Artifact for GccFile {
    fn write(&self, output: &mut dyn Write) -> io::Result<()> {
        writeln!(output, "#include <avr/io.h>")?;
        writeln!(output)?;

        for (directive, symbols) in &[(".extern", &self.externs), (".global", &self.globals)] {
            for symbol in symbols.iter() {
                writeln!(output, "{} {}", directive, symbol)?;
            }

            if !symbols.is_empty() {
                writeln!(output)?;
            }
        }

        write_listing(output, &Gcc, &self.listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::{ExternRef, Mnemonic, Pair, Reg},
        source::{Located, Location},
    };

    fn here() -> Location {
        Location::point("test.rat".into(), 1, 1)
    }

    fn emit(backend: &mut dyn Backend, mnemonic: Mnemonic, operands: Vec<Operand>) {
        let instruction = Instruction::new(mnemonic, operands).unwrap();
        backend.instruction(Located::at(instruction, here()));
    }

    fn text(backend: Box<dyn Backend>) -> String {
        let mut output = Vec::new();
        backend.finish().unwrap().write(&mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    fn reg(number: u8) -> Operand {
        Reg::new(number).unwrap().into()
    }

    fn program(backend: &mut dyn Backend) {
        let table = Deferred::Address(LabelRef::global("table".into()));
        let pair = Pair::new(Reg::new(24).unwrap()).unwrap();

        backend.label("main".into(), &here()).unwrap();
        emit(backend, Mnemonic::Ldi, vec![reg(31), table.clone().high().into()]);
        emit(backend, Mnemonic::Ldi, vec![reg(30), table.low().into()]);
        emit(backend, Mnemonic::Sbiw, vec![pair.into(), 1.into()]);
        backend.label("main@loop@3".into(), &here()).unwrap();

        let target = LabelRef::global("main@loop@3".into());
        emit(backend, Mnemonic::Brne, vec![target.into()]);
        backend.label("table".into(), &here()).unwrap();
    }

    #[test]
    fn plain_dialect() {
        let mut backend: Box<dyn Backend> = Box::new(PlainAsm::default());
        program(backend.as_mut());

        assert_eq!(
            text(backend),
            "main:\n\
             \tldi     r31, 0\n\
             \tldi     r30, 8\n\
             \tsbiw    r25:r24, 1\n\
             main@loop@3:\n\
             \tbrne    main@loop@3\n\
             table:\n"
        );
    }

    #[test]
    fn gcc_dialect() {
        let mut backend: Box<dyn Backend> = Box::new(GccAsm::default());
        backend.declare("buffer".into(), Linkage::Extern);
        backend.declare("main".into(), Linkage::Global);
        program(backend.as_mut());

        let symbol = ExternRef::new("buffer".into(), 10);
        emit(backend.as_mut(), Mnemonic::Sts, vec![symbol.into(), reg(24)]);

        assert_eq!(
            text(backend),
            "#include <avr/io.h>\n\
             \n\
             .extern buffer\n\
             \n\
             .global main\n\
             \n\
             main:\n\
             \tldi     R31, hi8(table)\n\
             \tldi     R30, lo8(table)\n\
             \tsbiw    R24, 1\n\
             _main_loop_3:\n\
             \tbrne    _main_loop_3\n\
             table:\n\
             \tsts     buffer+10, R24\n"
        );
    }

    #[test]
    fn data_directives() {
        let mut backend: Box<dyn Backend> = Box::new(PlainAsm::default());
        let data = Data {
            width: DataWidth::Word,
            values: vec![Deferred::Const(0x1234), Deferred::Const(-1)],
        };

        backend.data(Located::at(data, here()));
        backend.org(0x10);
        emit(backend.as_mut(), Mnemonic::Ret, vec![]);

        assert_eq!(text(backend), "\t.dw     4660, -1\n\t.org    16\n\tret\n");
    }

    #[test]
    fn gcc_dwords() {
        let mut backend: Box<dyn Backend> = Box::new(GccAsm::default());
        backend.label("table".into(), &here()).unwrap();

        let numbers = Data {
            width: DataWidth::Dword,
            values: vec![Deferred::Const(0x12345678)],
        };

        let table = Deferred::Address(LabelRef::global("table".into()));
        let offset = Deferred::Binary(
            BinaryOp::Add,
            Box::new(table.clone()),
            Box::new(Deferred::Const(2)),
        );

        let symbols = Data {
            width: DataWidth::Dword,
            values: vec![Deferred::Const(7), table, offset],
        };

        backend.data(Located::at(numbers, here()));
        backend.data(Located::at(symbols, here()));

        assert_eq!(
            text(backend),
            "#include <avr/io.h>\n\
             \n\
             table:\n\
             \t.word   22136, 4660\n\
             \t.long   7, table, table+2\n"
        );
    }
}
