//! Formatos de salida.
//!
//! Cada formato es un [`Backend`]: recibe, en el mismo orden, todas las
//! emisiones de la generación de código y las acumula en su propio
//! [`Assembler`]. Al terminar, cada backend resuelve su listado y
//! produce un [`Artifact`] listo para escribirse. Los backends activos
//! se agrupan en [`Outputs`], que replica cada emisión en todos ellos.

use crate::{
    arch::Instruction,
    assembler::{Assembler, Data},
    error::Compiled,
    source::{Located, Location},
};

use bitflags::bitflags;
use std::{
    fmt::{self, Display},
    io::{self, Write},
    rc::Rc,
    str::FromStr,
};

mod asm;
mod hex;
mod image;
mod map;

pub use asm::{GccAsm, PlainAsm};
pub use hex::IntelHex;
pub use image::{Binary, MemoryPage};
pub use map::SymbolMap;

bitflags! {
    /// Formatos de salida seleccionados.
    pub struct Formats: u32 {
        const BINARY = 0x01;
        const HEX = 0x02;
        const ASM = 0x04;
        const GCC = 0x08;
        const MAP = 0x10;
    }
}

/// Un formato de salida individual.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Format {
    Binary,
    Hex,
    Asm,
    Gcc,
    Map,
}

impl Format {
    pub const ALL: &'static [Format] = &[
        Format::Binary,
        Format::Hex,
        Format::Asm,
        Format::Gcc,
        Format::Map,
    ];

    pub fn flag(self) -> Formats {
        match self {
            Format::Binary => Formats::BINARY,
            Format::Hex => Formats::HEX,
            Format::Asm => Formats::ASM,
            Format::Gcc => Formats::GCC,
            Format::Map => Formats::MAP,
        }
    }

    /// Extensión de archivo convencional.
    pub fn extension(self) -> &'static str {
        match self {
            Format::Binary => "bin",
            Format::Hex => "hex",
            Format::Asm => "asm",
            Format::Gcc => "S",
            Format::Map => "map",
        }
    }
}

impl FromStr for Format {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        match string {
            "bin" => Ok(Format::Binary),
            "hex" => Ok(Format::Hex),
            "asm" => Ok(Format::Asm),
            "gcc" => Ok(Format::Gcc),
            "map" => Ok(Format::Map),
            _ => Err(()),
        }
    }
}

impl Display for Format {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Format::Binary => "bin",
            Format::Hex => "hex",
            Format::Asm => "asm",
            Format::Gcc => "gcc",
            Format::Map => "map",
        })
    }
}

/// Parámetros de los codificadores.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Options {
    /// Byte de relleno entre bloques de la imagen binaria.
    pub fill: u8,

    /// Máximo de bytes de datos por registro Intel HEX.
    pub hex_width: u8,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            fill: 0,
            hex_width: 16,
        }
    }
}

/// Visibilidad de un símbolo en ensamblador gcc.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Linkage {
    Extern,
    Global,
}

/// Salida escribible de un backend ya resuelto.
pub trait Artifact {
    fn write(&self, output: &mut dyn Write) -> io::Result<()>;
}

/// Capacidades de un formato de salida.
///
/// Las implementaciones por defecto delegan en el ensamblador del
/// backend; solo `finish` es propio de cada formato.
pub trait Backend {
    fn format(&self) -> Format;

    fn assembler(&mut self) -> &mut Assembler;

    fn instruction(&mut self, instruction: Located<Instruction>) {
        self.assembler().instruction(instruction);
    }

    fn label(&mut self, name: Rc<str>, location: &Location) -> Compiled<()> {
        self.assembler().label(name, location)
    }

    fn data(&mut self, data: Located<Data>) {
        self.assembler().data(data);
    }

    fn org(&mut self, origin: u32) {
        self.assembler().org(origin);
    }

    /// Exige que entre dos etiquetas no haya más de `max` bytes.
    fn validate_region(&mut self, start: Rc<str>, end: Rc<str>, max: u32, location: &Location) {
        self.assembler().rule(start, end, max, location);
    }

    /// Declara un símbolo visible para el enlazador.
    fn declare(&mut self, _symbol: Rc<str>, _linkage: Linkage) {}

    /// El formato delega los símbolos externos a un enlazador.
    fn links_externals(&self) -> bool {
        false
    }

    fn finish(self: Box<Self>) -> Compiled<Box<dyn Artifact>>;
}

/// Conjunto de backends activos.
pub struct Outputs {
    backends: Vec<Box<dyn Backend>>,
}

impl Outputs {
    pub fn new(formats: Formats, options: Options) -> Self {
        let backends = Format::ALL
            .iter()
            .filter(|format| formats.contains(format.flag()))
            .map(|&format| -> Box<dyn Backend> {
                match format {
                    Format::Binary => Box::new(Binary::new(options.fill)),
                    Format::Hex => Box::new(IntelHex::new(options.hex_width)),
                    Format::Asm => Box::new(PlainAsm::default()),
                    Format::Gcc => Box::new(GccAsm::default()),
                    Format::Map => Box::new(SymbolMap::default()),
                }
            })
            .collect();

        Outputs { backends }
    }

    /// Algún formato activo admite símbolos externos.
    pub fn links_externals(&self) -> bool {
        self.backends.iter().any(|backend| backend.links_externals())
    }

    pub fn instruction(&mut self, instruction: Located<Instruction>) {
        for backend in &mut self.backends {
            backend.instruction(instruction.clone());
        }
    }

    pub fn label(&mut self, name: Rc<str>, location: &Location) -> Compiled<()> {
        for backend in &mut self.backends {
            backend.label(Rc::clone(&name), location)?;
        }

        Ok(())
    }

    pub fn data(&mut self, data: Located<Data>) {
        for backend in &mut self.backends {
            backend.data(data.clone());
        }
    }

    pub fn org(&mut self, origin: u32) {
        for backend in &mut self.backends {
            backend.org(origin);
        }
    }

    pub fn validate_region(&mut self, start: Rc<str>, end: Rc<str>, max: u32, location: &Location) {
        for backend in &mut self.backends {
            backend.validate_region(Rc::clone(&start), Rc::clone(&end), max, location);
        }
    }

    pub fn declare(&mut self, symbol: Rc<str>, linkage: Linkage) {
        for backend in &mut self.backends {
            backend.declare(Rc::clone(&symbol), linkage);
        }
    }

    /// Resuelve todos los backends antes de producir cualquier artefacto.
    pub fn finish(self) -> Compiled<Vec<(Format, Box<dyn Artifact>)>> {
        self.backends
            .into_iter()
            .map(|backend| {
                let format = backend.format();
                log::debug!("resolving {} output", format);
                backend.finish().map(|artifact| (format, artifact))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names() {
        assert_eq!("hex".parse(), Ok(Format::Hex));
        assert_eq!("gcc".parse(), Ok(Format::Gcc));
        assert_eq!("elf".parse::<Format>(), Err(()));
        assert_eq!(Format::Gcc.extension(), "S");
    }

    #[test]
    fn selected_backends() {
        let outputs = Outputs::new(Formats::HEX | Formats::ASM, Options::default());
        assert_eq!(outputs.backends.len(), 2);
        assert!(!outputs.links_externals());

        let outputs = Outputs::new(Formats::GCC, Options::default());
        assert!(outputs.links_externals());
    }
}
