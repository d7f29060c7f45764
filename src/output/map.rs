//! Mapa de símbolos: una línea por etiqueta, ordenadas por dirección.

use super::{Artifact, Backend, Format};
use crate::{assembler::Assembler, error::Compiled};

use std::{
    io::{self, Write},
    rc::Rc,
};

#[derive(Default)]
pub struct SymbolMap {
    assembler: Assembler,
}

impl Backend for SymbolMap {
    fn format(&self) -> Format {
        Format::Map
    }

    fn assembler(&mut self) -> &mut Assembler {
        &mut self.assembler
    }

    fn finish(self: Box<Self>) -> Compiled<Box<dyn Artifact>> {
        let listing = self.assembler.resolve(false)?;
        let symbols = listing
            .labels
            .into_iter()
            .filter(|(name, _)| !name.starts_with('?'))
            .collect();

        Ok(Box::new(MapFile { symbols }))
    }
}

pub struct MapFile {
    symbols: Vec<(Rc<str>, u32)>,
}

impl Artifact for MapFile {
    fn write(&self, output: &mut dyn Write) -> io::Result<()> {
        for (name, offset) in &self.symbols {
            writeln!(output, "{:04X}: {}", offset, name)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::{Instruction, Mnemonic},
        source::{Located, Location},
    };

    #[test]
    fn sorted_without_probes() {
        let here = Location::point("test.rat".into(), 1, 1);
        let mut map: Box<dyn Backend> = Box::new(SymbolMap::default());

        map.label("main".into(), &here).unwrap();
        map.label("?probe0_start".into(), &here).unwrap();

        let ret = Instruction::new(Mnemonic::Ret, vec![]).unwrap();
        map.instruction(Located::at(ret, here.clone()));
        map.label("isr".into(), &here).unwrap();
        map.org(0x100);
        map.label("boot".into(), &here).unwrap();

        let mut output = Vec::new();
        map.finish().unwrap().write(&mut output).unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "0000: main\n0002: isr\n0100: boot\n"
        );
    }
}
