//! Imagen binaria de la memoria de programa.

use super::{Artifact, Backend, Format};
use crate::{
    assembler::{Assembler, Listing},
    error::{Compiled, Locate, ResolutionError},
};

use std::io::{self, Write};

/// Rango contiguo de memoria de programa.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryPage {
    pub start: u32,
    pub bytes: Vec<u8>,
}

impl MemoryPage {
    pub fn end(&self) -> u32 {
        self.start + self.bytes.len() as u32
    }
}

/// Agrupa las secciones de un listado en páginas contiguas.
///
/// Las secciones se ordenan por origen; una sección que comienza justo
/// donde termina la anterior se fusiona con ella. Dos secciones que se
/// traslapan son un error.
pub fn pages(listing: &Listing) -> Compiled<Vec<MemoryPage>> {
    let mut sections: Vec<_> = listing
        .sections
        .iter()
        .filter_map(|section| section.location().map(|location| (section, location)))
        .collect();

    sections.sort_by_key(|(section, _)| section.origin);

    let mut pages: Vec<MemoryPage> = Vec::new();
    for (section, location) in sections {
        let bytes = section.bytes();
        match pages.last_mut() {
            Some(page) if page.end() == section.origin => page.bytes.extend(bytes),
            Some(page) if page.end() > section.origin => {
                return Err(ResolutionError::Overlap(section.origin).at(location))
            }

            _ => pages.push(MemoryPage {
                start: section.origin,
                bytes,
            }),
        }
    }

    Ok(pages)
}

pub struct Binary {
    assembler: Assembler,
    fill: u8,
}

impl Binary {
    pub fn new(fill: u8) -> Self {
        Binary {
            assembler: Assembler::default(),
            fill,
        }
    }
}

impl Backend for Binary {
    fn format(&self) -> Format {
        Format::Binary
    }

    fn assembler(&mut self) -> &mut Assembler {
        &mut self.assembler
    }

    fn finish(self: Box<Self>) -> Compiled<Box<dyn Artifact>> {
        let listing = self.assembler.resolve(false)?;
        let pages = pages(&listing)?;

        Ok(Box::new(Image {
            pages,
            fill: self.fill,
        }))
    }
}

/// Imagen desde la dirección 0 con huecos rellenos.
pub struct Image {
    pages: Vec<MemoryPage>,
    fill: u8,
}

impl Artifact for Image {
    fn write(&self, output: &mut dyn Write) -> io::Result<()> {
        let mut cursor = 0;
        for page in &self.pages {
            let gap = (page.start - cursor) as usize;
            output.write_all(&vec![self.fill; gap])?;
            output.write_all(&page.bytes)?;

            cursor = page.end();
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

    fn here() -> Location {
        Location::point("test.rat".into(), 1, 1)
    }

    fn ret(assembler: &mut Assembler) {
        let ret = Instruction::new(Mnemonic::Ret, vec![]).unwrap();
        assembler.instruction(Located::at(ret, here()));
    }

    fn image(binary: Binary) -> Vec<u8> {
        let artifact = Box::new(binary).finish().unwrap();
        let mut output = Vec::new();
        artifact.write(&mut output).unwrap();
        output
    }

    #[test]
    fn gaps_are_filled() {
        let mut binary = Binary::new(0xff);
        binary.org(4);
        ret(&mut binary.assembler);
        binary.org(10);
        ret(&mut binary.assembler);

        assert_eq!(
            image(binary),
            vec![0xff, 0xff, 0xff, 0xff, 0x08, 0x95, 0xff, 0xff, 0xff, 0xff, 0x08, 0x95]
        );
    }

    #[test]
    fn contiguous_blocks_merge() {
        let mut binary = Binary::new(0);
        binary.org(2);
        ret(&mut binary.assembler);
        binary.org(0);
        ret(&mut binary.assembler);

        let listing = binary.assembler.resolve(false).unwrap();
        let pages = pages(&listing).unwrap();

        assert_eq!(
            pages,
            vec![MemoryPage {
                start: 0,
                bytes: vec![0x08, 0x95, 0x08, 0x95]
            }]
        );
    }

    #[test]
    fn overlapping_blocks() {
        let mut binary = Binary::new(0);
        ret(&mut binary.assembler);
        ret(&mut binary.assembler);
        binary.org(2);
        ret(&mut binary.assembler);

        let listing = binary.assembler.resolve(false).unwrap();
        let error = pages(&listing).unwrap_err();
        assert_eq!(error.val().to_string(), "Overlapping code blocks at 0x0002");
    }
}
