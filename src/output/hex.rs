//! Formato Intel HEX.
//!
//! Los registros de datos usan direcciones de 16 bits. Para imágenes
//! de más de 64 KiB se emite un registro de segmento extendido (tipo
//! 02) cada vez que los datos entran a una nueva ventana de 64 KiB.

use super::{
    image::{self, MemoryPage},
    Artifact, Backend, Format,
};

use crate::{assembler::Assembler, error::Compiled};
use std::io::{self, Write};

const WINDOW: u32 = 0x1_0000;

pub struct IntelHex {
    assembler: Assembler,
    width: u8,
}

impl IntelHex {
    pub fn new(width: u8) -> Self {
        IntelHex {
            assembler: Assembler::default(),
            width: width.max(1),
        }
    }
}

impl Backend for IntelHex {
    fn format(&self) -> Format {
        Format::Hex
    }

    fn assembler(&mut self) -> &mut Assembler {
        &mut self.assembler
    }

    fn finish(self: Box<Self>) -> Compiled<Box<dyn Artifact>> {
        let listing = self.assembler.resolve(false)?;
        let pages = image::pages(&listing)?;

        Ok(Box::new(HexFile {
            pages,
            width: self.width as u32,
        }))
    }
}

pub struct HexFile {
    pages: Vec<MemoryPage>,
    width: u32,
}

impl Artifact for HexFile {
    fn write(&self, output: &mut dyn Write) -> io::Result<()> {
        let mut window = 0;
        for page in &self.pages {
            let mut address = page.start;
            let mut rest = &page.bytes[..];

            while !rest.is_empty() {
                let segment = address & !(WINDOW - 1);
                if segment != window {
                    write_segment_record(output, segment)?;
                    window = segment;
                }

                let count = if rest.len() as u32 <= self.width {
                    rest.len() as u32
                } else {
                    (address / self.width + 1) * self.width - address
                };

                let count = count.min(segment + WINDOW - address) as usize;
                let (record, tail) = rest.split_at(count);

                write_data_record(output, (address - segment) as u16, record)?;

                address += count as u32;
                rest = tail;
            }
        }

        writeln!(output, ":00000001FF")
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte));
    (!sum).wrapping_add(1)
}

fn write_data_record(output: &mut dyn Write, address: u16, data: &[u8]) -> io::Result<()> {
    let mut record = vec![data.len() as u8];
    record.extend_from_slice(&address.to_be_bytes());
    record.push(0x00);
    record.extend_from_slice(data);

    write!(output, ":")?;
    for byte in &record {
        write!(output, "{:02X}", byte)?;
    }

    writeln!(output, "{:02X}", checksum(&record))
}

fn write_segment_record(output: &mut dyn Write, segment: u32) -> io::Result<()> {
    let paragraph = ((segment >> 4) as u16).to_be_bytes();
    let record = [0x02, 0x00, 0x00, 0x02, paragraph[0], paragraph[1]];

    writeln!(
        output,
        ":02000002{:02X}{:02X}{:02X}",
        paragraph[0],
        paragraph[1],
        checksum(&record)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(pages: Vec<MemoryPage>, width: u32) -> String {
        let mut output = Vec::new();
        HexFile { pages, width }.write(&mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    fn verify_checksum(line: &str) {
        let bytes: Vec<u8> = (1..line.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&line[i..i + 2], 16).unwrap())
            .collect();

        let sum = bytes.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte));
        assert_eq!(sum, 0, "checksum mismatch for {}", line);
    }

    #[test]
    fn single_record() {
        let pages = vec![MemoryPage {
            start: 0,
            bytes: vec![0x00, 0x00, 0x12, 0x34],
        }];

        assert_eq!(hex(pages, 16), ":0400000000001234B6\n:00000001FF\n");
    }

    #[test]
    fn records_align_to_width() {
        let pages = vec![MemoryPage {
            start: 4,
            bytes: (0..20).collect(),
        }];

        let text = hex(pages, 16);
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with(":0C000400"));
        assert!(lines[1].starts_with(":08001000"));
        lines.iter().for_each(|line| verify_checksum(line));
    }

    #[test]
    fn extended_segments() {
        let pages = vec![MemoryPage {
            start: 0xfffe,
            bytes: vec![0xaa, 0xbb, 0xcc, 0xdd],
        }];

        let text = hex(pages, 16);
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], ":02FFFE00AABB9C");
        assert_eq!(lines[1], ":020000021000EC");
        assert!(lines[2].starts_with(":02000000CCDD"));
        lines.iter().for_each(|line| verify_checksum(line));
    }
}
