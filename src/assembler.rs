//! Ensamblador simbólico de dos pasadas.
//!
//! La primera pasada ocurre durante la generación de código: cada
//! backend acumula bloques de etiquetas, instrucciones y datos, y
//! registra la dirección en bytes de cada etiqueta conforme llega.
//! Como el tamaño de cada instrucción no depende del valor de sus
//! operandos, al terminar la generación de código la tabla de
//! etiquetas ya es definitiva.
//!
//! La segunda pasada ([`Assembler::resolve()`]) no modifica al
//! ensamblador. Produce un [`Listing`] donde cada referencia a una
//! etiqueta y cada expresión diferida se han evaluado una única vez,
//! y donde cada instrucción ya tiene su codificación binaria.

use crate::{
    arch::{Deferred, DeferredError, Instruction, LabelRef, Operand},
    ast::DataWidth,
    error::{BudgetError, CompileError, Compiled, Locate, ResolutionError, SemanticError},
    source::{Located, Location},
};

use std::{collections::HashMap, rc::Rc};

use crate::arch::EncodingError;

/// Bloque de datos crudos en memoria de programa.
#[derive(Clone, Debug, PartialEq)]
pub struct Data {
    pub width: DataWidth,
    pub values: Vec<Deferred>,
}

impl Data {
    /// Tamaño en bytes, incluyendo el relleno a palabra completa.
    pub fn size(&self) -> u32 {
        let size = self.width.size() * self.values.len() as u32;
        size + size % 2
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    Label(Located<Rc<str>>),
    Instruction(Located<Instruction>),
    Data(Located<Data>),
}

/// Secuencia contigua de entradas a partir de un origen.
#[derive(Clone, Debug, Default)]
pub struct Block {
    origin: u32,
    size: u32,
    entries: Vec<Entry>,
}

impl Block {
    pub fn origin(&self) -> u32 {
        self.origin
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

/// Restricción de tamaño entre dos etiquetas.
#[derive(Clone, Debug)]
struct SizeRule {
    start: Rc<str>,
    end: Rc<str>,
    max: u32,
    location: Location,
}

#[derive(Default)]
pub struct Assembler {
    blocks: Vec<Block>,
    labels: HashMap<Rc<str>, u32>,
    rules: Vec<SizeRule>,
}

impl Assembler {
    /// Dirección en bytes de la siguiente entrada.
    pub fn cursor(&self) -> u32 {
        self.blocks
            .last()
            .map(|block| block.origin + block.size)
            .unwrap_or(0)
    }

    /// Inicia un bloque nuevo en la dirección dada.
    ///
    /// Si el bloque actual sigue vacío, se reubica en lugar de crear otro.
    pub fn org(&mut self, origin: u32) {
        match self.blocks.last_mut() {
            Some(block) if block.entries.is_empty() => block.origin = origin,
            _ => self.blocks.push(Block {
                origin,
                ..Default::default()
            }),
        }
    }

    pub fn label(&mut self, name: Rc<str>, location: &Location) -> Compiled<()> {
        if self.labels.contains_key(&name) {
            return Err(SemanticError::LabelAlreadyDefined(name.to_string()).at(location));
        }

        let offset = self.cursor();
        self.labels.insert(Rc::clone(&name), offset);
        self.push(Entry::Label(Located::at(name, location.clone())), 0);

        Ok(())
    }

    pub fn instruction(&mut self, instruction: Located<Instruction>) {
        let size = instruction.val().size();
        self.push(Entry::Instruction(instruction), size);
    }

    pub fn data(&mut self, data: Located<Data>) {
        let size = data.val().size();
        self.push(Entry::Data(data), size);
    }

    /// Registra una restricción de tamaño máximo entre dos etiquetas.
    pub fn rule(&mut self, start: Rc<str>, end: Rc<str>, max: u32, location: &Location) {
        self.rules.push(SizeRule {
            start,
            end,
            max,
            location: location.clone(),
        });
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Busca una etiqueta, primero en su forma local y luego en la global.
    pub fn find(&self, label: &LabelRef) -> Option<u32> {
        label
            .candidates()
            .find_map(|name| self.labels.get(name))
            .copied()
    }

    fn push(&mut self, entry: Entry, size: u32) {
        if self.blocks.is_empty() {
            self.blocks.push(Block::default());
        }

        if let Some(block) = self.blocks.last_mut() {
            block.entries.push(entry);
            block.size += size;
        }
    }

    /// Segunda pasada.
    ///
    /// Las referencias externas solo se permiten si `link_externals` es
    /// verdadero, en cuyo caso se codifican con un valor provisional.
    pub fn resolve(&self, link_externals: bool) -> Compiled<Listing> {
        let lookup = |label: &LabelRef| self.find(label);

        let mut sections = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let mut cursor = block.origin;
            let mut lines = Vec::with_capacity(block.entries.len());

            for entry in &block.entries {
                let line = match entry {
                    Entry::Label(name) => Line {
                        offset: cursor,
                        location: name.location().clone(),
                        content: Content::Label(Rc::clone(name.val())),
                        bytes: Vec::new(),
                    },

                    Entry::Instruction(instruction) => {
                        let location = instruction.location();
                        let resolved =
                            self.resolve_instruction(instruction.val(), cursor, link_externals)
                                .map_err(|error| error.at(location))?;

                        let bytes = resolved
                            .encode()
                            .map_err(|error| error.at(location))?
                            .bytes();

                        Line {
                            offset: cursor,
                            location: location.clone(),
                            content: Content::Instruction {
                                source: instruction.val().clone(),
                                resolved,
                            },
                            bytes,
                        }
                    }

                    Entry::Data(data) => {
                        let location = data.location();
                        let data = data.val();

                        let mut values = Vec::with_capacity(data.values.len());
                        for value in &data.values {
                            let value = value
                                .eval(&lookup)
                                .map_err(|error| resolution_error(error).at(location))?;

                            values.push(value);
                        }

                        let bytes = data_bytes(data.width, &values, data.size())
                            .map_err(|error| error.at(location))?;

                        Line {
                            offset: cursor,
                            location: location.clone(),
                            content: Content::Data {
                                source: data.clone(),
                                values,
                            },
                            bytes,
                        }
                    }
                };

                cursor += line.bytes.len() as u32;
                lines.push(line);
            }

            sections.push(Section {
                origin: block.origin,
                lines,
            });
        }

        self.check_rules()?;

        let mut labels: Vec<_> = self
            .labels
            .iter()
            .map(|(name, &offset)| (Rc::clone(name), offset))
            .collect();

        labels.sort_by(|(a, a_offset), (b, b_offset)| a_offset.cmp(b_offset).then(a.cmp(b)));

        log::trace!(
            "resolved {} sections with {} labels",
            sections.len(),
            labels.len()
        );

        Ok(Listing {
            sections,
            labels,
            index: self.labels.clone(),
        })
    }

    fn resolve_instruction(
        &self,
        instruction: &Instruction,
        cursor: u32,
        link_externals: bool,
    ) -> Result<Instruction, CompileError> {
        let lookup = |label: &LabelRef| self.find(label);
        let form = instruction.mnemonic().form(instruction.operands())?;

        let mut operands = Vec::with_capacity(form.len());
        for (slot, operand) in form.iter().zip(instruction.operands()) {
            let operand = match operand {
                Operand::Label(label) => {
                    let target = self
                        .find(label)
                        .ok_or_else(|| ResolutionError::LabelNotFound(label.to_string()))?;

                    let value = if slot.is_relative() {
                        (target as i32 - cursor as i32) / 2 - 1
                    } else {
                        (target / 2) as i32
                    };

                    Operand::Number(value)
                }

                Operand::Deferred(deferred) => {
                    Operand::Number(deferred.eval(&lookup).map_err(resolution_error)?)
                }

                Operand::Extern(_) if link_externals => Operand::Number(0),
                Operand::Extern(symbol) => {
                    return Err(ResolutionError::External(symbol.symbol.to_string()).into())
                }

                other => other.clone(),
            };

            operands.push(operand);
        }

        Ok(instruction.resolved(operands))
    }

    fn check_rules(&self) -> Compiled<()> {
        for rule in &self.rules {
            let find = |name: &Rc<str>| {
                self.labels.get(name).copied().ok_or_else(|| {
                    ResolutionError::MissingProbe(name.to_string()).at(&rule.location)
                })
            };

            let (start, end) = (find(&rule.start)?, find(&rule.end)?);
            let found = end.saturating_sub(start);

            if found > rule.max {
                let error = BudgetError::TooLarge {
                    max: rule.max,
                    found,
                };

                return Err(error.at(&rule.location));
            }
        }

        Ok(())
    }
}

fn resolution_error(error: DeferredError) -> ResolutionError {
    match error {
        DeferredError::Unresolved(label) => ResolutionError::LabelNotFound(label.to_string()),
        DeferredError::DivisionByZero => ResolutionError::DivisionByZero,
    }
}

fn data_bytes(width: DataWidth, values: &[i32], size: u32) -> Result<Vec<u8>, EncodingError> {
    let mut bytes = Vec::with_capacity(size as usize);
    for &value in values {
        let (min, max) = match width {
            DataWidth::Byte => (-0x80, 0xff),
            DataWidth::Word => (-0x8000, 0xffff),
            DataWidth::Dword => (i32::MIN as i64, u32::MAX as i64),
        };

        if !(min..=max).contains(&(value as i64)) {
            return Err(EncodingError::DataOutOfRange {
                width: width.size(),
                value: value as i64,
            });
        }

        let le = value.to_le_bytes();
        bytes.extend_from_slice(&le[..width.size() as usize]);
    }

    bytes.resize(size as usize, 0);
    Ok(bytes)
}

/// Resultado de la segunda pasada, de solo lectura.
#[derive(Clone, Debug)]
pub struct Listing {
    pub sections: Vec<Section>,

    /// Etiquetas ordenadas por dirección.
    pub labels: Vec<(Rc<str>, u32)>,

    index: HashMap<Rc<str>, u32>,
}

impl Listing {
    /// Nombre bajo el cual se resolvió una referencia.
    pub fn target<'a>(&'a self, label: &'a LabelRef) -> &'a Rc<str> {
        label
            .candidates()
            .find(|name| self.index.contains_key(*name))
            .unwrap_or(&label.global)
    }
}

#[derive(Clone, Debug)]
pub struct Section {
    pub origin: u32,
    pub lines: Vec<Line>,
}

impl Section {
    /// Concatena los bytes de todas las líneas de la sección.
    pub fn bytes(&self) -> Vec<u8> {
        self.lines
            .iter()
            .flat_map(|line| line.bytes.iter().copied())
            .collect()
    }

    pub fn size(&self) -> u32 {
        self.lines.iter().map(|line| line.bytes.len() as u32).sum()
    }

    /// Ubicación de la primera línea que ocupa espacio.
    pub fn location(&self) -> Option<&Location> {
        self.lines
            .iter()
            .find(|line| !line.bytes.is_empty())
            .map(|line| &line.location)
    }
}

#[derive(Clone, Debug)]
pub struct Line {
    pub offset: u32,
    pub location: Location,
    pub content: Content,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub enum Content {
    Label(Rc<str>),

    /// La instrucción original conserva sus operandos simbólicos.
    Instruction {
        source: Instruction,
        resolved: Instruction,
    },

    Data {
        source: Data,
        values: Vec<i32>,
    },
}
