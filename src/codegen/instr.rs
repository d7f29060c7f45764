//! Instrucciones escritas literalmente y tabla de vectores.
//!
//! Los operandos de una instrucción literal se resuelven según la ranura
//! que ocupan: un puerto en una ranura de E/S es su dirección, un nombre
//! en una ranura de salto es una etiqueta y un nombre en una ranura de
//! bit se busca entre los bits del registro de E/S del operando anterior.

use super::{
    assign::extern_offset,
    resolve::{pair_of, unsupported, Value},
    Context,
};

use crate::{
    arch::{Base, LabelRef, Mnemonic, Operand, Pair, Pointer, Slot},
    ast::{AsmInstruction, BinaryOp, Expr, PrefixOp, SuffixOp, Vectors},
    device::IoRegister,
    error::{Compiled, Locate, SemanticError},
    source::Located,
};

use std::rc::Rc;

impl<'a> Context<'a> {
    /// Emite una instrucción literal y retorna su tamaño en bytes.
    pub(super) fn asm(&mut self, instruction: &'a AsmInstruction) -> Compiled<u32> {
        let name = instruction.mnemonic.val();
        let location = instruction.mnemonic.location();

        let mnemonic: Mnemonic = name
            .parse()
            .map_err(|()| SemanticError::UnknownMnemonic(name.to_string()).at(location))?;

        let count = instruction.operands.len();
        let slots = mnemonic
            .signatures()
            .iter()
            .find(|form| form.len() == count)
            .copied()
            .unwrap_or(&[]);

        let mut last_io = None;
        let mut operands = Vec::with_capacity(count);

        for (index, operand) in instruction.operands.iter().enumerate() {
            let slot = slots.get(index).copied();
            operands.push(self.asm_operand(operand, slot, &mut last_io)?);
        }

        self.emit(mnemonic, operands, location)?;
        Ok(mnemonic.size())
    }

    fn asm_operand(
        &mut self,
        operand: &'a Located<Expr>,
        slot: Option<Slot>,
        last_io: &mut Option<&'a IoRegister>,
    ) -> Compiled<Operand> {
        let location = operand.location();

        match (slot, operand.val()) {
            (Some(Slot::Rel7 | Slot::Rel12 | Slot::Abs22), Expr::Call(call)) => {
                let name = call.name.val();
                let procedure = self
                    .procedures
                    .get(name)
                    .or_else(|| self.extern_procedures.get(name))
                    .copied()
                    .ok_or_else(|| SemanticError::UnknownFunction(name.to_string()).at(location))?;

                self.bind_arguments(procedure, call, location)?;
                return Ok(Operand::Label(LabelRef::global(Rc::clone(name))));
            }

            (Some(Slot::Pointer | Slot::LpmZ), Expr::Suffix { op: SuffixOp::Inc, operand }) => {
                let base = self.pointer_base(operand)?;
                return Ok(Operand::Pointer(Pointer::PostIncrement(base)));
            }

            (Some(Slot::Pointer), Expr::Prefix { op: PrefixOp::Dec, operand }) => {
                let base = self.pointer_base(operand)?;
                return Ok(Operand::Pointer(Pointer::PreDecrement(base)));
            }

            (Some(Slot::Bit), Expr::Ident(name)) => {
                if let Some(bit) = self.named_bit(name, last_io) {
                    return Ok(Operand::Number(bit as i32));
                }
            }

            _ => (),
        }

        let value = self.resolve(operand)?;
        if let (Some(Slot::Displaced), Value::Binary(BinaryOp::Add, left, right)) = (slot, &value) {
            let displaced = match (&**left, &**right) {
                (Value::Const(q), pointer) | (pointer, Value::Const(q)) => {
                    pointer.pair().and_then(Pair::base).map(|base| Operand::Displaced(base, *q))
                }

                _ => None,
            };

            return displaced.ok_or_else(|| SemanticError::InvalidArgument.at(location));
        }

        let operand = match value {
            Value::Const(value) => Operand::Number(value),
            Value::Reg(reg) => Operand::Reg(reg),

            Value::Group(regs) => {
                let pair = pair_of(&regs)
                    .ok_or_else(|| SemanticError::RegisterOrPairExpected.at(location))?;

                match (slot, pair.base()) {
                    (Some(Slot::Pointer | Slot::LpmZ), Some(base)) => {
                        Operand::Pointer(Pointer::Plain(base))
                    }

                    (Some(Slot::Displaced), Some(base)) => Operand::Displaced(base, 0),

                    _ => Operand::Pair(pair),
                }
            }

            Value::Io(port) => {
                *last_io = self.device.find_io(&port.name);
                Operand::Number(port.address as i32)
            }

            Value::Var(var) => Operand::Number(var.address as i32),
            Value::Cell(address) => Operand::Number(address as i32),
            Value::Extern(var) => Operand::Extern(var.reference(0)),
            Value::Label(label) => Operand::Label(label),

            Value::Symbol(name) => match slot {
                Some(Slot::Rel7 | Slot::Rel12 | Slot::Abs22 | Slot::Imm8) | None => {
                    Operand::Label(self.label_ref(&name))
                }

                Some(Slot::Bit) => {
                    return Err(SemanticError::UnknownBit(name.to_string()).at(location));
                }

                _ => return Err(SemanticError::UnknownIdentifier(name.to_string()).at(location)),
            },

            value @ Value::Binary(..) => {
                if let Some(reference) = extern_offset(&value) {
                    Operand::Extern(reference)
                } else {
                    let deferred = self
                        .deferred(&value)
                        .ok_or_else(|| SemanticError::InvalidArgument.at(location))?;

                    Operand::Deferred(deferred)
                }
            }

            other => return Err(unsupported(&other).at(location)),
        };

        Ok(operand)
    }

    fn pointer_base(&mut self, expr: &'a Located<Expr>) -> Compiled<Base> {
        self.resolve(expr)?
            .pair()
            .and_then(Pair::base)
            .ok_or_else(|| SemanticError::InvalidArgument.at(expr.location()))
    }

    /// Tabla de vectores de interrupción.
    ///
    /// Cada vector ocupa exactamente su ranura: una instrucción y
    /// relleno de `nop` hasta el ancho de la ranura.
    pub(super) fn vectors(&mut self, table: &'a Located<Vectors>) -> Compiled<()> {
        let device = self.device;
        let entries = &table.val().entries;

        for entry in entries {
            let name = entry.name.val();
            if &**name != "default" && device.interrupt(name).is_none() {
                let error = SemanticError::UnknownVector(name.to_string());
                return Err(error.at(entry.name.location()));
            }
        }

        let default = entries.iter().find(|entry| &**entry.name.val() == "default");
        let main = self.procedures.contains_key("main");

        for (index, interrupt) in device.interrupts.iter().enumerate() {
            let slot = device.vector_slot_size(index);
            let explicit = entries
                .iter()
                .find(|entry| &**entry.name.val() == interrupt.name.as_str());

            self.comment = Some(interrupt.name.as_str().into());

            let reset = interrupt.name == "RESET" && main;
            let chosen = match explicit {
                Some(entry) => Some(entry),
                None if reset => None,
                None => default,
            };

            let mut size = 0;
            let location = table.location();
            let result = self.compile_limited(1, slot, location, |context| {
                size = match chosen {
                    Some(entry) => context.asm(entry.instruction.val())?,

                    None if reset => {
                        op!(context, location, Rjmp, LabelRef::global("main".into()))?;
                        Mnemonic::Rjmp.size()
                    }

                    None => {
                        op!(context, location, Reti)?;
                        Mnemonic::Reti.size()
                    }
                };

                Ok(())
            });

            self.comment = None;
            result?;

            for _ in (size..slot).step_by(2) {
                op!(self, table.location(), Nop)?;
            }
        }

        Ok(())
    }
}
