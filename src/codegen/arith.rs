//! Asignaciones compuestas: `+=`, `-=`, `&=`, `|=`, `^=`, `<<=` y `>>=`.
//!
//! Los grupos de registros se tratan como enteros sin signo de varios
//! bytes, con el byte menos significativo en el último registro. Las
//! sumas de constantes se expresan como restas del complemento a dos
//! porque AVR no tiene `addi`.

use super::{
    assign::extern_offset,
    byte, fold,
    resolve::{pair_of, unsupported, Value},
    Context,
};

use crate::{
    arch::{BytePart, Deferred, ExternRef, LabelRef, Mnemonic, Operand, Reg},
    ast::{AssignOp, BinaryOp},
    error::{Compiled, Locate, SemanticError, Warning},
    source::Location,
};

impl<'a> Context<'a> {
    pub(super) fn compound(
        &mut self,
        op: AssignOp,
        target: &Value,
        value: &Value,
        location: &Location,
    ) -> Compiled<()> {
        let value = fold::simplify(value.clone());

        match target {
            Value::Reg(reg) => self.compound_reg(op, *reg, &value, location),
            Value::Group(regs) => self.compound_group(op, regs, &value, location),
            Value::Signed(inner) => self.compound(op, inner, &value, location),
            other => Err(unsupported(other).at(location)),
        }
    }

    fn compound_reg(&mut self, op: AssignOp, reg: Reg, value: &Value, location: &Location) -> Compiled<()> {
        use AssignOp::*;

        match (op, value) {
            (Add, Value::Const(k)) => self.add_constant(reg, *k, location),
            (Sub, Value::Const(k)) => self.add_constant(reg, k.wrapping_neg(), location),
            (Add, Value::Reg(source)) => op!(self, location, Add, reg, *source),
            (Sub, Value::Reg(source)) => op!(self, location, Sub, reg, *source),
            (Add | Sub, Value::Binary(..)) => self.distribute(op, &Value::Reg(reg), value, location),

            (And, Value::Const(k)) => op!(self, location, Andi, reg, k & 0xff),
            (Or, Value::Const(k)) => op!(self, location, Ori, reg, k & 0xff),
            (And, Value::Reg(source)) => op!(self, location, And, reg, *source),
            (Or, Value::Reg(source)) => op!(self, location, Or, reg, *source),
            (Xor, Value::Reg(source)) => op!(self, location, Eor, reg, *source),

            (Shl | Shr, Value::Const(count)) => {
                let mnemonic = if op == Shl { Mnemonic::Lsl } else { Mnemonic::Lsr };
                match *count {
                    0 => {
                        self.warn(Warning::ZeroArgument, location);
                        Ok(())
                    }

                    1..=7 => (0..*count).try_for_each(|_| self.emit(mnemonic, vec![reg.into()], location)),
                    _ => Err(SemanticError::InvalidArgument.at(location)),
                }
            }

            (Shl | Shr, _) => Err(SemanticError::InvalidArgument.at(location)),
            (_, other) => Err(unsupported(other).at(location)),
        }
    }

    fn add_constant(&mut self, reg: Reg, delta: i32, location: &Location) -> Compiled<()> {
        match delta {
            0 => {
                self.warn(Warning::ZeroArgument, location);
                Ok(())
            }

            1 => op!(self, location, Inc, reg),
            -1 => op!(self, location, Dec, reg),
            -255..=255 => op!(self, location, Subi, reg, delta.wrapping_neg() & 0xff),
            _ => Err(SemanticError::ValueTooBig.at(location)),
        }
    }

    /// `x ±= a - b + c` se reparte en un paso por término.
    fn distribute(&mut self, op: AssignOp, target: &Value, value: &Value, location: &Location) -> Compiled<()> {
        let terms = fold::terms(value).ok_or_else(|| SemanticError::Unsupported.at(location))?;

        for (sign, term) in terms {
            let step = match (op, sign) {
                (AssignOp::Add, BinaryOp::Add) | (AssignOp::Sub, BinaryOp::Sub) => AssignOp::Add,
                _ => AssignOp::Sub,
            };

            self.compound(step, target, &term, location)?;
        }

        Ok(())
    }

    fn compound_group(&mut self, op: AssignOp, regs: &[Reg], value: &Value, location: &Location) -> Compiled<()> {
        use AssignOp::*;

        match (op, value) {
            (Add, Value::Const(k)) => self.add_group_constant(regs, *k, location),
            (Sub, Value::Const(k)) => self.add_group_constant(regs, k.wrapping_neg(), location),

            (Add | Sub, Value::Group(source)) => {
                if source.len() != regs.len() {
                    return Err(SemanticError::DifferentSizes.at(location));
                }

                let low_first = regs.iter().rev().zip(source.iter().rev()).enumerate();
                for (index, (&dest, &source)) in low_first {
                    let mnemonic = match (op, index) {
                        (Add, 0) => Mnemonic::Add,
                        (Add, _) => Mnemonic::Adc,
                        (_, 0) => Mnemonic::Sub,
                        (_, _) => Mnemonic::Sbc,
                    };

                    self.emit(mnemonic, vec![dest.into(), source.into()], location)?;
                }

                Ok(())
            }

            (Add | Sub, Value::Reg(_)) => Err(SemanticError::DifferentSizes.at(location)),

            (Add | Sub, value) => {
                if let Some(deferred) = self.deferred(value) {
                    return self.add_group_deferred(op, regs, deferred, location);
                }

                if let Some(reference) = extern_offset(value) {
                    return self.add_group_extern(op, regs, reference, location);
                }

                match value {
                    Value::Binary(..) => self.distribute(op, &Value::Group(regs.to_vec()), value, location),
                    other => Err(unsupported(other).at(location)),
                }
            }

            (And | Or, Value::Const(k)) => {
                let (mnemonic, identity) = match op {
                    And => (Mnemonic::Andi, 0xff),
                    _ => (Mnemonic::Ori, 0),
                };

                for (index, &reg) in regs.iter().rev().enumerate() {
                    let mask = byte(*k, index);
                    if mask != identity {
                        self.emit(mnemonic, vec![reg.into(), mask.into()], location)?;
                    }
                }

                Ok(())
            }

            (And | Or | Xor, Value::Group(source)) => {
                if source.len() != regs.len() {
                    return Err(SemanticError::DifferentSizes.at(location));
                }

                let mnemonic = match op {
                    And => Mnemonic::And,
                    Or => Mnemonic::Or,
                    _ => Mnemonic::Eor,
                };

                for (&dest, &source) in regs.iter().zip(source) {
                    self.emit(mnemonic, vec![dest.into(), source.into()], location)?;
                }

                Ok(())
            }

            (Shl | Shr, Value::Const(count)) => self.shift_group(op, regs, *count, location),
            (Shl | Shr, _) => Err(SemanticError::InvalidArgument.at(location)),
            (_, other) => Err(unsupported(other).at(location)),
        }
    }

    /// `adiw`/`sbiw` cuando el par lo admite, si no `subi` + `sbci`.
    fn add_group_constant(&mut self, regs: &[Reg], delta: i32, location: &Location) -> Compiled<()> {
        if delta == 0 {
            self.warn(Warning::ZeroArgument, location);
            return Ok(());
        }

        let word = pair_of(regs).filter(|pair| pair.is_word());
        match word {
            Some(pair) if (1..=63).contains(&delta) => op!(self, location, Adiw, pair, delta),
            Some(pair) if (-63..=-1).contains(&delta) => op!(self, location, Sbiw, pair, -delta),

            _ => {
                let amount = delta.wrapping_neg();
                for (index, &reg) in regs.iter().rev().enumerate() {
                    let mnemonic = if index == 0 { Mnemonic::Subi } else { Mnemonic::Sbci };
                    self.emit(mnemonic, vec![reg.into(), byte(amount, index).into()], location)?;
                }

                Ok(())
            }
        }
    }

    /// Suma o resta de una dirección que solo se conoce al resolver.
    fn add_group_deferred(
        &mut self,
        op: AssignOp,
        regs: &[Reg],
        deferred: Deferred,
        location: &Location,
    ) -> Compiled<()> {
        if let Ok(value) = deferred.eval(&|_: &LabelRef| None) {
            let delta = if op == AssignOp::Add { value } else { value.wrapping_neg() };
            return self.add_group_constant(regs, delta, location);
        }

        let amount = match op {
            AssignOp::Add => Deferred::Negate(Box::new(deferred)),
            _ => deferred,
        };

        for (index, &reg) in regs.iter().rev().enumerate() {
            let mnemonic = if index == 0 { Mnemonic::Subi } else { Mnemonic::Sbci };
            let part = amount.clone().byte(index as u32);
            self.emit(mnemonic, vec![reg.into(), part.into()], location)?;
        }

        Ok(())
    }

    fn add_group_extern(
        &mut self,
        op: AssignOp,
        regs: &[Reg],
        reference: ExternRef,
        location: &Location,
    ) -> Compiled<()> {
        let amount = match op {
            AssignOp::Add => reference.negate(),
            _ => reference,
        };

        match regs {
            [high, low] => {
                op!(self, location, Subi, *low, amount.clone().part(BytePart::Low))?;
                op!(self, location, Sbci, *high, amount.part(BytePart::High))
            }

            _ => Err(SemanticError::DifferentSizes.at(location)),
        }
    }

    /// `lsl` + `rol` hacia arriba, o `lsr` + `ror` hacia abajo.
    fn shift_group(&mut self, op: AssignOp, regs: &[Reg], count: i32, location: &Location) -> Compiled<()> {
        let bits = 8 * regs.len() as i32;

        match count {
            0 => {
                self.warn(Warning::ZeroArgument, location);
                return Ok(());
            }

            count if count < 0 || count >= bits => {
                return Err(SemanticError::InvalidArgument.at(location));
            }

            _ => (),
        }

        let order: Vec<Reg> = match op {
            AssignOp::Shl => regs.iter().rev().copied().collect(),
            _ => regs.to_vec(),
        };

        let (first, carry) = match op {
            AssignOp::Shl => (Mnemonic::Lsl, Mnemonic::Rol),
            _ => (Mnemonic::Lsr, Mnemonic::Ror),
        };

        for _ in 0..count {
            for (index, &reg) in order.iter().enumerate() {
                let mnemonic = if index == 0 { first } else { carry };
                self.emit(mnemonic, vec![Operand::Reg(reg)], location)?;
            }
        }

        Ok(())
    }
}
