//! Síntesis de asignaciones simples.
//!
//! La forma del destino decide la familia de instrucciones: un registro
//! se carga, una celda de memoria se almacena, un bit se enciende o se
//! apaga. Las expresiones se descomponen en una base y una cadena de
//! asignaciones compuestas que resuelve [`super::arith`].

use super::{
    byte, fold,
    resolve::{unsupported, Value},
    Context,
};

use crate::{
    arch::{Base, BytePart, Deferred, ExternRef, LabelRef, Operand, Pair, Pointer, Reg},
    ast::{AssignOp, BinaryOp, DataType, PrefixOp, SuffixOp},
    device::{IO_SPACE_END, LOW_IO_END},
    error::{Compiled, Locate, SemanticError},
    source::Location,
};

impl<'a> Context<'a> {
    pub(super) fn assign_op(
        &mut self,
        op: AssignOp,
        target: &Value,
        value: &Value,
        location: &Location,
    ) -> Compiled<()> {
        match op {
            AssignOp::Set => self.assign(target, value, location),
            op => self.compound(op, target, value, location),
        }
    }

    pub(super) fn assign(&mut self, target: &Value, value: &Value, location: &Location) -> Compiled<()> {
        // a = b = c
        if let Value::Assign(op, inner_target, inner_value) = value {
            self.assign_op(*op, inner_target, inner_value, location)?;
            return self.assign(target, inner_target, location);
        }

        match target {
            Value::Reg(reg) => self.assign_reg(*reg, value, location),
            Value::Group(regs) => self.assign_group(regs, value, location),
            Value::RegBit(reg, bit) => self.assign_reg_bit(*reg, *bit, value, location),
            Value::StatusBit(bit) => match value {
                Value::Const(0) => op!(self, location, Bclr, *bit as i32),
                Value::Const(1) => op!(self, location, Bset, *bit as i32),
                _ => Err(SemanticError::InvalidArgument.at(location)),
            },

            Value::IoBit(address, bit) => self.assign_io_bit(*address, *bit, value, location),
            Value::Signed(inner) => self.assign(inner, value, location),
            Value::Symbol(_) => Err(unsupported(target).at(location)),
            _ => self.store(target, value, location),
        }
    }

    /// `++x` y `--x` como sentencias.
    pub(super) fn step(&mut self, target: &Value, increment: bool, location: &Location) -> Compiled<()> {
        let op = if increment { AssignOp::Add } else { AssignOp::Sub };
        self.compound(op, target, &Value::Const(1), location)
    }

    fn assign_reg(&mut self, dest: Reg, value: &Value, location: &Location) -> Compiled<()> {
        match value {
            Value::Binary(..) => match fold::simplify(value.clone()) {
                value @ Value::Binary(..) => self.evaluate(dest, &value, location),
                value => self.load(dest, &value, location),
            },

            Value::Prefix(op @ (PrefixOp::Inc | PrefixOp::Dec), inner) => {
                self.step(inner, *op == PrefixOp::Inc, location)?;
                self.assign_reg(dest, inner, location)
            }

            Value::Suffix(op, inner) => {
                self.assign_reg(dest, inner, location)?;
                self.step(inner, *op == SuffixOp::Inc, location)
            }

            value => self.load(dest, value, location),
        }
    }

    /// Carga la base de una cadena y aplica cada paso sobre el destino.
    fn evaluate(&mut self, dest: Reg, value: &Value, location: &Location) -> Compiled<()> {
        let chain = fold::linearize(value);
        if let Value::Binary(..) = chain.base {
            return Err(SemanticError::Unsupported.at(location));
        }

        let clobbered = chain.base != Value::Reg(dest)
            && chain.steps.iter().any(|(_, operand)| operand.mentions(dest));

        if clobbered {
            return Err(SemanticError::DestinationInExpression(dest.to_string()).at(location));
        }

        self.load(dest, &chain.base, location)?;
        for (op, operand) in &chain.steps {
            let op = op
                .compound()
                .ok_or_else(|| SemanticError::Unsupported.at(location))?;

            self.compound(op, &Value::Reg(dest), operand, location)?;
        }

        Ok(())
    }

    /// Carga de un operando simple en un registro.
    pub(super) fn load(&mut self, dest: Reg, source: &Value, location: &Location) -> Compiled<()> {
        match source {
            Value::Const(value) => self.load_constant(dest, *value, location),
            Value::Reg(reg) if *reg == dest => Ok(()),
            Value::Reg(reg) => op!(self, location, Mov, dest, *reg),
            Value::Io(port) if port.size == 1 => self.read_io(dest, port.address, location),
            Value::Mem(Operand::Displaced(base, q)) => {
                op!(self, location, Ldd, dest, Operand::Displaced(*base, *q))
            }

            Value::Mem(pointer) => op!(self, location, Ld, dest, pointer.clone()),
            Value::Prg(Pointer::Plain(Base::Z)) if dest.number() == 0 => op!(self, location, Lpm),
            Value::Prg(pointer) => op!(self, location, Lpm, dest, *pointer),

            Value::Var(var) if !var.is_array() && var.data_type.size() == 1 => {
                op!(self, location, Lds, dest, var.address as i32)
            }

            Value::Cell(address) => op!(self, location, Lds, dest, *address as i32),
            Value::Extern(var) if var.data_type.size() == 1 => {
                op!(self, location, Lds, dest, var.reference(0))
            }

            Value::Prefix(PrefixOp::Neg, inner) => {
                self.register_operand(dest, inner, location)?;
                op!(self, location, Neg, dest)
            }

            Value::Prefix(PrefixOp::BitNot, inner) => {
                self.register_operand(dest, inner, location)?;
                op!(self, location, Com, dest)
            }

            Value::Signed(inner) => self.load(dest, inner, location),
            Value::Io(_) | Value::Var(_) | Value::Extern(_) | Value::Group(_) => {
                Err(SemanticError::DifferentSizes.at(location))
            }

            other => Err(unsupported(other).at(location)),
        }
    }

    fn register_operand(&mut self, dest: Reg, source: &Value, location: &Location) -> Compiled<()> {
        match source {
            Value::Reg(reg) => self.load(dest, &Value::Reg(*reg), location),
            _ => Err(SemanticError::RegisterOrPairExpected.at(location)),
        }
    }

    fn load_constant(&mut self, dest: Reg, value: i32, location: &Location) -> Compiled<()> {
        match value {
            0 => op!(self, location, Clr, dest),
            -128..=255 => op!(self, location, Ldi, dest, value & 0xff),
            _ => Err(SemanticError::ValueTooBig.at(location)),
        }
    }

    fn read_io(&mut self, dest: Reg, address: u32, location: &Location) -> Compiled<()> {
        if address <= IO_SPACE_END {
            op!(self, location, In, dest, address as i32)
        } else {
            op!(self, location, Lds, dest, address as i32)
        }
    }

    fn write_io(&mut self, address: u32, source: Reg, location: &Location) -> Compiled<()> {
        if address <= IO_SPACE_END {
            op!(self, location, Out, address as i32, source)
        } else {
            op!(self, location, Sts, address as i32, source)
        }
    }

    /// Destinos en memoria o en E/S.
    fn store(&mut self, target: &Value, value: &Value, location: &Location) -> Compiled<()> {
        match value {
            Value::Reg(reg) => self.store_reg(target, *reg, location),
            Value::Group(regs) => self.store_group(target, regs, location),

            Value::Prefix(op @ (PrefixOp::Inc | PrefixOp::Dec), inner) => {
                self.step(inner, *op == PrefixOp::Inc, location)?;
                self.store(target, inner, location)
            }

            Value::Suffix(op, inner) => {
                self.store(target, inner, location)?;
                self.step(inner, *op == SuffixOp::Inc, location)
            }

            Value::Signed(inner) => self.store(target, inner, location),
            other => Err(unsupported(other).at(location)),
        }
    }

    fn store_reg(&mut self, target: &Value, source: Reg, location: &Location) -> Compiled<()> {
        match target {
            Value::Mem(Operand::Displaced(base, q)) => {
                op!(self, location, Std, Operand::Displaced(*base, *q), source)
            }

            Value::Mem(pointer) => op!(self, location, St, pointer.clone(), source),
            Value::Io(port) if port.size == 1 => self.write_io(port.address, source, location),

            Value::Var(var) if !var.is_array() && var.data_type.size() == 1 => {
                op!(self, location, Sts, var.address as i32, source)
            }

            Value::Cell(address) => op!(self, location, Sts, *address as i32, source),
            Value::Extern(var) if var.data_type.size() == 1 => {
                op!(self, location, Sts, var.reference(0), source)
            }

            Value::Io(_) | Value::Var(_) | Value::Extern(_) => {
                Err(SemanticError::DifferentSizes.at(location))
            }

            other => Err(unsupported(other).at(location)),
        }
    }

    /// El byte alto va a la dirección más alta.
    fn store_group(&mut self, target: &Value, regs: &[Reg], location: &Location) -> Compiled<()> {
        let width = regs.len() as u32;

        match target {
            Value::Var(var) if !var.is_array() && var.data_type.size() == width => {
                for (index, &reg) in (0..width).rev().zip(regs) {
                    op!(self, location, Sts, (var.address + index) as i32, reg)?;
                }

                Ok(())
            }

            Value::Extern(var) if var.data_type.size() == width => {
                for (index, &reg) in (0..width).rev().zip(regs) {
                    op!(self, location, Sts, var.reference(index as i32), reg)?;
                }

                Ok(())
            }

            Value::Io(port) if port.size == width => {
                for (index, &reg) in (0..width).rev().zip(regs) {
                    self.write_io(port.address + index, reg, location)?;
                }

                Ok(())
            }

            Value::Var(_) | Value::Extern(_) | Value::Io(_) | Value::Cell(_) | Value::Mem(_) => {
                Err(SemanticError::DifferentSizes.at(location))
            }

            other => Err(unsupported(other).at(location)),
        }
    }

    fn assign_reg_bit(&mut self, reg: Reg, bit: u8, value: &Value, location: &Location) -> Compiled<()> {
        let mask = 1i32 << bit;

        match value {
            Value::Const(0) => op!(self, location, Cbr, reg, mask),
            Value::Const(1) => op!(self, location, Sbr, reg, mask),

            Value::RegBit(source, source_bit) => {
                op!(self, location, Bst, *source, *source_bit as i32)?;
                op!(self, location, Bld, reg, bit as i32)
            }

            _ => Err(SemanticError::InvalidArgument.at(location)),
        }
    }

    fn assign_io_bit(&mut self, address: u32, bit: u8, value: &Value, location: &Location) -> Compiled<()> {
        if address > LOW_IO_END {
            return Err(SemanticError::LowIoExpected.at(location));
        }

        let (port, bit) = (address as i32, bit as i32);

        let (source, source_bit, negated) = match value {
            Value::Const(0) => return op!(self, location, Cbi, port, bit),
            Value::Const(1) => return op!(self, location, Sbi, port, bit),
            Value::RegBit(source, source_bit) => (*source, *source_bit as i32, false),
            Value::Prefix(PrefixOp::Not, inner) => match **inner {
                Value::RegBit(source, source_bit) => (source, source_bit as i32, true),
                _ => return Err(SemanticError::InvalidArgument.at(location)),
            },

            _ => return Err(SemanticError::InvalidArgument.at(location)),
        };

        if negated {
            op!(self, location, Sbrc, source, source_bit)?;
            op!(self, location, Cbi, port, bit)?;
            op!(self, location, Sbrs, source, source_bit)?;
        } else {
            op!(self, location, Sbrs, source, source_bit)?;
            op!(self, location, Cbi, port, bit)?;
            op!(self, location, Sbrc, source, source_bit)?;
        }

        op!(self, location, Sbi, port, bit)
    }

    fn assign_group(&mut self, dest: &[Reg], value: &Value, location: &Location) -> Compiled<()> {
        let width = dest.len() as u32;

        match value {
            Value::Const(value) => self.load_group_constant(dest, *value, location),
            Value::Group(source) => self.move_group(dest, source, location),

            Value::Var(var) if var.is_array() => {
                self.load_address(dest, Deferred::Const(var.address as i32), location)
            }

            Value::Var(var) if var.data_type.size() == width => {
                for (index, &reg) in (0..width).rev().zip(dest) {
                    op!(self, location, Lds, reg, (var.address + index) as i32)?;
                }

                Ok(())
            }

            Value::Io(port) if port.size == width => {
                for (index, &reg) in (0..width).rev().zip(dest) {
                    self.read_io(reg, port.address + index, location)?;
                }

                Ok(())
            }

            Value::Extern(var) if var.data_type == DataType::Ptr && var.offset == 0 => {
                self.load_extern_address(dest, var.reference(0), location)
            }

            Value::Extern(var) if var.data_type.size() == width => {
                for (index, &reg) in (0..width).rev().zip(dest) {
                    op!(self, location, Lds, reg, var.reference(index as i32))?;
                }

                Ok(())
            }

            Value::Label(_) | Value::Symbol(_) | Value::Binary(..) => {
                let value = fold::simplify(value.clone());
                if let Some(deferred) = self.deferred(&value) {
                    return self.load_address(dest, deferred, location);
                }

                if let Some(reference) = extern_offset(&value) {
                    return self.load_extern_address(dest, reference, location);
                }

                match value {
                    Value::Binary(..) => self.evaluate_group(dest, &value, location),
                    value => self.assign_group(dest, &value, location),
                }
            }

            Value::Suffix(op, inner) => {
                self.assign_group(dest, inner, location)?;
                self.step(inner, *op == SuffixOp::Inc, location)
            }

            Value::Prefix(op @ (PrefixOp::Inc | PrefixOp::Dec), inner) => {
                self.step(inner, *op == PrefixOp::Inc, location)?;
                self.assign_group(dest, inner, location)
            }

            Value::Signed(inner) => self.assign_group(dest, inner, location),
            Value::Reg(_) | Value::Var(_) | Value::Io(_) | Value::Extern(_) => {
                Err(SemanticError::DifferentSizes.at(location))
            }

            other => Err(unsupported(other).at(location)),
        }
    }

    fn evaluate_group(&mut self, dest: &[Reg], value: &Value, location: &Location) -> Compiled<()> {
        let chain = fold::linearize(value);
        if let Value::Binary(..) = chain.base {
            return Err(SemanticError::Unsupported.at(location));
        }

        let target = Value::Group(dest.to_vec());
        if chain.base != target {
            let clobbered = dest
                .iter()
                .find(|&&reg| chain.steps.iter().any(|(_, operand)| operand.mentions(reg)));

            if let Some(reg) = clobbered {
                return Err(SemanticError::DestinationInExpression(reg.to_string()).at(location));
            }
        }

        self.assign_group(dest, &chain.base, location)?;
        for (op, operand) in &chain.steps {
            let op = op
                .compound()
                .ok_or_else(|| SemanticError::Unsupported.at(location))?;

            self.compound(op, &target, operand, location)?;
        }

        Ok(())
    }

    /// Constante por bytes, del más significativo al menos significativo.
    pub(super) fn load_group_constant(
        &mut self,
        dest: &[Reg],
        value: i32,
        location: &Location,
    ) -> Compiled<()> {
        let bits = 8 * dest.len() as u32;
        let fits = bits >= 32 || (value >= -(1 << (bits - 1)) && value < (1 << bits));

        if !fits {
            return Err(SemanticError::ValueTooBig.at(location));
        }

        for (index, &reg) in (0..dest.len()).rev().zip(dest) {
            match byte(value, index) {
                0 => op!(self, location, Clr, reg)?,
                byte => op!(self, location, Ldi, reg, byte)?,
            }
        }

        Ok(())
    }

    /// Dirección de 16 bits, posiblemente simbólica.
    fn load_address(&mut self, dest: &[Reg], address: Deferred, location: &Location) -> Compiled<()> {
        if let Ok(value) = address.eval(&|_: &LabelRef| None) {
            return self.load_group_constant(dest, value, location);
        }

        match dest {
            [high, low] => {
                op!(self, location, Ldi, *high, address.clone().high())?;
                op!(self, location, Ldi, *low, address.low())
            }

            _ => Err(SemanticError::DifferentSizes.at(location)),
        }
    }

    fn load_extern_address(
        &mut self,
        dest: &[Reg],
        reference: ExternRef,
        location: &Location,
    ) -> Compiled<()> {
        match dest {
            [high, low] => {
                op!(self, location, Ldi, *high, reference.clone().part(BytePart::High))?;
                op!(self, location, Ldi, *low, reference.part(BytePart::Low))
            }

            _ => Err(SemanticError::DifferentSizes.at(location)),
        }
    }

    /// Copia entre grupos del mismo ancho.
    fn move_group(&mut self, dest: &[Reg], source: &[Reg], location: &Location) -> Compiled<()> {
        if dest.len() != source.len() {
            return Err(SemanticError::DifferentSizes.at(location));
        }

        let mut moves: Vec<(Reg, Reg)> = dest
            .iter()
            .copied()
            .zip(source.iter().copied())
            .filter(|(dest, source)| dest != source)
            .collect();

        moves.sort_by_key(|(dest, _)| dest.number());

        let mut plan = fuse(&moves);
        if clobbers(&plan) {
            plan.reverse();
            if clobbers(&plan) {
                return Err(SemanticError::ClobberedMove.at(location));
            }
        }

        for step in plan {
            match step {
                Move::Byte(dest, source) => op!(self, location, Mov, dest, source)?,
                Move::Word(dest, source) => op!(self, location, Movw, dest, source)?,
            }
        }

        Ok(())
    }

    /// Forma diferida de un valor direccionable, si la tiene.
    pub(super) fn deferred(&self, value: &Value) -> Option<Deferred> {
        match value {
            Value::Const(value) => Some(Deferred::Const(*value)),
            Value::Label(label) => Some(Deferred::Address(label.clone())),
            Value::Symbol(name) => Some(Deferred::Address(self.label_ref(name))),
            Value::Var(var) if var.is_array() => Some(Deferred::Const(var.address as i32)),

            Value::Binary(op, left, right) if !op.is_relational() => {
                let left = self.deferred(left)?;
                let right = self.deferred(right)?;
                Some(Deferred::binary(*op, left, right))
            }

            Value::Prefix(PrefixOp::Neg, inner) => {
                Some(Deferred::Negate(Box::new(self.deferred(inner)?)))
            }

            _ => None,
        }
    }
}

/// `externo ± k` como referencia simbólica.
pub(super) fn extern_offset(value: &Value) -> Option<ExternRef> {
    let pointer = |value: &Value| match value {
        Value::Extern(var) if var.data_type == DataType::Ptr => Some(var.reference(0)),
        _ => None,
    };

    match value {
        Value::Binary(BinaryOp::Add, left, right) => match (&**left, &**right) {
            (Value::Const(k), other) | (other, Value::Const(k)) => {
                let reference = pointer(other)?;
                Some(ExternRef::new(reference.symbol, reference.offset + k))
            }

            _ => None,
        },

        Value::Binary(BinaryOp::Sub, left, right) => match **right {
            Value::Const(k) => {
                let reference = pointer(left)?;
                Some(ExternRef::new(reference.symbol, reference.offset - k))
            }

            _ => None,
        },

        other => pointer(other),
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum Move {
    Byte(Reg, Reg),
    Word(Pair, Pair),
}

impl Move {
    fn sources(self) -> Vec<Reg> {
        match self {
            Move::Byte(_, source) => vec![source],
            Move::Word(_, source) => vec![source.low(), source.high()],
        }
    }

    fn destinations(self) -> Vec<Reg> {
        match self {
            Move::Byte(dest, _) => vec![dest],
            Move::Word(dest, _) => vec![dest.low(), dest.high()],
        }
    }
}

/// Une movimientos consecutivos de pares alineados en `movw`.
fn fuse(moves: &[(Reg, Reg)]) -> Vec<Move> {
    let mut fused = Vec::with_capacity(moves.len());
    let mut moves = moves.iter().copied().peekable();

    while let Some((dest, source)) = moves.next() {
        let word = match moves.peek() {
            Some(&(next_dest, next_source))
                if next_dest.number() == dest.number() + 1
                    && next_source.number() == source.number() + 1 =>
            {
                Pair::new(dest).zip(Pair::new(source))
            }

            _ => None,
        };

        match word {
            Some((dest, source)) => {
                moves.next();
                fused.push(Move::Word(dest, source));
            }

            None => fused.push(Move::Byte(dest, source)),
        }
    }

    fused
}

/// Algún movimiento lee un registro ya sobrescrito.
fn clobbers(plan: &[Move]) -> bool {
    let mut written = Vec::new();
    for &step in plan {
        if step.sources().iter().any(|source| written.contains(source)) {
            return true;
        }

        written.extend(step.destinations());
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(number: u8) -> Reg {
        Reg::new(number).unwrap()
    }

    fn pair(low: u8) -> Pair {
        Pair::new(r(low)).unwrap()
    }

    #[test]
    fn aligned_moves_fuse() {
        // r0.r1.r2.r3 = r31.r30.r4.r5
        let moves = [(r(0), r(31)), (r(1), r(30)), (r(2), r(5)), (r(3), r(4))];
        assert_eq!(
            fuse(&moves),
            vec![
                Move::Byte(r(0), r(31)),
                Move::Byte(r(1), r(30)),
                Move::Byte(r(2), r(5)),
                Move::Byte(r(3), r(4)),
            ]
        );

        let moves = [(r(2), r(4)), (r(3), r(5))];
        assert_eq!(fuse(&moves), vec![Move::Word(pair(2), pair(4))]);
    }

    #[test]
    fn odd_registers_never_fuse() {
        let moves = [(r(1), r(3)), (r(2), r(4))];
        assert_eq!(fuse(&moves), vec![Move::Byte(r(1), r(3)), Move::Byte(r(2), r(4))]);
    }

    #[test]
    fn clobber_detection() {
        // r17.r16 = r16.r15: r16 se escribe antes de leerse
        let ascending = fuse(&[(r(16), r(15)), (r(17), r(16))]);
        assert!(clobbers(&ascending));

        let mut descending = ascending;
        descending.reverse();
        assert!(!clobbers(&descending));

        // Intercambio: ningún orden funciona
        let mut swap = fuse(&[(r(16), r(17)), (r(17), r(16))]);
        assert!(clobbers(&swap));
        swap.reverse();
        assert!(clobbers(&swap));
    }

    #[test]
    fn extern_pointer_offsets() {
        use crate::codegen::resolve::ExternVar;

        let buffer = Value::Extern(ExternVar {
            symbol: "buf".into(),
            data_type: DataType::Ptr,
            offset: 0,
        });

        let plus = Value::binary(BinaryOp::Add, buffer.clone(), Value::Const(0x100));
        assert_eq!(extern_offset(&plus), Some(ExternRef::new("buf".into(), 256)));

        let minus = Value::binary(BinaryOp::Sub, buffer.clone(), Value::Const(2));
        assert_eq!(extern_offset(&minus), Some(ExternRef::new("buf".into(), -2)));

        let other = Value::binary(BinaryOp::Add, buffer, Value::Reg(r(3)));
        assert_eq!(extern_offset(&other), None);
    }
}
