//! Condicionales.
//!
//! Toda condición se reduce a la forma canónica `if (c) goto L`. Las
//! conjunciones, disyunciones y negaciones se descomponen con una tabla
//! de reglas en secuencias de saltos simples que preservan la evaluación
//! en cortocircuito de izquierda a derecha. Un salto simple es una
//! comparación seguida de un branch, o una instrucción de salto
//! condicional (`sbrc`, `sbic`, `cpse`) seguida de `rjmp`.

use super::{
    resolve::{unsupported, Value},
    Context,
};

use crate::{
    arch::{LabelRef, Mnemonic, Operand, Reg},
    ast::{BinaryOp, Expr, PrefixOp, Statement},
    device::LOW_IO_END,
    error::{Compiled, Locate, SemanticError},
    source::{Located, Location},
};

use std::rc::Rc;

/// Destino de una rama en una descomposición.
#[derive(Copy, Clone, Debug, PartialEq)]
enum Target {
    /// El destino original de la condición.
    Jump,

    /// El final de la secuencia: la condición completa es falsa.
    End,
}

#[derive(Clone, Debug, PartialEq)]
struct Branch {
    condition: Value,
    target: Target,
}

type Rule = fn(&Value) -> Option<Vec<Branch>>;

const RULES: &[(&str, Rule)] = &[
    ("and", and),
    ("or", or),
    ("not_and", not_and),
    ("not_or", not_or),
    ("not_not", not_not),
];

fn branch(condition: Value, target: Target) -> Branch {
    Branch { condition, target }
}

fn operands(value: &Value, op: BinaryOp) -> Option<(Value, Value)> {
    match value {
        Value::Binary(found, left, right) if *found == op => Some(((**left).clone(), (**right).clone())),
        _ => None,
    }
}

fn negated(value: &Value) -> Option<&Value> {
    match value {
        Value::Prefix(PrefixOp::Not, inner) => Some(inner),
        _ => None,
    }
}

/// `a && b` → `!a → fin; b → L`
fn and(value: &Value) -> Option<Vec<Branch>> {
    let (a, b) = operands(value, BinaryOp::LogicalAnd)?;
    Some(vec![branch(a.not(), Target::End), branch(b, Target::Jump)])
}

/// `a || b` → `a → L; b → L`
fn or(value: &Value) -> Option<Vec<Branch>> {
    let (a, b) = operands(value, BinaryOp::LogicalOr)?;
    Some(vec![branch(a, Target::Jump), branch(b, Target::Jump)])
}

/// `!(a && b)` → `!a → L; !b → L`
fn not_and(value: &Value) -> Option<Vec<Branch>> {
    let (a, b) = operands(negated(value)?, BinaryOp::LogicalAnd)?;
    Some(vec![branch(a.not(), Target::Jump), branch(b.not(), Target::Jump)])
}

/// `!(a || b)` → `a → fin; !b → L`
fn not_or(value: &Value) -> Option<Vec<Branch>> {
    let (a, b) = operands(negated(value)?, BinaryOp::LogicalOr)?;
    Some(vec![branch(a, Target::End), branch(b.not(), Target::Jump)])
}

/// `!!a` → `a → L`
fn not_not(value: &Value) -> Option<Vec<Branch>> {
    let inner = negated(negated(value)?)?;
    Some(vec![branch(inner.clone(), Target::Jump)])
}

fn decompose(value: &Value) -> Option<(&'static str, Vec<Branch>)> {
    RULES
        .iter()
        .find_map(|&(name, rule)| rule(value).map(|branches| (name, branches)))
}

/// `a > b` es `b < a`.
fn mirror(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Ge => BinaryOp::Le,
        other => other,
    }
}

fn is_empty(statement: &Statement) -> bool {
    match statement {
        Statement::Block(statements) => statements.iter().all(|statement| is_empty(statement.val())),
        _ => false,
    }
}

fn is_short_asm(statement: &Statement) -> bool {
    match statement {
        Statement::Asm(instruction) => instruction
            .mnemonic
            .val()
            .parse::<Mnemonic>()
            .map_or(false, |mnemonic| mnemonic.size() == 2),

        _ => false,
    }
}

/// Cuerpos que caben, en principio, en una sola palabra.
fn is_skippable(statement: &Statement) -> bool {
    match statement {
        Statement::Expr(Expr::Assign { value, .. }) => !matches!(value.val(), Expr::Binary { .. }),
        Statement::Expr(Expr::Prefix {
            op: PrefixOp::Inc | PrefixOp::Dec,
            ..
        })
        | Statement::Expr(Expr::Suffix { .. }) => true,
        other => is_short_asm(other),
    }
}

impl<'a> Context<'a> {
    pub(super) fn if_statement(
        &mut self,
        condition: &'a Located<Expr>,
        then: &'a Located<Statement>,
        otherwise: Option<&'a Located<Statement>>,
        location: &Location,
    ) -> Compiled<()> {
        let condition = self.resolve(condition)?;
        let prefix = self.generated("if", location).to_string();

        let jump = match then.val() {
            Statement::Goto(name) => Some(self.label_ref(name)),
            statement @ (Statement::Break | Statement::Continue) => {
                Some(self.loop_target(statement, then.location())?)
            }

            _ => None,
        };

        if let Some(target) = jump {
            self.if_goto(&condition, &target, &prefix, location)?;
            return match otherwise {
                Some(otherwise) => self.statement(otherwise),
                None => Ok(()),
            };
        }

        let otherwise = otherwise.filter(|statement| !is_empty(statement.val()));
        if otherwise.is_none() {
            if let Some((mnemonic, first, second)) = self.skip_idiom(&condition, then.val()) {
                self.emit(mnemonic, vec![first, second], location)?;
                return self.compile_limited(1, 2, then.location(), |context| context.statement(then));
            }
        }

        let end = self.generated("if_end", location);
        let end_ref = LabelRef::global(Rc::clone(&end));

        match otherwise {
            None => {
                self.if_goto(&condition.not(), &end_ref, &prefix, location)?;
                self.statement(then)?;
            }

            Some(otherwise) if is_empty(then.val()) => {
                self.if_goto(&condition, &end_ref, &prefix, location)?;
                self.statement(otherwise)?;
            }

            Some(otherwise) => {
                let other = self.generated("if_else", location);

                let other_ref = LabelRef::global(Rc::clone(&other));
                self.if_goto(&condition.not(), &other_ref, &prefix, location)?;
                self.statement(then)?;
                op!(self, location, Rjmp, end_ref)?;

                self.define(other, location)?;
                self.statement(otherwise)?;
            }
        }

        self.define(end, location)
    }

    /// Instrucción de salto condicional que omite un cuerpo de una palabra.
    ///
    /// Un cuerpo entre llaves nunca se omite: sigue el camino de salto y etiqueta.
    fn skip_idiom(&self, condition: &Value, body: &Statement) -> Option<(Mnemonic, Operand, Operand)> {
        let (condition, negated) = match condition {
            Value::Prefix(PrefixOp::Not, inner) => (&**inner, true),
            other => (other, false),
        };

        let idiom = match (condition, negated) {
            (Value::RegBit(reg, bit), false) if is_skippable(body) => {
                (Mnemonic::Sbrc, Operand::Reg(*reg), Operand::Number(*bit as i32))
            }

            (Value::RegBit(reg, bit), true) if is_skippable(body) => {
                (Mnemonic::Sbrs, Operand::Reg(*reg), Operand::Number(*bit as i32))
            }

            (Value::IoBit(address, bit), _) if *address <= LOW_IO_END && is_skippable(body) => {
                let mnemonic = if negated { Mnemonic::Sbis } else { Mnemonic::Sbic };
                (mnemonic, Operand::Number(*address as i32), Operand::Number(*bit as i32))
            }

            (Value::Binary(BinaryOp::Ne, left, right), false) if is_short_asm(body) => {
                match (&**left, &**right) {
                    (Value::Reg(left), Value::Reg(right)) => {
                        (Mnemonic::Cpse, Operand::Reg(*left), Operand::Reg(*right))
                    }

                    _ => return None,
                }
            }

            _ => return None,
        };

        Some(idiom)
    }

    /// Descompone `if (c) goto L` en saltos simples.
    pub(super) fn if_goto(
        &mut self,
        condition: &Value,
        target: &LabelRef,
        prefix: &str,
        location: &Location,
    ) -> Compiled<()> {
        let (name, branches) = match decompose(condition) {
            Some(decomposition) => decomposition,
            None => return self.simple_if_goto(condition, target, false, location),
        };

        let end: Rc<str> = format!("{}@end", prefix).into();
        let mut ends = false;

        for (index, branch) in branches.into_iter().enumerate() {
            let nested = format!("{}@{}{}", prefix, name, index + 1);
            let goto = match branch.target {
                Target::Jump => target.clone(),
                Target::End => {
                    ends = true;
                    LabelRef::global(Rc::clone(&end))
                }
            };

            self.if_goto(&branch.condition, &goto, &nested, location)?;
        }

        if ends {
            self.define(end, location)?;
        }

        Ok(())
    }

    fn simple_if_goto(
        &mut self,
        condition: &Value,
        target: &LabelRef,
        signed: bool,
        location: &Location,
    ) -> Compiled<()> {
        match condition {
            Value::Signed(inner) => self.simple_if_goto(inner, target, true, location),

            Value::Binary(op, left, right) if op.is_relational() => {
                self.compare(*op, left, right, signed, target, location)
            }

            Value::RegBit(reg, bit) => self.skip_jump(Mnemonic::Sbrc, (*reg).into(), *bit, target, location),

            Value::IoBit(address, bit) => {
                let port = self.low_io(*address, location)?;
                self.skip_jump(Mnemonic::Sbic, port, *bit, target, location)
            }

            Value::StatusBit(bit) => op!(self, location, Brbs, *bit as i32, target.clone()),

            Value::Reg(reg) => {
                op!(self, location, Tst, *reg)?;
                op!(self, location, Brne, target.clone())
            }

            Value::Const(0) => Ok(()),
            Value::Const(_) => op!(self, location, Rjmp, target.clone()),

            Value::Prefix(PrefixOp::Not, inner) => match &**inner {
                Value::Signed(inner) => {
                    let negated = (**inner).clone().not();
                    self.simple_if_goto(&negated, target, true, location)
                }

                Value::Binary(op, left, right) if op.is_relational() => {
                    let op = op
                        .inverse()
                        .ok_or_else(|| SemanticError::Unsupported.at(location))?;

                    self.compare(op, left, right, signed, target, location)
                }

                Value::RegBit(reg, bit) => {
                    self.skip_jump(Mnemonic::Sbrs, (*reg).into(), *bit, target, location)
                }

                Value::IoBit(address, bit) => {
                    let port = self.low_io(*address, location)?;
                    self.skip_jump(Mnemonic::Sbis, port, *bit, target, location)
                }

                Value::StatusBit(bit) => op!(self, location, Brbc, *bit as i32, target.clone()),

                Value::Reg(reg) => {
                    op!(self, location, Tst, *reg)?;
                    op!(self, location, Breq, target.clone())
                }

                Value::Const(0) => op!(self, location, Rjmp, target.clone()),
                Value::Const(_) => Ok(()),
                other => Err(unsupported(other).at(location)),
            },

            other => Err(unsupported(other).at(location)),
        }
    }

    fn low_io(&self, address: u32, location: &Location) -> Compiled<Operand> {
        if address > LOW_IO_END {
            return Err(SemanticError::LowIoExpected.at(location));
        }

        Ok(Operand::Number(address as i32))
    }

    fn skip_jump(
        &mut self,
        mnemonic: Mnemonic,
        operand: Operand,
        bit: u8,
        target: &LabelRef,
        location: &Location,
    ) -> Compiled<()> {
        self.emit(mnemonic, vec![operand, Operand::Number(bit as i32)], location)?;
        op!(self, location, Rjmp, target.clone())
    }

    fn compare(
        &mut self,
        op: BinaryOp,
        left: &Value,
        right: &Value,
        signed: bool,
        target: &LabelRef,
        location: &Location,
    ) -> Compiled<()> {
        match (left, right) {
            (Value::Reg(reg), Value::Const(k)) => {
                self.compare_constant(op, *reg, *k, signed, target, location)
            }

            (Value::Const(k), Value::Reg(reg)) => {
                self.compare_constant(mirror(op), *reg, *k, signed, target, location)
            }

            (Value::Reg(left), Value::Reg(right)) => {
                self.compare_registers(op, &[*left], &[*right], signed, target, location)
            }

            (Value::Group(left), Value::Group(right)) if left.len() == right.len() => {
                self.compare_registers(op, left, right, signed, target, location)
            }

            (Value::Group(_), Value::Group(_)) => Err(SemanticError::DifferentSizes.at(location)),
            (Value::Reg(_) | Value::Group(_), other) => Err(unsupported(other).at(location)),
            (other, _) => Err(unsupported(other).at(location)),
        }
    }

    fn compare_constant(
        &mut self,
        op: BinaryOp,
        reg: Reg,
        k: i32,
        signed: bool,
        target: &LabelRef,
        location: &Location,
    ) -> Compiled<()> {
        let (op, k) = match op {
            BinaryOp::Gt => (BinaryOp::Ge, k + 1),
            BinaryOp::Le => (BinaryOp::Lt, k + 1),
            op => (op, k),
        };

        if k == 0 {
            op!(self, location, Tst, reg)?;
        } else {
            op!(self, location, Cpi, reg, k)?;
        }

        let branch = match op {
            BinaryOp::Eq => Mnemonic::Breq,
            BinaryOp::Ne => Mnemonic::Brne,
            BinaryOp::Lt if k == 0 => Mnemonic::Brmi,
            BinaryOp::Lt if signed => Mnemonic::Brlt,
            BinaryOp::Lt => Mnemonic::Brlo,
            BinaryOp::Ge if k == 0 => Mnemonic::Brpl,
            BinaryOp::Ge if signed => Mnemonic::Brge,
            BinaryOp::Ge => Mnemonic::Brsh,
            _ => return Err(SemanticError::Unsupported.at(location)),
        };

        self.emit(branch, vec![target.clone().into()], location)
    }

    /// Registros comparados del byte bajo al alto.
    fn compare_registers(
        &mut self,
        op: BinaryOp,
        left: &[Reg],
        right: &[Reg],
        signed: bool,
        target: &LabelRef,
        location: &Location,
    ) -> Compiled<()> {
        let (op, left, right) = match op {
            BinaryOp::Gt => (BinaryOp::Lt, right, left),
            BinaryOp::Le => (BinaryOp::Ge, right, left),
            op => (op, left, right),
        };

        if let (BinaryOp::Ne, [left], [right]) = (op, left, right) {
            op!(self, location, Cpse, *left, *right)?;
            return op!(self, location, Rjmp, target.clone());
        }

        let low_first = left.iter().rev().zip(right.iter().rev()).enumerate();
        for (index, (&left, &right)) in low_first {
            let mnemonic = if index == 0 { Mnemonic::Cp } else { Mnemonic::Cpc };
            self.emit(mnemonic, vec![left.into(), right.into()], location)?;
        }

        let branch = match op {
            BinaryOp::Eq => Mnemonic::Breq,
            BinaryOp::Ne => Mnemonic::Brne,
            BinaryOp::Lt if signed => Mnemonic::Brlt,
            BinaryOp::Lt => Mnemonic::Brlo,
            BinaryOp::Ge if signed => Mnemonic::Brge,
            BinaryOp::Ge => Mnemonic::Brsh,
            _ => return Err(SemanticError::Unsupported.at(location)),
        };

        self.emit(branch, vec![target.clone().into()], location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bit(number: u8) -> Value {
        Value::RegBit(Reg::new(16).unwrap(), number)
    }

    fn targets(branches: &[Branch]) -> Vec<Target> {
        branches.iter().map(|branch| branch.target).collect()
    }

    #[test]
    fn conjunction_jumps_to_end_first() {
        let value = Value::binary(BinaryOp::LogicalAnd, bit(0), bit(1));
        let (name, branches) = decompose(&value).unwrap();

        assert_eq!(name, "and");
        assert_eq!(targets(&branches), vec![Target::End, Target::Jump]);
        assert_eq!(branches[0].condition, bit(0).not());
        assert_eq!(branches[1].condition, bit(1));
    }

    #[test]
    fn disjunction_keeps_order() {
        let value = Value::binary(BinaryOp::LogicalOr, bit(0), bit(1));
        let (name, branches) = decompose(&value).unwrap();

        assert_eq!(name, "or");
        assert_eq!(targets(&branches), vec![Target::Jump, Target::Jump]);
    }

    #[test]
    fn negations_follow_de_morgan() {
        let value = Value::binary(BinaryOp::LogicalAnd, bit(0), bit(1)).not();
        let (name, branches) = decompose(&value).unwrap();
        assert_eq!(name, "not_and");
        assert_eq!(branches[0].condition, bit(0).not());
        assert_eq!(branches[1].condition, bit(1).not());

        let value = Value::binary(BinaryOp::LogicalOr, bit(0), bit(1)).not();
        let (name, branches) = decompose(&value).unwrap();
        assert_eq!(name, "not_or");
        assert_eq!(targets(&branches), vec![Target::End, Target::Jump]);
        assert_eq!(branches[1].condition, bit(1).not());
    }

    #[test]
    fn double_negation_cancels() {
        let (name, branches) = decompose(&bit(3).not().not()).unwrap();
        assert_eq!(name, "not_not");
        assert_eq!(branches, vec![branch(bit(3), Target::Jump)]);
    }

    #[test]
    fn simple_conditions_are_not_decomposed() {
        assert!(decompose(&bit(0)).is_none());
        assert!(decompose(&bit(0).not()).is_none());
    }
}
