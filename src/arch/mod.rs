//! Modelo del conjunto de instrucciones AVR.
//!
//! Aquí se definen los operandos concretos que puede recibir una
//! instrucción de máquina y la instrucción misma. La tabla de
//! mnemónicos, las firmas de operandos por mnemónico y la función de
//! codificación viven en [`avr`]. La generación de código usa este
//! módulo para validar operandos en el momento de emitir, y el
//! ensamblador lo usa para calcular tamaños y codificar.

use crate::ast::BinaryOp;
use std::{
    fmt::{self, Display},
    rc::Rc,
    str::FromStr,
};

mod avr;

pub use avr::{Encoding, EncodingError, Mnemonic, Slot};

/// Registro de propósito general, `r0` a `r31`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reg(u8);

impl Reg {
    pub const COUNT: u8 = 32;

    pub fn new(number: u8) -> Option<Reg> {
        if number < Reg::COUNT {
            Some(Reg(number))
        } else {
            None
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Registros que admiten operandos inmediatos (`ldi`, `cpi`, etc.).
    pub fn is_high(self) -> bool {
        self.0 >= 16
    }
}

impl FromStr for Reg {
    type Err = ();

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        const ALIASES: &[(&str, u8)] = &[
            ("xl", 26),
            ("xh", 27),
            ("yl", 28),
            ("yh", 29),
            ("zl", 30),
            ("zh", 31),
        ];

        if let Some(&(_, number)) = ALIASES
            .iter()
            .find(|(alias, _)| unicase::eq_ascii(*alias, name))
        {
            return Ok(Reg(number));
        }

        let digits = match name.as_bytes().first() {
            Some(b'r') | Some(b'R') => &name[1..],
            _ => return Err(()),
        };

        // Se rechaza "r01" y similares
        if digits.is_empty() || (digits.len() > 1 && digits.starts_with('0')) {
            return Err(());
        }

        digits.parse().ok().and_then(Reg::new).ok_or(())
    }
}

impl Display for Reg {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "r{}", self.0)
    }
}

/// Par de registros consecutivos, identificado por el registro bajo.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pair(Reg);

impl Pair {
    pub const X: Pair = Pair(Reg(26));
    pub const Y: Pair = Pair(Reg(28));
    pub const Z: Pair = Pair(Reg(30));

    /// Construye un par a partir de su registro bajo, que debe ser par.
    pub fn new(low: Reg) -> Option<Pair> {
        if low.number() % 2 == 0 {
            Some(Pair(low))
        } else {
            None
        }
    }

    pub fn low(self) -> Reg {
        self.0
    }

    pub fn high(self) -> Reg {
        Reg(self.0.number() + 1)
    }

    /// El par corresponde a un registro índice `X`, `Y` o `Z`.
    pub fn base(self) -> Option<Base> {
        match self.0.number() {
            26 => Some(Base::X),
            28 => Some(Base::Y),
            30 => Some(Base::Z),
            _ => None,
        }
    }

    /// El par admite `adiw`/`sbiw`.
    pub fn is_word(self) -> bool {
        self.0.number() >= 24
    }
}

impl Display for Pair {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base() {
            Some(base) => write!(formatter, "{}", base),
            None => write!(formatter, "{}:{}", self.high(), self.low()),
        }
    }
}

/// Registros índice.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Base {
    X,
    Y,
    Z,
}

impl Base {
    pub fn pair(self) -> Pair {
        match self {
            Base::X => Pair::X,
            Base::Y => Pair::Y,
            Base::Z => Pair::Z,
        }
    }
}

impl FromStr for Base {
    type Err = ();

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        // A diferencia de los registros simples, los índices solo se
        // reconocen en mayúscula
        match name {
            "X" => Ok(Base::X),
            "Y" => Ok(Base::Y),
            "Z" => Ok(Base::Z),
            _ => Err(()),
        }
    }
}

impl Display for Base {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Base::X => "X",
            Base::Y => "Y",
            Base::Z => "Z",
        })
    }
}

/// Modos de direccionamiento indirecto para `ld`, `st` y `lpm`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pointer {
    Plain(Base),
    PostIncrement(Base),
    PreDecrement(Base),
}

impl Pointer {
    pub fn base(self) -> Base {
        match self {
            Pointer::Plain(base) | Pointer::PostIncrement(base) | Pointer::PreDecrement(base) => {
                base
            }
        }
    }
}

impl Display for Pointer {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pointer::Plain(base) => write!(formatter, "{}", base),
            Pointer::PostIncrement(base) => write!(formatter, "{}+", base),
            Pointer::PreDecrement(base) => write!(formatter, "-{}", base),
        }
    }
}

/// Referencia simbólica a una etiqueta.
///
/// Una etiqueta referida dentro de un procedimiento puede ser local
/// (`proc@nombre`) o global (`nombre`). La forma local tiene prioridad
/// al resolver.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LabelRef {
    pub local: Option<Rc<str>>,
    pub global: Rc<str>,
}

impl LabelRef {
    pub fn global(name: Rc<str>) -> Self {
        LabelRef {
            local: None,
            global: name,
        }
    }

    pub fn scoped(local: Rc<str>, global: Rc<str>) -> Self {
        LabelRef {
            local: Some(local),
            global,
        }
    }

    /// Nombres candidatos en orden de búsqueda.
    pub fn candidates(&self) -> impl Iterator<Item = &Rc<str>> {
        self.local.iter().chain(std::iter::once(&self.global))
    }
}

impl Display for LabelRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.global)
    }
}

/// Expresión sobre direcciones de etiquetas cuyo valor solo se conoce
/// al terminar la primera pasada.
#[derive(Clone, Debug, PartialEq)]
pub enum Deferred {
    Const(i32),
    Address(LabelRef),
    Binary(BinaryOp, Box<Deferred>, Box<Deferred>),
    Negate(Box<Deferred>),
}

impl Deferred {
    pub fn binary(op: BinaryOp, left: Deferred, right: Deferred) -> Self {
        Deferred::Binary(op, Box::new(left), Box::new(right))
    }

    /// Byte bajo del valor.
    pub fn low(self) -> Self {
        Deferred::binary(BinaryOp::And, self, Deferred::Const(0xff))
    }

    /// Byte alto de un valor de 16 bits.
    pub fn high(self) -> Self {
        let shifted = Deferred::binary(BinaryOp::Shr, self, Deferred::Const(8));
        Deferred::binary(BinaryOp::And, shifted, Deferred::Const(0xff))
    }

    /// Byte `index` (0 es el menos significativo).
    pub fn byte(self, index: u32) -> Self {
        match index {
            0 => self.low(),
            _ => {
                let shifted =
                    Deferred::binary(BinaryOp::Shr, self, Deferred::Const(8 * index as i32));
                shifted.low()
            }
        }
    }

    /// Evalúa el árbol contra una tabla de etiquetas de solo lectura.
    ///
    /// En caso de fallo se retorna la referencia que no pudo resolverse.
    pub fn eval<F>(&self, lookup: &F) -> Result<i32, DeferredError>
    where
        F: Fn(&LabelRef) -> Option<u32>,
    {
        match self {
            Deferred::Const(value) => Ok(*value),

            Deferred::Address(label) => lookup(label)
                .map(|address| address as i32)
                .ok_or_else(|| DeferredError::Unresolved(label.clone())),

            Deferred::Negate(inner) => Ok(inner.eval(lookup)?.wrapping_neg()),

            Deferred::Binary(op, left, right) => {
                let (left, right) = (left.eval(lookup)?, right.eval(lookup)?);
                op.apply(left, right).ok_or(DeferredError::DivisionByZero)
            }
        }
    }
}

impl Display for Deferred {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferred::Const(value) => write!(formatter, "{}", value),
            Deferred::Address(label) => write!(formatter, "{}", label),
            Deferred::Negate(inner) => write!(formatter, "-({})", inner),
            Deferred::Binary(op, left, right) => write!(formatter, "({} {} {})", left, op, right),
        }
    }
}

/// Falla al evaluar una expresión diferida.
#[derive(Clone, Debug, PartialEq)]
pub enum DeferredError {
    Unresolved(LabelRef),
    DivisionByZero,
}

/// Selección de un byte de una dirección externa.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BytePart {
    Low,
    High,
}

/// Símbolo cuyo valor solo conoce el enlazador.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExternRef {
    pub symbol: Rc<str>,
    pub offset: i32,
    pub part: Option<BytePart>,
    pub negated: bool,
}

impl ExternRef {
    pub fn new(symbol: Rc<str>, offset: i32) -> Self {
        ExternRef {
            symbol,
            offset,
            part: None,
            negated: false,
        }
    }

    pub fn part(self, part: BytePart) -> Self {
        ExternRef {
            part: Some(part),
            ..self
        }
    }

    pub fn negate(self) -> Self {
        ExternRef {
            negated: !self.negated,
            ..self
        }
    }
}

impl Display for ExternRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut symbol = match self.offset {
            0 => self.symbol.to_string(),
            offset if offset > 0 => format!("{}+{}", self.symbol, offset),
            offset => format!("{}{}", self.symbol, offset),
        };

        if self.negated {
            symbol = format!("-({})", symbol);
        }

        match self.part {
            None => formatter.write_str(&symbol),
            Some(BytePart::Low) => write!(formatter, "lo8({})", symbol),
            Some(BytePart::High) => write!(formatter, "hi8({})", symbol),
        }
    }
}

/// Operando concreto de una instrucción.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Reg(Reg),
    Pair(Pair),
    Pointer(Pointer),
    Displaced(Base, i32),
    Number(i32),
    Label(LabelRef),
    Deferred(Deferred),
    Extern(ExternRef),
}

impl Operand {
    /// El valor del operando depende de la segunda pasada o del enlazador.
    pub fn is_symbolic(&self) -> bool {
        matches!(self, Operand::Label(_) | Operand::Deferred(_) | Operand::Extern(_))
    }
}

impl Display for Operand {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(reg) => write!(formatter, "{}", reg),
            Operand::Pair(pair) => write!(formatter, "{}", pair),
            Operand::Pointer(pointer) => write!(formatter, "{}", pointer),
            Operand::Displaced(base, offset) => write!(formatter, "{}+{}", base, offset),
            Operand::Number(value) => write!(formatter, "{}", value),
            Operand::Label(label) => write!(formatter, "{}", label),
            Operand::Deferred(deferred) => write!(formatter, "{}", deferred),
            Operand::Extern(symbol) => write!(formatter, "{}", symbol),
        }
    }
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Self {
        Operand::Reg(reg)
    }
}

impl From<Pair> for Operand {
    fn from(pair: Pair) -> Self {
        Operand::Pair(pair)
    }
}

impl From<Pointer> for Operand {
    fn from(pointer: Pointer) -> Self {
        Operand::Pointer(pointer)
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Operand::Number(value)
    }
}

impl From<LabelRef> for Operand {
    fn from(label: LabelRef) -> Self {
        Operand::Label(label)
    }
}

impl From<Deferred> for Operand {
    fn from(deferred: Deferred) -> Self {
        Operand::Deferred(deferred)
    }
}

impl From<ExternRef> for Operand {
    fn from(symbol: ExternRef) -> Self {
        Operand::Extern(symbol)
    }
}

/// Una operación de máquina ya validada.
///
/// Las instrucciones son inmutables; los operandos simbólicos se
/// sustituyen por valores numéricos en una copia durante la
/// segunda pasada del ensamblador.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    mnemonic: Mnemonic,
    operands: Vec<Operand>,
    comment: Option<Rc<str>>,
}

impl Instruction {
    /// Construye una instrucción, validando la clase y el rango de
    /// cada operando que ya tenga un valor conocido.
    pub fn new(mnemonic: Mnemonic, operands: Vec<Operand>) -> Result<Self, EncodingError> {
        avr::check(mnemonic, &operands)?;
        Ok(Instruction {
            mnemonic,
            operands,
            comment: None,
        })
    }

    pub fn with_comment(self, comment: Option<Rc<str>>) -> Self {
        Instruction { comment, ..self }
    }

    pub fn mnemonic(&self) -> Mnemonic {
        self.mnemonic
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Tamaño en bytes.
    pub fn size(&self) -> u32 {
        self.mnemonic.size()
    }

    /// Codifica la instrucción. Todo operando debe estar resuelto.
    pub fn encode(&self) -> Result<Encoding, EncodingError> {
        avr::encode(self.mnemonic, &self.operands)
    }

    /// Misma instrucción con otros operandos, ya resueltos.
    pub fn resolved(&self, operands: Vec<Operand>) -> Self {
        Instruction {
            mnemonic: self.mnemonic,
            operands,
            comment: self.comment.clone(),
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.mnemonic)?;
        for (i, operand) in self.operands.iter().enumerate() {
            let separator = if i == 0 { " " } else { ", " };
            write!(formatter, "{}{}", separator, operand)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names() {
        assert_eq!("r0".parse(), Ok(Reg(0)));
        assert_eq!("R31".parse(), Ok(Reg(31)));
        assert_eq!("ZH".parse(), Ok(Reg(31)));
        assert_eq!("xl".parse(), Ok(Reg(26)));
        assert_eq!("r32".parse::<Reg>(), Err(()));
        assert_eq!("r01".parse::<Reg>(), Err(()));
        assert_eq!("Z".parse::<Reg>(), Err(()));
        assert_eq!("".parse::<Reg>(), Err(()));
    }

    #[test]
    fn index_pairs_are_uppercase() {
        assert_eq!("X".parse(), Ok(Base::X));
        assert_eq!("Z".parse(), Ok(Base::Z));
        assert_eq!("x".parse::<Base>(), Err(()));
        assert_eq!("r11".parse::<Base>(), Err(()));
    }

    #[test]
    fn pair_display() {
        assert_eq!(Pair::new(Reg(24)).unwrap().to_string(), "r25:r24");
        assert_eq!(Pair::Z.to_string(), "Z");
        assert!(Pair::new(Reg(25)).is_none());
    }

    #[test]
    fn deferred_bytes() {
        let label = LabelRef::global("table".into());
        let lookup = |label: &LabelRef| match &*label.global {
            "table" => Some(0x1234),
            _ => None,
        };

        let address = Deferred::Address(label);
        assert_eq!(address.clone().low().eval(&lookup), Ok(0x34));
        assert_eq!(address.clone().high().eval(&lookup), Ok(0x12));

        let missing = Deferred::Address(LabelRef::global("nowhere".into()));
        assert_eq!(
            missing.eval(&lookup),
            Err(DeferredError::Unresolved(LabelRef::global("nowhere".into())))
        );
    }

    #[test]
    fn extern_display() {
        let symbol = ExternRef::new("buf".into(), 256).part(BytePart::High);
        assert_eq!(symbol.to_string(), "hi8(buf+256)");

        let negated = ExternRef::new("buf".into(), 0).negate().part(BytePart::Low);
        assert_eq!(negated.to_string(), "lo8(-(buf))");
    }

    #[test]
    fn validation_on_construction() {
        let ldi = Instruction::new(Mnemonic::Ldi, vec![Reg(1).into(), 5.into()]);
        assert!(matches!(ldi, Err(EncodingError::HighRegisterExpected(..))));

        let ldi = Instruction::new(Mnemonic::Ldi, vec![Reg(16).into(), 5.into()]).unwrap();
        assert_eq!(ldi.to_string(), "ldi r16, 5");
        assert_eq!(ldi.size(), 2);
    }
}
