//! Resolución de operandos.
//!
//! Cada expresión del árbol sintáctico se traduce a un [`Value`], que
//! es la clase de operando sobre la cual decide la selección de
//! instrucciones. Los nombres se buscan en el contexto en un orden fijo
//! (ver [`Context::lookup()`]) y las subexpresiones constantes se
//! pliegan aquí mismo, de modo que la generación de código nunca ve
//! `2 * 2` sino `4`.

use super::Context;
use crate::{
    arch::{Base, ExternRef, LabelRef, Operand, Pair, Pointer, Reg},
    ast::{AssignOp, BinaryOp, Call, DataType, Expr, PrefixOp, SuffixOp},
    device::{IoRegister, STATUS_REGISTER},
    error::{Compiled, Locate, SemanticError, Warning},
    source::{Located, Location},
};

use std::rc::Rc;

/// Variable en RAM interna.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: Rc<str>,
    pub address: u32,
    pub data_type: DataType,
    pub length: Option<u32>,
}

impl Variable {
    /// Bytes reservados.
    pub fn size(&self) -> u32 {
        self.data_type.size() * self.length.unwrap_or(1)
    }

    /// Un arreglo se usa por su dirección, no por su contenido.
    pub fn is_array(&self) -> bool {
        self.length.is_some()
    }
}

/// Variable definida en otra unidad de compilación.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternVar {
    pub symbol: Rc<str>,
    pub data_type: DataType,
    pub offset: i32,
}

impl ExternVar {
    pub fn reference(&self, offset: i32) -> ExternRef {
        ExternRef::new(Rc::clone(&self.symbol), self.offset + offset)
    }
}

/// Registro de E/S ya ubicado en el espacio de direcciones.
#[derive(Clone, Debug, PartialEq)]
pub struct Port {
    pub name: Rc<str>,
    pub address: u32,
    pub size: u32,
}

/// Operando abstracto ya resuelto.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Const(i32),
    Reg(Reg),

    /// Registros del más significativo al menos significativo.
    Group(Vec<Reg>),

    Io(Port),
    IoBit(u32, u8),
    StatusBit(u8),
    RegBit(Reg, u8),

    /// Celda de RAM direccionada por `X`, `Y` o `Z`. El operando es
    /// siempre [`Operand::Pointer`] u [`Operand::Displaced`].
    Mem(Operand),

    /// Byte de memoria de programa leído con `lpm`.
    Prg(Pointer),

    Var(Variable),

    /// Byte de RAM en una dirección fija, como `tabla[3]`.
    Cell(u32),

    Extern(ExternVar),
    Label(LabelRef),

    /// Nombre sin declaración. Puede tratarse de una etiqueta.
    Symbol(Rc<str>),

    Binary(BinaryOp, Box<Value>, Box<Value>),
    Prefix(PrefixOp, Box<Value>),
    Suffix(SuffixOp, Box<Value>),
    Assign(AssignOp, Box<Value>, Box<Value>),
    Signed(Box<Value>),
}

impl Value {
    pub fn binary(op: BinaryOp, left: Value, right: Value) -> Self {
        Value::Binary(op, Box::new(left), Box::new(right))
    }

    pub fn not(self) -> Self {
        Value::Prefix(PrefixOp::Not, Box::new(self))
    }

    /// Par de registros `alto.bajo` consecutivos.
    pub fn pair(&self) -> Option<Pair> {
        match self {
            Value::Group(regs) => pair_of(regs),
            _ => None,
        }
    }

    /// Determina si el registro participa en algún punto del árbol.
    pub fn mentions(&self, reg: Reg) -> bool {
        match self {
            Value::Reg(other) | Value::RegBit(other, _) => *other == reg,
            Value::Group(regs) => regs.contains(&reg),
            Value::Binary(_, left, right) | Value::Assign(_, left, right) => {
                left.mentions(reg) || right.mentions(reg)
            }

            Value::Prefix(_, inner) | Value::Suffix(_, inner) | Value::Signed(inner) => {
                inner.mentions(reg)
            }

            Value::Mem(operand) => match operand {
                Operand::Pointer(pointer) => {
                    let pair = pointer.base().pair();
                    pair.low() == reg || pair.high() == reg
                }

                Operand::Displaced(base, _) => base.pair().low() == reg || base.pair().high() == reg,
                _ => false,
            },

            _ => false,
        }
    }
}

/// Interpreta `[alto, bajo]` como un par.
pub fn pair_of(regs: &[Reg]) -> Option<Pair> {
    match regs {
        [high, low] if high.number() == low.number() + 1 => Pair::new(*low),
        _ => None,
    }
}

/// Error apropiado para un operando que no admite la operación.
pub fn unsupported(value: &Value) -> SemanticError {
    match value {
        Value::Symbol(name) => SemanticError::UnknownIdentifier(name.to_string()),
        _ => SemanticError::Unsupported,
    }
}

fn register(name: &str) -> Option<Value> {
    if let Ok(base) = name.parse::<Base>() {
        let pair = base.pair();
        return Some(Value::Group(vec![pair.high(), pair.low()]));
    }

    name.parse().ok().map(Value::Reg)
}

fn bit_number(value: i32, location: &Location) -> Compiled<u8> {
    if (0..8).contains(&value) {
        Ok(value as u8)
    } else {
        Err(SemanticError::BitExpected.at(location))
    }
}

impl<'a> Context<'a> {
    pub(super) fn resolve(&mut self, expr: &'a Located<Expr>) -> Compiled<Value> {
        let location = expr.location();

        let value = match expr.val() {
            Expr::Number(value) => Value::Const(*value),
            Expr::Char(c) => Value::Const(*c as i32),
            Expr::Str(_) => return Err(SemanticError::Unsupported.at(location)),
            Expr::Ident(name) => self.lookup(name, location)?,

            Expr::Register(name) => register(name).ok_or_else(|| {
                SemanticError::UnknownIdentifier(name.to_string()).at(location)
            })?,

            Expr::Group(items) => self.group(items)?,

            Expr::Binary { op, left, right } => {
                match (self.resolve(left)?, self.resolve(right)?) {
                    (Value::Const(left), Value::Const(right)) => {
                        let value = op
                            .apply(left, right)
                            .ok_or_else(|| SemanticError::DivisionByZero.at(location))?;

                        Value::Const(value)
                    }

                    (left, right) => Value::binary(*op, left, right),
                }
            }

            Expr::Prefix { op, operand } => match (op, self.resolve(operand)?) {
                (PrefixOp::Neg, Value::Const(value)) => Value::Const(value.wrapping_neg()),
                (PrefixOp::BitNot, Value::Const(value)) => Value::Const(!value),
                (PrefixOp::Not, Value::Const(value)) => Value::Const((value == 0) as i32),
                (op, value) => Value::Prefix(*op, Box::new(value)),
            },

            Expr::Suffix { op, operand } => Value::Suffix(*op, Box::new(self.resolve(operand)?)),

            Expr::Assign { op, target, value } => {
                let target = self.resolve(target)?;
                let value = self.resolve(value)?;
                Value::Assign(*op, Box::new(target), Box::new(value))
            }

            Expr::Arrow { base, member } => self.arrow(base, member)?,
            Expr::Index { base, index } => self.index(base, index)?,
            Expr::Call(call) => Value::Const(self.builtin(call)?),
            Expr::Signed(inner) => Value::Signed(Box::new(self.resolve(inner)?)),
        };

        Ok(value)
    }

    /// Resuelve una expresión que debe ser constante.
    pub(super) fn constant(&mut self, expr: &'a Located<Expr>) -> Compiled<i32> {
        match self.resolve(expr)? {
            Value::Const(value) => Ok(value),
            _ => Err(SemanticError::ConstantExpected.at(expr.location())),
        }
    }

    /// Busca un nombre.
    ///
    /// El orden es: `RAMEND`, parámetros de expansiones inline (de la
    /// más interna a la más externa), alias locales, parámetros del
    /// procedimiento actual, alias globales, registros, variables,
    /// variables externas, procedimientos y registros de E/S. Un nombre
    /// que no aparece en ninguno se entrega como [`Value::Symbol`].
    pub(super) fn lookup(&mut self, name: &Rc<str>, location: &Location) -> Compiled<Value> {
        if &**name == "RAMEND" {
            let end = self.device.ram_end().ok_or_else(|| SemanticError::NoRam.at(location))?;
            return Ok(Value::Const(end as i32));
        }

        if let Some(binding) = self.binding(name) {
            return self.resolve(binding);
        }

        if let Some(value) = register(name) {
            return Ok(value);
        }

        if let Some(var) = self.variables.get(name) {
            return Ok(Value::Var(var.clone()));
        }

        if let Some(var) = self.extern_vars.get(name) {
            return Ok(Value::Extern(var.clone()));
        }

        if self.procedures.contains_key(name) || self.extern_procedures.contains_key(name) {
            return Ok(Value::Label(LabelRef::global(Rc::clone(name))));
        }

        if let Some(io) = self.device.io_address(name) {
            let port = Port {
                name: Rc::clone(name),
                address: io.address,
                size: io.size,
            };

            return Ok(Value::Io(port));
        }

        Ok(Value::Symbol(Rc::clone(name)))
    }

    fn binding(&self, name: &str) -> Option<&'a Located<Expr>> {
        let inline = self
            .expansions
            .iter()
            .rev()
            .find_map(|expansion| expansion.procedure.param(name));

        if let Some(param) = inline {
            return Some(&param.binding);
        }

        if let Some(frame) = &self.frame {
            let alias = frame
                .scopes
                .iter()
                .rev()
                .find_map(|scope| scope.get(name).copied());

            if alias.is_some() {
                return alias;
            }

            if let Some(param) = frame.procedure.param(name) {
                return Some(&param.binding);
            }
        }

        self.aliases.get(name).copied()
    }

    fn group(&mut self, items: &'a [Located<Expr>]) -> Compiled<Value> {
        let mut regs = Vec::with_capacity(items.len());
        for item in items {
            match self.resolve(item)? {
                Value::Reg(reg) => regs.push(reg),
                Value::Group(group) => regs.extend(group),
                _ => return Err(SemanticError::RegisterOrPairExpected.at(item.location())),
            }
        }

        Ok(match regs.as_slice() {
            [reg] => Value::Reg(*reg),
            _ => Value::Group(regs),
        })
    }

    /// `mem[...]`, `prg[...]`, `reg[bit]`, `arreglo[k]` y `externa[k]`.
    fn index(&mut self, base: &'a Located<Expr>, index: &'a Located<Expr>) -> Compiled<Value> {
        let location = index.location();

        if let Expr::Ident(name) = base.val() {
            match &**name {
                "mem" => return Ok(Value::Mem(self.address(index)?)),
                "prg" => {
                    return match self.address(index)? {
                        Operand::Pointer(pointer @ Pointer::Plain(Base::Z))
                        | Operand::Pointer(pointer @ Pointer::PostIncrement(Base::Z)) => {
                            Ok(Value::Prg(pointer))
                        }

                        _ => Err(SemanticError::InvalidArgument.at(location)),
                    };
                }

                _ => (),
            }
        }

        match self.resolve(base)? {
            Value::Reg(reg) => Ok(Value::RegBit(reg, self.bit_index(index)?)),

            Value::Extern(var) => {
                let offset = self.constant(index)?;
                Ok(Value::Extern(ExternVar {
                    data_type: DataType::Byte,
                    offset: var.offset + offset,
                    ..var
                }))
            }

            Value::Var(var) => {
                let offset = self.constant(index)?;
                if offset < 0 || offset as u32 >= var.size() {
                    return Err(SemanticError::InvalidArgument.at(location));
                }

                Ok(Value::Cell(var.address + offset as u32))
            }

            other => Err(unsupported(&other).at(base.location())),
        }
    }

    /// Modos de direccionamiento de `mem[...]`.
    fn address(&mut self, index: &'a Located<Expr>) -> Compiled<Operand> {
        let location = index.location();

        let operand = match index.val() {
            Expr::Suffix {
                op: SuffixOp::Inc,
                operand,
            } => Operand::Pointer(Pointer::PostIncrement(self.base(operand)?)),

            Expr::Prefix {
                op: PrefixOp::Dec,
                operand,
            } => Operand::Pointer(Pointer::PreDecrement(self.base(operand)?)),

            Expr::Binary {
                op: BinaryOp::Add,
                left,
                right,
            } => {
                let (left, right) = (self.resolve(left)?, self.resolve(right)?);
                let (base, displacement) = match (&left, &right) {
                    (Value::Const(q), pointer) | (pointer, Value::Const(q)) => {
                        let base = pointer.pair().and_then(Pair::base);
                        (base, *q)
                    }

                    _ => (None, 0),
                };

                match base {
                    Some(base) if displacement == 0 => Operand::Pointer(Pointer::Plain(base)),
                    Some(base) if base != Base::X => Operand::Displaced(base, displacement),
                    _ => return Err(SemanticError::InvalidArgument.at(location)),
                }
            }

            _ => Operand::Pointer(Pointer::Plain(self.base(index)?)),
        };

        Ok(operand)
    }

    fn base(&mut self, expr: &'a Located<Expr>) -> Compiled<Base> {
        self.resolve(expr)?
            .pair()
            .and_then(Pair::base)
            .ok_or_else(|| SemanticError::InvalidArgument.at(expr.location()))
    }

    fn bit_index(&mut self, index: &'a Located<Expr>) -> Compiled<u8> {
        if let Expr::Ident(name) = index.val() {
            if let Some(pin) = self.pins.get(name) {
                return Ok(pin.bit);
            }
        }

        let value = self.constant(index)?;
        bit_number(value, index.location())
    }

    /// `puerto->bit`, `SREG->Z` y `pin->pin|port|ddr`.
    fn arrow(&mut self, base: &'a Located<Expr>, member: &'a Located<Expr>) -> Compiled<Value> {
        let location = member.location();
        let member_name = match member.val() {
            Expr::Ident(name) | Expr::Register(name) => Some(name),
            _ => None,
        };

        if let Expr::Ident(name) = base.val() {
            if let Some(pin) = self.pins.get(name).copied() {
                let prefix = match member_name.map(|name| &**name) {
                    Some("pin") => "PIN",
                    Some("port") => "PORT",
                    Some("ddr") => "DDR",
                    _ => return Err(SemanticError::InvalidArgument.at(location)),
                };

                let register = format!("{}{}", prefix, pin.port);
                let io = self.device.find_io(&register).ok_or_else(|| {
                    SemanticError::InvalidPin(register.clone()).at(base.location())
                })?;

                return Ok(Value::IoBit(io.address, pin.bit));
            }
        }

        let port = match self.resolve(base)? {
            Value::Io(port) => port,
            other => return Err(unsupported(&other).at(base.location())),
        };

        let bit = match member_name {
            Some(name) => self
                .device
                .find_io(&port.name)
                .and_then(|register| register.bit(name))
                .ok_or_else(|| SemanticError::UnknownBit(name.to_string()).at(location))?,

            None => {
                let value = self.constant(member)?;
                bit_number(value, location)?
            }
        };

        if &*port.name == STATUS_REGISTER {
            Ok(Value::StatusBit(bit))
        } else {
            Ok(Value::IoBit(port.address, bit))
        }
    }

    /// Funciones predefinidas, evaluadas en tiempo de compilación.
    fn builtin(&mut self, call: &'a Call) -> Compiled<i32> {
        let location = call.name.location();
        let args = call.args.as_slice();

        let single = |args: &'a [crate::ast::Argument]| match args {
            [arg] => Ok(&arg.value),
            _ => Err(SemanticError::SingleArgument(args.len()).at(location)),
        };

        match &**call.name.val() {
            "high" => Ok((self.constant(single(args)?)? >> 8) & 0xff),
            "low" => Ok(self.constant(single(args)?)? & 0xff),

            "sizeof" => {
                let arg = single(args)?;
                let var = match arg.val() {
                    Expr::Ident(name) => self.variables.get(name),
                    _ => None,
                };

                var.map(|var| var.size() as i32).ok_or_else(|| {
                    let name = match arg.val() {
                        Expr::Ident(name) => name.to_string(),
                        other => format!("{:?}", other),
                    };

                    SemanticError::VariableExpected(name).at(arg.location())
                })
            }

            "bitmask" => self.bitmask(args, location),
            name => Err(SemanticError::UnknownFunction(name.to_string()).at(location)),
        }
    }

    /// Los nombres de bit se buscan primero en el registro del bit anterior.
    fn bitmask(&mut self, args: &'a [crate::ast::Argument], location: &Location) -> Compiled<i32> {
        if args.is_empty() {
            return Err(SemanticError::NoArguments.at(location));
        }

        let mut mask = 0;
        let mut last: Option<&'a IoRegister> = None;

        for arg in args {
            let location = arg.value.location();
            let bit = match arg.value.val() {
                Expr::Ident(name) | Expr::Register(name) => self
                    .named_bit(name, &mut last)
                    .ok_or_else(|| SemanticError::UnknownBit(name.to_string()).at(location))?,

                _ => {
                    let value = self.constant(&arg.value)?;
                    bit_number(value, location)?
                }
            };

            if mask & (1 << bit) != 0 {
                self.warn(Warning::DuplicateBit(bit), location);
            }

            mask |= 1 << bit;
        }

        Ok(mask)
    }

    pub(super) fn named_bit(&self, name: &str, last: &mut Option<&'a IoRegister>) -> Option<u8> {
        if let Some(pin) = self.pins.get(name) {
            return Some(pin.bit);
        }

        if let Some(bit) = last.and_then(|register| register.bit(name)) {
            return Some(bit);
        }

        let (register, bit) = self.device.find_io_with_bit(name)?;
        *last = Some(register);

        Some(bit)
    }
}
