//! Ciclos `loop` y `do ... while`.

use super::{
    resolve::{pair_of, Value},
    Context, LoopLabels,
};

use crate::{
    arch::{LabelRef, Pair, Reg},
    ast::{AssignOp, Expr, PrefixOp, Statement},
    device::LOW_IO_END,
    error::{Compiled, Locate, SemanticError},
    source::{Located, Location},
};

use std::rc::Rc;

/// Variable de control de un ciclo con contador.
enum Counter {
    Reg(Reg),
    Pair(Pair),
    IoBit { port: u32, bit: u8, negated: bool },
}

/// Determina si un cuerpo contiene un `continue` que aplica a este ciclo.
fn continues(statements: &[Located<Statement>]) -> bool {
    statements.iter().any(|statement| match statement.val() {
        Statement::Continue => true,
        Statement::If {
            then, otherwise, ..
        } => {
            continues(std::slice::from_ref(&**then))
                || otherwise
                    .as_deref()
                    .map_or(false, |otherwise| continues(std::slice::from_ref(otherwise)))
        }

        Statement::Block(body) | Statement::SaveRegs { body, .. } => continues(body),
        _ => false,
    })
}

impl<'a> Context<'a> {
    pub(super) fn loop_statement(
        &mut self,
        condition: Option<&'a Located<Expr>>,
        body: &'a [Located<Statement>],
        location: &Location,
    ) -> Compiled<()> {
        let start = self.generated("loop", location);
        let end = self.generated("loopEnd", location);

        let condition = match condition {
            None => {
                self.define(Rc::clone(&start), location)?;
                self.loop_body(&start, &start, &end, body)?;
                op!(self, location, Rjmp, LabelRef::global(Rc::clone(&start)))?;

                return self.define(end, location);
            }

            Some(condition) => condition,
        };

        let counter = self.counter(condition)?;

        // `continue` no debe saltarse la actualización del contador
        let next = if continues(body) {
            self.generated("loopNext", location)
        } else {
            Rc::clone(&start)
        };

        self.define(Rc::clone(&start), location)?;
        self.loop_body(&next, &start, &end, body)?;

        if !Rc::ptr_eq(&next, &start) {
            self.define(next, location)?;
        }

        let start = LabelRef::global(start);
        match counter {
            Counter::Reg(reg) => {
                op!(self, location, Dec, reg)?;
                op!(self, location, Brne, start)?;
            }

            Counter::Pair(pair) => {
                op!(self, location, Sbiw, pair, 1)?;
                op!(self, location, Brne, start)?;
            }

            Counter::IoBit { port, bit, negated } => {
                let (port, bit) = (port as i32, bit as i32);
                if negated {
                    op!(self, location, Sbis, port, bit)?;
                } else {
                    op!(self, location, Sbic, port, bit)?;
                }

                op!(self, location, Rjmp, start)?;
            }
        }

        self.define(end, location)
    }

    pub(super) fn do_while(
        &mut self,
        body: &'a [Located<Statement>],
        condition: &'a Located<Expr>,
        location: &Location,
    ) -> Compiled<()> {
        let start = self.generated("do", location);
        let end = self.generated("doEnd", location);

        let next = if continues(body) {
            self.generated("doNext", location)
        } else {
            Rc::clone(&start)
        };

        self.define(Rc::clone(&start), location)?;
        self.loop_body(&next, &start, &end, body)?;

        if !Rc::ptr_eq(&next, &start) {
            self.define(next, location)?;
        }

        let condition = self.resolve(condition)?;
        let prefix = self.generated("while", location).to_string();

        self.if_goto(&condition, &LabelRef::global(start), &prefix, location)?;
        self.define(end, location)
    }

    fn loop_body(
        &mut self,
        next: &Rc<str>,
        start: &Rc<str>,
        end: &Rc<str>,
        body: &'a [Located<Statement>],
    ) -> Compiled<()> {
        log::trace!("entering loop {}", start);

        self.loops.push(LoopLabels {
            next: Rc::clone(next),
            end: Rc::clone(end),
        });

        let result = self.block(body);
        self.loops.pop();

        result
    }

    /// Inicializa y clasifica la variable de control.
    fn counter(&mut self, condition: &'a Located<Expr>) -> Compiled<Counter> {
        let location = condition.location();

        let counter = match condition.val() {
            Expr::Assign {
                op: AssignOp::Set,
                target,
                value,
            } => {
                let counter = self.resolve(target)?;
                let count = self.constant(value)?;

                let limit = match &counter {
                    Value::Reg(_) => 0x100,
                    Value::Group(regs) if word_pair(regs).is_some() => 0x1_0000,
                    _ => return Err(SemanticError::RegisterOrPairExpected.at(target.location())),
                };

                let initial = match count {
                    count if count == limit => 0,
                    count if (0..limit).contains(&count) => count,
                    _ => return Err(SemanticError::ValueTooBig.at(value.location())),
                };

                self.assign(&counter, &Value::Const(initial), location)?;
                counter
            }

            _ => self.resolve(condition)?,
        };

        match counter {
            Value::Reg(reg) => Ok(Counter::Reg(reg)),
            Value::Group(regs) => word_pair(&regs)
                .map(Counter::Pair)
                .ok_or_else(|| SemanticError::RegisterOrPairExpected.at(location)),

            Value::IoBit(port, bit) if port <= LOW_IO_END => Ok(Counter::IoBit {
                port,
                bit,
                negated: false,
            }),

            Value::Prefix(PrefixOp::Not, inner) => match *inner {
                Value::IoBit(port, bit) if port <= LOW_IO_END => Ok(Counter::IoBit {
                    port,
                    bit,
                    negated: true,
                }),

                _ => Err(SemanticError::WrongLoopSyntax.at(location)),
            },

            Value::IoBit(..) => Err(SemanticError::LowIoExpected.at(location)),
            _ => Err(SemanticError::WrongLoopSyntax.at(location)),
        }
    }
}

/// Par admitido por `sbiw`.
fn word_pair(regs: &[Reg]) -> Option<Pair> {
    pair_of(regs).filter(|pair| pair.is_word())
}
