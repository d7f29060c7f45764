//! Bloques de datos en memoria de programa.

use super::Context;

use crate::{
    arch::Deferred,
    assembler::Data,
    ast::{DataBlock, DataWidth, Expr},
    error::{Compiled, Locate, SemanticError},
};

impl<'a> Context<'a> {
    pub(super) fn data_block(&mut self, block: &'a DataBlock) -> Compiled<Data> {
        let mut values = Vec::with_capacity(block.items.len());

        for item in &block.items {
            let location = item.location();

            match item.val() {
                Expr::Str(text) if block.width == DataWidth::Byte => {
                    values.extend(text.bytes().map(|byte| Deferred::Const(byte as i32)));
                }

                Expr::Str(_) => return Err(SemanticError::InvalidArgument.at(location)),
                Expr::Char(c) => values.push(Deferred::Const(*c as i32)),

                _ => {
                    let value = self.resolve(item)?;
                    let deferred = self
                        .deferred(&value)
                        .ok_or_else(|| SemanticError::InvalidArgument.at(location))?;

                    if let Deferred::Const(value) = deferred {
                        if !fits(value, block.width) {
                            return Err(SemanticError::ValueTooBig.at(location));
                        }
                    }

                    values.push(deferred);
                }
            }
        }

        Ok(Data {
            width: block.width,
            values,
        })
    }
}

/// Admite tanto la lectura con signo como sin signo del ancho.
fn fits(value: i32, width: DataWidth) -> bool {
    let bits = 8 * width.size();
    if bits >= 32 {
        return true;
    }

    let value = value as i64;
    -(1i64 << (bits - 1)) <= value && value < (1i64 << bits)
}
