//! Reescritura algebraica de expresiones.
//!
//! Las reglas se aplican de abajo hacia arriba hasta alcanzar un punto
//! fijo. Cada regla reconoce un patrón en la raíz de un nodo y propone
//! un reemplazo; ninguna emite código. Después de simplificar, una
//! expresión se aplana en una [`Chain`] que la selección de
//! instrucciones recorre de izquierda a derecha.

use super::resolve::Value;
use crate::ast::BinaryOp;

type Rule = fn(&Value) -> Option<Value>;

const RULES: &[(&str, Rule)] = &[
    ("fold_constants", fold_constants),
    ("merge_offsets", merge_offsets),
    ("drop_zero", drop_zero),
    ("flip_negative", flip_negative),
];

/// Simplifica una expresión completa.
pub fn simplify(value: Value) -> Value {
    let value = match value {
        Value::Binary(op, left, right) => Value::binary(op, simplify(*left), simplify(*right)),
        Value::Signed(inner) => Value::Signed(Box::new(simplify(*inner))),
        other => other,
    };

    rewrite(value)
}

fn rewrite(mut value: Value) -> Value {
    while let Some((name, next)) = RULES
        .iter()
        .find_map(|(name, rule)| rule(&value).map(|next| (name, next)))
    {
        log::trace!("rewrite rule {} applied", name);
        value = next;
    }

    value
}

fn fold_constants(value: &Value) -> Option<Value> {
    match value {
        Value::Binary(op, left, right) => match (&**left, &**right) {
            (Value::Const(left), Value::Const(right)) => op.apply(*left, *right).map(Value::Const),
            _ => None,
        },

        _ => None,
    }
}

/// `(x ± a) ± b` → `x + c`
fn merge_offsets(value: &Value) -> Option<Value> {
    let (outer, inner, b) = match value {
        Value::Binary(op @ (BinaryOp::Add | BinaryOp::Sub), inner, right) => match **right {
            Value::Const(b) => (*op, inner, b),
            _ => return None,
        },

        _ => return None,
    };

    let (inner_op, x, a) = match &**inner {
        Value::Binary(op @ (BinaryOp::Add | BinaryOp::Sub), x, right) => match **right {
            Value::Const(a) => (*op, x, a),
            _ => return None,
        },

        _ => return None,
    };

    let signed = |op, value: i32| match op {
        BinaryOp::Sub => value.wrapping_neg(),
        _ => value,
    };

    let offset = signed(inner_op, a).wrapping_add(signed(outer, b));
    Some(Value::binary(BinaryOp::Add, (**x).clone(), Value::Const(offset)))
}

/// `x ± 0` → `x`
fn drop_zero(value: &Value) -> Option<Value> {
    match value {
        Value::Binary(BinaryOp::Add | BinaryOp::Sub, left, right) if **right == Value::Const(0) => {
            Some((**left).clone())
        }

        _ => None,
    }
}

/// `x + (-c)` → `x - c`, `x - (-c)` → `x + c`
fn flip_negative(value: &Value) -> Option<Value> {
    let (op, left, c) = match value {
        Value::Binary(op, left, right) => match **right {
            Value::Const(c) if c < 0 && c != i32::MIN => (*op, left, c),
            _ => return None,
        },

        _ => return None,
    };

    let flipped = match op {
        BinaryOp::Add => BinaryOp::Sub,
        BinaryOp::Sub => BinaryOp::Add,
        _ => return None,
    };

    Some(Value::binary(flipped, (**left).clone(), Value::Const(-c)))
}

/// Expresión aplanada: `base op₁ x₁ op₂ x₂ ...`, evaluada de izquierda a derecha.
#[derive(Clone, Debug, PartialEq)]
pub struct Chain {
    pub base: Value,
    pub steps: Vec<(BinaryOp, Value)>,
}

/// Aplana la rama izquierda de una expresión.
///
/// Si la base resulta constante y el primer paso es una suma, los
/// operandos se intercambian para que la base sea el término variable.
pub fn linearize(value: &Value) -> Chain {
    let mut chain = collect(value);
    let swap = matches!(chain.base, Value::Const(_))
        && matches!(chain.steps.first(), Some((BinaryOp::Add, _)));

    if swap {
        if let Some((_, operand)) = chain.steps.first_mut() {
            std::mem::swap(&mut chain.base, operand);
        }
    }

    chain
}

fn collect(value: &Value) -> Chain {
    match value {
        Value::Binary(op, left, right) if op.compound().is_some() => {
            let mut chain = collect(left);
            chain.steps.push((*op, (**right).clone()));
            chain
        }

        other => Chain {
            base: other.clone(),
            steps: Vec::new(),
        },
    }
}

/// Términos con signo de una suma: `a - b + c` → `[+a, -b, +c]`.
///
/// Falla si la expresión contiene otra operación en su espina izquierda.
pub fn terms(value: &Value) -> Option<Vec<(BinaryOp, Value)>> {
    let chain = linearize(value);
    if let Value::Binary(..) = chain.base {
        return None;
    }

    let mut terms = vec![(BinaryOp::Add, chain.base)];
    for (op, operand) in chain.steps {
        match op {
            BinaryOp::Add | BinaryOp::Sub => terms.push((op, operand)),
            _ => return None,
        }
    }

    Some(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Reg;

    fn reg(number: u8) -> Value {
        Value::Reg(Reg::new(number).unwrap())
    }

    fn binary(op: BinaryOp, left: Value, right: Value) -> Value {
        Value::binary(op, left, right)
    }

    #[test]
    fn merges_trailing_constants() {
        use BinaryOp::*;

        // (r2 << 3) + r3 - r4 - 5 + 4
        let value = binary(
            Add,
            binary(
                Sub,
                binary(Sub, binary(Add, binary(Shl, reg(2), Value::Const(3)), reg(3)), reg(4)),
                Value::Const(5),
            ),
            Value::Const(4),
        );

        let chain = linearize(&simplify(value));

        assert_eq!(chain.base, reg(2));
        assert_eq!(
            chain.steps,
            vec![
                (Shl, Value::Const(3)),
                (Add, reg(3)),
                (Sub, reg(4)),
                (Sub, Value::Const(1)),
            ]
        );
    }

    #[test]
    fn cancelled_offset_disappears() {
        use BinaryOp::*;

        let value = binary(Sub, binary(Add, reg(5), Value::Const(7)), Value::Const(7));
        assert_eq!(simplify(value), reg(5));
    }

    #[test]
    fn negative_offset_flips_operator() {
        use BinaryOp::*;

        let value = binary(Add, reg(5), Value::Const(-3));
        assert_eq!(simplify(value), binary(Sub, reg(5), Value::Const(3)));
    }

    #[test]
    fn constant_base_swaps_with_first_term() {
        use BinaryOp::*;

        let chain = linearize(&binary(Add, Value::Const(1), reg(20)));
        assert_eq!(chain.base, reg(20));
        assert_eq!(chain.steps, vec![(Add, Value::Const(1))]);

        // La resta no conmuta
        let chain = linearize(&binary(Sub, Value::Const(1), reg(20)));
        assert_eq!(chain.base, Value::Const(1));
    }

    #[test]
    fn sum_terms() {
        use BinaryOp::*;

        let value = binary(Add, binary(Sub, reg(24), reg(25)), reg(26));
        assert_eq!(
            terms(&value),
            Some(vec![(Add, reg(24)), (Sub, reg(25)), (Add, reg(26))])
        );

        assert_eq!(terms(&binary(Mul, reg(24), reg(25))), None);
    }
}
