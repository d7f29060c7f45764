//! Árbol sintáctico de entrada.
//!
//! El front end (scanner, preprocesador y parser) vive fuera de este
//! crate. Lo que recibe el back end es un árbol cerrado: cada variante
//! de sentencia y de expresión que el lenguaje admite aparece aquí y en
//! ningún otro lugar. El árbol se deserializa desde JSON, por lo cual
//! todos los tipos derivan [`Deserialize`].

use crate::source::Located;
use serde::Deserialize;
use std::{
    fmt::{self, Display},
    rc::Rc,
};

/// Nombre de un símbolo del programa.
pub type Identifier = Rc<str>;

/// Una unidad de compilación completa.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub vectors: Option<Located<Vectors>>,
    pub items: Vec<Located<Item>>,
}

/// Tabla de vectores de interrupción.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Vectors {
    pub entries: Vec<VectorEntry>,
}

/// Una entrada `NOMBRE: instrucción` de la tabla de vectores.
///
/// El nombre especial `default` aplica a todo vector sin entrada propia.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VectorEntry {
    pub name: Located<Identifier>,
    pub instruction: Located<AsmInstruction>,
}

/// Declaraciones de nivel superior.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub enum Item {
    Procedure(Procedure),
    ExternProcedure(Procedure),
    Var(VarDecl),
    ExternVar(VarDecl),
    Pin {
        name: Located<Identifier>,
        pin: Located<String>,
    },
    Use(Alias),
    Directive {
        name: Located<Identifier>,
        args: Vec<Located<Expr>>,
    },
    Label(Identifier),
    Data(DataBlock),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Procedure {
    pub name: Located<Identifier>,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub body: Vec<Located<Statement>>,
    #[serde(default)]
    pub inline: bool,
}

impl Procedure {
    /// Busca un parámetro formal por nombre.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|param| &*param.name == name)
    }
}

/// Un parámetro formal, ligado a un registro o grupo de registros.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Param {
    pub name: Identifier,
    pub binding: Located<Expr>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VarDecl {
    pub name: Located<Identifier>,
    pub data_type: DataType,
    #[serde(default)]
    pub length: Option<Located<Expr>>,
}

/// Tipos de variables en RAM.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum DataType {
    Byte,
    Word,
    Dword,
    Ptr,
    PrgPtr,
}

impl DataType {
    /// Bytes que ocupa un elemento en RAM.
    pub fn size(self) -> u32 {
        match self {
            DataType::Byte => 1,
            DataType::Word | DataType::Ptr | DataType::PrgPtr => 2,
            DataType::Dword => 4,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            DataType::Byte => "byte",
            DataType::Word => "word",
            DataType::Dword => "dword",
            DataType::Ptr => "ptr",
            DataType::PrgPtr => "prgptr",
        })
    }
}

/// `use <registro> as <nombre>`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Alias {
    pub target: Located<Expr>,
    pub name: Located<Identifier>,
}

/// Bloque de datos crudos en memoria de programa.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataBlock {
    pub width: DataWidth,
    pub items: Vec<Located<Expr>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum DataWidth {
    Byte,
    Word,
    Dword,
}

impl DataWidth {
    pub fn size(self) -> u32 {
        match self {
            DataWidth::Byte => 1,
            DataWidth::Word => 2,
            DataWidth::Dword => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub enum Statement {
    Expr(Expr),
    Call(Call),
    Asm(AsmInstruction),
    Label {
        name: Identifier,
        #[serde(default)]
        global: bool,
    },
    Goto(Identifier),
    Break,
    Continue,
    If {
        condition: Located<Expr>,
        then: Box<Located<Statement>>,
        #[serde(default)]
        otherwise: Option<Box<Located<Statement>>>,
    },
    Loop {
        #[serde(default)]
        condition: Option<Located<Expr>>,
        body: Vec<Located<Statement>>,
    },
    DoWhile {
        body: Vec<Located<Statement>>,
        condition: Located<Expr>,
    },
    Block(Vec<Located<Statement>>),
    Use(Alias),
    SaveRegs {
        registers: Vec<Located<Expr>>,
        body: Vec<Located<Statement>>,
    },
    Data(DataBlock),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub enum Expr {
    Number(i32),
    Char(char),
    Str(String),
    Ident(Identifier),
    Register(Identifier),
    Group(Vec<Located<Expr>>),
    Binary {
        op: BinaryOp,
        left: Box<Located<Expr>>,
        right: Box<Located<Expr>>,
    },
    Prefix {
        op: PrefixOp,
        operand: Box<Located<Expr>>,
    },
    Suffix {
        op: SuffixOp,
        operand: Box<Located<Expr>>,
    },
    Assign {
        op: AssignOp,
        target: Box<Located<Expr>>,
        value: Box<Located<Expr>>,
    },
    Arrow {
        base: Box<Located<Expr>>,
        member: Box<Located<Expr>>,
    },
    Index {
        base: Box<Located<Expr>>,
        index: Box<Located<Expr>>,
    },
    Call(Call),
    Signed(Box<Located<Expr>>),
}

/// Invocación de procedimiento, inline o builtin.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Call {
    pub name: Located<Identifier>,
    #[serde(default)]
    pub args: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Argument {
    #[serde(default)]
    pub name: Option<Identifier>,
    pub value: Located<Expr>,
}

/// Una instrucción de máquina escrita literalmente.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AsmInstruction {
    pub mnemonic: Located<Identifier>,
    #[serde(default)]
    pub operands: Vec<Located<Expr>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    And,
    Or,
    Xor,
    LogicalAnd,
    LogicalOr,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    /// Evalúa el operador sobre dos constantes.
    ///
    /// Retorna `None` ante una división entre cero.
    pub fn apply(self, left: i32, right: i32) -> Option<i32> {
        use BinaryOp::*;

        let truth = |condition: bool| condition as i32;
        let value = match self {
            Add => left.wrapping_add(right),
            Sub => left.wrapping_sub(right),
            Mul => left.wrapping_mul(right),
            Div => left.checked_div(right)?,
            Rem => left.checked_rem(right)?,
            Shl => left.wrapping_shl(right as u32),
            Shr => left.wrapping_shr(right as u32),
            And => left & right,
            Or => left | right,
            Xor => left ^ right,
            LogicalAnd => truth(left != 0 && right != 0),
            LogicalOr => truth(left != 0 || right != 0),
            Eq => truth(left == right),
            Ne => truth(left != right),
            Lt => truth(left < right),
            Gt => truth(left > right),
            Le => truth(left <= right),
            Ge => truth(left >= right),
        };

        Some(value)
    }

    pub fn is_relational(self) -> bool {
        use BinaryOp::*;
        matches!(self, Eq | Ne | Lt | Gt | Le | Ge)
    }

    /// Operador relacional con la condición lógicamente opuesta.
    pub fn inverse(self) -> Option<BinaryOp> {
        use BinaryOp::*;

        let inverse = match self {
            Eq => Ne,
            Ne => Eq,
            Lt => Ge,
            Ge => Lt,
            Gt => Le,
            Le => Gt,
            _ => return None,
        };

        Some(inverse)
    }

    /// Forma de asignación compuesta equivalente (`+` → `+=`).
    pub fn compound(self) -> Option<AssignOp> {
        use BinaryOp::*;

        let op = match self {
            Add => AssignOp::Add,
            Sub => AssignOp::Sub,
            Mul => AssignOp::Mul,
            Div => AssignOp::Div,
            Rem => AssignOp::Rem,
            Shl => AssignOp::Shl,
            Shr => AssignOp::Shr,
            And => AssignOp::And,
            Or => AssignOp::Or,
            Xor => AssignOp::Xor,
            _ => return None,
        };

        Some(op)
    }
}

impl Display for BinaryOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use BinaryOp::*;

        fmt.write_str(match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Div => "/",
            Rem => "%",
            Shl => "<<",
            Shr => ">>",
            And => "&",
            Or => "|",
            Xor => "^",
            LogicalAnd => "&&",
            LogicalOr => "||",
            Eq => "==",
            Ne => "!=",
            Lt => "<",
            Gt => ">",
            Le => "<=",
            Ge => ">=",
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum PrefixOp {
    Neg,
    Not,
    BitNot,
    Inc,
    Dec,
}

impl Display for PrefixOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            PrefixOp::Neg => "-",
            PrefixOp::Not => "!",
            PrefixOp::BitNot => "~",
            PrefixOp::Inc => "++",
            PrefixOp::Dec => "--",
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum SuffixOp {
    Inc,
    Dec,
}

impl Display for SuffixOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(match self {
            SuffixOp::Inc => "++",
            SuffixOp::Dec => "--",
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl Display for AssignOp {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use AssignOp::*;

        fmt.write_str(match self {
            Set => "=",
            Add => "+=",
            Sub => "-=",
            Mul => "*=",
            Div => "/=",
            Rem => "%=",
            And => "&=",
            Or => "|=",
            Xor => "^=",
            Shl => "<<=",
            Shr => ">>=",
        })
    }
}
