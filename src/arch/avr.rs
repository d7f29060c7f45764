//! Tabla de instrucciones AVR y su codificación.
//!
//! Cada mnemónico declara una o más formas, cada una una lista de
//! ranuras de operando. La validación y la codificación recorren la
//! misma tabla: [`check`] se usa al construir una instrucción y tolera
//! operandos simbólicos, [`encode`] exige que todo esté resuelto.

use super::{Base, Operand, Pointer};
use std::{
    fmt::{self, Display},
    str::FromStr,
};

use thiserror::Error;

macro_rules! mnemonics {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Mnemónicos reconocidos, incluyendo alias.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum Mnemonic {
            $($variant),*
        }

        impl Mnemonic {
            pub const ALL: &'static [Mnemonic] = &[$(Mnemonic::$variant),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Mnemonic::$variant => $name),*
                }
            }
        }
    };
}

mnemonics! {
    Nop => "nop", Sec => "sec", Clc => "clc", Sen => "sen", Cln => "cln",
    Sez => "sez", Clz => "clz", Sei => "sei", Cli => "cli", Ses => "ses",
    Cls => "cls", Sev => "sev", Clv => "clv", Set => "set", Clt => "clt",
    Seh => "seh", Clh => "clh", Sleep => "sleep", Wdr => "wdr", Ijmp => "ijmp",
    Eijmp => "eijmp", Icall => "icall", Eicall => "eicall", Ret => "ret",
    Reti => "reti", Spm => "spm", Espm => "espm", Break => "break",

    Add => "add", Adc => "adc", Sub => "sub", Sbc => "sbc", And => "and",
    Or => "or", Eor => "eor", Cp => "cp", Cpc => "cpc", Cpse => "cpse",
    Mov => "mov", Mul => "mul",

    Subi => "subi", Sbci => "sbci", Andi => "andi", Ori => "ori", Cpi => "cpi",
    Ldi => "ldi", Sbr => "sbr", Cbr => "cbr",

    Com => "com", Neg => "neg", Swap => "swap", Inc => "inc", Asr => "asr",
    Lsr => "lsr", Ror => "ror", Dec => "dec", Push => "push", Pop => "pop",
    Tst => "tst", Clr => "clr", Lsl => "lsl", Rol => "rol", Ser => "ser",

    Brbs => "brbs", Brbc => "brbc", Breq => "breq", Brne => "brne",
    Brcs => "brcs", Brcc => "brcc", Brsh => "brsh", Brlo => "brlo",
    Brmi => "brmi", Brpl => "brpl", Brge => "brge", Brlt => "brlt",
    Brhs => "brhs", Brhc => "brhc", Brts => "brts", Brtc => "brtc",
    Brvs => "brvs", Brvc => "brvc", Brie => "brie", Brid => "brid",

    Rjmp => "rjmp", Rcall => "rcall", Jmp => "jmp", Call => "call",

    Adiw => "adiw", Sbiw => "sbiw", In => "in", Out => "out", Sbic => "sbic",
    Sbis => "sbis", Sbi => "sbi", Cbi => "cbi", Sbrc => "sbrc", Sbrs => "sbrs",
    Bst => "bst", Bld => "bld", Bset => "bset", Bclr => "bclr",

    Lds => "lds", Sts => "sts", Ld => "ld", St => "st", Ldd => "ldd",
    Std => "std", Lpm => "lpm", Elpm => "elpm",

    Movw => "movw", Muls => "muls", Mulsu => "mulsu", Fmul => "fmul",
    Fmuls => "fmuls", Fmulsu => "fmulsu",
}

impl Mnemonic {
    /// Tamaño de la instrucción en bytes.
    pub fn size(self) -> u32 {
        use Mnemonic::*;

        match self {
            Jmp | Call | Lds | Sts => 4,
            _ => 2,
        }
    }

    /// Formas alternativas de operandos.
    pub fn signatures(self) -> &'static [&'static [Slot]] {
        use Mnemonic::*;
        use Slot::*;

        match self {
            Nop | Sec | Clc | Sen | Cln | Sez | Clz | Sei | Cli | Ses | Cls | Sev | Clv | Set
            | Clt | Seh | Clh | Sleep | Wdr | Ijmp | Eijmp | Icall | Eicall | Ret | Reti | Spm
            | Espm | Break => &[&[]],

            Add | Adc | Sub | Sbc | And | Or | Eor | Cp | Cpc | Cpse | Mov | Mul => &[&[Reg, Reg]],

            Subi | Sbci | Andi | Ori | Cpi | Ldi | Sbr | Cbr => &[&[HighReg, Imm8]],

            Com | Neg | Swap | Inc | Asr | Lsr | Ror | Dec | Push | Pop | Tst | Clr | Lsl
            | Rol => &[&[Reg]],

            Ser => &[&[HighReg]],

            Brbs | Brbc => &[&[SregBit, Rel7]],
            Breq | Brne | Brcs | Brcc | Brsh | Brlo | Brmi | Brpl | Brge | Brlt | Brhs | Brhc
            | Brts | Brtc | Brvs | Brvc | Brie | Brid => &[&[Rel7]],

            Rjmp | Rcall => &[&[Rel12]],
            Jmp | Call => &[&[Abs22]],

            Adiw | Sbiw => &[&[WordPair, Imm6]],
            In => &[&[Reg, Io6]],
            Out => &[&[Io6, Reg]],
            Sbic | Sbis | Sbi | Cbi => &[&[Io5, Bit]],
            Sbrc | Sbrs | Bst | Bld => &[&[Reg, Bit]],
            Bset | Bclr => &[&[SregBit]],

            Lds => &[&[Reg, Data16]],
            Sts => &[&[Data16, Reg]],
            Ld => &[&[Reg, Pointer]],
            St => &[&[Pointer, Reg]],
            Ldd => &[&[Reg, Displaced]],
            Std => &[&[Displaced, Reg]],
            Lpm | Elpm => &[&[], &[Reg, LpmZ]],

            Movw => &[&[EvenPair, EvenPair]],
            Muls => &[&[HighReg, HighReg]],
            Mulsu | Fmul | Fmuls | Fmulsu => &[&[MulReg, MulReg]],
        }
    }

    /// Determina la forma que corresponde a una lista de operandos.
    pub fn form(self, operands: &[Operand]) -> Result<&'static [Slot], EncodingError> {
        let mut first_error = None;
        for &form in self.signatures() {
            if form.len() != operands.len() {
                continue;
            }

            let checked = form
                .iter()
                .zip(operands)
                .try_for_each(|(&slot, operand)| field(self, slot, operand, false).map(|_| ()));

            match checked {
                Ok(()) => return Ok(form),
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
        }

        Err(first_error.unwrap_or(EncodingError::WrongArity(self, operands.len())))
    }
}

impl FromStr for Mnemonic {
    type Err = ();

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Mnemonic::ALL
            .iter()
            .copied()
            .find(|mnemonic| unicase::eq_ascii(mnemonic.name(), name))
            .ok_or(())
    }
}

impl Display for Mnemonic {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.pad(self.name())
    }
}

/// Clase de operando admitida por una posición de una instrucción.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Slot {
    Reg,
    HighReg,
    MulReg,
    EvenPair,
    WordPair,
    Pointer,
    LpmZ,
    Displaced,
    Imm8,
    Imm6,
    Bit,
    SregBit,
    Io6,
    Io5,
    Data16,
    Rel7,
    Rel12,
    Abs22,
}

impl Slot {
    /// Ranuras de salto relativo, en palabras desde la siguiente instrucción.
    pub fn is_relative(self) -> bool {
        matches!(self, Slot::Rel7 | Slot::Rel12)
    }

    /// Rango de valores inmediatos aceptados.
    pub fn range(self) -> Option<(i32, i32)> {
        use Slot::*;

        let range = match self {
            Imm8 => (-128, 255),
            Imm6 => (0, 63),
            Bit | SregBit => (0, 7),
            Io6 => (0, 63),
            Io5 => (0, 31),
            Data16 => (0, 0xffff),
            Rel7 => (-64, 63),
            Rel12 => (-2048, 2047),
            Abs22 => (0, 0x3f_ffff),
            _ => return None,
        };

        Some(range)
    }
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error("{0}: r0..r31 expected, found {1}")]
    RegisterExpected(Mnemonic, String),

    #[error("{0}: r16..r31 expected, found {1}")]
    HighRegisterExpected(Mnemonic, String),

    #[error("{0}: r16..r23 expected, found {1}")]
    MultiplyRegisterExpected(Mnemonic, String),

    #[error("{0}: even register pair expected, found {1}")]
    EvenPairExpected(Mnemonic, String),

    #[error("{0}: Register pair must be R25:R24, R27:R26, R29:R28, R31:R30, found {1}")]
    WordPairExpected(Mnemonic, String),

    #[error("{0}: X, X+, -X, Y, Y+, -Y, Z, Z+ or -Z expected, found {1}")]
    PointerExpected(Mnemonic, String),

    #[error("{0}: Y+q or Z+q expected, found {1}")]
    DisplacementExpected(Mnemonic, String),

    #[error("{0}: Z or Z+ expected, found {1}")]
    ProgramPointerExpected(Mnemonic, String),

    #[error("{0}: number expected, found {1}")]
    NumberExpected(Mnemonic, String),

    #[error("{mnemonic}: Operand out of range ({min} <= x <= {max}): {value}")]
    OutOfRange {
        mnemonic: Mnemonic,
        min: i32,
        max: i32,
        value: i32,
    },

    #[error("{0}: wrong number of operands ({1} found)")]
    WrongArity(Mnemonic, usize),

    #[error("{0}: unresolved operand {1}")]
    Unresolved(Mnemonic, String),

    #[error("Data value out of range for {width}-byte item: {value}")]
    DataOutOfRange { width: u32, value: i64 },
}

/// Resultado de codificar una instrucción.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    Single(u16),
    Double(u16, u16),
}

impl Encoding {
    /// Bytes en el orden de la memoria de programa (little-endian).
    pub fn bytes(self) -> Vec<u8> {
        match self {
            Encoding::Single(word) => word.to_le_bytes().to_vec(),
            Encoding::Double(first, second) => {
                let mut bytes = first.to_le_bytes().to_vec();
                bytes.extend_from_slice(&second.to_le_bytes());
                bytes
            }
        }
    }
}

/// Valor extraído de un operando ya validado.
#[derive(Copy, Clone, Debug)]
enum Field {
    Reg(u8),
    Pointer(Pointer),
    Displaced(Base, u8),
    Value(i32),
}

impl Field {
    fn number(self) -> u16 {
        match self {
            Field::Reg(number) => number as u16,
            Field::Displaced(_, q) => q as u16,
            Field::Value(value) => value as u16,
            Field::Pointer(_) => 0,
        }
    }
}

/// Valida operandos sin exigir que los símbolos estén resueltos.
pub fn check(mnemonic: Mnemonic, operands: &[Operand]) -> Result<(), EncodingError> {
    mnemonic.form(operands).map(|_| ())
}

/// Codifica una instrucción cuyos operandos son todos concretos.
pub fn encode(mnemonic: Mnemonic, operands: &[Operand]) -> Result<Encoding, EncodingError> {
    use Mnemonic::*;

    let form = mnemonic.form(operands)?;
    let fields = form
        .iter()
        .zip(operands)
        .map(|(&slot, operand)| field(mnemonic, slot, operand, true))
        .collect::<Result<Vec<_>, _>>()?;

    let at = |index: usize| fields[index].number();

    let two_regs = |code: u16| {
        let (d, r) = (at(0), at(1));
        code | d << 4 | (r & 0x10) << 5 | (r & 0x0f)
    };

    let reg_imm = |code: u16, k: u16| {
        let (d, k) = (at(0) - 16, k & 0xff);
        code | d << 4 | (k & 0xf0) << 4 | (k & 0x0f)
    };

    let one_reg = |code: u16| code | at(0) << 4;
    let branch = |code: u16, k: u16| code | (k & 0x7f) << 3;
    let io_bit = |code: u16| code | at(0) << 3 | at(1);
    let reg_bit = |code: u16| code | at(0) << 4 | at(1);
    let mul = |code: u16| code | (at(0) & 0x07) << 4 | (at(1) & 0x07);

    let fixed = match mnemonic {
        Nop => 0x0000,
        Sec => 0x9408,
        Clc => 0x9488,
        Sen => 0x9428,
        Cln => 0x94a8,
        Sez => 0x9418,
        Clz => 0x9498,
        Sei => 0x9478,
        Cli => 0x94f8,
        Ses => 0x9448,
        Cls => 0x94c8,
        Sev => 0x9438,
        Clv => 0x94b8,
        Set => 0x9468,
        Clt => 0x94e8,
        Seh => 0x9458,
        Clh => 0x94d8,
        Sleep => 0x9588,
        Wdr => 0x95a8,
        Ijmp => 0x9409,
        Eijmp => 0x9419,
        Icall => 0x9509,
        Eicall => 0x9519,
        Ret => 0x9508,
        Reti => 0x9518,
        Spm => 0x95e8,
        Espm => 0x95f8,
        Break => 0x9598,

        Add => two_regs(0x0c00),
        Adc => two_regs(0x1c00),
        Sub => two_regs(0x1800),
        Sbc => two_regs(0x0800),
        And => two_regs(0x2000),
        Or => two_regs(0x2800),
        Eor => two_regs(0x2400),
        Cp => two_regs(0x1400),
        Cpc => two_regs(0x0400),
        Cpse => two_regs(0x1000),
        Mov => two_regs(0x2c00),
        Mul => two_regs(0x9c00),

        Tst => single_as_pair(0x2000, at(0)),
        Clr => single_as_pair(0x2400, at(0)),
        Lsl => single_as_pair(0x0c00, at(0)),
        Rol => single_as_pair(0x1c00, at(0)),

        Subi => reg_imm(0x5000, at(1)),
        Sbci => reg_imm(0x4000, at(1)),
        Andi => reg_imm(0x7000, at(1)),
        Ori | Sbr => reg_imm(0x6000, at(1)),
        Cpi => reg_imm(0x3000, at(1)),
        Ldi => reg_imm(0xe000, at(1)),
        Cbr => reg_imm(0x7000, !at(1)),

        Com => one_reg(0x9400),
        Neg => one_reg(0x9401),
        Swap => one_reg(0x9402),
        Inc => one_reg(0x9403),
        Asr => one_reg(0x9405),
        Lsr => one_reg(0x9406),
        Ror => one_reg(0x9407),
        Dec => one_reg(0x940a),
        Push => one_reg(0x920f),
        Pop => one_reg(0x900f),
        Ser => 0xef0f | (at(0) - 16) << 4,

        Brbs => branch(0xf000, at(1)) | at(0),
        Brbc => branch(0xf400, at(1)) | at(0),
        Breq => branch(0xf001, at(0)),
        Brne => branch(0xf401, at(0)),
        Brcs | Brlo => branch(0xf000, at(0)),
        Brcc | Brsh => branch(0xf400, at(0)),
        Brmi => branch(0xf002, at(0)),
        Brpl => branch(0xf402, at(0)),
        Brge => branch(0xf404, at(0)),
        Brlt => branch(0xf004, at(0)),
        Brhs => branch(0xf005, at(0)),
        Brhc => branch(0xf405, at(0)),
        Brts => branch(0xf006, at(0)),
        Brtc => branch(0xf406, at(0)),
        Brvs => branch(0xf003, at(0)),
        Brvc => branch(0xf403, at(0)),
        Brie => branch(0xf007, at(0)),
        Brid => branch(0xf407, at(0)),

        Rjmp => 0xc000 | (at(0) & 0x0fff),
        Rcall => 0xd000 | (at(0) & 0x0fff),

        Jmp | Call => {
            let target = match fields[0] {
                Field::Value(target) => target as u32,
                _ => 0,
            };

            let code = if mnemonic == Jmp { 0x940c } else { 0x940e };
            let high = (target >> 16) as u16;
            let first = code | ((high << 3) & 0x01f0) | (high & 1);
            return Ok(Encoding::Double(first, target as u16));
        }

        Adiw | Sbiw => {
            let code = if mnemonic == Adiw { 0x9600 } else { 0x9700 };
            let (pair, k) = (at(0), at(1));
            code | ((pair - 24) >> 1) << 4 | (k & 0x30) << 2 | (k & 0x0f)
        }

        In => {
            let (d, port) = (at(0), at(1));
            0xb000 | d << 4 | (port & 0x30) << 5 | (port & 0x0f)
        }

        Out => {
            let (port, r) = (at(0), at(1));
            0xb800 | r << 4 | (port & 0x30) << 5 | (port & 0x0f)
        }

        Sbic => io_bit(0x9900),
        Sbis => io_bit(0x9b00),
        Sbi => io_bit(0x9a00),
        Cbi => io_bit(0x9800),

        Sbrc => reg_bit(0xfc00),
        Sbrs => reg_bit(0xfe00),
        Bst => reg_bit(0xfa00),
        Bld => reg_bit(0xf800),

        Bset => 0x9408 | at(0) << 4,
        Bclr => 0x9488 | at(0) << 4,

        Lds => return Ok(Encoding::Double(0x9000 | at(0) << 4, at(1))),
        Sts => return Ok(Encoding::Double(0x9200 | at(1) << 4, at(0))),

        Ld => pointer_code(fields[1], false) | at(0) << 4,
        St => pointer_code(fields[0], true) | at(1) << 4,
        Ldd => displaced_code(fields[1], false) | at(0) << 4,
        Std => displaced_code(fields[0], true) | at(1) << 4,

        Lpm | Elpm => {
            let (bare, plain, increment) = if mnemonic == Lpm {
                (0x95c8, 0x9004, 0x9005)
            } else {
                (0x95d8, 0x9006, 0x9007)
            };

            match fields.get(1) {
                None => bare,
                Some(Field::Pointer(Pointer::PostIncrement(_))) => increment | at(0) << 4,
                Some(_) => plain | at(0) << 4,
            }
        }

        Movw => 0x0100 | (at(0) / 2) << 4 | at(1) / 2,
        Muls => 0x0200 | (at(0) - 16) << 4 | (at(1) - 16),
        Mulsu => mul(0x0300),
        Fmul => mul(0x0308),
        Fmuls => mul(0x0380),
        Fmulsu => mul(0x0388),
    };

    Ok(Encoding::Single(fixed))
}

fn single_as_pair(code: u16, d: u16) -> u16 {
    code | d << 4 | (d & 0x10) << 5 | (d & 0x0f)
}

fn pointer_code(field: Field, store: bool) -> u16 {
    let code = match field {
        Field::Pointer(pointer) => match pointer {
            Pointer::Plain(Base::X) => 0x900c,
            Pointer::PostIncrement(Base::X) => 0x900d,
            Pointer::PreDecrement(Base::X) => 0x900e,
            Pointer::Plain(Base::Y) => 0x8008,
            Pointer::PostIncrement(Base::Y) => 0x9009,
            Pointer::PreDecrement(Base::Y) => 0x900a,
            Pointer::Plain(Base::Z) => 0x8000,
            Pointer::PostIncrement(Base::Z) => 0x9001,
            Pointer::PreDecrement(Base::Z) => 0x9002,
        },

        _ => 0,
    };

    if store {
        code | 0x0200
    } else {
        code
    }
}

fn displaced_code(field: Field, store: bool) -> u16 {
    let (base, q) = match field {
        Field::Displaced(base, q) => (base, q as u16),
        _ => (Base::Z, 0),
    };

    let code = match base {
        Base::Y => 0x8008,
        _ => 0x8000,
    };

    let code = if store { code | 0x0200 } else { code };
    code | (q & 0x20) << 8 | (q & 0x18) << 7 | (q & 0x07)
}

/// Valida un operando contra una ranura.
///
/// Los operandos simbólicos se aceptan con valor nulo cuando `strict`
/// es falso; en modo estricto son un error.
fn field(
    mnemonic: Mnemonic,
    slot: Slot,
    operand: &Operand,
    strict: bool,
) -> Result<Field, EncodingError> {
    let text = || operand.to_string();

    match slot {
        Slot::Reg => match operand {
            Operand::Reg(reg) => Ok(Field::Reg(reg.number())),
            _ => Err(EncodingError::RegisterExpected(mnemonic, text())),
        },

        Slot::HighReg => match operand {
            Operand::Reg(reg) if reg.is_high() => Ok(Field::Reg(reg.number())),
            _ => Err(EncodingError::HighRegisterExpected(mnemonic, text())),
        },

        Slot::MulReg => match operand {
            Operand::Reg(reg) if (16..24).contains(&reg.number()) => Ok(Field::Reg(reg.number())),
            _ => Err(EncodingError::MultiplyRegisterExpected(mnemonic, text())),
        },

        Slot::EvenPair => match operand {
            Operand::Pair(pair) => Ok(Field::Reg(pair.low().number())),
            Operand::Reg(reg) if reg.number() % 2 == 0 => Ok(Field::Reg(reg.number())),
            _ => Err(EncodingError::EvenPairExpected(mnemonic, text())),
        },

        Slot::WordPair => match operand {
            Operand::Pair(pair) if pair.is_word() => Ok(Field::Reg(pair.low().number())),
            Operand::Reg(reg) if [24, 26, 28, 30].contains(&reg.number()) => {
                Ok(Field::Reg(reg.number()))
            }

            _ => Err(EncodingError::WordPairExpected(mnemonic, text())),
        },

        Slot::Pointer => match operand {
            Operand::Pointer(pointer) => Ok(Field::Pointer(*pointer)),
            _ => Err(EncodingError::PointerExpected(mnemonic, text())),
        },

        Slot::LpmZ => match operand {
            Operand::Pointer(pointer @ Pointer::Plain(Base::Z))
            | Operand::Pointer(pointer @ Pointer::PostIncrement(Base::Z)) => {
                Ok(Field::Pointer(*pointer))
            }

            _ => Err(EncodingError::ProgramPointerExpected(mnemonic, text())),
        },

        Slot::Displaced => match operand {
            Operand::Displaced(base, q) if *base != Base::X => {
                if (0..64).contains(q) {
                    Ok(Field::Displaced(*base, *q as u8))
                } else {
                    Err(EncodingError::OutOfRange {
                        mnemonic,
                        min: 0,
                        max: 63,
                        value: *q,
                    })
                }
            }

            Operand::Pointer(Pointer::Plain(base)) if *base != Base::X => {
                Ok(Field::Displaced(*base, 0))
            }

            _ => Err(EncodingError::DisplacementExpected(mnemonic, text())),
        },

        _ => {
            let (min, max) = slot.range().unwrap_or((i32::MIN, i32::MAX));
            match operand {
                Operand::Number(value) if (min..=max).contains(value) => Ok(Field::Value(*value)),
                Operand::Number(value) => Err(EncodingError::OutOfRange {
                    mnemonic,
                    min,
                    max,
                    value: *value,
                }),

                // Los bits no admiten referencias simbólicas
                _ if matches!(slot, Slot::Bit | Slot::SregBit) => {
                    Err(EncodingError::NumberExpected(mnemonic, text()))
                }

                symbolic if symbolic.is_symbolic() && !strict => Ok(Field::Value(0)),
                symbolic if symbolic.is_symbolic() => {
                    Err(EncodingError::Unresolved(mnemonic, text()))
                }

                _ => Err(EncodingError::NumberExpected(mnemonic, text())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{LabelRef, Pair, Reg};

    fn reg(number: u8) -> Operand {
        Operand::Reg(Reg::new(number).unwrap())
    }

    fn pair(low: u8) -> Operand {
        Operand::Pair(Pair::new(Reg::new(low).unwrap()).unwrap())
    }

    fn single(mnemonic: Mnemonic, operands: &[Operand]) -> u16 {
        match encode(mnemonic, operands).unwrap() {
            Encoding::Single(word) => word,
            Encoding::Double(..) => panic!("{} encoded as two words", mnemonic),
        }
    }

    #[test]
    fn fixed_opcodes() {
        assert_eq!(single(Mnemonic::Nop, &[]), 0x0000);
        assert_eq!(single(Mnemonic::Ret, &[]), 0x9508);
        assert_eq!(single(Mnemonic::Ijmp, &[]), 0x9409);
        assert_eq!(single(Mnemonic::Sei, &[]), 0x9478);
        assert_eq!(single(Mnemonic::Reti, &[]), 0x9518);
    }

    #[test]
    fn register_forms() {
        assert_eq!(single(Mnemonic::Mov, &[reg(1), reg(2)]), 0x2c12);
        assert_eq!(single(Mnemonic::Add, &[reg(31), reg(31)]), 0x0fff);
        assert_eq!(single(Mnemonic::Clr, &[reg(1)]), 0x2411);
        assert_eq!(single(Mnemonic::Tst, &[reg(20)]), 0x2344);
        assert_eq!(single(Mnemonic::Inc, &[reg(25)]), 0x9593);
        assert_eq!(single(Mnemonic::Push, &[reg(1)]), 0x921f);
    }

    #[test]
    fn immediates() {
        assert_eq!(single(Mnemonic::Ldi, &[reg(16), 0x12.into()]), 0xe102);
        assert_eq!(single(Mnemonic::Ldi, &[reg(30), 0xff.into()]), 0xefef);
        assert_eq!(single(Mnemonic::Ldi, &[reg(16), (-1).into()]), 0xef0f);
        assert_eq!(single(Mnemonic::Cbr, &[reg(23), 16.into()]), 0x7e7f);
        assert_eq!(single(Mnemonic::Subi, &[reg(30), 160.into()]), 0x5ae0);
    }

    #[test]
    fn aliases_share_encoding() {
        assert_eq!(
            single(Mnemonic::Lsl, &[reg(7)]),
            single(Mnemonic::Add, &[reg(7), reg(7)])
        );

        assert_eq!(
            single(Mnemonic::Sbr, &[reg(20), 4.into()]),
            single(Mnemonic::Ori, &[reg(20), 4.into()])
        );
    }

    #[test]
    fn jumps_and_branches() {
        assert_eq!(single(Mnemonic::Rjmp, &[(-1).into()]), 0xcfff);
        assert_eq!(single(Mnemonic::Rjmp, &[(-4).into()]), 0xcffc);
        assert_eq!(single(Mnemonic::Breq, &[(-2).into()]), 0xf3f1);
        assert_eq!(single(Mnemonic::Brbs, &[0.into(), 3.into()]), 0xf018);

        assert_eq!(
            encode(Mnemonic::Jmp, &[0x12345.into()]),
            Ok(Encoding::Double(0x940d, 0x2345))
        );
    }

    #[test]
    fn word_pairs() {
        assert_eq!(single(Mnemonic::Adiw, &[pair(30), 10.into()]), 0x963a);
        assert_eq!(single(Mnemonic::Sbiw, &[pair(24), 1.into()]), 0x9701);
        assert_eq!(single(Mnemonic::Movw, &[pair(24), pair(16)]), 0x01c8);

        assert!(matches!(
            encode(Mnemonic::Adiw, &[pair(22), 1.into()]),
            Err(EncodingError::WordPairExpected(..))
        ));
    }

    #[test]
    fn io_and_memory() {
        assert_eq!(single(Mnemonic::In, &[reg(16), 19.into()]), 0xb303);
        assert_eq!(single(Mnemonic::Out, &[41.into(), reg(24)]), 0xbd89);
        assert_eq!(single(Mnemonic::Sbic, &[14.into(), 7.into()]), 0x9977);
        assert_eq!(
            single(
                Mnemonic::Lpm,
                &[reg(26), Operand::Pointer(Pointer::PostIncrement(Base::Z))]
            ),
            0x91a5
        );

        assert_eq!(single(Mnemonic::Lpm, &[]), 0x95c8);
        assert_eq!(
            single(Mnemonic::Std, &[Operand::Displaced(Base::Y, 63), reg(0)]),
            0xae0f
        );

        assert_eq!(
            encode(Mnemonic::Sts, &[96.into(), reg(30)]),
            Ok(Encoding::Double(0x93e0, 0x0060))
        );
    }

    #[test]
    fn range_errors() {
        let error = encode(Mnemonic::Ldi, &[reg(16), 256.into()]).unwrap_err();
        assert_eq!(
            error.to_string(),
            "ldi: Operand out of range (-128 <= x <= 255): 256"
        );

        assert!(matches!(
            encode(Mnemonic::Cbi, &[40.into(), 1.into()]),
            Err(EncodingError::OutOfRange { max: 31, .. })
        ));

        assert!(matches!(
            encode(Mnemonic::Nop, &[reg(1)]),
            Err(EncodingError::WrongArity(Mnemonic::Nop, 1))
        ));
    }

    #[test]
    fn symbols_need_resolution() {
        let label = Operand::Label(LabelRef::global("main".into()));
        assert!(check(Mnemonic::Rjmp, &[label.clone()]).is_ok());
        assert!(matches!(
            encode(Mnemonic::Rjmp, &[label]),
            Err(EncodingError::Unresolved(..))
        ));
    }

    #[test]
    fn mnemonic_names() {
        assert_eq!("LDI".parse(), Ok(Mnemonic::Ldi));
        assert_eq!("brSh".parse(), Ok(Mnemonic::Brsh));
        assert_eq!("foo".parse::<Mnemonic>(), Err(()));
        assert_eq!(Mnemonic::Sts.size(), 4);
    }
}
