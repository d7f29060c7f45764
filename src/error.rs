//! Errores y advertencias de compilación.
//!
//! Toda falla se reporta como `Located<CompileError>`: la ubicación es
//! la de la sentencia, declaración u operando que la originó. La
//! compilación se detiene ante el primer error. Las advertencias no
//! detienen nada; se acumulan y se entregan junto al resultado.

use crate::{
    arch::EncodingError,
    source::{Located, Location},
};

use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

/// Resultado de cualquier fase del back end.
pub type Compiled<T> = Result<T, Located<CompileError>>;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Semantic(#[from] SemanticError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Budget(#[from] BudgetError),
}

/// Construcciones que no tienen traducción a instrucciones.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SemanticError {
    #[error("Unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("Unknown instruction: {0}")]
    UnknownMnemonic(String),

    #[error("Unsupported operation")]
    Unsupported,

    #[error("Operands has different sizes")]
    DifferentSizes,

    #[error("Invalid argument")]
    InvalidArgument,

    #[error("Constant expected")]
    ConstantExpected,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Value too big")]
    ValueTooBig,

    #[error("Register or pair expected")]
    RegisterOrPairExpected,

    #[error("Wrong loop syntax")]
    WrongLoopSyntax,

    #[error("Parent cycle not found")]
    ParentCycleNotFound,

    #[error("Low (0..31) address expected")]
    LowIoExpected,

    #[error("Bit number expected (0..7)")]
    BitExpected,

    #[error("Unknown bit: {0}")]
    UnknownBit(String),

    #[error("Destination register can't be used inside the expression: {0}")]
    DestinationInExpression(String),

    #[error("Register moves can't be ordered without overwriting a source")]
    ClobberedMove,

    #[error("Not inline function call: {0}")]
    NotInline(String),

    #[error("Recursive inline call: {0}")]
    RecursiveInline(String),

    #[error("Unknown argument: {0}")]
    UnknownArgument(String),

    #[error("Wrong arguments count: expected {expected}, but found {found}")]
    ArgumentCount { expected: usize, found: usize },

    #[error("One argument expected but {0} found")]
    SingleArgument(usize),

    #[error("At least one argument expected")]
    NoArguments,

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Label already defined: {0}")]
    LabelAlreadyDefined(String),

    #[error("Procedure already defined: {0}")]
    ProcedureAlreadyDefined(String),

    #[error("Variable already defined: {0}")]
    VariableAlreadyDefined(String),

    #[error("Global alias {0} already defined")]
    GlobalAliasDefined(String),

    #[error("Local alias {0} already defined")]
    LocalAliasDefined(String),

    #[error("Pin already defined: {0}")]
    PinAlreadyDefined(String),

    #[error("Invalid pin: {0}")]
    InvalidPin(String),

    #[error("Unknown interrupt vector: {0}")]
    UnknownVector(String),

    #[error("Invalid directive: {0}")]
    InvalidDirective(String),

    #[error("Wrong org address: {0}")]
    WrongOrg(i32),

    #[error("External objects can be used only in GCC-mode")]
    ExternalOutsideGcc,

    #[error("Out of RAM: {0}")]
    OutOfRam(String),

    #[error("Device has no RAM")]
    NoRam,

    #[error("Variable expected: {0}")]
    VariableExpected(String),
}

/// Fallas de la segunda pasada del ensamblador.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("Label not found: {0}")]
    LabelNotFound(String),

    #[error("External symbol {0} can't be resolved without a linker")]
    External(String),

    #[error("Overlapping code blocks at 0x{0:04X}")]
    Overlap(u32),

    #[error("Division by zero in address expression")]
    DivisionByZero,

    #[error("Internal error: probe label {0} not found")]
    MissingProbe(String),
}

/// Violaciones de límites de tamaño en bloques acotados.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BudgetError {
    #[error("Single instructions expected (but {found} found)")]
    SingleInstruction { found: usize },

    #[error("Block too large: expected {max} instructions but found {found}")]
    TooManyInstructions { max: usize, found: usize },

    #[error("Block too large: expected {max}, but found {found} bytes")]
    TooLarge { max: u32, found: u32 },
}

/// Situaciones sospechosas que no detienen la compilación.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Warning {
    #[error("Pin redefined: {0}")]
    PinRedefined(String),

    #[error("Name shadowed: {0}")]
    NameShadowed(String),

    #[error("zero argument")]
    ZeroArgument,

    #[error("Duplicate bit in bitmask: {0}")]
    DuplicateBit(u8),
}

/// Asocia una ubicación a cualquier error convertible a [`CompileError`].
pub trait Locate: Sized {
    fn at(self, location: &Location) -> Located<CompileError>;
}

impl<E: Into<CompileError>> Locate for E {
    fn at(self, location: &Location) -> Located<CompileError> {
        Located::at(self.into(), location.clone())
    }
}

mod sealed {
    pub trait Sealed {}
}

pub trait LocatedError: sealed::Sealed {
    fn source(&self) -> &dyn Error;
    fn location(&self) -> &Location;
}

/// Reporte de errores o advertencias para la terminal.
pub struct Diagnostics {
    kind: &'static str,
    errors: Vec<Box<dyn 'static + LocatedError>>,
}

impl Diagnostics {
    pub fn kind(self, kind: &'static str) -> Self {
        Diagnostics { kind, ..self }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            kind: "error",
            errors: Default::default(),
        }
    }
}

impl<E: 'static + LocatedError> From<E> for Diagnostics {
    fn from(error: E) -> Self {
        Diagnostics {
            errors: vec![Box::new(error)],
            ..Default::default()
        }
    }
}

impl<E: 'static + LocatedError> From<Vec<E>> for Diagnostics {
    fn from(errors: Vec<E>) -> Self {
        let errors = errors
            .into_iter()
            .map(|error| {
                let errors: Box<dyn LocatedError> = Box::new(error);
                errors
            })
            .collect();

        Diagnostics {
            errors,
            ..Default::default()
        }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics { kind, errors } = self;

        if errors.is_empty() {
            return writeln!(fmt, "No {}s were reported", kind);
        }

        for error in errors {
            writeln!(fmt, "{}: {}", kind, error.source())?;
            writeln!(fmt, " --> {}", error.location())?;
            writeln!(fmt)?;
        }

        if *kind == "error" {
            let error_or_errors = if errors.len() == 1 { "error" } else { "errors" };
            writeln!(
                fmt,
                "Build failed with {} {}",
                errors.len(),
                error_or_errors
            )?;
        }

        Ok(())
    }
}

impl<E: Error> sealed::Sealed for Located<E> {}

impl<E: Error> LocatedError for Located<E> {
    fn source(&self) -> &dyn Error {
        self.as_ref()
    }

    fn location(&self) -> &Location {
        Located::location(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_report() {
        let location = Location::point("main.rat".into(), 12, 5);
        let error = SemanticError::UnknownIdentifier("x".into()).at(&location);
        let report = Diagnostics::from(error).to_string();

        assert_eq!(
            report,
            "error: Unknown identifier: x\n --> main.rat:12:5\n\nBuild failed with 1 error\n"
        );
    }

    #[test]
    fn warnings_have_no_footer() {
        let location = Location::point("main.rat".into(), 1, 1);
        let warnings = vec![Located::at(Warning::ZeroArgument, location)];
        let report = Diagnostics::from(warnings).kind("warning").to_string();

        assert_eq!(report, "warning: zero argument\n --> main.rat:1:1\n\n");
    }

    #[test]
    fn budget_messages() {
        let error: CompileError = BudgetError::SingleInstruction { found: 2 }.into();
        assert_eq!(error.to_string(), "Single instructions expected (but 2 found)");

        let error: CompileError = BudgetError::TooLarge { max: 2, found: 4 }.into();
        assert_eq!(error.to_string(), "Block too large: expected 2, but found 4 bytes");
    }
}
