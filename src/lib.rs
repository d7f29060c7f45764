//! Back end AVR del lenguaje Rat.
//!
//! # Entrada
//! El front end entrega un árbol sintáctico ya validado, descrito en
//! [`ast`], junto con la descripción del microcontrolador objetivo en
//! [`device`]. Ambos se leen como JSON. Cada nodo del árbol lleva su
//! ubicación en el código fuente ([`source`]), la cual acompaña a
//! cualquier error o advertencia que se reporte ([`error`]).
//!
//! # Generación de código
//! En [`codegen`] se recorre el árbol y se traduce cada declaración,
//! sentencia y expresión a instrucciones AVR concretas, descritas en
//! [`arch`]. No existe una representación intermedia: cada instrucción
//! se valida contra las formas de operandos de su mnemónico en el
//! momento de emitirse.
//!
//! # Ensamblado y salida
//! Las instrucciones se replican a cada formato de salida activo en
//! [`output`]. Cada formato acumula su propio listado en un
//! [`assembler::Assembler`] de dos pasadas: la primera asigna
//! direcciones a etiquetas y la segunda resuelve referencias hacia
//! adelante, evalúa expresiones diferidas y codifica.

#[macro_use]
mod macros;

pub mod arch;
pub mod assembler;
pub mod ast;
pub mod codegen;
pub mod device;
pub mod error;
pub mod output;
pub mod source;

pub use codegen::compile;
