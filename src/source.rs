//! Rastreo de ubicaciones originales en código fuente.
//!
//! El árbol sintáctico que recibe el back end conserva, nodo por nodo,
//! la posición del texto original de la que proviene. Cada instrucción
//! emitida hereda la ubicación de la sentencia que la generó, lo cual
//! permite señalar un punto exacto en donde ocurre un error, incluso
//! si este se detecta hasta la segunda pasada del ensamblador.

use serde::Deserialize;
use std::{
    fmt::{self, Debug, Display, Formatter},
    rc::Rc,
};

/// Un objeto cualquiera con una posición original asociada.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Located<T> {
    location: Location,
    value: T,
}

impl<T> Located<T> {
    /// Obtiene el valor.
    pub fn val(&self) -> &T {
        &self.value
    }

    /// Obtiene la ubicación.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Descarta la ubicación y toma ownership del valor.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Descompone y toma ownership de las dos partes.
    pub fn split(self) -> (Location, T) {
        (self.location, self.value)
    }

    /// Construye a partir de un valor y una ubicación.
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }

    /// Transforma el valor con la misma ubicación.
    pub fn map<U, F>(self, map: F) -> Located<U>
    where
        F: FnOnce(T) -> U,
    {
        Located {
            value: map(self.value),
            location: self.location,
        }
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Una ubicación está conformada por un origen y un rango de posiciones.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Location {
    file: Rc<str>,
    start: Position,
    end: Position,
}

impl Location {
    /// Construye una ubicación a partir de un rango explícito.
    pub fn new(file: Rc<str>, start: Position, end: Position) -> Self {
        Location { file, start, end }
    }

    /// Una ubicación que señala una única columna.
    pub fn point(file: Rc<str>, line: u32, column: u32) -> Self {
        let start = Position { line, column };
        Location {
            file,
            start,
            end: start.advance(),
        }
    }

    /// Unifica un rango de ubicaciones. Se asume el mismo origen.
    pub fn span(from: Location, to: &Location) -> Self {
        Location {
            file: from.file,
            start: from.start,
            end: to.end,
        }
    }

    /// Nombre del archivo de origen.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Obtiene la posición de inicio.
    pub fn start(&self) -> Position {
        self.start
    }

    /// Obtiene la posición de fin.
    pub fn end(&self) -> Position {
        self.end
    }
}

impl Display for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:", self.file)?;

        let (start, end) = (self.start, self.end);
        if end == start.advance() || end == start {
            // Solo se señala una columna en específico
            write!(formatter, "{}", start)
        } else {
            write!(formatter, "[{}-{}]", start, end.back())
        }
    }
}

impl Debug for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}

/// Una posición línea-columna en un archivo.
#[derive(Copy, Clone, Eq, PartialEq, Deserialize)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    /// Obtiene el número de línea.
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Obtiene el número de columna.
    pub fn column(&self) -> u32 {
        self.column
    }

    /// Incrementa el número de columna.
    pub fn advance(self) -> Position {
        Position {
            line: self.line,
            column: self.column + 1,
        }
    }

    /// Decrementa el número de columna.
    pub fn back(self) -> Position {
        Position {
            line: self.line,
            column: self.column.saturating_sub(1).max(1),
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 1 }
    }
}

impl Display for Position {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_column_display() {
        let location = Location::point("main.rat".into(), 3, 7);
        assert_eq!(location.to_string(), "main.rat:3:7");
    }

    #[test]
    fn span_display() {
        let from = Location::point("main.rat".into(), 2, 1);
        let to = Location::point("main.rat".into(), 2, 9);
        assert_eq!(Location::span(from, &to).to_string(), "main.rat:[2:1-2:9]");
    }

    #[test]
    fn deserialize_located() {
        let json = r#"{
            "location": {"file": "a.rat", "start": {"line": 4, "column": 2}, "end": {"line": 4, "column": 3}},
            "value": 42
        }"#;

        let located: Located<i32> = serde_json::from_str(json).unwrap();
        assert_eq!(*located.val(), 42);
        assert_eq!(located.location().start().line(), 4);
    }
}
