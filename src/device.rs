//! Descripción del microcontrolador objetivo.
//!
//! Las tablas de registros de E/S y de vectores de interrupción se
//! generan fuera del compilador a partir de las hojas de datos de cada
//! dispositivo y llegan aquí como JSON.

use serde::Deserialize;

/// Direcciones de E/S que admiten `in`/`out`.
pub const IO_SPACE_END: u32 = 0x3f;

/// Direcciones de E/S que admiten `sbi`/`cbi`/`sbic`/`sbis`.
pub const LOW_IO_END: u32 = 0x1f;

/// Nombre del registro de estado.
pub const STATUS_REGISTER: &str = "SREG";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Device {
    pub name: String,
    pub flash_size: u32,
    pub ram_start: u32,
    pub ram_size: u32,
    #[serde(default)]
    pub eeprom_size: u32,
    pub interrupts: Vec<Interrupt>,
    pub registers: Vec<IoRegister>,
}

/// Un vector de interrupción, con su desplazamiento en palabras.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Interrupt {
    pub name: String,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IoRegister {
    pub name: String,
    pub address: u32,
    #[serde(default = "single_byte")]
    pub size: u32,
    #[serde(default)]
    pub bits: Vec<Bit>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Bit {
    pub name: String,
    pub number: u8,
}

fn single_byte() -> u32 {
    1
}

/// Resultado de resolver un nombre de puerto de E/S.
///
/// Un registro de varios bytes puede direccionarse byte a byte con
/// los sufijos `H` y `L`, en cuyo caso no existe un [`IoRegister`]
/// que corresponda exactamente al nombre.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IoAddress<'a> {
    pub address: u32,
    pub size: u32,
    pub register: Option<&'a IoRegister>,
}

impl Device {
    /// Última dirección de RAM, si el dispositivo tiene RAM.
    pub fn ram_end(&self) -> Option<u32> {
        let last = self.ram_size.checked_sub(1)?;
        self.ram_start.checked_add(last)
    }

    pub fn find_io(&self, name: &str) -> Option<&IoRegister> {
        self.registers.iter().find(|register| register.name == name)
    }

    /// Resuelve un puerto, incluyendo las mitades `NOMBREH`/`NOMBREL`.
    pub fn io_address(&self, name: &str) -> Option<IoAddress<'_>> {
        if let Some(register) = self.find_io(name) {
            return Some(IoAddress {
                address: register.address,
                size: register.size,
                register: Some(register),
            });
        }

        let (base, high) = if let Some(base) = name.strip_suffix('H') {
            (base, true)
        } else if let Some(base) = name.strip_suffix('L') {
            (base, false)
        } else {
            return None;
        };

        let register = self.find_io(base).filter(|register| register.size > 1)?;
        Some(IoAddress {
            address: register.address + if high { 1 } else { 0 },
            size: 1,
            register: None,
        })
    }

    /// Determina si el dispositivo tiene `PORTx` para la letra dada.
    pub fn has_port(&self, letter: char) -> bool {
        self.find_io(&format!("PORT{}", letter)).is_some()
    }

    /// Busca el registro que declara un bit con el nombre dado.
    pub fn find_io_with_bit(&self, bit: &str) -> Option<(&IoRegister, u8)> {
        self.registers
            .iter()
            .find_map(|register| register.bit(bit).map(|number| (register, number)))
    }

    pub fn interrupt(&self, name: &str) -> Option<&Interrupt> {
        self.interrupts
            .iter()
            .find(|interrupt| interrupt.name == name)
    }

    /// Ancho en bytes de la entrada `index` de la tabla de vectores.
    ///
    /// Dispositivos con más de 8 KiB de flash reservan dos palabras por
    /// vector para alcanzar todo el espacio con `jmp`.
    pub fn vector_slot_size(&self, index: usize) -> u32 {
        let words = match (self.interrupts.get(index), self.interrupts.get(index + 1)) {
            (Some(this), Some(next)) => next.offset.saturating_sub(this.offset),
            _ if self.flash_size > 8192 => 2,
            _ => 1,
        };

        2 * words.max(1)
    }
}

impl IoRegister {
    pub fn bit(&self, name: &str) -> Option<u8> {
        self.bits
            .iter()
            .find(|bit| bit.name == name)
            .map(|bit| bit.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        let json = r#"{
            "name": "tiny",
            "flash_size": 2048,
            "ram_start": 96,
            "ram_size": 128,
            "interrupts": [{"name": "RESET", "offset": 0}, {"name": "INT0", "offset": 1}],
            "registers": [
                {"name": "SREG", "address": 63, "bits": [{"name": "C", "number": 0}, {"name": "Z", "number": 1}]},
                {"name": "SP", "address": 61, "size": 2},
                {"name": "PORTB", "address": 24, "bits": [{"name": "PB3", "number": 3}]}
            ]
        }"#;

        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn multi_byte_halves() {
        let device = device();
        assert_eq!(device.io_address("SP").map(|io| (io.address, io.size)), Some((61, 2)));
        assert_eq!(device.io_address("SPH").map(|io| io.address), Some(62));
        assert_eq!(device.io_address("SPL").map(|io| io.address), Some(61));
        assert!(device.io_address("SREGH").is_none());
        assert!(device.io_address("PORTC").is_none());
    }

    #[test]
    fn ports_and_bits() {
        let device = device();
        assert!(device.has_port('B'));
        assert!(!device.has_port('D'));

        let (register, bit) = device.find_io_with_bit("PB3").unwrap();
        assert_eq!((register.name.as_str(), bit), ("PORTB", 3));
        assert_eq!(device.ram_end(), Some(96 + 127));
    }

    #[test]
    fn devices_without_ram() {
        let device = Device {
            ram_start: 0,
            ram_size: 0,
            ..device()
        };

        assert_eq!(device.ram_end(), None);
    }

    #[test]
    fn vector_slots() {
        let device = device();
        assert_eq!(device.vector_slot_size(0), 2);
        assert_eq!(device.vector_slot_size(1), 2);
    }
}
