//! Punto de entrada ("driver").
//!
//! Este módulo lee el árbol sintáctico y el dispositivo, orquesta la
//! generación de código y escribe un archivo por cada formato pedido.

use anyhow::{self, bail, Context};
use clap::{self, crate_version, Arg};
use ratc::{
    ast::Program,
    device::Device,
    error::Diagnostics,
    output::{Artifact, Format, Formats, Options, Outputs},
};

use std::{
    convert::TryFrom,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

fn main() -> anyhow::Result<()> {
    pretty_env_logger::init_timed();

    // Parsing de CLI
    let args = clap::Command::new("Rat AVR compiler")
        .version(crate_version!())
        .arg(
            Arg::new("device")
                .short('d')
                .long("device")
                .value_name("FILE")
                .takes_value(true)
                .required(true)
                .help("Target device description (JSON)"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .takes_value(true)
                .multiple_occurrences(true)
                .default_value("hex")
                .possible_values(&["bin", "hex", "asm", "gcc", "map"])
                .help("Output format, may be repeated"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("STEM")
                .takes_value(true)
                .required(true)
                .help("Output path without extension"),
        )
        .arg(
            Arg::new("fill")
                .long("fill")
                .value_name("BYTE")
                .takes_value(true)
                .default_value("0x00")
                .help("Fill byte for gaps in binary images"),
        )
        .arg(
            Arg::new("hex-width")
                .long("hex-width")
                .value_name("BYTES")
                .takes_value(true)
                .default_value("16")
                .help("Data bytes per Intel HEX record"),
        )
        .arg(
            Arg::new("program")
                .value_name("PROGRAM")
                .required(true)
                .help("Syntax tree produced by the front end (JSON)"),
        )
        .get_matches();

    // Se extraen argumentos necesarios; clap garantiza su presencia
    let device_path = args.value_of("device").unwrap_or_default();
    let program_path = args.value_of("program").unwrap_or_default();
    let stem = args.value_of("output").unwrap_or_default();

    let mut formats = Formats::empty();
    for format in args.values_of("format").into_iter().flatten() {
        match format.parse::<Format>() {
            Ok(format) => formats |= format.flag(),
            Err(()) => bail!("Unknown output format: {}", format),
        }
    }

    let fill = parse_number(args.value_of("fill").unwrap_or("0"))
        .and_then(|fill| u8::try_from(fill).ok())
        .context("Invalid fill byte")?;

    let hex_width = parse_number(args.value_of("hex-width").unwrap_or("16"))
        .and_then(|width| u8::try_from(width).ok())
        .filter(|&width| width > 0)
        .context("Invalid Intel HEX record width")?;

    let device: Device = read_json(device_path)?;
    let program: Program = read_json(program_path)?;

    log::info!("compiling {} for {}", program_path, device.name);

    let mut outputs = Outputs::new(formats, Options { fill, hex_width });
    let warnings = match ratc::compile(&program, &device, &mut outputs) {
        Ok(warnings) => warnings,
        Err(error) => {
            eprint!("{}", Diagnostics::from(error));
            std::process::exit(1);
        }
    };

    if !warnings.is_empty() {
        eprint!("{}", Diagnostics::from(warnings).kind("warning"));
    }

    let artifacts = match outputs.finish() {
        Ok(artifacts) => artifacts,
        Err(error) => {
            eprint!("{}", Diagnostics::from(error));
            std::process::exit(1);
        }
    };

    for (format, artifact) in artifacts {
        let path = format!("{}.{}", stem, format.extension());
        let file = File::create(&path)
            .with_context(|| format!("Failed to open for writing: {}", path))?;

        let mut file = BufWriter::new(file);
        artifact
            .write(&mut file)
            .and_then(|()| file.flush())
            .with_context(|| format!("Failed to write {} output: {}", format, path))?;

        log::debug!("wrote {}", path);
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let file = File::open(Path::new(path))
        .with_context(|| format!("Failed to open for reading: {}", path))?;

    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Malformed JSON input: {}", path))
}

/// Decimal o hexadecimal con prefijo `0x`.
fn parse_number(text: &str) -> Option<u32> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}
