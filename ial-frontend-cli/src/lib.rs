use std::{
    fs::File,
    io::{self, Write},
    path::PathBuf,
};

use quick_error::quick_error;
use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Value};

use ial::BasicDevice;
use ial_backend_qcow2::{
    refcount::OptionsParseError, AnalyzeError, Image, OpenError, Report, ReportOptions,
    ScanOptions,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Json,
    /// One `key: value` line per field.
    Raw,
}
impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Json
    }
}
impl OutputFormat {
    pub fn parse(format: &str) -> Result<Self, CliError> {
        match format {
            "json" => Ok(OutputFormat::Json),
            "raw" => Ok(OutputFormat::Raw),
            other => Err(CliError::UnknownOutputFormat(other.to_owned())),
        }
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum CliError {
        FileNotFound(path: PathBuf) {
            description("image file not found")
            display("qcow2 file [{}] does not exist", path.display())
        }
        Open(path: PathBuf, err: io::Error) {
            description("image file couldn't be opened")
            display("failed to open qcow2 file [{}]: {}", path.display(), err)
        }
        Image(err: OpenError) {
            description("not a supported qcow2 image")
            display("{}", err)
            from()
        }
        Analyze(err: AnalyzeError) {
            description("analysis failed")
            display("{}", err)
            from()
        }
        UnknownOutputFormat(format: String) {
            description("unknown output format")
            display("unknown output format: `{}`, expected `json` or `raw`", format)
        }
        Options(err: OptionsParseError) {
            description("invalid scan options")
            display("invalid scan options: {}", err)
            from()
        }
        Serialize(err: serde_json::Error) {
            description("serialization error")
            display("failed to serialize the report: {}", err)
            from()
        }
        Write(err: io::Error) {
            description("i/o error")
            display("failed to write the report: {}", err)
            from()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub path: PathBuf,
    pub output: OutputFormat,
    /// Print offsets and sizes in hexadecimal. Only affects the raw format.
    pub hex: bool,
    pub report: ReportOptions,
    pub scan: ScanOptions,
}

impl Config {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            output: OutputFormat::default(),
            hex: false,
            report: ReportOptions::default(),
            scan: ScanOptions::default(),
        }
    }
}

/// Analyze the image at `config.path` and write the report to `out`.
pub fn run<W: Write>(config: &Config, out: &mut W) -> Result<(), CliError> {
    if !config.path.exists() {
        return Err(CliError::FileNotFound(config.path.clone()));
    }
    log::debug!("opening qcow2 image {}", config.path.display());
    let file = File::open(&config.path).map_err(|err| CliError::Open(config.path.clone(), err))?;

    let image = Image::open(BasicDevice::new(file))?;
    let report = image.analyze(&config.scan, &config.report)?;
    log::debug!(
        "image end offset of {} is {:#x}",
        config.path.display(),
        report.basic().image_end_offset
    );

    render(&report, config.output, config.hex, out)
}

pub fn render<W: Write>(
    report: &Report,
    format: OutputFormat,
    hex: bool,
    out: &mut W,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let formatter = PrettyFormatter::with_indent(b"    ");
            let mut serializer = serde_json::Serializer::with_formatter(&mut *out, formatter);
            report.serialize(&mut serializer)?;
            writeln!(out)?;
        }
        OutputFormat::Raw => {
            if let Value::Object(fields) = serde_json::to_value(report)? {
                for (key, value) in fields {
                    writeln!(out, "{}: {}", key, raw_value(&key, &value, hex))?;
                }
            }
        }
    }
    Ok(())
}

fn raw_value(key: &str, value: &Value, hex: bool) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(string) => string.clone(),
        Value::Number(number) => match number.as_u64() {
            Some(number) if hex && (key.ends_with("_offset") || key.ends_with("_size")) => {
                format!("{:#x}", number)
            }
            _ => number.to_string(),
        },
        Value::Array(values) => values
            .iter()
            .map(|value| raw_value(key, value, hex))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
