use clap::{crate_authors, crate_version, App, Arg};
use std::{io, process};

use ial_backend_qcow2::{ReportOptions, ScanOptions};
use ial_frontend_cli::{CliError, Config, OutputFormat};

fn config_from_args() -> Result<Config, CliError> {
    let app = App::new("qcow2-analyze")
        .author(crate_authors!())
        .version(crate_version!())
        .about("Report the header fields and the allocated size of a qcow2 image")
        .arg(
            Arg::with_name("FILE")
                .takes_value(true)
                .required(true)
                .help("The qcow2 image to analyze.")
                .short("f")
                .long("file"),
        )
        .arg(
            Arg::with_name("VERBOSE")
                .help("Also report table locations, feature flags and header extensions.")
                .short("v")
                .long("verbose"),
        )
        .arg(
            Arg::with_name("HEX")
                .help("Print offsets and sizes in hexadecimal (raw output only).")
                .short("H")
                .long("hex"),
        )
        .arg(
            Arg::with_name("OUTPUT")
                .takes_value(true)
                .possible_values(&["json", "raw"])
                .default_value("json")
                .help("The output format.")
                .short("o")
                .long("output"),
        )
        .arg(
            Arg::with_name("SCAN_OPTIONS")
                .takes_value(true)
                .help("Comma-separated refcount scan options: `strict` or `lenient`.")
                .short("s")
                .long("scan-options"),
        );

    let matches = app.get_matches();

    let mut config = Config::new(matches.value_of_os("FILE").unwrap_or_default());
    config.report = ReportOptions {
        verbose: matches.is_present("VERBOSE"),
    };
    config.hex = matches.is_present("HEX");
    config.output = OutputFormat::parse(matches.value_of("OUTPUT").unwrap_or("json"))?;
    config.scan = matches
        .value_of("SCAN_OPTIONS")
        .map(ScanOptions::parse)
        .transpose()?
        .unwrap_or_default();

    Ok(config)
}

fn main() {
    env_logger::init();

    let result = config_from_args().and_then(|config| {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        ial_frontend_cli::run(&config, &mut out)
    });

    if let Err(err) = result {
        eprintln!("qcow2-analyze: {}", err);
        process::exit(1);
    }
}
