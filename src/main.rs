use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process;

use gitp4_migrate::opts::Config;

struct Args {
    config_path: PathBuf,
    input_path: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut config_path = None;
    let mut input_path = None;
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                config_path = Some(PathBuf::from(
                    iter.next().ok_or("--config requires a value")?,
                ));
            }
            "--input" => {
                input_path = Some(PathBuf::from(
                    iter.next().ok_or("--input requires a value")?,
                ));
            }
            other => return Err(format!("unrecognized argument: {other}")),
        }
    }
    let config_path = config_path.ok_or("--config <path> is required")?;
    Ok(Args {
        config_path,
        input_path,
    })
}

fn report_error(err: &(dyn Error + 'static)) {
    eprintln!("{err}");
    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("Caused by: {cause}");
        source = cause.source();
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let args = parse_args().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let compiled = Config::from_toml_file(&args.config_path)?.compile()?;

    match &args.input_path {
        Some(path) => {
            let reader = BufReader::new(File::open(path)?);
            gitp4_migrate::run(&compiled, reader)?;
        }
        None => {
            let reader = BufReader::new(io::stdin().lock());
            gitp4_migrate::run(&compiled, reader)?;
        }
    }
    Ok(())
}

fn main() {
    if let Err(err) = run() {
        report_error(err.as_ref());
        process::exit(1);
    }
}
