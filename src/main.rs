use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use clap::Subcommand;
use expression_interpreter::{Environment, Error, Interpreter, Value};
use miette::IntoDiagnostic;
use miette::NamedSource;
use miette::WrapErr;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

#[derive(Parser, Debug)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print every token of the file, one per line
    Tokenize { filename: PathBuf },
    /// Print the expression tree of the file
    Parse {
        filename: PathBuf,

        /// Print the tree as JSON instead of prefix form
        #[arg(long)]
        json: bool,
    },
    /// Evaluate the file and print its value
    Eval {
        filename: PathBuf,

        /// Bind a variable before evaluating, e.g. `-D limit=10`
        #[arg(short = 'D', value_name = "NAME=LITERAL", value_parser = parse_binding)]
        define: Vec<(String, String)>,

        /// Skip the right operand of `&&`/`||` when the left one decides the result
        #[arg(long)]
        short_circuit: bool,
    },
}

fn parse_binding(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((name, literal)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), literal.to_string()))
        }
        _ => Err(format!("expected NAME=LITERAL, got `{arg}`")),
    }
}

fn main() -> miette::Result<()> {
    initialize_logging();

    let args = Args::parse();

    match args.command {
        Commands::Tokenize { filename } => {
            let file_contents = read(&filename)?;

            match expression_interpreter::tokenize(&file_contents) {
                Ok(tokens) => {
                    for token in tokens {
                        println!("{token}");
                    }
                }
                Err(e) => exit_with(e.into(), &filename, file_contents),
            }
        }
        Commands::Parse { filename, json } => {
            let file_contents = read(&filename)?;

            let expression = match expression_interpreter::parse(&file_contents) {
                Ok(expression) => expression,
                Err(e) => exit_with(e, &filename, file_contents),
            };

            if json {
                let json = serde_json::to_string_pretty(&expression).into_diagnostic()?;
                println!("{json}");
            } else {
                println!("{expression}");
            }
        }
        Commands::Eval {
            filename,
            define,
            short_circuit,
        } => {
            let file_contents = read(&filename)?;

            let mut environment = Environment::new().with_builtins();
            for (name, literal) in define {
                let value = binding_value(&literal)
                    .wrap_err_with(|| format!("invalid value for `-D {name}`"))?;
                debug!(%name, %value, "command line binding");
                environment.define(name, value);
            }

            let expression = match expression_interpreter::parse(&file_contents) {
                Ok(expression) => expression,
                Err(e) => exit_with(e, &filename, file_contents),
            };

            let result = Interpreter::new(&mut environment)
                .short_circuit(short_circuit)
                .evaluate(&expression);
            match result {
                Ok(value) => println!("{value}"),
                Err(e) => exit_with(e.into(), &filename, file_contents),
            }
        }
    }
    Ok(())
}

fn read(filename: &Path) -> miette::Result<String> {
    fs::read_to_string(filename)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading `{}` failed", filename.display()))
}

/// Command line bindings are expressions over an empty environment, so
/// `-D name="text"` and `-D n=-1` both work.
fn binding_value(literal: &str) -> miette::Result<Value> {
    let mut scratch = Environment::new();
    expression_interpreter::run(literal, &mut scratch)
        .map_err(|e| miette::Report::new(e).with_source_code(literal.to_string()))
}

fn exit_with(error: Error, filename: &Path, source: String) -> ! {
    let code = match error {
        Error::Lex(_) | Error::Parse(_) => 65,
        Error::Runtime(_) => 70,
    };
    let report = miette::Report::new(error).with_source_code(NamedSource::new(
        filename.display().to_string(),
        source,
    ));
    eprintln!("{report:?}");
    std::process::exit(code);
}

fn initialize_logging() {
    let env_filter = env::var("RUST_LOG").unwrap_or_default();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::from_str(&env_filter).unwrap_or_default()),
        )
        .init();
}
