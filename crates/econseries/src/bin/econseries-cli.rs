#![forbid(unsafe_code)]

use std::process::ExitCode;

use econseries::{
    CallLedger, ContextSources, DateRange, FormulaEngine, FunctionRegistry, Value,
    write_series_csv_string,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Csv,
}

#[derive(Debug, Clone)]
struct CliArgs {
    formula: String,
    sources: ContextSources,
    format: OutputFormat,
    trace: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{error}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<(), String> {
    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let context = args.sources.load().map_err(|error| error.to_string())?;
    let mut ledger = CallLedger::new();
    let result = FormulaEngine::new().evaluate_with_ledger(&args.formula, &context, &mut ledger);

    if args.trace && !ledger.is_empty() {
        eprintln!("{}", ledger.render_plain());
    }
    let value = result.map_err(|error| error.to_string())?;

    match (args.format, &value) {
        (OutputFormat::Json, _) => {
            let body = serde_json::to_string(&value).map_err(|error| error.to_string())?;
            println!("{body}");
        }
        (OutputFormat::Csv, Value::Series(series)) => {
            let body = write_series_csv_string(series).map_err(|error| error.to_string())?;
            print!("{body}");
        }
        (OutputFormat::Csv, Value::Scalar(_)) => {
            return Err("csv output needs a series result; use --format json".to_owned());
        }
    }
    Ok(())
}

fn parse_args() -> Result<Option<CliArgs>, String> {
    let mut formula = None;
    let mut sources = ContextSources::new();
    let mut from = None;
    let mut to = None;
    let mut format = OutputFormat::Json;
    let mut trace = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--formula" | "-f" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--formula requires a formula".to_owned())?;
                formula = Some(value);
            }
            "--series" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--series requires ID=PATH".to_owned())?;
                let (id, path) = value
                    .split_once('=')
                    .filter(|(id, path)| !id.is_empty() && !path.is_empty())
                    .ok_or_else(|| format!("--series expects ID=PATH, got {value}"))?;
                sources = sources.with_series_file(id, path);
            }
            "--context" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--context requires a path".to_owned())?;
                sources = sources.with_context_file(value);
            }
            "--from" => {
                from = Some(
                    args.next()
                        .ok_or_else(|| "--from requires a date (YYYY-MM-DD)".to_owned())?,
                );
            }
            "--to" => {
                to = Some(
                    args.next()
                        .ok_or_else(|| "--to requires a date (YYYY-MM-DD)".to_owned())?,
                );
            }
            "--format" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--format requires json or csv".to_owned())?;
                format = match value.as_str() {
                    "json" => OutputFormat::Json,
                    "csv" => OutputFormat::Csv,
                    _ => return Err(format!("unsupported format: {value}")),
                };
            }
            "--trace" => {
                trace = true;
            }
            "--list-functions" => {
                print_functions();
                return Ok(None);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    let formula = formula.ok_or_else(|| "--formula is required (see --help)".to_owned())?;
    let range = DateRange::parse(from.as_deref(), to.as_deref()).map_err(|error| error.to_string())?;

    Ok(Some(CliArgs {
        formula,
        sources: sources.with_range(range),
        format,
        trace,
    }))
}

fn print_functions() {
    for spec in FunctionRegistry::builtin().iter() {
        println!("{:<12} {} arg(s)  {}", spec.name, spec.arity(), spec.summary);
    }
}

fn print_help() {
    println!(
        "econseries-cli\n\
         Usage:\n\
         \teconseries-cli --formula <F> [--series ID=PATH.csv]... [--context PATH.json] [--from DATE] [--to DATE] [--format json|csv] [--trace]\n\
         Options:\n\
         \t-f, --formula <F>      formula to evaluate, e.g. \"ROC(MA(GDP,3),2)\"\n\
         \t--series <ID=PATH>     load a date,value CSV as series ID (repeatable)\n\
         \t--context <path>       load a JSON object of id -> [[date, value], ...] (repeatable)\n\
         \t--from <YYYY-MM-DD>    drop observations before this date\n\
         \t--to <YYYY-MM-DD>      drop observations after this date\n\
         \t--format <json|csv>    output format (csv needs a series result; default json)\n\
         \t--trace                print each function call to stderr\n\
         \t--list-functions       list the built-in functions and exit\n\
         \t-h, --help             show this help"
    );
}
