#![forbid(unsafe_code)]

use std::path::PathBuf;

use es_conformance::{HarnessConfig, enforce_green, run_case_by_id, run_suite, write_report};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut case_filter: Option<String> = None;
    let mut report_path: Option<PathBuf> = None;
    let mut require_green = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--case-id" => {
                let value = args
                    .next()
                    .ok_or("--case-id requires a value (e.g. ma_window_two)")?;
                case_filter = Some(value);
            }
            "--write-report" => {
                let value = args.next().ok_or("--write-report requires a path")?;
                report_path = Some(PathBuf::from(value));
            }
            "--require-green" => {
                require_green = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let config = HarnessConfig::default_paths();
    let report = match case_filter.as_deref() {
        Some(case_id) => run_case_by_id(&config, case_id)?,
        None => run_suite(&config)?,
    };

    for result in &report.results {
        match &result.mismatch {
            Some(mismatch) => println!("FAIL {} `{}`: {mismatch}", result.case_id, result.formula),
            None => println!("pass {}", result.case_id),
        }
    }
    println!(
        "suite={} fixtures={} passed={} failed={} green={}",
        report.suite,
        report.fixture_count,
        report.passed,
        report.failed,
        report.is_green()
    );

    if let Some(path) = report_path {
        write_report(&report, &path)?;
        println!("wrote report={}", path.display());
    }

    if require_green {
        enforce_green(&report)?;
    }

    Ok(())
}

fn print_help() {
    println!(
        "es-conformance-cli\n\
         Usage:\n\
         \tes-conformance-cli [--case-id ID] [--write-report PATH] [--require-green]\n\
         Options:\n\
         \t--case-id <id>        Run only one fixture case\n\
         \t--write-report <path> Write the suite report as JSON\n\
         \t--require-green       Exit non-zero when any case fails\n\
         \t-h, --help            Show this help"
    );
}
