use std::path::PathBuf;
use std::process;

use anyhow::Context as _;
use clap::{Arg, ArgAction, Command};
use log::error;

use halgen::generate::GenerationReport;
use halgen::{generate, Config, MetadataSet};

fn run() -> anyhow::Result<GenerationReport> {
    let matches = Command::new("halgen")
        .about("Generate typed hardware policy APIs from MCU metadata files")
        .version(include_str!(concat!(env!("OUT_DIR"), "/version.txt")))
        .arg(
            Arg::new("family")
                .long("family")
                .short('f')
                .value_name("FAMILY")
                .help("Generate only this family (default: every family in the metadata tree)"),
        )
        .arg(
            Arg::new("mcu")
                .long("mcu")
                .value_name("MCU")
                .requires("family")
                .help("Generate only this MCU variant of the selected family"),
        )
        .arg(
            Arg::new("metadata")
                .long("metadata")
                .short('m')
                .value_name("DIR")
                .default_value("metadata")
                .help("Root of the metadata tree (vendors/, families/, peripherals/)"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("DIR")
                .default_value("out")
                .help("Root of the generated output tree"),
        )
        .arg(
            Arg::new("dry_run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Render everything, write nothing, report would-be output paths"),
        )
        .arg(
            Arg::new("validate")
                .long("validate")
                .action(ArgAction::SetTrue)
                .help("Render and syntax-check everything without writing; non-zero exit on any error"),
        )
        .arg(
            Arg::new("fail_fast")
                .long("fail-fast")
                .action(ArgAction::SetTrue)
                .help("Abort the batch at the first failing target instead of collecting failures"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .action(ArgAction::SetTrue)
                .help("Log each stage and file as it completes"),
        )
        .arg(
            Arg::new("log_level")
                .long("log")
                .short('l')
                .value_parser(["off", "error", "warn", "info", "debug", "trace"])
                .help(format!(
                    "Choose which messages to log (overrides {})",
                    env_logger::DEFAULT_FILTER_ENV
                )),
        )
        .get_matches();

    setup_logging(&matches);

    let config = Config {
        metadata_dir: matches
            .get_one::<String>("metadata")
            .map(PathBuf::from)
            .unwrap_or_default(),
        output_dir: matches
            .get_one::<String>("output")
            .map(PathBuf::from)
            .unwrap_or_default(),
        family: matches.get_one::<String>("family").cloned(),
        mcu: matches.get_one::<String>("mcu").cloned(),
        dry_run: matches.get_flag("dry_run"),
        validate_only: matches.get_flag("validate"),
        fail_fast: matches.get_flag("fail_fast"),
        verbose: matches.get_flag("verbose"),
    };

    let set = MetadataSet::load(&config.metadata_dir).with_context(|| {
        format!(
            "couldn't load the metadata tree at `{}`",
            config.metadata_dir.display()
        )
    })?;

    let report = generate(&set, &config)?;
    report.log_summary();
    Ok(report)
}

fn setup_logging(matches: &clap::ArgMatches) {
    // * Log at info by default.
    // * Allow users the option of setting complex logging filters using
    //   env_logger's `RUST_LOG` environment variable.
    // * Override both of those if the logging level is set via the `--log`
    //   command line argument.
    let env = env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info");
    let mut builder = env_logger::Builder::from_env(env);
    builder.format_timestamp(None);

    let log_lvl_from_env = std::env::var_os(env_logger::DEFAULT_FILTER_ENV).is_some();

    if log_lvl_from_env {
        log::set_max_level(log::LevelFilter::Trace);
    } else {
        let level = match matches.get_one::<String>("log_level") {
            Some(lvl) => lvl.parse().unwrap_or(log::LevelFilter::Info),
            None => log::LevelFilter::Info,
        };
        log::set_max_level(level);
        builder.filter_level(level);
    }

    builder.init();
}

fn main() {
    match run() {
        Ok(report) => {
            if report.has_failures() {
                process::exit(1);
            }
        }
        Err(e) => {
            error!("{e}");
            for cause in e.chain().skip(1) {
                error!("caused by: {cause}");
            }
            process::exit(1);
        }
    }
}
