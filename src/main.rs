//! logtail - headless front end of the log engine
//!
//! Prints the merged, optionally filtered, stream of one or more log files and
//! keeps following them with `--follow`.

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use logtail::extract::default_recognizer;
use logtail::{format_line, OpenOptions, Session, SessionConfig, SessionEvent, TextOptions};
use std::io::Write;
use std::path::PathBuf;

fn cli() -> Command {
    let command = Command::new("logtail")
        .version(logtail::VERSION)
        .about("Merge, filter and follow log files")
        .long_about(
            "logtail indexes one or more log files without loading them into memory, \
             merges them by timestamp and prints the result. With --follow it keeps \
             printing lines as the files grow, surviving truncation and rotation.",
        )
        .arg(
            Arg::new("files")
                .help("Log files to merge")
                .required(true)
                .num_args(1..)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("follow")
                .short('f')
                .long("follow")
                .help("Keep printing lines appended to the files")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("filter")
                .short('e')
                .long("filter")
                .help("Only print lines containing this pattern")
                .value_name("PATTERN"),
        )
        .arg(
            Arg::new("regex")
                .short('r')
                .long("regex")
                .help("Treat the filter pattern as a regular expression")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("case-sensitive")
                .short('s')
                .long("case-sensitive")
                .help("Match the filter pattern case-sensitively")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("min-level")
                .short('l')
                .long("min-level")
                .help("Minimum severity: trace, debug, info, warn, error or critical")
                .value_name("LEVEL"),
        )
        .arg(
            Arg::new("max-lines")
                .short('n')
                .long("max-lines")
                .help("Only keep the newest N lines of the initial merge")
                .value_name("N")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("pretty")
                .long("pretty")
                .help("Pretty-print JSON lines")
                .action(ArgAction::SetTrue),
        );

    #[cfg(feature = "config")]
    let command = command.arg(
        Arg::new("config")
            .long("config")
            .help("Configuration file (defaults to <config dir>/logtail/config.toml)")
            .value_name("FILE")
            .value_parser(value_parser!(PathBuf)),
    );

    command
}

#[cfg(feature = "config")]
fn load_config(matches: &ArgMatches) -> Result<SessionConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::load_default()?,
    };
    Ok(config)
}

#[cfg(not(feature = "config"))]
fn load_config(_matches: &ArgMatches) -> Result<SessionConfig> {
    Ok(SessionConfig::default())
}

/// Print the filtered view from position `from` on; returns the view length.
async fn print_view(session: &Session, from: u64, pretty: bool) -> Result<u64> {
    session.refresh_filter().await?;
    let len = session.filtered_len()?;
    let options = TextOptions {
        block: true,
        ..TextOptions::default()
    };

    let mut out = Vec::new();
    for position in from..len {
        let Some(line) = session.filtered_line(position)? else {
            break;
        };
        let text = session.get_text(line, options).await?;
        let rendered = if pretty {
            format_line(&text.line, false).unwrap_or(text.line)
        } else {
            text.line
        };
        writeln!(out, "{}", rendered)?;
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&out)?;
    stdout.flush()?;
    Ok(len)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG controls verbosity)
    env_logger::init();

    let matches = cli().get_matches();

    let paths: Vec<PathBuf> = matches
        .get_many::<PathBuf>("files")
        .map(|files| files.cloned().collect())
        .unwrap_or_default();
    let follow = matches.get_flag("follow");
    let pretty = matches.get_flag("pretty");
    let options = OpenOptions::new(
        matches.get_one::<u64>("max-lines").copied(),
        matches.get_one::<String>("min-level").map(String::as_str),
        follow,
    )?;
    let config = load_config(&matches).context("Failed to load configuration")?;

    let (session, mut events) =
        Session::open_with(paths, options, config, default_recognizer()).await?;
    session.wait_ready().await?;

    for file in session.files() {
        if let Some(error) = session.file_error(file.id) {
            eprintln!("logtail: {}", error);
        }
    }

    if let Some(pattern) = matches.get_one::<String>("filter") {
        session
            .set_filter(
                pattern,
                matches.get_flag("regex"),
                matches.get_flag("case-sensitive"),
            )
            .await
            .context("Invalid filter")?;
    }

    let mut printed = print_view(&session, 0, pretty).await?;

    if follow {
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Some(SessionEvent::PendingLines { .. }) => {
                        printed = print_view(&session, printed, pretty).await?;
                    }
                    Some(SessionEvent::RotationDetected { file }) => {
                        eprintln!("logtail: {} was rotated", session.files()[file].name());
                        // Renumbered lines past the old end are printed again
                        printed = printed.min(session.filtered_len()?);
                        printed = print_view(&session, printed, pretty).await?;
                    }
                    Some(SessionEvent::ScanFailed { message, .. }) => {
                        eprintln!("logtail: {}", message);
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
    }

    session.close().await;
    Ok(())
}
