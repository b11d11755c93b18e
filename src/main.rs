//! Command-line monitor: follows a thermometry log and reports the newest
//! converted reading of every channel.

use clap::Parser;
use crossbeam_channel::{bounded, select};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;

use thermo_tail::{
    parse_tail_size, CalibrationId, CalibrationRegistry, ChannelConsumer, ChannelError, Dataset,
    PollError, PollEvent, Session, SessionError, Settings,
};

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("Failed to install Ctrl+C handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Follow a data-logger thermometry file and convert its readings.
#[derive(Parser, Debug)]
#[command(name = "thermo-tail")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Tab-separated log file
    file: PathBuf,

    /// Number of newest rows to keep (accepts k and M suffixes)
    #[arg(short, long, value_parser = parse_last)]
    last: Option<usize>,

    /// Refresh interval in milliseconds
    #[arg(short, long)]
    interval_ms: Option<u64>,

    /// Channel calibration as CHANNEL=NAME, e.g. 3=RF100
    #[arg(long = "cal", value_name = "CH=NAME", value_parser = parse_calibration)]
    calibrations: Vec<(usize, CalibrationId)>,

    /// Channel label as CHANNEL=TEXT
    #[arg(long = "label", value_name = "CH=TEXT", value_parser = parse_label)]
    labels: Vec<(usize, String)>,

    /// Settings file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the converted tail once and exit
    #[arg(long)]
    once: bool,
}

fn parse_last(text: &str) -> Result<usize, String> {
    parse_tail_size(text).ok_or_else(|| format!("not a row count: {text:?}"))
}

fn split_assignment(text: &str) -> Result<(usize, &str), String> {
    let (channel, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected CHANNEL=VALUE, got {text:?}"))?;
    let channel = channel
        .trim()
        .parse()
        .map_err(|_| format!("not a channel number: {channel:?}"))?;
    Ok((channel, value.trim()))
}

fn parse_calibration(text: &str) -> Result<(usize, CalibrationId), String> {
    let (channel, name) = split_assignment(text)?;
    let id = CalibrationRegistry.resolve_name(name).id();
    if id == CalibrationId::NoConversion && !name.eq_ignore_ascii_case(id.name()) {
        let known: Vec<&str> = CalibrationId::SELECTABLE.iter().map(|id| id.name()).collect();
        return Err(format!(
            "unknown calibration {name:?} (known: {})",
            known.join(", ")
        ));
    }
    Ok((channel, id))
}

fn parse_label(text: &str) -> Result<(usize, String), String> {
    split_assignment(text).map(|(channel, label)| (channel, label.to_string()))
}

fn load_settings(cli: &Cli) -> Settings {
    let loaded = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let mut settings = loaded.unwrap_or_else(|e| {
        log::warn!("{}, using defaults", e);
        Settings::default()
    });

    if let Some(last) = cli.last {
        settings.tail_size = last;
    }
    if let Some(ms) = cli.interval_ms {
        settings.poll_interval_ms = ms;
    }
    settings
}

fn print_table(session: &Session, dataset: &Dataset) {
    let specs = session.channel_specs();
    let header: Vec<String> = specs
        .iter()
        .map(|spec| format!("{} [{}]", spec.label, spec.calibration))
        .collect();
    println!("timestamp\telapsed\t{}", header.join("\t"));

    for row in dataset.rows() {
        let values: Vec<String> = row.values.iter().map(|v| format!("{v:.4}")).collect();
        println!(
            "{}\t{:.1}\t{}",
            row.timestamp,
            row.elapsed_seconds,
            values.join("\t")
        );
    }
}

fn report_latest(session: &Session, dataset: &Dataset) {
    let Some(row) = dataset.last() else {
        log::info!("No rows yet");
        return;
    };
    let readings: Vec<String> = session
        .channel_specs()
        .iter()
        .filter_map(|spec| Some(format!("{}={:.4}", spec.label, row.value(spec.index)?)))
        .collect();
    log::info!("{} {}", row.timestamp, readings.join(" "));
}

fn run(cli: Cli) -> Result<(), CliError> {
    let settings = load_settings(&cli);
    let mut session = Session::open(&cli.file, &settings)?;

    for (channel, id) in &cli.calibrations {
        session.set_channel_calibration(*channel, *id)?;
    }
    for (channel, label) in &cli.labels {
        session.rename_channel(*channel, label.as_str())?;
    }

    if cli.once {
        let dataset = session.refresh_once()?;
        print_table(&session, &dataset);
        return Ok(());
    }

    let (consumer, events) = ChannelConsumer::pair();
    session.subscribe(consumer);

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })?;

    let interval = settings.poll_interval().max(Duration::from_millis(10));
    log::info!(
        "Polling {} every {:?}, keeping {} rows",
        session.path().display(),
        interval,
        session.tail_size()
    );
    session.start_polling(interval);

    loop {
        select! {
            recv(events) -> event => match event {
                Ok(PollEvent::Updated(dataset)) => report_latest(&session, &dataset),
                Ok(PollEvent::Error(message)) => log::warn!("Refresh failed: {}", message),
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => {
                log::info!("Stopping");
                break;
            }
        }
    }

    session.stop_polling();
    Ok(())
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
