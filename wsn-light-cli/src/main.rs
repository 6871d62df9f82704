//! WSN Light CLI Application
//!
//! Command-line front end for the sensor-to-lighting bridge. It uses the
//! wsn-light-core library and adds:
//! - Configuration file loading (TOML or JSON)
//! - Output sink selection (log or Art-Net)
//! - Ctrl-C handling for a clean blackout and modem reset

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use wsn_light_core::{LightBridge, OutputSink, SerialTransport, SharedTransport, StopSignal};

mod config;
mod sink;

/// Where output vectors go
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkKind {
    /// Log changed vectors (use -v to see them)
    Log,
    /// Send ArtDmx packets over UDP
    Artnet,
}

/// WSN Light - Drive lighting from wireless sensor readings
#[derive(Parser, Debug)]
#[command(name = "wsn-light")]
#[command(about = "Bridge wireless sensor readings to a lighting universe", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (TOML, or JSON); defaults to ~/.wsnlight.conf
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serial device of the radio modem (overrides the configuration)
    #[arg(short, long, value_name = "PATH")]
    port: Option<String>,

    /// Output sink
    #[arg(long, value_enum, default_value_t = SinkKind::Log)]
    sink: SinkKind,

    /// Art-Net destination address
    #[arg(long, value_name = "ADDR", default_value = sink::DEFAULT_ARTNET_TARGET)]
    artnet_target: String,

    /// Use the modem's current settings instead of configuring it
    #[arg(long)]
    skip_modem_setup: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("WSN Light CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using core library v{}", wsn_light_core::VERSION);

    let mut config = config::resolve_config(args.config.as_deref())?;
    if let Some(port) = &args.port {
        config.link.port = port.clone();
    }
    if args.skip_modem_setup {
        config.link.configure = false;
    }
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        handler_stop.request();
    })
    .context("Error setting Ctrl-C handler")?;

    let sink: Box<dyn OutputSink> = match args.sink {
        SinkKind::Log => Box::new(sink::LogSink::new()),
        SinkKind::Artnet => Box::new(
            sink::ArtNetSink::new(&args.artnet_target)
                .with_context(|| format!("Failed to open Art-Net output to {}", args.artnet_target))?,
        ),
    };

    let serial = SerialTransport::open(
        &config.link.port,
        config.link.baud_rate()?,
        config.link.read_timeout(),
    )
    .with_context(|| format!("Failed to open serial port {}", config.link.port))?;

    log::info!(
        "Bridging {} sensor(s) to universe {} at {} fps",
        config.sensors.addresses.len(),
        config.output.universe,
        config.output.frame_rate
    );

    let report = LightBridge::new(config, SharedTransport::new(serial), sink)
        .with_stop(stop)
        .run()
        .context("Bridge stopped with an error")?;

    log::info!(
        "Done: {} ticks ({} dropped), {} frames received, {} from unknown sensors",
        report.pacing.ticks,
        report.pacing.dropped,
        report.ingest.frames,
        report.unknown_frames
    );
    for (address, seen) in &report.last_seen {
        match seen {
            Some(at) => log::info!("Sensor {} last heard at {}", address, at.to_rfc3339()),
            None => log::warn!("Sensor {} never reported", address),
        }
    }
    if report.ingest.corrupted > 0 || report.ingest.conflicts > 0 {
        log::warn!(
            "Line noise: {} corrupted frame(s), {} framing conflict(s)",
            report.ingest.corrupted,
            report.ingest.conflicts
        );
    }

    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "wsn-light",
            "--port",
            "/dev/ttyUSB1",
            "--sink",
            "artnet",
            "-vv",
        ])
        .unwrap();

        assert_eq!(args.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(args.sink, SinkKind::Artnet);
        assert_eq!(args.artnet_target, sink::DEFAULT_ARTNET_TARGET);
        assert_eq!(args.verbose, 2);
        assert!(!args.print_config);
    }

    #[test]
    fn test_sink_defaults_to_log() {
        let args = Args::try_parse_from(["wsn-light"]).unwrap();
        assert_eq!(args.sink, SinkKind::Log);
        assert!(args.config.is_none());
    }
}
