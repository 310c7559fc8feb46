//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;

use std::path::Path;

use arbor_mapper::error::{Error, IoError};
use arbor_mapper::instance::Mapper;
use clap::{App, Arg};
use config::{Config, LoggingFileRotation, LoggingFmtStyle};
use nix::unistd::Uid;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging) {
    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = match config.file.rotation {
            LoggingFileRotation::Never => {
                rolling::never(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Hourly => {
                rolling::hourly(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Daily => {
                rolling::daily(&config.file.dir, &config.file.name)
            }
        };

        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_thread_ids(config.file.fmt.show_thread_id)
            .with_file(config.file.fmt.show_source)
            .with_line_number(config.file.fmt.show_source)
            .with_ansi(config.file.fmt.colors);
        let layer = match config.file.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.stdout.fmt.show_thread_id)
            .with_file(config.stdout.fmt.show_source)
            .with_line_number(config.stdout.fmt.show_source)
            .with_ansi(config.stdout.fmt.colors);
        let layer = match config.stdout.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("arbor=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file)
        .with(stdout)
        .init();
}

// Maps a fatal error to the process exit code: 1 for input and
// configuration errors, 2 for missing raw-socket privileges, 3 for
// probe-primitive failures.
fn exit_code(error: &Error) -> i32 {
    match error {
        Error::MalformedInput(_)
        | Error::InterfaceOutOfRange(..)
        | Error::InvalidCollectorSizing(..) => 1,
        Error::IoError(IoError::SocketError(error))
            if error.kind() == std::io::ErrorKind::PermissionDenied =>
        {
            2
        }
        _ => 3,
    }
}

async fn run(config: &Config) -> Result<(), Error> {
    let input = match std::fs::read_to_string(&config.input) {
        Ok(input) => input,
        Err(err) => {
            error!(path = %config.input, %err, "failed to read subnet file");
            std::process::exit(1);
        }
    };

    let mut mapper = Mapper::new(config.collector())?;
    mapper.run(&input).await?;

    let stats = mapper.statistics();
    info!(
        internals = %stats.internals,
        only_subnet_children = %stats.only_subnet_children,
        complete_linkage = %stats.complete_linkage,
        partial_linkage = %stats.partial_linkage,
        covered_labels = %stats.covered_labels,
        "network tree statistics"
    );

    let output_dir = Path::new(&config.output_dir);
    for (name, report) in [
        ("subnets.out", mapper.subnet_report()),
        ("aliases.out", mapper.alias_report()),
        ("bipartite.out", mapper.bipartite_report()),
    ] {
        let path = output_dir.join(name);
        if let Err(err) = std::fs::write(&path, report) {
            error!(path = %path.display(), %err, "failed to write report");
            std::process::exit(3);
        }
    }

    Ok(())
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("Arbor topology mapper")
        .version(clap::crate_version!())
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .arg(
            Arg::with_name("input")
                .short("i")
                .long("input")
                .value_name("file")
                .help("Specify an alternative subnet snapshot."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let mut config = Config::load(config_file);
    if let Some(input) = matches.value_of("input") {
        config.input = input.to_owned();
    }

    // Check for raw-socket privileges.
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        std::process::exit(2);
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(run(&config));
    if let Err(error) = result {
        error!(%error, "fatal error");
        std::process::exit(exit_code(&error));
    }
}
