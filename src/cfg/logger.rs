// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fastrace::collector::{Config as FastraceConfig, ConsoleReporter};
use serde::Deserialize;
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, fmt::writer::BoxMakeWriter, layer::SubscriberExt,
};

/// Where log lines go. Tagged by the `output` key, so a file sink carries
/// its path and rotation inline:
///
/// ```yaml
/// logger:
///   level: "info"
///   output: file
///   path: logs/server.log
///   rotate: daily
/// ```
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "output", rename_all = "lowercase")]
enum Sink {
    Stdout,
    Stderr,
    File {
        path: PathBuf,
        #[serde(default)]
        rotate: Rotate,
    },
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
enum Rotate {
    Minutely,
    Hourly,
    Daily,
    #[default]
    Never,
}

impl From<Rotate> for Rotation {
    fn from(r: Rotate) -> Self {
        match r {
            Rotate::Minutely => Rotation::MINUTELY,
            Rotate::Hourly => Rotation::HOURLY,
            Rotate::Daily => Rotation::DAILY,
            Rotate::Never => Rotation::NEVER,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Which call-site details each line carries. Everything defaults off.
#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(default)]
struct ShowFields {
    target: bool,
    line: bool,
    file: bool,
}

/// The `logger:` section of a logger YAML file.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggerSettings {
    level: String,
    #[serde(default)]
    format: LogFormat,
    #[serde(default)]
    show: ShowFields,
    #[serde(flatten)]
    sink: Sink,
}

#[derive(Debug, Deserialize)]
struct LoggerFile {
    logger: LoggerSettings,
}

impl LoggerSettings {
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read logger config {path}"))?;
        let file: LoggerFile = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse logger config {path}"))?;
        Ok(file.logger)
    }
}

impl Sink {
    fn open(&self) -> Result<(BoxMakeWriter, WorkerGuard)> {
        Ok(match self {
            Sink::Stdout => non_blocking(io::stdout()),
            Sink::Stderr => non_blocking(io::stderr()),
            Sink::File { path, rotate } => {
                let dir = path
                    .parent()
                    .filter(|d| !d.as_os_str().is_empty())
                    .unwrap_or_else(|| Path::new("."));
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "frond.log".to_string());

                // With rotation `never` the prefix is the whole file name.
                let appender = RollingFileAppender::builder()
                    .rotation((*rotate).into())
                    .filename_prefix(name)
                    .build(dir)
                    .with_context(|| {
                        format!("failed to open log file {}", path.display())
                    })?;
                non_blocking(appender)
            },
        })
    }
}

fn non_blocking(w: impl io::Write + Send + 'static) -> (BoxMakeWriter, WorkerGuard) {
    let (writer, guard) = tracing_appender::non_blocking(w);
    (BoxMakeWriter::new(writer), guard)
}

/// Build the subscriber described by `settings` without installing it.
///
/// `RUST_LOG` takes precedence over the configured level, so verbosity can
/// be raised per run without editing the config file.
pub fn build_subscriber(
    settings: &LoggerSettings,
) -> Result<(Box<dyn Subscriber + Send + Sync>, WorkerGuard)> {
    let (writer, guard) = settings.sink.open()?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .context("no usable log filter in RUST_LOG or logger config")?;

    let lines = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(settings.show.target)
        .with_line_number(settings.show.line)
        .with_file(settings.show.file);

    let trace_bridge = fastrace_tracing::FastraceCompatLayer::new();
    let base = Registry::default().with(filter).with(trace_bridge);

    let subscriber: Box<dyn Subscriber + Send + Sync> = match settings.format {
        LogFormat::Text => Box::new(base.with(lines)),
        LogFormat::Json => Box::new(base.with(lines.json())),
    };
    Ok((subscriber, guard))
}

/// Read a logger YAML file, install the subscriber it describes as the
/// global default and start the fastrace reporter.
///
/// Keep the returned guard alive for the process lifetime; dropping it
/// flushes and stops the non-blocking writer.
pub fn init_logger(config_path: &str) -> Result<WorkerGuard> {
    let settings = LoggerSettings::from_yaml_file(config_path)?;
    let (subscriber, guard) = build_subscriber(&settings)?;

    fastrace::set_reporter(ConsoleReporter, FastraceConfig::default());
    tracing::subscriber::set_global_default(subscriber)
        .context("a global tracing subscriber is already installed")?;

    Ok(guard)
}
