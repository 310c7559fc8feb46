//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use arbor_mapper::collector::CollectorConfig;
use arbor_mapper::consts::{
    DFLT_BASE_SRC_PORT, DFLT_MAX_THREADS, DFLT_NB_IPIDS, DFLT_SRC_PORT_SPAN,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // Subnet snapshot to map.
    pub input: String,
    // Directory receiving the subnet, alias and bipartite reports.
    pub output_dir: String,
    pub logging: Logging,
    pub probing: Probing,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub file: LoggingFile,
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFile {
    pub enabled: bool,
    pub dir: String,
    pub name: String,
    pub rotation: LoggingFileRotation,
    #[serde(flatten)]
    pub fmt: LoggingFmt,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    #[serde(flatten)]
    pub fmt: LoggingFmt,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFmt {
    pub style: LoggingFmtStyle,
    pub colors: bool,
    pub show_thread_id: bool,
    pub show_source: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFileRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFmtStyle {
    Compact,
    Full,
    Json,
    Pretty,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Probing {
    pub max_threads: u16,
    pub nb_ip_ids: u8,
    pub timeout_ms: u64,
    pub base_src_port: u16,
    pub src_port_span: u16,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/arbor/arbord.toml";

    pub(crate) fn load(config_file: Option<&str>) -> Config {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => toml::from_str(&config_str)
                .expect("Failed to parse configuration file"),
            Err(err) => {
                eprintln!("Failed to load configuration file: {err}");
                eprintln!("Falling back to default configuration...");
                Config::default()
            }
        }
    }

    pub(crate) fn collector(&self) -> CollectorConfig {
        CollectorConfig {
            max_threads: self.probing.max_threads,
            nb_ip_ids: self.probing.nb_ip_ids,
            timeout: Duration::from_millis(self.probing.timeout_ms),
            base_src_port: self.probing.base_src_port,
            src_port_span: self.probing.src_port_span,
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            input: "/var/opt/arbor/subnets.txt".to_owned(),
            output_dir: "/var/opt/arbor".to_owned(),
            logging: Default::default(),
            probing: Default::default(),
        }
    }
}

// ===== impl LoggingFile =====

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: false,
            dir: "/var/log".to_owned(),
            name: "arbord.log".to_owned(),
            rotation: Default::default(),
            fmt: Default::default(),
        }
    }
}

// ===== impl LoggingStdout =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            fmt: Default::default(),
        }
    }
}

// ===== impl LoggingFmt =====

impl Default for LoggingFmt {
    fn default() -> LoggingFmt {
        LoggingFmt {
            style: LoggingFmtStyle::Full,
            colors: false,
            show_thread_id: false,
            show_source: false,
        }
    }
}

// ===== impl LoggingFmtStyle =====

impl Default for LoggingFmtStyle {
    fn default() -> LoggingFmtStyle {
        LoggingFmtStyle::Full
    }
}

// ===== impl Probing =====

impl Default for Probing {
    fn default() -> Probing {
        Probing {
            max_threads: DFLT_MAX_THREADS,
            nb_ip_ids: DFLT_NB_IPIDS,
            timeout_ms: 2500,
            base_src_port: DFLT_BASE_SRC_PORT,
            src_port_span: DFLT_SRC_PORT_SPAN,
        }
    }
}
