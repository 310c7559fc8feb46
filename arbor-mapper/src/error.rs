//
// Copyright (c) The Arbor Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::{error, warn};

use crate::parse::ParseError;

// Arbor errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Input
    MalformedInput(ParseError),
    // Structural errors
    InterfaceOutOfRange(Ipv4Network, Ipv4Addr),
    InconsistentRoute(Ipv4Network),
    // Configuration
    InvalidCollectorSizing(u16, u8),
}

// Arbor I/O errors.
#[derive(Debug)]
pub enum IoError {
    SocketError(std::io::Error),
    SendError(std::io::Error),
    RecvError(std::io::Error),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::MalformedInput(error) => {
                warn!(%error, "{}", self);
            }
            Error::InterfaceOutOfRange(prefix, addr) => {
                warn!(%prefix, %addr, "{}", self);
            }
            Error::InconsistentRoute(prefix) => {
                warn!(%prefix, "{}", self);
            }
            Error::InvalidCollectorSizing(max_threads, nb_ip_ids) => {
                error!(%max_threads, %nb_ip_ids, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::MalformedInput(..) => {
                write!(f, "failed to parse subnet file")
            }
            Error::InterfaceOutOfRange(..) => {
                write!(f, "interface lies outside the subnet prefix")
            }
            Error::InconsistentRoute(..) => {
                write!(f, "route cannot be fit into the network tree")
            }
            Error::InvalidCollectorSizing(..) => {
                write!(
                    f,
                    "maximum thread count is too small for the requested \
                     amount of IP-ID samples"
                )
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(error) => Some(error),
            Error::MalformedInput(error) => Some(error),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

impl From<ParseError> for Error {
    fn from(error: ParseError) -> Error {
        Error::MalformedInput(error)
    }
}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::SocketError(error)
            | IoError::SendError(error)
            | IoError::RecvError(error) => {
                warn!(error = %with_source(error), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::SocketError(..) => {
                write!(f, "failed to create raw IP socket")
            }
            IoError::SendError(..) => {
                write!(f, "failed to send probe packet")
            }
            IoError::RecvError(..) => {
                write!(f, "failed to receive probe reply")
            }
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::SocketError(error)
            | IoError::SendError(error)
            | IoError::RecvError(error) => Some(error),
        }
    }
}

// ===== global functions =====

fn with_source<E: std::error::Error>(error: E) -> String {
    if let Some(source) = error.source() {
        format!("{} ({})", error, with_source(source))
    } else {
        error.to_string()
    }
}
