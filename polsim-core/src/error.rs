//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

// Errors surfaced by the core evaluation types themselves, as opposed to
// ingestion-time parse failures (which live in `polsim-ingest`).
#[derive(Debug)]
pub enum Error {
    InvalidMaxHosts(i64),
    InvalidPortRange { start: u16, end: u16 },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidMaxHosts(value) => {
                write!(f, "max_hosts must be a positive integer, got {value}")
            }
            Error::InvalidPortRange { start, end } => {
                write!(f, "invalid port range: {start}-{end}")
            }
        }
    }
}

impl std::error::Error for Error {}
