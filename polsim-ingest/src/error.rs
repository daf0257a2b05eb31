//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    InvalidCidr(String),
    InvalidAddress(String),
    InvalidNetmask(String),
    MissingField { object: String, field: &'static str },
    UnsupportedAddressType(String),
    InvalidServiceEntry(String),
    InvalidPortLine(String),
    UnsupportedProtocol(String),
    PortOutOfRange(String),
    InvalidJsonArray(String),
    MissingCsvHeader { path: String, header: &'static str },
    MissingSheet(&'static str),
    RuleSourceSelection(String),
    Core(polsim_core::Error),
    Io(std::io::Error),
    Csv(csv::Error),
    Excel(String),
    Database(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidCidr(value) => write!(f, "invalid IPv4 CIDR: {value}"),
            Error::InvalidAddress(value) => write!(f, "invalid IPv4 address: {value}"),
            Error::InvalidNetmask(value) => write!(f, "invalid netmask: {value}"),
            Error::MissingField { object, field } => {
                write!(f, "missing field '{field}' for address object: {object}")
            }
            Error::UnsupportedAddressType(t) => write!(f, "unsupported address type: {t}"),
            Error::InvalidServiceEntry(v) => write!(f, "invalid service entry: {v}"),
            Error::InvalidPortLine(l) => write!(f, "invalid port line: {l}"),
            Error::UnsupportedProtocol(p) => write!(f, "unsupported protocol: {p}"),
            Error::PortOutOfRange(p) => write!(f, "port out of range: {p}"),
            Error::InvalidJsonArray(v) => write!(f, "invalid JSON array: {v}"),
            Error::MissingCsvHeader { path, header } => {
                write!(f, "CSV file {path} missing required header: {header}")
            }
            Error::MissingSheet(name) => write!(f, "missing '{name}' sheet in Excel file"),
            Error::RuleSourceSelection(msg) => write!(f, "{msg}"),
            Error::Core(e) => write!(f, "{e}"),
            Error::Io(e) => write!(f, "{e}"),
            Error::Csv(e) => write!(f, "{e}"),
            Error::Excel(msg) => write!(f, "{msg}"),
            Error::Database(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Core(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Csv(e) => Some(e),
            _ => None,
        }
    }
}

impl From<polsim_core::Error> for Error {
    fn from(e: polsim_core::Error) -> Self {
        Error::Core(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Csv(e)
    }
}
