//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

//! Ingestion adapters, CSV/ports-file I/O, and the bundled well-known port
//! catalogue that sit between a rule source on disk (or in a database) and
//! `polsim_core`'s pure evaluation types.

pub mod catalog;
pub mod csv_io;
pub mod db;
pub mod error;
pub mod excel;
pub mod fortigate;

pub use error::{Error, Result};

use polsim_core::address::AddressBook;
use polsim_core::policy::PolicyRule;
use polsim_core::service::ServiceBook;

// Common output shape every ingestion adapter produces: a fully populated
// address/service book plus a priority-sorted policy list.
pub struct ParsedRules {
    pub address_book: AddressBook,
    pub service_book: ServiceBook,
    pub policies: Vec<PolicyRule>,
}
