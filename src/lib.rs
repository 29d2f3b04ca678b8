//! Import of DMARC aggregate reports (RFC 7489 section 7.2) into a relational store.
//!
//! A report goes through four steps: its container is sniffed and unpacked
//! ([`container`]), the XML is decoded into a typed [`dmarc::Feedback`]
//! ([`dmarc::decode`]), and the document is written to a [`store::ReportStore`] as
//! one atomic unit ([`import`]). [`batch`] runs that pipeline over many files.

pub mod batch;
pub mod config;
pub mod container;
pub mod dmarc;
pub mod error;
pub mod import;
pub mod store;

pub use error::{ContainerError, ImportError, ImportResult, SchemaError, StoreError};
pub use import::{import_file, import_report, import_stream};
