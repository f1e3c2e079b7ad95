//! `rapidminer-connector` reads and writes tabular resources and runs analytics processes against
//! two kinds of backends:
//!
//! - a remote **Server**, over HTTP ([`connector::Server`]);
//! - a locally installed **Studio**, launched in batch mode ([`connector::Studio`]).
//!
//! Both implement [`connector::Connector`], so the same three operations work everywhere:
//! `read_resource`, `write_resource` and `run_process`.
//!
//! ## Datasets and metadata
//!
//! Tabular payloads are in-memory [`types::DataSet`]s. Each column can carry a
//! `(semantic type, role)` pair ([`metadata::ColumnMetadata`]) that survives the trip to the
//! backend and back:
//!
//! ```
//! use rapidminer_connector::metadata::{ColumnMetadata, SemanticType};
//! use rapidminer_connector::types::{DataSet, DataType, Field, Schema, Value};
//!
//! let mut ds = DataSet::new(
//!     Schema::new(vec![
//!         Field::new("id", DataType::Int64),
//!         Field::new("churn", DataType::Utf8),
//!     ]),
//!     vec![vec![Value::Int64(1), Value::Utf8("yes".to_string())]],
//! );
//! ds.annotate("churn", ColumnMetadata::new(SemanticType::Binominal, Some("label")));
//! assert_eq!(ds.column_metadata("churn").unwrap().role.as_deref(), Some("label"));
//! ```
//!
//! Columns without an annotation get a type inferred from their storage kind.
//!
//! ## Running a process locally
//!
//! ```no_run
//! use rapidminer_connector::config::{JobOptions, StudioConfig};
//! use rapidminer_connector::connector::{Connector, Studio};
//! use rapidminer_connector::serialization::Payload;
//! # use rapidminer_connector::types::{DataSet, Schema};
//!
//! # fn main() -> Result<(), rapidminer_connector::ConnectorError> {
//! # let training = DataSet::new(Schema::new(vec![]), vec![]);
//! let studio = Studio::new(StudioConfig::default());
//! let results = studio.run_process(
//!     "//Local Repository/processes/train",
//!     &[Payload::from(training)],
//!     &JobOptions::default(),
//! )?;
//! println!("{} results", results.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`connector`]: the Server and Studio backends
//! - [`lifecycle`]: staging, submission, polling and guaranteed cleanup of process runs
//! - [`serialization`]: payload files (`.csv` + `.pmd`, `.fo`, `.bin`) and the table JSON wire
//!   format
//! - [`metadata`]: column type/role metadata
//! - [`resource`]: repository locations and files
//! - [`scoring`]: real-time scoring client
//! - [`config`], [`observability`], [`error`]: options, logging and errors

pub mod config;
pub mod connector;
pub mod error;
pub mod lifecycle;
pub mod metadata;
pub mod observability;
pub mod resource;
pub mod scoring;
pub mod serialization;
pub mod types;

pub use error::{ConnectorError, ConnectorResult};
