//! Backend adapters.
//!
//! Both backends expose the same three operations through [`Connector`]:
//!
//! - [`server::Server`] talks to a remote Server over HTTP;
//! - [`studio::Studio`] launches a locally installed Studio in batch mode.

pub mod http;
pub mod launcher;
pub mod process;
pub mod server;
pub mod studio;

use crate::config::JobOptions;
use crate::error::{ConnectorError, ConnectorResult};
use crate::resource::Resource;
use crate::serialization::Payload;

pub use server::Server;
pub use studio::Studio;

/// Read, write and run against one backend.
pub trait Connector {
    /// Read each resource, returning payloads in input order.
    fn read_resource(&self, inputs: &[Resource]) -> ConnectorResult<Vec<Payload>>;

    /// Write `payloads[i]` to `outputs[i]`. The counts must match.
    fn write_resource(&self, payloads: &[Payload], outputs: &[Resource]) -> ConnectorResult<()>;

    /// Run the process at `path` with `inputs` and return its results.
    fn run_process(
        &self,
        path: &str,
        inputs: &[Payload],
        options: &JobOptions,
    ) -> ConnectorResult<Vec<Payload>>;
}

/// Reject a write whose payload and output counts differ, before anything is sent.
pub(crate) fn check_output_count(
    payloads: &[Payload],
    outputs: &[Resource],
) -> ConnectorResult<()> {
    if payloads.len() == outputs.len() {
        Ok(())
    } else {
        Err(ConnectorError::configuration(format!(
            "payloads and outputs must contain the same number of values ({} payloads, {} outputs)",
            payloads.len(),
            outputs.len()
        )))
    }
}
