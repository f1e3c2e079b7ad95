//! Remote Server connector.
//!
//! Repository access goes through an auxiliary web service that understands `load`, `save`,
//! `del` and `test` commands; it is installed on first connect when missing. Processes run as
//! jobs on the Server's execution queues and are polled until they finish.

use std::fmt;
use std::sync::Arc;

use serde_json::{Value as Json, json};
use uuid::Uuid;

use crate::config::{JobOptions, ServerConfig};
use crate::error::{ConnectorError, ConnectorResult};
use crate::lifecycle::{self, JobBackend, JobRun, JobStatus, ProcessDefinition, poll_until_terminal};
use crate::observability::ConnectorLogger;
use crate::resource::Resource;
use crate::serialization::Payload;
use crate::serialization::table_json::{decode_table, encode_table};

use super::http::{
    self, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, check_for_error,
};
use super::process::{
    PROCESS_CONTENT_TYPE, WEBSERVICE_PROCESS_XML, count_result_ports, webservice_descriptor,
};
use super::{Connector, check_output_count};

/// Connector to a local or remote Server instance.
pub struct Server {
    config: ServerConfig,
    transport: Arc<dyn HttpTransport>,
    auth_header: String,
    logger: ConnectorLogger,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.logger.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Authenticate against the Server and make sure the repository web service is available.
    pub fn connect(config: ServerConfig) -> ConnectorResult<Self> {
        let transport = ReqwestTransport::new(config.request_timeout)?;
        Self::connect_with_transport(config, Arc::new(transport))
    }

    /// Like [`Server::connect`], sending every request through `transport`.
    pub fn connect_with_transport(
        config: ServerConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> ConnectorResult<Self> {
        let logger = ConnectorLogger::new("Server", &config.log);

        let token_url = format!("{}/internal/jaxrest/tokenservice", config.base_url());
        let request = HttpRequest::get(token_url)
            .with_authorization(http::basic_auth(&config.username, &config.password));
        let response = transport.send(&request)?.expect_status(200, "connection")?;
        let token = response
            .json()?
            .get("idToken")
            .and_then(Json::as_str)
            .map(str::to_string)
            .ok_or_else(|| ConnectorError::deserialization("token response has no 'idToken'"))?;
        logger.info("Successfully connected to the Server");

        let server = Self {
            auth_header: http::bearer(&token),
            config,
            transport,
            logger,
        };
        if server.config.install {
            server.test_and_install()?;
        }
        Ok(server)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Available execution queues, as returned by the Server.
    pub fn get_queues(&self) -> ConnectorResult<Json> {
        let url = format!("{}/executions/queues?", self.config.base_url());
        self.send(HttpRequest::get(url))?
            .expect_status(200, "get queues")?
            .json()
    }

    /// Current status of a submitted job.
    pub fn job_status(&self, job_id: &str) -> ConnectorResult<JobStatus> {
        let url = format!("{}/executions/jobs/{job_id}", self.config.base_url());
        let response = self
            .send(HttpRequest::get(url))?
            .expect_status(200, &format!("getting job status, job id: {job_id}"))?;
        Ok(serde_json::from_str(&response.body)?)
    }

    fn send(&self, request: HttpRequest) -> ConnectorResult<HttpResponse> {
        self.transport.send(&request.with_authorization(self.auth_header.as_str()))
    }

    fn webservice_url(&self) -> String {
        format!("{}/api/rest/process/{}?", self.config.base_url(), self.config.webservice)
    }

    fn command(&self, body: Json) -> ConnectorResult<HttpResponse> {
        self.send(HttpRequest::post_json(self.webservice_url(), body))
    }

    fn test_and_install(&self) -> ConnectorResult<()> {
        let response = self.command(json!({"command": "test"}))?;
        match response.status {
            200 => check_for_error(&response.json()?, "webservice test"),
            404 => {
                self.logger.info(&format!(
                    "Webservice is not installed, installing it with the name '{}'...",
                    self.config.webservice
                ));
                self.install_webservice(&self.config.webservice_process_path())?;
                let retest = self
                    .command(json!({"command": "test"}))?
                    .expect_status(200, "test of installed webservice")?;
                check_for_error(&retest.json()?, "test of installed webservice")?;
                self.logger.info("Webservice installed successfully");
                Ok(())
            }
            status => Err(ConnectorError::transport(
                "webservice test",
                Some(status),
                format!(
                    "make sure that the webservice with the name '{}' is installed",
                    self.config.webservice
                ),
            )),
        }
    }

    fn install_webservice(&self, process_path: &str) -> ConnectorResult<()> {
        let url = format!("{}/api/rest/resources{process_path}", self.config.base_url());
        self.send(HttpRequest::post_text(url, PROCESS_CONTENT_TYPE, WEBSERVICE_PROCESS_XML))?
            .expect_status(201, &format!("saving process to repository path '{process_path}'"))?;

        // The service endpoint only accepts basic authentication.
        let url = format!("{}/api/rest/service/{}", self.config.base_url(), self.config.webservice);
        let descriptor = webservice_descriptor(&self.config.webservice, process_path);
        let request = HttpRequest::post_text(url, "application/xml", descriptor)
            .with_authorization(http::basic_auth(&self.config.username, &self.config.password));
        self.transport.send(&request)?.expect_status(
            200,
            &format!("installing webservice with the name '{}'", self.config.webservice),
        )?;
        Ok(())
    }

    fn read_process_xml(&self, path: &str) -> ConnectorResult<String> {
        let url = format!("{}/api/rest/resources{path}", self.config.base_url());
        let response = self
            .send(HttpRequest::get(url))?
            .expect_status(200, &format!("getting process \"{path}\""))?;
        Ok(response.body)
    }

    fn load(&self, path: &str) -> ConnectorResult<Payload> {
        let response = self
            .command(json!({"command": "load", "path": path}))?
            .expect_status(200, &format!("reading input \"{path}\""))?;
        let document = response.json()?;
        check_for_error(&document, &format!("reading input \"{path}\""))?;
        Ok(Payload::Tabular(decode_table(&document)?))
    }

    fn save(&self, idx: usize, payload: &Payload, path: &str) -> ConnectorResult<()> {
        let dataset = payload.as_dataset().ok_or_else(|| ConnectorError::Serialization {
            message: format!(
                "the Server repository only stores tabular data, got a {} payload",
                payload.kind()
            ),
        })?;
        let body = json!({"command": "save", "path": path, "data": encode_table(dataset)});
        let response = self
            .command(body)?
            .expect_status(200, &format!("saving input no. {idx}"))?;
        // Saving does not necessarily answer with a document.
        if let Ok(document) = response.json() {
            check_for_error(&document, &format!("saving input no. {idx}"))?;
        }
        Ok(())
    }

    fn delete(&self, path: &str) -> ConnectorResult<()> {
        self.command(json!({"command": "del", "path": path}))?
            .expect_status(200, &format!("deleting path \"{path}\""))?;
        Ok(())
    }

    fn temp_location(&self) -> Resource {
        Resource::repository(format!("{}{}", self.config.temp_folder(), Uuid::now_v7().simple()))
    }
}

impl Connector for Server {
    fn read_resource(&self, inputs: &[Resource]) -> ConnectorResult<Vec<Payload>> {
        inputs.iter().map(|input| self.load(&input.path())).collect()
    }

    fn write_resource(&self, payloads: &[Payload], outputs: &[Resource]) -> ConnectorResult<()> {
        check_output_count(payloads, outputs)?;
        for (idx, (payload, output)) in payloads.iter().zip(outputs).enumerate() {
            self.save(idx, payload, &output.path())?;
        }
        Ok(())
    }

    fn run_process(
        &self,
        path: &str,
        inputs: &[Payload],
        options: &JobOptions,
    ) -> ConnectorResult<Vec<Payload>> {
        lifecycle::run_job(self, path, inputs, options)
    }
}

impl JobBackend for Server {
    type Transient = Resource;
    type Handle = String;

    fn logger(&self) -> &ConnectorLogger {
        &self.logger
    }

    fn prepare(&self, process_path: &str) -> ConnectorResult<ProcessDefinition> {
        let xml = self.read_process_xml(process_path)?;
        Ok(ProcessDefinition {
            path: process_path.to_string(),
            output_ports: Some(count_result_ports(&xml)),
            xml: Some(xml),
        })
    }

    fn stage_inputs(
        &self,
        payloads: &[Payload],
        run: &mut JobRun<Resource>,
    ) -> ConnectorResult<()> {
        for (idx, payload) in payloads.iter().enumerate() {
            let location = self.temp_location();
            run.own(location.clone());
            self.save(idx, payload, &location.path())?;
            run.inputs.push(location);
        }
        Ok(())
    }

    fn allocate_outputs(&self, run: &mut JobRun<Resource>) -> ConnectorResult<()> {
        for _ in 0..run.process.output_ports.unwrap_or(0) {
            let location = self.temp_location();
            run.own(location.clone());
            run.outputs.push(location);
        }
        Ok(())
    }

    fn submit(&self, run: &mut JobRun<Resource>, options: &JobOptions) -> ConnectorResult<String> {
        let xml = run
            .process
            .xml
            .as_deref()
            .ok_or_else(|| ConnectorError::configuration("process definition was not loaded"))?;

        let mut context = serde_json::Map::new();
        if !run.inputs.is_empty() {
            context.insert("inputLocations".to_string(), json!(paths(&run.inputs)));
        }
        if !run.outputs.is_empty() {
            context.insert("outputLocations".to_string(), json!(paths(&run.outputs)));
        }
        if !options.macros.is_empty() {
            context.insert("macros".to_string(), json!(options.macros));
        }
        let body = json!({
            "queueName": options.queue,
            "process": http::encode_base64(xml),
            "location": run.process.path,
            "context": context,
        });

        let url = format!("{}/executions/jobs?", self.config.base_url());
        let response = self
            .send(HttpRequest::post_json(url, body))?
            .expect_status(200, "submitting process")?;
        let job_id = match response.json()?.get("id") {
            Some(Json::String(id)) => id.clone(),
            Some(Json::Number(id)) => id.to_string(),
            _ => return Err(ConnectorError::deserialization("job submission response has no 'id'")),
        };
        self.logger.info(&format!("Submitted process with job id: {job_id}"));
        run.job_id = Some(job_id.clone());
        Ok(job_id)
    }

    fn await_completion(&self, job_id: &String, options: &JobOptions) -> ConnectorResult<()> {
        poll_until_terminal(
            job_id,
            &options.poll,
            options.cancel.as_ref(),
            |id| self.job_status(id),
            std::thread::sleep,
        )?;
        self.logger.info(&format!("Job {job_id} finished"));
        Ok(())
    }

    fn collect_outputs(&self, run: &JobRun<Resource>) -> ConnectorResult<Vec<Payload>> {
        self.read_resource(&run.outputs)
    }

    fn release(&self, transient: Resource) -> ConnectorResult<()> {
        self.delete(&transient.path())
    }
}

fn paths(resources: &[Resource]) -> Vec<String> {
    resources.iter().map(Resource::path).collect()
}
