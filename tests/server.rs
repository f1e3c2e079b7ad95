use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rapidminer_connector::ConnectorError;
use rapidminer_connector::config::{JobOptions, PollOptions, ServerConfig};
use rapidminer_connector::connector::http::{HttpRequest, HttpResponse, HttpTransport, Method};
use rapidminer_connector::connector::{Connector, Server};
use rapidminer_connector::resource::Resource;
use rapidminer_connector::serialization::Payload;
use rapidminer_connector::types::{DataSet, DataType, Field, Schema, Value};
use serde_json::{Value as Json, json};

const BASE: &str = "http://rm.test:8080";
const SERVICE_URL: &str = "http://rm.test:8080/api/rest/process/Repository Service?";

type Handler = Box<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Answers every request with `handler` and records it.
struct ScriptedTransport {
    handler: Handler,
    log: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    fn new(handler: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    /// `(command, path)` of every web service call, in order.
    fn commands(&self) -> Vec<(String, String)> {
        self.requests()
            .iter()
            .filter(|r| r.url == SERVICE_URL)
            .filter_map(|r| {
                let body = r.json_body()?;
                Some((
                    body["command"].as_str()?.to_string(),
                    body["path"].as_str().unwrap_or_default().to_string(),
                ))
            })
            .collect()
    }
}

/// Paths of every repository command named `command`, in send order.
fn paths<'a>(commands: &'a [(String, String)], command: &str) -> Vec<&'a str> {
    commands
        .iter()
        .filter(|(c, _)| c == command)
        .map(|(_, p)| p.as_str())
        .collect()
}

impl HttpTransport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> rapidminer_connector::ConnectorResult<HttpResponse> {
        self.log.lock().unwrap().push(request.clone());
        Ok((self.handler)(request))
    }
}

fn config(install: bool) -> ServerConfig {
    ServerConfig {
        install,
        ..ServerConfig::new(BASE, "ada", "secret")
    }
}

fn token(request: &HttpRequest) -> Option<HttpResponse> {
    request
        .url
        .ends_with("/internal/jaxrest/tokenservice")
        .then(|| HttpResponse::new(200, json!({"idToken": "tok"}).to_string()))
}

fn command(request: &HttpRequest) -> Option<String> {
    if request.url != SERVICE_URL {
        return None;
    }
    request.json_body()?.get("command")?.as_str().map(str::to_string)
}

const ONE_RESULT_PROCESS: &str = r#"<process version="9.3.000">
  <operator activated="true" class="process" name="Process">
    <process expanded="true">
      <operator class="concurrency:optimize" name="Train"/>
      <connect from_port="input 1" to_op="Train" to_port="training set"/>
      <connect from_op="Train" from_port="model" to_port="result 1"/>
    </process>
  </operator>
</process>"#;

fn scored_table() -> Json {
    json!({
        "schema": {
            "fields": [{"name": "index", "type": "integer"}, {"name": "score", "type": "number"}],
            "primaryKey": ["index"]
        },
        "data": [{"index": 0, "score": 0.75}]
    })
}

fn training_set() -> Payload {
    Payload::from(DataSet::new(
        Schema::new(vec![Field::new("x", DataType::Int64)]),
        vec![vec![Value::Int64(1)], vec![Value::Int64(2)]],
    ))
}

/// A Server that knows one process and finishes jobs with `final_status`.
fn job_server(final_status: Json) -> Arc<ScriptedTransport> {
    ScriptedTransport::new(move |request| {
        if let Some(response) = token(request) {
            return response;
        }
        if let Some(cmd) = command(request) {
            return match cmd.as_str() {
                "save" => HttpResponse::new(200, ""),
                "del" => HttpResponse::new(200, "{}"),
                "load" => HttpResponse::new(200, scored_table().to_string()),
                _ => HttpResponse::new(400, "unexpected command"),
            };
        }
        match (request.method, request.url.as_str()) {
            (Method::Get, url) if url.ends_with("/api/rest/resources/home/ada/train") => {
                HttpResponse::new(200, ONE_RESULT_PROCESS)
            }
            (Method::Post, url) if url.ends_with("/executions/jobs?") => {
                HttpResponse::new(200, json!({"id": 42}).to_string())
            }
            (Method::Get, url) if url.ends_with("/executions/jobs/42") => {
                HttpResponse::new(200, final_status.to_string())
            }
            _ => HttpResponse::new(404, "no such endpoint"),
        }
    })
}

fn fast_options() -> JobOptions {
    JobOptions {
        poll: PollOptions {
            interval: Duration::ZERO,
            timeout: None,
        },
        ..Default::default()
    }
}

#[test]
fn connect_installs_missing_webservice() {
    let installed = Arc::new(AtomicBool::new(false));
    let flag = installed.clone();
    let transport = ScriptedTransport::new(move |request| {
        if let Some(response) = token(request) {
            return response;
        }
        if command(request).as_deref() == Some("test") {
            return if flag.load(Ordering::SeqCst) {
                HttpResponse::new(200, "{}")
            } else {
                HttpResponse::new(404, "not found")
            };
        }
        if request.url.ends_with("/api/rest/resources/home/ada/Repository Service") {
            return HttpResponse::new(201, "");
        }
        if request.url.ends_with("/api/rest/service/Repository Service") {
            flag.store(true, Ordering::SeqCst);
            return HttpResponse::new(200, "");
        }
        HttpResponse::new(500, "unexpected")
    });

    Server::connect_with_transport(config(true), transport.clone()).unwrap();
    assert!(installed.load(Ordering::SeqCst));

    let requests = transport.requests();
    assert_eq!(requests.len(), 5);
    assert!(requests[0].authorization.as_deref().unwrap().starts_with("Basic "));
    assert_eq!(requests[1].authorization.as_deref(), Some("Bearer tok"));
    assert!(requests[2].url.contains("/api/rest/resources/"));
    // The service descriptor is posted with basic authentication.
    assert!(requests[3].authorization.as_deref().unwrap().starts_with("Basic "));
    assert_eq!(transport.commands().len(), 2);
}

#[test]
fn failed_webservice_test_is_reported() {
    let transport = ScriptedTransport::new(|request| {
        token(request).unwrap_or_else(|| {
            HttpResponse::new(200, json!({"error": {"message": "broken"}}).to_string())
        })
    });
    let err = Server::connect_with_transport(config(true), transport).unwrap_err();
    assert_eq!(err.to_string(), "webservice test: broken");
}

#[test]
fn rejected_credentials_fail_to_connect() {
    let transport = ScriptedTransport::new(|_| HttpResponse::new(401, "Unauthorized"));
    let err = Server::connect_with_transport(config(false), transport).unwrap_err();
    assert!(matches!(err, ConnectorError::Transport { status: Some(401), .. }));
}

#[test]
fn write_count_mismatch_sends_nothing() {
    let transport = job_server(json!({"state": "FINISHED"}));
    let server = Server::connect_with_transport(config(false), transport.clone()).unwrap();
    let before = transport.requests().len();

    let err = server
        .write_resource(&[training_set(), training_set()], &[Resource::parse("//Repo/data/out")])
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Configuration { .. }));
    assert_eq!(transport.requests().len(), before);
}

#[test]
fn write_and_read_use_the_webservice() {
    let transport = job_server(json!({"state": "FINISHED"}));
    let server = Server::connect_with_transport(config(false), transport.clone()).unwrap();

    server
        .write_resource(&[training_set()], &[Resource::parse("//Repo/data/train")])
        .unwrap();
    let read = server.read_resource(&[Resource::parse("//Repo/data/scored")]).unwrap();

    assert_eq!(
        transport.commands(),
        vec![
            ("save".to_string(), "//Repo/data/train".to_string()),
            ("load".to_string(), "//Repo/data/scored".to_string()),
        ]
    );
    let ds = read[0].as_dataset().unwrap();
    assert_eq!(ds.schema.field_names().collect::<Vec<_>>(), vec!["score"]);
    assert_eq!(ds.rows, vec![vec![Value::Float64(0.75)]]);
}

#[test]
fn get_queues_returns_the_server_answer() {
    let transport = ScriptedTransport::new(|request| {
        token(request).unwrap_or_else(|| {
            if request.url == format!("{BASE}/executions/queues?") {
                HttpResponse::new(200, json!([{"name": "DEFAULT"}, {"name": "gpu"}]).to_string())
            } else {
                HttpResponse::new(404, "")
            }
        })
    });
    let server = Server::connect_with_transport(config(false), transport).unwrap();
    let queues = server.get_queues().unwrap();
    assert_eq!(queues[1]["name"], "gpu");
}

#[test]
fn run_process_returns_results_and_cleans_up() {
    let transport = job_server(json!({"state": "FINISHED"}));
    let server = Server::connect_with_transport(config(false), transport.clone()).unwrap();

    let mut options = fast_options();
    options.macros.insert("depth".to_string(), "4".to_string());
    let results = server.run_process("/home/ada/train", &[training_set()], &options).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].as_dataset().unwrap().rows, vec![vec![Value::Float64(0.75)]]);

    let submission = transport
        .requests()
        .into_iter()
        .find(|r| r.url.ends_with("/executions/jobs?"))
        .unwrap();
    let body = submission.json_body().unwrap();
    assert_eq!(body["queueName"], "DEFAULT");
    assert_eq!(body["location"], "/home/ada/train");
    assert_eq!(body["context"]["macros"]["depth"], "4");
    let input = body["context"]["inputLocations"][0].as_str().unwrap();
    assert!(input.starts_with("/home/ada/tmp/"));

    let commands = transport.commands();
    let deleted = paths(&commands, "del");
    assert_eq!(deleted.len(), 2);
    assert!(deleted.contains(&input));
}

#[test]
fn failed_job_deletes_every_temporary_resource_once() {
    let transport = job_server(json!({
        "state": "ERROR",
        "error": {
            "type": "OperatorException",
            "title": "Process failed",
            "message": "out of memory"
        }
    }));
    let server = Server::connect_with_transport(config(false), transport.clone()).unwrap();

    let err = server
        .run_process("/home/ada/train", &[training_set(), training_set()], &fast_options())
        .unwrap_err();
    match &err {
        ConnectorError::JobFailed { job_id, state, message } => {
            assert_eq!(job_id, "42");
            assert_eq!(state, "ERROR");
            assert_eq!(message, "OperatorException: Process failed: out of memory");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let commands = transport.commands();
    let saved: BTreeSet<&str> = paths(&commands, "save").into_iter().collect();
    let deleted = paths(&commands, "del");
    let unique: BTreeSet<&str> = deleted.iter().copied().collect();

    // Two inputs and one output slot.
    assert_eq!(deleted.len(), 3);
    assert_eq!(unique.len(), 3);
    assert!(saved.is_subset(&unique));
    assert!(!commands.iter().any(|(c, _)| c == "load"));
}

#[test]
fn cancelled_run_never_submits() {
    let transport = job_server(json!({"state": "FINISHED"}));
    let server = Server::connect_with_transport(config(false), transport.clone()).unwrap();

    let options = fast_options();
    let cancel = rapidminer_connector::lifecycle::CancelToken::new();
    cancel.cancel();
    let options = JobOptions {
        cancel: Some(cancel),
        ..options
    };

    let err = server.run_process("/home/ada/train", &[training_set()], &options).unwrap_err();
    assert!(matches!(err, ConnectorError::CancelledBeforeSubmit { .. }));
    assert_eq!(
        err.to_string(),
        "run of process /home/ada/train was cancelled before submission"
    );
    assert!(!transport.requests().iter().any(|r| r.url.ends_with("/executions/jobs?")));
    assert_eq!(transport.commands().iter().filter(|(c, _)| c == "del").count(), 2);
}
