//! Real-time scoring client.
//!
//! Sends a dataset to a deployed scoring endpoint and returns the scored rows.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::connector::http::{HttpRequest, HttpTransport, ReqwestTransport, check_for_error};
use crate::error::{ConnectorError, ConnectorResult};
use crate::serialization::table_json::{decode_table, encode_table};
use crate::types::DataSet;

/// Client for one scoring endpoint, `{host}/services/{endpoint}`.
pub struct Scoring {
    url: String,
    transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for Scoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoring").field("url", &self.url).finish_non_exhaustive()
    }
}

impl Scoring {
    pub fn new(host: &str, endpoint: &str, timeout: Option<Duration>) -> ConnectorResult<Self> {
        Ok(Self::with_transport(host, endpoint, Arc::new(ReqwestTransport::new(timeout)?)))
    }

    pub fn with_transport(host: &str, endpoint: &str, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            url: format!("{}/services/{endpoint}", host.trim_end_matches('/')),
            transport,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Score `dataset` and return the result.
    pub fn predict(&self, dataset: &DataSet) -> ConnectorResult<DataSet> {
        let request = HttpRequest::post_json(self.url.as_str(), encode_table(dataset));
        let response = self.transport.send(&request)?.expect_status(200, "scoring data")?;
        let document = response.json()?;
        check_for_error(&document, "scoring data")?;
        let data = document
            .get("data")
            .ok_or_else(|| ConnectorError::deserialization("scoring response has no 'data'"))?;
        decode_table(data)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::connector::http::HttpResponse;
    use crate::types::{DataType, Field, Schema, Value};

    struct Canned {
        response: HttpResponse,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl HttpTransport for Canned {
        fn send(&self, request: &HttpRequest) -> ConnectorResult<HttpResponse> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.response.clone())
        }
    }

    fn scoring(status: u16, body: serde_json::Value) -> (Scoring, Arc<Canned>) {
        let transport = Arc::new(Canned {
            response: HttpResponse::new(status, body.to_string()),
            seen: Mutex::new(Vec::new()),
        });
        (Scoring::with_transport("http://rm:8090/", "churn", transport.clone()), transport)
    }

    fn customers() -> DataSet {
        DataSet::new(
            Schema::new(vec![Field::new("age", DataType::Int64)]),
            vec![vec![Value::Int64(41)]],
        )
    }

    #[test]
    fn predict_posts_the_table_and_decodes_data() {
        let (scoring, transport) = scoring(
            200,
            json!({"data": [{"age": 41, "prediction(churn)": "no", "confidence(no)": 0.8}]}),
        );
        assert_eq!(scoring.url(), "http://rm:8090/services/churn");

        let scored = scoring.predict(&customers()).unwrap();
        assert_eq!(
            scored.schema.field_names().collect::<Vec<_>>(),
            vec!["age", "prediction(churn)", "confidence(no)"]
        );
        assert_eq!(scored.rows[0][2], Value::Float64(0.8));

        let sent = transport.seen.lock().unwrap();
        assert_eq!(sent[0].json_body().unwrap()["data"], json!([{"age": 41}]));
    }

    #[test]
    fn structured_error_is_reported() {
        let (scoring, _) = scoring(
            200,
            json!({"error": {"title": "Invalid input", "message": "age missing"}}),
        );
        let err = scoring.predict(&customers()).unwrap_err();
        assert_eq!(err.to_string(), "scoring data: Invalid input: age missing");
    }

    #[test]
    fn non_200_is_a_transport_error() {
        let (scoring, _) = scoring(503, json!("unavailable"));
        let err = scoring.predict(&customers()).unwrap_err();
        assert!(matches!(err, ConnectorError::Transport { status: Some(503), .. }));
    }
}
