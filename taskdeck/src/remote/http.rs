//! HTTP implementation of [`RemoteTaskService`].
//!
//! Speaks the list API:
//!
//! | operation      | request                 | body                 |
//! |----------------|-------------------------|----------------------|
//! | list           | `GET /list`             | none                 |
//! | create         | `POST /list`            | `{ "element": .. }`  |
//! | update         | `PUT /list/{id}`        | `{ "element": .. }`  |
//! | delete         | `DELETE /list/{id}`     | none                 |
//! | bulk replace   | `PATCH /list`           | `{ "list": [..] }`   |
//!
//! Every request carries `Authorization: Bearer <token>`,
//! `Content-Type: application/json` and the last known revision in
//! [`REVISION_HEADER`].

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, Url};
use taskdeck_proto::task::{TaskId, TaskRecord};
use taskdeck_proto::wire::{self, REVISION_HEADER};

use super::{Op, RemoteError, RemoteTaskService, Revisioned};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote task service over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTaskService {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    device_id: String,
}

impl HttpTaskService {
    /// Creates a service for the API rooted at `base_url`.
    ///
    /// `device_id` is sent as `last_updated_by` for records that carry
    /// none. `timeout` bounds each request end to end.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Network`] if `base_url` cannot carry a path
    /// or the HTTP client cannot be initialised.
    pub fn new(
        base_url: Url,
        token: impl Into<String>,
        device_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Network(format!(
                "base url {base_url} cannot carry a path"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            token: token.into(),
            device_id: device_id.into(),
        })
    }

    /// `<base>/list` or `<base>/list/<id>`, with the id percent-encoded.
    fn endpoint(&self, id: Option<&TaskId>) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                RemoteError::Network(format!("base url {} cannot carry a path", self.base_url))
            })?;
            segments.pop_if_empty().push("list");
            if let Some(id) = id {
                segments.push(id.as_str());
            }
        }
        Ok(url)
    }

    /// Sends one request and returns the raw body of a 2xx response.
    async fn send(
        &self,
        op: Op,
        method: Method,
        url: Url,
        revision: u64,
        body: Option<Vec<u8>>,
    ) -> Result<Vec<u8>, RemoteError> {
        tracing::debug!(%op, %method, %url, revision, "sending request");
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .header(REVISION_HEADER, revision.to_string());
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%op, status = status.as_u16(), "request rejected");
            return Err(RemoteError::HttpStatus(status.as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Serializes a request body. Nothing was sent yet, so a failure is
/// reported like any other request that never reached the server.
fn encode<T: serde::Serialize>(body: &T) -> Result<Vec<u8>, RemoteError> {
    serde_json::to_vec(body)
        .map_err(|e| RemoteError::Network(format!("request not encodable: {e}")))
}

fn decode_failed(e: wire::WireError) -> RemoteError {
    RemoteError::Decode(e.to_string())
}

impl RemoteTaskService for HttpTaskService {
    async fn list(&self, revision: u64) -> Result<Revisioned<Vec<TaskRecord>>, RemoteError> {
        let url = self.endpoint(None)?;
        let body = self.send(Op::List, Method::GET, url, revision, None).await?;
        let (records, revision) = wire::decode_list(&body).map_err(decode_failed)?;
        Ok(Revisioned::new(records, revision))
    }

    async fn create(
        &self,
        record: &TaskRecord,
        revision: u64,
    ) -> Result<Revisioned<TaskRecord>, RemoteError> {
        let url = self.endpoint(None)?;
        let payload = encode(&wire::element_body(record, &self.device_id))?;
        let body = self
            .send(Op::Create, Method::POST, url, revision, Some(payload))
            .await?;
        let (record, revision) = wire::decode_element(&body).map_err(decode_failed)?;
        Ok(Revisioned::new(record, revision))
    }

    async fn update(
        &self,
        record: &TaskRecord,
        revision: u64,
    ) -> Result<Revisioned<TaskRecord>, RemoteError> {
        let url = self.endpoint(Some(&record.id))?;
        let payload = encode(&wire::element_body(record, &self.device_id))?;
        let body = self
            .send(Op::Update, Method::PUT, url, revision, Some(payload))
            .await?;
        let (record, revision) = wire::decode_element(&body).map_err(decode_failed)?;
        Ok(Revisioned::new(record, revision))
    }

    async fn delete(&self, id: &TaskId, revision: u64) -> Result<Revisioned<()>, RemoteError> {
        let url = self.endpoint(Some(id))?;
        let body = self
            .send(Op::Delete, Method::DELETE, url, revision, None)
            .await?;
        let revision = wire::decode_revision(&body).map_err(decode_failed)?;
        Ok(Revisioned::new((), revision))
    }

    async fn bulk_replace(
        &self,
        records: &[TaskRecord],
        revision: u64,
    ) -> Result<Revisioned<Vec<TaskRecord>>, RemoteError> {
        let url = self.endpoint(None)?;
        let payload = encode(&wire::list_body(records, &self.device_id))?;
        let body = self
            .send(Op::BulkReplace, Method::PATCH, url, revision, Some(payload))
            .await?;
        let (records, revision) = wire::decode_list(&body).map_err(decode_failed)?;
        Ok(Revisioned::new(records, revision))
    }
}
