//! Backend mutation API client.

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use syncbridge_common::{Error, Result};
use syncbridge_queue::{MutationOp, OpKind};

use crate::identity::IdentityProvider;

/// Body sent to the mutation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationPayload {
    /// Target table.
    pub table: String,
    /// Row data merged with the row id.
    pub data: Map<String, Value>,
}

impl MutationPayload {
    /// Build the payload for a queued operation.
    ///
    /// # Errors
    /// - The operation's row data is not a JSON object
    pub fn from_op(op: &MutationOp) -> Result<Self> {
        Ok(Self {
            table: op.table.clone(),
            data: op.merged_data()?,
        })
    }
}

/// Transport for row mutations.
///
/// Every call reports its own failure; callers decide whether to retry.
#[async_trait]
pub trait MutationTransport: Send + Sync {
    /// Insert or replace a row.
    async fn upsert(&self, payload: &MutationPayload) -> Result<()>;

    /// Update the columns present in the payload.
    async fn patch(&self, payload: &MutationPayload) -> Result<()>;

    /// Delete the row identified by the payload.
    async fn delete(&self, payload: &MutationPayload) -> Result<()>;

    /// Dispatch by operation kind.
    async fn dispatch(&self, kind: OpKind, payload: &MutationPayload) -> Result<()> {
        match kind {
            OpKind::Put => self.upsert(payload).await,
            OpKind::Patch => self.patch(payload).await,
            OpKind::Delete => self.delete(payload).await,
        }
    }
}

/// Error body returned by the backend when it rejects a mutation.
#[derive(Debug, Default, Deserialize)]
struct RemoteErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for `{base}/api/data`.
pub struct RemoteMutationClient {
    http: Client,
    data_url: Url,
    identity: Arc<dyn IdentityProvider>,
}

impl RemoteMutationClient {
    /// Create a client posting to `data_url`, authenticated with the
    /// identity provider's token.
    pub fn new(http: Client, data_url: Url, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            http,
            data_url,
            identity,
        }
    }

    /// Mutation endpoint.
    pub fn data_url(&self) -> &Url {
        &self.data_url
    }

    async fn send(&self, method: Method, payload: &MutationPayload) -> Result<()> {
        let token = self.identity.id_token(false).await?;

        debug!("{} {} ({})", method, self.data_url, payload.table);

        let response = self
            .http
            .request(method.clone(), self.data_url.clone())
            .bearer_auth(token)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("{} {}: {}", method, payload.table, e))
                } else {
                    Error::Network(format!("{} {}: {}", method, payload.table, e))
                }
            })?;

        Self::handle_response(response).await
    }

    /// Map a response to success or a typed rejection.
    async fn handle_response(response: Response) -> Result<()> {
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let body: RemoteErrorBody = serde_json::from_str(&text).unwrap_or_default();

        Err(Error::Remote {
            status: status.as_u16(),
            code: body.code,
            message: body.message.unwrap_or(text),
        })
    }
}

#[async_trait]
impl MutationTransport for RemoteMutationClient {
    async fn upsert(&self, payload: &MutationPayload) -> Result<()> {
        self.send(Method::PUT, payload).await
    }

    async fn patch(&self, payload: &MutationPayload) -> Result<()> {
        self.send(Method::PATCH, payload).await
    }

    async fn delete(&self, payload: &MutationPayload) -> Result<()> {
        self.send(Method::DELETE, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeIdentity;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> RemoteMutationClient {
        let data_url = Url::parse(&format!("{}/api/data", server.uri())).unwrap();
        RemoteMutationClient::new(
            Client::new(),
            data_url,
            Arc::new(FakeIdentity::signed_in("u1")),
        )
    }

    #[test]
    fn test_payload_from_op() {
        let op = MutationOp::put("todos", "r1", json!({"title": "milk"}));
        let payload = MutationPayload::from_op(&op).unwrap();

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"table": "todos", "data": {"id": "r1", "title": "milk"}})
        );
    }

    #[tokio::test]
    async fn test_methods_map_to_http_verbs() {
        let server = MockServer::start().await;
        for verb in ["PUT", "PATCH", "DELETE"] {
            Mock::given(method(verb))
                .and(path("/api/data"))
                .and(header("authorization", "Bearer id-token"))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(&server)
                .await;
        }

        let client = client_for(&server);
        let payload = MutationPayload::from_op(&MutationOp::delete("todos", "r2")).unwrap();

        client.upsert(&payload).await.unwrap();
        client.patch(&payload).await.unwrap();
        client.delete(&payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_sends_only_id() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/data"))
            .and(body_json(json!({"table": "todos", "data": {"id": "r2"}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let payload = MutationPayload::from_op(&MutationOp::delete("todos", "r2")).unwrap();
        client.dispatch(OpKind::Delete, &payload).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejection_carries_code() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/data"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let payload =
            MutationPayload::from_op(&MutationOp::put("todos", "r1", json!({}))).unwrap();

        let err = client.upsert(&payload).await.unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert_eq!(err.remote_code(), Some("23505"));
        assert!(err.to_string().contains("duplicate key"));
    }

    #[tokio::test]
    async fn test_plain_text_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let payload =
            MutationPayload::from_op(&MutationOp::patch("todos", "r1", json!({}))).unwrap();

        match client.patch(&payload).await {
            Err(Error::Remote {
                status,
                code,
                message,
            }) => {
                assert_eq!(status, 503);
                assert!(code.is_none());
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signed_out_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let data_url = Url::parse(&format!("{}/api/data", server.uri())).unwrap();
        let client = RemoteMutationClient::new(
            Client::new(),
            data_url,
            Arc::new(FakeIdentity::signed_out()),
        );
        let payload =
            MutationPayload::from_op(&MutationOp::put("todos", "r1", json!({}))).unwrap();

        assert!(matches!(
            client.upsert(&payload).await,
            Err(Error::Authentication(_))
        ));
    }
}
