use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{VectorIndex, VectorMatch};
use crate::error::AppError;

/// Expands `{index}`, `{project}` and `{environment}` in a host template.
pub fn index_host(template: &str, index: &str, project: &str, environment: &str) -> String {
    template
        .replace("{index}", index)
        .replace("{project}", project)
        .replace("{environment}", environment)
        .trim_end_matches('/')
        .to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    #[serde(default)]
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Map<String, Value>>,
}

/// Client for one Pinecone index, authenticated with the `Api-Key` header.
pub struct PineconeIndexClient {
    http_client: reqwest::Client,
    host: String,
    api_key: String,
}

impl PineconeIndexClient {
    pub fn new(http_client: reqwest::Client, host: String, api_key: &str) -> Self {
        Self {
            http_client,
            host,
            api_key: api_key.to_string(),
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response, AppError> {
        let response = self
            .http_client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::VectorProvider(format!("{} request failed: {}", path, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::VectorProvider(format!("{} returned {}: {}", path, status, body)));
        }
        Ok(response)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndexClient {
    async fn describe_stats(&self) -> Result<(), AppError> {
        self.post("/describe_index_stats", &serde_json::json!({})).await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<VectorMatch>, AppError> {
        let request = QueryRequest {
            vector,
            top_k,
            include_metadata,
            namespace: "",
        };
        let response: QueryResponse = self
            .post("/query", &request)
            .await?
            .json()
            .await
            .map_err(|e| AppError::VectorProvider(format!("failed to parse query response: {}", e)))?;

        debug!("Vector query returned {} matches (top_k={})", response.matches.len(), top_k);
        Ok(response
            .matches
            .into_iter()
            .map(|m| VectorMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client(host: String) -> PineconeIndexClient {
        PineconeIndexClient::new(reqwest::Client::new(), host, "pc-test")
    }

    #[test]
    fn test_index_host_expansion() {
        let host = index_host(
            crate::config::DEFAULT_PINECONE_HOST_TEMPLATE,
            "notes",
            "abc123",
            "us-west1-gcp",
        );
        assert_eq!(host, "https://notes-abc123.svc.us-west1-gcp.pinecone.io");
    }

    #[tokio::test]
    async fn test_describe_stats_sends_api_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/describe_index_stats")
            .match_header("api-key", "pc-test")
            .with_status(200)
            .with_body(r#"{"dimension":1536,"totalVectorCount":3}"#)
            .create_async()
            .await;

        client(server.url()).describe_stats().await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_describe_stats_rejection_is_vector_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/describe_index_stats")
            .with_status(403)
            .create_async()
            .await;

        let err = client(server.url()).describe_stats().await.unwrap_err();
        assert!(matches!(err, AppError::VectorProvider(_)));
    }

    #[tokio::test]
    async fn test_query_request_shape_and_matches() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/query")
            .match_body(Matcher::Json(json!({
                "vector": [0.5, 0.25],
                "topK": 2,
                "includeMetadata": true,
                "namespace": ""
            })))
            .with_status(200)
            .with_body(
                json!({
                    "matches": [
                        { "id": "a", "score": 0.9, "metadata": { "content": "note A" } },
                        { "id": "b", "score": 0.8 }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let matches = client(server.url()).query(&[0.5, 0.25], 2, true).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].content(), Some("note A"));
        assert_eq!(matches[1].content(), None);
    }
}
