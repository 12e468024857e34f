use crate::errors::ToolError;
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

const MAX_RESULT_CHARS: usize = 4000;

/// Best-effort web search against a configurable HTTP endpoint.
///
/// The endpoint receives the query as a `q` parameter and its body is returned as text.
#[derive(Debug, Clone)]
pub struct SearchClient {
    endpoint: Option<Url>,
    client: Client,
}

impl SearchClient {
    /// Creates a client. Without an endpoint every query fails softly.
    pub fn new(endpoint: Option<&str>) -> Result<Self, ToolError> {
        let endpoint = match endpoint {
            Some(raw) => Some(
                Url::parse(raw).map_err(|e| ToolError::Search(format!("invalid endpoint: {}", e)))?,
            ),
            None => None,
        };
        Ok(Self {
            endpoint,
            client: Client::new(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Runs one query.
    ///
    /// # Arguments
    /// * `query` - Free text query
    ///
    /// # Returns
    /// * `Result<String, ToolError>` - The (truncated) response body or a search error
    pub async fn search(&self, query: &str) -> Result<String, ToolError> {
        let Some(endpoint) = &self.endpoint else {
            return Err(ToolError::Search(
                "Internet search feature currently unavailable.".to_string(),
            ));
        };
        let mut url = endpoint.clone();
        url.query_pairs_mut().append_pair("q", query);
        debug!("Performing search GET {}", url);

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ToolError::Search(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::Search(e.to_string()))?;
        info!("Search {} -> status: {}", url.host_str().unwrap_or("unknown"), status);

        if !status.is_success() {
            return Err(ToolError::Search(format!("status {}", status)));
        }
        Ok(body.chars().take(MAX_RESULT_CHARS).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_without_endpoint_fails_softly() {
        let client = SearchClient::new(None).unwrap();
        assert!(!client.is_enabled());
        let err = client.search("kayaking").await.unwrap_err();
        assert!(err.to_string().contains("currently unavailable"));
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        assert!(SearchClient::new(Some("not a url")).is_err());
    }
}
