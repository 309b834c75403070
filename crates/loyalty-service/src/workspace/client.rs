//! 工作台平台客户端
//!
//! 只封装四个页面/数据库操作；超时与非 2xx 响应都映射为可重试的系统错误，
//! 由同步队列负责退避重试

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use loyalty_shared::config::WorkspaceConfig;

use crate::error::{LoyaltyError, Result};
use crate::workspace::types::{Page, PropertyMap, QueryResult};

/// 错误响应体截断长度
const MAX_ERROR_BODY: usize = 512;

/// 工作台客户端接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkspaceClient: Send + Sync {
    async fn fetch_page(&self, page_id: &str) -> Result<Page>;

    async fn query_database(
        &self,
        database_id: &str,
        filter: Option<Value>,
        page_size: u32,
        cursor: Option<String>,
    ) -> Result<QueryResult>;

    async fn create_page(&self, database_id: &str, properties: PropertyMap) -> Result<Page>;

    async fn update_page(&self, page_id: &str, properties: PropertyMap) -> Result<Page>;
}

/// 基于 reqwest 的 HTTP 实现
pub struct HttpWorkspaceClient {
    client: Client,
    base_url: String,
    api_token: String,
    api_version: String,
}

impl HttpWorkspaceClient {
    pub fn new(config: &WorkspaceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| LoyaltyError::Internal(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            api_version: config.api_version.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_token)
            .header("Notion-Version", &self.api_version)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, op: &str) -> Result<T> {
        let response = request.send().await.map_err(|e| map_transport_error(op, e))?;
        let response = ensure_success(op, response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| LoyaltyError::Workspace {
                status: None,
                message: format!("{op}: 响应解析失败: {e}"),
            })
    }
}

fn map_transport_error(op: &str, err: reqwest::Error) -> LoyaltyError {
    if err.is_timeout() {
        LoyaltyError::WorkspaceTimeout(op.to_string())
    } else {
        LoyaltyError::Workspace {
            status: None,
            message: format!("{op}: {err}"),
        }
    }
}

async fn ensure_success(op: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        body.truncate(cut);
    }

    Err(LoyaltyError::Workspace {
        status: Some(status.as_u16()),
        message: format!("{op}: HTTP {status}: {body}"),
    })
}

#[async_trait]
impl WorkspaceClient for HttpWorkspaceClient {
    #[instrument(skip(self))]
    async fn fetch_page(&self, page_id: &str) -> Result<Page> {
        let request = self.request(Method::GET, &format!("/pages/{page_id}"));
        self.send(request, "fetch_page").await
    }

    #[instrument(skip(self, filter))]
    async fn query_database(
        &self,
        database_id: &str,
        filter: Option<Value>,
        page_size: u32,
        cursor: Option<String>,
    ) -> Result<QueryResult> {
        let mut body = json!({ "page_size": page_size });
        if let Some(filter) = filter {
            body["filter"] = filter;
        }
        if let Some(cursor) = cursor {
            body["start_cursor"] = Value::String(cursor);
        }

        let request = self
            .request(Method::POST, &format!("/databases/{database_id}/query"))
            .json(&body);
        let result: QueryResult = self.send(request, "query_database").await?;
        debug!(count = result.results.len(), has_more = result.has_more, "数据库查询完成");
        Ok(result)
    }

    #[instrument(skip(self, properties))]
    async fn create_page(&self, database_id: &str, properties: PropertyMap) -> Result<Page> {
        let body = json!({
            "parent": { "database_id": database_id },
            "properties": properties,
        });
        let request = self.request(Method::POST, "/pages").json(&body);
        self.send(request, "create_page").await
    }

    #[instrument(skip(self, properties))]
    async fn update_page(&self, page_id: &str, properties: PropertyMap) -> Result<Page> {
        let body = json!({ "properties": properties });
        let request = self
            .request(Method::PATCH, &format!("/pages/{page_id}"))
            .json(&body);
        self.send(request, "update_page").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WorkspaceConfig {
        WorkspaceConfig {
            base_url: "https://api.example.test/v1/".to_string(),
            api_token: "secret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = HttpWorkspaceClient::new(&config()).unwrap();
        assert_eq!(client.base_url, "https://api.example.test/v1");
    }

    #[test]
    fn test_request_carries_auth_headers() {
        let client = HttpWorkspaceClient::new(&config()).unwrap();
        let request = client
            .request(Method::GET, "/pages/abc")
            .build()
            .unwrap();

        assert_eq!(request.url().as_str(), "https://api.example.test/v1/pages/abc");
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Bearer secret"
        );
        assert!(request.headers().contains_key("notion-version"));
    }
}
