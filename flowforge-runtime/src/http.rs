//! Thin `reqwest` wrapper shared by the Container Driver, the Registry
//! Aggregator's fetchers, and the Gateway Publisher.
//!
//! Grounded on `ultrafast-models-sdk/src/providers/http_client.rs`'s
//! `HttpProviderClient`: a `reqwest::Client` plus a base URL and default
//! headers, with typed `get_json`/`post_json` helpers and a shared error
//! mapper. Here it calls out to a container daemon or a gateway admin API
//! instead of an LLM provider.

use crate::error::RuntimeError;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

#[derive(Clone)]
pub struct HttpAdapter {
    http: Client,
    base_url: String,
}

impl HttpAdapter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RuntimeError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RuntimeError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url.trim_end_matches('/'), path)
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), path)
        }
    }

    pub async fn get_json<TResp: DeserializeOwned>(&self, path: &str) -> Result<TResp, RuntimeError> {
        let resp = self
            .http
            .request(Method::GET, self.build_url(path))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(map_error(resp).await);
        }
        Ok(resp.json::<TResp>().await?)
    }

    pub async fn post_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TResp, RuntimeError> {
        self.post_json_with_timeout(path, body, None).await
    }

    /// Like [`post_json`](Self::post_json), but overrides the client's
    /// default timeout for this one request — for operations like an image
    /// pull that can legitimately run far longer than everything else this
    /// adapter does (§5's explicit per-operation timeout budgets).
    pub async fn post_json_with_timeout<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
        timeout: Option<Duration>,
    ) -> Result<TResp, RuntimeError> {
        let mut req = self.http.request(Method::POST, self.build_url(path)).json(body);
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(map_error(resp).await);
        }
        Ok(resp.json::<TResp>().await?)
    }

    pub async fn put_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TResp, RuntimeError> {
        let resp = self
            .http
            .request(Method::PUT, self.build_url(path))
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(map_error(resp).await);
        }
        Ok(resp.json::<TResp>().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<(), RuntimeError> {
        let resp = self
            .http
            .request(Method::DELETE, self.build_url(path))
            .send()
            .await?;
        if !resp.status().is_success() && resp.status().as_u16() != 404 {
            return Err(map_error(resp).await);
        }
        Ok(())
    }

    pub async fn get_bytes(&self, path: &str) -> Result<bytes::Bytes, RuntimeError> {
        let resp = self
            .http
            .request(Method::GET, self.build_url(path))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(map_error(resp).await);
        }
        Ok(resp.bytes().await?)
    }
}

async fn map_error(resp: Response) -> RuntimeError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    RuntimeError::Internal(format!("http {status}: {body}"))
}
