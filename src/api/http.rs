//! Implements the `CategoryStore` trait over the JSON REST API.

use crate::api::CategoryStore;
use crate::error::{Error, ErrorType, IntoResult, Res, Result};
use crate::model::{Category, CategoryId, CategoryPatch, NewCategory};
use anyhow::Context;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

const CATEGORIES: &str = "categories";

/// Talks to the category endpoints under `base_url`:
///
/// - `GET    {base}/categories`
/// - `POST   {base}/categories`
/// - `PATCH  {base}/categories/{id}`
/// - `DELETE {base}/categories/{id}[?reassign_to={id}]`
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpStore {
    /// Create a new `HttpStore`. When `token` is present it is sent as a bearer token.
    pub fn new(base_url: Url, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Unable to build the HTTP client")
            .pub_result(ErrorType::Config)?;
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends `segments` to the base URL path.
    fn endpoint(&self, segments: &[&str]) -> Res<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("The base URL '{}' cannot have a path", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let url = self.endpoint(segments).pub_result(ErrorType::Config)?;
        trace!("{method} {url}");
        let builder = self.client.request(method, url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    /// Sends the request. A request that cannot complete is a transport failure; a non-success
    /// status is a rejection carrying the response body.
    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<Response> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("Unable to reach the category store to {what}"))
            .pub_result(ErrorType::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(Error::message(
                ErrorType::Rejected,
                format!("The category store refused to {what} (status {status}): {body}"),
            ));
        }
        debug!("{what}: {status}");
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        response
            .json()
            .await
            .with_context(|| format!("Unable to parse the response to {what}"))
            .pub_result(ErrorType::Transport)
    }
}

#[async_trait::async_trait]
impl CategoryStore for HttpStore {
    async fn list(&self) -> Result<Vec<Category>> {
        let what = "list categories";
        let response = self.send(self.request(Method::GET, &[CATEGORIES])?, what).await?;
        Self::json(response, what).await
    }

    async fn create(&self, new: &NewCategory) -> Result<Category> {
        let what = "create a category";
        let builder = self.request(Method::POST, &[CATEGORIES])?.json(new);
        let response = self.send(builder, what).await?;
        Self::json(response, what).await
    }

    async fn update(&self, id: CategoryId, patch: &CategoryPatch) -> Result<Category> {
        let what = format!("update category {id}");
        let id = id.to_string();
        let builder = self.request(Method::PATCH, &[CATEGORIES, id.as_str()])?.json(patch);
        let response = self.send(builder, &what).await?;
        Self::json(response, &what).await
    }

    async fn delete(&self, id: CategoryId, reassign_to: Option<CategoryId>) -> Result<()> {
        let what = format!("delete category {id}");
        let id = id.to_string();
        let mut builder = self.request(Method::DELETE, &[CATEGORIES, id.as_str()])?;
        if let Some(target) = reassign_to {
            builder = builder.query(&[("reassign_to", target.value())]);
        }
        let _ = self.send(builder, &what).await?;
        Ok(())
    }
}
