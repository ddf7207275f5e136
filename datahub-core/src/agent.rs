//! Thin wrapper around a pooled reqwest client bound to the API base URL.

use reqwest::{Client, RequestBuilder};
use serde::Serialize;

use crate::error::PushError;

pub const AUTH_TOKEN_HEADER: &str = "Auth-Token";

#[derive(Debug, Clone)]
pub struct Agent {
    client: Client,
    base_url: String,
}

impl Agent {
    pub fn new(base_url: impl Into<String>) -> Result<Self, PushError> {
        let client = Client::builder()
            .user_agent(concat!("datahub-core/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Agent {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// The underlying client, for requests that go outside the API (object
    /// store uploads, remote resources) and carry no `Auth-Token`.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// `path` is appended verbatim so a base URL with a path prefix keeps it.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn get(&self, path: &str, token: &str) -> RequestBuilder {
        self.client
            .get(self.url(path))
            .header(AUTH_TOKEN_HEADER, token)
    }

    pub fn post_json<T: Serialize + ?Sized>(&self, path: &str, token: &str, body: &T) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .header(AUTH_TOKEN_HEADER, token)
            .json(body)
    }
}
