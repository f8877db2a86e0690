use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use super::phoenix::{self, RealtimeEndpoint};
use super::{Backend, Channel, Filter};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::{ChannelFilter, Table};

/// The hosted platform: REST for rows, a websocket per realtime channel.
pub struct RestBackend {
    http: Client,
    base_url: Url,
    api_key: String,
    access_token: Option<String>,
    realtime: RealtimeEndpoint,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: TokenUser,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
}

impl RestBackend {
    /// Builds a client for the given session. Without a session, requests
    /// run with the public key only.
    pub fn new(config: &ClientConfig, session: Option<&Session>) -> Result<Self> {
        let http = Client::builder().timeout(config.http.timeout()).build()?;
        let access_token = session.map(|s| s.access_token.clone());
        Ok(Self {
            http,
            base_url: config.backend_url.clone(),
            api_key: config.api_key.clone(),
            realtime: RealtimeEndpoint {
                url: config.realtime_url()?,
                access_token: access_token.clone(),
                join_timeout: config.http.join_timeout(),
            },
            access_token,
        })
    }

    /// Exchanges email and password for a session.
    pub async fn sign_in_with_password(
        config: &ClientConfig,
        email: &str,
        password: &str,
    ) -> Result<Session> {
        let http = Client::builder().timeout(config.http.timeout()).build()?;
        let url = join(&config.backend_url, "auth/v1/token")?;
        let resp = http
            .post(url)
            .query(&[("grant_type", "password")])
            .header("apikey", &config.api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        let token: TokenResponse = handle_response(resp).await?;
        tracing::info!("Signed in as {}", token.user.id);
        Ok(Session {
            user_id: token.user.id,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
        })
    }

    fn table_url(&self, table: Table) -> Result<Url> {
        join(&self.base_url, &format!("rest/v1/{table}"))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        req.header("apikey", &self.api_key).bearer_auth(bearer)
    }
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| Error::Config(format!("invalid backend URL: {e}")))
}

async fn handle_response<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|b| b.message.or(b.error_description).or(b.msg))
        .unwrap_or(text);
    Err(match status {
        StatusCode::UNAUTHORIZED => Error::Unauthorized,
        StatusCode::FORBIDDEN => Error::Forbidden,
        StatusCode::NOT_FOUND => Error::NotFound,
        StatusCode::CONFLICT => Error::Conflict(message),
        _ => Error::Backend {
            status: status.as_u16(),
            message,
        },
    })
}

fn single_row(rows: Vec<Value>) -> Result<Value> {
    rows.into_iter().next().ok_or(Error::NotFound)
}

#[async_trait]
impl Backend for RestBackend {
    async fn query(&self, table: Table, filter: &Filter) -> Result<Vec<Value>> {
        if filter.is_empty_selection() {
            return Ok(Vec::new());
        }
        let mut pairs = vec![("select".to_string(), "*".to_string())];
        pairs.extend(filter.to_query_pairs());
        let resp = self
            .authorize(self.http.get(self.table_url(table)?))
            .query(&pairs)
            .send()
            .await?;
        handle_response(resp).await
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        let resp = self
            .authorize(self.http.post(self.table_url(table)?))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        single_row(handle_response(resp).await?)
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value> {
        let resp = self
            .authorize(self.http.patch(self.table_url(table)?))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        single_row(handle_response(resp).await?)
    }

    async fn open_channel(&self, filter: &ChannelFilter) -> Result<Channel> {
        phoenix::open(&self.realtime, filter).await
    }
}
