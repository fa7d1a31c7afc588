//! HTTP client for the process backend

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Config;
use crate::domain::types::{
    BatchStatusResponse, RunState, SendInputRequest, SendInputResponse, StartRequest,
    StartResponse, StatusResponse, StopRequest, StopResponse,
};
use crate::error::{Error, Result};

/// Remote side of process lifecycle and console input
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    /// Run the remote start action
    async fn start(
        &self,
        process_id: &str,
        script_name: Option<String>,
        reconnect: bool,
    ) -> Result<StartResponse>;

    /// Request a graceful (`force = false`) or forced stop
    async fn stop(&self, process_id: &str, force: bool) -> Result<StopResponse>;

    /// Write one line to the process console
    async fn send_input(&self, process_id: &str, value: &str) -> Result<SendInputResponse>;

    /// Authoritative run state of one process
    async fn status(&self, process_id: &str) -> Result<RunState>;

    /// Authoritative run state of every running process
    async fn status_all(&self) -> Result<HashMap<String, RunState>>;
}

/// `ProcessBackend` over the backend's JSON HTTP API
pub struct HttpBackend {
    client: Client,
    config: Config,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(config.http_timeout()).build()?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_post<B>(&self, route: &str, body: &B) -> Result<Response>
    where
        B: serde::Serialize + ?Sized,
    {
        let url = self.config.route(route);
        debug!("POST {}", url);
        Ok(self
            .authorize(self.client.post(&url))
            .json(body)
            .send()
            .await?)
    }

    async fn post<B, T>(&self, route: &str, body: &B) -> Result<T>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        read_json(self.send_post(route, body).await?).await
    }

    async fn get_status<T: DeserializeOwned>(&self, query: &[(&str, &str)]) -> Result<T> {
        let url = self.config.route("status");
        let response = self
            .authorize(self.client.get(&url))
            .query(query)
            .timeout(self.config.status_timeout())
            .send()
            .await?;
        read_json(response).await
    }
}

/// Parse a JSON body whatever the HTTP status; error replies carry JSON too
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;
    match serde_json::from_str::<T>(&body) {
        Ok(value) => Ok(value),
        Err(_) if !status.is_success() => Err(Error::Http(format!("{}: {}", status, body.trim()))),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ProcessBackend for HttpBackend {
    async fn start(
        &self,
        process_id: &str,
        script_name: Option<String>,
        reconnect: bool,
    ) -> Result<StartResponse> {
        let request = StartRequest {
            game_id: process_id.to_string(),
            script_name,
            reconnect,
        };
        self.post("start", &request).await
    }

    async fn stop(&self, process_id: &str, force: bool) -> Result<StopResponse> {
        let request = StopRequest {
            game_id: process_id.to_string(),
            force,
        };
        self.post("stop", &request).await
    }

    async fn send_input(&self, process_id: &str, value: &str) -> Result<SendInputResponse> {
        let request = SendInputRequest {
            game_id: process_id.to_string(),
            value: value.to_string(),
        };
        let response = self.send_post("send_input", &request).await?;
        let http_status = response.status().as_u16();
        let mut reply: SendInputResponse = read_json(response).await?;
        reply.http_status = Some(http_status);
        Ok(reply)
    }

    async fn status(&self, process_id: &str) -> Result<RunState> {
        let reply: StatusResponse = self.get_status(&[("game_id", process_id)]).await?;
        reply.into_run_state()
    }

    async fn status_all(&self) -> Result<HashMap<String, RunState>> {
        let reply: BatchStatusResponse = self.get_status(&[]).await?;
        reply.into_run_states()
    }
}
