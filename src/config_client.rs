//! An HTTP client that fetches configuration and exchanges assignments with the server.
use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
};

use reqwest::{StatusCode, Url};

use crate::{
    assignments::{AssignmentPostback, AssignmentsResponse},
    config::Config,
    Error, Result,
};

/// Remote endpoint the SDK talks to. Abstracted so the configuration layer can be driven by mock
/// servers in tests.
///
/// Each method is a single attempt; retry policy belongs to the caller.
pub trait RemoteConfigClient: Send + Sync + 'static {
    /// Fetch the latest configuration.
    fn fetch_config(&self) -> impl Future<Output = Result<Config>> + Send;
    /// Fetch the assignments the server holds for this user.
    fn get_assignments(&self) -> impl Future<Output = Result<AssignmentsResponse>> + Send;
    /// Confirm a variant selection with the server.
    fn confirm_assignments(
        &self,
        postback: AssignmentPostback,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub struct HttpConfigClientConfig {
    pub base_url: String,
    pub api_key: String,
    /// SDK name. Usually, the host platform name.
    pub sdk_name: String,
    /// Version of SDK.
    pub sdk_version: String,
}

pub const DEFAULT_BASE_URL: &'static str = "https://config.paywall.cloud/api";

const CONFIG_ENDPOINT: &'static str = "/v1/config";
const ASSIGNMENTS_ENDPOINT: &'static str = "/v1/assignments";
const CONFIRM_ASSIGNMENTS_ENDPOINT: &'static str = "/v1/confirm_assignments";

impl Default for HttpConfigClientConfig {
    fn default() -> HttpConfigClientConfig {
        HttpConfigClientConfig {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: String::new(),
            sdk_name: "rust".to_owned(),
            sdk_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// A [`RemoteConfigClient`] backed by the paywall HTTP API.
pub struct HttpConfigClient {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    config: HttpConfigClientConfig,
    /// If we receive a 401 Unauthorized error during a request, it means the API key is not
    /// valid. We cache this error so we don't issue additional requests to the server.
    unauthorized: AtomicBool,
}

impl HttpConfigClient {
    pub fn new(config: HttpConfigClientConfig) -> HttpConfigClient {
        let client = reqwest::Client::new();

        HttpConfigClient {
            client,
            config,
            unauthorized: AtomicBool::new(false),
        }
    }

    fn endpoint_url(&self, endpoint: &str) -> Result<Url> {
        Url::parse_with_params(
            &format!("{}{}", self.config.base_url, endpoint),
            &[
                ("apiKey", &*self.config.api_key),
                ("sdkName", &*self.config.sdk_name),
                ("sdkVersion", &*self.config.sdk_version),
                ("coreVersion", env!("CARGO_PKG_VERSION")),
            ],
        )
        .map_err(|err| Error::InvalidBaseUrl(err))
    }

    fn ensure_authorized(&self) -> Result<()> {
        if self.unauthorized.load(Ordering::Relaxed) {
            return Err(Error::Unauthorized);
        }
        Ok(())
    }

    /// Map a non-success status to an SDK error, latching the unauthorized flag on 401.
    fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        response.error_for_status().map_err(|err| {
            if err.status() == Some(StatusCode::UNAUTHORIZED) {
                log::warn!(target: "paywall", "client is not authorized. Check your API key");
                self.unauthorized.store(true, Ordering::Relaxed);
                Error::Unauthorized
            } else {
                log::warn!(target: "paywall", "received non-200 response: {:?}", err);
                Error::from(err)
            }
        })
    }
}

impl RemoteConfigClient for HttpConfigClient {
    async fn fetch_config(&self) -> Result<Config> {
        self.ensure_authorized()?;

        let url = self.endpoint_url(CONFIG_ENDPOINT)?;

        log::debug!(target: "paywall", "fetching configuration");
        let response = self.client.get(url).send().await?;
        let response = self.check_status(response)?;
        let config = response.json().await?;
        log::debug!(target: "paywall", "successfully fetched configuration");

        Ok(config)
    }

    async fn get_assignments(&self) -> Result<AssignmentsResponse> {
        self.ensure_authorized()?;

        let url = self.endpoint_url(ASSIGNMENTS_ENDPOINT)?;

        log::debug!(target: "paywall", "fetching assignments");
        let response = self.client.get(url).send().await?;
        let response = self.check_status(response)?;
        let assignments = response.json().await?;

        Ok(assignments)
    }

    async fn confirm_assignments(&self, postback: AssignmentPostback) -> Result<()> {
        self.ensure_authorized()?;

        let url = self.endpoint_url(CONFIRM_ASSIGNMENTS_ENDPOINT)?;

        log::debug!(target: "paywall", "confirming assignments");
        let response = self.client.post(url).json(&postback).send().await?;
        self.check_status(response)?;

        Ok(())
    }
}
