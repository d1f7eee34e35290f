use std::process::{Command, Stdio};
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{error, info};

use crate::cost::UsageCounts;
use crate::error::{Error, Result};
use crate::request::InferenceRequest;

pub const ENDPOINT_ENV: &str = "AZURE_OPENAI_ENDPOINT";
pub const DEPLOYMENT_ENV: &str = "AZURE_OPENAI_DEPLOYMENT";
pub const API_KEY_ENV: &str = "AZURE_OPENAI_API_KEY";
pub const DEFAULT_API_VERSION: &str = "2024-12-01-preview";

/// Token audience for Azure OpenAI when authenticating through Entra ID.
const COGNITIVE_SERVICES_RESOURCE: &str = "https://cognitiveservices.azure.com";

/// Where and which deployment to call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
}

impl ClientConfig {
    pub fn new(
        endpoint: Option<String>,
        deployment: Option<String>,
        api_version: impl Into<String>,
    ) -> Result<Self> {
        let endpoint = require(endpoint, ENDPOINT_ENV)?;
        let deployment = require(deployment, DEPLOYMENT_ENV)?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            deployment,
            api_version: api_version.into(),
        })
    }

    pub fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

fn require(value: Option<String>, name: &str) -> Result<String> {
    match value.map(|v| v.trim().to_owned()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => {
            error!(variable = name, "required configuration is not set");
            Err(Error::ConfigurationMissing(format!("{name} is not set")))
        }
    }
}

/// Attaches credentials to an outgoing request.
pub trait Credential {
    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder>;
}

/// Static resource key sent in the `api-key` header.
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl Credential for ApiKey {
    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(request.header("api-key", &self.0))
    }
}

/// Bearer token obtained from the Azure CLI's signed-in account.
pub struct AzureCliCredential {
    resource: String,
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self {
            resource: COGNITIVE_SERVICES_RESOURCE.to_owned(),
        }
    }

    fn access_token(&self) -> Result<String> {
        info!(resource = %self.resource, "requesting access token from azure cli");

        let output = Command::new("az")
            .args(["account", "get-access-token", "--resource"])
            .arg(&self.resource)
            .args(["--query", "accessToken", "-o", "tsv"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                Error::AuthenticationFailure(format!("failed to run az, is the Azure CLI installed? ({e})"))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(%stderr, "az account get-access-token failed");
            return Err(Error::AuthenticationFailure(stderr.trim().to_owned()));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if token.is_empty() {
            return Err(Error::AuthenticationFailure("azure cli returned an empty token".into()));
        }
        Ok(token)
    }
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

impl Credential for AzureCliCredential {
    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(request.bearer_auth(self.access_token()?))
    }
}

/// Generated text and billing counts from one completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: UsageCounts,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<UsageCounts>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub fn parse_completion(body: &str) -> Result<Completion> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::RemoteRequestFailure(format!("malformed response body: {e}")))?;

    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| Error::RemoteRequestFailure("response contains no message content".into()))?;
    let usage = response
        .usage
        .ok_or_else(|| Error::RemoteRequestFailure("response contains no usage counts".into()))?;

    Ok(Completion { text, usage })
}

fn check_status(status: StatusCode, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    error!(%status, %body, "inference request rejected");
    let detail = format!("HTTP {status}: {}", body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::AuthenticationFailure(detail)),
        _ => Err(Error::RemoteRequestFailure(detail)),
    }
}

/// Explicitly constructed handle to one vision deployment.
pub struct VisionClient {
    http: Client,
    config: ClientConfig,
    credential: Box<dyn Credential>,
}

impl VisionClient {
    pub fn new(config: ClientConfig, credential: Box<dyn Credential>) -> Result<Self> {
        let http = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| Error::RemoteRequestFailure(format!("failed to build http client: {e}")))?;

        info!(endpoint = %config.endpoint, deployment = %config.deployment, api_version = %config.api_version, "vision client configured");
        Ok(Self {
            http,
            config,
            credential,
        })
    }

    /// Submit the request once. No retries: any failure ends the run.
    pub fn complete(&self, request: &InferenceRequest) -> Result<Completion> {
        let url = self.config.completions_url();
        info!(%url, image_count = request.image_count(), "sending inference request");

        let builder = self.credential.authorize(self.http.post(&url).json(request))?;
        let response = builder
            .send()
            .map_err(|e| Error::RemoteRequestFailure(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| Error::RemoteRequestFailure(format!("failed to read response body: {e}")))?;
        check_status(status, &body)?;

        let completion = parse_completion(&body)?;
        info!(
            input_tokens = completion.usage.input_tokens,
            output_tokens = completion.usage.output_tokens,
            "inference completed"
        );
        Ok(completion)
    }
}
