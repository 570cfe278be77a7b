// API client module: a small blocking HTTP client for the sandbox API.
// Each method maps to exactly one request; responses are decoded from the
// `{ "msg": ..., "data": ... }` envelope into one typed payload per endpoint.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{multipart, Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_DISPOSITION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CliError, CliResult};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const FALLBACK_DOWNLOAD_NAME: &str = "download.zip";

const OK: &[StatusCode] = &[StatusCode::OK];
const CREATED: &[StatusCode] = &[StatusCode::OK, StatusCode::CREATED];

/// Blocking client holding the base URL of the API and an optional bearer
/// token. Cheap to build; commands construct one per invocation.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

/// Every JSON body from the API is wrapped in `{ "msg": ..., "data": ... }`.
/// Only `data` is read; `msg` is informational.
#[derive(Deserialize, Debug)]
struct Envelope<T> {
    data: T,
}

/// The server encodes empty lists as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A remote sandbox as reported by the server. `status` is passed through
/// untouched; the set of values is owned by the server.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Sandbox {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub ip_address: String,
    pub created_at: String,
    pub updated_at: String,
    pub tenant_id: String,
    pub user_id: i64,
    pub description: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SandboxPage {
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<Sandbox>,
    pub total: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub tenant_id: String,
}

/// `/auth/status` is the one endpoint that answers without an envelope.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub user: User,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteFile {
    pub path: String,
    pub name: String,
    pub content: String,
}

/// Payload of `/sandbox/exec` and `/sandbox/run`.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ExecutionResult {
    pub output: String,
    pub error: String,
    pub sandbox: String,
}

impl ExecutionResult {
    /// A non-empty `error` wins over `output`, even on HTTP 200.
    fn into_output(self, context: &'static str) -> CliResult<String> {
        if self.error.is_empty() {
            Ok(self.output)
        } else {
            Err(CliError::Execution {
                context,
                message: self.error,
            })
        }
    }
}

#[derive(Serialize, Debug, Default)]
pub struct CreateSandboxRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secrets: Option<BTreeMap<String, String>>,
}

#[derive(Serialize, Debug)]
struct RunCommandRequest<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
}

#[derive(Serialize, Debug)]
struct RunPythonRequest<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entrypoint: Option<&'a str>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Overwrite,
    Append,
}

#[derive(Serialize, Debug)]
struct UpdateFileRequest<'a> {
    path: &'a str,
    content: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    write_mode: WriteMode,
}

/// Streamed zip download. The caller drains `body` (it implements `Read`).
pub struct Download {
    pub filename: String,
    pub body: Response,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> CliResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(CliError::transport("failed to build HTTP client"))?;
        Ok(ApiClient {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Authorization header map; empty when no token is configured.
    fn auth_headers(&self) -> CliResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(t) = &self.token {
            let val = HeaderValue::from_str(&format!("Bearer {t}"))
                .map_err(|_| CliError::validation("token contains invalid characters"))?;
            headers.insert(AUTHORIZATION, val);
        }
        Ok(headers)
    }

    fn request(&self, method: Method, endpoint: &str) -> CliResult<RequestBuilder> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%method, %url, "sending request");
        Ok(self.client.request(method, url).headers(self.auth_headers()?))
    }

    fn send(&self, builder: RequestBuilder, context: &'static str) -> CliResult<Response> {
        let response = builder.send().map_err(CliError::transport(context))?;
        debug!(status = %response.status(), url = %response.url(), "received response");
        Ok(response)
    }

    /// GET /auth/status. A 401 is reported as an authentication failure
    /// rather than a generic remote error.
    pub fn auth_status(&self) -> CliResult<AuthStatus> {
        const CONTEXT: &str = "failed to get auth status";
        let response = self.send(self.request(Method::GET, "/auth/status")?, CONTEXT)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(CliError::Authentication(body_text(response)));
        }
        let response = expect_status(response, OK, CONTEXT)?;
        let text = response.text().map_err(CliError::transport(CONTEXT))?;
        serde_json::from_str(&text).map_err(|source| CliError::Decode {
            context: CONTEXT,
            source,
        })
    }

    pub fn list_sandboxes(&self) -> CliResult<SandboxPage> {
        const CONTEXT: &str = "failed to list sandboxes";
        let response = self.send(self.request(Method::GET, "/sandbox")?, CONTEXT)?;
        let page: Option<SandboxPage> = decode(expect_status(response, OK, CONTEXT)?, CONTEXT)?;
        Ok(page.unwrap_or_default())
    }

    pub fn create_sandbox(&self, req: &CreateSandboxRequest) -> CliResult<Sandbox> {
        const CONTEXT: &str = "failed to create sandbox";
        let builder = self.request(Method::POST, "/sandbox")?.json(req);
        let response = self.send(builder, CONTEXT)?;
        decode(expect_status(response, CREATED, CONTEXT)?, CONTEXT)
    }

    pub fn delete_sandbox(&self, name: &str) -> CliResult<()> {
        const CONTEXT: &str = "failed to delete sandbox";
        let endpoint = format!("/sandbox/{name}");
        let response = self.send(self.request(Method::DELETE, &endpoint)?, CONTEXT)?;
        expect_status(response, OK, CONTEXT).map(drop)
    }

    pub fn start_sandbox(&self, name: &str) -> CliResult<()> {
        const CONTEXT: &str = "failed to start sandbox";
        let endpoint = format!("/sandbox/{name}/start");
        let response = self.send(self.request(Method::PUT, &endpoint)?, CONTEXT)?;
        expect_status(response, OK, CONTEXT).map(drop)
    }

    pub fn stop_sandbox(&self, name: &str) -> CliResult<()> {
        const CONTEXT: &str = "failed to stop sandbox";
        let endpoint = format!("/sandbox/{name}/stop");
        let response = self.send(self.request(Method::PUT, &endpoint)?, CONTEXT)?;
        expect_status(response, OK, CONTEXT).map(drop)
    }

    /// POST /sandbox/exec. Returns the command's output.
    pub fn run_command(&self, sandbox: Option<&str>, command: &str) -> CliResult<String> {
        const CONTEXT: &str = "command failed";
        let body = RunCommandRequest {
            command,
            id: sandbox.filter(|s| !s.is_empty()),
        };
        let builder = self.request(Method::POST, "/sandbox/exec")?.json(&body);
        let response = self.send(builder, CONTEXT)?;
        let result: ExecutionResult =
            decode(expect_status(response, OK, "failed to run command")?, CONTEXT)?;
        result.into_output(CONTEXT)
    }

    /// POST /sandbox/run with inline Python source.
    pub fn run_python(
        &self,
        sandbox: Option<&str>,
        code: &str,
        entrypoint: Option<&str>,
    ) -> CliResult<String> {
        const CONTEXT: &str = "python execution failed";
        let body = RunPythonRequest {
            code,
            id: sandbox.filter(|s| !s.is_empty()),
            entrypoint: entrypoint.filter(|e| !e.is_empty()),
        };
        let builder = self.request(Method::POST, "/sandbox/run")?.json(&body);
        let response = self.send(builder, CONTEXT)?;
        let result: ExecutionResult =
            decode(expect_status(response, OK, "failed to run python")?, CONTEXT)?;
        result.into_output(CONTEXT)
    }

    /// GET /sandbox/{id}/zip. The body is left unread for the caller.
    pub fn download_zip(&self, sandbox: &str, dir: Option<&str>) -> CliResult<Download> {
        const CONTEXT: &str = "failed to download zip";
        let endpoint = format!("/sandbox/{sandbox}/zip");
        let mut builder = self.request(Method::GET, &endpoint)?;
        if let Some(dir) = dir.filter(|d| !d.is_empty()) {
            builder = builder.query(&[("dir", dir)]);
        }
        let response = expect_status(self.send(builder, CONTEXT)?, OK, CONTEXT)?;
        let filename = filename_from_disposition(
            response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|value| value.to_str().ok()),
        );
        Ok(Download {
            filename,
            body: response,
        })
    }

    pub fn list_files(
        &self,
        sandbox: &str,
        dir: Option<&str>,
        max_depth: u32,
    ) -> CliResult<Vec<RemoteFile>> {
        const CONTEXT: &str = "failed to list files";
        let endpoint = format!("/sandbox/{sandbox}/files");
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(dir) = dir.filter(|d| !d.is_empty()) {
            params.push(("dir", dir.to_string()));
        }
        if max_depth > 0 {
            params.push(("max_depth", max_depth.to_string()));
        }
        let mut builder = self.request(Method::GET, &endpoint)?;
        if !params.is_empty() {
            builder = builder.query(&params);
        }
        let response = self.send(builder, CONTEXT)?;
        let files: Option<Vec<RemoteFile>> =
            decode(expect_status(response, OK, CONTEXT)?, CONTEXT)?;
        Ok(files.unwrap_or_default())
    }

    pub fn update_file(
        &self,
        sandbox: &str,
        path: &str,
        content: &str,
        write_mode: WriteMode,
    ) -> CliResult<()> {
        const CONTEXT: &str = "failed to update file";
        let endpoint = format!("/sandbox/{sandbox}/files");
        let body = UpdateFileRequest {
            path,
            content,
            kind: "file",
            write_mode,
        };
        let builder = self.request(Method::PUT, &endpoint)?.json(&body);
        let response = self.send(builder, CONTEXT)?;
        expect_status(response, OK, CONTEXT).map(drop)
    }

    /// Upload an archive using multipart/form-data: the file goes in the
    /// `archive` field, plus `path` and `format` text fields.
    pub fn upload_archive(
        &self,
        sandbox: &str,
        archive: &Path,
        target_path: &str,
        format: &str,
    ) -> CliResult<()> {
        const CONTEXT: &str = "failed to upload archive";
        let form = multipart::Form::new()
            .file("archive", archive)
            .map_err(|err| {
                CliError::filesystem(format!("failed to open archive {}", archive.display()), err)
            })?
            .text("path", target_path.to_string())
            .text("format", format.to_string());

        let endpoint = format!("/sandbox/{sandbox}/upload");
        let builder = self.request(Method::POST, &endpoint)?.multipart(form);
        let response = self.send(builder, CONTEXT)?;
        expect_status(response, OK, CONTEXT).map(drop)
    }
}

/// Pass the response through when its status is in `accepted`; otherwise
/// surface the body verbatim.
fn expect_status(
    response: Response,
    accepted: &[StatusCode],
    context: &'static str,
) -> CliResult<Response> {
    let status = response.status();
    if accepted.contains(&status) {
        return Ok(response);
    }
    Err(CliError::Remote {
        context,
        status: status.as_u16(),
        body: body_text(response),
    })
}

fn decode<T: DeserializeOwned>(response: Response, context: &'static str) -> CliResult<T> {
    let text = response.text().map_err(CliError::transport(context))?;
    serde_json::from_str::<Envelope<T>>(&text)
        .map(|envelope| envelope.data)
        .map_err(|source| CliError::Decode { context, source })
}

fn body_text(response: Response) -> String {
    response.text().unwrap_or_default()
}

/// Pull the value of `filename="..."` out of a Content-Disposition header.
pub fn filename_from_disposition(header: Option<&str>) -> String {
    const TOKEN: &str = "filename=\"";
    header
        .and_then(|value| {
            let start = value.find(TOKEN)? + TOKEN.len();
            let rest = &value[start..];
            rest.find('"').map(|end| rest[..end].to_string())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_DOWNLOAD_NAME.to_string())
}
