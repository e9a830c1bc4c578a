//! ArcGIS portal client over the sharing REST API.
//!
//! Covers exactly what the replacement workflow needs: token generation,
//! item search, delete, `addItem`, `publish` (with job polling) and share.
//! Every response is JSON (`f=json`); failures come back either as an HTTP
//! error status or as a 200 carrying `{"error": {"code", "message"}}`.

use crate::domain::model::{ItemKind, LocalArtifact, RemoteItem, SharingPolicy};
use crate::domain::ports::RemoteCatalog;
use crate::utils::error::{PublishError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

const SEARCH_PAGE_SIZE: u32 = 100;
/// Token lifetime requested from `generateToken`, in minutes.
const TOKEN_EXPIRATION_MINUTES: u32 = 120;
/// A cached token this close to expiry is replaced before use.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    /// Epoch milliseconds.
    #[serde(default)]
    expires: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now + chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < expires_at,
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
    #[serde(default)]
    next_start: i64,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: String,
    title: String,
    owner: String,
    #[serde(rename = "type")]
    item_type: String,
}

#[derive(Debug, Deserialize)]
struct AddItemResponse {
    #[serde(default)]
    success: bool,
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(default)]
    services: Vec<PublishedService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishedService {
    service_item_id: Option<String>,
    job_id: Option<String>,
    error: Option<PortalErrorBody>,
}

#[derive(Debug, Deserialize)]
struct PortalErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: String,
    status_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShareResponse {
    #[serde(default)]
    not_shared_with: Vec<String>,
}

pub struct PortalClient {
    client: Client,
    portal_url: String,
    rest_root: Url,
    credentials: Credentials,
    owner: String,
    folder_id: Option<String>,
    poll_interval: Duration,
    max_polls: u32,
    token: Mutex<Option<CachedToken>>,
}

/// Tokens are generated with `client=referer`, so every request must carry
/// the same referer the token was issued for.
fn http_client(portal_url: &str, timeout: Duration) -> Result<Client> {
    let referer = HeaderValue::from_str(portal_url).map_err(|e| PublishError::InvalidConfigValueError {
        field: "portal.url".to_string(),
        value: portal_url.to_string(),
        reason: e.to_string(),
    })?;
    let mut headers = HeaderMap::new();
    headers.insert(REFERER, referer);

    Ok(Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()?)
}

impl PortalClient {
    pub fn new(portal_url: &str, credentials: Credentials, owner: Option<String>) -> Result<Self> {
        let portal_url = portal_url.trim_end_matches('/').to_string();
        let rest_root = Url::parse(&format!("{}/sharing/rest/", portal_url))?;
        let owner = owner.unwrap_or_else(|| credentials.username.clone());

        Ok(Self {
            client: http_client(&portal_url, DEFAULT_TIMEOUT)?,
            portal_url,
            rest_root,
            credentials,
            owner,
            folder_id: None,
            poll_interval: Duration::from_secs(2),
            max_polls: 150,
            token: Mutex::new(None),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = http_client(&self.portal_url, timeout)?;
        Ok(self)
    }

    pub fn with_folder(mut self, folder_id: Option<String>) -> Self {
        self.folder_id = folder_id;
        self
    }

    pub fn with_publish_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.rest_root.join(path)?)
    }

    fn user_content(&self, path: &str) -> Result<Url> {
        self.endpoint(&format!("content/users/{}/{}", self.owner, path))
    }

    /// Returns the cached token, signing in on first use or when it is about to expire.
    async fn token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        tracing::debug!("Generating portal token for {}", self.credentials.username);
        let expiration = TOKEN_EXPIRATION_MINUTES.to_string();
        let response = self
            .client
            .post(self.endpoint("generateToken")?)
            .form(&[
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
                ("client", "referer"),
                ("referer", self.portal_url.as_str()),
                ("expiration", expiration.as_str()),
                ("f", "json"),
            ])
            .send()
            .await?;
        let body: TokenResponse = serde_json::from_value(read_json(response).await?)?;

        *cached = Some(CachedToken {
            value: body.token.clone(),
            expires_at: body.expires.and_then(DateTime::<Utc>::from_timestamp_millis),
        });
        Ok(body.token)
    }

    /// Drops the cached token if it is still the one the portal rejected.
    async fn forget_token(&self, rejected: &str) {
        let mut cached = self.token.lock().await;
        if cached.as_ref().is_some_and(|t| t.value == rejected) {
            *cached = None;
        }
    }

    /// Sends an authenticated request built by `build` from a token.
    ///
    /// A rejected token (498/499) is replaced and the request is sent once more.
    async fn call<F>(&self, build: F) -> Result<Value>
    where
        F: Fn(&str) -> Result<RequestBuilder> + Send + Sync,
    {
        let token = self.token().await?;
        match send_json(build(&token)?).await {
            Err(e) if is_invalid_token(&e) => {
                tracing::warn!("Portal rejected the token ({}), signing in again", e);
                self.forget_token(&token).await;
                let token = self.token().await?;
                send_json(build(&token)?).await
            }
            outcome => outcome,
        }
    }

    async fn search_page(&self, query: &str, start: i64) -> Result<SearchResponse> {
        let num = SEARCH_PAGE_SIZE.to_string();
        let start = start.to_string();
        let value = self
            .call(|token| {
                Ok(self.client.get(self.endpoint("search")?).query(&[
                    ("q", query),
                    ("num", num.as_str()),
                    ("start", start.as_str()),
                    ("f", "json"),
                    ("token", token),
                ]))
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn wait_for_job(&self, service_id: &str, job_id: &str) -> Result<()> {
        let url = self.user_content(&format!("items/{}/status", service_id))?;
        let job_failure = |message: String| PublishError::Publish {
            item_id: service_id.to_string(),
            message,
        };

        for attempt in 1..=self.max_polls {
            let value = self
                .call(|token| {
                    Ok(self.client.get(url.clone()).query(&[
                        ("jobId", job_id),
                        ("jobType", "publish"),
                        ("f", "json"),
                        ("token", token),
                    ]))
                })
                .await?;
            let status: StatusResponse = serde_json::from_value(value)?;

            match status.status.as_str() {
                "completed" => return Ok(()),
                "failed" | "partial" => {
                    return Err(job_failure(status.status_message.unwrap_or_else(|| {
                        format!("publish job {} for service {} {}", job_id, service_id, status.status)
                    })))
                }
                other => {
                    tracing::debug!("Publish job {} is {} (poll {}/{})", job_id, other, attempt, self.max_polls);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Err(job_failure(format!(
            "publish job {} for service {} did not finish after {} polls",
            job_id, service_id, self.max_polls
        )))
    }
}

async fn send_json(request: RequestBuilder) -> Result<Value> {
    read_json(request.send().await?).await
}

/// Reads a portal response, turning HTTP and JSON error envelopes into errors.
async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(PublishError::Portal {
            code: i64::from(status.as_u16()),
            message: text.chars().take(200).collect(),
        });
    }

    let value: Value = serde_json::from_str(&text)?;
    if let Some(error) = value.get("error") {
        let body: PortalErrorBody = serde_json::from_value(error.clone())?;
        return Err(portal_error(body));
    }
    Ok(value)
}

fn portal_error(body: PortalErrorBody) -> PublishError {
    let mut message = body.message;
    if !body.details.is_empty() {
        message = format!("{} ({})", message, body.details.join("; "));
    }
    PublishError::Portal {
        code: body.code,
        message,
    }
}

/// 498 is an invalid or expired token, 499 a missing one.
fn is_invalid_token(err: &PublishError) -> bool {
    matches!(err, PublishError::Portal { code: 498 | 499, .. })
}

fn is_missing_item(err: &PublishError) -> bool {
    match err {
        PublishError::Portal { message, .. } => {
            let message = message.to_lowercase();
            message.contains("does not exist") || message.contains("not found")
        }
        _ => false,
    }
}

/// Portal search syntax for one exact title of one type in the owner's content.
pub fn search_query(title: &str, owner: &str, kind: ItemKind) -> String {
    format!(
        "title:\"{}\" AND owner:{} AND type:\"{}\"",
        title.replace('"', "\\\""),
        owner,
        kind.portal_type()
    )
}

/// Service names may not contain spaces or punctuation.
pub fn service_name(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[async_trait]
impl RemoteCatalog for PortalClient {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn find_items_by_title(&self, title: &str, kind: ItemKind) -> Result<Vec<RemoteItem>> {
        let query = search_query(title, &self.owner, kind);
        let to_resolve_error = |e: PublishError| PublishError::Resolve {
            title: title.to_string(),
            message: e.to_string(),
        };

        let mut items = Vec::new();
        let mut start = 1;
        loop {
            let page = self.search_page(&query, start).await.map_err(to_resolve_error)?;
            items.extend(page.results.into_iter().filter_map(|r| {
                ItemKind::from_portal_type(&r.item_type).map(|kind| RemoteItem {
                    id: r.id,
                    title: r.title,
                    owner: r.owner,
                    kind,
                })
            }));
            if page.next_start <= 0 {
                break;
            }
            start = page.next_start;
        }

        tracing::debug!("Search {} returned {} items", query, items.len());
        Ok(items)
    }

    async fn delete_item(&self, id: &str) -> Result<()> {
        let deleted = self
            .call(|token| {
                Ok(self
                    .client
                    .post(self.user_content(&format!("items/{}/delete", id))?)
                    .form(&[("f", "json"), ("token", token)]))
            })
            .await;

        match deleted {
            Ok(_) => Ok(()),
            Err(e) if is_missing_item(&e) => {
                tracing::debug!("Item {} already gone: {}", id, e);
                Ok(())
            }
            Err(e) => Err(PublishError::Delete {
                item_id: id.to_string(),
                title: String::new(),
                message: e.to_string(),
            }),
        }
    }

    async fn upload_package(
        &self,
        artifact: &LocalArtifact,
        title: &str,
        description: &str,
    ) -> Result<RemoteItem> {
        let upload_error = |message: String| PublishError::Upload {
            title: title.to_string(),
            message,
        };

        let data = tokio::fs::read(&artifact.path)
            .await
            .map_err(|e| upload_error(format!("reading {}: {}", artifact.path.display(), e)))?;
        let file_name = artifact
            .path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.vtpk", artifact.name));
        let path = match &self.folder_id {
            Some(folder) => format!("{}/addItem", folder),
            None => "addItem".to_string(),
        };

        let value = self
            .call(|token| {
                let form = Form::new()
                    .text("f", "json")
                    .text("token", token.to_string())
                    .text("title", title.to_string())
                    .text("type", ItemKind::TilePackage.portal_type())
                    .text("description", description.to_string())
                    .text("tags", "vector tiles,vtpk-publish")
                    .part(
                        "file",
                        Part::bytes(data.clone())
                            .file_name(file_name.clone())
                            .mime_str("application/octet-stream")?,
                    );
                Ok(self.client.post(self.user_content(&path)?).multipart(form))
            })
            .await
            .map_err(|e| upload_error(e.to_string()))?;
        let added: AddItemResponse =
            serde_json::from_value(value).map_err(|e| upload_error(format!("unexpected addItem response: {}", e)))?;

        match added.id {
            Some(id) if added.success => Ok(RemoteItem {
                id,
                title: title.to_string(),
                owner: self.owner.clone(),
                kind: ItemKind::TilePackage,
            }),
            _ => Err(upload_error("portal did not return an item id".to_string())),
        }
    }

    async fn publish_hosted_layer(&self, package_item: &RemoteItem) -> Result<RemoteItem> {
        let publish_error = |message: String| PublishError::Publish {
            item_id: package_item.id.clone(),
            message,
        };

        let parameters = serde_json::json!({ "name": service_name(&package_item.title) }).to_string();
        let value = self
            .call(|token| {
                Ok(self.client.post(self.user_content("publish")?).form(&[
                    ("itemId", package_item.id.as_str()),
                    ("filetype", "vectortilepackage"),
                    ("publishParameters", parameters.as_str()),
                    ("f", "json"),
                    ("token", token),
                ]))
            })
            .await
            .map_err(|e| publish_error(e.to_string()))?;
        let published: PublishResponse =
            serde_json::from_value(value).map_err(|e| publish_error(format!("unexpected publish response: {}", e)))?;

        let service = published
            .services
            .into_iter()
            .next()
            .ok_or_else(|| publish_error("portal returned no services".to_string()))?;
        if let Some(error) = service.error {
            return Err(publish_error(portal_error(error).to_string()));
        }
        let service_id = service
            .service_item_id
            .ok_or_else(|| publish_error("portal returned no service item id".to_string()))?;

        if let Some(job_id) = service.job_id {
            self.wait_for_job(&service_id, &job_id).await.map_err(|e| match e {
                PublishError::Publish { message, .. } => publish_error(message),
                other => publish_error(format!("polling service {}: {}", service_id, other)),
            })?;
        }

        Ok(RemoteItem {
            id: service_id,
            title: package_item.title.clone(),
            owner: self.owner.clone(),
            kind: ItemKind::HostedTileLayer,
        })
    }

    async fn share_item(&self, item: &RemoteItem, policy: &SharingPolicy) -> Result<()> {
        let share_error = |message: String| PublishError::Share {
            item_id: item.id.clone(),
            message,
        };

        let groups = policy.groups.iter().cloned().collect::<Vec<_>>().join(",");
        let value = self
            .call(|token| {
                Ok(self
                    .client
                    .post(self.user_content(&format!("items/{}/share", item.id))?)
                    .form(&[
                        ("everyone", if policy.everyone { "true" } else { "false" }),
                        ("org", if policy.org { "true" } else { "false" }),
                        ("groups", groups.as_str()),
                        ("f", "json"),
                        ("token", token),
                    ]))
            })
            .await
            .map_err(|e| share_error(e.to_string()))?;
        let shared: ShareResponse =
            serde_json::from_value(value).map_err(|e| share_error(format!("unexpected share response: {}", e)))?;

        if !shared.not_shared_with.is_empty() {
            return Err(share_error(format!(
                "not shared with groups: {}",
                shared.not_shared_with.join(", ")
            )));
        }
        Ok(())
    }
}
