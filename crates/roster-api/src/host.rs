//! Local automation host RPC client.
//!
//! The host owns the browser profiles: an HTTP daemon on localhost that
//! creates, opens, closes, renames, and reads/writes cookies into named
//! profiles. roster never touches profile internals -- everything goes
//! through this request/response surface, and every call in the process
//! is expected to pass through the shared rate limiter first.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::cloud::CookieItem;
use crate::error::Error;
use crate::transport::TransportConfig;

// ── Wire types ──────────────────────────────────────────────────────

/// One profile as listed by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

/// A page of profiles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePage {
    #[serde(default)]
    pub list: Vec<ProfileSummary>,
    #[serde(default)]
    pub total: usize,
}

/// Creation options for a new profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedProfile {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct CookieList {
    #[serde(default)]
    cookies: Vec<CookieItem>,
}

// ── Envelope ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct HostEnvelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    msg: Option<String>,
}

// ── HostClient ──────────────────────────────────────────────────────

/// RPC client for the local automation host.
///
/// All endpoints are JSON-over-POST with a `{ success, data, msg }`
/// envelope; `msg` carries the failure reason when `success` is false.
pub struct HostClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HostClient {
    /// Create a new host client (typically `http://127.0.0.1:54345`).
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// The host base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Profile enumeration ─────────────────────────────────────────

    /// List profiles, optionally filtered to a creator.
    pub async fn list_profiles(
        &self,
        page: usize,
        page_size: usize,
        created_by: Option<&str>,
    ) -> Result<ProfilePage, Error> {
        let body = serde_json::json!({
            "page": page,
            "pageSize": page_size,
            "createdBy": created_by,
        });
        self.call("profile/list", &body).await
    }

    /// Fetch one profile's details.
    pub async fn profile_detail(&self, profile_id: &str) -> Result<ProfileSummary, Error> {
        let body = serde_json::json!({ "id": profile_id });
        self.call("profile/detail", &body).await
    }

    // ── Profile lifecycle ───────────────────────────────────────────

    /// Create a profile, optionally seeding it with a cookie header.
    /// Returns the new profile id.
    pub async fn create_profile(
        &self,
        spec: &ProfileSpec,
        cookie: &str,
        name: Option<&str>,
    ) -> Result<String, Error> {
        let body = serde_json::json!({
            "spec": spec,
            "cookie": cookie,
            "name": name,
        });
        let created: CreatedProfile = self.call("profile/create", &body).await?;
        Ok(created.id)
    }

    /// Launch a profile's browser session.
    pub async fn open_profile(&self, profile_id: &str) -> Result<(), Error> {
        let body = serde_json::json!({ "id": profile_id });
        self.call_ok("profile/open", &body).await
    }

    /// Close a profile's browser session. A no-op if it isn't running.
    pub async fn close_profile(&self, profile_id: &str) -> Result<(), Error> {
        let body = serde_json::json!({ "id": profile_id });
        self.call_ok("profile/close", &body).await
    }

    /// Delete profiles from the host.
    pub async fn delete_profiles(&self, profile_ids: &[String]) -> Result<(), Error> {
        let body = serde_json::json!({ "ids": profile_ids });
        self.call_ok("profile/delete", &body).await
    }

    /// Rename a profile (display name shown in the host UI).
    pub async fn rename_profile(&self, profile_id: &str, name: &str) -> Result<(), Error> {
        let body = serde_json::json!({ "id": profile_id, "name": name });
        self.call_ok("profile/rename", &body).await
    }

    // ── Cookies ─────────────────────────────────────────────────────

    /// Read the profile's current cookies.
    pub async fn read_cookies(&self, profile_id: &str) -> Result<Vec<CookieItem>, Error> {
        let body = serde_json::json!({ "id": profile_id });
        let list: CookieList = self.call("profile/cookies", &body).await?;
        Ok(list.cookies)
    }

    /// Write cookies into the profile, replacing any with the same names.
    pub async fn write_cookies(
        &self,
        profile_id: &str,
        cookies: &[CookieItem],
    ) -> Result<(), Error> {
        let body = serde_json::json!({ "id": profile_id, "cookies": cookies });
        self.call_ok("profile/cookies/set", &body).await
    }

    // ── Health ──────────────────────────────────────────────────────

    /// Whether the host daemon is reachable.
    pub async fn health_check(&self) -> bool {
        let body = serde_json::json!({});
        self.call_ok("health", &body).await.is_ok()
    }

    // ── Request plumbing ────────────────────────────────────────────

    async fn call<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, Error> {
        let url = self.base_url.join(path)?;
        debug!("POST {}", url);
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let body = resp.text().await.map_err(Error::Transport)?;
        let envelope: HostEnvelope<T> =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: body.clone(),
            })?;

        if !envelope.success {
            return Err(Error::Host {
                message: envelope.msg.unwrap_or_else(|| "unknown host error".into()),
            });
        }

        envelope.data.ok_or_else(|| Error::Deserialization {
            message: "host envelope success=true but data missing".into(),
            body,
        })
    }

    async fn call_ok(&self, path: &str, body: &impl Serialize) -> Result<(), Error> {
        let url = self.base_url.join(path)?;
        debug!("POST {}", url);
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let body = resp.text().await.map_err(Error::Transport)?;
        let envelope: HostEnvelope<serde_json::Value> =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: body.clone(),
            })?;

        if !envelope.success {
            return Err(Error::Host {
                message: envelope.msg.unwrap_or_else(|| "unknown host error".into()),
            });
        }
        Ok(())
    }
}
