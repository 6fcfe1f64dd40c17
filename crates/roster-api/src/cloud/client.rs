// Cloud API HTTP client
//
// Wraps `reqwest::Client` with owner-scoped request construction and
// `{ success, data, error }` envelope unwrapping. All methods return
// unwrapped `data` payloads -- the envelope is stripped before the caller
// sees it.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

use super::types::{
    AccountInfo, AccountStatus, BatchStatus, CleanupReport, CookieBundle, CookieItem, LoginLink,
    LoginState, Registration, ValidationOutcome,
};

// ── Envelope ────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct CloudEnvelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

// ── CloudClient ─────────────────────────────────────────────────────

/// HTTP client for the cloud backend.
///
/// The `owner` scope is a constructor invariant: every request carries it,
/// and constructing a client without one fails with [`Error::MissingOwner`]
/// before any network traffic happens.
pub struct CloudClient {
    http: reqwest::Client,
    base_url: Url,
    owner: String,
}

impl CloudClient {
    /// Create a new cloud client scoped to `owner`.
    pub fn new(
        base_url: Url,
        owner: impl Into<String>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let owner = owner.into();
        if owner.trim().is_empty() {
            return Err(Error::MissingOwner);
        }
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            owner,
        })
    }

    /// The tenant this client is scoped to.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The cloud base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Login flow ──────────────────────────────────────────────────

    /// Mint a login link (and QR code) bound to `account_id`.
    ///
    /// `login_way` selects the flow: `"qr_code"` for ephemeral QR login,
    /// `"permanent_link"` for a shareable link. `extra` carries opaque
    /// profile-creation options the link page needs.
    pub async fn generate_login_link(
        &self,
        account_id: &str,
        login_method: &str,
        login_way: &str,
        extra: Option<serde_json::Value>,
    ) -> Result<LoginLink, Error> {
        let url = self.api_url("generate-link", &[])?;
        let body = serde_json::json!({
            "accountId": account_id,
            "loginMethod": login_method,
            "loginWay": login_way,
            "config": extra,
            "owner": self.owner,
        });
        self.post(url, &body).await
    }

    /// Ask the cloud to actively re-check a pending login.
    ///
    /// This is a poke: the call prompts the cloud to advance state and
    /// write it to the record; state *delivery* happens via the push
    /// channel. Callers log the response, they must not cache it.
    ///
    /// When `cancel` fires, any in-flight request is abandoned and
    /// [`Error::Cancelled`] is returned.
    pub async fn check_login_status(
        &self,
        account_id: &str,
        cancel: &CancellationToken,
    ) -> Result<LoginState, Error> {
        let url = self.api_url(
            "status",
            &[("action", "qr"), ("accountId", account_id), ("owner", &self.owner)],
        )?;

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = self.get::<LoginState>(url) => result,
        }
    }

    /// Delete the login link / placeholder record for `account_id`.
    ///
    /// Returns `Ok(false)` if the record was already gone.
    pub async fn delete_link(&self, account_id: &str) -> Result<bool, Error> {
        let url = self.api_url(
            "admin",
            &[
                ("action", "delete-link"),
                ("accountId", account_id),
                ("owner", &self.owner),
            ],
        )?;
        match self.delete_ok(url).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete any cloud record bound to a local profile id.
    pub async fn delete_link_by_profile(&self, account_id: &str) -> Result<bool, Error> {
        let url = self.api_url(
            "admin",
            &[
                ("action", "delete-by-profile"),
                ("accountId", account_id),
                ("owner", &self.owner),
            ],
        )?;
        match self.delete_ok(url).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Sweep link records that were created but never bound to a profile.
    pub async fn cleanup_orphan_links(&self) -> Result<CleanupReport, Error> {
        let url = self.api_url("admin", &[("action", "cleanup-orphan"), ("owner", &self.owner)])?;
        self.delete(url).await
    }

    // ── Cookie sync & registration ──────────────────────────────────

    /// Pull the cloud's cookie payload for one account.
    pub async fn sync_cookie_from_cloud(&self, account_id: &str) -> Result<CookieBundle, Error> {
        let url = self.api_url("sync-cookie", &[])?;
        let body = serde_json::json!({
            "accountId": account_id,
            "owner": self.owner,
        });
        self.post(url, &body).await
    }

    /// Register (or overwrite) a cloud record for `account_id`.
    pub async fn register_account(
        &self,
        account_id: &str,
        cookies: &[CookieItem],
        login_method: &str,
        account_info: Option<&AccountInfo>,
    ) -> Result<(), Error> {
        let url = self.api_url("account", &[("action", "register")])?;
        let body = serde_json::json!({
            "accountId": account_id,
            "cookies": cookies,
            "loginMethod": login_method,
            "accountInfo": account_info,
            "owner": self.owner,
        });
        self.post_ok(url, &body).await
    }

    /// Atomic validate + register: the cloud verifies the cookies upstream
    /// and creates the record in one call, returning the verified identity.
    pub async fn auto_register_account(
        &self,
        account_id: &str,
        cookies: &[CookieItem],
        login_method: &str,
        account_info: Option<&AccountInfo>,
    ) -> Result<Registration, Error> {
        let url = self.api_url("account", &[("action", "auto")])?;
        let body = serde_json::json!({
            "accountId": account_id,
            "cookies": cookies,
            "loginMethod": login_method,
            "accountInfo": account_info,
            "owner": self.owner,
        });
        self.post(url, &body).await
    }

    // ── Status queries ──────────────────────────────────────────────

    /// Query the cloud's current record for one account.
    ///
    /// Returns `Ok(None)` when the record does not exist -- a deletion
    /// signal, distinct from transport failures which surface as `Err`.
    pub async fn check_account_status(
        &self,
        account_id: &str,
    ) -> Result<Option<AccountStatus>, Error> {
        let url = self.api_url(
            "status",
            &[
                ("action", "account"),
                ("accountId", account_id),
                ("owner", &self.owner),
            ],
        )?;
        match self.get::<AccountStatus>(url).await {
            Ok(status) => Ok(Some(status)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Batch-query the cloud records for many accounts at once.
    pub async fn batch_check_status(&self, account_ids: &[String]) -> Result<BatchStatus, Error> {
        let url = self.api_url("status", &[("action", "batch")])?;
        let body = serde_json::json!({
            "accountIds": account_ids,
            "owner": self.owner,
        });
        self.post(url, &body).await
    }

    /// Validate one account's cookies upstream right now.
    ///
    /// Used as a pre-open check so a profile is never launched with a
    /// cookie the upstream already rejected.
    pub async fn instant_validate_cookie(
        &self,
        account_id: &str,
    ) -> Result<ValidationOutcome, Error> {
        let url = self.api_url("validate", &[("action", "instant")])?;
        let body = serde_json::json!({
            "accountId": account_id,
            "owner": self.owner,
        });
        self.post(url, &body).await
    }

    // ── URL builder ─────────────────────────────────────────────────

    fn api_url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, Error> {
        let mut url = self.base_url.join(&format!("api/{path}"))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    // ── Request helpers ─────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        Self::parse_envelope(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, url: Url, body: &impl Serialize) -> Result<T, Error> {
        debug!("POST {}", url);
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;
        Self::parse_envelope(resp).await
    }

    async fn delete<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("DELETE {}", url);
        let resp = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(Error::Transport)?;
        Self::parse_envelope(resp).await
    }

    /// POST where success carries no meaningful payload.
    async fn post_ok(&self, url: Url, body: &impl Serialize) -> Result<(), Error> {
        debug!("POST {}", url);
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::Transport)?;
        Self::parse_envelope_ok(resp).await
    }

    /// DELETE where success carries no meaningful payload.
    async fn delete_ok(&self, url: Url) -> Result<(), Error> {
        debug!("DELETE {}", url);
        let resp = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(Error::Transport)?;
        Self::parse_envelope_ok(resp).await
    }

    /// Parse the `{ success, data, error }` envelope, returning `data` on
    /// success. A 404 becomes [`Error::RecordNotFound`] so callers can
    /// treat server-side deletion as a signal rather than a failure.
    async fn parse_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        let identifier = resp.url().path().to_owned();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::RecordNotFound { identifier });
        }

        let body = resp.text().await.map_err(Error::Transport)?;

        let envelope: CloudEnvelope<T> =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: body.clone(),
            })?;

        if !envelope.success {
            let message = envelope
                .error
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            if message.to_lowercase().contains("not found") {
                return Err(Error::RecordNotFound { identifier });
            }
            return Err(Error::Cloud {
                message,
                status: status.as_u16(),
            });
        }

        envelope.data.ok_or_else(|| Error::Deserialization {
            message: "envelope success=true but data missing".into(),
            body,
        })
    }

    /// Like [`parse_envelope`](Self::parse_envelope), but tolerates a
    /// missing `data` field on success.
    async fn parse_envelope_ok(resp: reqwest::Response) -> Result<(), Error> {
        let status = resp.status();
        let identifier = resp.url().path().to_owned();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::RecordNotFound { identifier });
        }

        let body = resp.text().await.map_err(Error::Transport)?;

        let envelope: CloudEnvelope<serde_json::Value> =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: body.clone(),
            })?;

        if !envelope.success {
            let message = envelope
                .error
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            if message.to_lowercase().contains("not found") {
                return Err(Error::RecordNotFound { identifier });
            }
            return Err(Error::Cloud {
                message,
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}
