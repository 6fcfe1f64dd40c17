// ── Core identity types ──
//
// AccountId and LoginMethod form the foundation of every domain type.
// An account id is either a real local profile id or, during the QR
// onboarding flow, a temporary virtual UUID. Consumers never care which.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── AccountId ───────────────────────────────────────────────────────

/// Canonical identifier for one account / browser profile.
///
/// Opaque: the local automation host assigns real ids, the onboarding
/// flow mints virtual UUIDs that are later migrated to real ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Mint a fresh virtual id for the QR onboarding flow.
    pub fn virtual_id() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ── LoginMethod ─────────────────────────────────────────────────────

/// The two mutually exclusive account kinds, each with its own cookie
/// field set.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LoginMethod {
    /// Channels creator console login (`sessionid` / `wxuin` cookies).
    #[default]
    ChannelsHelper,
    /// Shop talent console login (`talent_*` cookies).
    ShopHelper,
}

impl LoginMethod {
    /// Parse a wire string; absent or unrecognized values default to
    /// [`ChannelsHelper`](Self::ChannelsHelper).
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            Some("shop_helper") => Self::ShopHelper,
            _ => Self::ChannelsHelper,
        }
    }

    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::ChannelsHelper => "channels_helper",
            Self::ShopHelper => "shop_helper",
        }
    }
}

// ── AccountInfo ─────────────────────────────────────────────────────

/// Display and identity metadata for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub nickname: String,
    pub avatar: String,
    pub login_method: LoginMethod,
    pub wechat_id: Option<String>,
    pub finder_username: Option<String>,
    pub appuin: Option<String>,
    pub shop_name: Option<String>,
}

impl AccountInfo {
    /// Minimal info carrying just a display name.
    pub fn named(nickname: impl Into<String>, login_method: LoginMethod) -> Self {
        Self {
            nickname: nickname.into(),
            login_method,
            ..Self::default()
        }
    }

    pub fn to_wire(&self) -> roster_api::AccountInfo {
        roster_api::AccountInfo {
            nickname: self.nickname.clone(),
            avatar: self.avatar.clone(),
            login_method: Some(self.login_method.as_wire_str().to_owned()),
            wechat_id: self.wechat_id.clone(),
            finder_username: self.finder_username.clone(),
            appuin: self.appuin.clone(),
            shop_name: self.shop_name.clone(),
        }
    }
}

impl From<&roster_api::AccountInfo> for AccountInfo {
    fn from(wire: &roster_api::AccountInfo) -> Self {
        Self {
            nickname: wire.nickname.clone(),
            avatar: wire.avatar.clone(),
            login_method: LoginMethod::from_wire(wire.login_method.as_deref()),
            wechat_id: wire.wechat_id.clone(),
            finder_username: wire.finder_username.clone(),
            appuin: wire.appuin.clone(),
            shop_name: wire.shop_name.clone(),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_method_wire_round_trip() {
        assert_eq!(
            LoginMethod::from_wire(Some("shop_helper")),
            LoginMethod::ShopHelper
        );
        assert_eq!(
            LoginMethod::from_wire(Some("channels_helper")),
            LoginMethod::ChannelsHelper
        );
        assert_eq!(LoginMethod::from_wire(None), LoginMethod::ChannelsHelper);
        assert_eq!(
            LoginMethod::from_wire(Some("something_new")),
            LoginMethod::ChannelsHelper
        );
        assert_eq!(LoginMethod::ShopHelper.as_wire_str(), "shop_helper");
    }

    #[test]
    fn virtual_ids_are_unique() {
        assert_ne!(AccountId::virtual_id(), AccountId::virtual_id());
    }

    #[test]
    fn account_info_from_wire_defaults_method() {
        let wire = roster_api::AccountInfo {
            nickname: "Shop42".into(),
            ..roster_api::AccountInfo::default()
        };
        let info = AccountInfo::from(&wire);
        assert_eq!(info.nickname, "Shop42");
        assert_eq!(info.login_method, LoginMethod::ChannelsHelper);
    }
}
