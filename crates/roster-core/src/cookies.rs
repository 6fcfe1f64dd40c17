//! Cookie split/merge codec.
//!
//! The cloud stores session cookies as kind-specific split fields rather
//! than opaque arrays; this module converts between the two shapes.
//! Recognized names are a closed set -- anything else is dropped at the
//! boundary, never passed through.

use roster_api::CookieItem;

use crate::model::LoginMethod;

/// Domain all recognized session cookies live on.
pub const COOKIE_DOMAIN: &str = ".weixin.qq.com";

// Recognized cookie names per account kind.
const CHANNELS_SESSIONID: &str = "sessionid";
const CHANNELS_WXUIN: &str = "wxuin";
const SHOP_TALENT_TOKEN: &str = "talent_token";
const SHOP_TALENT_RAND: &str = "talent_rand";
const SHOP_TALENT_MAGIC: &str = "talent_magic";

// ── ParsedCookies ───────────────────────────────────────────────────

/// The kind-specific split fields stored by the cloud.
///
/// Only one kind's fields are ever populated for a given account; the
/// assembler enforces that by emitting only the fields matching the
/// record's login method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCookies {
    pub channels_sessionid: Option<String>,
    pub channels_wxuin: Option<String>,
    pub shop_talent_token: Option<String>,
    pub shop_talent_rand: Option<String>,
    pub shop_talent_magic: Option<String>,
}

impl ParsedCookies {
    /// Whether the fields required by `method` are all present.
    pub fn has_valid_cookie(&self, method: LoginMethod) -> bool {
        match method {
            LoginMethod::ChannelsHelper => {
                self.channels_sessionid.is_some() && self.channels_wxuin.is_some()
            }
            LoginMethod::ShopHelper => {
                self.shop_talent_token.is_some() && self.shop_talent_magic.is_some()
            }
        }
    }
}

// ── Split ───────────────────────────────────────────────────────────

/// Split a cookie array into the cloud's field shape.
///
/// Unrecognized cookie names are dropped.
pub fn parse_cookies(cookies: &[CookieItem]) -> ParsedCookies {
    let mut parsed = ParsedCookies::default();

    for cookie in cookies {
        let value = Some(cookie.value.clone());
        match cookie.name.as_str() {
            CHANNELS_SESSIONID => parsed.channels_sessionid = value,
            CHANNELS_WXUIN => parsed.channels_wxuin = value,
            SHOP_TALENT_TOKEN => parsed.shop_talent_token = value,
            SHOP_TALENT_RAND => parsed.shop_talent_rand = value,
            SHOP_TALENT_MAGIC => parsed.shop_talent_magic = value,
            _ => {}
        }
    }

    parsed
}

/// Classify a cookie set by its distinguishing names.
///
/// `talent_token` is unique to shop accounts; everything else (including
/// an empty set) classifies as channels.
pub fn detect_login_method(cookies: &[CookieItem]) -> LoginMethod {
    if cookies.iter().any(|c| c.name == SHOP_TALENT_TOKEN) {
        LoginMethod::ShopHelper
    } else {
        LoginMethod::ChannelsHelper
    }
}

// ── Merge ───────────────────────────────────────────────────────────

/// Assemble split fields back into a cookie array.
///
/// Emits only the fields matching `method`, so a record that (illegally)
/// carries both kinds never produces a mixed import.
pub fn assemble_cookies(parsed: &ParsedCookies, method: LoginMethod) -> Vec<CookieItem> {
    let fields: &[(&str, &Option<String>)] = match method {
        LoginMethod::ChannelsHelper => &[
            (CHANNELS_SESSIONID, &parsed.channels_sessionid),
            (CHANNELS_WXUIN, &parsed.channels_wxuin),
        ],
        LoginMethod::ShopHelper => &[
            (SHOP_TALENT_TOKEN, &parsed.shop_talent_token),
            (SHOP_TALENT_RAND, &parsed.shop_talent_rand),
            (SHOP_TALENT_MAGIC, &parsed.shop_talent_magic),
        ],
    };

    fields
        .iter()
        .filter_map(|(name, value)| {
            value
                .as_ref()
                .map(|v| CookieItem::new(*name, v.clone(), COOKIE_DOMAIN))
        })
        .collect()
}

/// Render cookies as a request-header string: `name=value; name2=value2`.
pub fn cookie_header(cookies: &[CookieItem]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Canonical order-insensitive form for comparing two cookie sets: the
/// recognized subset as sorted `name=value` pairs.
///
/// Unrecognized names are dropped before sorting. A live profile
/// accumulates tracking cookies the cloud never stores; only the
/// identity set is meaningful for equality.
pub fn canonical_cookie_string(cookies: &[CookieItem]) -> String {
    let mut pairs: Vec<String> = cookies
        .iter()
        .filter(|c| is_recognized(&c.name))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();
    pairs.sort_unstable();
    pairs.join("; ")
}

fn is_recognized(name: &str) -> bool {
    matches!(
        name,
        CHANNELS_SESSIONID
            | CHANNELS_WXUIN
            | SHOP_TALENT_TOKEN
            | SHOP_TALENT_RAND
            | SHOP_TALENT_MAGIC
    )
}

/// Normalize cookies for cloud registration: leading-dot domain, root
/// path, secure.
pub fn format_for_cloud(cookies: &[CookieItem]) -> Vec<CookieItem> {
    cookies
        .iter()
        .map(|c| {
            let domain = if c.domain.starts_with('.') {
                c.domain.clone()
            } else {
                format!(".{}", c.domain)
            };
            CookieItem {
                name: c.name.clone(),
                value: c.value.clone(),
                domain,
                path: Some("/".into()),
                secure: Some(true),
                http_only: Some(false),
            }
        })
        .collect()
}

// ── Tests ───────────────────────────────────────────────────────────
