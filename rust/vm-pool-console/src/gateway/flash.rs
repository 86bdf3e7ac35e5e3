//! One-shot messages carried across a redirect.
//!
//! The message rides in a `flash` cookie holding base64url-encoded JSON. The
//! next view that renders takes it out of the jar, which also expires the
//! cookie.

use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Name of the cookie holding the pending flash.
pub const FLASH_COOKIE: &str = "flash";

/// A notice or error message shown once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errmsg: Option<String>,
}

impl Flash {
    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            notice: Some(message.into()),
            errmsg: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            notice: None,
            errmsg: Some(message.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.notice.is_none() && self.errmsg.is_none()
    }

    fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }

    fn decode(raw: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(raw).ok()?;
        serde_json::from_slice::<Self>(&bytes)
            .ok()
            .filter(|flash| !flash.is_empty())
    }

    /// Store this flash in `jar`.
    #[must_use]
    pub fn store(&self, jar: CookieJar) -> CookieJar {
        match self.encode() {
            Ok(value) => jar.add(
                Cookie::build((FLASH_COOKIE, value))
                    .path("/")
                    .http_only(true)
                    .same_site(SameSite::Lax),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping flash message that failed to encode");
                jar
            }
        }
    }

    /// Remove the pending flash from `jar`, returning it if there was one.
    pub fn take(jar: CookieJar) -> (CookieJar, Option<Self>) {
        let Some(cookie) = jar.get(FLASH_COOKIE) else {
            return (jar, None);
        };
        let flash = Self::decode(cookie.value());
        (jar.remove(Cookie::build(FLASH_COOKIE).path("/")), flash)
    }
}

/// `303 See Other` to `location`, leaving `flash` for the next view.
pub fn redirect(location: &str, flash: Option<Flash>) -> Response {
    let jar = match flash {
        Some(flash) => flash.store(CookieJar::new()),
        None => CookieJar::new(),
    };
    (jar, Redirect::to(location)).into_response()
}
