//! Caller context.
//!
//! Authentication happens at the gateway in front of this service; the
//! gateway forwards the resolved caller in request headers:
//!
//! - `x-organization-id`: the organization the caller acts for
//! - `x-platform-access: true`: platform administrator
//! - `x-full-access: true`: may see personal data of the organization

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

use crate::config::PlatformSettings;
use crate::error::AppError;

pub const ORGANIZATION_HEADER: &str = "x-organization-id";
pub const PLATFORM_ACCESS_HEADER: &str = "x-platform-access";
pub const FULL_ACCESS_HEADER: &str = "x-full-access";

/// Who is asking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub organization_id: Option<String>,
    pub platform_access: bool,
    pub full_access: bool,
}

impl AuthContext {
    pub fn platform() -> Self {
        Self {
            organization_id: None,
            platform_access: true,
            full_access: true,
        }
    }

    pub fn organization(id: impl Into<String>) -> Self {
        Self {
            organization_id: Some(id.into()),
            platform_access: false,
            full_access: false,
        }
    }

    pub fn with_full_access(mut self) -> Self {
        self.full_access = true;
        self
    }

    /// Largest page size this caller may request.
    pub fn max_limit(&self, settings: &PlatformSettings) -> u64 {
        if self.platform_access {
            settings.platform_max_limit
        } else {
            settings.max_limit
        }
    }

    /// The organization a scoped caller is restricted to. Platform callers
    /// are unrestricted (`None`); anyone else without an organization is
    /// rejected.
    pub fn require_organization(&self) -> Result<Option<&str>, AppError> {
        if self.platform_access {
            return Ok(None);
        }
        self.organization_id
            .as_deref()
            .map(Some)
            .ok_or(AppError::Unauthorized)
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let flag = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        };
        let organization_id = headers
            .get(ORGANIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Self {
            organization_id,
            platform_access: flag(PLATFORM_ACCESS_HEADER),
            full_access: flag(FULL_ACCESS_HEADER),
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}
