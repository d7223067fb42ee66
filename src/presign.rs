// src/presign.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Signed URL issuing: validates the requested method and expiry, the
// transport does the signing.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::constants::DEFAULT_URL_EXPIRY;
use crate::error::{DriverError, Result};
use crate::paths::PathMapper;
use crate::transport::{ObjectClient, PresignMethod};

/// Caller options for [`url_for`]. Both fields fall back to defaults:
/// GET and now + 20 minutes.
#[derive(Debug, Clone, Default)]
pub struct UrlOptions {
    pub method: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl UrlOptions {
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }
}

impl FromStr for PresignMethod {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(PresignMethod::Get),
            "HEAD" => Ok(PresignMethod::Head),
            other => Err(DriverError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Resolves `options` against `now` into a method and a signing duration.
pub fn resolve(options: &UrlOptions, now: DateTime<Utc>) -> Result<(PresignMethod, Duration)> {
    let method = match options.method.as_deref() {
        Some(m) => m.parse()?,
        None => PresignMethod::Get,
    };

    let expires_in = match options.expiry {
        Some(expiry) => (expiry - now).to_std().map_err(|_| {
            DriverError::InvalidParameter(format!("expiry {} is in the past", expiry))
        })?,
        None => DEFAULT_URL_EXPIRY,
    };
    if expires_in.is_zero() {
        return Err(DriverError::InvalidParameter("expiry must be in the future".to_string()));
    }
    Ok((method, expires_in))
}

pub async fn url_for(
    client: &dyn ObjectClient,
    paths: &PathMapper,
    path: &str,
    options: &UrlOptions,
) -> Result<String> {
    let (method, expires_in) = resolve(options, Utc::now())?;
    let key = paths.to_key(path);
    debug!("signing {:?} {} for {:?}", method, key, expires_in);
    Ok(client.presigned_url(method, &key, expires_in).await?)
}
