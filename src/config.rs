// src/config.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Driver parameters: parsing and validation of the registry-style parameter
// map, plus an environment loader used by the CLI.

use std::collections::HashMap;
use std::env;

use crate::constants::{DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::copy::CopyConfig;
use crate::error::{DriverError, Result};

/// A loosely typed parameter value, as handed over by configuration files.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
}

impl ParamValue {
    fn render(&self) -> String {
        match self {
            ParamValue::Str(s) => s.clone(),
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::UInt(u) => u.to_string(),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<u64> for ParamValue {
    fn from(u: u64) -> Self {
        ParamValue::UInt(u)
    }
}

/// Validated construction parameters for [`CosDriver`](crate::driver::CosDriver).
#[derive(Debug, Clone)]
pub struct DriverParameters {
    pub secret_id: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    /// Use https when talking to the derived endpoint (default: true)
    pub secure: bool,
    /// Writer part size, never below `MIN_CHUNK_SIZE`
    pub chunk_size: u64,
    /// Key prefix every logical path is mapped under
    pub root_directory: String,
    /// Overrides the `cos.<region>.myqcloud.com` endpoint
    pub endpoint: Option<String>,
    pub copy: CopyConfig,
}

impl DriverParameters {
    /// Parameters with defaults for everything but the required fields.
    pub fn new(
        secret_id: impl Into<String>,
        secret_key: impl Into<String>,
        bucket: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
            bucket: bucket.into(),
            region: region.into(),
            secure: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            root_directory: String::new(),
            endpoint: None,
            copy: CopyConfig::default(),
        }
    }

    /// Builds parameters from a lowercase-keyed parameter map.
    pub fn from_parameters(params: &HashMap<String, ParamValue>) -> Result<Self> {
        let secret_id = required(params, "secretid")?;
        let secret_key = required(params, "secretkey")?;
        let region = required(params, "region")?;
        let bucket = required(params, "bucket")?;

        let mut out = Self::new(secret_id, secret_key, bucket, region);

        if let Some(v) = params.get("secure") {
            out.secure = parse_bool("secure", v)?;
        }

        if let Some(v) = params.get("chunksize") {
            out.chunk_size = parse_size("chunksize", v)?;
            if out.chunk_size < MIN_CHUNK_SIZE {
                return Err(DriverError::InvalidParameter(format!(
                    "the chunksize {} parameter should be a number that is larger than or equal to {}",
                    out.chunk_size, MIN_CHUNK_SIZE
                )));
            }
        }

        if let Some(v) = params.get("rootdirectory") {
            out.root_directory = v.render();
        }

        if let Some(v) = params.get("endpoint") {
            let endpoint = v.render();
            if !endpoint.is_empty() {
                out.endpoint = Some(endpoint);
            }
        }

        if let Some(v) = params.get("multipartcopythresholdsize") {
            out.copy.threshold = parse_size("multipartcopythresholdsize", v)?;
        }
        if let Some(v) = params.get("multipartcopychunksize") {
            out.copy.chunk_size = parse_size("multipartcopychunksize", v)?;
        }
        if let Some(v) = params.get("multipartcopymaxconcurrency") {
            out.copy.max_concurrency = parse_size("multipartcopymaxconcurrency", v)? as usize;
        }
        out.copy.validate()?;

        Ok(out)
    }

    /// Reads `COS_*` variables (after loading `.env`) and validates them the
    /// same way as a parameter map.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut params = HashMap::new();
        for (var, key) in [
            ("COS_SECRET_ID", "secretid"),
            ("COS_SECRET_KEY", "secretkey"),
            ("COS_BUCKET", "bucket"),
            ("COS_REGION", "region"),
            ("COS_SECURE", "secure"),
            ("COS_CHUNK_SIZE", "chunksize"),
            ("COS_ROOT_DIRECTORY", "rootdirectory"),
            ("COS_ENDPOINT", "endpoint"),
        ] {
            if let Ok(val) = env::var(var) {
                params.insert(key.to_string(), ParamValue::Str(val));
            }
        }
        Self::from_parameters(&params)
    }

    /// Endpoint URL the S3 transport should talk to.
    pub fn endpoint_url(&self) -> String {
        if let Some(ep) = &self.endpoint {
            return ep.clone();
        }
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://cos.{}.myqcloud.com", scheme, self.region)
    }
}

fn required(params: &HashMap<String, ParamValue>, key: &str) -> Result<String> {
    match params.get(key).map(ParamValue::render) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(DriverError::InvalidParameter(format!("no {} parameter provided", key))),
    }
}

fn parse_bool(key: &str, v: &ParamValue) -> Result<bool> {
    let invalid = || {
        DriverError::InvalidParameter(format!(
            "the {} parameter should be a boolean, got {:?}",
            key, v
        ))
    };
    match v {
        ParamValue::Bool(b) => Ok(*b),
        ParamValue::Str(s) => match s.trim() {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}

fn parse_size(key: &str, v: &ParamValue) -> Result<u64> {
    let invalid = || {
        DriverError::InvalidParameter(format!(
            "the {} parameter should be a non-negative number, got {:?}",
            key, v
        ))
    };
    match v {
        ParamValue::UInt(u) => Ok(*u),
        ParamValue::Int(i) => u64::try_from(*i).map_err(|_| invalid()),
        ParamValue::Str(s) => parse_int_literal(s).ok_or_else(invalid),
        ParamValue::Bool(_) => Err(invalid()),
    }
}

/// Integer literal with an optional radix prefix (`0x`, `0o`, `0b`, or a
/// bare leading `0` for octal). Underscores between digits are ignored.
fn parse_int_literal(s: &str) -> Option<u64> {
    let s = s.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    let (digits, radix) = if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (rest, 16)
    } else if let Some(rest) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        (rest, 8)
    } else if let Some(rest) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        (rest, 2)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return None;
    }
    u64::from_str_radix(&cleaned, radix).ok()
}
