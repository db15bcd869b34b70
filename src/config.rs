use std::{env, time::Duration};

use crate::error::ConfigError;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_OUTBOUND_TIMEOUT_SECS: u64 = 8;
const DEFAULT_SEARCH_RESULT_LIMIT: i64 = 20;
const DEFAULT_PLACEHOLDER_IMAGE_URL: &str = "https://placehold.co/600x400?text=No+Image";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub line_channel_secret: String,
    pub line_channel_access_token: String,
    /// Recipient of new-lead notifications. Required at startup.
    pub line_admin_user_id: String,
    pub line_api_base: String,
    pub meta_verify_token: String,
    pub meta_page_access_token: String,
    /// Empty means Meta POST deliveries are accepted unsigned.
    pub meta_app_secret: String,
    pub meta_graph_base: String,
    pub meta_reply_enabled: bool,
    pub reply_async: bool,
    pub public_site_url: String,
    pub placeholder_image_url: String,
    pub outbound_timeout: Duration,
    pub search_result_limit: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |key: &'static str| text(key).ok_or(ConfigError::Missing(key));

        let port = match text("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value: raw,
            })?,
            None => DEFAULT_PORT,
        };
        let outbound_timeout_secs = match text("OUTBOUND_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "OUTBOUND_TIMEOUT_SECS",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_OUTBOUND_TIMEOUT_SECS,
        };
        let search_result_limit = match text("SEARCH_RESULT_LIMIT") {
            Some(raw) => match raw.parse::<i64>() {
                Ok(limit) if limit > 0 => limit,
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "SEARCH_RESULT_LIMIT",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_SEARCH_RESULT_LIMIT,
        };

        Ok(Self {
            port,
            database_url: resolve_database_url(&text),
            line_channel_secret: required("LINE_CHANNEL_SECRET")?,
            line_channel_access_token: required("LINE_CHANNEL_ACCESS_TOKEN")?,
            line_admin_user_id: required("LINE_ADMIN_USER_ID")?,
            line_api_base: base_url(text("LINE_API_BASE"), "https://api.line.me"),
            meta_verify_token: required("META_VERIFY_TOKEN")?,
            meta_page_access_token: text("META_PAGE_ACCESS_TOKEN").unwrap_or_default(),
            meta_app_secret: text("META_APP_SECRET").unwrap_or_default(),
            meta_graph_base: base_url(
                text("META_GRAPH_BASE"),
                "https://graph.facebook.com/v21.0",
            ),
            meta_reply_enabled: flag(text("META_REPLY_ENABLED"), "META_REPLY_ENABLED")?,
            reply_async: flag(text("REPLY_ASYNC"), "REPLY_ASYNC")?,
            public_site_url: base_url(text("PUBLIC_SITE_URL"), "http://localhost:3000"),
            placeholder_image_url: text("PLACEHOLDER_IMAGE_URL")
                .unwrap_or_else(|| DEFAULT_PLACEHOLDER_IMAGE_URL.to_string()),
            outbound_timeout: Duration::from_secs(outbound_timeout_secs),
            search_result_limit,
        })
    }
}

fn resolve_database_url<F>(text: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = text("DATABASE_URL") {
        return url;
    }
    let pick = |primary: &str, fallback: &str, default: &str| {
        text(primary)
            .or_else(|| text(fallback))
            .unwrap_or_else(|| default.to_string())
    };
    let host = pick("POSTGRES_HOST", "PGHOST", "localhost");
    let port = pick("POSTGRES_PORT", "PGPORT", "5432");
    let user = pick("POSTGRES_USER", "PGUSER", "postgres");
    let password = pick("POSTGRES_PASSWORD", "PGPASSWORD", "postgres");
    let db = pick("POSTGRES_DB", "PGDATABASE", "property_leads");
    format!("postgres://{user}:{password}@{host}:{port}/{db}")
}

fn base_url(value: Option<String>, default: &str) -> String {
    value
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn flag(value: Option<String>, name: &'static str) -> Result<bool, ConfigError> {
    let Some(raw) = value else {
        return Ok(false);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid { name, value: raw }),
    }
}
