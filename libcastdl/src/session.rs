use crate::errors::CdlError;
use crate::DownloadRule;
use reqwest::cookie::Jar;
use reqwest::Client;
use std::sync::Arc;
use url::Url;

/// Authenticated http state shared by every request of a run.
/// Built once and only read afterwards.
#[derive(Debug)]
pub struct Session {
    pub client: Client,
    /// Course base url without the trailing slash
    pub course_url: String,
    pub sitemap_url: String,
}

impl Session {
    pub fn new(course_url: &str, rule: &DownloadRule) -> Result<Self, CdlError> {
        let course = Url::parse(course_url).map_err(|_| CdlError::InvalidUrl(course_url.into()))?;
        let sitemap = Url::parse(&rule.sitemap_url)
            .map_err(|_| CdlError::InvalidUrl(rule.sitemap_url.clone()))?;

        let jar = Jar::default();
        for (name, value) in rule.cookies.iter() {
            let cookie = format!("{name}={value}");
            jar.add_cookie_str(&cookie, &course);
            jar.add_cookie_str(&cookie, &sitemap);
        }
        tracing::debug!("Session created with {} cookie(s)", rule.cookies.len());

        let client = Client::builder()
            .user_agent(rule.user_agent.as_str())
            .cookie_provider(Arc::new(jar))
            .build()
            .map_err(|e| CdlError::ClientBuild(e.to_string()))?;

        Ok(Session {
            client,
            course_url: course_url.to_string(),
            sitemap_url: rule.sitemap_url.clone(),
        })
    }
}

/// Splits a `NAME=VALUE` cookie definition.
pub fn parse_cookie(raw: &str) -> Result<(String, String), CdlError> {
    match raw.trim().split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(CdlError::InvalidCookie(raw.to_string())),
    }
}
