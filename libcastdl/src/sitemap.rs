use crate::errors::CdlError;
use crate::session::Session;
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use serde::Deserialize;

pub const SITEMAP_NAMESPACE: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// Pages under this segment are quizzes/exercises, not lessons.
const ACTIVITY_SEGMENT: &str = "/activity/";

#[derive(Debug, Deserialize)]
struct UrlSet {
    #[serde(rename = "url", default)]
    urls: Vec<UrlEntry>,
}

#[derive(Debug, Deserialize)]
struct UrlEntry {
    loc: String,
}

/// Downloads the raw sitemap document. Any failure here is fatal.
#[tracing::instrument(skip(session), fields(url = %session.sitemap_url))]
pub async fn fetch_sitemap(session: &Session) -> Result<String, CdlError> {
    let url = session.sitemap_url.as_str();
    let response = match session.client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Error downloading sitemap from {}", url);
            tracing::error!("{}", e);
            return Err(CdlError::NetworkError {
                url: url.to_string(),
                message: e.to_string(),
            });
        }
    };

    if !response.status().is_success() {
        tracing::error!("Error status code received : {} |{}|", response.status(), url);
        return Err(CdlError::SitemapUnreachable {
            status_code: response.status().to_string(),
            url: url.to_string(),
        });
    }

    response.text().await.map_err(|e| CdlError::NetworkError {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Extracts every `<url><loc>` of a sitemaps.org document, in document order.
pub fn parse_sitemap(xml: &str) -> Result<Vec<String>, CdlError> {
    let url_set: UrlSet =
        quick_xml::de::from_str(xml).map_err(|e| CdlError::InvalidSitemap(e.to_string()))?;

    let namespace = root_namespace(xml)?;
    if namespace.as_deref() != Some(SITEMAP_NAMESPACE) {
        tracing::warn!(
            "Sitemap root is not in the {} namespace ({:?}), no urls taken",
            SITEMAP_NAMESPACE,
            namespace
        );
        return Ok(Vec::new());
    }

    let locations: Vec<String> = url_set.urls.into_iter().map(|u| u.loc).collect();
    tracing::debug!("Sitemap holds {} url(s)", locations.len());
    Ok(locations)
}

/// Resolved namespace of the document's root element.
fn root_namespace(xml: &str) -> Result<Option<String>, CdlError> {
    let mut reader = NsReader::from_str(xml);
    loop {
        match reader.read_resolved_event() {
            Ok((ns, Event::Start(_) | Event::Empty(_))) => {
                return Ok(match ns {
                    ResolveResult::Bound(Namespace(ns)) => {
                        Some(String::from_utf8_lossy(ns).to_string())
                    }
                    _ => None,
                });
            }
            Ok((_, Event::Eof)) => return Ok(None),
            Ok(_) => continue,
            Err(e) => return Err(CdlError::InvalidSitemap(e.to_string())),
        }
    }
}

/// Keeps the lesson paths belonging to `course_url` (given without its
/// trailing slash). Order and duplicates are preserved.
pub fn filter_course_paths<S: AsRef<str>>(locations: &[S], course_url: &str) -> Vec<String> {
    locations
        .iter()
        .filter_map(|loc| loc.as_ref().strip_prefix(course_url))
        // A sibling course such as course-10 also starts with course-1
        .filter(|remainder| remainder.is_empty() || remainder.starts_with('/'))
        .filter(|remainder| !remainder.contains(ACTIVITY_SEGMENT))
        .map(|remainder| remainder.trim_matches('/'))
        .filter(|path| !path.is_empty())
        .map(|path| {
            tracing::debug!("Lesson path found : {}", path);
            path.to_string()
        })
        .collect()
}
