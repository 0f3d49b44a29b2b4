use crate::download::{download_subtitles, download_video, Lesson, Outcome};
use crate::sitemap::{fetch_sitemap, filter_course_paths, parse_sitemap};
use crate::Update::MessageUpdate;
use tokio::fs;
use tracing::instrument;

pub mod download;
pub mod errors;
pub mod session;
pub mod sitemap;

pub use errors::CdlError;
pub use session::{parse_cookie, Session};

pub const DEFAULT_SITEMAP_URL: &str = "https://symfonycasts.com/sitemap.default.xml";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:100.0) Gecko/20100101 Firefox/100.0";
const PROGRESS_UPDATE_INTERVAL: u64 = 1000;

#[derive(Debug, Clone)]
pub struct DownloadRule {
    pub sitemap_url: String,
    pub user_agent: String,
    /// Authentication cookies as (name, value) pairs
    pub cookies: Vec<(String, String)>,
    /// Progress update interval in millisecond
    pub progress_update_interval: u64,
}

impl Default for DownloadRule {
    fn default() -> Self {
        DownloadRule {
            sitemap_url: DEFAULT_SITEMAP_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cookies: Vec::new(),
            progress_update_interval: PROGRESS_UPDATE_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub enum Update {
    MessageUpdate(Message),
    ProgressUpdate(Progress),
}

#[derive(Debug)]
pub struct Message {
    pub content: String,
    pub resource_name: String,
    pub is_error: bool,
}

#[derive(Debug)]
pub struct Progress {
    pub bytes_written: u64,
    /// 0 while the size is unknown
    pub file_size: u64,
    pub resource_name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub lessons: usize,
    pub videos_saved: usize,
    pub subtitles_saved: usize,
    pub skipped: usize,
}

/// Downloads every lesson of the course at `course_url`, one after the other
/// in sitemap order. Per-lesson problems are reported through `on_update`;
/// only a missing sitemap or a filesystem failure ends the run early.
#[instrument(skip(rule, on_update))]
pub async fn init_download<F>(
    course_url: &str,
    output_prefix: &str,
    rule: DownloadRule,
    mut on_update: F,
) -> Result<DownloadSummary, CdlError>
where
    F: FnMut(Update),
{
    let course_url = course_url.trim_end_matches('/');
    let session = Session::new(course_url, &rule)?;
    let xml = fetch_sitemap(&session).await?;
    let locations = parse_sitemap(&xml)?;
    let lessons: Vec<Lesson> = filter_course_paths(&locations, course_url)
        .into_iter()
        .enumerate()
        .map(|(position, path)| Lesson::new(position, path))
        .collect();
    tracing::info!("{} lesson(s) found for {}", lessons.len(), course_url);

    if lessons.is_empty() {
        on_update(MessageUpdate(Message {
            content: "No lessons found in the sitemap for this course".into(),
            resource_name: course_url.to_string(),
            is_error: true,
        }));
    }

    let mut summary = DownloadSummary {
        lessons: lessons.len(),
        ..DownloadSummary::default()
    };
    for lesson in lessons.iter() {
        download_lesson(&session, lesson, output_prefix, &rule, &mut summary, &mut on_update)
            .await?;
    }
    Ok(summary)
}

#[instrument(skip(session, rule, summary, on_update))]
async fn download_lesson(
    session: &Session,
    lesson: &Lesson,
    output_prefix: &str,
    rule: &DownloadRule,
    summary: &mut DownloadSummary,
    on_update: &mut dyn FnMut(Update),
) -> Result<(), CdlError> {
    let folder = lesson.folder(output_prefix);
    if let Err(e) = fs::create_dir_all(&folder).await {
        tracing::error!("Failed to create lesson directory\nError : {}", e);
        return Err(CdlError::ErrorCreatingDestinationDirectory {
            path: folder.to_string_lossy().to_string(),
            message: e.to_string(),
        });
    }

    let video_url = lesson.video_url(&session.course_url);
    notify(on_update, &video_url, "Downloading video...", false);
    let outcome = download_video(
        session,
        &video_url,
        &lesson.video_path(output_prefix),
        rule,
        on_update,
    )
    .await?;
    if report(on_update, &video_url, outcome) {
        summary.videos_saved += 1;
    } else {
        summary.skipped += 1;
    }

    let subtitles_url = lesson.subtitles_url(&session.course_url);
    notify(on_update, &subtitles_url, "Downloading subtitles...", false);
    let outcome =
        download_subtitles(session, &subtitles_url, &lesson.subtitles_path(output_prefix)).await?;
    if report(on_update, &subtitles_url, outcome) {
        summary.subtitles_saved += 1;
    } else {
        summary.skipped += 1;
    }
    Ok(())
}

fn notify(on_update: &mut dyn FnMut(Update), resource_name: &str, content: &str, is_error: bool) {
    on_update(MessageUpdate(Message {
        content: content.to_string(),
        resource_name: resource_name.to_string(),
        is_error,
    }));
}

/// Returns true when the resource was written.
fn report(on_update: &mut dyn FnMut(Update), url: &str, outcome: Outcome) -> bool {
    match outcome {
        Outcome::Saved(path) => {
            notify(on_update, &path.to_string_lossy(), "Saved", false);
            true
        }
        Outcome::Skipped(reason) => {
            tracing::warn!("Skipped {} : {}", url, reason);
            notify(on_update, url, &reason.to_string(), true);
            false
        }
    }
}
