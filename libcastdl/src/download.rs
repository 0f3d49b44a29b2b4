use crate::errors::CdlError;
use crate::session::Session;
use crate::Update::ProgressUpdate;
use crate::{DownloadRule, Progress, Update};
use futures::TryStreamExt;
use reqwest::{header, Response};
use std::fmt::Formatter;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use tokio_util::io::StreamReader;

const WEBVTT_SIGNATURE: &str = "WEBVTT";
const BYTE_ORDER_MARK: char = '\u{feff}';

/// One lesson of the course, numbered by its position in the filtered sitemap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lesson {
    /// 1-based
    pub index: usize,
    /// Course relative path, as found in the sitemap
    pub course_path: String,
}

impl Lesson {
    /// `position` is the 0-based position in the filtered list.
    pub fn new(position: usize, course_path: impl Into<String>) -> Self {
        Lesson {
            index: position + 1,
            course_path: course_path.into(),
        }
    }

    pub fn video_url(&self, course_url: &str) -> String {
        format!("{}/{}/download/video", course_url, self.course_path)
    }

    pub fn subtitles_url(&self, course_url: &str) -> String {
        format!("{}/{}/download/subtitles", course_url, self.course_path)
    }

    /// The prefix is prepended as is, so `out/` lands inside `out` while
    /// `out-` only prefixes the folder name.
    pub fn folder(&self, output_prefix: &str) -> PathBuf {
        PathBuf::from(format!(
            "{}{}.{}",
            output_prefix,
            self.index,
            sanitize_file_name(&self.course_path)
        ))
    }

    pub fn video_path(&self, output_prefix: &str) -> PathBuf {
        self.folder(output_prefix).join(self.file_name("mp4"))
    }

    pub fn subtitles_path(&self, output_prefix: &str) -> PathBuf {
        self.folder(output_prefix).join(self.file_name("vtt"))
    }

    fn file_name(&self, ext: &str) -> String {
        format!(
            "{}. {}.{}",
            self.index,
            sanitize_file_name(&self.course_path),
            ext
        )
    }
}

/// Replaces path separators and characters most filesystems reject, so a
/// nested course path still maps to a single folder.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[derive(Debug, PartialEq)]
pub enum Outcome {
    Saved(PathBuf),
    Skipped(SkipReason),
}

/// Why a lesson resource was not written. None of these stop the run.
#[derive(Debug, PartialEq)]
pub enum SkipReason {
    ErrorStatus { status_code: String, url: String },
    ContentTypeMismatch { url: String, content_type: String },
    EmptySubtitles { url: String },
    MissingWebvttHeader { url: String },
    Network { url: String, message: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            SkipReason::ErrorStatus { status_code, url } => {
                format!("Error downloading {url} (HTTP {status_code})")
            }
            SkipReason::ContentTypeMismatch { url, content_type } => {
                format!("{url} didn't return the expected file (Content-Type: {content_type})")
            }
            SkipReason::EmptySubtitles { url } => format!("Empty subtitles. {url}"),
            SkipReason::MissingWebvttHeader { url } => format!(
                "Subtitles in {url} do not start with '{WEBVTT_SIGNATURE}'. The download has been cancelled."
            ),
            SkipReason::Network { url, message } => {
                format!("error connecting to internet. {url} => {message}")
            }
        };
        write!(f, "{str}")
    }
}

async fn request(session: &Session, url: &str) -> Result<Response, SkipReason> {
    match session.client.get(url).send().await {
        Err(e) => {
            tracing::error!("Error downloading file from {}", url);
            tracing::error!("{}", e);
            Err(SkipReason::Network {
                url: url.to_string(),
                message: e.to_string(),
            })
        }
        Ok(r) if !r.status().is_success() => {
            tracing::error!("Error status code received : {} |{}|", r.status(), url);
            Err(SkipReason::ErrorStatus {
                status_code: r.status().as_u16().to_string(),
                url: url.to_string(),
            })
        }
        Ok(r) => Ok(r),
    }
}

fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|ct| ct.to_str().ok())
        .unwrap_or("")
        .to_string()
}

async fn create_file(dest: &Path) -> Result<File, CdlError> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dest)
        .await
        .map_err(|e| {
            tracing::error!("Error opening/creating file {}", dest.display());
            tracing::error!("{} | {}", e, e.kind());
            CdlError::file_operation(dest, e)
        })
}

async fn discard_partial_file(dest: &Path) {
    if let Err(e) = fs::remove_file(dest).await {
        tracing::warn!("Could not remove partial file {} : {}", dest.display(), e);
    }
}

/// Streams a lesson video to `dest`, overwriting any previous file.
#[tracing::instrument(skip(session, rule, on_update))]
pub async fn download_video(
    session: &Session,
    url: &str,
    dest: &Path,
    rule: &DownloadRule,
    on_update: &mut dyn FnMut(Update),
) -> Result<Outcome, CdlError> {
    let mut response = match request(session, url).await {
        Ok(r) => r,
        Err(reason) => return Ok(Outcome::Skipped(reason)),
    };

    let content_type = content_type(&response);
    if !content_type.contains("video") {
        tracing::warn!("{} returned {} instead of a video", url, content_type);
        return Ok(Outcome::Skipped(SkipReason::ContentTypeMismatch {
            url: url.to_string(),
            content_type,
        }));
    }

    let mut dest_file = create_file(dest).await?;
    let file_size = response.content_length().unwrap_or(0);
    let resource_name = dest.to_string_lossy().to_string();
    let progress_update_interval = Duration::from_millis(rule.progress_update_interval);
    let mut last_update_time = Instant::now();
    let mut bytes_written = 0u64;

    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Error downloading resource from {}", url);
                tracing::error!("{}", e);
                drop(dest_file);
                discard_partial_file(dest).await;
                return Ok(Outcome::Skipped(SkipReason::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                }));
            }
        };
        if chunk.is_empty() {
            continue;
        }
        dest_file
            .write_all(&chunk)
            .await
            .map_err(|e| CdlError::file_operation(dest, e))?;
        bytes_written += chunk.len() as u64;

        if last_update_time.elapsed() > progress_update_interval {
            on_update(ProgressUpdate(Progress {
                bytes_written,
                file_size,
                resource_name: resource_name.clone(),
            }));
            last_update_time = Instant::now();
        }
    }
    dest_file
        .flush()
        .await
        .map_err(|e| CdlError::file_operation(dest, e))?;

    tracing::debug!("Download completed for {}, file @ {}", url, dest.display());
    on_update(ProgressUpdate(Progress {
        bytes_written,
        file_size: if file_size == 0 { bytes_written } else { file_size },
        resource_name,
    }));
    Ok(Outcome::Saved(dest.to_path_buf()))
}

/// Lazy line reader over a subtitle body. Lines are raw bytes, so a track
/// in a legacy encoding is copied as is. `\n`, `\r\n` and a lone `\r` all
/// end a line.
struct TrackLines<R> {
    reader: R,
    /// Previous line ended with `\r`, a leading `\n` belongs to it
    skip_lf: bool,
}

impl<R: AsyncBufRead + Unpin> TrackLines<R> {
    fn new(reader: R) -> Self {
        TrackLines {
            reader,
            skip_lf: false,
        }
    }

    async fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let mut started = false;
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Ok(started.then_some(line));
            }
            if self.skip_lf {
                self.skip_lf = false;
                if buf[0] == b'\n' {
                    self.reader.consume(1);
                    continue;
                }
            }
            started = true;
            match buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(end) => {
                    line.extend_from_slice(&buf[..end]);
                    self.skip_lf = buf[end] == b'\r';
                    self.reader.consume(end + 1);
                    return Ok(Some(line));
                }
                None => {
                    let len = buf.len();
                    line.extend_from_slice(buf);
                    self.reader.consume(len);
                }
            }
        }
    }
}

/// Streams a WebVTT track to `dest`. The body is read line by line and the
/// file is only created once the `WEBVTT` signature has been seen.
#[tracing::instrument(skip(session))]
pub async fn download_subtitles(
    session: &Session,
    url: &str,
    dest: &Path,
) -> Result<Outcome, CdlError> {
    let response = match request(session, url).await {
        Ok(r) => r,
        Err(reason) => return Ok(Outcome::Skipped(reason)),
    };

    let content_type = content_type(&response);
    if !content_type.contains("text") && !content_type.contains("application") {
        tracing::warn!("{} returned {} instead of subtitles", url, content_type);
        return Ok(Outcome::Skipped(SkipReason::ContentTypeMismatch {
            url: url.to_string(),
            content_type,
        }));
    }

    let body = Box::pin(
        response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
    );
    let mut lines = TrackLines::new(StreamReader::new(body));
    let network_error = |e: io::Error| {
        tracing::error!("Error reading subtitles from {}", url);
        tracing::error!("{}", e);
        Outcome::Skipped(SkipReason::Network {
            url: url.to_string(),
            message: e.to_string(),
        })
    };

    let first_line = match lines.next_line().await {
        Ok(Some(line)) => line,
        Ok(None) => {
            return Ok(Outcome::Skipped(SkipReason::EmptySubtitles {
                url: url.to_string(),
            }))
        }
        Err(e) => return Ok(network_error(e)),
    };
    let first_line = String::from_utf8_lossy(&first_line);
    let signature = first_line.trim_start_matches(BYTE_ORDER_MARK).trim();
    if signature != WEBVTT_SIGNATURE {
        tracing::warn!("Subtitles from {} start with {:?}", url, first_line);
        return Ok(Outcome::Skipped(SkipReason::MissingWebvttHeader {
            url: url.to_string(),
        }));
    }

    let mut writer = BufWriter::new(create_file(dest).await?);
    let write_err = |e: io::Error| CdlError::file_operation(dest, e);
    writer.write_all(signature.as_bytes()).await.map_err(write_err)?;
    writer.write_all(b"\n").await.map_err(write_err)?;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                writer.write_all(&line).await.map_err(write_err)?;
                writer.write_all(b"\n").await.map_err(write_err)?;
            }
            Ok(None) => break,
            Err(e) => {
                drop(writer);
                discard_partial_file(dest).await;
                return Ok(network_error(e));
            }
        }
    }
    writer.flush().await.map_err(write_err)?;

    tracing::debug!("Subtitles saved for {}, file @ {}", url, dest.display());
    Ok(Outcome::Saved(dest.to_path_buf()))
}
