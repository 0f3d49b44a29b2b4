use chrono::Utc;
use clap::error::ErrorKind;
use clap::Parser;
use libcastdl::{
    init_download, parse_cookie, CdlError, DownloadRule, Progress, Update, DEFAULT_SITEMAP_URL,
    DEFAULT_USER_AGENT,
};
use owo_colors::{OwoColorize, Stream::Stdout};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A course video downloader",
    long_about = "Downloads the videos and subtitles of every lesson of a course, \
    using the site's sitemap to find the lessons."
)]
pub struct Cli {
    #[arg(help = "Base url of the course. E.g https://symfonycasts.com/screencast/symfony")]
    course_base_url: String,
    #[arg(help = "Prepended as is to every lesson folder name. Use a trailing slash \
    to download into a directory.")]
    output_folder_prefix: Option<String>,
    #[arg(
        long = "cookie",
        value_name = "NAME=VALUE",
        help = "Authentication cookie sent with every request. Can be repeated."
    )]
    cookies: Vec<String>,
    #[arg(
        long,
        help = "File with one NAME=VALUE cookie per line. Lines starting with # are ignored."
    )]
    cookie_file: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_SITEMAP_URL)]
    sitemap_url: String,
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,
}

impl Cli {
    /// Like `Cli::parse` but usage errors exit with status 1.
    pub fn parse_args() -> Result<Self, ExitCode> {
        Self::try_parse().map_err(|e| {
            let _ = e.print();
            match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            }
        })
    }

    async fn download_rule(&self) -> Result<DownloadRule, CdlError> {
        let mut raw_cookies: Vec<String> = Vec::new();
        if let Some(cookie_file) = &self.cookie_file {
            let content = tokio::fs::read_to_string(cookie_file).await.map_err(|e| {
                CdlError::FileOperationError {
                    file_name: cookie_file.to_string_lossy().to_string(),
                    message: format!("{} | {}", e, e.kind()),
                }
            })?;
            raw_cookies.extend(cookie_lines(&content).map(String::from));
        }
        raw_cookies.extend(self.cookies.iter().cloned());

        Ok(DownloadRule {
            sitemap_url: self.sitemap_url.clone(),
            user_agent: self.user_agent.clone(),
            cookies: raw_cookies
                .iter()
                .map(|c| parse_cookie(c))
                .collect::<Result<_, _>>()?,
            ..DownloadRule::default()
        })
    }
}

fn cookie_lines(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

pub async fn download(cli: Cli) -> ExitCode {
    let rule = match cli.download_rule().await {
        Ok(rule) => rule,
        Err(e) => {
            println!("{}", e.if_supports_color(Stdout, |text| text.red()));
            return ExitCode::FAILURE;
        }
    };
    let output_prefix = cli.output_folder_prefix.clone().unwrap_or_default();
    tracing::info!(
        "Session-{} started for {}",
        Utc::now().timestamp(),
        cli.course_base_url
    );

    println!("Initializing download....");
    match init_download(&cli.course_base_url, &output_prefix, rule, print_update).await {
        Ok(summary) => {
            println!(
                "{} lesson(s) processed: {} video(s), {} subtitle file(s), {} skipped.",
                summary.lessons, summary.videos_saved, summary.subtitles_saved, summary.skipped
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("Download wasn't able to complete");
            println!("{}", e.if_supports_color(Stdout, |text| text.red()));
            ExitCode::FAILURE
        }
    }
}

fn print_update(update: Update) {
    match update {
        Update::MessageUpdate(msg) if msg.is_error => {
            println!(
                "{} | {}",
                msg.content.if_supports_color(Stdout, |text| text.red()),
                msg.resource_name
            );
        }
        Update::MessageUpdate(msg) => {
            println!("{} | {}", msg.content, msg.resource_name);
        }
        Update::ProgressUpdate(progress) => println!("{}", progress_line(&progress)),
    };
}

/// A `file_size` of 0 means the server sent no length.
fn progress_line(progress: &Progress) -> String {
    if progress.file_size > 0 && progress.bytes_written >= progress.file_size {
        format!(
            "{} {} {} bytes",
            "[Downloaded]".if_supports_color(Stdout, |text| text.green()),
            progress.resource_name,
            progress.file_size
        )
    } else if progress.file_size == 0 {
        format!("[{} bytes] {}", progress.bytes_written, progress.resource_name)
    } else {
        format!(
            "[{}/{} bytes] {}",
            progress.bytes_written, progress.file_size, progress.resource_name
        )
    }
}
