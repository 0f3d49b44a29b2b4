use libcastdl::sitemap::SITEMAP_NAMESPACE;
use libcastdl::{init_download, CdlError, DownloadRule, DownloadSummary, Update};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VIDEO: &[u8] = b"\x00\x00\x00\x18ftypmp42 fake video payload";
const SUBTITLES: &str = "WEBVTT\n\n00:00.000 --> 00:01.000\nWelcome\n";

fn sitemap(locs: &[String]) -> String {
    let urls: String = locs
        .iter()
        .map(|l| format!("<url><loc>{l}</loc></url>"))
        .collect();
    format!(r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="{SITEMAP_NAMESPACE}">{urls}</urlset>"#)
}

async fn mount(server: &MockServer, path_str: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(path_str))
        .respond_with(template)
        .mount(server)
        .await;
}

/// A course with two lessons, an activity page and a sibling course.
async fn course_server() -> MockServer {
    let server = MockServer::start().await;
    let base = format!("{}/course", server.uri());
    let locs = vec![
        base.clone(),
        format!("{base}/intro"),
        format!("{base}-10/intro"),
        format!("{base}/intro/activity/quiz"),
        format!("{base}/setup/"),
    ];
    mount(
        &server,
        "/sitemap.xml",
        ResponseTemplate::new(200).set_body_raw(sitemap(&locs), "application/xml"),
    )
    .await;
    for lesson in ["intro", "setup"] {
        mount(
            &server,
            &format!("/course/{lesson}/download/video"),
            ResponseTemplate::new(200).set_body_raw(VIDEO.to_vec(), "video/mp4"),
        )
        .await;
    }
    mount(
        &server,
        "/course/intro/download/subtitles",
        ResponseTemplate::new(200).set_body_raw(SUBTITLES, "text/vtt"),
    )
    .await;
    mount(
        &server,
        "/course/setup/download/subtitles",
        ResponseTemplate::new(404),
    )
    .await;
    server
}

fn rule_for(server: &MockServer) -> DownloadRule {
    DownloadRule {
        sitemap_url: format!("{}/sitemap.xml", server.uri()),
        ..DownloadRule::default()
    }
}

fn prefix_in(dir: &Path) -> String {
    format!("{}/", dir.display())
}

#[tokio::test]
async fn downloads_every_lesson_in_sitemap_order() {
    let server = course_server().await;
    let dir = tempfile::tempdir().unwrap();
    let mut errors = Vec::new();

    let summary = init_download(
        &format!("{}/course/", server.uri()),
        &prefix_in(dir.path()),
        rule_for(&server),
        |update| {
            if let Update::MessageUpdate(msg) = update {
                if msg.is_error {
                    errors.push(msg.resource_name);
                }
            }
        },
    )
    .await
    .unwrap();

    assert_eq!(
        summary,
        DownloadSummary {
            lessons: 2,
            videos_saved: 2,
            subtitles_saved: 1,
            skipped: 1,
        }
    );
    assert_eq!(
        errors,
        vec![format!("{}/course/setup/download/subtitles", server.uri())]
    );

    let intro = dir.path().join("1.intro");
    assert_eq!(std::fs::read(intro.join("1. intro.mp4")).unwrap(), VIDEO);
    assert_eq!(
        std::fs::read_to_string(intro.join("1. intro.vtt")).unwrap(),
        SUBTITLES
    );
    let setup = dir.path().join("2.setup");
    assert_eq!(std::fs::read(setup.join("2. setup.mp4")).unwrap(), VIDEO);
    assert!(!setup.join("2. setup.vtt").exists());
}

#[tokio::test]
async fn rerun_overwrites_without_new_folders() {
    let server = course_server().await;
    let dir = tempfile::tempdir().unwrap();
    let prefix = prefix_in(dir.path());
    let course = format!("{}/course", server.uri());

    init_download(&course, &prefix, rule_for(&server), |_| {})
        .await
        .unwrap();
    let mut first: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    init_download(&course, &prefix, rule_for(&server), |_| {})
        .await
        .unwrap();
    let mut second: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();

    first.sort();
    second.sort();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert_eq!(
        std::fs::read(dir.path().join("1.intro").join("1. intro.mp4")).unwrap(),
        VIDEO
    );
}

#[tokio::test]
async fn unreachable_sitemap_ends_the_run() {
    let server = MockServer::start().await;
    mount(&server, "/sitemap.xml", ResponseTemplate::new(500)).await;
    let dir = tempfile::tempdir().unwrap();

    let err = init_download(
        &format!("{}/course", server.uri()),
        &prefix_in(dir.path()),
        rule_for(&server),
        |_| {},
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CdlError::SitemapUnreachable { .. }));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn unparsable_sitemap_ends_the_run() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/sitemap.xml",
        ResponseTemplate::new(200).set_body_raw("<urlset><url>", "application/xml"),
    )
    .await;

    let err = init_download(
        &format!("{}/course", server.uri()),
        "",
        rule_for(&server),
        |_| {},
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CdlError::InvalidSitemap(_)));
}

#[tokio::test]
async fn invalid_course_url_is_rejected() {
    let err = init_download("course", "", DownloadRule::default(), |_| {})
        .await
        .unwrap_err();
    assert_eq!(err, CdlError::InvalidUrl("course".into()));
}

#[tokio::test]
async fn unreachable_lesson_host_does_not_end_the_run() {
    let server = MockServer::start().await;
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}/course", closed.local_addr().unwrap());
    drop(closed);
    let locs = vec![format!("{base}/intro"), format!("{base}/setup")];
    mount(
        &server,
        "/sitemap.xml",
        ResponseTemplate::new(200).set_body_raw(sitemap(&locs), "application/xml"),
    )
    .await;
    let dir = tempfile::tempdir().unwrap();
    let mut failed = Vec::new();

    let summary = init_download(&base, &prefix_in(dir.path()), rule_for(&server), |update| {
        if let Update::MessageUpdate(msg) = update {
            if msg.is_error {
                failed.push(msg.resource_name);
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(
        summary,
        DownloadSummary {
            lessons: 2,
            videos_saved: 0,
            subtitles_saved: 0,
            skipped: 4,
        }
    );
    assert_eq!(
        failed,
        vec![
            format!("{base}/intro/download/video"),
            format!("{base}/intro/download/subtitles"),
            format!("{base}/setup/download/video"),
            format!("{base}/setup/download/subtitles"),
        ]
    );
    assert!(dir.path().join("2.setup").is_dir());
}
