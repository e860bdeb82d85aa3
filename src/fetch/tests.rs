use super::*;
use crate::config::Config;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

fn fast_fetcher() -> PageFetcher {
    PageFetcher::new(&FetchConfig {
        timeout_seconds: 5,
        ..FetchConfig::default()
    })
    .with_retry_policy(RetryPolicy {
        attempts: 3,
        initial_delay: Duration::from_millis(5),
    })
}

#[test]
fn url_validation() {
    assert!(validate_url("https://example.com/docs").is_ok());
    assert!(validate_url("http://localhost:8080/").is_ok());
    assert!(validate_url("ftp://example.com/file").is_err());
    assert!(validate_url("not a url").is_err());
    assert!(validate_url("file:///etc/passwd").is_err());
}

#[test]
fn file_names_follow_the_url_path() {
    let name = |url: &str| file_name_for_url(&Url::parse(url).expect("url should parse"));

    assert_eq!(name("https://example.com/docs/intro.html"), "intro.html");
    assert_eq!(name("https://example.com/docs/getting-started/"), "getting-started.html");
    assert_eq!(name("https://example.com/"), "example.com.html");
    assert_eq!(name("https://example.com"), "example.com.html");
    assert_eq!(name("https://example.com/guide.php?id=3"), "guide.html");
    assert_eq!(name("https://example.com/release/v1.2"), "v1.2.html");
    assert_eq!(name("https://example.com/a%20b"), "a_20b.html");
}

#[tokio::test]
async fn fetch_returns_page_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/docs/intro.html"))
        .and(header("user-agent", "docvault/0.1.0 (Document Indexer)"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    "<html><title>Intro</title><body>Hello</body></html>",
                    "text/html; charset=utf-8",
                ),
        )
        .expect(1)
        .mount(&server)
        .await;

    let page = fast_fetcher()
        .fetch(&format!("{}/docs/intro.html", server.uri()))
        .expect("fetch should succeed");

    assert_eq!(page.file_name, "intro.html");
    assert!(page.body.contains("Hello"));
    assert_eq!(page.url.path(), "/docs/intro.html");
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<p>finally</p>", "text/html"),
        )
        .mount(&server)
        .await;

    let page = fast_fetcher()
        .fetch(&format!("{}/flaky", server.uri()))
        .expect("fetch should succeed after retries");

    assert_eq!(page.body, "<p>finally</p>");
}

#[tokio::test]
async fn not_found_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let result = fast_fetcher().fetch(&format!("{}/missing", server.uri()));

    assert!(result.is_err());
}

#[tokio::test]
async fn binary_content_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/image.png"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("png", "image/png"),
        )
        .mount(&server)
        .await;

    let error = fast_fetcher()
        .fetch(&format!("{}/image.png", server.uri()))
        .expect_err("fetch should fail");

    assert!(error.to_string().contains("Unsupported content type"));
}

#[tokio::test]
async fn fetched_page_becomes_project_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/guide"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body><p>Guide text</p></body></html>", "text/html"),
        )
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load config");
    let database = Database::initialize_from_config(&config)
        .await
        .expect("should open database");
    let project = database
        .create_project(1, "web")
        .await
        .expect("should create project");

    let document = fetch_with(
        &database,
        &project,
        &format!("{}/guide", server.uri()),
        fast_fetcher(),
    )
    .await
    .expect("fetch should succeed");

    assert_eq!(document.file_name, "guide.html");
    assert_eq!(document.kind, "html");
    assert!(!document.processed);
    let bytes = database
        .read_document_bytes(&document)
        .expect("should read stored page");
    assert_eq!(bytes, b"<html><body><p>Guide text</p></body></html>");
}

#[tokio::test]
async fn binary_body_is_rejected_before_decoding() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/report.pdf"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(vec![0x25, 0x50, 0xff, 0xfe], "application/pdf"),
        )
        .mount(&server)
        .await;

    let error = fast_fetcher()
        .fetch(&format!("{}/report.pdf", server.uri()))
        .expect_err("fetch should fail");

    assert!(error.to_string().contains("application/pdf"));
}
