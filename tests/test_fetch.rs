use citecheck::latex::Bibliography;
use citecheck::sources::fetch::{format_source_file, misc_url_sources, UrlFetcher, UrlSource};
use citecheck::{fetch_url_sources, Config};
use mockito::Server;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;
use tokio::runtime::Runtime;

const PAGE: &str = "<html><head><style>body { color: red; }</style></head>\
<body><h1>Report</h1><p>Findings are <em>clear</em>.</p><script>track()</script></body></html>";

fn fast_config(root: &std::path::Path) -> Config {
    Config {
        bib_path: root.join("references.bib"),
        papers_dir: root.join("papers"),
        fetch_timeout: Duration::from_secs(1),
        fetch_delay: Duration::ZERO,
        ..Config::default()
    }
}

#[test]
fn test_misc_url_sources_selection() {
    let bib = Bibliography::parse(
        r#"@misc{zeta, title = {Zeta Page}, url = {https://z.example/}}
@misc{alpha, url = {https://a.example/}}
@misc{withdoi, url = {https://d.example/}, doi = {10.1/d}}
@misc{nourl, title = {Nothing}}
@article{paper, url = {https://p.example/}}
"#,
    );
    let sources = misc_url_sources(&bib);
    assert_eq!(
        sources,
        vec![
            UrlSource {
                key: "alpha".to_string(),
                url: "https://a.example/".to_string(),
                title: None,
            },
            UrlSource {
                key: "zeta".to_string(),
                url: "https://z.example/".to_string(),
                title: Some("Zeta Page".to_string()),
            },
        ]
    );
}

#[test]
fn test_source_file_header() {
    let source = UrlSource {
        key: "who2019".to_string(),
        url: "https://who.int".to_string(),
        title: None,
    };
    assert_eq!(
        format_source_file(&source, "2024-01-02 03:04:05", "Body"),
        format!(
            "Citation Key: who2019\nURL: https://who.int\nFetched: 2024-01-02 03:04:05\n{}\n\nBody",
            "-".repeat(80)
        )
    );
}

#[test]
fn test_fetch_writes_skips_and_fails() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut server = Server::new_async().await;
        let page_mock = server
            .mock("GET", "/report")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(PAGE)
            .expect(1)
            .create_async()
            .await;
        // Client errors are not retried
        let missing_mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let existing_mock = server.mock("GET", "/existing").expect(0).create_async().await;

        let dir = tempdir().unwrap();
        let config = fast_config(dir.path());
        fs::write(
            &config.bib_path,
            format!(
                "@misc{{report, title = {{Annual Report}}, url = {{{url}/report}}}}\n\
@misc{{gone, url = {{{url}/missing}}}}\n\
@misc{{existing, url = {{{url}/existing}}}}\n",
                url = server.url()
            ),
        )
        .unwrap();
        fs::create_dir(&config.papers_dir).unwrap();
        fs::write(config.papers_dir.join("existing.txt"), "kept").unwrap();

        let summary = fetch_url_sources(&config).await.unwrap();
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);

        let saved = fs::read_to_string(config.papers_dir.join("report.txt")).unwrap();
        assert!(saved.starts_with(&format!("Citation Key: report\nURL: {}/report\nFetched: ", server.url())));
        assert!(saved.ends_with(&format!("{}\n\nReport\n\nFindings are clear.", "-".repeat(80))));
        assert!(!saved.contains("track()"));
        assert!(!config.papers_dir.join("gone.txt").exists());
        assert_eq!(fs::read_to_string(config.papers_dir.join("existing.txt")).unwrap(), "kept");

        page_mock.assert_async().await;
        missing_mock.assert_async().await;
        existing_mock.assert_async().await;
    });
}

#[test]
fn test_server_errors_are_retried() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut server = Server::new_async().await;
        let flaky = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect_at_least(2)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let fetcher = UrlFetcher::new(&fast_config(dir.path()));
        let result = fetcher.fetch_text(&format!("{}/flaky", server.url())).await;

        assert!(result.unwrap_err().to_string().contains("503"));
        flaky.assert_async().await;
    });
}

#[test]
fn test_missing_bibliography_is_an_error() {
    let dir = tempdir().unwrap();
    let config = fast_config(dir.path());
    let result = Runtime::new().unwrap().block_on(fetch_url_sources(&config));
    assert!(result.unwrap_err().to_string().contains("BibTeX file not found"));
}
