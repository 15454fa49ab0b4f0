use std::collections::HashMap;
use std::io::Cursor;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::{DateTime, TimeZone, Utc};

use icon_mirror::app::{App, DatasetStatus, RunOptions};
use icon_mirror::client::{ArchiveClient, RemoteResponse, ResponseHeaders};
use icon_mirror::domain::{Dataset, ReferenceDate};
use icon_mirror::error::MirrorError;
use icon_mirror::output::TextOutput;
use icon_mirror::store::{LocalStore, read_bytes, write_bytes};

#[derive(Default)]
struct MockArchive {
    bodies: HashMap<String, Vec<u8>>,
}

impl MockArchive {
    fn with_partition(mut self, base: &str, files: &[&str]) -> Self {
        let mut html = String::from("<html><body><pre>\n");
        for file in files {
            html.push_str(&format!("<a href=\"{file}\">{file}</a>\n"));
            self.bodies
                .insert(format!("{base}/00/t_2m/{file}"), format!("data:{file}").into_bytes());
        }
        html.push_str("</pre></body></html>");
        self.bodies.insert(format!("{base}/00/t_2m/"), html.into_bytes());
        self
    }
}

impl ArchiveClient for MockArchive {
    fn get(&self, url: &str) -> Result<RemoteResponse, MirrorError> {
        let (status, body) = match self.bodies.get(url) {
            Some(body) => (200, body.clone()),
            None => (404, Vec::new()),
        };
        Ok(RemoteResponse {
            status,
            headers: ResponseHeaders::default(),
            body: Box::new(Cursor::new(body)),
        })
    }
}

fn dataset(name: &str, base: &str) -> Dataset {
    Dataset {
        name: name.to_string(),
        base_url: base.to_string(),
        template: format!("{name}_{{date}}{{run}}_{{step:03d}}_{{var}}.grib2")
            .parse()
            .unwrap(),
        grid: "regular-lat-lon".to_string(),
        subgrid: String::new(),
        level: "single-level".to_string(),
        runs: vec!["00".parse().unwrap()],
        variables: vec!["t_2m".to_string()],
        forecast_steps: vec![0, 1],
        listing_suffix: ".grib2".to_string(),
        decompress: false,
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn setup() -> (tempfile::TempDir, App<MockArchive>, Vec<Dataset>) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = LocalStore::new(root).unwrap();

    let client = MockArchive::default()
        .with_partition(
            "https://example.org/broken",
            &["broken_2024010100_000_t_2m.grib2"],
        )
        .with_partition(
            "https://example.org/healthy",
            &[
                "healthy_2024010100_000_t_2m.grib2",
                "healthy_2024010100_001_t_2m.grib2",
            ],
        );
    let datasets = vec![
        dataset("broken", "https://example.org/broken"),
        dataset("healthy", "https://example.org/healthy"),
    ];
    (temp, App::new(Box::new(store), client), datasets)
}

#[test]
fn failed_dataset_does_not_stop_the_others() {
    let (_temp, app, datasets) = setup();
    write_bytes(app.storage(), "broken/metadata.json", b"{not json").unwrap();
    let date: ReferenceDate = "20240101".parse().unwrap();

    let summary = app
        .run_at(&datasets, date, RunOptions::default(), now())
        .unwrap();

    assert!(summary.has_errors);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.date, "20240101");

    let broken = &summary.datasets[0];
    assert_eq!(broken.status, DatasetStatus::Aborted);
    assert!(broken.report.is_none());
    assert!(broken.error.as_deref().unwrap().contains("broken/metadata.json"));
    assert_eq!(
        read_bytes(app.storage(), "broken/metadata.json").unwrap(),
        b"{not json".to_vec()
    );

    let healthy = &summary.datasets[1];
    assert_eq!(healthy.status, DatasetStatus::Completed);
    let report = healthy.report.as_ref().unwrap();
    assert_eq!(report.downloaded.len(), 2);
    assert!(report.state_saved);
    assert!(
        app.storage()
            .exists("healthy/20240101/00/t_2m/healthy_2024010100_001_t_2m.grib2")
            .unwrap()
    );
}

#[test]
fn strict_mode_returns_first_error() {
    let (_temp, app, datasets) = setup();
    write_bytes(app.storage(), "broken/metadata.json", b"[]").unwrap();
    let date: ReferenceDate = "20240101".parse().unwrap();

    let result = app.run_at(
        &datasets,
        date,
        RunOptions {
            strict: true,
            checkpoint: false,
        },
        now(),
    );
    assert_matches!(result, Err(MirrorError::StateParse { .. }));
    assert!(!app.storage().exists("healthy/metadata.json").unwrap());
}

#[test]
fn summary_renders_as_text_and_json() {
    let (_temp, app, datasets) = setup();
    write_bytes(app.storage(), "broken/metadata.json", b"{not json").unwrap();
    let date: ReferenceDate = "20240101".parse().unwrap();
    let summary = app
        .run_at(&datasets, date, RunOptions::default(), now())
        .unwrap();

    let mut out = Vec::new();
    TextOutput::write_summary(&mut out, &summary).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("icon-mirror summary for 20240101"));
    assert!(text.contains("broken: aborted"));
    assert!(text.contains("healthy: downloaded 2, already done 0"));

    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["has_errors"], true);
    assert_eq!(json["datasets"][0]["status"], "aborted");
    assert_eq!(json["datasets"][1]["status"], "completed");
    assert_eq!(json["datasets"][1]["report"]["downloaded"].as_array().unwrap().len(), 2);
}
