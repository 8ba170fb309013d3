//! End-to-end recording pipeline tests with a fake broadcast service
//!
//! Segments are served by a local mock HTTP server; the audio tool is a
//! byte-appending stand-in, so the finished file's content proves ordering.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone};
use radiocast::assembler::AudioTool;
use radiocast::broadcast::{
    BroadcastClient, BroadcastConnector, BroadcastProgram, PlaylistUri, Station,
};
use radiocast::config::{AudioFormat, BlanketConfig, Config, Program, StationConfig};
use radiocast::error::{Error, Result};
use radiocast::metadata;
use radiocast::recorder::Recorder;
use radiocast::timeutil::service_tz;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FakeClient {
    base: String,
}

#[async_trait]
impl BroadcastClient for FakeClient {
    async fn stations(&self, date: NaiveDate) -> Result<Vec<Station>> {
        let at = |hour: u32, minute: u32| {
            service_tz()
                .from_local_datetime(&date.and_hms_opt(hour, minute, 0).unwrap())
                .single()
                .unwrap()
        };
        Ok(vec![Station {
            id: "LFR".into(),
            name: "Local FM Radio".into(),
            programs: vec![
                BroadcastProgram {
                    title: "Early News".into(),
                    description: "the day's news".into(),
                    start: at(5, 0),
                    end: at(6, 0),
                },
                BroadcastProgram {
                    title: "Music Hour".into(),
                    description: "music".into(),
                    start: at(6, 0),
                    end: at(7, 0),
                },
            ],
        }])
    }

    async fn program_at(
        &self,
        _station_id: &str,
        at: DateTime<FixedOffset>,
    ) -> Result<BroadcastProgram> {
        Ok(BroadcastProgram {
            title: "Morning Show".into(),
            description: "daily talk".into(),
            start: at,
            end: at + Duration::hours(1),
        })
    }

    async fn timeshift_playlist(
        &self,
        _station_id: &str,
        _at: DateTime<FixedOffset>,
    ) -> Result<PlaylistUri> {
        Ok(PlaylistUri(format!("{}/playlist.m3u8", self.base)))
    }

    async fn segment_urls(&self, _playlist: &PlaylistUri) -> Result<Vec<String>> {
        Ok((0..3).map(|i| format!("{}/seg/{i}.aac", self.base)).collect())
    }
}

struct FakeConnector {
    base: String,
    connects: AtomicU32,
}

impl FakeConnector {
    fn new(base: String) -> Self {
        Self {
            base,
            connects: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl BroadcastConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn BroadcastClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeClient {
            base: self.base.clone(),
        }))
    }
}

/// Client whose playlist resolution always fails
struct BrokenClient;

#[async_trait]
impl BroadcastClient for BrokenClient {
    async fn stations(&self, _date: NaiveDate) -> Result<Vec<Station>> {
        Ok(vec![])
    }
    async fn program_at(
        &self,
        _station_id: &str,
        at: DateTime<FixedOffset>,
    ) -> Result<BroadcastProgram> {
        Ok(BroadcastProgram {
            title: "Morning Show".into(),
            description: String::new(),
            start: at,
            end: at + Duration::hours(1),
        })
    }
    async fn timeshift_playlist(
        &self,
        _station_id: &str,
        _at: DateTime<FixedOffset>,
    ) -> Result<PlaylistUri> {
        Err(Error::Broadcast("playlist endpoint returned 403".into()))
    }
    async fn segment_urls(&self, _playlist: &PlaylistUri) -> Result<Vec<String>> {
        Ok(vec![])
    }
}

struct BrokenConnector;

#[async_trait]
impl BroadcastConnector for BrokenConnector {
    async fn connect(&self) -> Result<Box<dyn BroadcastClient>> {
        Ok(Box::new(BrokenClient))
    }
}

/// Audio tool that concatenates by appending bytes and transcodes by copying
#[derive(Default)]
struct AppendTool {
    concats: AtomicU32,
    transcodes: AtomicU32,
}

#[async_trait]
impl AudioTool for AppendTool {
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        self.concats.fetch_add(1, Ordering::SeqCst);
        let mut combined = Vec::new();
        for input in inputs {
            combined.extend(std::fs::read(input)?);
        }
        std::fs::write(output, combined)?;
        Ok(())
    }

    async fn transcode(&self, input: &Path, output: &Path, _format: AudioFormat) -> Result<()> {
        self.transcodes.fetch_add(1, Ordering::SeqCst);
        std::fs::copy(input, output)?;
        Ok(())
    }
}

async fn mock_segments(server: &MockServer) {
    for i in 0..3 {
        Mock::given(method("GET"))
            .and(path(format!("/seg/{i}.aac")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(format!("[{i}]").into_bytes()))
            .mount(server)
            .await;
    }
}

fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == ext))
        .collect();
    files.sort();
    files
}

fn morning_program(encoding: AudioFormat) -> Program {
    Program {
        title: "Morning Show Podcast".into(),
        weekdays: vec!["monday".parse().unwrap()],
        station: "LFR".into(),
        start: "0500".into(),
        encoding,
        image_url: "http://example.com/morning.png".into(),
        path: "/morning".into(),
        ..Program::default()
    }
}

#[tokio::test]
async fn records_a_program_and_writes_the_sidecar() {
    let server = MockServer::start().await;
    mock_segments(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(AppendTool::default());

    let recorder = Recorder::new(
        Arc::new(FakeConnector::new(server.uri())),
        tool.clone(),
        dir.path().to_path_buf(),
        Config::default(),
        None,
    )
    .await
    .unwrap();

    recorder.record(&morning_program(AudioFormat::Aac)).await.unwrap();

    let audio = files_with_extension(dir.path(), "aac");
    assert_eq!(audio.len(), 1);
    let name = audio[0].file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("Morning Show_"), "got {name}");
    assert!(name.ends_with("_normal.aac"), "got {name}");

    // Segment content survives in order
    assert_eq!(std::fs::read_to_string(&audio[0]).unwrap(), "[0][1][2]");

    let sidecar = metadata::read_for_audio(&audio[0]).unwrap();
    assert_eq!(sidecar.title, "Morning Show");
    assert_eq!(sidecar.podcast_title, "Morning Show Podcast");
    assert_eq!(sidecar.path, "/morning");
    assert_eq!(sidecar.image_url, "http://example.com/morning.png");
    assert!(!sidecar.blanket_mode);
    assert_eq!(tool.concats.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rerecording_an_existing_occurrence_is_a_no_op() {
    let server = MockServer::start().await;
    mock_segments(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(AppendTool::default());

    let recorder = Recorder::new(
        Arc::new(FakeConnector::new(server.uri())),
        tool.clone(),
        dir.path().to_path_buf(),
        Config::default(),
        None,
    )
    .await
    .unwrap();

    let program = morning_program(AudioFormat::Aac);
    recorder.record(&program).await.unwrap();
    recorder.record(&program).await.unwrap();

    assert_eq!(files_with_extension(dir.path(), "aac").len(), 1);
    assert_eq!(
        tool.concats.load(Ordering::SeqCst),
        1,
        "second run should skip before any assembly"
    );
}

#[tokio::test]
async fn duplicate_weekdays_record_once() {
    let server = MockServer::start().await;
    mock_segments(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(AppendTool::default());

    let recorder = Recorder::new(
        Arc::new(FakeConnector::new(server.uri())),
        tool.clone(),
        dir.path().to_path_buf(),
        Config::default(),
        None,
    )
    .await
    .unwrap();

    let mut program = morning_program(AudioFormat::Aac);
    program.weekdays = vec!["monday".parse().unwrap(), "monday".parse().unwrap()];
    recorder.record(&program).await.unwrap();

    assert_eq!(tool.concats.load(Ordering::SeqCst), 1);
    assert_eq!(files_with_extension(dir.path(), "aac").len(), 1);
}

#[tokio::test]
async fn mp3_encoding_transcodes_the_concatenated_file() {
    let server = MockServer::start().await;
    mock_segments(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(AppendTool::default());

    let recorder = Recorder::new(
        Arc::new(FakeConnector::new(server.uri())),
        tool.clone(),
        dir.path().to_path_buf(),
        Config::default(),
        None,
    )
    .await
    .unwrap();

    recorder.record(&morning_program(AudioFormat::Mp3)).await.unwrap();

    let audio = files_with_extension(dir.path(), "mp3");
    assert_eq!(audio.len(), 1);
    let name = audio[0].file_name().unwrap().to_str().unwrap();
    assert!(name.ends_with("_normal.mp3"), "got {name}");
    assert_eq!(tool.transcodes.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_to_string(&audio[0]).unwrap(), "[0][1][2]");
}

#[tokio::test]
async fn blanket_mode_records_every_program_on_enabled_stations() {
    let server = MockServer::start().await;
    mock_segments(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(AppendTool::default());

    let config = Config {
        blanket: BlanketConfig {
            enable: true,
            enable_stations: vec!["LFR".into()],
            stations: [(
                "lfr".to_string(),
                StationConfig {
                    image_url: "http://example.com/lfr.png".into(),
                },
            )]
            .into(),
            ..BlanketConfig::default()
        },
        ..Config::default()
    };
    let recorder = Recorder::new(
        Arc::new(FakeConnector::new(server.uri())),
        tool.clone(),
        dir.path().to_path_buf(),
        config,
        None,
    )
    .await
    .unwrap();

    recorder.record_all().await.unwrap();

    let audio = files_with_extension(dir.path(), "aac");
    assert_eq!(audio.len(), 2, "both of yesterday's programs are recorded");
    for file in &audio {
        let name = file.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_blanket.aac"), "got {name}");
        let sidecar = metadata::read_for_audio(file).unwrap();
        assert!(sidecar.blanket_mode);
        assert_eq!(sidecar.path, "lfr");
        assert_eq!(sidecar.image_url, "http://example.com/lfr.png");
    }
}

#[tokio::test]
async fn blanket_mode_skips_stations_that_are_not_enabled() {
    let server = MockServer::start().await;
    mock_segments(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(AppendTool::default());

    let config = Config {
        blanket: BlanketConfig {
            enable: true,
            enable_stations: vec!["OTHER".into()],
            ..BlanketConfig::default()
        },
        ..Config::default()
    };
    let recorder = Recorder::new(
        Arc::new(FakeConnector::new(server.uri())),
        tool.clone(),
        dir.path().to_path_buf(),
        config,
        None,
    )
    .await
    .unwrap();

    recorder.record_all().await.unwrap();
    assert!(files_with_extension(dir.path(), "aac").is_empty());
    assert_eq!(tool.concats.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn playlist_failure_surfaces_with_context() {
    let dir = tempfile::tempdir().unwrap();
    let recorder = Recorder::new(
        Arc::new(BrokenConnector),
        Arc::new(AppendTool::default()),
        dir.path().to_path_buf(),
        Config::default(),
        None,
    )
    .await
    .unwrap();

    let err = recorder
        .record(&morning_program(AudioFormat::Aac))
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("failed to get playlist"), "got: {msg}");
    assert!(msg.contains("Morning Show"), "got: {msg}");
    assert!(
        files_with_extension(dir.path(), "aac").is_empty(),
        "a failed job must leave nothing at the destination"
    );
}
