//! Recording orchestration
//!
//! The [`Recorder`] owns the live configuration snapshot and the cron engine,
//! and runs the recording pipeline for each trigger fire: resolve the
//! broadcast occurrence, download its segments into a scratch directory,
//! concatenate, optionally transcode, move the finished file into the episode
//! directory, and write the metadata sidecar.
//!
//! Concurrency shape:
//! - a program with several weekdays records each occurrence as an
//!   independent sub-job, run one at a time so the occurrences never contend
//!   for the same streaming session
//! - blanket mode runs one task per enabled station in parallel, serializing
//!   the programs within a station
//! - the configuration is an immutable snapshot behind a read/write lock,
//!   fully replaced on refresh; jobs capture the snapshot at trigger time

use chrono::{DateTime, Datelike, Duration as ChronoDuration, FixedOffset, TimeZone, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;

use crate::assembler::{AudioAssembler, AudioTool};
use crate::broadcast::{BroadcastClient, BroadcastConnector, BroadcastProgram};
use crate::config::{AudioFormat, Config, Program};
use crate::error::{Error, RecordError, Result};
use crate::fetcher::SegmentFetcher;
use crate::metadata::{self, EpisodeMetadata};
use crate::scheduler::CronScheduler;
use crate::timeutil::{Weekday, last_weekday_on_or_before, service_tz};

/// Whether an episode came from a configured program or blanket recording
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordMode {
    Normal,
    Blanket,
}

impl RecordMode {
    fn as_str(self) -> &'static str {
        match self {
            RecordMode::Normal => "normal",
            RecordMode::Blanket => "blanket",
        }
    }
}

/// Everything needed to record one resolved broadcast occurrence
struct OccurrenceJob<'a> {
    mode: RecordMode,
    broadcast: &'a BroadcastProgram,
    podcast_title: &'a str,
    image_url: &'a str,
    station_id: &'a str,
    encoding: AudioFormat,
    path: &'a str,
    from: DateTime<FixedOffset>,
}

/// Records scheduled broadcasts and owns the cron engine
pub struct Recorder {
    connector: Arc<dyn BroadcastConnector>,
    fetcher: SegmentFetcher,
    assembler: AudioAssembler,
    target_dir: PathBuf,
    config_path: Option<PathBuf>,
    config: RwLock<Arc<Config>>,
    scheduler: Mutex<Option<CronScheduler>>,
    task_counter: AtomicU64,
}

impl Recorder {
    /// Create a recorder and install the initial configuration
    ///
    /// Validates the config, registers its cron jobs, and starts the
    /// scheduler. Fails if the config is invalid or any cron expression does
    /// not parse.
    pub async fn new(
        connector: Arc<dyn BroadcastConnector>,
        tool: Arc<dyn AudioTool>,
        target_dir: PathBuf,
        initial_config: Config,
        config_path: Option<PathBuf>,
    ) -> Result<Arc<Self>> {
        let recorder = Arc::new(Self {
            connector,
            fetcher: SegmentFetcher::new(reqwest::Client::new()),
            assembler: AudioAssembler::new(tool),
            target_dir,
            config_path,
            config: RwLock::new(Arc::new(Config::default())),
            scheduler: Mutex::new(None),
            task_counter: AtomicU64::new(0),
        });
        recorder.refresh_config(initial_config).await?;
        Ok(recorder)
    }

    /// Current configuration snapshot
    pub async fn config(&self) -> Arc<Config> {
        self.config.read().await.clone()
    }

    /// Episode output directory
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Validate a new configuration, swap it in, and rebuild the scheduler
    ///
    /// The refresh is atomic: every cron expression is registered on a fresh
    /// engine before anything is swapped, so a validation or registration
    /// failure leaves the previous config and schedule running untouched.
    /// The old engine is fully stopped before the new one starts; two engines
    /// are never firing at once.
    pub async fn refresh_config(self: &Arc<Self>, new: Config) -> Result<Arc<Config>> {
        tracing::info!("refreshing configuration");
        new.validate()?;

        let mut engine = CronScheduler::new(service_tz());
        if new.blanket.enable {
            let recorder = self.clone();
            engine.add_job(
                &new.blanket.cron,
                Arc::new(move || {
                    let recorder = recorder.clone();
                    Box::pin(async move {
                        if let Err(e) = recorder.record_all().await {
                            tracing::error!(error = %e, "blanket recording job failed");
                        }
                    })
                }),
            )?;
        }
        for program in &new.programs {
            let recorder = self.clone();
            let program = program.clone();
            let cron = program.cron.clone();
            engine.add_job(
                &cron,
                Arc::new(move || {
                    let recorder = recorder.clone();
                    let program = program.clone();
                    Box::pin(async move {
                        if let Err(e) = recorder.record(&program).await {
                            tracing::error!(
                                error = %e,
                                title = %program.title,
                                "recording job failed"
                            );
                        }
                    })
                }),
            )?;
        }

        let snapshot = Arc::new(new);
        *self.config.write().await = snapshot.clone();

        let mut guard = self.scheduler.lock().await;
        if let Some(mut old) = guard.take() {
            old.stop();
        }
        engine.start();
        *guard = Some(engine);

        tracing::info!(
            programs = snapshot.programs.len(),
            blanket = snapshot.blanket.enable,
            "configuration refreshed"
        );
        Ok(snapshot)
    }

    /// Refresh the configuration and persist it to the backing config file
    pub async fn refresh_config_persist(self: &Arc<Self>, new: Config) -> Result<Arc<Config>> {
        let snapshot = self.refresh_config(new).await?;
        match &self.config_path {
            Some(path) => {
                snapshot.save(path)?;
                tracing::debug!(path = %path.display(), "configuration persisted");
            }
            None => {
                tracing::debug!("no config file path set, skipping persistence");
            }
        }
        Ok(snapshot)
    }

    /// Fetch a YAML config from a URL and refresh with it
    pub async fn refresh_config_from_url(self: &Arc<Self>, url: &str) -> Result<Arc<Config>> {
        let config = Config::fetch(url).await?;
        self.refresh_config(config).await
    }

    /// Record the most recent occurrence of a configured program
    ///
    /// One sub-job per distinct configured weekday, run sequentially.
    /// Sub-job failures are independent: each is logged, and the joined
    /// failures are reported once every sub-job has run.
    pub async fn record(&self, program: &Program) -> Result<()> {
        let task_id = self.task_counter.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        tracing::info!(task_id, title = %program.title, "record task started");

        let result = self.record_weekdays(program).await;

        match &result {
            Ok(()) => tracing::info!(
                task_id,
                title = %program.title,
                duration_ms = started.elapsed().as_millis() as u64,
                "record task finished"
            ),
            Err(e) => tracing::error!(
                task_id,
                title = %program.title,
                duration_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "record task finished with an error"
            ),
        }
        result
    }

    async fn record_weekdays(&self, program: &Program) -> Result<()> {
        let now = Utc::now().with_timezone(&service_tz());
        let mut seen: HashSet<Weekday> = HashSet::new();
        let mut errors: Vec<String> = Vec::new();

        for weekday in &program.weekdays {
            if !seen.insert(*weekday) {
                continue;
            }
            // One occurrence at a time; parallel sub-jobs would contend for
            // the same streaming session
            if let Err(e) = self.record_weekday(now, *weekday, program).await {
                tracing::error!(
                    weekday = %weekday,
                    title = %program.title,
                    error = %e,
                    "weekday sub-job failed"
                );
                errors.push(format!("{weekday}: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RecordError::SubJobs {
                failed: errors.len(),
                detail: errors.join("; "),
            }
            .into())
        }
    }

    async fn record_weekday(
        &self,
        now: DateTime<FixedOffset>,
        weekday: Weekday,
        program: &Program,
    ) -> Result<()> {
        let target_day = last_weekday_on_or_before(weekday, now);
        let (hour, minute) = parse_start(&program.start)?;
        let from = service_tz()
            .with_ymd_and_hms(
                target_day.year(),
                target_day.month(),
                target_day.day(),
                hour,
                minute,
                0,
            )
            .single()
            .ok_or_else(|| Error::Other(format!("invalid occurrence time for {weekday}")))?;

        // Sessions are not reusable across jobs; authenticate fresh each time
        let client = self.connector.connect().await?;

        let broadcast = client
            .program_at(&program.station, from)
            .await
            .map_err(|e| RecordError::ProgramResolution {
                station_id: program.station.clone(),
                start: from.format("%Y-%m-%d %H:%M:%S").to_string(),
                reason: e.to_string(),
            })?;

        self.record_occurrence(
            client.as_ref(),
            OccurrenceJob {
                mode: RecordMode::Normal,
                broadcast: &broadcast,
                podcast_title: &program.title,
                image_url: &program.image_url,
                station_id: &program.station,
                encoding: program.encoding,
                path: &program.path,
                from,
            },
        )
        .await
    }

    /// Record every program aired yesterday on every enabled station
    ///
    /// Stations run in parallel (one task each); programs within a station
    /// run serially. Failures are aggregated across stations.
    pub async fn record_all(self: &Arc<Self>) -> Result<()> {
        let task_id = self.task_counter.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let now = Utc::now().with_timezone(&service_tz());
        // The previous day has fully aired and entered the timeshift window
        let target_date = (now - ChronoDuration::days(1)).date_naive();
        tracing::info!(task_id, %target_date, "blanket record task started");

        let result = self.record_all_inner(target_date).await;

        match &result {
            Ok(()) => tracing::info!(
                task_id,
                duration_ms = started.elapsed().as_millis() as u64,
                "blanket record task finished"
            ),
            Err(e) => tracing::error!(
                task_id,
                duration_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "blanket record task finished with an error"
            ),
        }
        result
    }

    async fn record_all_inner(self: &Arc<Self>, target_date: chrono::NaiveDate) -> Result<()> {
        let config = self.config().await;
        let blanket = config.blanket.clone();
        let enabled: HashSet<String> = config.enabled_station_ids().into_iter().collect();

        let client: Arc<dyn BroadcastClient> = Arc::from(self.connector.connect().await?);
        let stations = client
            .stations(target_date)
            .await
            .map_err(|e| Error::Broadcast(format!("failed to get stations: {e}")))?;

        let mut tasks: JoinSet<(String, Vec<String>)> = JoinSet::new();
        for station in stations {
            let station_key = station.id.to_lowercase();
            if !enabled.contains(&station_key) {
                tracing::debug!(
                    station_id = %station.id,
                    station_name = %station.name,
                    "skipping station, not enabled for blanket recording"
                );
                continue;
            }

            let recorder = self.clone();
            let client = client.clone();
            let blanket = blanket.clone();
            tasks.spawn(async move {
                tracing::info!(station_id = %station.id, "blanket station started");
                let image_url = blanket
                    .stations
                    .get(&station_key)
                    .map(|s| s.image_url.clone())
                    .unwrap_or_default();

                let mut errors = Vec::new();
                for program in &station.programs {
                    let job = OccurrenceJob {
                        mode: RecordMode::Blanket,
                        broadcast: program,
                        podcast_title: &program.title,
                        image_url: &image_url,
                        station_id: &station.id,
                        encoding: blanket.encoding,
                        path: &station_key,
                        from: program.start,
                    };
                    if let Err(e) = recorder.record_occurrence(client.as_ref(), job).await {
                        tracing::error!(
                            station_id = %station.id,
                            title = %program.title,
                            error = %e,
                            "blanket program failed"
                        );
                        errors.push(format!("{}/{}: {e}", station.id, program.title));
                    }
                }
                (station.id, errors)
            });
        }

        let mut all_errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_station, errors)) => all_errors.extend(errors),
                Err(e) => all_errors.push(format!("station task panicked: {e}")),
            }
        }

        if all_errors.is_empty() {
            Ok(())
        } else {
            Err(RecordError::SubJobs {
                failed: all_errors.len(),
                detail: all_errors.join("; "),
            }
            .into())
        }
    }

    /// Run the fetch/assemble/finalize pipeline for one resolved occurrence
    async fn record_occurrence(
        &self,
        client: &dyn BroadcastClient,
        job: OccurrenceJob<'_>,
    ) -> Result<()> {
        let file_name = episode_file_name(&job.broadcast.title, job.from, job.mode, job.encoding);
        let output = self.target_dir.join(&file_name);

        // Idempotency: the file name is the key. Re-triggering an
        // already-recorded occurrence is a no-op success, checked before any
        // I/O-heavy step.
        if output.exists() {
            tracing::info!(output = %output.display(), "episode already exists, skipping");
            return Ok(());
        }

        tracing::info!(
            station_id = %job.station_id,
            title = %job.broadcast.title,
            from = %job.from,
            "recording occurrence"
        );

        let date = job.from.format("%Y-%m-%d").to_string();
        let playlist = client
            .timeshift_playlist(job.station_id, job.from)
            .await
            .map_err(|e| RecordError::Playlist {
                station_id: job.station_id.to_string(),
                title: job.broadcast.title.clone(),
                date: date.clone(),
                reason: e.to_string(),
            })?;
        let segment_urls =
            client
                .segment_urls(&playlist)
                .await
                .map_err(|e| RecordError::Playlist {
                    station_id: job.station_id.to_string(),
                    title: job.broadcast.title.clone(),
                    date: date.clone(),
                    reason: format!("failed to get segment list: {e}"),
                })?;

        // Scratch dir is removed on drop, success or failure
        let scratch = tempfile::Builder::new().prefix("radiocast-").tempdir()?;
        self.fetcher.fetch_all(&segment_urls, scratch.path()).await?;

        tracing::info!(segments = segment_urls.len(), "concatenating segments");
        let concatenated = self.assembler.concat_segments(scratch.path()).await?;

        match job.encoding {
            AudioFormat::Aac => {
                move_into_place(&concatenated, &output).await?;
            }
            AudioFormat::Mp3 => {
                tracing::info!(output = %output.display(), "transcoding to mp3");
                let transcoded = scratch.path().join("final.mp3");
                self.assembler
                    .transcode(&concatenated, &transcoded, AudioFormat::Mp3)
                    .await?;
                move_into_place(&transcoded, &output).await?;
            }
        }

        metadata::write_for_audio(
            &output,
            &EpisodeMetadata {
                title: job.broadcast.title.clone(),
                description: job.broadcast.description.clone(),
                published_at: job.from,
                image_url: job.image_url.to_string(),
                path: job.path.to_string(),
                podcast_title: job.podcast_title.to_string(),
                blanket_mode: job.mode == RecordMode::Blanket,
            },
        )
        .map_err(|e| RecordError::MetadataWrite {
            path: output.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!(output = %output.display(), "episode recorded");
        Ok(())
    }
}

/// Output file name for one occurrence: `<title>_<YYYYMMDDHHMM>_<mode>.<ext>`
///
/// This name is the job's idempotency key and the feed builder's fallback
/// source for title and publish time.
fn episode_file_name(
    title: &str,
    from: DateTime<FixedOffset>,
    mode: RecordMode,
    encoding: AudioFormat,
) -> String {
    format!(
        "{}_{}_{}.{}",
        sanitize_title(title),
        from.format("%Y%m%d%H%M"),
        mode.as_str(),
        encoding.extension()
    )
}

/// Make a broadcast title safe for use in a file name
///
/// Path separators must go; underscores are the file-name field separator,
/// so they become hyphens to keep the name parseable.
fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' | '\\' | '_' | '\0' => '-',
            other => other,
        })
        .collect()
}

/// Parse a program's "HHMM" start-of-day
fn parse_start(start: &str) -> Result<(u32, u32)> {
    let invalid = || Error::Config {
        message: format!("invalid start time \"{start}\", expected HHMM"),
        key: Some("start".to_string()),
    };
    if start.len() != 4 || !start.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hour: u32 = start[..2].parse().map_err(|_| invalid())?;
    let minute: u32 = start[2..].parse().map_err(|_| invalid())?;
    if hour > 23 || minute > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// Move a finished file to its final destination
///
/// Rename when possible; scratch dirs often live on another filesystem, so
/// fall back to staging a copy next to the destination and renaming that, so
/// no partial file ever sits at the final path.
async fn move_into_place(src: &Path, dest: &Path) -> Result<()> {
    if tokio::fs::rename(src, dest).await.is_ok() {
        return Ok(());
    }
    let staging = dest.with_extension("part");
    tokio::fs::copy(src, &staging).await?;
    tokio::fs::rename(&staging, dest).await?;
    let _ = tokio::fs::remove_file(src).await;
    Ok(())
}
