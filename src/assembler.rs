//! Audio segment assembly and transcoding
//!
//! Concatenates the many small segments of a time-shifted broadcast into one
//! file. Concatenation tools take their inputs via a list file referencing
//! every path, which risks blowing OS file-descriptor and argument limits for
//! multi-hour broadcasts with hundreds of segments. Inputs are therefore
//! merged in batches of at most [`CONCAT_BATCH_SIZE`]: the first batch is
//! concatenated into an intermediate file, which is then prepended to the
//! remaining inputs, until one final file remains. Each successful step
//! deletes the inputs it consumed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::config::AudioFormat;
use crate::error::{Error, RecordError, Result};
use crate::retry::{RetryPolicy, retry_with_policy};

/// Maximum number of inputs handed to a single concatenation invocation
pub const CONCAT_BATCH_SIZE: usize = 100;

/// Concat failures are retried with fixed delay before surfacing as fatal
///
/// The retry sits on the individual tool invocation, not the whole directory
/// pass: once a batch has been merged its inputs are gone and only the
/// in-memory file list still knows the correct order, so the operation must
/// never be restarted by re-listing the directory.
const CONCAT_RETRY: RetryPolicy = RetryPolicy::fixed(10, Duration::from_secs(10));

/// Transcode failures are retried with fixed delay before surfacing as fatal
const TRANSCODE_RETRY: RetryPolicy = RetryPolicy::fixed(10, Duration::from_secs(3));

/// External audio tool: concatenation and transcoding
///
/// Both are fallible synchronous process invocations with a non-zero-exit /
/// stderr failure mode. The trait seam keeps the assembler testable without
/// the real binary installed.
#[async_trait]
pub trait AudioTool: Send + Sync {
    /// Losslessly concatenate `inputs` (in order) into `output`
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    /// Transcode `input` into `output` with the target format's codec
    async fn transcode(&self, input: &Path, output: &Path, format: AudioFormat) -> Result<()>;
}

/// [`AudioTool`] implementation invoking ffmpeg
pub struct FfmpegTool {
    binary: PathBuf,
}

impl FfmpegTool {
    /// Use the `ffmpeg` binary found on PATH
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }

    /// Use an explicit ffmpeg binary path
    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        tracing::debug!(binary = %self.binary.display(), ?args, "invoking ffmpeg");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::AudioTool(format!("failed to spawn ffmpeg: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Keep only the tail; ffmpeg banners are long and the error is last
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join(" | ");
            Err(Error::AudioTool(format!(
                "ffmpeg exited with {}: {tail}",
                output.status
            )))
        }
    }
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioTool for FfmpegTool {
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        // The concat demuxer reads inputs from a list file, one per line
        let parent = output.parent().unwrap_or_else(|| Path::new("."));
        let mut list = String::new();
        for input in inputs {
            list.push_str(&format!("file '{}'\n", input.display()));
        }
        let list_file = tempfile::Builder::new()
            .prefix("concat-list-")
            .suffix(".txt")
            .tempfile_in(parent)
            .map_err(|e| Error::AudioTool(format!("failed to create list file: {e}")))?;
        std::fs::write(list_file.path(), list)
            .map_err(|e| Error::AudioTool(format!("failed to write list file: {e}")))?;

        let list_path = list_file.path().display().to_string();
        let output_path = output.display().to_string();
        self.run(&[
            "-nostdin",
            "-f",
            "concat",
            "-safe",
            "0",
            "-y",
            "-i",
            &list_path,
            "-c",
            "copy",
            &output_path,
        ])
        .await
    }

    async fn transcode(&self, input: &Path, output: &Path, format: AudioFormat) -> Result<()> {
        let input_path = input.display().to_string();
        let output_path = output.display().to_string();
        match format {
            AudioFormat::Mp3 => {
                self.run(&[
                    "-nostdin",
                    "-y",
                    "-i",
                    &input_path,
                    "-codec:a",
                    "libmp3lame",
                    "-q:a",
                    "2",
                    &output_path,
                ])
                .await
            }
            AudioFormat::Aac => {
                // Native format; a transcode request is a plain remux
                self.run(&["-nostdin", "-y", "-i", &input_path, "-c", "copy", &output_path])
                    .await
            }
        }
    }
}

/// Assembles a scratch directory of segments into one audio file
#[derive(Clone)]
pub struct AudioAssembler {
    tool: Arc<dyn AudioTool>,
}

impl AudioAssembler {
    /// Create an assembler over the given tool
    pub fn new(tool: Arc<dyn AudioTool>) -> Self {
        Self { tool }
    }

    /// Concatenate every segment file in `dir` into one file, in name order
    ///
    /// Returns the path of the concatenated file (inside `dir`). Segment
    /// files are deleted as they are consumed by successful concatenation
    /// steps. Each concatenation invocation carries its own retry; the
    /// ordered input list is held in memory for the whole operation, so a
    /// transient failure mid-merge can never lose or reorder segments.
    pub async fn concat_segments(&self, dir: &Path) -> Result<PathBuf> {
        let output = dir.join("concatenated.out");

        let mut files = list_segment_files(dir)?;
        if files.is_empty() {
            return Err(Error::AudioTool(format!(
                "no segment files to concatenate in {}",
                dir.display()
            )));
        }

        let mut merge_index = 0usize;
        while files.len() > CONCAT_BATCH_SIZE {
            let rest = files.split_off(CONCAT_BATCH_SIZE);
            let batch = files;
            let intermediate = dir.join(format!("merge-{merge_index:04}.tmp"));
            merge_index += 1;

            tracing::debug!(
                inputs = batch.len(),
                remaining = rest.len(),
                intermediate = %intermediate.display(),
                "concatenating intermediate batch"
            );
            self.concat_step(&batch, &intermediate).await?;
            remove_consumed(&batch);

            files = Vec::with_capacity(rest.len() + 1);
            files.push(intermediate);
            files.extend(rest);
        }

        tracing::debug!(inputs = files.len(), "concatenating final batch");
        self.concat_step(&files, &output).await?;
        remove_consumed(&files);

        Ok(output)
    }

    /// One retried concatenation invocation over a fixed input list
    async fn concat_step(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        retry_with_policy(&CONCAT_RETRY, "concatenate", || {
            self.tool.concatenate(inputs, output)
        })
        .await
        .map_err(|e| {
            RecordError::ConcatExhausted {
                attempts: CONCAT_RETRY.max_attempts,
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Transcode `input` into `output`, retrying failures with fixed delay
    pub async fn transcode(&self, input: &Path, output: &Path, format: AudioFormat) -> Result<()> {
        retry_with_policy(&TRANSCODE_RETRY, "transcode", || {
            self.tool.transcode(input, output, format)
        })
        .await
        .map_err(|e| {
            RecordError::TranscodeExhausted {
                attempts: TRANSCODE_RETRY.max_attempts,
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Segment files in `dir`, sorted by file name for deterministic ordering
fn list_segment_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn remove_consumed(files: &[PathBuf]) {
    for file in files {
        if let Err(e) = std::fs::remove_file(file) {
            // Best-effort cleanup; the scratch dir is removed wholesale later
            tracing::debug!(file = %file.display(), error = %e, "failed to remove consumed segment");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Test tool that concatenates by appending file contents
    struct AppendTool {
        invocations: Mutex<Vec<usize>>,
    }

    impl AppendTool {
        fn new() -> Self {
            Self {
                invocations: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AudioTool for AppendTool {
        async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
            self.invocations.lock().unwrap().push(inputs.len());
            let mut combined = Vec::new();
            for input in inputs {
                combined.extend(std::fs::read(input)?);
            }
            std::fs::write(output, combined)?;
            Ok(())
        }

        async fn transcode(&self, input: &Path, output: &Path, _format: AudioFormat) -> Result<()> {
            std::fs::copy(input, output)?;
            Ok(())
        }
    }

    /// Tool that fails a configurable number of times before succeeding
    struct FlakyTool {
        failures_left: Mutex<u32>,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl AudioTool for FlakyTool {
        async fn concatenate(&self, _inputs: &[PathBuf], output: &Path) -> Result<()> {
            std::fs::write(output, b"ok")?;
            Ok(())
        }

        async fn transcode(&self, _input: &Path, output: &Path, _format: AudioFormat) -> Result<()> {
            *self.calls.lock().unwrap() += 1;
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(Error::AudioTool("transient tool failure".into()));
            }
            std::fs::write(output, b"transcoded")?;
            Ok(())
        }
    }

    /// Appending tool that fails exactly one concatenation call, once
    struct FlakyBatchTool {
        inner: AppendTool,
        fail_on_call: u32,
        calls: Mutex<u32>,
    }

    impl FlakyBatchTool {
        fn failing_on_call(fail_on_call: u32) -> Self {
            Self {
                inner: AppendTool::new(),
                fail_on_call,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl AudioTool for FlakyBatchTool {
        async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if call == self.fail_on_call {
                return Err(Error::AudioTool("transient tool failure".into()));
            }
            self.inner.concatenate(inputs, output).await
        }

        async fn transcode(&self, input: &Path, output: &Path, format: AudioFormat) -> Result<()> {
            self.inner.transcode(input, output, format).await
        }
    }

    /// Tool whose concatenation never succeeds
    struct AlwaysFailTool;

    #[async_trait]
    impl AudioTool for AlwaysFailTool {
        async fn concatenate(&self, _inputs: &[PathBuf], _output: &Path) -> Result<()> {
            Err(Error::AudioTool("persistent tool failure".into()))
        }

        async fn transcode(&self, _input: &Path, _output: &Path, _format: AudioFormat) -> Result<()> {
            Err(Error::AudioTool("persistent tool failure".into()))
        }
    }

    fn write_segments(dir: &Path, count: usize) {
        for i in 0..count {
            // Zero-padded names keep lexicographic order == segment order
            std::fs::write(dir.join(format!("seg-{i:04}.aac")), format!("[{i}]")).unwrap();
        }
    }

    #[tokio::test]
    async fn small_set_is_one_invocation() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path(), 5);

        let tool = Arc::new(AppendTool::new());
        let assembler = AudioAssembler::new(tool.clone());
        let output = assembler.concat_segments(dir.path()).await.unwrap();

        assert_eq!(*tool.invocations.lock().unwrap(), vec![5]);
        let body = std::fs::read_to_string(output).unwrap();
        assert_eq!(body, "[0][1][2][3][4]");
    }

    #[tokio::test]
    async fn two_hundred_fifty_segments_take_exactly_three_invocations() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path(), 250);

        let tool = Arc::new(AppendTool::new());
        let assembler = AudioAssembler::new(tool.clone());
        let output = assembler.concat_segments(dir.path()).await.unwrap();

        // 100 segments, then intermediate + 99 more, then intermediate + the last 51
        assert_eq!(*tool.invocations.lock().unwrap(), vec![100, 100, 52]);

        // Full content, original order
        let body = std::fs::read_to_string(&output).unwrap();
        let expected: String = (0..250).map(|i| format!("[{i}]")).collect();
        assert_eq!(body, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_mid_merge_preserves_every_segment_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path(), 250);

        // The first batch has already been merged and its inputs deleted when
        // the second batch fails; the retry must repeat only that invocation
        // over the in-memory list, never restart from the directory contents.
        let tool = Arc::new(FlakyBatchTool::failing_on_call(2));
        let assembler = AudioAssembler::new(tool.clone());
        let output = assembler.concat_segments(dir.path()).await.unwrap();

        assert_eq!(*tool.calls.lock().unwrap(), 4);
        assert_eq!(*tool.inner.invocations.lock().unwrap(), vec![100, 100, 52]);

        let body = std::fs::read_to_string(&output).unwrap();
        let expected: String = (0..250).map(|i| format!("[{i}]")).collect();
        assert_eq!(body, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn concat_exhaustion_reports_attempt_count() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path(), 3);

        let assembler = AudioAssembler::new(Arc::new(AlwaysFailTool));
        let err = assembler.concat_segments(dir.path()).await.unwrap_err();

        match err {
            Error::Record(RecordError::ConcatExhausted { attempts, .. }) => {
                assert_eq!(attempts, 10)
            }
            other => panic!("expected concat exhaustion, got {other}"),
        }
        // No step succeeded, so no inputs were consumed
        let remaining = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(remaining, 3);
    }

    #[tokio::test]
    async fn consumed_segments_are_deleted() {
        let dir = tempfile::tempdir().unwrap();
        write_segments(dir.path(), 120);

        let assembler = AudioAssembler::new(Arc::new(AppendTool::new()));
        let output = assembler.concat_segments(dir.path()).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(
            leftovers,
            vec![output],
            "only the concatenated output should remain"
        );
    }

    #[tokio::test]
    async fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = AudioAssembler::new(Arc::new(AppendTool::new()));
        assert!(assembler.concat_segments(dir.path()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn transcode_retries_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.aac");
        std::fs::write(&input, b"x").unwrap();
        let output = dir.path().join("out.mp3");

        let tool = Arc::new(FlakyTool {
            failures_left: Mutex::new(3),
            calls: Mutex::new(0),
        });
        let assembler = AudioAssembler::new(tool.clone());
        assembler
            .transcode(&input, &output, AudioFormat::Mp3)
            .await
            .unwrap();

        assert_eq!(*tool.calls.lock().unwrap(), 4);
        assert!(output.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn transcode_exhaustion_reports_attempt_count() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.aac");
        std::fs::write(&input, b"x").unwrap();

        let tool = Arc::new(FlakyTool {
            failures_left: Mutex::new(u32::MAX),
            calls: Mutex::new(0),
        });
        let assembler = AudioAssembler::new(tool.clone());
        let err = assembler
            .transcode(&input, &dir.path().join("out.mp3"), AudioFormat::Mp3)
            .await
            .unwrap_err();

        match err {
            Error::Record(RecordError::TranscodeExhausted { attempts, .. }) => {
                assert_eq!(attempts, 10)
            }
            other => panic!("expected transcode exhaustion, got {other}"),
        }
        assert_eq!(*tool.calls.lock().unwrap(), 10);
    }
}
