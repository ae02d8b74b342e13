//! Downloads acquired videos into one directory per category.
//!
//! Layout: `<root>/<category>/<media title>.<ext>` where `<category>` is the
//! label lowercased with spaces turned into underscores. Two labels may map to
//! the same directory; they then simply share it.
//!
//! Every URL is attempted. A failure is recorded in that URL's outcome and
//! never stops the rest of the batch.

use std::{
    path::{Component, Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use tokio::{process::Command, sync::Semaphore, task::JoinSet};
use tracing::{info, warn};

use crate::error::{ScoutError, ScoutResult};
use crate::model::{AcquisitionResult, DownloadOutcome, DownloadReport, DownloadStatus};

const FORMAT_SELECTOR: &str = "bestvideo+bestaudio/best";
const MERGE_FORMAT: &str = "mp4";
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Directory name for a category label.
pub fn category_dir_name(label: &str) -> String {
    label.to_lowercase().replace(' ', "_")
}

pub struct DownloadManager {
    root: PathBuf,
    program: PathBuf,
    workers: usize,
    timeout: Duration,
}

impl DownloadManager {
    pub fn new(
        root: impl Into<PathBuf>,
        program: impl Into<PathBuf>,
        workers: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            program: program.into(),
            workers: workers.max(1),
            timeout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Target directory for `label`. Labels that do not reduce to a single
    /// plain path component are rejected so nothing lands outside the root.
    pub fn category_dir(&self, label: &str) -> ScoutResult<PathBuf> {
        let name = category_dir_name(label);
        let mut components = Path::new(&name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(&name)),
            _ => Err(ScoutError::InvalidCategory(label.to_string())),
        }
    }

    /// Creates the category directory if needed. Safe to call repeatedly and
    /// from concurrent workers.
    pub async fn ensure_category_dir(&self, label: &str) -> ScoutResult<PathBuf> {
        let dir = self.category_dir(label)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| ScoutError::CreateDir {
                path: dir.clone(),
                reason: err.to_string(),
            })?;
        Ok(dir)
    }

    /// Attempts every URL and returns one outcome per URL in request order.
    pub async fn download_all(&self, batch: &AcquisitionResult) -> DownloadReport {
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut outcomes: Vec<DownloadOutcome> = Vec::with_capacity(batch.total_urls());

        for (label, urls) in batch.iter() {
            let dir = match self.ensure_category_dir(label).await {
                Ok(dir) => dir,
                Err(err) => {
                    warn!(category = label, error = %err, "skipping category");
                    for url in urls {
                        outcomes.push(failure(url, label, self.root.clone(), &err));
                    }
                    continue;
                }
            };

            for url in urls {
                // Stays in place if the task never reports back.
                let unfinished = ScoutError::Download {
                    url: url.clone(),
                    reason: "download task did not complete".into(),
                };
                outcomes.push(failure(url, label, dir.clone(), &unfinished));

                let slot = outcomes.len() - 1;
                let permits = permits.clone();
                let program = self.program.clone();
                let timeout = self.timeout;
                let dir = dir.clone();
                let url = url.clone();
                let label = label.to_string();
                tasks.spawn(async move {
                    let Ok(_permit) = permits.acquire_owned().await else {
                        let err = ScoutError::Download {
                            url: url.clone(),
                            reason: "download pool closed".into(),
                        };
                        return (slot, failure(&url, &label, dir, &err));
                    };
                    let outcome = match fetch_media(&program, &dir, &url, timeout).await {
                        Ok(file) => {
                            info!(%url, category = %label, "downloaded");
                            DownloadOutcome {
                                url,
                                category: label,
                                category_directory: dir,
                                status: DownloadStatus::Success,
                                file,
                                error: None,
                            }
                        }
                        Err(err) => {
                            warn!(%url, category = %label, error = %err, "download failed");
                            failure(&url, &label, dir, &err)
                        }
                    };
                    (slot, outcome)
                });
            }
        }

        collect_outcomes(tasks, &mut outcomes).await;

        let report = DownloadReport { outcomes };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "download batch finished"
        );
        report
    }
}

/// Writes each finished task's outcome into its slot. Slots of tasks that
/// panicked or were cancelled keep their preset failure.
async fn collect_outcomes(
    mut tasks: JoinSet<(usize, DownloadOutcome)>,
    outcomes: &mut [DownloadOutcome],
) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((slot, outcome)) => outcomes[slot] = outcome,
            Err(err) => warn!(error = %err, "download task aborted"),
        }
    }
}

fn failure(url: &str, label: &str, dir: PathBuf, err: &ScoutError) -> DownloadOutcome {
    DownloadOutcome {
        url: url.to_string(),
        category: label.to_string(),
        category_directory: dir,
        status: DownloadStatus::Failure,
        file: None,
        error: Some(err.to_string()),
    }
}

/// Runs one yt-dlp download and returns the final file path it printed.
/// The child is killed if the timeout elapses.
async fn fetch_media(
    program: &Path,
    dir: &Path,
    url: &str,
    timeout: Duration,
) -> ScoutResult<Option<PathBuf>> {
    let download_error = |reason: String| ScoutError::Download {
        url: url.to_string(),
        reason,
    };

    let mut command = Command::new(program);
    command
        .arg("--format")
        .arg(FORMAT_SELECTOR)
        .arg("--merge-output-format")
        .arg(MERGE_FORMAT)
        .arg("--no-playlist")
        .arg("--no-warnings")
        .arg("--no-simulate")
        .arg("--print")
        .arg("after_move:filepath")
        .arg("--output")
        .arg(dir.join(OUTPUT_TEMPLATE))
        .arg("--")
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(result) => result
            .map_err(|err| download_error(format!("could not start {}: {err}", program.display())))?,
        Err(_) => {
            return Err(download_error(format!(
                "timed out after {}s",
                timeout.as_secs_f32()
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("yt-dlp exited with {}", output.status));
        return Err(download_error(reason));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .map(PathBuf::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;
    use std::fs;
    use tempfile::tempdir;

    #[cfg(unix)]
    fn install_ytdlp_stub(dir: &Path) -> PathBuf {
        let script_path = dir.join("yt-dlp");
        let script = include_str!("../testdata/ytdlp_stub.sh");
        fs::write(&script_path, script).unwrap();
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();
        script_path
    }

    fn batch(entries: Vec<(&str, Vec<&str>)>) -> AcquisitionResult {
        entries
            .into_iter()
            .map(|(label, urls)| {
                (
                    label.to_string(),
                    urls.into_iter().map(str::to_string).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn category_names_are_lowercased_and_underscored() {
        assert_eq!(category_dir_name("Screen Time"), "screen_time");
        assert_eq!(category_dir_name("One Sec App"), "one_sec_app");
        assert_eq!(category_dir_name("opal"), "opal");
    }

    #[test]
    fn category_dir_rejects_escaping_labels() {
        let manager = DownloadManager::new("/vids", "yt-dlp", 1, Duration::from_secs(1));
        assert_eq!(
            manager.category_dir("Screen Time").unwrap(),
            PathBuf::from("/vids/screen_time")
        );
        for label in ["", "..", ".", "a/b", "../escape", "/abs"] {
            assert!(
                matches!(manager.category_dir(label), Err(ScoutError::InvalidCategory(_))),
                "{label:?}"
            );
        }
    }

    #[tokio::test]
    async fn ensure_category_dir_is_idempotent() {
        let temp = tempdir().unwrap();
        let manager = DownloadManager::new(temp.path(), "yt-dlp", 1, Duration::from_secs(1));
        let first = manager.ensure_category_dir("Screen Time").await.unwrap();
        let second = manager.ensure_category_dir("Screen Time").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, temp.path().join("screen_time"));
        assert!(first.is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_in_the_middle_does_not_stop_the_batch() {
        let temp = tempdir().unwrap();
        let stub = install_ytdlp_stub(temp.path());
        let root = temp.path().join("scraped");
        let manager = DownloadManager::new(&root, stub, 2, Duration::from_secs(10));

        let report = manager
            .download_all(&batch(vec![(
                "Screen Time",
                vec![
                    "https://www.tiktok.com/@opal/video/1",
                    "https://www.tiktok.com/@opal/video/broken",
                    "https://www.tiktok.com/@opal/video/3",
                ],
            )]))
            .await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        let statuses: Vec<_> = report.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![
                DownloadStatus::Success,
                DownloadStatus::Failure,
                DownloadStatus::Success
            ]
        );
        let failed = report.first_failure().unwrap();
        assert!(failed.error.as_deref().unwrap().contains("Unsupported URL"));
        assert!(root.join("screen_time").join("1.mp4").is_file());
        assert!(root.join("screen_time").join("3.mp4").is_file());
        assert_eq!(
            report.outcomes[0].file.as_deref(),
            Some(root.join("screen_time").join("1.mp4").as_path())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn colliding_labels_share_a_directory() {
        let temp = tempdir().unwrap();
        let stub = install_ytdlp_stub(temp.path());
        let root = temp.path().join("scraped");
        let manager = DownloadManager::new(&root, stub, 4, Duration::from_secs(10));

        let report = manager
            .download_all(&batch(vec![
                ("Screen Time", vec!["https://www.tiktok.com/@a/video/1"]),
                ("screen time", vec!["https://www.tiktok.com/@b/video/2"]),
            ]))
            .await;

        assert!(report.all_succeeded());
        assert_eq!(
            report.outcomes[0].category_directory,
            report.outcomes[1].category_directory
        );
        assert!(root.join("screen_time").join("2.mp4").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invalid_category_fails_only_its_urls() {
        let temp = tempdir().unwrap();
        let stub = install_ytdlp_stub(temp.path());
        let root = temp.path().join("scraped");
        let manager = DownloadManager::new(&root, stub, 1, Duration::from_secs(10));

        let report = manager
            .download_all(&batch(vec![
                ("../escape", vec!["https://www.tiktok.com/@x/video/1"]),
                ("Opal", vec!["https://www.tiktok.com/@opal/video/2"]),
            ]))
            .await;

        assert_eq!(report.outcomes[0].status, DownloadStatus::Failure);
        assert_eq!(report.outcomes[1].status, DownloadStatus::Success);
        assert!(!temp.path().join("escape").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_download_times_out() {
        let temp = tempdir().unwrap();
        let stub = install_ytdlp_stub(temp.path());
        let manager =
            DownloadManager::new(temp.path().join("out"), stub, 1, Duration::from_millis(200));

        let report = manager
            .download_all(&batch(vec![("Opal", vec!["https://www.tiktok.com/@opal/video/slow"])]))
            .await;

        assert_eq!(report.failed(), 1);
        assert!(
            report.outcomes[0]
                .error
                .as_deref()
                .unwrap()
                .contains("timed out")
        );
    }

    #[tokio::test]
    async fn missing_downloader_is_reported_per_url() {
        let temp = tempdir().unwrap();
        let manager = DownloadManager::new(
            temp.path(),
            temp.path().join("no-such-yt-dlp"),
            1,
            Duration::from_secs(5),
        );

        let report = manager
            .download_all(&batch(vec![(
                "Opal",
                vec!["https://www.tiktok.com/@opal/video/1", "https://www.tiktok.com/@opal/video/2"],
            )]))
            .await;

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failed(), 2);
        assert!(
            report.outcomes[0]
                .error
                .as_deref()
                .unwrap()
                .contains("could not start")
        );
    }

    #[tokio::test]
    async fn panicked_task_still_yields_an_outcome() {
        let dir = PathBuf::from("/vids/opal");
        let unfinished = |url: &str| ScoutError::Download {
            url: url.into(),
            reason: "download task did not complete".into(),
        };
        let mut outcomes = vec![
            failure("u1", "Opal", dir.clone(), &unfinished("u1")),
            failure("u2", "Opal", dir.clone(), &unfinished("u2")),
        ];

        let mut tasks: JoinSet<(usize, DownloadOutcome)> = JoinSet::new();
        let done = DownloadOutcome {
            url: "u1".into(),
            category: "Opal".into(),
            category_directory: dir,
            status: DownloadStatus::Success,
            file: None,
            error: None,
        };
        tasks.spawn(async move { (0, done) });
        tasks.spawn(async { panic!("worker crashed") });
        collect_outcomes(tasks, &mut outcomes).await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].status, DownloadStatus::Success);
        assert_eq!(outcomes[1].status, DownloadStatus::Failure);
        assert!(
            outcomes[1]
                .error
                .as_deref()
                .unwrap()
                .contains("did not complete")
        );
    }
}
