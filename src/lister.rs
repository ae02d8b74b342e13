//! Lists an account's most popular videos through the scraping actor.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ScoutError, ScoutResult};
use crate::model::{Handle, VideoRecord};

const SCRAPER_SERVICE: &str = "scraper";

/// Input of a profile-scraping job. Only metadata is requested; every binary
/// asset download is switched off.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileJob {
    pub profiles: Vec<String>,
    pub results_per_page: usize,
    pub profile_sorting: String,
    pub profile_scrape_sections: Vec<String>,
    pub exclude_pinned_posts: bool,
    pub proxy_country_code: String,
    pub should_download_avatars: bool,
    pub should_download_covers: bool,
    pub should_download_music_covers: bool,
    pub should_download_slideshow_images: bool,
    pub should_download_subtitles: bool,
    pub should_download_videos: bool,
}

impl ProfileJob {
    pub fn popular_videos(handle: &Handle, count: usize) -> Self {
        Self {
            profiles: vec![handle.as_str().to_string()],
            results_per_page: count,
            profile_sorting: "popular".to_string(),
            profile_scrape_sections: vec!["videos".to_string()],
            exclude_pinned_posts: false,
            proxy_country_code: "None".to_string(),
            should_download_avatars: false,
            should_download_covers: false,
            should_download_music_covers: false,
            should_download_slideshow_images: false,
            should_download_subtitles: false,
            should_download_videos: false,
        }
    }
}

/// Job-based scraping service. `run_job` submits the job and blocks until the
/// service reports completion, returning the dataset in backend order.
pub trait ScrapeBackend: Send + Sync {
    fn run_job(&self, job: &ProfileJob) -> ScoutResult<Vec<VideoRecord>>;
}

pub struct VideoLister {
    backend: Box<dyn ScrapeBackend>,
}

impl VideoLister {
    pub fn new(backend: impl ScrapeBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Returns the URLs of `handle`'s own videos, most popular first.
    ///
    /// A failed job yields an empty list; records attributed to any other
    /// author are dropped.
    pub fn list(&self, handle: &Handle, count: usize) -> Vec<String> {
        let job = ProfileJob::popular_videos(handle, count);
        let records = match self.backend.run_job(&job) {
            Ok(records) => records,
            Err(err) => {
                warn!(%handle, error = %err, "scrape job failed");
                return Vec::new();
            }
        };

        let total = records.len();
        let urls = verified_urls(handle, records);
        if urls.len() < total {
            debug!(%handle, dropped = total - urls.len(), "dropped foreign records");
        }
        info!(%handle, videos = urls.len(), "listed videos");
        urls
    }
}

/// Keeps records whose author is exactly `handle` (case-sensitive). The
/// author value is compared as reported; only the target carries no sigil.
/// Backend order is preserved.
pub fn verified_urls(handle: &Handle, records: Vec<VideoRecord>) -> Vec<String> {
    records
        .into_iter()
        .filter(|record| record.author_handle == handle.as_str())
        .map(|record| record.url)
        .collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetItem {
    #[serde(default)]
    author_meta: Option<AuthorMeta>,
    #[serde(default)]
    web_video_url: Option<String>,
}

#[derive(Deserialize)]
struct AuthorMeta {
    #[serde(default)]
    name: Option<String>,
}

impl DatasetItem {
    fn into_record(self) -> Option<VideoRecord> {
        let author_handle = self.author_meta?.name?;
        let url = self.web_video_url.filter(|url| !url.trim().is_empty())?;
        Some(VideoRecord { author_handle, url })
    }
}

/// Apify-style actor client using the synchronous run-and-fetch-dataset call.
pub struct ApifyClient {
    agent: ureq::Agent,
    endpoint: String,
    actor: String,
    api_key: String,
}

impl ApifyClient {
    pub fn new(
        endpoint: impl Into<String>,
        actor: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            endpoint: endpoint.into(),
            actor: actor.into(),
            api_key: api_key.into(),
        }
    }

    fn run_url(&self) -> String {
        format!(
            "{}/acts/{}/run-sync-get-dataset-items",
            self.endpoint.trim_end_matches('/'),
            self.actor
        )
    }
}

impl ScrapeBackend for ApifyClient {
    fn run_job(&self, job: &ProfileJob) -> ScoutResult<Vec<VideoRecord>> {
        let response = self
            .agent
            .post(&self.run_url())
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(job)
            .map_err(|err| match ScoutError::from_ureq(SCRAPER_SERVICE, err) {
                ScoutError::Backend { status, reason, .. } => {
                    ScoutError::BackendJob(format!("status {status}: {reason}"))
                }
                other => other,
            })?;
        let items: Vec<DatasetItem> = response
            .into_json()
            .map_err(|err| ScoutError::decode(SCRAPER_SERVICE, err))?;
        Ok(items.into_iter().filter_map(DatasetItem::into_record).collect())
    }
}
