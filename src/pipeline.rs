//! Resolves handles and lists videos for a batch of products.
//!
//! Each product is an independent unit of work (resolve, then list) run on a
//! bounded pool of blocking workers. Units share nothing; each reports back
//! its own slot and the slots are merged in query order once all finish.

use std::sync::Arc;

use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{info, warn};

use crate::lister::VideoLister;
use crate::model::{AcquisitionResult, ProductQuery};
use crate::resolver::HandleResolver;

pub const DEFAULT_VIDEOS_PER_QUERY: usize = 3;

pub struct AcquisitionPipeline {
    resolver: Arc<HandleResolver>,
    lister: Arc<VideoLister>,
    workers: usize,
}

impl AcquisitionPipeline {
    pub fn new(resolver: HandleResolver, lister: VideoLister, workers: usize) -> Self {
        Self {
            resolver: Arc::new(resolver),
            lister: Arc::new(lister),
            workers: workers.max(1),
        }
    }

    /// Products without a resolvable account are left out of the result;
    /// products whose account yielded no verified videos map to an empty list.
    pub async fn run(&self, queries: &[ProductQuery], count_per_query: usize) -> AcquisitionResult {
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for (index, query) in queries.iter().cloned().enumerate() {
            let permits = permits.clone();
            let resolver = self.resolver.clone();
            let lister = self.lister.clone();
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, None);
                };
                let product = query.name.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    acquire_one(&resolver, &lister, &query, count_per_query)
                })
                .await;
                match joined {
                    Ok(urls) => (index, urls),
                    Err(err) => {
                        warn!(product = %product, error = %err, "acquisition worker panicked");
                        (index, None)
                    }
                }
            });
        }

        let mut slots: Vec<Option<Vec<String>>> = vec![None; queries.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, urls)) => slots[index] = urls,
                Err(err) => warn!(error = %err, "acquisition task aborted"),
            }
        }

        let result: AcquisitionResult = queries
            .iter()
            .zip(slots)
            .filter_map(|(query, urls)| urls.map(|urls| (query.name.clone(), urls)))
            .collect();
        info!(
            queries = queries.len(),
            resolved = result.len(),
            videos = result.total_urls(),
            "acquisition finished"
        );
        result
    }
}

fn acquire_one(
    resolver: &HandleResolver,
    lister: &VideoLister,
    query: &ProductQuery,
    count: usize,
) -> Option<Vec<String>> {
    // An empty name would match every handle.
    if query.name.trim().is_empty() {
        warn!("skipping query with empty product name");
        return None;
    }
    let handle = match resolver.resolve(&query.name, &query.description) {
        Ok(Some(handle)) => handle,
        Ok(None) => return None,
        Err(err) => {
            warn!(product = %query.name, error = %err, "handle resolution failed");
            return None;
        }
    };
    Some(lister.list(&handle, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ScoutError, ScoutResult};
    use crate::lister::{ProfileJob, ScrapeBackend};
    use crate::model::VideoRecord;
    use crate::resolver::{SearchBackend, SearchHit};

    /// Returns a profile link for queries starting with a known product name.
    struct DirectorySearch {
        accounts: Vec<(&'static str, &'static str)>,
    }

    impl SearchBackend for DirectorySearch {
        fn search(&self, query: &str, _limit: usize) -> ScoutResult<Vec<SearchHit>> {
            if query.starts_with("Broken") {
                return Err(ScoutError::Transport {
                    service: "search",
                    reason: "timed out".into(),
                });
            }
            Ok(self
                .accounts
                .iter()
                .filter(|(product, _)| query.starts_with(product))
                .map(|(_, handle)| SearchHit {
                    link: format!("https://www.tiktok.com/@{handle}"),
                    snippet: None,
                })
                .collect())
        }
    }

    /// Produces `count` videos for the requested profile plus one foreign
    /// record; profiles named `empty` have no videos.
    struct ProfileScrape;

    impl ScrapeBackend for ProfileScrape {
        fn run_job(&self, job: &ProfileJob) -> ScoutResult<Vec<VideoRecord>> {
            let profile = &job.profiles[0];
            if profile.contains("empty") {
                return Ok(Vec::new());
            }
            let mut records: Vec<VideoRecord> = (0..job.results_per_page)
                .map(|n| VideoRecord {
                    author_handle: profile.clone(),
                    url: format!("https://www.tiktok.com/@{profile}/video/{n}"),
                })
                .collect();
            records.push(VideoRecord {
                author_handle: "impostor".into(),
                url: "https://www.tiktok.com/@impostor/video/9".into(),
            });
            Ok(records)
        }
    }

    fn pipeline(workers: usize) -> AcquisitionPipeline {
        AcquisitionPipeline::new(
            HandleResolver::new(DirectorySearch {
                accounts: vec![
                    ("Opal", "opal"),
                    ("OneSec", "onesec_app"),
                    ("Forest", "forestapp"),
                    ("Quiet", "quiet_empty"),
                ],
            }),
            VideoLister::new(ProfileScrape),
            workers,
        )
    }

    #[tokio::test]
    async fn unresolved_products_are_omitted() {
        let queries = vec![
            ProductQuery::new("Opal", "screen time app"),
            ProductQuery::new("Unknown App", "nonexistent app"),
        ];
        let result = pipeline(1).run(&queries, 2).await;

        assert!(!result.contains_key("Unknown App"));
        assert_eq!(
            result.get("Opal").unwrap(),
            [
                "https://www.tiktok.com/@opal/video/0".to_string(),
                "https://www.tiktok.com/@opal/video/1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn resolved_account_without_videos_keeps_empty_entry() {
        let queries = vec![ProductQuery::new("Quiet", "focus app")];
        let result = pipeline(1).run(&queries, 3).await;
        assert_eq!(result.get("Quiet").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn search_failure_only_affects_its_query() {
        let queries = vec![
            ProductQuery::new("Broken", "anything"),
            ProductQuery::new("Forest", "focus app"),
            ProductQuery::new("", "blank"),
        ];
        let result = pipeline(2).run(&queries, 1).await;
        assert_eq!(result.keys().collect::<Vec<_>>(), vec!["Forest"]);
    }

    #[tokio::test]
    async fn concurrent_run_keeps_query_order() {
        let queries = vec![
            ProductQuery::new("Forest", "focus app"),
            ProductQuery::new("Unknown", "x"),
            ProductQuery::new("Opal", "screen time app"),
            ProductQuery::new("OneSec", "screen time app"),
        ];
        let result = pipeline(4).run(&queries, 1).await;
        assert_eq!(
            result.keys().collect::<Vec<_>>(),
            vec!["Forest", "Opal", "OneSec"]
        );
        assert_eq!(result.total_urls(), 3);
    }
}
