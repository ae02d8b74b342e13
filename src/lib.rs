#![forbid(unsafe_code)]

//! Finds a product's TikTok account, lists its most popular videos and
//! downloads them into a categorized directory tree.

pub mod config;
pub mod download;
pub mod error;
pub mod lister;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod resolver;

use config::ScoutSettings;
use download::DownloadManager;
use lister::{ApifyClient, VideoLister};
use pipeline::AcquisitionPipeline;
use resolver::{HandleResolver, SerpApiClient};

/// Wires the HTTP-backed resolver and lister from resolved settings.
pub fn pipeline_from_settings(settings: &ScoutSettings) -> AcquisitionPipeline {
    let search = SerpApiClient::new(
        settings.search_endpoint.clone(),
        settings.search_api_key.clone(),
        settings.search_timeout,
    );
    let scraper = ApifyClient::new(
        settings.scraper_endpoint.clone(),
        settings.scraper_actor.clone(),
        settings.scraper_api_key.clone(),
        settings.scrape_timeout,
    );
    AcquisitionPipeline::new(
        HandleResolver::new(search),
        VideoLister::new(scraper),
        settings.workers,
    )
}

pub fn downloads_from_settings(settings: &ScoutSettings) -> DownloadManager {
    DownloadManager::new(
        settings.download_root.clone(),
        settings.ytdlp_path.clone(),
        settings.workers,
        settings.download_timeout,
    )
}
