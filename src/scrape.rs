use std::sync::Arc;

use crate::extract::Extractor;
use crate::fetch::{FetchError, PageFetcher};
use crate::models::Record;

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("extraction failed: {0}")]
    Extraction(String),
}

/// Shared, read-only state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<dyn PageFetcher>,
    pub extractor: Arc<Extractor>,
}

/// Fetch `url` and pull the posts out of the rendered page.
pub async fn scrape(state: &AppState, url: &str) -> Result<Vec<Record>, ScrapeError> {
    let html = state.fetcher.fetch(url).await?;

    // Parsing runs on the blocking pool; a panic in there fails this request
    // only.
    let extractor = Arc::clone(&state.extractor);
    tokio::task::spawn_blocking(move || extractor.extract(&html))
        .await
        .map_err(|e| ScrapeError::Extraction(e.to_string()))
}
