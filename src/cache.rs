use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{Error, Result};

/// On-disk copy of the remote playlist, refreshed when it gets too old.
pub struct PlaylistCache {
    path: PathBuf,
    default_url: Option<String>,
    freshness: Duration,
    client: reqwest::Client,
}

impl PlaylistCache {
    pub fn new(
        path: impl Into<PathBuf>,
        default_url: Option<String>,
        freshness: Duration,
        client: reqwest::Client,
    ) -> Self {
        Self {
            path: path.into(),
            default_url,
            freshness,
            client,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Age of the cached file, or `None` when there is no cache yet.
    pub async fn age(&self) -> Result<Option<Duration>> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified = metadata.modified()?;
        // A timestamp in the future counts as brand new
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Ok(Some(age))
    }

    /// Download the playlist when forced, missing or stale.
    ///
    /// Returns the fresh text, or `None` when the cached file is still good
    /// and should be read with [`PlaylistCache::read`].
    pub async fn ensure_fresh(&self, url: Option<&str>, force: bool) -> Result<Option<String>> {
        let stale = match self.age().await? {
            None => true,
            Some(age) => age >= self.freshness,
        };
        if !force && !stale {
            return Ok(None);
        }

        let url = url
            .filter(|url| !url.is_empty())
            .or(self.default_url.as_deref())
            .ok_or(Error::MissingSource)?;

        tracing::info!("downloading playlist from {}", url);
        let text = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        self.store(&text).await?;
        Ok(Some(text))
    }

    /// Read the cached playlist, `None` if it was never downloaded.
    pub async fn read(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the cache file: write to a temp sibling, then rename.
    ///
    /// Every call gets its own temp file, so overlapping downloads never
    /// rename each other's work away.
    async fn store(&self, text: &str) -> Result<()> {
        let path = self.path.clone();
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
                Some(parent) => {
                    std::fs::create_dir_all(parent)?;
                    parent.to_path_buf()
                }
                None => PathBuf::from("."),
            };
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(text.as_bytes())?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(io::Error::other)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{routing::get, Router};

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    const PLAYLIST: &str = "#EXTM3U\n\
        #EXTINF:-1 tvg-name=\"News\",News\n\
        http://stream/news.m3u8\n";

    /// Serve `PLAYLIST` at `/list.m3u8` on a local port.
    async fn serve_playlist() -> std::io::Result<String> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}/list.m3u8", listener.local_addr()?);
        let app = Router::new().route("/list.m3u8", get(|| async { PLAYLIST }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Ok(url)
    }

    fn local_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    fn cache_at(path: PathBuf, url: Option<&str>) -> PlaylistCache {
        PlaylistCache::new(
            path,
            url.map(str::to_string),
            Duration::from_secs(12 * 60 * 60),
            reqwest::Client::new(),
        )
    }

    #[tokio::test]
    async fn fresh_cache_is_not_refetched() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tv.m3u8");
        tokio::fs::write(&path, "#EXTM3U\n").await?;

        // Unroutable source: any fetch attempt would fail
        let cache = cache_at(path, Some("http://127.0.0.1:9/list.m3u8"));

        assert_eq!(cache.ensure_fresh(None, false).await?, None);
        assert_eq!(cache.read().await?.as_deref(), Some("#EXTM3U\n"));
        Ok(())
    }

    #[tokio::test]
    async fn missing_cache_without_source_is_an_error() -> TestResult {
        let dir = tempfile::tempdir()?;
        let cache = cache_at(dir.path().join("tv.m3u8"), None);

        assert!(cache.age().await?.is_none());
        assert!(matches!(
            cache.ensure_fresh(None, false).await,
            Err(Error::MissingSource)
        ));
        assert_eq!(cache.read().await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn failed_fetch_keeps_existing_cache() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tv.m3u8");
        tokio::fs::write(&path, "old").await?;
        let cache = cache_at(path, Some("http://127.0.0.1:9/list.m3u8"));

        assert!(matches!(
            cache.ensure_fresh(None, true).await,
            Err(Error::Fetch(_))
        ));
        assert_eq!(cache.read().await?.as_deref(), Some("old"));
        Ok(())
    }

    #[tokio::test]
    async fn store_replaces_file_contents() -> TestResult {
        let dir = tempfile::tempdir()?;
        let cache = cache_at(dir.path().join("nested").join("tv.m3u8"), None);

        cache.store("first").await?;
        cache.store("second").await?;

        assert_eq!(cache.read().await?.as_deref(), Some("second"));
        assert!(cache.age().await?.unwrap() < Duration::from_secs(60));
        Ok(())
    }

    #[tokio::test]
    async fn stale_cache_is_refetched_and_persisted() -> TestResult {
        let url = serve_playlist().await?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tv.m3u8");
        tokio::fs::write(&path, "old").await?;
        let cache = PlaylistCache::new(&path, Some(url), Duration::ZERO, local_client());

        assert_eq!(cache.ensure_fresh(None, false).await?.as_deref(), Some(PLAYLIST));
        assert_eq!(tokio::fs::read_to_string(&path).await?, PLAYLIST);
        Ok(())
    }

    #[tokio::test]
    async fn explicit_url_overrides_default() -> TestResult {
        let url = serve_playlist().await?;
        let dir = tempfile::tempdir()?;
        let cache = PlaylistCache::new(
            dir.path().join("tv.m3u8"),
            Some("http://127.0.0.1:9/list.m3u8".to_string()),
            Duration::from_secs(60),
            local_client(),
        );

        assert_eq!(cache.ensure_fresh(Some(&url), false).await?.as_deref(), Some(PLAYLIST));
        assert_eq!(cache.read().await?.as_deref(), Some(PLAYLIST));
        // Now fresh, so the next call leaves the file alone
        assert_eq!(cache.ensure_fresh(None, false).await?, None);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_stores_both_succeed() -> TestResult {
        let dir = tempfile::tempdir()?;
        let cache = Arc::new(cache_at(dir.path().join("tv.m3u8"), None));
        let big_a = "a".repeat(4 << 20);
        let big_b = "b".repeat(4 << 20);

        for _ in 0..10 {
            let (a, b) = tokio::join!(
                tokio::spawn({
                    let cache = Arc::clone(&cache);
                    let text = big_a.clone();
                    async move { cache.store(&text).await }
                }),
                tokio::spawn({
                    let cache = Arc::clone(&cache);
                    let text = big_b.clone();
                    async move { cache.store(&text).await }
                }),
            );
            a??;
            b??;

            let stored = cache.read().await?.unwrap_or_default();
            assert!(stored == big_a || stored == big_b, "torn cache file");
        }

        // No temp files left behind
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }
}
