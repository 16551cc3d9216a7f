//! Error types for the playback supervisor

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Playlist download failed
    #[error("playlist fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The player executable could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// No playlist URL given and none configured
    #[error("no playlist source configured (set IPTV_URL)")]
    MissingSource,
}
