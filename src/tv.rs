use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::cache::PlaylistCache;
use crate::config::Config;
use crate::error::Result;
use crate::monitor::{self, Outcome};
use crate::player::{Invocation, PlayerExit, PlayerHandle};
use crate::playlist::{self, Channel, ChannelDirectory};

/// Ask the supervisor to start a channel again.
#[derive(Debug)]
struct RestartRequest {
    channel: String,
}

#[derive(Default)]
struct Session {
    channel: Option<Channel>,
    player: Option<PlayerHandle>,
}

/// Snapshot of the playback session.
///
/// `channel` is the last channel started and survives the player exiting;
/// `pid` is only reported while the player is running.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Status {
    pub channel: Option<String>,
    pub pid: Option<u32>,
    pub playing: bool,
    pub starting: bool,
}

/// Holds the `starting` flag for the duration of one start.
struct StartGuard<'a>(&'a AtomicBool);

impl<'a> StartGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The live TV supervisor: channel directory plus the one player process.
pub struct Tv {
    config: Config,
    cache: PlaylistCache,
    channels: RwLock<Arc<ChannelDirectory>>,
    session: Mutex<Session>,
    starting: AtomicBool,
    playing: AtomicBool,
    restart_tx: mpsc::UnboundedSender<RestartRequest>,
}

impl Tv {
    /// Create the supervisor and its restart loop. Needs a tokio runtime.
    pub fn new(config: Config, client: reqwest::Client) -> Arc<Self> {
        let cache = PlaylistCache::new(
            config.playlist_path.clone(),
            config.playlist_url.clone(),
            config.freshness,
            client,
        );
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();

        let tv = Arc::new(Self {
            config,
            cache,
            channels: RwLock::new(Arc::default()),
            session: Mutex::new(Session::default()),
            starting: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            restart_tx,
        });
        tokio::spawn(serve_restarts(Arc::downgrade(&tv), restart_rx));
        tv
    }

    pub fn cache(&self) -> &PlaylistCache {
        &self.cache
    }

    pub async fn list(&self) -> Vec<Channel> {
        self.channels.read().await.iter().cloned().collect()
    }

    pub async fn get(&self, name: &str) -> Option<Channel> {
        let name = name.trim().to_uppercase();
        self.channels.read().await.get(&name).cloned()
    }

    /// Rebuild the channel directory from `text`, or from the cache file.
    pub async fn load(&self, text: Option<String>) -> Result<usize> {
        let text = match text {
            Some(text) => Some(text),
            None => self.cache.read().await?,
        };
        let directory = playlist::parse(text.as_deref().unwrap_or_default());
        if directory.is_empty() {
            tracing::warn!("no playable channels loaded");
        }
        let count = directory.len();
        *self.channels.write().await = Arc::new(directory);
        Ok(count)
    }

    /// Refresh the cached playlist if needed, then reload the directory.
    pub async fn download(&self, url: Option<&str>, force: bool) -> Result<usize> {
        let text = self.cache.ensure_fresh(url, force).await?;
        self.load(text).await
    }

    pub async fn status(&self) -> Status {
        let session = self.session.lock().await;
        let playing = self.playing.load(Ordering::Acquire);
        Status {
            channel: session.channel.as_ref().map(|c| c.name.clone()),
            pid: session
                .player
                .as_ref()
                .and_then(PlayerHandle::pid)
                .filter(|_| playing),
            playing,
            starting: self.starting.load(Ordering::Acquire),
        }
    }

    /// Switch playback to `name`, replacing the current player.
    ///
    /// Returns `Ok(false)` for an unknown channel or while another start is
    /// in progress. `restarted` marks automatic restarts, which are resumed
    /// again if the player exits cleanly.
    pub async fn play(self: &Arc<Self>, name: &str, restarted: bool) -> Result<bool> {
        let Some(channel) = self.get(name).await else {
            return Ok(false);
        };
        let Some(guard) = StartGuard::acquire(&self.starting) else {
            return Ok(false);
        };

        let mut session = self.session.lock().await;
        Self::stop_player(&mut session).await;

        let (child, stderr) = match Invocation::new(&self.config, &channel).spawn() {
            Ok(spawned) => spawned,
            Err(e) => {
                session.channel = None;
                return Err(e);
            }
        };
        session.channel = Some(channel.clone());
        self.playing.store(true, Ordering::Release);
        drop(guard);

        tracing::info!(
            "{}playing channel: {} ({})",
            if restarted { "re" } else { "" },
            channel.name,
            child.id().unwrap_or_default()
        );

        let cancel = CancellationToken::new();

        let tv = Arc::downgrade(self);
        let exit_cancel = cancel.clone();
        let exit_channel = channel.name.clone();
        let player = PlayerHandle::supervise(child, move |exit| {
            exit_cancel.cancel();
            if let Some(tv) = tv.upgrade() {
                tv.on_exit(exit_channel, restarted, exit);
            }
        });

        if let Some(stderr) = stderr {
            let restart_tx = self.restart_tx.clone();
            let period = self.config.poll_interval;
            let channel = channel.name.clone();
            tokio::spawn(async move {
                if let Outcome::Stalled(_) = monitor::watch(stderr, period, cancel).await {
                    let _ = restart_tx.send(RestartRequest { channel });
                }
            });
        }

        session.player = Some(player);
        Ok(true)
    }

    /// Terminate the player, if any, and wait for it to exit.
    pub async fn kill(&self) {
        let mut session = self.session.lock().await;
        Self::stop_player(&mut session).await;
    }

    async fn stop_player(session: &mut Session) {
        let Some(player) = session.player.take() else {
            return;
        };
        player.kill().await;

        #[cfg(windows)]
        {
            if let Some(channel) = &session.channel {
                crate::player::kill_by_title(&channel.name).await;
            }
        }
    }

    fn on_exit(&self, channel: String, restarted: bool, exit: PlayerExit) {
        self.playing.store(false, Ordering::Release);

        let status = match exit.status {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("lost track of player for {}: {}", channel, e);
                return;
            }
        };
        if exit.killed || status.success() {
            tracing::info!("exited: {}", status);
        } else {
            tracing::warn!("player for {} crashed: {}", channel, status);
        }

        if status.success() && restarted && !self.starting.load(Ordering::Acquire) {
            let restart_tx = self.restart_tx.clone();
            let delay = self.config.restart_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = restart_tx.send(RestartRequest { channel });
            });
        }
    }
}

async fn serve_restarts(tv: Weak<Tv>, mut restart_rx: mpsc::UnboundedReceiver<RestartRequest>) {
    while let Some(request) = restart_rx.recv().await {
        let Some(tv) = tv.upgrade() else {
            break;
        };
        match tv.play(&request.channel, true).await {
            Ok(true) => {}
            Ok(false) => tracing::info!("restart of {} skipped", request.channel),
            Err(e) => tracing::error!("restart of {} failed: {}", request.channel, e),
        }
    }
}
