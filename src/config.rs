use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Stream flavour served by the playlist provider. Only affects buffering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputType {
    #[default]
    Mpegts,
    Hls,
}

#[derive(Parser, Debug)]
#[command(name = "livetv")]
#[command(about = "Always-on IPTV player with stall detection and an HTTP remote")]
pub struct Args {
    /// Address the HTTP server binds to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP server port
    #[arg(short, long, default_value = "3000")]
    pub port: u16,

    /// Player executable
    #[arg(long, env = "FFPLAY", default_value = "ffplay")]
    pub ffplay: String,

    /// Remote M3U playlist
    #[arg(long, env = "IPTV_URL")]
    pub iptv_url: Option<String>,

    /// Output type of the provider's streams
    #[arg(long, env = "IPTV_OUTPUT_TYPE", value_enum, default_value_t = OutputType::Mpegts)]
    pub output_type: OutputType,

    /// Local playlist cache file
    #[arg(long, default_value = "tv.m3u8")]
    pub playlist: PathBuf,

    /// Seconds between stall checks
    #[arg(long, default_value = "6")]
    pub poll_interval: u64,

    /// Seconds to wait before resuming a cleanly exited player
    #[arg(long, default_value = "5")]
    pub restart_delay: u64,

    /// Maximum age of the cached playlist, in hours
    #[arg(long, default_value = "12")]
    pub refresh_hours: u64,
}

/// Runtime settings shared by the supervisor and the playlist cache.
#[derive(Clone, Debug)]
pub struct Config {
    pub player: String,
    pub output_type: OutputType,
    pub playlist_url: Option<String>,
    pub playlist_path: PathBuf,
    pub freshness: Duration,
    pub poll_interval: Duration,
    pub restart_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            player: "ffplay".to_string(),
            output_type: OutputType::Mpegts,
            playlist_url: None,
            playlist_path: PathBuf::from("tv.m3u8"),
            freshness: Duration::from_secs(12 * 60 * 60),
            poll_interval: Duration::from_secs(6),
            restart_delay: Duration::from_secs(5),
        }
    }
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            player: args.ffplay.clone(),
            output_type: args.output_type,
            playlist_url: args.iptv_url.clone().filter(|url| !url.is_empty()),
            playlist_path: args.playlist.clone(),
            freshness: Duration::from_secs(args.refresh_hours.saturating_mul(60 * 60)),
            poll_interval: Duration::from_secs(args.poll_interval.max(1)),
            restart_delay: Duration::from_secs(args.restart_delay),
        }
    }
}
