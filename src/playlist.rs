use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

const EXTINF: &str = "#EXTINF";

/// Name fragments that mark duplicate or non-live variants of a channel.
const IGNORE_NAMES: &[&str] = &["SD", "FHD", "4K", "24H"];

/// Containers that are VOD files rather than live streams.
const IGNORE_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".avi"];

lazy_static! {
    static ref NAME_REGEX: Regex = Regex::new(r#"tvg-name="([^"]+)""#).unwrap();
    static ref LOGO_REGEX: Regex = Regex::new(r#"tvg-logo="([^"]+)""#).unwrap();
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub url: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
}

/// Channels keyed by upper-cased name, listed in first-seen order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelDirectory {
    channels: Vec<Channel>,
    index: HashMap<String, usize>,
}

impl ChannelDirectory {
    /// Insert a channel, replacing an earlier one with the same name in place.
    pub fn insert(&mut self, channel: Channel) {
        match self.index.get(&channel.name) {
            Some(&position) => self.channels[position] = channel,
            None => {
                self.index.insert(channel.name.clone(), self.channels.len());
                self.channels.push(channel);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.index.get(name).map(|&position| &self.channels[position])
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }
}

/// Parse M3U text into a channel directory.
///
/// A `#EXTINF` line carrying a `tvg-name` attribute is paired with the line
/// that follows it, which holds the stream URL. Entries without a name, with
/// a VOD container URL, or with an ignored name fragment are dropped.
pub fn parse(text: &str) -> ChannelDirectory {
    let mut directory = ChannelDirectory::default();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        if !is_marker(line) {
            continue;
        }

        // A marker directly followed by another marker (or by nothing) has no URL
        let url = match lines.peek() {
            Some(next) if !is_marker(next) => lines.next().map(str::trim),
            _ => None,
        };
        let Some(url) = url else {
            continue;
        };

        let Some(name) = capture(&NAME_REGEX, line)
            .map(|name| name.trim().to_uppercase())
            .filter(|name| !name.is_empty())
        else {
            continue;
        };

        if is_ignored(&name, url) {
            continue;
        }

        directory.insert(Channel {
            url: url.to_string(),
            name,
            logo: capture(&LOGO_REGEX, line).map(str::to_string),
        });
    }

    tracing::info!("channels: {}", directory.len());
    directory
}

fn is_marker(line: &str) -> bool {
    line.starts_with(EXTINF)
}

fn capture<'a>(regex: &Regex, line: &'a str) -> Option<&'a str> {
    regex
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn is_ignored(name: &str, url: &str) -> bool {
    IGNORE_EXTENSIONS.iter().any(|ext| url.ends_with(ext))
        || IGNORE_NAMES.iter().any(|fragment| name.contains(fragment))
}
