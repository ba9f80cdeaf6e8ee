use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::http::get_text_with_retries;
use crate::progress::{EpisodeList, ItemKind, PlaybackItem};

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(D::Error::custom(format!("unsupported id value {other}"))),
    }
}

/// Catalog durations are whole minutes.
fn minutes_to_seconds(minutes: Option<f64>) -> Option<f64> {
    minutes.map(|minutes| minutes * 60.0)
}

fn optional_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.trim().to_string())),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(other) => Err(D::Error::custom(format!("unsupported id value {other}"))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CatalogMovie {
    #[serde(deserialize_with = "id_string")]
    pub(crate) id: String,
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) duration: Option<f64>,
}

impl CatalogMovie {
    pub(crate) fn to_playback_item(&self) -> PlaybackItem {
        PlaybackItem::movie(self.id.clone())
            .with_title(self.title.clone())
            .with_duration(minutes_to_seconds(self.duration))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CatalogEpisode {
    #[serde(deserialize_with = "id_string")]
    pub(crate) id: String,
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) duration: Option<f64>,
    #[serde(default)]
    pub(crate) season_number: Option<u32>,
    #[serde(default)]
    pub(crate) episode_number: Option<u32>,
    #[serde(default, deserialize_with = "optional_id_string")]
    pub(crate) series_id: Option<String>,
}

impl CatalogEpisode {
    /// Episodes without a season belong to season 1.
    pub(crate) fn season(&self) -> u32 {
        self.season_number.unwrap_or(1)
    }

    pub(crate) fn to_playback_item(&self, series_id: &str) -> PlaybackItem {
        let parent = self
            .series_id
            .clone()
            .unwrap_or_else(|| series_id.to_string());
        PlaybackItem::episode(self.id.clone(), Some(parent))
            .with_title(self.title.clone())
            .with_duration(minutes_to_seconds(self.duration))
    }
}

/// Groups episodes by season: seasons ascending, catalog order within each.
pub(crate) fn group_by_season(episodes: &[CatalogEpisode]) -> BTreeMap<u32, Vec<&CatalogEpisode>> {
    let mut seasons: BTreeMap<u32, Vec<&CatalogEpisode>> = BTreeMap::new();
    for episode in episodes {
        seasons.entry(episode.season()).or_default().push(episode);
    }
    seasons
}

/// Builds the episode list of the season to sequence within. Without an
/// explicit season, the current episode's season is used, then the first
/// season.
pub(crate) fn season_episode_list(
    episodes: &[CatalogEpisode],
    series_id: &str,
    current_episode_id: &str,
    season: Option<u32>,
) -> Option<(u32, EpisodeList)> {
    let seasons = group_by_season(episodes);
    let season = season
        .or_else(|| {
            episodes
                .iter()
                .find(|episode| episode.id == current_episode_id)
                .map(CatalogEpisode::season)
        })
        .or_else(|| seasons.keys().next().copied())?;
    let members = seasons.get(&season)?;
    let items = members
        .iter()
        .map(|episode| episode.to_playback_item(series_id))
        .collect();
    Some((season, EpisodeList::new(items)))
}

/// Where the media for `item` is served from.
pub(crate) fn media_url(base_url: &str, item: &PlaybackItem, season: Option<u32>) -> String {
    match item.kind {
        ItemKind::Movie => format!("{base_url}/static/videos/{}.mp4", item.item_id),
        ItemKind::Episode => format!(
            "{base_url}/static/videos_series/{}/{}/{}.mp4",
            item.parent_id.as_deref().unwrap_or("0"),
            season.unwrap_or(1),
            item.item_id
        ),
    }
}

pub(crate) struct CatalogClient {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
    attempts: usize,
    retry_delay: Duration,
}

impl CatalogClient {
    pub(crate) fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
        attempts: usize,
        retry_delay: Duration,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout,
            attempts,
            retry_delay,
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get_json<T>(&self, path: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{path}", self.base_url);
        let body = get_text_with_retries(
            &url,
            self.token.as_deref(),
            &[],
            self.timeout,
            self.attempts,
            self.retry_delay,
        )
        .with_context(|| format!("catalog request to {url} failed"))?;
        serde_json::from_str(&body).with_context(|| format!("unexpected catalog response from {url}"))
    }

    pub(crate) fn movie(&self, movie_id: &str) -> Result<CatalogMovie> {
        self.get_json(&format!("/movies/{movie_id}"))
    }

    pub(crate) fn episode(&self, episode_id: &str) -> Result<CatalogEpisode> {
        self.get_json(&format!("/episodes/{episode_id}"))
    }

    pub(crate) fn episodes_by_series(&self, series_id: &str) -> Result<Vec<CatalogEpisode>> {
        self.get_json(&format!("/episodes/by_serie/{series_id}"))
    }
}
