mod format;


use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::catalog::{CatalogClient, group_by_season, media_url, season_episode_list};
use crate::cli::{Cli, Command, WatchTarget};
use crate::config::Settings;
use crate::db::Database;
use crate::progress::{
    ConsoleSurface, EpisodeList, HttpProgressStore, ItemKind, LocalProgressStore, PlaybackItem,
    PlaybackSession, PumpEnd, RemoteProgressStore, SessionPhase, StaticCredential, VideoSurface,
    next_episode, observe, parse_stored_seconds, read_local_seconds, resolve,
};

use self::format::{format_clock, format_position, format_updated_at, truncate};

/// How long a finished session waits for its remote writes before exiting.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run(cli: Cli) -> Result<()> {
    let settings = Settings::from_env(cli.backend.as_deref())?;
    let db = open_db(&settings.db_path)?;
    let app = App::new(settings, db)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.command {
        Command::Watch { target } => {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            app.run_watch(target, &mut input, &mut out)
        }
        command => app.run_command(command, &mut out),
    }
}

fn open_db(path: &Path) -> Result<Database> {
    let db = Database::open(path)?;
    db.migrate()?;
    Ok(db)
}

/// What a `watch` run goes through: the first item, its season's episodes
/// and whether to roll into the next one.
pub(crate) struct WatchPlan {
    pub(crate) item: PlaybackItem,
    pub(crate) episodes: EpisodeList,
    pub(crate) season: Option<u32>,
    pub(crate) auto_next: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WatchSummary {
    pub(crate) watched: Vec<String>,
    pub(crate) last_persisted_seconds: u64,
    pub(crate) ended: bool,
}

pub(crate) struct App {
    settings: Settings,
    db: Rc<Database>,
    remote: Arc<dyn RemoteProgressStore>,
    catalog: CatalogClient,
}

impl App {
    pub(crate) fn new(settings: Settings, db: Database) -> Result<Self> {
        let token = db.token()?;
        let credential = Arc::new(StaticCredential::new(token.clone()));
        let remote = Arc::new(HttpProgressStore::new(
            &settings.backend_url,
            settings.http_timeout,
            credential,
        ));
        let catalog = CatalogClient::new(
            &settings.backend_url,
            token,
            settings.http_timeout,
            settings.catalog_attempts,
            settings.catalog_retry_delay,
        );
        Ok(Self {
            settings,
            db: Rc::new(db),
            remote,
            catalog,
        })
    }

    pub(crate) fn run_command<W: Write>(&self, command: Command, out: &mut W) -> Result<()> {
        match command {
            Command::Resume { kind, id, series } => self.run_resume(kind.into(), &id, series, out),
            Command::Next {
                series,
                episode,
                season,
            } => self.run_next(&series, &episode, season, out),
            Command::Episodes { series } => self.run_episodes(&series, out),
            Command::List => self.run_list(out),
            Command::Login { token } => self.run_login(&token, out),
            Command::Logout => self.run_logout(out),
            Command::Watch { .. } => bail!("watch needs an input stream"),
        }
    }

    fn run_resume<W: Write>(
        &self,
        kind: ItemKind,
        id: &str,
        series: Option<String>,
        out: &mut W,
    ) -> Result<()> {
        let item = match kind {
            ItemKind::Movie => PlaybackItem::movie(id),
            ItemKind::Episode => PlaybackItem::episode(id, series),
        };
        let record = resolve(&item, self.remote.as_ref(), self.db.as_ref());
        match (record.resume_prompt(), record.source) {
            (Some(prompt), Some(source)) => writeln!(
                out,
                "{}: {prompt} [{}]",
                item.display_name(),
                source.label()
            )?,
            _ => writeln!(out, "{}: no saved progress, starts at 0:00", item.display_name())?,
        }
        Ok(())
    }

    fn run_next<W: Write>(
        &self,
        series_id: &str,
        episode_id: &str,
        season: Option<u32>,
        out: &mut W,
    ) -> Result<()> {
        let episodes = self.catalog.episodes_by_series(series_id)?;
        let Some((season, list)) = season_episode_list(&episodes, series_id, episode_id, season)
        else {
            writeln!(out, "No episodes found for series {series_id}.")?;
            return Ok(());
        };
        if list.position(episode_id).is_none() {
            writeln!(out, "Episode {episode_id} is not part of season {season}.")?;
            return Ok(());
        }
        match next_episode(episode_id, &list) {
            Some(next) => writeln!(
                out,
                "Next in season {season}: {} (episode id {})",
                next.display_name(),
                next.item_id
            )?,
            None => writeln!(out, "Episode {episode_id} is the last one in season {season}.")?,
        }
        Ok(())
    }

    fn run_episodes<W: Write>(&self, series_id: &str, out: &mut W) -> Result<()> {
        let episodes = self.catalog.episodes_by_series(series_id)?;
        if episodes.is_empty() {
            writeln!(out, "No episodes found for series {series_id}.")?;
            return Ok(());
        }

        for (season, members) in group_by_season(&episodes) {
            writeln!(out, "Season {season}")?;
            writeln!(out, "  {:<4} {:<10} {:<40} {:<16}", "EP", "ID", "TITLE", "PROGRESS")?;
            for episode in members {
                let item = episode.to_playback_item(series_id);
                let progress = read_local_seconds(&item, self.db.as_ref())
                    .filter(|seconds| *seconds > 0.0)
                    .map(|seconds| format_position(&item, seconds))
                    .unwrap_or_else(|| "-".to_string());
                let number = episode
                    .episode_number
                    .map(|number| number.to_string())
                    .unwrap_or_else(|| "-".to_string());
                writeln!(
                    out,
                    "  {:<4} {:<10} {:<40} {:<16}",
                    number,
                    truncate(&item.item_id, 10),
                    truncate(&episode.title, 40),
                    progress
                )?;
            }
        }
        Ok(())
    }

    fn run_list<W: Write>(&self, out: &mut W) -> Result<()> {
        let entries = self.db.list_progress()?;
        if entries.is_empty() {
            writeln!(out, "No local progress saved yet. Run `cinetrack watch` first.")?;
            return Ok(());
        }

        writeln!(out, "{:<8} {:<20} {:<10} {:<28}", "KIND", "ID", "POSITION", "UPDATED")?;
        for entry in entries {
            let (kind, id) = match ItemKind::parse_local_key(&entry.key) {
                Some((kind, id)) => (kind.label(), id.to_string()),
                None => ("other", entry.key.clone()),
            };
            let position = parse_stored_seconds(&entry.value)
                .map(format_clock)
                .unwrap_or_else(|| entry.value.clone());
            writeln!(
                out,
                "{:<8} {:<20} {:<10} {:<28}",
                kind,
                truncate(&id, 20),
                position,
                format_updated_at(&entry.updated_at)
            )?;
        }
        Ok(())
    }

    fn run_login<W: Write>(&self, token: &str, out: &mut W) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            bail!("token must not be empty");
        }
        self.db.save_token(token)?;
        writeln!(out, "Token saved. Remote progress is enabled.")?;
        Ok(())
    }

    fn run_logout<W: Write>(&self, out: &mut W) -> Result<()> {
        if self.db.clear_token()? {
            writeln!(out, "Token removed. Progress will only be kept on this device.")?;
        } else {
            writeln!(out, "No token stored.")?;
        }
        Ok(())
    }

    pub(crate) fn run_watch<R: BufRead, W: Write>(
        &self,
        target: WatchTarget,
        input: &mut R,
        out: &mut W,
    ) -> Result<()> {
        let plan = self.plan_watch(target);
        let summary = self.watch(plan, input, out)?;
        info!(
            watched = summary.watched.len(),
            last_persisted_seconds = summary.last_persisted_seconds,
            ended = summary.ended,
            "watch finished"
        );
        Ok(())
    }

    /// Catalog metadata only decorates a session, so lookups that fail fall
    /// back to bare items.
    pub(crate) fn plan_watch(&self, target: WatchTarget) -> WatchPlan {
        match target {
            WatchTarget::Movie { id } => {
                let item = match self.catalog.movie(&id) {
                    Ok(movie) => movie.to_playback_item(),
                    Err(err) => {
                        warn!(movie_id = %id, "movie details unavailable: {err:#}");
                        PlaybackItem::movie(id)
                    }
                };
                WatchPlan {
                    item,
                    episodes: EpisodeList::default(),
                    season: None,
                    auto_next: false,
                }
            }
            WatchTarget::Episode {
                id,
                series,
                season,
                auto_next,
            } => {
                let Some(series) = series.or_else(|| self.series_of_episode(&id)) else {
                    return WatchPlan {
                        item: PlaybackItem::episode(id, None),
                        episodes: EpisodeList::default(),
                        season,
                        auto_next,
                    };
                };
                let catalog_episodes = match self.catalog.episodes_by_series(&series) {
                    Ok(episodes) => episodes,
                    Err(err) => {
                        warn!(series_id = %series, "episode list unavailable: {err:#}");
                        Vec::new()
                    }
                };
                let (season, episodes) =
                    match season_episode_list(&catalog_episodes, &series, &id, season) {
                        Some((season, episodes)) => (Some(season), episodes),
                        None => (season, EpisodeList::default()),
                    };
                debug!(
                    series_id = %series,
                    season = season.unwrap_or(1),
                    episodes = episodes.len(),
                    "season episode list built"
                );
                if auto_next && episodes.is_empty() {
                    warn!(series_id = %series, "no episode list; --auto-next will stop after this episode");
                }
                let item = episodes
                    .position(&id)
                    .and_then(|index| episodes.get(index))
                    .cloned()
                    .unwrap_or_else(|| PlaybackItem::episode(id, Some(series)));
                WatchPlan {
                    item,
                    episodes,
                    season,
                    auto_next,
                }
            }
        }
    }

    fn series_of_episode(&self, episode_id: &str) -> Option<String> {
        match self.catalog.episode(episode_id) {
            Ok(episode) => episode.series_id,
            Err(err) => {
                warn!(episode_id, "episode details unavailable: {err:#}");
                None
            }
        }
    }

    pub(crate) fn watch<R: BufRead, W: Write>(
        &self,
        plan: WatchPlan,
        input: &mut R,
        out: &mut W,
    ) -> Result<WatchSummary> {
        let local: Rc<dyn LocalProgressStore> = self.db.clone();
        let mut summary = WatchSummary {
            watched: Vec::new(),
            last_persisted_seconds: 0,
            ended: false,
        };
        let mut current = plan.item;

        loop {
            let session = PlaybackSession::start(
                current.clone(),
                plan.episodes.clone(),
                Arc::clone(&self.remote),
                Rc::clone(&local),
                self.settings.write_policy,
            );
            match session.resume_point().resume_prompt() {
                Some(prompt) => writeln!(out, "{}: {prompt}", current.display_name())?,
                None => writeln!(out, "{}: starting from the beginning", current.display_name())?,
            }

            let source_url = media_url(self.catalog.base_url(), &current, plan.season);
            let session = Rc::new(RefCell::new(session));
            let end = pump_session(&session, &source_url, input, out)
                .context("video surface stream failed")?;

            let session = session.borrow();
            if !session.wait_idle(DRAIN_TIMEOUT) {
                warn!(
                    pending = session.pending_writes(),
                    "remote progress writes still running at exit"
                );
            }
            let persisted = session.last_persisted_seconds();
            writeln!(
                out,
                "Saved position for {}: {}",
                session.item().display_name(),
                format_position(session.item(), persisted as f64)
            )?;
            summary.watched.push(session.item().item_id.clone());
            summary.last_persisted_seconds = persisted;
            summary.ended = matches!(session.phase(), SessionPhase::Ended { .. });

            if end == PumpEnd::EndOfInput {
                break;
            }
            let Some(next) = session.advance_target().cloned() else {
                writeln!(out, "Finished. No further episode in this season.")?;
                break;
            };
            if !plan.auto_next {
                writeln!(
                    out,
                    "Up next: {} (episode id {})",
                    next.display_name(),
                    next.item_id
                )?;
                break;
            }
            writeln!(out, "Continuing with {}", next.display_name())?;
            current = next;
        }

        Ok(summary)
    }
}

fn pump_session<R: BufRead, W: Write>(
    session: &Rc<RefCell<PlaybackSession>>,
    source_url: &str,
    input: &mut R,
    out: &mut W,
) -> io::Result<PumpEnd> {
    let mut surface = ConsoleSurface::new(out);
    session.borrow_mut().attach(&mut surface, source_url)?;
    let subscription = observe(session, surface.events());
    let end = surface.pump(input);
    subscription.unsubscribe();
    end
}
