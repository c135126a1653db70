/*!
 * Render collaborator: the trait the orchestrator draws through, plus a
 * terminal implementation
 */

use bytes::Bytes;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use lumen_core_resilience::{BoundedCache, CacheStats, ErrorState};

use crate::config::RenderConfig;
use crate::error::{LumenError, Result};
use crate::modes::DisplayMode;

/// Data handed to the renderer for one view
#[derive(Debug, Clone, PartialEq)]
pub struct ViewData {
    pub current: Option<Bytes>,
    pub forecast: Option<Bytes>,
    /// Single active degraded indicator
    pub indicator: ErrorState,
    /// Some payload came from an expired cache entry
    pub stale: bool,
}

impl ViewData {
    /// View with no payloads, for the fallback clock
    pub fn empty(indicator: ErrorState) -> Self {
        Self {
            current: None,
            forecast: None,
            indicator,
            stale: false,
        }
    }
}

/// What happened to a render request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The view is on screen
    Shown,
    /// Nothing to show for this mode; its time goes to the next one
    Skipped,
}

/// Draws views on the physical display.
///
/// Called once per active mode per iteration, never concurrently. Must
/// return promptly; the caller holds the view for `remaining` afterwards.
pub trait Renderer: Send {
    fn render(
        &mut self,
        mode: &DisplayMode,
        view: &ViewData,
        remaining: Duration,
    ) -> Result<RenderOutcome>;

    /// Statistics of any bounded caches the renderer keeps
    fn cache_stats(&self) -> Vec<(&'static str, CacheStats)> {
        Vec::new()
    }
}

/// Renderer printing plain-text frames
pub struct TerminalRenderer<W: Write + Send> {
    out: W,
    asset_dir: Option<PathBuf>,
    /// Banner text per asset name; `None` remembers a missing asset
    assets: BoundedCache<String, Option<String>>,
    /// One-line payload summaries
    summaries: BoundedCache<Bytes, String>,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout(config: &RenderConfig) -> Self {
        Self::new(io::stdout(), config)
    }
}

impl<W: Write + Send> TerminalRenderer<W> {
    pub fn new(out: W, config: &RenderConfig) -> Self {
        Self {
            out,
            asset_dir: config.asset_dir.clone(),
            assets: BoundedCache::new(config.asset_cache_size),
            summaries: BoundedCache::new(config.text_cache_size),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn banner(&mut self, name: &str) -> Result<Option<String>> {
        let Some(dir) = self.asset_dir.clone() else {
            return Ok(None);
        };
        let banner = self
            .assets
            .get_or_try_insert_with(name.to_string(), || {
                match std::fs::read_to_string(dir.join(format!("{}.txt", name))) {
                    Ok(text) => Ok(Some(text)),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e),
                }
            })?;
        Ok(banner.clone())
    }

    fn summary(&mut self, payload: &Bytes) -> Result<String> {
        let summary = self
            .summaries
            .get_or_try_insert_with(payload.clone(), || summarize(payload))?;
        Ok(summary.clone())
    }

    fn frame(&mut self, mode: &DisplayMode, view: &ViewData) -> Result<Option<Vec<String>>> {
        let mut lines = Vec::new();
        match mode {
            DisplayMode::Weather => {
                let Some(current) = &view.current else {
                    return Ok(None);
                };
                lines.push(self.summary(current)?);
            }
            DisplayMode::Forecast => {
                let (Some(current), Some(forecast)) = (&view.current, &view.forecast) else {
                    return Ok(None);
                };
                lines.push(self.summary(current)?);
                lines.push(self.summary(forecast)?);
            }
            DisplayMode::Events => {
                let Some(events) = self.banner("events")? else {
                    return Ok(None);
                };
                lines.extend(events.lines().map(str::to_string));
            }
            DisplayMode::Clock => {
                lines.push(chrono::Local::now().format("%H:%M").to_string());
            }
            DisplayMode::Test => lines.extend(pattern_lines(24)),
            DisplayMode::Scheduled {
                name, progress, ..
            } => {
                if let Some(banner) = self.banner(name)? {
                    lines.extend(banner.lines().map(str::to_string));
                }
                lines.push(progress_bar(*progress, 20));
                if let Some(current) = &view.current {
                    lines.push(self.summary(current)?);
                }
            }
        }
        Ok(Some(lines))
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn render(
        &mut self,
        mode: &DisplayMode,
        view: &ViewData,
        remaining: Duration,
    ) -> Result<RenderOutcome> {
        let Some(lines) = self.frame(mode, view)? else {
            return Ok(RenderOutcome::Skipped);
        };

        let mut header = format!("== {} ({}s)", mode, remaining.as_secs());
        if view.stale {
            header.push_str(" [cached]");
        }
        if !view.indicator.is_nominal() {
            header.push_str(&format!(" [{}]", view.indicator));
        }

        let write = |out: &mut W| -> io::Result<()> {
            writeln!(out, "{}", header)?;
            for line in &lines {
                writeln!(out, "   {}", line)?;
            }
            out.flush()
        };
        write(&mut self.out).map_err(|e| LumenError::Render(format!("{}: {}", mode, e)))?;
        Ok(RenderOutcome::Shown)
    }

    fn cache_stats(&self) -> Vec<(&'static str, CacheStats)> {
        vec![
            ("assets", self.assets.stats()),
            ("summaries", self.summaries.stats()),
        ]
    }
}

/// Compact one-line description of a JSON payload
fn summarize(payload: &Bytes) -> Result<String> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    let (prefix, item) = match &value {
        serde_json::Value::Array(items) => match items.first() {
            Some(first) => (format!("{} entries, first: ", items.len()), first),
            None => return Ok("no entries".to_string()),
        },
        other => (String::new(), other),
    };

    let fields = match item {
        serde_json::Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_object() && !v.is_array() && !v.is_null())
            .take(4)
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect::<Vec<_>>()
            .join(" "),
        scalar => scalar.to_string(),
    };
    Ok(format!("{}{}", prefix, fields))
}

/// Shade ramp, checkerboard and a full row for spotting dead pixels
fn pattern_lines(width: usize) -> Vec<String> {
    const RAMP: [char; 4] = [' ', '\u{2591}', '\u{2592}', '\u{2593}'];
    let ramp: String = (0..width).map(|i| RAMP[i * RAMP.len() / width.max(1)]).collect();
    let checker: String = (0..width)
        .map(|i| if i % 2 == 0 { '\u{2588}' } else { ' ' })
        .collect();
    vec![ramp, checker, "\u{2588}".repeat(width)]
}

fn progress_bar(progress: f64, width: usize) -> String {
    let filled = ((progress.clamp(0.0, 1.0) * width as f64).round() as usize).min(width);
    format!(
        "[{}{}] {:>3.0}%",
        "#".repeat(filled),
        "-".repeat(width - filled),
        progress.clamp(0.0, 1.0) * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn renderer(config: &RenderConfig) -> TerminalRenderer<Vec<u8>> {
        TerminalRenderer::new(Vec::new(), config)
    }

    fn output(renderer: TerminalRenderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    fn current() -> Bytes {
        Bytes::from_static(br#"[{"WeatherText":"Sunny","IsDayTime":true,"Temperature":{"Metric":{"Value":21.5}}}]"#)
    }

    #[test]
    fn test_weather_frame_summarizes_payload() {
        let mut renderer = renderer(&RenderConfig::default());
        let view = ViewData {
            current: Some(current()),
            ..ViewData::empty(ErrorState::Nominal)
        };
        let outcome = renderer
            .render(&DisplayMode::Weather, &view, Duration::from_secs(210))
            .unwrap();
        assert_eq!(outcome, RenderOutcome::Shown);

        let text = output(renderer);
        assert!(text.starts_with("== weather (210s)"));
        assert!(text.contains("1 entries, first: IsDayTime=true WeatherText=Sunny"));
    }

    #[test]
    fn test_missing_data_skips_mode() {
        let mut renderer = renderer(&RenderConfig::default());
        let view = ViewData::empty(ErrorState::Nominal);
        for mode in [DisplayMode::Weather, DisplayMode::Forecast, DisplayMode::Events] {
            assert_eq!(
                renderer.render(&mode, &view, Duration::from_secs(30)).unwrap(),
                RenderOutcome::Skipped
            );
        }
        assert!(output(renderer).is_empty());
    }

    #[test]
    fn test_clock_always_shown_with_indicator() {
        let mut renderer = renderer(&RenderConfig::default());
        let view = ViewData::empty(ErrorState::NoConnectivity);
        renderer
            .render(&DisplayMode::Clock, &view, Duration::from_secs(300))
            .unwrap();
        assert!(output(renderer).contains("[no-connectivity]"));
    }

    #[test]
    fn test_pattern_shown_without_data() {
        let mut renderer = renderer(&RenderConfig::default());
        let outcome = renderer
            .render(
                &DisplayMode::Test,
                &ViewData::empty(ErrorState::Nominal),
                Duration::from_secs(20),
            )
            .unwrap();
        assert_eq!(outcome, RenderOutcome::Shown);

        let text = output(renderer);
        assert!(text.starts_with("== test (20s)"));
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains(&"\u{2588}".repeat(24)));
    }

    #[test]
    fn test_stale_view_is_labelled() {
        let mut renderer = renderer(&RenderConfig::default());
        let view = ViewData {
            current: Some(current()),
            stale: true,
            ..ViewData::empty(ErrorState::StaleData)
        };
        renderer
            .render(&DisplayMode::Weather, &view, Duration::from_secs(60))
            .unwrap();
        let text = output(renderer);
        assert!(text.contains("[cached]"));
        assert!(text.contains("[stale-data]"));
    }

    #[test]
    fn test_invalid_payload_is_error() {
        let mut renderer = renderer(&RenderConfig::default());
        let view = ViewData {
            current: Some(Bytes::from_static(b"<html>")),
            ..ViewData::empty(ErrorState::Nominal)
        };
        let err = renderer
            .render(&DisplayMode::Weather, &view, Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, LumenError::Payload(_)));
    }

    #[test]
    fn test_assets_loaded_once_and_cached() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("events.txt"), "Book club 19:00\n").unwrap();
        let config = RenderConfig {
            asset_dir: Some(dir.path().to_path_buf()),
            ..RenderConfig::default()
        };
        let mut renderer = renderer(&config);
        let view = ViewData::empty(ErrorState::Nominal);

        for _ in 0..3 {
            let outcome = renderer
                .render(&DisplayMode::Events, &view, Duration::from_secs(30))
                .unwrap();
            assert_eq!(outcome, RenderOutcome::Shown);
        }
        let stats = renderer.cache_stats();
        assert_eq!(stats[0].0, "assets");
        assert_eq!(stats[0].1.misses, 1);
        assert_eq!(stats[0].1.hits, 2);
        assert!(output(renderer).contains("Book club 19:00"));
    }

    #[test]
    fn test_scheduled_frame_shows_progress() {
        let mut renderer = renderer(&RenderConfig::default());
        let mode = DisplayMode::Scheduled {
            name: "morning".to_string(),
            segment: 3,
            progress: 0.5,
        };
        renderer
            .render(&mode, &ViewData::empty(ErrorState::Nominal), Duration::from_secs(300))
            .unwrap();
        let text = output(renderer);
        assert!(text.contains("morning #3 (50%)"));
        assert!(text.contains("[##########----------]  50%"));
    }

    #[test]
    fn test_summary_of_plain_object() {
        let payload = Bytes::from_static(br#"{"Headline":"Rain","Severity":3,"Extra":null}"#);
        assert_eq!(summarize(&payload).unwrap(), "Headline=Rain Severity=3");
        assert_eq!(summarize(&Bytes::from_static(b"[]")).unwrap(), "no entries");
    }
}
