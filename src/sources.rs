use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{AdzunaConfig, SourcesConfig};
use crate::error::{PipelineError, Result};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Base backoff after a rate-limit response. Actual delay is
/// base * 2^attempt plus random jitter.
const BACKOFF_BASE: Duration = Duration::from_secs(2);
const MAX_ATTEMPTS: u32 = 3;

/// How much of a failing response body to keep in a diagnostic snapshot.
const SNAPSHOT_MAX_CHARS: usize = 10_000;

/// One search session's query.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub keywords: Vec<String>,
    pub location: String,
}

/// A posting as one source published it, before normalization. Only the
/// normalizer decides what is usable; adapters carry fields as found.
#[derive(Debug, Clone)]
pub struct RawPosting {
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub description: String,
    pub salary: Option<String>,
    pub job_type: Option<String>,
    pub source: String,
}

/// Result of one adapter fetch: the raw postings plus which extraction
/// strategy produced them.
#[derive(Debug)]
pub struct SourceBatch {
    pub postings: Vec<RawPosting>,
    pub strategy: &'static str,
}

/// Resilient extraction of raw postings from one external source.
pub trait SourceAdapter {
    fn name(&self) -> &'static str;
    fn fetch(&self, query: &SearchQuery, client: &mut PoliteClient) -> Result<SourceBatch>;
}

// --- Polite HTTP client ---

pub fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.pow(attempt)
}

/// Blocking HTTP client that enforces a minimum inter-request interval
/// per host and backs off exponentially on rate-limit responses
/// (403/429). Timeouts are bounded; a timeout is a failure, never an
/// indefinite block.
pub struct PoliteClient {
    client: reqwest::blocking::Client,
    min_interval: Duration,
    last_request: HashMap<String, Instant>,
}

impl PoliteClient {
    pub fn new(min_interval: Duration, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::SourceUnavailable {
                src: "http".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            min_interval,
            last_request: HashMap::new(),
        })
    }

    fn wait_politely(&mut self, host: &str) {
        if let Some(last) = self.last_request.get(host) {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                thread::sleep(self.min_interval - elapsed);
            }
        }
    }

    /// Fetch a URL body, respecting per-host pacing and retrying
    /// rate-limit responses with bounded exponential backoff.
    pub fn get(&mut self, url: &str) -> Result<String> {
        let parsed =
            reqwest::Url::parse(url).map_err(|e| PipelineError::SourceUnavailable {
                src: url.to_string(),
                reason: format!("invalid URL: {}", e),
            })?;
        let host = parsed.host_str().unwrap_or("unknown").to_string();

        for attempt in 0..MAX_ATTEMPTS {
            self.wait_politely(&host);
            let response = self.client.get(url).send();
            self.last_request.insert(host.clone(), Instant::now());

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.text().map_err(|e| PipelineError::SourceUnavailable {
                            src: host.clone(),
                            reason: format!("failed to read body: {}", e),
                        });
                    }
                    // 403 and 429 are blocking/rate-limit responses worth
                    // backing off for; anything else will not improve.
                    if status.as_u16() == 403 || status.as_u16() == 429 {
                        if attempt + 1 < MAX_ATTEMPTS {
                            let jitter =
                                Duration::from_millis(rand::thread_rng().gen_range(0..1000));
                            let delay = backoff_delay(attempt) + jitter;
                            warn!(
                                %host,
                                status = status.as_u16(),
                                attempt = attempt + 1,
                                delay_secs = delay.as_secs(),
                                "rate limited, backing off"
                            );
                            thread::sleep(delay);
                            continue;
                        }
                        return Err(PipelineError::SourceUnavailable {
                            src: host,
                            reason: format!("still blocked ({}) after {} attempts", status, MAX_ATTEMPTS),
                        });
                    }
                    return Err(PipelineError::SourceUnavailable {
                        src: host,
                        reason: format!("HTTP {}", status),
                    });
                }
                Err(e) => {
                    return Err(PipelineError::SourceUnavailable {
                        src: host,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Err(PipelineError::SourceUnavailable {
            src: host,
            reason: "retries exhausted".to_string(),
        })
    }
}

// --- Shared helpers ---

/// Run ordered strategies over a fetched document; the first one that
/// yields at least one item wins.
fn first_nonempty<D: ?Sized>(
    doc: &D,
    strategies: &[(&'static str, fn(&D) -> Vec<RawPosting>)],
) -> Option<(&'static str, Vec<RawPosting>)> {
    for (name, strategy) in strategies.iter().copied() {
        let postings = strategy(doc);
        if !postings.is_empty() {
            debug!(strategy = name, count = postings.len(), "extraction strategy matched");
            return Some((name, postings));
        }
    }
    None
}

/// Persist a raw response for later inspection when every strategy came
/// up empty. Best effort: a snapshot failure never blocks the caller.
fn write_failure_snapshot(dir: &Path, source: &str, body: &str) -> Option<PathBuf> {
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{}_{}.html", source, stamp));
    let clipped: String = body.chars().take(SNAPSHOT_MAX_CHARS).collect();

    if let Err(e) = fs::create_dir_all(dir).and_then(|_| fs::write(&path, clipped)) {
        warn!(source, error = %e, "failed to write diagnostic snapshot");
        return None;
    }
    info!(source, path = %path.display(), "saved raw-response snapshot");
    Some(path)
}

fn keyword_filter(postings: Vec<RawPosting>, keywords: &[String]) -> Vec<RawPosting> {
    if keywords.is_empty() {
        return postings;
    }
    postings
        .into_iter()
        .filter(|p| {
            let title = p.title.as_deref().unwrap_or("").to_lowercase();
            keywords.iter().any(|kw| title.contains(&kw.to_lowercase()))
        })
        .collect()
}

fn encode_query(s: &str) -> String {
    s.trim().replace(' ', "+")
}

fn value_to_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// --- RemoteOK ---

/// JSON API for remote listings. The response is an array whose first
/// element is a legal-notice blob, not a posting.
pub struct RemoteOkSource {
    snapshots_dir: PathBuf,
}

const REMOTEOK_URL: &str = "https://remoteok.com/api";

#[derive(Debug, Deserialize)]
struct RemoteOkItem {
    position: Option<String>,
    company: Option<String>,
    url: Option<String>,
    description: Option<String>,
    location: Option<String>,
    salary_min: Option<serde_json::Value>,
}

fn parse_remoteok_typed(body: &str) -> Vec<RawPosting> {
    let Ok(items) = serde_json::from_str::<Vec<RemoteOkItem>>(body) else {
        return Vec::new();
    };
    items
        .into_iter()
        .skip(1) // metadata element
        .filter(|item| item.position.as_deref().is_some_and(|p| !p.trim().is_empty()))
        .map(|item| RawPosting {
            title: item.position,
            company: item.company,
            location: item.location,
            url: item.url,
            description: item.description.unwrap_or_default(),
            salary: item.salary_min.as_ref().and_then(value_to_string),
            job_type: Some("remote".to_string()),
            source: "remoteok".to_string(),
        })
        .collect()
}

/// Drift-tolerant fallback: walk the JSON generically and accept either
/// the current field names or their common renames.
fn parse_remoteok_lenient(body: &str) -> Vec<RawPosting> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return Vec::new();
    };
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let title = obj
                .get("position")
                .or_else(|| obj.get("title"))
                .and_then(value_to_string)?;
            Some(RawPosting {
                title: Some(title),
                company: obj
                    .get("company")
                    .or_else(|| obj.get("company_name"))
                    .and_then(value_to_string),
                location: obj.get("location").and_then(value_to_string),
                url: obj
                    .get("url")
                    .or_else(|| obj.get("apply_url"))
                    .and_then(value_to_string),
                description: obj
                    .get("description")
                    .and_then(value_to_string)
                    .unwrap_or_default(),
                salary: obj
                    .get("salary_min")
                    .or_else(|| obj.get("salary"))
                    .and_then(value_to_string),
                job_type: Some("remote".to_string()),
                source: "remoteok".to_string(),
            })
        })
        .collect()
}

const REMOTEOK_STRATEGIES: &[(&str, fn(&str) -> Vec<RawPosting>)] = &[
    ("typed-api", parse_remoteok_typed),
    ("lenient-json", parse_remoteok_lenient),
];

impl RemoteOkSource {
    pub fn new(snapshots_dir: &Path) -> Self {
        Self {
            snapshots_dir: snapshots_dir.to_path_buf(),
        }
    }
}

impl SourceAdapter for RemoteOkSource {
    fn name(&self) -> &'static str {
        "remoteok"
    }

    fn fetch(&self, query: &SearchQuery, client: &mut PoliteClient) -> Result<SourceBatch> {
        let body = client.get(REMOTEOK_URL)?;

        match first_nonempty(body.as_str(), REMOTEOK_STRATEGIES) {
            Some((strategy, postings)) => Ok(SourceBatch {
                postings: keyword_filter(postings, &query.keywords),
                strategy,
            }),
            None => {
                write_failure_snapshot(&self.snapshots_dir, self.name(), &body);
                Err(PipelineError::SourceUnavailable {
                    src: self.name().to_string(),
                    reason: "no extraction strategy produced postings".to_string(),
                })
            }
        }
    }
}

// --- HTML job board ---

/// Generic listing-page scraper for an Indeed-style board. Markup drifts
/// constantly, so card location is an ordered list of selector
/// strategies and field extraction inside a card is its own fallback
/// chain.
pub struct BoardSource {
    mirrors: Vec<String>,
    snapshots_dir: PathBuf,
}

const CARD_TITLE_SELECTORS: &[&str] = &[
    "h2.jobTitle span[title]",
    "h2.jobTitle a span",
    "h2.jobTitle",
    "a[data-testid='job-title']",
];

const CARD_COMPANY_SELECTORS: &[&str] = &[
    "span.companyName",
    "div.companyName",
    "a[data-testid='company-name']",
    "span[data-testid='company-name']",
];

const CARD_LOCATION_SELECTORS: &[&str] = &["div.companyLocation", "div[data-testid='text-location']"];

const CARD_SALARY_SELECTORS: &[&str] = &[
    "div.salary-snippet",
    "div[data-testid='attribute_snippet_testid']",
    "span.salary-snippet-container",
];

fn select_first_text(card: scraper::ElementRef, selectors: &[&str]) -> Option<String> {
    for sel in selectors {
        let Ok(selector) = Selector::parse(sel) else {
            continue;
        };
        if let Some(element) = card.select(&selector).next() {
            // Prefer the title attribute when present; Indeed stores the
            // untruncated text there.
            if let Some(attr) = element.value().attr("title") {
                if !attr.trim().is_empty() {
                    return Some(attr.trim().to_string());
                }
            }
            let text = element.text().collect::<Vec<_>>().join(" ");
            let text = text.trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

fn extract_cards(doc: &Html, card_selector: &str) -> Vec<RawPosting> {
    let Ok(selector) = Selector::parse(card_selector) else {
        return Vec::new();
    };
    let link_selector = Selector::parse("h2.jobTitle a, a[data-testid='job-title']").ok();

    doc.select(&selector)
        .filter_map(|card| {
            let title = select_first_text(card, CARD_TITLE_SELECTORS)?;
            let url = link_selector
                .as_ref()
                .and_then(|s| card.select(s).next())
                .and_then(|a| a.value().attr("href"))
                .map(String::from);
            let description: String = card
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .chars()
                .take(300)
                .collect();

            Some(RawPosting {
                title: Some(title),
                company: select_first_text(card, CARD_COMPANY_SELECTORS),
                location: select_first_text(card, CARD_LOCATION_SELECTORS),
                url,
                description,
                salary: select_first_text(card, CARD_SALARY_SELECTORS),
                job_type: None,
                source: "board".to_string(),
            })
        })
        .collect()
}

fn cards_seen_beacon(doc: &Html) -> Vec<RawPosting> {
    extract_cards(doc, "div.job_seen_beacon")
}

fn cards_serp(doc: &Html) -> Vec<RawPosting> {
    extract_cards(doc, "div.jobsearch-SerpJobCard")
}

fn cards_outline(doc: &Html) -> Vec<RawPosting> {
    extract_cards(doc, "div.cardOutline")
}

fn cards_result_content(doc: &Html) -> Vec<RawPosting> {
    extract_cards(doc, "td.resultContent")
}

const BOARD_STRATEGIES: &[(&str, fn(&Html) -> Vec<RawPosting>)] = &[
    ("seen-beacon", cards_seen_beacon),
    ("serp-card", cards_serp),
    ("card-outline", cards_outline),
    ("result-content", cards_result_content),
];

impl BoardSource {
    pub fn new(mirrors: Vec<String>, snapshots_dir: &Path) -> Self {
        Self {
            mirrors,
            snapshots_dir: snapshots_dir.to_path_buf(),
        }
    }

    fn search_url(mirror: &str, query: &SearchQuery) -> String {
        format!(
            "{}/jobs?q={}&l={}",
            mirror.trim_end_matches('/'),
            encode_query(&query.keywords.join(" ")),
            encode_query(&query.location)
        )
    }

    /// Resolve card-relative hrefs against the mirror that served them.
    fn absolutize(mirror: &str, postings: &mut [RawPosting]) {
        let base = mirror.trim_end_matches('/');
        for posting in postings {
            if let Some(url) = posting.url.take() {
                posting.url = Some(if url.starts_with('/') {
                    format!("{}{}", base, url)
                } else {
                    url
                });
            }
        }
    }
}

impl SourceAdapter for BoardSource {
    fn name(&self) -> &'static str {
        "board"
    }

    fn fetch(&self, query: &SearchQuery, client: &mut PoliteClient) -> Result<SourceBatch> {
        let mut last_body: Option<String> = None;

        for mirror in &self.mirrors {
            let url = Self::search_url(mirror, query);
            info!(%url, "searching job board mirror");

            let body = match client.get(&url) {
                Ok(body) => body,
                Err(e) => {
                    warn!(mirror = %mirror, error = %e, "mirror fetch failed, trying next");
                    continue;
                }
            };

            let doc = Html::parse_document(&body);
            if let Some((strategy, mut postings)) = first_nonempty(&doc, BOARD_STRATEGIES) {
                Self::absolutize(mirror, &mut postings);
                return Ok(SourceBatch { postings, strategy });
            }
            last_body = Some(body);
        }

        if let Some(body) = &last_body {
            write_failure_snapshot(&self.snapshots_dir, self.name(), body);
        }
        Err(PipelineError::SourceUnavailable {
            src: self.name().to_string(),
            reason: format!(
                "no extraction strategy produced postings across {} mirror(s)",
                self.mirrors.len()
            ),
        })
    }
}

// --- Adzuna API ---

/// Credentialed JSON API; only built when app_id/app_key are configured.
pub struct AdzunaSource {
    config: AdzunaConfig,
    snapshots_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct AdzunaCompany {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdzunaLocation {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AdzunaItem {
    title: Option<String>,
    company: Option<AdzunaCompany>,
    redirect_url: Option<String>,
    description: Option<String>,
    salary_min: Option<f64>,
    location: Option<AdzunaLocation>,
}

#[derive(Debug, Deserialize)]
struct AdzunaResponse {
    results: Vec<AdzunaItem>,
}

fn parse_adzuna_typed(body: &str) -> Vec<RawPosting> {
    let Ok(parsed) = serde_json::from_str::<AdzunaResponse>(body) else {
        return Vec::new();
    };
    parsed
        .results
        .into_iter()
        .filter(|item| item.title.as_deref().is_some_and(|t| !t.trim().is_empty()))
        .map(|item| RawPosting {
            title: item.title,
            company: item.company.and_then(|c| c.display_name),
            location: item.location.and_then(|l| l.display_name),
            url: item.redirect_url,
            description: item.description.unwrap_or_default(),
            salary: item.salary_min.map(|s| format!("{}", s as i64)),
            job_type: None,
            source: "adzuna".to_string(),
        })
        .collect()
}

fn parse_adzuna_lenient(body: &str) -> Vec<RawPosting> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return Vec::new();
    };
    let Some(results) = value.get("results").and_then(|r| r.as_array()) else {
        return Vec::new();
    };

    results
        .iter()
        .filter_map(|item| {
            let title = item.get("title").and_then(value_to_string)?;
            Some(RawPosting {
                title: Some(title),
                company: item
                    .get("company")
                    .and_then(|c| c.get("display_name"))
                    .or_else(|| item.get("company"))
                    .and_then(value_to_string),
                location: item
                    .get("location")
                    .and_then(|l| l.get("display_name"))
                    .and_then(value_to_string),
                url: item.get("redirect_url").and_then(value_to_string),
                description: item
                    .get("description")
                    .and_then(value_to_string)
                    .unwrap_or_default(),
                salary: item.get("salary_min").and_then(value_to_string),
                job_type: None,
                source: "adzuna".to_string(),
            })
        })
        .collect()
}

const ADZUNA_STRATEGIES: &[(&str, fn(&str) -> Vec<RawPosting>)] = &[
    ("typed-api", parse_adzuna_typed),
    ("lenient-json", parse_adzuna_lenient),
];

impl AdzunaSource {
    pub fn new(config: AdzunaConfig, snapshots_dir: &Path) -> Self {
        Self {
            config,
            snapshots_dir: snapshots_dir.to_path_buf(),
        }
    }
}

impl SourceAdapter for AdzunaSource {
    fn name(&self) -> &'static str {
        "adzuna"
    }

    fn fetch(&self, query: &SearchQuery, client: &mut PoliteClient) -> Result<SourceBatch> {
        let url = format!(
            "https://api.adzuna.com/v1/api/jobs/{}/search/1?app_id={}&app_key={}&what={}&where={}&results_per_page=20",
            self.config.country,
            self.config.app_id,
            self.config.app_key,
            encode_query(&query.keywords.join(" ")),
            encode_query(&query.location),
        );
        let body = client.get(&url)?;

        match first_nonempty(body.as_str(), ADZUNA_STRATEGIES) {
            Some((strategy, postings)) => Ok(SourceBatch { postings, strategy }),
            None => {
                write_failure_snapshot(&self.snapshots_dir, self.name(), &body);
                Err(PipelineError::SourceUnavailable {
                    src: self.name().to_string(),
                    reason: "no extraction strategy produced postings".to_string(),
                })
            }
        }
    }
}

/// Assemble the adapters the config enables, in a stable order.
pub fn build_sources(config: &SourcesConfig, snapshots_dir: &Path) -> Vec<Box<dyn SourceAdapter>> {
    let mut sources: Vec<Box<dyn SourceAdapter>> = Vec::new();
    if config.remoteok {
        sources.push(Box::new(RemoteOkSource::new(snapshots_dir)));
    }
    if !config.board_mirrors.is_empty() {
        sources.push(Box::new(BoardSource::new(
            config.board_mirrors.clone(),
            snapshots_dir,
        )));
    }
    if let Some(adzuna) = &config.adzuna {
        sources.push(Box::new(AdzunaSource::new(adzuna.clone(), snapshots_dir)));
    }
    sources
}
