//! Page-target discovery and per-tab monitor supervision.
//!
//! Chrome exposes `/json/list` on its remote debugging port. The supervisor
//! polls it, attaches a [`TabMonitor`] to every new page target and tears
//! monitors down when their target disappears or their connection drops.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tabscope_core::{Config, Error, Result};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::tab::TabMonitor;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageTarget {
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub web_socket_debugger_url: Option<String>,
}

impl PageTarget {
    /// Host of the page URL, used as the correlation report hostname.
    pub fn hostname(&self) -> String {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }
}

/// Fetch all targets and keep attachable pages.
pub async fn list_page_targets(base_url: &str) -> Result<Vec<PageTarget>> {
    let url = format!("{}/json/list", base_url.trim_end_matches('/'));
    let resp = reqwest::get(&url)
        .await
        .map_err(|e| Error::Cdp(format!("Failed to query {}: {}", url, e)))?;
    let targets: Vec<PageTarget> = resp
        .json()
        .await
        .map_err(|e| Error::Cdp(format!("Invalid target list from {}: {}", url, e)))?;
    Ok(page_targets(targets))
}

pub fn page_targets(targets: Vec<PageTarget>) -> Vec<PageTarget> {
    targets
        .into_iter()
        .filter(|t| t.kind == "page" && t.web_socket_debugger_url.is_some())
        .collect()
}

/// Split the current target list into targets to attach and ids to drop.
pub fn diff_targets<'a>(
    known: &HashSet<String>,
    current: &'a [PageTarget],
) -> (Vec<&'a PageTarget>, Vec<String>) {
    let current_ids: HashSet<&str> = current.iter().map(|t| t.id.as_str()).collect();
    let added = current.iter().filter(|t| !known.contains(&t.id)).collect();
    let removed = known
        .iter()
        .filter(|id| !current_ids.contains(id.as_str()))
        .cloned()
        .collect();
    (added, removed)
}

pub struct TabSupervisor {
    config: Config,
    records_dir: PathBuf,
    monitors: HashMap<String, TabMonitor>,
}

impl TabSupervisor {
    pub fn new(config: Config, records_dir: PathBuf) -> Self {
        Self {
            config,
            records_dir,
            monitors: HashMap::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let base_url = self.config.devtools_base_url();
        let interval = Duration::from_secs(self.config.discovery.poll_interval_secs.max(1));
        info!(url = %base_url, records = %self.records_dir.display(), "Tab discovery starting");

        loop {
            if let Err(e) = self.poll_once(&base_url).await {
                warn!(error = %e, "Target discovery failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => {
                    info!("Tab discovery shutting down");
                    break;
                }
            }
        }

        for (id, monitor) in self.monitors.drain() {
            debug!(target_id = %id, "Stopping tab monitor");
            monitor.shutdown();
        }
        Ok(())
    }

    async fn poll_once(&mut self, base_url: &str) -> Result<()> {
        self.monitors.retain(|id, monitor| {
            let alive = !monitor.is_finished();
            if !alive {
                info!(target_id = %id, "Tab monitor exited");
            }
            alive
        });

        let targets = list_page_targets(base_url).await?;
        let known: HashSet<String> = self.monitors.keys().cloned().collect();
        let (added, removed) = diff_targets(&known, &targets);

        for id in removed {
            if let Some(monitor) = self.monitors.remove(&id) {
                info!(target_id = %id, "Tab closed, detaching");
                monitor.shutdown();
            }
        }

        for target in added {
            match TabMonitor::spawn(target.clone(), &self.config, &self.records_dir).await {
                Ok(monitor) => {
                    info!(target_id = %target.id, url = %target.url, "Attached to tab");
                    self.monitors.insert(target.id.clone(), monitor);
                }
                Err(e) => {
                    warn!(target_id = %target.id, error = %e, "Failed to attach to tab");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn targets() -> Vec<PageTarget> {
        serde_json::from_value(json!([
            {
                "id": "A",
                "type": "page",
                "url": "https://app.test/home",
                "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/page/A"
            },
            {
                "id": "B",
                "type": "service_worker",
                "url": "https://app.test/sw.js",
                "webSocketDebuggerUrl": "ws://x/B"
            },
            {"id": "C", "type": "page", "url": "chrome://newtab/"},
            {
                "id": "D",
                "type": "page",
                "url": "http://localhost:3000/",
                "webSocketDebuggerUrl": "ws://x/D"
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_only_attachable_pages_are_kept() {
        let pages = page_targets(targets());
        let ids: Vec<&str> = pages.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "D"]);
    }

    #[test]
    fn test_hostname() {
        let pages = page_targets(targets());
        assert_eq!(pages[0].hostname(), "app.test");
        assert_eq!(pages[1].hostname(), "localhost");
    }

    #[test]
    fn test_diff_targets() {
        let pages = page_targets(targets());
        let known: HashSet<String> = ["A".to_string(), "Z".to_string()].into_iter().collect();
        let (added, removed) = diff_targets(&known, &pages);
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].id, "D");
        assert_eq!(removed, vec!["Z".to_string()]);
    }
}
