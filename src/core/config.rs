use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// CrawlConfig — file-based config loader (certcrawl.json) with env-var fallback
// ---------------------------------------------------------------------------

/// Top-level config loaded from `certcrawl.json`. Every field is optional in
/// the file; the `resolve_*` accessors apply the env-var fallback and the
/// built-in default.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct CrawlConfig {
    /// HTTP/WebSocket listen port.
    pub port: Option<u16>,
    /// Explicit Chromium-family executable path (skips auto-discovery).
    pub chrome_executable: Option<String>,
    /// Seconds between CAPTCHA resolution probes.
    pub captcha_poll_interval_secs: Option<u64>,
    /// Maximum number of CAPTCHA resolution probes before giving up.
    pub captcha_poll_budget: Option<u32>,
    /// Wall-clock duration of a `captcha_pause` step.
    pub captcha_pause_secs: Option<u64>,
    /// Path to an `automations.json` overriding the built-in catalog.
    pub automations_file: Option<String>,
    /// Directory the default context provider reads `{propertyId}.json` from.
    pub context_dir: Option<String>,
    /// Maximum number of concurrently running hidden browser sessions.
    pub run_limit: Option<usize>,
}

impl CrawlConfig {
    /// Listen port: JSON field → `CERTCRAWL_PORT` / `PORT` env var → 8090.
    pub fn resolve_port(&self) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        for k in ["CERTCRAWL_PORT", "PORT"] {
            if let Ok(v) = std::env::var(k) {
                if let Ok(p) = v.trim().parse::<u16>() {
                    return p;
                }
            }
        }
        8090
    }

    /// Browser executable override: JSON field → `CHROME_EXECUTABLE` env var.
    ///
    /// Only returns a value that points at an existing path; anything else
    /// falls through to auto-discovery (see `browser::launcher`).
    pub fn resolve_chrome_executable(&self) -> Option<String> {
        let candidate = self
            .chrome_executable
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| std::env::var("CHROME_EXECUTABLE").ok());
        candidate.filter(|p| Path::new(p).exists())
    }

    /// CAPTCHA probe interval: JSON field → `CERTCRAWL_CAPTCHA_POLL_SECS` → 1 s.
    pub fn resolve_captcha_poll_interval(&self) -> Duration {
        let secs = self
            .captcha_poll_interval_secs
            .or_else(|| env_u64("CERTCRAWL_CAPTCHA_POLL_SECS"))
            .unwrap_or(1)
            .max(1);
        Duration::from_secs(secs)
    }

    /// CAPTCHA probe budget: JSON field → `CERTCRAWL_CAPTCHA_POLL_BUDGET` → 300.
    ///
    /// At the default 1-second interval this bounds the human wait at ≈5 min.
    pub fn resolve_captcha_poll_budget(&self) -> u32 {
        self.captcha_poll_budget
            .or_else(|| env_u64("CERTCRAWL_CAPTCHA_POLL_BUDGET").map(|v| v as u32))
            .unwrap_or(300)
    }

    /// `captcha_pause` duration: JSON field → `CERTCRAWL_CAPTCHA_PAUSE_SECS` → 60 s.
    pub fn resolve_captcha_pause(&self) -> Duration {
        Duration::from_secs(
            self.captcha_pause_secs
                .or_else(|| env_u64("CERTCRAWL_CAPTCHA_PAUSE_SECS"))
                .unwrap_or(60),
        )
    }

    /// Catalog override file: JSON field → `CERTCRAWL_AUTOMATIONS_FILE` → `automations.json`.
    pub fn resolve_automations_file(&self) -> PathBuf {
        self.automations_file
            .clone()
            .or_else(|| std::env::var("CERTCRAWL_AUTOMATIONS_FILE").ok())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("automations.json"))
    }

    /// Context directory: JSON field → `CERTCRAWL_CONTEXT_DIR` → `./contexts`.
    pub fn resolve_context_dir(&self) -> PathBuf {
        self.context_dir
            .clone()
            .or_else(|| std::env::var("CERTCRAWL_CONTEXT_DIR").ok())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("contexts"))
    }

    /// Concurrent run cap: JSON field → `CERTCRAWL_RUN_LIMIT` → 4.
    pub fn resolve_run_limit(&self) -> usize {
        self.run_limit
            .or_else(|| env_u64("CERTCRAWL_RUN_LIMIT").map(|v| v as usize))
            .filter(|&n| n > 0)
            .unwrap_or(4)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Load `certcrawl.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `CERTCRAWL_CONFIG` env var path
/// 2. `./certcrawl.json`  (process cwd)
/// 3. `../certcrawl.json` (one level up, when running from a subdirectory)
/// 4. `~/.certcrawl/certcrawl.json`
///
/// Missing file → `CrawlConfig::default()` (silent, all env-var fallbacks apply).
/// Parse error → log a warning, return `CrawlConfig::default()`.
pub fn load_config() -> CrawlConfig {
    let candidates: Vec<PathBuf> = {
        let mut v = vec![
            PathBuf::from("certcrawl.json"),
            PathBuf::from("../certcrawl.json"),
        ];
        if let Some(home) = dirs::home_dir() {
            v.push(home.join(".certcrawl").join("certcrawl.json"));
        }
        if let Ok(env_path) = std::env::var("CERTCRAWL_CONFIG") {
            v.insert(0, PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<CrawlConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("certcrawl.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "certcrawl.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return CrawlConfig::default();
                }
            },
            Err(_) => continue, // file not found at this path — try next
        }
    }

    CrawlConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_value_wins_over_default() {
        let cfg: CrawlConfig =
            serde_json::from_str(r#"{ "port": 9999, "captcha_poll_budget": 10 }"#).unwrap();
        assert_eq!(cfg.resolve_port(), 9999);
        assert_eq!(cfg.resolve_captcha_poll_budget(), 10);
    }

    #[test]
    fn defaults_apply_when_file_is_empty() {
        let cfg = CrawlConfig::default();
        assert_eq!(cfg.resolve_captcha_poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.resolve_captcha_poll_budget(), 300);
        assert_eq!(cfg.resolve_captcha_pause(), Duration::from_secs(60));
        assert_eq!(cfg.resolve_run_limit(), 4);
    }

    #[test]
    fn zero_run_limit_falls_back_to_default() {
        let cfg: CrawlConfig = serde_json::from_str(r#"{ "run_limit": 0 }"#).unwrap();
        assert_eq!(cfg.resolve_run_limit(), 4);
    }

    #[test]
    fn poll_interval_is_clamped_to_at_least_one_second() {
        let cfg: CrawlConfig =
            serde_json::from_str(r#"{ "captcha_poll_interval_secs": 0 }"#).unwrap();
        assert_eq!(cfg.resolve_captcha_poll_interval(), Duration::from_secs(1));
    }
}
