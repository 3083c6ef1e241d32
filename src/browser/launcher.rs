//! Browser executable discovery and launch configuration.
//!
//! This module is the single source of truth for:
//! * Finding a usable Chromium-family executable (cross-platform).
//! * The headless config used by the hidden automation session.
//! * The headed config used by the visible CAPTCHA handoff window — fixed
//!   size, centered, with a known remote-debugging port so teardown can
//!   sweep leftover tabs through the `/json` endpoint.

use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use std::path::Path;

/// Remote-debugging port reserved for the visible handoff browser.
pub const VISIBLE_DEBUG_PORT: u16 = 9223;

/// Window geometry for the visible handoff browser, centered for the common
/// 1920×1080 operator screen.
pub const VISIBLE_WIDTH: u32 = 1100;
pub const VISIBLE_HEIGHT: u32 = 800;

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. Explicit override (config file / `CHROME_EXECUTABLE` env var).
/// 2. PATH scan — finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable(configured: Option<&str>) -> Option<String> {
    if let Some(p) = configured {
        if Path::new(p).exists() {
            return Some(p.to_string());
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Returns `true` when a usable browser binary is present on this machine.
/// The startup preflight uses this to warn before the first run fails.
pub fn native_browser_available(configured: Option<&str>) -> bool {
    find_chrome_executable(configured).is_some()
}

/// Headless config for the hidden automation session.
///
/// Flags chosen for CI / container compatibility (`--no-sandbox`,
/// `--disable-dev-shm-usage`) and to keep the portal's anti-automation
/// checks from tripping on the CDP fingerprint
/// (`--disable-blink-features=AutomationControlled`).
pub fn build_hidden_config(exe: &str) -> Result<BrowserConfig> {
    BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width: 1366,
            height: 900,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(1366, 900)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        .arg("--disable-blink-features=AutomationControlled")
        .build()
        .map_err(|e| anyhow!("Failed to build hidden browser config: {}", e))
}

/// Headed config for the visible CAPTCHA handoff browser.
///
/// Kept as close to a normal user browser as possible — the whole point is
/// that a human solves the challenge in it.
pub fn build_visible_config(exe: &str) -> Result<BrowserConfig> {
    let x = (1920u32.saturating_sub(VISIBLE_WIDTH)) / 2;
    let y = (1080u32.saturating_sub(VISIBLE_HEIGHT)) / 2;

    BrowserConfig::builder()
        .with_head()
        .chrome_executable(exe)
        .viewport(Viewport {
            width: VISIBLE_WIDTH,
            height: VISIBLE_HEIGHT,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(VISIBLE_WIDTH, VISIBLE_HEIGHT)
        .arg(format!("--window-position={},{}", x, y))
        .arg(format!("--remote-debugging-port={}", VISIBLE_DEBUG_PORT))
        .arg("--disable-infobars")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .build()
        .map_err(|e| anyhow!("Failed to build visible browser config: {}", e))
}
