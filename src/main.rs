use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use certcrawl::{browser, core::config, http, AppState};

fn parse_port_from_args() -> Option<u16> {
    let mut args = std::env::args().peekable();
    while let Some(a) = args.next() {
        if a == "--port" {
            if let Some(v) = args.next() {
                if let Ok(p) = v.parse::<u16>() {
                    return Some(p);
                }
            }
        } else if let Some(rest) = a.strip_prefix("--port=") {
            if let Ok(p) = rest.parse::<u16>() {
                return Some(p);
            }
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting certcrawl server");

    let crawl_config = config::load_config();

    // Pre-flight: a missing browser fails every run at launch time; say so now.
    let chrome_override = crawl_config.resolve_chrome_executable();
    if !browser::launcher::native_browser_available(chrome_override.as_deref()) {
        warn!(
            "no Chromium-family browser found; automation runs will fail until one is installed \
             (or CHROME_EXECUTABLE is set)"
        );
    }

    let port = parse_port_from_args().unwrap_or_else(|| crawl_config.resolve_port());

    let state = Arc::new(AppState::new(crawl_config));
    info!(
        "automation catalog ready: {:?}",
        state.automations.certificate_ids()
    );

    let app = http::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
