use std::sync::Arc;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use enrichsync_connect::HttpEnrichmentClient;
use enrichsync_core::enrichment::{PageView, SortSpec, ViewFilter};
use enrichsync_core::{EnrichmentSession, LoadOutcome};

use crate::config::Config;
use crate::events::TracingEventSink;

pub fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub fn build_session(config: &Config) -> anyhow::Result<EnrichmentSession> {
    let client = HttpEnrichmentClient::with_timeout(
        &config.api_url,
        &config.api_token,
        config.entity_kind,
        config.request_timeout,
    )?;
    tracing::info!(
        api_url = %config.api_url,
        kind = %config.entity_kind,
        "Using enrichment API"
    );
    let session = EnrichmentSession::new(
        Arc::new(client),
        Arc::new(TracingEventSink),
        config.engine_config(),
    )?;
    Ok(session)
}

/// Load the configured page and report its rows until polling settles.
///
/// Ctrl-C closes the session and stops waiting.
pub async fn watch_listing(session: &EnrichmentSession, config: &Config) -> anyhow::Result<()> {
    let view = match session.load_page(config.initial_query()).await? {
        LoadOutcome::Loaded(view) => view,
        LoadOutcome::Superseded { generation } => {
            anyhow::bail!("Page load {} was superseded", generation)
        }
    };
    log_view(&view);

    tokio::select! {
        outcome = session.wait_for_poll() => {
            if let Some(outcome) = outcome {
                tracing::info!(
                    state = %outcome.state,
                    ticks = outcome.ticks,
                    failed_ticks = outcome.failed_ticks,
                    still_syncing = outcome.remaining.len(),
                    "Listing settled"
                );
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, closing session");
        }
    }

    session.close();
    log_view(&session.view(&ViewFilter::default(), &SortSpec::default()));
    Ok(())
}

fn log_view(view: &PageView) {
    tracing::info!(
        generation = view.generation,
        page = view.page,
        page_count = view.page_count,
        total_count = view.total_count,
        loading = view.loading_count,
        "Page {} of {}",
        view.page,
        view.page_count
    );
    for row in &view.rows {
        let attributes = serde_json::to_string(&row.attributes).unwrap_or_default();
        match &row.error_reason {
            Some(reason) => tracing::warn!(
                id = %row.id,
                state = %row.state,
                indicator = ?row.indicator,
                reason = %reason,
                "{}",
                attributes
            ),
            None => tracing::info!(
                id = %row.id,
                state = %row.state,
                indicator = ?row.indicator,
                "{}",
                attributes
            ),
        }
    }
}
