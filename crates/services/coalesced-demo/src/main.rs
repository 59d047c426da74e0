use std::{
    collections::HashSet,
    future::IntoFuture,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use futures::future::join_all;
use revolt_coalesced::{wrap, CoalescionService, KeyStrategy};
use tokio::{net::TcpListener, sync::oneshot};
use tracing_subscriber::EnvFilter;

mod api;
mod config;

async fn fetch(client: &reqwest::Client, url: &str) -> Result<String, reqwest::Error> {
    tracing::info!("Fetching {url}");

    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    tracing::info!("Received response: {body}");
    Ok(body)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Configure logging and environment
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = config::settings()?;
    tracing::debug!(?settings, "Loaded configuration");

    // Configure slow endpoint and bind
    let hits = Arc::new(AtomicUsize::new(0));
    let state = api::AppState {
        hits: hits.clone(),
        delay: Duration::from_millis(settings.server.delay_ms),
    };

    let address = SocketAddr::from((Ipv4Addr::LOCALHOST, settings.server.port));
    let listener = TcpListener::bind(&address).await?;
    tracing::info!("Listening on {address}");

    let (shutdown, on_shutdown) = oneshot::channel::<()>();
    let server = tokio::spawn(
        axum::serve(listener, api::router(state).into_make_service())
            .with_graceful_shutdown(async {
                on_shutdown.await.ok();
            })
            .into_future(),
    );

    // Every call shares the fixed key, so only one request leaves the client
    let client = reqwest::Client::new();
    let url = format!("http://{address}/");
    let get = wrap(
        move |(): ()| {
            let client = client.clone();
            let url = url.clone();
            async move { fetch(&client, &url).await }
        },
        KeyStrategy::fixed(settings.client.key.clone()),
    )
    .named("get")
    .service(CoalescionService::from_config(settings.coalescion.clone()));

    tracing::info!("Calling coalesced function {} times", settings.client.calls);
    let started = Instant::now();
    let results = join_all((0..settings.client.calls).map(|_| get.call(()))).await;
    let elapsed = started.elapsed();

    let mut bodies = HashSet::new();
    for result in results {
        match result.as_deref() {
            Ok(Ok(body)) => {
                bodies.insert(body.clone());
            }
            Ok(Err(error)) => tracing::error!("Request failed: {error}"),
            Err(error) => tracing::error!("Coalescion failed: {error}"),
        }
    }

    tracing::info!(
        ?elapsed,
        handled = hits.load(Ordering::SeqCst),
        "Completed {} calls, distinct responses: {bodies:?}",
        settings.client.calls
    );

    shutdown.send(()).ok();
    server.await??;

    Ok(())
}
