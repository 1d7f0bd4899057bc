use axum::serve;
use chatsync_client::collaborators::StaticCredential;
use chatsync_client::realtime::WebSocketConnector;
use chatsync_client::{init_tracing, router, AppConfig, AppState, ClientConfig, SyncClient};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env()?;
    let connector = Arc::new(WebSocketConnector::new(config.push_url.clone()));
    let credentials = Arc::new(StaticCredential::new(config.token.clone()));
    let client = SyncClient::start(
        ClientConfig::new(config.user_id.clone()).with_realtime(config.realtime.clone()),
        connector,
        credentials,
    )
    .await?;
    client.connect().await?;

    let state = AppState::new(config.clone(), client);
    let app = router(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(
        %local_addr,
        build_id = %config.build_id,
        push_url = %config.push_url,
        "starting ChatSync client service"
    );

    serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(%err, "failed to listen for shutdown signal");
            }
        })
        .await?;

    state.client().shutdown().await?;
    info!("ChatSync client service stopped");
    Ok(())
}
