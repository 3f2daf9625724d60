use client_core::observability::init_tracing;
use dotenvy::dotenv;
use session_client::config::get_configuration;
use session_client::models::RequestOptions;
use session_client::SessionClient;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let configuration = get_configuration().map_err(|e| {
        eprintln!("Failed to read configuration: {}", e);
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    init_tracing(
        "sitebook-session",
        &configuration.telemetry.log_level,
        configuration.telemetry.otlp_endpoint.as_deref(),
    )?;

    let session_client = SessionClient::from_settings(&configuration)?;
    session_client.session.restore();

    let snapshot = session_client.session.snapshot();
    match &snapshot.identity {
        Some(identity) => info!(
            status = ?snapshot.status,
            user_id = %identity.user_id,
            company_id = ?identity.company_id,
            "Signed in as {}",
            identity.name()
        ),
        None => info!(status = ?snapshot.status, "No stored session"),
    }

    let Some(target) = std::env::args().nth(1) else {
        return Ok(());
    };

    let response = session_client
        .client
        .request(&target, RequestOptions::get())
        .await
        .map_err(|e| {
            tracing::error!(url = %target, error = %e, "Request failed");
            anyhow::anyhow!("Request to {} failed: {}", target, e)
        })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read response body: {}", e))?;
    info!(url = %target, status = %status, bytes = body.len(), "Request completed");
    println!("{}", body);

    Ok(())
}
