use telemetry::init_tracing;

mod core;

use crate::core::start_syncer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_name = env!("CARGO_BIN_NAME");

    let _log_flusher = init_tracing(app_name)?;

    start_syncer().await
}
