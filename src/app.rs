// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use tracing::info;

use crate::module::App;

/// Drive a fully registered [`App`] until the process is told to stop.
///
/// Initialises and starts every module, parks on SIGINT/SIGTERM, then
/// destroys the modules in reverse registration order. Register the
/// console (if any) last so it is the first thing torn down.
pub async fn serve(app: &mut App) -> Result<()> {
    app.init();
    info!("frond starting up");

    shutdown_signal().await?;

    info!("frond closing down");
    app.destroy().await;
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("failed to listen for ctrl-c")?,
            _ = term.recv() => {},
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")
    }
}
