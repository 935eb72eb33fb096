// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

use std::sync::Arc;

use managerlib::{
    config::Config,
    context::Context,
    controller::SnapshotDirectory,
    ipc::{Admission, Permit, Resource, SemaphoreSet, timeout_secs},
    sync::Synchronizer,
    updater::Updater,
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config.log.init();
    tracing::debug!("configuration:\n{config}");

    let semaphores = config.semaphores.clone();
    let admission: Arc<dyn Admission> = Arc::new(
        tokio::task::spawn_blocking(move || {
            SemaphoreSet::initialize(&semaphores.state_dir, &semaphores.limits)
        })
        .await??,
    );

    let connection_admission = admission.clone();
    let timeout = timeout_secs(config.sync.permit_timeout);
    let Some(_connection) = tokio::task::spawn_blocking(move || {
        Permit::acquire(connection_admission, Resource::DatabaseConnection, timeout)
    })
    .await??
    else {
        return Err("no database connection slot available".into());
    };

    let pool = config.database.setup().await?;
    let updater = Updater::new(
        Synchronizer::new(pool.clone(), config.sync.flush_threshold),
        SnapshotDirectory::new(&config.sync.snapshots),
        admission,
        Context::system(),
        config.sync.clone(),
    );

    tokio::select! {
        _ = updater.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down");
        }
    }
    pool.close().await;
    Ok(())
}
