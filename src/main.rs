use std::sync::Arc;
use tracksync_lib::config::{load_remote, SyncSettings};
use tracksync_lib::core::{MappingStore, SyncProgress};
use tracksync_lib::logging::{get_log_dir, init_logging};
use tracksync_lib::storage::{create_remote, LocalStorage};
use tracksync_lib::{AppState, SyncConfig, SyncEngine};

async fn run(state: &AppState) -> anyhow::Result<()> {
    let settings = SyncSettings::load(&state.data_dir)?;
    let remote_config = load_remote(&state.data_dir)?;

    let local_root = settings.local_root_in(&state.data_dir);

    let local = Arc::new(LocalStorage::new(&local_root)?);
    let remote = create_remote(&remote_config, &settings.remote_folder)?;
    let mappings = MappingStore::load(state.db.clone()).await?;

    let engine = Arc::new(SyncEngine::new(
        local,
        remote,
        mappings,
        SyncConfig::from(&settings),
    )?);

    // Ctrl+C 在当前文件完成后停止
    let cancel = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("收到中断信号，正在取消同步...");
            cancel.cancel();
        }
    });

    let progress = |fraction: f64, message: &str| {
        let event = SyncProgress {
            fraction,
            message: message.to_string(),
            error: None,
        };
        if let Ok(line) = serde_json::to_string(&event) {
            eprintln!("{}", line);
        }
    };

    let summary = engine.run_sync(&progress).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    // 初始化日志系统
    let _log_guard = init_logging(&get_log_dir());

    let state = AppState::new()
        .await
        .expect("Failed to initialize application state");

    let result = run(&state).await;
    state.cleanup().await;

    if let Err(e) = result {
        tracing::error!("同步失败: {:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
