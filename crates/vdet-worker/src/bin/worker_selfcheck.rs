use std::path::Path;
use std::process::Command;

use vdet_media::ModelRegistry;
use vdet_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with results_dir={}",
        config.results_dir.display()
    );
    ensure_results_dir(&config.results_dir).await?;
    ensure_tool("ffmpeg")?;
    ensure_tool("ffprobe")?;
    ensure_env_present(&["REDIS_URL"])?;
    check_default_model(&config);

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_results_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;

    let marker = path.join(".selfcheck");
    tokio::fs::write(&marker, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("results dir {} is not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&marker).await?;
    Ok(())
}

fn ensure_tool(name: &str) -> anyhow::Result<()> {
    let output = Command::new(name)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not available: {}", name, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} -version failed: {:?}",
            name,
            output.status
        ));
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}

/// Jobs may name their own model, so a missing default only warns.
fn check_default_model(config: &WorkerConfig) {
    let path = ModelRegistry::new(config.model_dir.clone()).resolve(&config.default_model);
    if !path.is_file() {
        println!(
            "worker-selfcheck: warning: default model {} not found",
            path.display()
        );
    }
}
