// CLI commands that run locally: serve, config, jobs cleanup

use std::path::Path;

use crate::daemon::{self, load_config, resolve_storage_dir};
use crate::storage::{FsJobStore, JobStore};

/// mcp-finnhub serve
pub async fn cmd_serve(
    config: Option<&str>,
    port_override: Option<u16>,
    storage_dir: Option<&str>,
) -> anyhow::Result<()> {
    daemon::start_daemon(
        config.map(Path::new),
        storage_dir.map(Path::new),
        None,
        port_override,
    )
    .await
}

/// mcp-finnhub config
pub fn cmd_config(config: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config.map(Path::new))?;
    config.finnhub_api_key = mask_secret(&config.finnhub_api_key);

    let mut value = serde_json::to_value(&config)?;
    value["resolved_storage_directory"] =
        serde_json::json!(resolve_storage_dir(&config).display().to_string());
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// mcp-finnhub jobs cleanup
pub async fn cmd_cleanup(config: Option<&str>, storage_dir: Option<&str>) -> anyhow::Result<()> {
    let mut config = load_config(config.map(Path::new))?;
    if let Some(dir) = storage_dir {
        config.storage_directory = Some(dir.into());
    }

    let store = FsJobStore::new(resolve_storage_dir(&config).join("jobs")).await?;
    let removed = store.cleanup_older_than(config.job_retention()).await?;
    println!(
        "Removed {} job(s) finished more than {} seconds ago.",
        removed, config.job_cleanup_after_secs
    );
    Ok(())
}

/// Keep only the last four characters of a secret.
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => String::new(),
        n if n <= 4 => "*".repeat(n),
        n => format!("{}{}", "*".repeat(n - 4), chars[n - 4..].iter().collect::<String>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Job;
    use tempfile::TempDir;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "");
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret("sk_live_1234"), "********1234");
    }

    #[tokio::test]
    async fn test_cmd_cleanup_removes_expired_jobs() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.json");
        std::fs::write(&config_path, r#"{"job_cleanup_after_secs": 60}"#).unwrap();

        let store = FsJobStore::new(tmp.path().join("data").join("jobs")).await.unwrap();
        let mut old = Job::new("quote", Default::default());
        old.start(None).unwrap();
        old.complete(serde_json::json!({}), None).unwrap();
        old.completed_at = Some(chrono::Utc::now() - chrono::Duration::hours(1));
        store.save(&old).await.unwrap();
        let pending = store.create("quote", Default::default()).await.unwrap();

        let data_dir = tmp.path().join("data");
        cmd_cleanup(config_path.to_str(), data_dir.to_str()).await.unwrap();

        assert!(store.get(old.id).await.unwrap().is_none());
        assert!(store.get(pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cmd_serve_without_api_key_fails() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.json");
        std::fs::write(&config_path, r#"{"port": 0}"#).unwrap();

        if std::env::var("FINNHUB_API_KEY").is_ok() {
            return;
        }
        let err = cmd_serve(config_path.to_str(), None, tmp.path().to_str())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("FINNHUB_API_KEY"));
    }
}
