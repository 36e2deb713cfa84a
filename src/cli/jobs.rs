// CLI job commands: submit, list, status, cancel

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};

use super::{base_url, parse_params, send_json};

/// Format a relative time string like "2 minutes ago".
fn format_relative_time(dt: &DateTime<Utc>) -> String {
    let secs = Utc::now().signed_duration_since(*dt).num_seconds().max(0);
    if secs < 60 {
        format!("{} seconds ago", secs)
    } else if secs < 3600 {
        format!("{} minutes ago", secs / 60)
    } else if secs < 86400 {
        format!("{} hours ago", secs / 3600)
    } else {
        format!("{} days ago", secs / 86400)
    }
}

fn relative(value: &Value) -> String {
    value
        .as_str()
        .and_then(|ts| ts.parse::<DateTime<Utc>>().ok())
        .map(|dt| format_relative_time(&dt))
        .unwrap_or_else(|| "-".to_string())
}

/// mcp-finnhub jobs submit
pub async fn cmd_submit(
    host: &str,
    port: u16,
    operation: &str,
    params: &[String],
    timeout: Option<f64>,
) -> anyhow::Result<()> {
    let params = parse_params(params).map_err(|e| anyhow::anyhow!(e))?;
    let mut body = json!({
        "operation": operation,
        "params": params,
    });
    if let Some(secs) = timeout {
        body["timeout_secs"] = json!(secs);
    }

    let url = format!("{}/api/jobs", base_url(host, port));
    let response = send_json(Client::new().post(&url).json(&body), host, port).await?;

    let job_id = response["job_id"].as_str().unwrap_or("?");
    println!("Job submitted: {} ({})", job_id, operation);
    println!("Check progress with: mcp-finnhub jobs status {}", job_id);
    Ok(())
}

/// mcp-finnhub jobs list
pub async fn cmd_list(
    host: &str,
    port: u16,
    status: Option<&str>,
    limit: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let url = format!("{}/api/jobs", base_url(host, port));
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(status) = status {
        query.push(("status", status.to_string()));
    }
    if let Some(limit) = limit {
        query.push(("limit", limit.to_string()));
    }

    let body = send_json(Client::new().get(&url).query(&query), host, port).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let empty_vec = vec![];
    let jobs = body["jobs"].as_array().unwrap_or(&empty_vec);
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!(
        "{:<38}{:<22}{:<11}{:<10}{:<18}",
        "ID", "OPERATION", "STATUS", "PROGRESS", "UPDATED"
    );
    for job in jobs {
        println!(
            "{:<38}{:<22}{:<11}{:<10}{:<18}",
            job["job_id"].as_str().unwrap_or("?"),
            job["operation"].as_str().unwrap_or("?"),
            job["status"].as_str().unwrap_or("?"),
            format!("{}%", job["progress"].as_u64().unwrap_or(0)),
            relative(&job["updated_at"]),
        );
    }
    Ok(())
}

/// mcp-finnhub jobs status
pub async fn cmd_status(host: &str, port: u16, id: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/jobs/{}", base_url(host, port), id);
    let body = send_json(Client::new().get(&url), host, port).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// mcp-finnhub jobs cancel
pub async fn cmd_cancel(host: &str, port: u16, id: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/jobs/{}/cancel", base_url(host, port), id);
    let body = send_json(Client::new().post(&url), host, port).await?;

    if body["cancelled"].as_bool().unwrap_or(false) {
        println!("Job {} cancelled.", id);
    } else {
        println!(
            "Job {} was not cancelled (status: {}).",
            id,
            body["status"].as_str().unwrap_or("?")
        );
    }
    Ok(())
}
