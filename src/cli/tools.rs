// CLI tool and project commands: call, tools, projects

use reqwest::Client;
use serde_json::{json, Value};

use super::{base_url, parse_params, send_json};
use crate::api::endpoints::ENDPOINTS;

/// mcp-finnhub call
pub async fn cmd_call(
    host: &str,
    port: u16,
    tool: &str,
    params: &[String],
    project: Option<&str>,
    format: Option<&str>,
) -> anyhow::Result<()> {
    let mut params = parse_params(params).map_err(|e| anyhow::anyhow!(e))?;
    if let Some(project) = project {
        params.insert("project".to_string(), json!(project));
    }
    if let Some(format) = format {
        params.insert("format".to_string(), json!(format));
    }

    let url = format!("{}/api/tools/{}", base_url(host, port), tool);
    let body = send_json(
        Client::new().post(&url).json(&Value::Object(params)),
        host,
        port,
    )
    .await?;

    if body["status"] == "truncated" {
        eprintln!(
            "Result too large ({} tokens); full data written to {}",
            body["token_count"],
            body["file_path"].as_str().unwrap_or("?")
        );
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// mcp-finnhub tools
pub fn cmd_tools() -> anyhow::Result<()> {
    for endpoint in ENDPOINTS {
        let params: Vec<String> = endpoint
            .params
            .iter()
            .map(|p| {
                if p.required {
                    p.name.to_string()
                } else {
                    format!("[{}]", p.name)
                }
            })
            .collect();
        println!("{:<22}{}", endpoint.name, endpoint.description);
        if !params.is_empty() {
            println!("{:<22}params: {}", "", params.join(" "));
        }
    }
    Ok(())
}

/// mcp-finnhub projects list
pub async fn cmd_projects_list(host: &str, port: u16) -> anyhow::Result<()> {
    let url = format!("{}/api/projects", base_url(host, port));
    let body = send_json(Client::new().get(&url), host, port).await?;

    let empty_vec = vec![];
    let projects = body["projects"].as_array().unwrap_or(&empty_vec);
    if projects.is_empty() {
        println!("No projects found.");
        return Ok(());
    }

    println!("{:<24}{:<8}{:<12}{}", "NAME", "FILES", "BYTES", "CREATED");
    for project in projects {
        println!(
            "{:<24}{:<8}{:<12}{}",
            project["name"].as_str().unwrap_or("?"),
            project["total_files"].as_u64().unwrap_or(0),
            project["total_size_bytes"].as_u64().unwrap_or(0),
            project["created_at"].as_str().unwrap_or("-"),
        );
    }
    Ok(())
}

/// mcp-finnhub projects create
pub async fn cmd_projects_create(host: &str, port: u16, name: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/projects", base_url(host, port));
    let body = send_json(
        Client::new().post(&url).json(&json!({ "project": name })),
        host,
        port,
    )
    .await?;

    println!(
        "Project '{}' created at {}",
        name,
        body["path"].as_str().unwrap_or("?")
    );
    Ok(())
}
