//! CLI Status Command
//!
//! Queries a running gateway for health and its native sessions.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::terminal_output::{note_error, note_info, note_success, paint, render_table, DIM};

pub async fn run(port: u16) -> Result<()> {
    let base = format!("http://localhost:{port}");
    let client = reqwest::Client::new();

    let health = match client.get(format!("{base}/api/health")).send().await {
        Ok(resp) => resp.json::<Value>().await.context("Invalid health response")?,
        Err(_) => {
            note_error(&format!("aerodesk is not running on port {port}"));
            return Ok(());
        }
    };
    note_success(&format!(
        "{} {} on port {port}",
        health["service"].as_str().unwrap_or("aerodesk"),
        health["version"].as_str().unwrap_or("?"),
    ));

    let sessions: Vec<Value> = client
        .get(format!("{base}/api/sessions"))
        .send()
        .await?
        .json()
        .await
        .context("Invalid sessions response")?;

    if sessions.is_empty() {
        note_info("No native sessions");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = sessions.iter().map(session_row).collect();
    print!("{}", render_table(&["INSTANCE", "APP", "TYPE", "PID", "STREAM"], &rows));
    Ok(())
}

fn session_row(session: &Value) -> Vec<String> {
    let text = |key: &str| session[key].as_str().unwrap_or_default().to_string();
    let stream = match session["streamUrl"].as_str() {
        Some(url) => url.to_string(),
        None => paint("pending", DIM),
    };
    vec![
        text("instanceId"),
        text("appKey"),
        text("type"),
        session["process"]["pid"].to_string(),
        stream,
    ]
}
