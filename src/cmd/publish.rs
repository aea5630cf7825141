//! Publish a change over HTTP: `precast-live publish`.

use anyhow::{Context, Result};
use console::style;
use precast_common::ChangeKind;
use precast_live::config::LiveConfig;
use precast_live::server::{PublishRequest, PublishResponse};

/// Parse a `--record` style argument as JSON.
fn parse_json(label: &str, raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).with_context(|| format!("--{} is not valid JSON", label))
}

pub async fn cmd_publish(
    config: &LiveConfig,
    topic: &str,
    table: &str,
    kind: ChangeKind,
    record: &str,
    old_record: Option<&str>,
) -> Result<()> {
    let request = PublishRequest {
        table: table.to_string(),
        kind,
        record: parse_json("record", record)?,
        old_record: old_record.map(|raw| parse_json("old-record", raw)).transpose()?,
    };

    let endpoint = format!(
        "{}/api/topics/{}/changes",
        config.url().trim_end_matches('/'),
        topic
    );
    tracing::debug!(endpoint = %endpoint, "publishing change");

    let response = reqwest::Client::new()
        .post(&endpoint)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", endpoint))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("Publish failed ({}): {}", status, body);
    }

    let published: PublishResponse = response
        .json()
        .await
        .context("Unexpected response from change feed")?;
    println!(
        "{} {} {} to {} ({} subscribers)",
        style("Published").green().bold(),
        kind,
        style(published.id).dim(),
        style(topic).bold(),
        published.delivered
    );
    Ok(())
}
