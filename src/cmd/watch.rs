//! Live topic viewer: `precast-live watch`.

use anyhow::{Context, Result};
use console::style;
use precast_common::{ChangeEvent, ChannelStatus, StatusEvent};
use precast_live::client::WsChannel;
use precast_live::config::LiveConfig;
use precast_live::consumers::{Applied, LiveList, LiveListFilter};
use precast_live::subscription::ReconnectingSubscription;
use tokio::sync::mpsc;

pub async fn cmd_watch(
    config: &LiveConfig,
    topic: &str,
    table: Option<String>,
    project: Option<String>,
) -> Result<()> {
    let url = config.url();
    let (changes_tx, mut changes_rx) = mpsc::unbounded_channel();
    let channel = WsChannel::new(&url, topic, changes_tx, config.subscribe_timeout())
        .with_context(|| format!("Cannot watch '{}'", topic))?;

    println!(
        "{} {} at {}",
        style("Watching").bold().cyan(),
        style(topic).bold(),
        style(channel.url()).dim()
    );
    println!("{}", style("Press Ctrl+C to stop.").dim());

    let handle = ReconnectingSubscription::start(
        channel,
        Some(Box::new(print_status)),
        config.reconnect_options(),
    );

    let mut list = LiveList::new(LiveListFilter { table, project_id: project });
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = changes_rx.recv() => match change {
                Some(event) => {
                    let applied = list.apply(&event);
                    print_change(&event, applied, list.len());
                }
                None => break,
            },
        }
    }

    handle.stop();
    handle.join().await?;
    println!("{}", style("Stopped.").dim());
    Ok(())
}

fn print_status(event: &StatusEvent) {
    let label = match &event.status {
        ChannelStatus::Subscribed => style("subscribed").green().bold(),
        ChannelStatus::ChannelError | ChannelStatus::TimedOut => {
            style(event.status.as_str()).red().bold()
        }
        other => style(other.as_str()).yellow(),
    };
    match &event.error {
        Some(err) => println!("  [{}] {}", label, style(err).dim()),
        None => println!("  [{}]", label),
    }
}

fn print_change(event: &ChangeEvent, applied: Applied, rows: usize) {
    if applied == Applied::Ignored {
        return;
    }
    let key = event
        .key()
        .map(|k| k.as_str().to_string())
        .unwrap_or_else(|| "?".to_string());
    let verb = match applied {
        Applied::Inserted => style("+").green(),
        Applied::Updated => style("~").yellow(),
        Applied::Removed => style("-").red(),
        Applied::Ignored => return,
    };
    println!(
        "  {} {} {} {} {}",
        verb,
        style(&event.table).cyan(),
        style(format!("#{}", key)).bold(),
        serde_json::Value::Object(event.record.clone()),
        style(format!("({} rows)", rows)).dim()
    );
}
