//! `taskbridge links` — inspect the durable identity mapping.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use taskbridge_core::link_store::LinkStore;
use taskbridge_core::types::{Side, SyncLink};

/// Arguments for `taskbridge links`.
#[derive(Args, Debug)]
pub struct LinksArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct LinkTableRow {
    #[tabled(rename = "link")]
    link: String,
    #[tabled(rename = "chat")]
    chat: String,
    #[tabled(rename = "board")]
    board: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "chat synced")]
    chat_synced: String,
    #[tabled(rename = "board synced")]
    board_synced: String,
}

impl LinksArgs {
    pub fn run(self) -> Result<()> {
        let store = LinkStore::load().context("failed to load link store")?;

        if self.json {
            let links: Vec<&SyncLink> = store.iter().collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&links).context("failed to render links JSON")?
            );
            return Ok(());
        }

        if store.is_empty() {
            println!("No sync links yet.");
            return Ok(());
        }

        let rows: Vec<LinkTableRow> = store.iter().map(table_row).collect();
        let mut table = Table::new(rows);
        table.with(Style::sharp());
        println!("{table}");
        println!(
            "{} links, {} tombstoned",
            store.len(),
            store.tombstoned_count()
        );
        Ok(())
    }
}

fn table_row(link: &SyncLink) -> LinkTableRow {
    LinkTableRow {
        link: link.id.to_string(),
        chat: link
            .external_id_for(Side::Chat)
            .unwrap_or_else(|| "-".to_string()),
        board: link
            .external_id_for(Side::Board)
            .unwrap_or_else(|| "-".to_string()),
        state: if link.tombstoned {
            "tombstoned".red().to_string()
        } else {
            "active".green().to_string()
        },
        chat_synced: format_synced(link.synced_at_for(Side::Chat)),
        board_synced: format_synced(link.synced_at_for(Side::Board)),
    }
}

fn format_synced(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
}
