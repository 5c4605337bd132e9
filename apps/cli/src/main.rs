use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use client_core::{
    Filter, HttpRemoteStore, MutationCoordinator, MutationEvent, SortOrder, ViewQuery,
};
use shared::{
    domain::{FieldChange, Item, ItemId, Priority},
    protocol::{ItemChanges, NewItem},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server_url: String,
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    List {
        #[arg(long, default_value = "all")]
        filter: Filter,
        #[arg(long, default_value = "created")]
        sort: SortOrder,
    },
    Add {
        title: String,
        #[arg(long, default_value = "medium")]
        priority: Priority,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        due: Option<NaiveDate>,
    },
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "clear_description")]
        description: Option<String>,
        #[arg(long)]
        clear_description: bool,
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<NaiveDate>,
        #[arg(long)]
        clear_due: bool,
        #[arg(long)]
        priority: Option<Priority>,
    },
    /// Flips the completed flag of every listed item concurrently.
    Toggle {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    Delete {
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let remote = HttpRemoteStore::new(&cli.server_url, Duration::from_secs(cli.timeout_secs))?;
    let coordinator = MutationCoordinator::new(Arc::new(remote));
    let mut events = coordinator.subscribe_events();
    let loaded = coordinator
        .refresh()
        .await
        .with_context(|| format!("failed to load items from {}", cli.server_url))?;
    info!(loaded, "items loaded");

    let mut query = ViewQuery::default();
    match cli.command {
        Command::List { filter, sort } => query = ViewQuery::new(filter, sort),
        Command::Add {
            title,
            priority,
            description,
            due,
        } => {
            let mut new_item = NewItem::new(title).with_priority(priority);
            new_item.description = description;
            new_item.due_date = due;
            let ticket = coordinator.submit_create(new_item).await?;
            let created = ticket.outcome().await?;
            println!("created item {}", created.id);
        }
        Command::Edit {
            id,
            title,
            description,
            clear_description,
            due,
            clear_due,
            priority,
        } => {
            let baseline = lookup(&coordinator, &id).await?;
            let changes = ItemChanges {
                title: title.map_or(FieldChange::Unspecified, FieldChange::Set),
                description: optional_change(description, clear_description),
                completed: FieldChange::Unspecified,
                priority: priority.map_or(FieldChange::Unspecified, FieldChange::Set),
                due_date: optional_change(due, clear_due),
            };
            if changes.is_empty() {
                return Err(anyhow!("nothing to change for item {id}"));
            }
            let ticket = coordinator
                .submit_update(baseline.id.clone(), changes, baseline)
                .await?;
            ticket.outcome().await?;
        }
        Command::Toggle { ids } => {
            let mut tickets = Vec::with_capacity(ids.len());
            for id in &ids {
                let item = lookup(&coordinator, id).await?;
                tickets.push(coordinator.submit_toggle(item).await?);
            }
            let outcomes =
                futures::future::join_all(tickets.into_iter().map(|ticket| ticket.outcome()))
                    .await;
            for outcome in outcomes {
                if let Err(err) = outcome {
                    eprintln!("{err}");
                }
            }
        }
        Command::Delete { id } => {
            let ticket = coordinator.submit_delete(ItemId::new(id)).await?;
            ticket.outcome().await?;
        }
    }

    while let Ok(event) = events.try_recv() {
        if let MutationEvent::RolledBack { kind, id, error } = event {
            eprintln!("{kind} of item {id} was rolled back: {error}");
        }
    }
    for item in coordinator.view(&query).await {
        println!("{}", render(&item));
    }
    Ok(())
}

async fn lookup(coordinator: &MutationCoordinator, id: &str) -> Result<Item> {
    coordinator
        .item(&ItemId::new(id))
        .await
        .ok_or_else(|| anyhow!("no item with id {id}"))
}

fn optional_change<T>(value: Option<T>, clear: bool) -> FieldChange<T> {
    match (value, clear) {
        (Some(value), _) => FieldChange::Set(value),
        (None, true) => FieldChange::Cleared,
        (None, false) => FieldChange::Unspecified,
    }
}

fn render(item: &Item) -> String {
    let mark = if item.completed { "x" } else { " " };
    let mut line = format!(
        "[{mark}] {:>4}  {:<6} {}",
        item.id.as_str(),
        item.priority.as_str(),
        item.title
    );
    if let Some(due) = item.due_date {
        line.push_str(&format!("  (due {due})"));
    }
    if let Some(description) = &item.description {
        line.push_str(&format!("\n          {description}"));
    }
    line
}
