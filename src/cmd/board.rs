//! Pipeline board commands: `dealdesk board show|move`.

use anyhow::{Context, Result};
use dealdesk::config::DealdeskConfig;
use dealdesk::crm::board::{BoardState, DropTarget, MoveOutcome, commit_move};
use dealdesk::crm::db::DbHandle;
use dealdesk::crm::format;
use dealdesk::crm::store::{LocalStore, RemoteStore, StageStore};

use super::super::{BoardCommands, BoardSource};

pub async fn cmd_board(config: &DealdeskConfig, command: BoardCommands) -> Result<()> {
    match command {
        BoardCommands::Show { source } => {
            let store = open_store(config, &source)?;
            let board = BoardState::new(store.fetch_board().await?);
            render(&board);
        }
        BoardCommands::Move {
            deal_id,
            stage,
            source,
        } => {
            let store = open_store(config, &source)?;
            let mut board = BoardState::new(store.fetch_board().await?);
            let stage_id = resolve_stage(&board, &stage)?;

            board.pick_up(deal_id)?;
            board.hover(DropTarget::Stage(stage_id));
            let reassignment = board
                .drop()
                .context("Drop did not land on a stage")?;

            match commit_move(&mut board, store.as_ref(), reassignment).await? {
                MoveOutcome::Unchanged => {
                    println!("Deal #{} is already in {}.", deal_id, stage_name(&board, stage_id));
                }
                MoveOutcome::Committed { deal_id, stage_id } => {
                    println!("Moved deal #{} to {}.", deal_id, stage_name(&board, stage_id));
                    println!();
                    render(&board);
                }
                MoveOutcome::RolledBack {
                    deal_id,
                    restored_stage_id,
                    error,
                } => {
                    anyhow::bail!(
                        "Could not move deal #{}; it stays in {}: {:#}",
                        deal_id,
                        stage_name(&board, restored_stage_id),
                        error
                    );
                }
            }
        }
    }
    Ok(())
}

fn open_store(config: &DealdeskConfig, source: &BoardSource) -> Result<Box<dyn StageStore>> {
    if let Some(server) = &source.server {
        let token = source
            .token
            .as_deref()
            .context("--server needs --token (or DEALDESK_TOKEN)")?;
        return Ok(Box::new(RemoteStore::new(server, token)?));
    }

    let db = super::open_db(config)?;
    let profile = match source.user.as_deref() {
        Some(email) => db
            .find_profile_by_email(email)?
            .with_context(|| format!("No profile with email {}", email))?,
        None => {
            let mut profiles = db.list_profiles()?;
            match profiles.len() {
                0 => anyhow::bail!("No profiles yet. Run 'dealdesk user add' first."),
                1 => profiles.remove(0),
                _ => anyhow::bail!("Several profiles exist; pick one with --user <email>."),
            }
        }
    };
    Ok(Box::new(LocalStore::new(DbHandle::new(db), profile.id)))
}

/// A stage id, or a stage name compared case-insensitively.
fn resolve_stage(board: &BoardState, stage: &str) -> Result<i64> {
    let stage = stage.trim();
    if let Ok(id) = stage.parse::<i64>() {
        if board.stage(id).is_some() {
            return Ok(id);
        }
    }
    board
        .stages()
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(stage))
        .map(|s| s.id)
        .with_context(|| {
            let names: Vec<&str> = board.stages().iter().map(|s| s.name.as_str()).collect();
            format!("No stage '{}'. Stages: {}", stage, names.join(", "))
        })
}

fn stage_name(board: &BoardState, stage_id: i64) -> String {
    board
        .stage(stage_id)
        .map(|s| s.name.clone())
        .unwrap_or_else(|| format!("stage {}", stage_id))
}

fn render(board: &BoardState) {
    for column in board.columns() {
        println!(
            "{} ({}) {}",
            column.stage.name,
            column.deals.len(),
            format::currency(Some(column.total_value))
        );
        for card in &column.deals {
            let mut line = format!(
                "  #{:<4} {:<28} {:>10}",
                card.deal.id,
                card.deal.title,
                format::currency(card.deal.value)
            );
            if let Some(contact) = &card.contact {
                line.push_str(&format!("  {}", format::initials(&contact.full_name())));
            }
            if let Some(company) = &card.company {
                line.push_str(&format!("  {}", company.name));
            }
            let close = format::date(card.deal.expected_close_date.as_deref());
            if !close.is_empty() {
                line.push_str(&format!("  closes {}", close));
            }
            println!("{}", line.trim_end());
        }
    }
}
