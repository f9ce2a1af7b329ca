// Small dev utility: inspect change orders in a shop database.
//
// Usage:
//   change-order [db_path] <command> [id]
//
// Commands:
//   init                   create schema (idempotent)
//   preview <co_id>        impact preview JSON
//   stop-actions <co_id>   active stop-action summary JSON
//   list <project_id>      change orders of a project JSON
//
// db_path defaults to CHANGE_ORDER_DB_PATH, then the user data dir.
// CHANGE_ORDER_LOG_FORMAT=json switches logs to JSON lines.

use anyhow::{bail, Context, Result};
use cabinet_change_order::app::{get_default_db_path, AppState};
use cabinet_change_order::logging;

const COMMANDS: [&str; 4] = ["init", "preview", "stop-actions", "list"];

fn main() -> Result<()> {
    match std::env::var("CHANGE_ORDER_LOG_FORMAT") {
        Ok(format) if format.eq_ignore_ascii_case("json") => logging::init_json(),
        _ => logging::init(),
    }

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let db_path = match args.first() {
        Some(first) if !COMMANDS.contains(&first.as_str()) => args.remove(0),
        _ => get_default_db_path(),
    };

    let mut args = args.into_iter();
    let command = match args.next() {
        Some(c) => c,
        None => bail!("missing command (expected one of: {})", COMMANDS.join(", ")),
    };
    let id = args.next().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    tracing::info!("{} v{} - db={}", cabinet_change_order::APP_NAME, cabinet_change_order::VERSION, db_path);
    let state = AppState::new(db_path.clone())
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("failed to open {}", db_path))?;

    match command.as_str() {
        "init" => {
            println!("schema ready: {}", state.db_path);
        }
        "preview" => {
            let id = id.context("preview requires <change_order_id>")?;
            let preview = state.change_order_service.preview_impact(&id)?;
            println!("{}", serde_json::to_string_pretty(&preview)?);
        }
        "stop-actions" => {
            let id = id.context("stop-actions requires <change_order_id>")?;
            let summary = state.stop_action_service.get_stop_actions_summary(&id)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        "list" => {
            let id = id.context("list requires <project_id>")?;
            let orders = state.change_order_service.list_for_project(&id)?;
            println!("{}", serde_json::to_string_pretty(&orders)?);
        }
        other => bail!("unknown command: {}", other),
    }

    Ok(())
}
