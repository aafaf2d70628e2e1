use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use tour_bot::config::BotConfig;
use tour_bot::platform::{ChatPlatform, DiscordPlatform};
use tour_bot::store::model::{MoveDirection, TourRef};
use tour_bot::store::{LibSqlStore, Store};
use tour_bot::tour::manager::{NavOutcome, StartOutcome};
use tour_bot::tour::{NavAction, TourManager};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export DISCORD_BOT_TOKEN=...");
        std::process::exit(1);
    });

    eprintln!("🧭 Tour Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Default tour name: {}", config.default_tour_name);
    eprintln!("   Announce channel: #{}", config.announce_channel_name);
    match &config.exit_role_name {
        Some(role) => eprintln!("   Exit role: {role}"),
        None => eprintln!("   Exit role: (none)"),
    }

    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::open_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: failed to open database at {}: {e}",
                    config.db_path.display()
                );
                std::process::exit(1);
            }),
    );

    let platform: Arc<dyn ChatPlatform> = Arc::new(DiscordPlatform::new(config.bot_token.clone()));

    let manager = TourManager::new(
        Arc::clone(&store),
        Arc::clone(&platform),
        config.exit_role_name.clone(),
        config.default_tour_name.clone(),
        config.announce_channel_name.clone(),
    );

    eprintln!("\nOperator console ready. Type 'help' for commands, 'quit' to exit.\n");
    run_console(&manager).await;
    Ok(())
}

/// Operator console: drives the manager from stdin so tours can be
/// triggered and administered without a gateway connection.
async fn run_console(manager: &TourManager) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "quit" || line == "exit" {
                    break;
                }
                if let Err(e) = dispatch(manager, line).await {
                    eprintln!("error: {e}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Error reading stdin: {e}");
                break;
            }
        }
    }
}

async fn dispatch(manager: &TourManager, line: &str) -> tour_bot::Result<()> {
    let parts: Vec<&str> = line.splitn(6, ' ').collect();
    match parts.as_slice() {
        ["help"] => {
            eprintln!("  join <guild> <user>                  start the default tour");
            eprintln!("  start-role <guild> <user> <role_id>  start the tour granting a role");
            eprintln!("  next|back|end <user> <tour_id>       navigate a running tour");
            eprintln!("  tours <guild>                        list tours");
            eprintln!("  tour-create <guild> <name>           create an empty tour");
            eprintln!("  tour-delete <guild> <id|name>        delete a tour and its data");
            eprintln!("  default <guild> <id|name>            set the default tour");
            eprintln!("  role <guild> <id|name> [role_id]     set/clear completion role");
            eprintln!("  steps <guild> <id|name>              list a tour's steps");
            eprintln!("  step-add <guild> <id|name> [pos] <title>|<description>");
            eprintln!("  step-edit <step_id> <title>|<description>");
            eprintln!("  step-del <step_id>");
            eprintln!("  step-up|step-down <step_id>");
        }
        ["join", guild, user] => {
            report_start(manager.start_for_member(guild, user).await?);
        }
        ["start-role", guild, user, role] => {
            report_start(manager.start_for_role(guild, user, role).await?);
        }
        [action @ ("next" | "back" | "end"), user, tour] => {
            let tour_id = parse_id(tour)?;
            let nav = match *action {
                "next" => NavAction::Next,
                "back" => NavAction::Back,
                _ => NavAction::End,
            };
            report_nav(manager.handle_nav(user, tour_id, nav).await?);
        }
        ["tours", guild] => {
            for tour in manager.list_tours(guild).await? {
                let role = tour.completion_role_id.as_deref().unwrap_or("-");
                eprintln!("  [{}] {} (role: {role})", tour.tour_id, tour.name);
            }
        }
        ["tour-create", guild, rest @ ..] => {
            let name = rest.join(" ");
            let id = manager.create_tour(guild, &name, None).await?;
            eprintln!("created tour {id}");
        }
        ["tour-delete", guild, rest @ ..] => {
            let tour = manager
                .delete_tour(guild, &TourRef::from_input(&rest.join(" ")))
                .await?;
            eprintln!("deleted tour [{}] {}", tour.tour_id, tour.name);
        }
        ["default", guild, rest @ ..] => {
            let tour = manager
                .set_default_tour(guild, &TourRef::from_input(&rest.join(" ")))
                .await?;
            eprintln!("default tour is now [{}] {}", tour.tour_id, tour.name);
        }
        ["role", guild, tour_ref] => {
            manager
                .set_completion_role(guild, &TourRef::from_input(tour_ref), None)
                .await?;
            eprintln!("completion role cleared");
        }
        ["role", guild, tour_ref, role_id] => {
            manager
                .set_completion_role(guild, &TourRef::from_input(tour_ref), Some(role_id))
                .await?;
            eprintln!("completion role set to {role_id}");
        }
        ["steps", guild, rest @ ..] => {
            let steps = manager
                .list_steps(guild, &TourRef::from_input(&rest.join(" ")))
                .await?;
            for step in steps {
                let title = step.title.as_deref().unwrap_or("(untitled)");
                eprintln!("  {}. [{}] {}", step.step_number, step.step_id, title);
            }
        }
        ["step-add", guild, tour_ref, rest @ ..] => {
            let rest = rest.join(" ");
            let (position, body) = match rest.split_once(' ') {
                Some((first, tail)) if first.parse::<i64>().is_ok() => {
                    (first.parse::<i64>().ok(), tail.to_string())
                }
                _ => (None, rest),
            };
            let (title, description) = split_title(&body);
            let inserted = manager
                .add_step(guild, &TourRef::from_input(tour_ref), position, title, description)
                .await?;
            eprintln!(
                "added step [{}] at position {}",
                inserted.step_id, inserted.step_number
            );
        }
        ["step-edit", step_id, rest @ ..] => {
            let body = rest.join(" ");
            let (title, description) = split_title(&body);
            manager.edit_step(parse_id(step_id)?, title, description).await?;
            eprintln!("step updated");
        }
        ["step-del", step_id] => {
            manager.remove_step(parse_id(step_id)?).await?;
            eprintln!("step deleted, tour renumbered");
        }
        [cmd @ ("step-up" | "step-down"), step_id] => {
            let direction = if *cmd == "step-up" {
                MoveDirection::Up
            } else {
                MoveDirection::Down
            };
            let moved = manager.move_step(parse_id(step_id)?, direction).await?;
            eprintln!("{}", if moved { "step moved" } else { "already at the edge" });
        }
        _ => eprintln!("unknown command; try 'help'"),
    }
    Ok(())
}

fn parse_id(s: &str) -> tour_bot::Result<i64> {
    s.parse::<i64>().map_err(|_| {
        tour_bot::error::TourError::InvalidInput(format!("'{s}' is not a numeric id")).into()
    })
}

/// Split "Title|Description" input; no pipe means description only.
fn split_title(body: &str) -> (Option<&str>, &str) {
    match body.split_once('|') {
        Some((title, description)) => (Some(title.trim()), description.trim()),
        None => (None, body.trim()),
    }
}

fn report_start(outcome: StartOutcome) {
    match outcome {
        StartOutcome::Started { tour_id, delivery } => {
            eprintln!("tour {tour_id} started ({delivery:?})");
        }
        StartOutcome::AlreadyInProgress { tour_name } => {
            eprintln!("user is already on \"{tour_name}\"");
        }
        StartOutcome::NoSteps { tour_id } => {
            eprintln!("tour {tour_id} has no steps; nothing started");
        }
        StartOutcome::AlreadyHasRole => eprintln!("user already holds that role"),
        StartOutcome::NoTourForRole => eprintln!("no tour grants that role"),
    }
}

fn report_nav(outcome: NavOutcome) {
    match outcome {
        NavOutcome::Moved { step_index, total } => {
            eprintln!("now on step {} of {total}", step_index + 1);
        }
        NavOutcome::AtBeginning => eprintln!("already at the first step"),
        NavOutcome::Completed(report) => {
            eprintln!("tour completed (role: {:?}, announced: {})", report.role, report.announced);
        }
        NavOutcome::AlreadyCompleted => eprintln!("tour was already completed"),
        NavOutcome::Ended => eprintln!("tour ended"),
        NavOutcome::NotOnTour => eprintln!("no in-progress session for that tour"),
        NavOutcome::EndedNoSteps => eprintln!("tour has no steps; session terminated"),
        NavOutcome::EndedStepNotFound => {
            eprintln!("current step no longer exists; session terminated");
        }
    }
}
