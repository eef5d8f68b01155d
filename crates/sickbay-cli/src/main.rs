//! `sickbay`: command-line client for the sickbay health dashboard.
//!
//! # Usage
//!
//! ```
//! sickbay register --name Ada --room 2B
//! sickbay --subject 6f1c1d5e-0d3a-4c1e-9a43-0a4f7e2d9b10 toggle-status
//! sickbay --config ~/.config/sickbay/sickbay.toml watch
//! ```

mod render;

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use sickbay_core::{
  profile::{MealSlot, NewProfile, ProfileForm},
  store::HealthStore as _,
};
use sickbay_store_sqlite::SqliteStore;
use sickbay_sync::{ClientConfig, Dashboard, ReconcileReport, SessionProvider as _, StaticSession};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

type Board = Dashboard<SqliteStore, StaticSession>;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sickbay", version, about = "Shared sick-day dashboard")]
struct Args {
  /// Path to a TOML config file.
  #[arg(short, long, value_name = "FILE", default_value = "sickbay.toml")]
  config: PathBuf,

  /// Act as this subject, overriding `subject_id` from the config.
  #[arg(long, value_name = "UUID")]
  subject: Option<Uuid>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Create the profile for the signed-in subject (or a fresh id).
  Register {
    #[arg(long)]
    name: String,
    #[arg(long)]
    room: String,
  },
  /// Population counts.
  Stats,
  /// Active cases per day.
  Trend,
  /// Sick residents by room, with meal notes and packed flags.
  Worklist,
  /// The signed-in subject's own status.
  Status,
  /// Flip the signed-in subject between healthy and sick.
  ToggleStatus,
  /// Flip one worklist row's packed flag.
  TogglePacked { subject_id: Uuid },
  /// Clear every packed flag.
  ResetPacked,
  /// Edit the signed-in subject's settings. Omitted fields keep their
  /// value; an empty note clears it.
  UpdateProfile {
    #[arg(long)]
    name:   Option<String>,
    #[arg(long)]
    room:   Option<String>,
    #[arg(long)]
    lunch:  Option<String>,
    #[arg(long)]
    dinner: Option<String>,
    #[arg(long)]
    other:  Option<String>,
  },
  /// Rebuild cached statuses from the status log.
  Repair,
  /// Keep the dashboard mounted and print it whenever it changes.
  Watch {
    /// Also force a reload this often, to pick up other processes' writes.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    poll: u64,
  },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let args = Args::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(args.config.clone()).required(false))
    .add_source(config::Environment::with_prefix("SICKBAY"))
    .build()
    .context("failed to read config file")?;
  let mut client_cfg: ClientConfig = settings
    .try_deserialize()
    .context("failed to deserialise ClientConfig")?;
  if args.subject.is_some() {
    client_cfg.subject_id = args.subject;
  }
  let options = client_cfg.dashboard_options().context("invalid configuration")?;

  let store_path = expand_tilde(Path::new(&client_cfg.store_path));
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let store = Arc::new(store);

  let session = Arc::new(StaticSession(client_cfg.subject_id));
  let board = Dashboard::mount(store, session, options);
  let result = run(&board, args.command).await;
  board.shutdown();
  result
}

async fn run(board: &Board, command: Command) -> Result<()> {
  match command {
    Command::Register { .. } | Command::Repair => {}
    _ => log_failures(&board.reconcile().await),
  }

  match command {
    Command::Register { name, room } => {
      let configured = board.session().current_subject();
      let subject_id = configured.unwrap_or_else(Uuid::new_v4);
      let profile = board
        .store()
        .add_profile(NewProfile { subject_id, display_name: name, room_label: room })
        .await
        .context("failed to register profile")?;
      println!("registered {} ({})", profile.display_name, profile.subject_id);
      if configured.is_none() {
        println!("set subject_id = \"{subject_id}\" in your config to act as this subject");
      }
    }
    Command::Repair => {
      let repaired = board.repair().await.context("repair failed")?;
      println!("repaired {} profile(s)", repaired.len());
      for id in repaired {
        println!("  {id}");
      }
    }
    Command::Stats => render::stats(&board.metrics().state()),
    Command::Trend => render::trend(&board.trend().state()),
    Command::Worklist => render::worklist(&board.worklist().state()),
    Command::Status => render::status(&board.status().state()),
    Command::ToggleStatus => {
      let receipt = board.status().toggle().await.context("status toggle failed")?;
      if let Some(warning) = &receipt.secondary {
        tracing::warn!(%warning, "status changed but the history entry was not recorded");
      }
      println!("now {}", receipt.output.current_status);
    }
    Command::TogglePacked { subject_id } => {
      let receipt = board
        .worklist()
        .toggle_packed(subject_id)
        .await
        .context("packed toggle failed")?;
      let mark = if receipt.output.packed { "packed" } else { "not packed" };
      println!("{}: {mark}", receipt.output.display_name);
    }
    Command::ResetPacked => {
      let cleared = board.worklist().reset_all_packed().await.context("reset failed")?;
      println!("cleared {cleared} packed flag(s)");
    }
    Command::UpdateProfile { name, room, lunch, dinner, other } => {
      let Some(subject_id) = board.session().current_subject() else {
        bail!("no signed-in subject; pass --subject or set subject_id");
      };
      let Some(current) = board
        .store()
        .get_profile(subject_id)
        .await
        .context("failed to load profile")?
      else {
        bail!("no profile for {subject_id}; run `sickbay register` first");
      };
      let keep = |slot: MealSlot| current.meals.get(slot).map(|n| n.text.clone());
      let form = ProfileForm {
        display_name: name.unwrap_or_else(|| current.display_name.clone()),
        room_label:   room.unwrap_or_else(|| current.room_label.clone()),
        lunch_note:   lunch.or_else(|| keep(MealSlot::Lunch)),
        dinner_note:  dinner.or_else(|| keep(MealSlot::Dinner)),
        other_note:   other.or_else(|| keep(MealSlot::Other)),
      };
      let profile = board.update_profile(form).await.context("profile update failed")?;
      render::profile(&profile);
    }
    Command::Watch { poll } => watch(board, Duration::from_secs(poll.max(1))).await,
  }
  Ok(())
}

// ─── Watch loop ───────────────────────────────────────────────────────────────

async fn watch(board: &Board, poll: Duration) {
  let ctrl_c = async {
    if let Err(error) = tokio::signal::ctrl_c().await {
      tracing::error!(%error, "failed to listen for ctrl-c");
    }
  };

  render::dashboard(board);
  board
    .drive(Some(poll), ctrl_c, |report| {
      log_failures(report);
      if !report.refreshed.is_empty() {
        render::dashboard(board);
      }
    })
    .await;
}

fn log_failures(report: &ReconcileReport) {
  for error in &report.failed {
    tracing::warn!(%error, "view failed to load");
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
