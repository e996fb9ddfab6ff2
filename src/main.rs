use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use roombook::catalog::Catalog;
use roombook::client::{BookingClient, BookingError};
use roombook::config::Config;
use roombook::identity::{IdentityProvider, LocalIdentity, bootstrap_session};
use roombook::notify::NotifyHub;
use roombook::store::{Engine, ErrorCode, StoreError};
use roombook::view::{FormInput, ViewModel, ViewState, today};

const HELP: &str = "\
commands:
  rooms                              list blocks and rooms
  room <ROOM>                        switch room
  date <YYYY-MM-DD> | today          switch date
  grid                               show the slot grid
  login | logout
  book <N> <course> [| name] [| notes]  book slot N (1-based)
  cancel <N | booking-id>            cancel your booking
  export                             print bookings as JSON
  offline | online                   simulate losing the store connection
  quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    roombook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::new(config.wal_path(), Arc::new(NotifyHub::new()))?);
    tokio::spawn(roombook::compactor::run_compactor(
        engine.clone(),
        config.compact_threshold,
    ));

    let identity = Arc::new(LocalIdentity::new(
        config.user_name.clone(),
        Some(config.session_path()),
    ));
    let session = bootstrap_session(identity.as_ref(), config.auth_timeout).await;
    if session.timed_out {
        tracing::warn!("continuing signed out");
    }

    let client = BookingClient::new(engine.clone(), Arc::new(Catalog::default()));
    let mut view = ViewModel::open(client, identity.clone(), &today()).await?;

    info!("roombook started");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  user: {}",
        session
            .user
            .as_ref()
            .map_or("signed out".to_string(), |u| u.display_name.clone())
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    tokio::spawn(report_changes(view.subscribe()));
    println!("{HELP}");

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match run_command(&mut view, &engine, identity.as_ref(), line.trim()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("error: {e}"),
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    view.close().await;
    engine.fail_watches(StoreError::new(ErrorCode::Cancelled, "shutting down"));
    info!("roombook stopped");
    Ok(())
}

/// Run one command line. Returns false on `quit`.
async fn run_command(
    view: &mut ViewModel,
    engine: &Engine,
    identity: &dyn IdentityProvider,
    line: &str,
) -> Result<bool, BookingError> {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match cmd {
        "" => {}
        "help" => println!("{HELP}"),
        "quit" | "exit" => return Ok(false),
        "rooms" => {
            for block in view.client().catalog().blocks() {
                println!("{}: {}", block.name, block.rooms.join(" "));
            }
        }
        "room" => view.select_room(rest).await?,
        "date" => view.select_date(rest).await?,
        "today" => view.select_today().await?,
        "grid" => print_grid(view),
        "login" => {
            let user = view.sign_in().await?;
            println!("signed in as {} ({})", user.display_name, user.uid);
        }
        "logout" => {
            view.sign_out().await?;
            println!("signed out");
        }
        "book" => book(view, identity, rest).await?,
        "cancel" => {
            let id = resolve_booking_id(view, rest)?;
            view.request_cancel(&id).await?;
            println!("cancelled {id}");
        }
        "export" => {
            let bookings = view.state().bookings;
            let json = serde_json::to_string_pretty(&bookings)
                .map_err(|e| BookingError::Unknown(e.to_string()))?;
            println!("{json}");
        }
        "offline" => engine.set_online(false),
        "online" => engine.set_online(true),
        other => println!("unknown command {other:?}, try `help`"),
    }
    Ok(true)
}

async fn book(
    view: &mut ViewModel,
    identity: &dyn IdentityProvider,
    args: &str,
) -> Result<(), BookingError> {
    let (index, form) = args.split_once(' ').unwrap_or((args, ""));
    let slot = slot_by_index(view, index)?;

    let was_signed_in = identity.current_user().is_some();
    view.request_book(&slot).await?;
    if !was_signed_in {
        println!("signed in; run the command again to book");
        return Ok(());
    }

    let mut fields = form.split('|').map(str::trim);
    let input = FormInput {
        course_code: fields.next().unwrap_or_default().to_string(),
        booked_by: fields.next().unwrap_or_default().to_string(),
        notes: fields.next().filter(|n| !n.is_empty()).map(str::to_string),
    };
    match view.confirm_book(input).await {
        Ok(booking) => {
            println!("booked {} ({})", booking.slot, booking.id);
            Ok(())
        }
        Err(e) => {
            view.dismiss();
            Err(e)
        }
    }
}

fn slot_by_index(view: &ViewModel, index: &str) -> Result<String, BookingError> {
    let slots = view.client().catalog().time_slots();
    index
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| slots.get(i))
        .cloned()
        .ok_or_else(|| BookingError::Validation {
            field: "slot",
            reason: format!("expected a number from 1 to {}", slots.len()),
        })
}

/// Accept either a grid row number or a raw booking id.
fn resolve_booking_id(view: &ViewModel, arg: &str) -> Result<String, BookingError> {
    if let Ok(slot) = slot_by_index(view, arg) {
        return view
            .grid()
            .into_iter()
            .find(|row| row.slot == slot)
            .and_then(|row| row.booking)
            .map(|b| b.id)
            .ok_or_else(|| BookingError::Validation {
                field: "bookingId",
                reason: format!("slot {slot} is not booked"),
            });
    }
    Ok(arg.to_string())
}

fn print_grid(view: &ViewModel) {
    let state = view.state();
    println!(
        "{} on {}: {} slots available{}",
        state.selection.room,
        state.selection.date,
        view.available_slots(),
        if state.loading { " (loading)" } else { "" }
    );
    for (i, row) in view.grid().iter().enumerate() {
        match &row.booking {
            Some(b) => {
                let mine = if row.can_cancel { " [yours]" } else { "" };
                println!("  {}. {}  {} by {}{mine}", i + 1, row.slot, b.course_code, b.booked_by);
                if !b.notes.is_empty() {
                    println!("       \"{}\"", b.notes);
                }
            }
            None => println!("  {}. {}  available", i + 1, row.slot),
        }
    }
}

/// Print a one-line notice whenever the live booking set changes.
async fn report_changes(mut rx: tokio::sync::watch::Receiver<ViewState>) {
    let mut last: Option<(usize, Option<String>)> = None;
    while rx.changed().await.is_ok() {
        let (count, degraded, loading) = {
            let s = rx.borrow_and_update();
            (s.bookings.len(), s.degraded.clone(), s.loading)
        };
        if loading {
            continue;
        }
        let now = (count, degraded);
        if last.as_ref() != Some(&now) {
            match &now.1 {
                Some(msg) => println!("(live updates stopped: {msg})"),
                None => println!("(live) {count} booked"),
            }
            last = Some(now);
        }
    }
}
