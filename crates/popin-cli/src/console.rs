//! Line-oriented console
//!
//! Reads single-letter commands from stdin and hands them to the scheduler as
//! intents. Application events come back as INFO log lines.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use popin_core::{AppEvent, InboxHandle, Intent, NodeId, NodeSnapshot, Role, SessionEndReason};

use crate::error::{CliError, Result};

/// Help text printed at startup
pub const CONSOLE_HELP: &str = "\
commands:
  y          accept the offered booth (user)
  n          decline the offered booth (user)
  e          exit the booth (user)
  l          leave the waiting queue (user)
  c <text>   chat with the booth / message active users
  a <text>   announce to every node (admin)
  b          toggle booth announces (admin)
  s          show status";

// ----------------------------------------------------------------------------
// Command Parsing
// ----------------------------------------------------------------------------

/// Parse one console line for a node of `role`
///
/// Blank lines yield `Ok(None)`.
pub fn parse_intent(line: &str, role: Role) -> Result<Option<Intent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    let intent = match command {
        "y" => Intent::Affirm,
        "n" => Intent::Decline,
        "e" => Intent::Exit,
        "l" => Intent::LeaveQueue,
        "c" => Intent::Chat(require_text(command, rest)?),
        "a" => Intent::Announce(require_text(command, rest)?),
        "b" => Intent::ToggleBroadcast,
        "s" => Intent::Status,
        other => return Err(CliError::Console(format!("unknown command '{}'", other))),
    };

    let admin_only = matches!(intent, Intent::Announce(_) | Intent::ToggleBroadcast);
    let user_only = matches!(
        intent,
        Intent::Affirm | Intent::Decline | Intent::Exit | Intent::LeaveQueue
    );
    match role {
        Role::User if admin_only => Err(CliError::Console(format!(
            "'{}' is only available on booth admins",
            command
        ))),
        Role::Admin if user_only => Err(CliError::Console(format!(
            "'{}' is only available on users",
            command
        ))),
        _ => Ok(Some(intent)),
    }
}

fn require_text(command: &str, text: &str) -> Result<String> {
    if text.is_empty() {
        return Err(CliError::Console(format!("'{}' needs a message", command)));
    }
    Ok(text.to_string())
}

/// Spawn the stdin reader feeding intents into the inbox
pub fn spawn_console(handle: InboxHandle, role: Role) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_intent(&line, role) {
                    Ok(Some(intent)) => {
                        handle.submit_intent(intent);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Console read failed: {}", e);
                    break;
                }
            }
        }
    })
}

// ----------------------------------------------------------------------------
// Event Reporting
// ----------------------------------------------------------------------------

/// Log an application event of node `id`
pub fn report(id: NodeId, event: &AppEvent) {
    info!("[node {}] {}", id, describe(event));
}

/// One-line human description of an application event
pub fn describe(event: &AppEvent) -> String {
    match event {
        AppEvent::StateChanged { from, to } => format!("{} -> {}", from, to),
        AppEvent::ScanStarted => "scanning for booths".to_string(),
        AppEvent::BoothDiscovered {
            booth,
            rssi,
            status,
        } => format!(
            "found booth {} at {} dBm ({}/{} in use, {} waiting)",
            booth, rssi, status.current_count, status.capacity, status.waiting_count
        ),
        AppEvent::BoothSelected { booth, score } => {
            format!("selected booth {} (score {})", booth, score)
        }
        AppEvent::NoBoothFound => "no booth available, scanning again".to_string(),
        AppEvent::BoothOffered {
            booth,
            current_count,
            capacity,
            waiting_count,
            description,
            awaiting_decision,
        } => {
            let prompt = if *awaiting_decision { " [y/n]" } else { "" };
            format!(
                "booth {}: {} ({}/{} in use, {} waiting){}",
                booth, description, current_count, capacity, waiting_count, prompt
            )
        }
        AppEvent::RegistrationRefused { booth } => {
            format!("booth {} was already visited", booth)
        }
        AppEvent::QueuePosition {
            booth,
            position,
            total,
        } => format!("waiting at booth {}: {} of {}", booth, position, total),
        AppEvent::QueueDropped { booth } => format!("dropped from the queue of booth {}", booth),
        AppEvent::SessionStarted { booth } => format!("session started at booth {}", booth),
        AppEvent::SessionEnded { booth, reason } => {
            let reason = match reason {
                SessionEndReason::Exited => "exited",
                SessionEndReason::TimedOut => "timed out",
                SessionEndReason::ForcedExpiry => "expired without alert",
            };
            format!("session at booth {} ended: {}", booth, reason)
        }
        AppEvent::ExitConfirmed { booth, success } => {
            format!("booth {} confirmed exit: {}", booth, success)
        }
        AppEvent::RetriesExhausted { booth, stage } => {
            format!("booth {} stopped answering ({:?})", booth, stage)
        }
        AppEvent::ChatReceived { via, sender, text } => match sender {
            Some(sender) => format!("chat from {} via booth {}: {}", sender, via, text),
            None => format!("chat from {}: {}", via, text),
        },
        AppEvent::AdminMessage { booth, text } => format!("booth {} announces: {}", booth, text),
        AppEvent::UserAdmitted { user } => format!("user {} admitted", user),
        AppEvent::UserQueued {
            user,
            position,
            total,
        } => format!("user {} queued at {} of {}", user, position, total),
        AppEvent::UserRefused { user } => format!("user {} already visited", user),
        AppEvent::UserExited { user } => format!("user {} exited", user),
        AppEvent::SessionExpired { user } => format!("session of user {} expired", user),
        AppEvent::OfferSent { user } => format!("slot offered to user {}", user),
        AppEvent::OfferExpired { user } => format!("offer to user {} expired", user),
        AppEvent::BroadcastToggled { enabled } => format!("booth announces enabled: {}", enabled),
        AppEvent::Status(snapshot) => describe_snapshot(snapshot),
    }
}

fn describe_snapshot(snapshot: &NodeSnapshot) -> String {
    match snapshot {
        NodeSnapshot::Admin(admin) => format!(
            "booth {} {}: active {:?}, waiting {:?}, served {}, offer {:?}",
            admin.id,
            snapshot.state_name(),
            admin.active.iter().map(|id| id.value()).collect::<Vec<_>>(),
            admin.waiting.iter().map(|id| id.value()).collect::<Vec<_>>(),
            admin.registered.len(),
            admin.pending_offer.map(|id| id.value()),
        ),
        NodeSnapshot::User(user) => {
            let booth = user
                .booth
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "user {} {}: booth {}, queue {}/{}, visited {:?}",
                user.id,
                snapshot.state_name(),
                booth,
                user.queue_position,
                user.queue_total,
                user.visits.iter().map(|id| id.value()).collect::<Vec<_>>(),
            )
        }
    }
}
