//! Line-oriented terminal front end.
//!
//! Chat output goes to stdout; status lines and logs go to stderr.

use anyhow::Result;
use chrono::{Local, TimeZone};
use parley_core::{NotifyError, Notification, Notifier, SessionController, SessionError};
use parley_protocol::{ChatMessage, MessageKey, RoomId};
use std::collections::HashSet;
use std::fmt::Display;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

/// Rings the terminal bell and prints a status line.
#[derive(Debug, Clone, Copy)]
pub struct TerminalNotifier {
    sound: bool,
}

impl TerminalNotifier {
    /// Create a notifier; `sound` controls the bell.
    #[must_use]
    pub fn new(sound: bool) -> Self {
        Self { sound }
    }
}

impl Notifier for TerminalNotifier {
    fn show(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(title = %notification.title, "Notification");
        let mut err = std::io::stderr().lock();
        writeln!(err, "* {}: {}", notification.title, notification.body)
            .map_err(|e| NotifyError::Backend(e.to_string()))
    }

    fn play_sound(&self) -> Result<(), NotifyError> {
        if !self.sound {
            return Ok(());
        }
        let mut err = std::io::stderr().lock();
        err.write_all(b"\x07")
            .and_then(|()| err.flush())
            .map_err(|e| NotifyError::Backend(e.to_string()))
    }
}

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text to send.
    Say(String),
    /// `/join <room>`
    Join(String),
    /// `/leave`
    Leave,
    /// `/away`: the chat is no longer being watched.
    Away,
    /// `/back`
    Back,
    /// `/state`
    State,
    /// `/quit`
    Quit,
    /// Unrecognized or incomplete command.
    Unknown(String),
}

impl Input {
    /// Parse a raw input line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let Some(command) = trimmed.strip_prefix('/') else {
            return Input::Say(line.to_string());
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        match (name, arg) {
            ("join", room) if !room.is_empty() => Input::Join(room.to_string()),
            ("leave", "") => Input::Leave,
            ("away", "") => Input::Away,
            ("back", "") => Input::Back,
            ("state", "") => Input::State,
            ("quit", "") => Input::Quit,
            _ => Input::Unknown(trimmed.to_string()),
        }
    }
}

/// Format a message as `[HH:MM] sender: content` in `tz`.
pub fn render_in<Tz>(message: &ChatMessage, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let time = message
        .timestamp
        .to_datetime()
        .map(|at| at.with_timezone(tz).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    format!("[{time}] {}: {}", message.sender, message.content)
}

/// Format a message in local time.
#[must_use]
pub fn render(message: &ChatMessage) -> String {
    render_in(message, &Local)
}

/// Live messages for the room on screen.
///
/// The receiver is taken before a room is entered, so anything appended
/// while the entry snapshot is printed is still delivered; events for
/// messages the snapshot already showed are skipped once.
struct Feed {
    events: broadcast::Receiver<ChatMessage>,
    shown: HashSet<MessageKey>,
}

impl Feed {
    fn new(events: broadcast::Receiver<ChatMessage>) -> Self {
        Self {
            events,
            shown: HashSet::new(),
        }
    }

    /// Switch to `events` and remember what the snapshot printed.
    fn restart(&mut self, events: broadcast::Receiver<ChatMessage>, snapshot: &[ChatMessage]) {
        self.events = events;
        self.shown = snapshot.iter().map(ChatMessage::key).collect();
    }

    /// Whether an event still needs printing.
    fn admit(&mut self, message: &ChatMessage) -> bool {
        !self.shown.remove(&message.key())
    }
}

async fn enter(session: &mut SessionController, feed: &mut Feed, raw: &str) {
    let room = match RoomId::parse(raw) {
        Ok(room) => room,
        Err(reason) => {
            eprintln!("! invalid room {raw:?}: {reason}");
            return;
        }
    };

    // Leave first so the new receiver sees nothing from the old room.
    session.leave().await;
    let events = session.subscribe_messages();

    match session.enter(room).await {
        Ok(room) => {
            eprintln!("-- {} ({}) --", room.name, room.id);
            let snapshot = session.current_log();
            for message in &snapshot {
                println!("{}", render(message));
            }
            feed.restart(events, &snapshot);
        }
        Err(SessionError::NotFound(id)) => eprintln!("! no such room: {id}"),
        Err(e) => eprintln!("! could not enter room: {e}"),
    }
}

/// Run the interactive loop until `/quit` or end of input.
///
/// # Errors
///
/// Returns an error if reading stdin fails.
pub async fn run(mut session: SessionController, initial_room: Option<String>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut states = session.watch_connection();
    let mut feed = Feed::new(session.subscribe_messages());

    if let Some(room) = initial_room {
        enter(&mut session, &mut feed, &room).await;
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Input::parse(&line) {
                    Input::Say(text) if text.trim().is_empty() => {}
                    Input::Say(text) => {
                        if let Err(e) = session.send_message(&text).await {
                            eprintln!("! {e}");
                        }
                    }
                    Input::Join(room) => enter(&mut session, &mut feed, &room).await,
                    Input::Leave => {
                        session.leave().await;
                        eprintln!("-- left --");
                    }
                    Input::Away => session.attention().set_visible(false),
                    Input::Back => session.attention().set_visible(true),
                    Input::State => {
                        let room = session.room().map_or("-", |room| room.name.as_str());
                        eprintln!(
                            "-- {} in {room}, connection {} --",
                            session.current_user(),
                            session.connection_state()
                        );
                    }
                    Input::Quit => break,
                    Input::Unknown(command) => {
                        eprintln!("! unknown command {command}; try /join <room>, /leave, /away, /back, /state, /quit");
                    }
                }
            }
            received = feed.events.recv() => match received {
                Ok(message) => {
                    if feed.admit(&message) {
                        println!("{}", render(&message));
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Output fell behind"),
                Err(RecvError::Closed) => break,
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                eprintln!("-- connection {state} --");
            }
        }
    }

    session.leave().await;
    Ok(())
}
