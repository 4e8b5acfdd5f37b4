//! REPL – Read-Eval-Print Loop for the sensbridge interactive shell.
//!
//! Supported slash-commands:
//!   /help                     – show this list
//!   /list                     – tasks, event sources and delivery flags
//!   /emit on|off              – toggle live publishing
//!   /record [names…]          – start continuous recording (all or named)
//!   /stoprecord               – close the recording container
//!   /buffer on|off            – toggle the rolling buffer
//!   /horizon [secs]           – show or set the buffer horizon
//!   /dump <prefix> [names…]   – flush buffered data into a new container
//!   /files                    – list containers and storage use
//!   /rmfiles [ids…]           – delete containers (all when none named)
//!   /add <key> <hz> [kind]    – register a memory value converter
//!   /event <key> [kind]       – register an event converter
//!   /batch <file>             – register a memory list converter from JSON
//!   /raise <key> <json>       – raise a simulated event
//!   /send <topic> <json>      – publish on the bus for inbound subscribers
//!   /quit | /exit             – stop the bridge and exit

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use sensbridge_hal::SimSession;
use sensbridge_runtime::Bridge;
use sensbridge_types::{ContainerId, DataKind, Envelope};
use serde_json::Value;
use tracing::warn;

/// One parsed slash-command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    List,
    Emit(bool),
    Record(Option<Vec<String>>),
    StopRecord,
    Buffer(bool),
    Horizon(Option<f64>),
    Dump { prefix: String, names: Option<Vec<String>> },
    Files,
    RemoveFiles(Option<Vec<String>>),
    Add { key: String, frequency: f64, kind: DataKind },
    Event { key: String, kind: DataKind },
    Batch(PathBuf),
    Raise { key: String, value: Value },
    Send { topic: String, value: Value },
    Quit,
}

/// Parse one input line. `Err` carries a message for the user.
pub fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".into());
    };
    let rest: Vec<String> = words.map(str::to_string).collect();
    let names = |rest: Vec<String>| (!rest.is_empty()).then_some(rest);

    match head {
        "/help" => Ok(Command::Help),
        "/list" => Ok(Command::List),
        "/emit" => on_off(&rest).map(Command::Emit),
        "/record" => Ok(Command::Record(names(rest))),
        "/stoprecord" => Ok(Command::StopRecord),
        "/buffer" => on_off(&rest).map(Command::Buffer),
        "/horizon" => match rest.as_slice() {
            [] => Ok(Command::Horizon(None)),
            [secs] => secs
                .parse::<f64>()
                .ok()
                .filter(|s| Duration::try_from_secs_f64(*s).is_ok())
                .map(|s| Command::Horizon(Some(s)))
                .ok_or_else(|| format!("'{secs}' is not a number of seconds")),
            _ => Err("usage: /horizon [secs]".into()),
        },
        "/dump" => {
            let mut rest = rest.into_iter();
            let prefix = rest.next().ok_or("usage: /dump <prefix> [names…]")?;
            Ok(Command::Dump {
                prefix,
                names: names(rest.collect()),
            })
        }
        "/files" => Ok(Command::Files),
        "/rmfiles" => Ok(Command::RemoveFiles(names(rest))),
        "/add" => match rest.as_slice() {
            [key, hz] | [key, hz, _] => {
                let frequency = hz
                    .parse::<f64>()
                    .map_err(|_| format!("'{hz}' is not a frequency"))?;
                let kind = kind_arg(rest.get(2))?;
                Ok(Command::Add {
                    key: key.clone(),
                    frequency,
                    kind,
                })
            }
            _ => Err("usage: /add <key> <hz> [kind]".into()),
        },
        "/event" => match rest.as_slice() {
            [key] | [key, _] => Ok(Command::Event {
                key: key.clone(),
                kind: kind_arg(rest.get(1))?,
            }),
            _ => Err("usage: /event <key> [kind]".into()),
        },
        "/batch" => match rest.as_slice() {
            [path] => Ok(Command::Batch(PathBuf::from(path))),
            _ => Err("usage: /batch <file>".into()),
        },
        "/raise" => match rest.as_slice() {
            [key, value] => Ok(Command::Raise {
                key: key.clone(),
                value: json_arg(value),
            }),
            _ => Err("usage: /raise <key> <json>".into()),
        },
        "/send" => match rest.as_slice() {
            [topic, value] => Ok(Command::Send {
                topic: topic.clone(),
                value: json_arg(value),
            }),
            _ => Err("usage: /send <topic> <json>".into()),
        },
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(format!("Unknown command '{other}'")),
    }
}

fn on_off(rest: &[String]) -> Result<bool, String> {
    match rest {
        [v] if v == "on" => Ok(true),
        [v] if v == "off" => Ok(false),
        _ => Err("expected 'on' or 'off'".into()),
    }
}

/// JSON when it parses, a plain string otherwise.
fn json_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn kind_arg(raw: Option<&String>) -> Result<DataKind, String> {
    raw.map_or(Ok(DataKind::None), |k| k.parse().map_err(|e| format!("{e}")))
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(bridge: &Bridge, session: &SimSession, shutdown: Arc<AtomicBool>) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {}", "Terminal error".red(), e);
            return;
        }
    };
    let prompt = format!("{} ", "sensbridge>".bold().cyan());

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }
        if let Err(e) = editor.add_history_entry(cmd) {
            warn!(error = %e, "history not updated");
        }

        match parse(cmd) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(command) => execute(bridge, session, command),
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "Error:".red(),
                e.yellow(),
                "/help".bold()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn execute(bridge: &Bridge, session: &SimSession, command: Command) {
    let driver = bridge.driver();
    match command {
        Command::Help => cmd_help(),
        Command::List => cmd_list(bridge),
        Command::Emit(on) => {
            if on {
                driver.enable_emit();
            } else {
                driver.disable_emit();
            }
            println!("  emit {}", flag(on));
        }
        Command::Record(names) => match driver.start_recording(names.as_deref()) {
            Ok(id) => println!("{} {}", "✓ Recording into".green(), id.to_string().bold()),
            Err(e) => report(e),
        },
        Command::StopRecord => match driver.stop_recording() {
            Ok(Some(id)) => println!("{} {}", "✓ Recording saved to".green(), id.to_string().bold()),
            Ok(None) => println!("  {}", "No recording in progress.".dimmed()),
            Err(e) => report(e),
        },
        Command::Buffer(on) => {
            if on {
                driver.enable_buffering();
            } else {
                driver.disable_buffering();
            }
            println!("  buffering {}", flag(on));
        }
        Command::Horizon(None) => {
            println!("  buffer horizon: {} s", driver.buffer_horizon().as_secs_f64().to_string().yellow());
        }
        Command::Horizon(Some(secs)) => {
            driver.set_buffer_horizon(Duration::from_secs_f64(secs));
            println!("{} {} s", "✓ Buffer horizon set to".green(), secs);
        }
        Command::Dump { prefix, names } => match driver.dump(&prefix, names.as_deref()) {
            Ok(id) => println!("{} {}", "✓ Buffer dumped to".green(), id.to_string().bold()),
            Err(e) => report(e),
        },
        Command::Files => cmd_files(bridge),
        Command::RemoveFiles(ids) => {
            let result = match ids {
                Some(ids) => driver.remove_containers(&ids.into_iter().map(ContainerId).collect::<Vec<_>>()),
                None => driver.remove_all_containers(),
            };
            match result {
                Ok(n) => println!("{} {} container(s)", "✓ Removed".green(), n),
                Err(e) => report(e),
            }
        }
        Command::Add { key, frequency, kind } => match bridge.register_memory_converter(&key, frequency, kind) {
            Ok(_) => println!("{} {} at {} Hz", "✓ Registered".green(), key.bold(), frequency),
            Err(e) => report(e),
        },
        Command::Event { key, kind } => match bridge.register_event_converter(&key, kind) {
            Ok(()) => println!("{} event {}", "✓ Registered".green(), key.bold()),
            Err(e) => report(e),
        },
        Command::Batch(path) => match bridge.add_memory_converters_from(&path) {
            Ok(_) => println!("{} {}", "✓ Registered converters from".green(), path.display()),
            Err(e) => report(e),
        },
        Command::Raise { key, value } => {
            let delivered = session.raise_event(&key, value);
            println!("  raised {} ({} subscriber(s))", key.bold(), delivered);
        }
        Command::Send { topic, value } => match Envelope::new(&topic, driver.now(), &value) {
            Ok(envelope) => {
                let delivered = driver.bus().publish(envelope);
                println!("  sent on {} ({} receiver(s))", topic.bold(), delivered);
            }
            Err(e) => report(e),
        },
        Command::Quit => {}
    }
}

fn cmd_help() {
    println!();
    println!("{}", "sensbridge Commands".bold().underline());
    let rows = [
        ("/list", "tasks, event sources and delivery flags"),
        ("/emit on|off", "toggle live publishing"),
        ("/record [names…]", "start recording (all or named)"),
        ("/stoprecord", "close the recording container"),
        ("/buffer on|off", "toggle the rolling buffer"),
        ("/horizon [secs]", "show or set the buffer horizon"),
        ("/dump <prefix> [names…]", "flush the buffer into a new container"),
        ("/files", "list containers and storage use"),
        ("/rmfiles [ids…]", "delete containers (all when none named)"),
        ("/add <key> <hz> [kind]", "register a memory value converter"),
        ("/event <key> [kind]", "register an event converter"),
        ("/batch <file>", "register a memory list converter from JSON"),
        ("/raise <key> <json>", "raise a simulated event"),
        ("/send <topic> <json>", "publish on the bus for inbound subscribers"),
        ("/quit  /exit", "stop the bridge and exit"),
    ];
    for (command, what) in rows {
        println!("  {:<26} – {}", command.bold().cyan(), what);
    }
    println!("  kinds: {}", DataKind::HELP.dimmed());
    println!();
}

fn cmd_list(bridge: &Bridge) {
    let driver = bridge.driver();
    println!("{}", "Converters".bold().underline());
    for name in driver.list_names() {
        println!("    • {}", name.bold());
    }
    println!(
        "  emit {}  buffering {}  recording {}  horizon {} s",
        flag(driver.is_emit_enabled()),
        flag(driver.is_buffering()),
        flag(driver.is_recording()),
        driver.buffer_horizon().as_secs_f64()
    );
    let inbound = driver.subscriber_names();
    if !inbound.is_empty() {
        println!("  inbound: {}", inbound.join(", "));
    }
    let topics = driver.subscribed_topics();
    if topics.is_empty() {
        println!("  {}", "No topic has a subscriber.".dimmed());
    } else {
        println!("  subscribed: {}", topics.join(", "));
    }
}

fn cmd_files(bridge: &Bridge) {
    let driver = bridge.driver();
    match driver.list_containers() {
        Ok(ids) if ids.is_empty() => println!("  {}", "No containers.".dimmed()),
        Ok(ids) => {
            println!("{}", "Containers".bold().underline());
            for id in ids {
                println!("    • {}", id);
            }
        }
        Err(e) => return report(e),
    }
    match driver.storage_used() {
        Ok(bytes) => println!(
            "  {} of {} bytes used",
            bytes.to_string().yellow(),
            driver.config().storage_limit
        ),
        Err(e) => report(e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn flag(on: bool) -> colored::ColoredString {
    if on { "on".green() } else { "off".yellow() }
}

fn report(e: impl std::fmt::Display) {
    println!("{}: {}", "Error".red(), e);
}
