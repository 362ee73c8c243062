//! Command-line REPL: parsing, execution and the line reader thread

use crate::action::ActionEvent;
use crate::catalog::{Access, KeyCatalog};
use crate::console;
use crate::host::WidgetHost;
use crate::key::Key;
use crate::store::KeyedStore;
use crate::transport::MemoryTransport;
use anyhow::{bail, Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;
use std::fmt::Write as _;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

pub const HELP: &str = "\
commands:
  push <key> <value>      simulate a remote push
  get <key>               cached and remote value
  set <key> <value>       write a value
  action <key> [arg]      invoke an action and follow its progress
  connect | disconnect    flip the simulated product connection
  select <widget> <index> move a widget to another camera/battery
  widgets                 hosted widgets and their state
  subs                    open subscriptions
  stats                   store counters
  help | quit
keys are written Domain.Parameter or Domain.Parameter[index]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Push { key: String, value: String },
    Get { key: String },
    Set { key: String, value: String },
    Action { key: String, arg: Option<String> },
    Connect,
    Disconnect,
    Select { widget: String, index: u32 },
    Widgets,
    Subs,
    Stats,
    Help,
    Quit,
}

/// Parse one input line; blank lines yield `None`
///
/// Values keep their inner spaces (`push Product.Model Mini 4`).
pub fn parse_command(line: &str) -> Result<Option<ReplCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let (first, tail) = match rest.split_once(char::is_whitespace) {
        Some((first, tail)) => (first, tail.trim()),
        None => (rest, ""),
    };

    let need_key = |usage: &str| -> Result<String> {
        if first.is_empty() {
            bail!("usage: {}", usage);
        }
        Ok(first.to_string())
    };
    let need_value = |usage: &str| -> Result<String> {
        if tail.is_empty() {
            bail!("usage: {}", usage);
        }
        Ok(tail.to_string())
    };
    let no_args = |cmd: ReplCommand| -> Result<Option<ReplCommand>> {
        if !rest.is_empty() {
            bail!("'{}' takes no arguments", word);
        }
        Ok(Some(cmd))
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "push" => ReplCommand::Push {
            key: need_key("push <key> <value>")?,
            value: need_value("push <key> <value>")?,
        },
        "get" => ReplCommand::Get {
            key: need_key("get <key>")?,
        },
        "set" => ReplCommand::Set {
            key: need_key("set <key> <value>")?,
            value: need_value("set <key> <value>")?,
        },
        "action" | "do" => ReplCommand::Action {
            key: need_key("action <key> [arg]")?,
            arg: (!tail.is_empty()).then(|| tail.to_string()),
        },
        "select" => {
            let widget = need_key("select <widget> <index>")?;
            let index = need_value("select <widget> <index>")?;
            let index = index
                .parse::<u32>()
                .with_context(|| format!("index must be a non-negative integer, got '{}'", index))?;
            ReplCommand::Select { widget, index }
        }
        "connect" => return no_args(ReplCommand::Connect),
        "disconnect" => return no_args(ReplCommand::Disconnect),
        "widgets" | "ls" => return no_args(ReplCommand::Widgets),
        "subs" => return no_args(ReplCommand::Subs),
        "stats" => return no_args(ReplCommand::Stats),
        "help" | "?" => return no_args(ReplCommand::Help),
        "quit" | "exit" | "q" => return no_args(ReplCommand::Quit),
        other => bail!("unknown command '{}' (try 'help')", other),
    };
    Ok(Some(command))
}

/// Result of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

/// Everything the REPL can touch
pub struct Repl<'a> {
    pub store: &'a KeyedStore,
    pub simulator: &'a MemoryTransport,
    pub catalog: &'a KeyCatalog,
    pub host: &'a WidgetHost,
}

impl Repl<'_> {
    pub async fn execute(&self, command: ReplCommand) -> Result<Reply> {
        debug!(?command, "REPL command");
        let text = match command {
            ReplCommand::Push { key, value } => {
                let key = self.catalog.resolve(&key)?;
                let value = self.catalog.parse_value(&key, &value)?;
                self.simulator.push(&key, value.clone());
                format!("pushed {} = {}", key, value)
            }
            ReplCommand::Get { key } => {
                let key = self.catalog.resolve(&key)?;
                let cached = self
                    .store
                    .get_raw(&key)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".into());
                let remote = match self.store.get_remote::<Value>(&key).await {
                    Ok(value) => value.to_string(),
                    Err(e) => format!("error: {}", e.description()),
                };
                format!("{}  cached: {}  remote: {}", key, cached, remote)
            }
            ReplCommand::Set { key, value } => {
                let key = self.catalog.resolve(&key)?;
                let descriptor = self.catalog.get(&key).context("unknown key")?;
                if !descriptor.access.is_writable() {
                    bail!("{} is read-only", key.name());
                }
                let value = self.catalog.parse_value(&key, &value)?;
                self.store
                    .set_raw(&key, value.clone())
                    .await
                    .map_err(|e| anyhow::anyhow!(e.description()))?;
                format!("{} set to {}", key, value)
            }
            ReplCommand::Action { key, arg } => {
                let key = self.catalog.resolve(&key)?;
                let descriptor = self.catalog.get(&key).context("unknown key")?;
                if descriptor.access != Access::Action {
                    bail!("{} is not an action", key.name());
                }
                let arg = self
                    .catalog
                    .parse_value(&key, arg.as_deref().unwrap_or(""))?;
                self.run_action(Key::<Value>::from_id(key), arg).await?
            }
            ReplCommand::Connect => {
                self.simulator.connect();
                "product connected".into()
            }
            ReplCommand::Disconnect => {
                self.simulator.disconnect();
                "product disconnected".into()
            }
            ReplCommand::Select { widget, index } => {
                if let Some(ticket) = self.host.select(&widget, index)? {
                    if let Err(e) = ticket.await {
                        warn!(%widget, "Selection not persisted: {}", e);
                    }
                }
                format!("{} now follows index {}", widget, index)
            }
            ReplCommand::Widgets => self.widgets(),
            ReplCommand::Subs => {
                let subscriptions = self.store.subscriptions().await?;
                console::format_subscriptions(&subscriptions)
            }
            ReplCommand::Stats => console::format_stats(&self.store.stats().await?),
            ReplCommand::Help => HELP.to_string(),
            ReplCommand::Quit => return Ok(Reply::Quit),
        };
        Ok(Reply::Text(text))
    }

    async fn run_action(&self, key: Key<Value>, arg: Value) -> Result<String> {
        let mut out = String::new();
        let mut events = self.store.perform_action_with_progress(&key, arg);
        while let Some(event) = events.next().await {
            match event {
                ActionEvent::Progress(value) => {
                    let _ = writeln!(out, "{} progress {}", key, value);
                }
                ActionEvent::Finished(Ok(result)) => {
                    let _ = write!(out, "{} finished: {}", key, result);
                }
                ActionEvent::Finished(Err(e)) => bail!("{}", e.description()),
            }
        }
        Ok(out)
    }

    fn widgets(&self) -> String {
        if self.host.is_empty() {
            return "no widgets configured".into();
        }
        self.host
            .iter()
            .map(|(name, widget)| {
                format!(
                    "  {:12} {:12} #{} {:10} {}",
                    name,
                    widget.kind().to_string(),
                    widget.index(),
                    widget.state().to_string(),
                    widget.current_line().text
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Read lines on a dedicated thread
///
/// The channel closes on end of input; Ctrl-C sends `quit`.
pub fn spawn_reader(prompt: &str) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let prompt = prompt.to_string();

    std::thread::Builder::new()
        .name("repl".into())
        .spawn(move || {
            let mut editor = match DefaultEditor::new() {
                Ok(editor) => editor,
                Err(e) => {
                    warn!("REPL unavailable: {}", e);
                    return;
                }
            };

            loop {
                match editor.readline(&prompt) {
                    Ok(line) => {
                        if !line.trim().is_empty() {
                            let _ = editor.add_history_entry(line.as_str());
                        }
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(ReadlineError::Interrupted) => {
                        let _ = tx.send("quit".into());
                        break;
                    }
                    Err(ReadlineError::Eof) => break,
                    Err(e) => {
                        warn!("REPL read failed: {}", e);
                        break;
                    }
                }
            }
        })
        .map_err(|e| warn!("Failed to start REPL thread: {}", e))
        .ok();

    rx
}
