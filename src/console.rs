//! Terminal output - widget state feed and formatted listings

use crate::catalog::{Access, KeyCatalog};
use crate::host::{StateLine, StateLines};
use crate::store::{StoreStats, SubscriptionInfo, SubscriptionState};
use chrono::{DateTime, Local};
use colored::*;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::debug;

/// Prints every state change of the watched widgets
#[derive(Default)]
pub struct Console {
    watchers: DashMap<String, JoinHandle<()>>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print `lines` until the stream ends or the widget is unwatched
    pub fn watch(&self, name: &str, mut lines: StateLines) {
        let label = name.to_string();
        let task = tokio::spawn(async move {
            while let Some(line) = lines.next().await {
                println!("{}", format_state(Local::now(), &label, &line));
            }
            debug!(widget = %label, "State feed ended");
        });
        if let Some(previous) = self.watchers.insert(name.to_string(), task) {
            previous.abort();
        }
    }

    pub fn unwatch(&self, name: &str) {
        if let Some((_, task)) = self.watchers.remove(name) {
            task.abort();
        }
    }

    pub fn watching(&self) -> usize {
        self.watchers.len()
    }

    pub fn shutdown(&self) {
        for entry in self.watchers.iter() {
            entry.value().abort();
        }
        self.watchers.clear();
    }
}

/// One state line: time, widget name, state
pub fn format_state(time: DateTime<Local>, name: &str, line: &StateLine) -> String {
    let text = if line.connected {
        line.text.bright_green()
    } else {
        line.text.bright_black()
    };
    format!(
        "[{}] {:12} {}",
        time.format("%H:%M:%S%.3f").to_string().dimmed(),
        name.cyan(),
        text
    )
}

pub fn print_notice(message: &str) {
    println!("{}", message.yellow());
}

pub fn print_error(message: &str) {
    println!("{} {}", "error:".bright_red().bold(), message);
}

/// Key catalogue table for `--list-keys`
pub fn format_catalog(catalog: &KeyCatalog) -> String {
    let mut out = format!("{}\n", "=== Known Keys ===".bold().cyan());
    let mut domain = "";
    for descriptor in catalog.descriptors() {
        if descriptor.domain != domain {
            domain = descriptor.domain.as_str();
            out.push_str(&format!("\n{}\n", domain.bold()));
        }
        let access = match descriptor.access {
            Access::Read => "r ".normal(),
            Access::ReadWrite => "rw".green(),
            Access::Action => "x ".yellow(),
        };
        let indexed = if descriptor.indexed { "[i]" } else { "   " };
        out.push_str(&format!(
            "  {} {:32}{} {:7} {}\n",
            access,
            descriptor.parameter,
            indexed,
            descriptor.kind.to_string(),
            descriptor.description.dimmed()
        ));
        if !descriptor.choices().is_empty() {
            out.push_str(&format!(
                "       {:32}    one of: {}\n",
                "",
                descriptor.choices().join(", ")
            ));
        }
    }
    out
}

pub fn format_subscriptions(subscriptions: &[SubscriptionInfo]) -> String {
    if subscriptions.is_empty() {
        return format!("{}", "no open subscriptions".dimmed());
    }
    subscriptions
        .iter()
        .map(|info| {
            let state = match info.state {
                SubscriptionState::Live => info.state.to_string().green(),
                SubscriptionState::Failed => info.state.to_string().red(),
            };
            format!(
                "  {:40} {:6} bindings={} gen={}",
                info.key.to_string(),
                state,
                info.bindings,
                info.generation
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_stats(stats: &StoreStats) -> String {
    format!("{} {}", "store:".bold(), stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::load_default_catalog;
    use crate::key::KeyId;
    use chrono::TimeZone;

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_format_state() {
        plain();
        let time = Local.with_ymd_and_hms(2024, 5, 1, 14, 3, 9).unwrap();
        let line = StateLine {
            text: "120 m (range 20 m to 500 m)".into(),
            connected: true,
        };
        assert_eq!(
            format_state(time, "height", &line),
            "[14:03:09.000] height       120 m (range 20 m to 500 m)"
        );
    }

    #[test]
    fn test_format_catalog_lists_every_key() {
        plain();
        let catalog = load_default_catalog().unwrap();
        let text = format_catalog(&catalog);
        assert!(text.contains("FlightController"));
        assert!(text.contains("HeightLimitRangeMax"));
        assert!(text.contains("one of: Normal, NotInserted, Full, Formatting, Slow, Error"));
    }

    #[test]
    fn test_format_subscriptions() {
        plain();
        assert_eq!(format_subscriptions(&[]), "no open subscriptions");
        let text = format_subscriptions(&[SubscriptionInfo {
            key: KeyId::indexed("Camera", "SDCardState", 0),
            state: SubscriptionState::Failed,
            bindings: 2,
            generation: 3,
        }]);
        assert!(text.contains("Camera.SDCardState[0]"));
        assert!(text.contains("bindings=2 gen=3"));
    }

    #[tokio::test]
    async fn test_watch_replaces_and_unwatches() {
        let console = Console::new();
        console.watch("a", Box::pin(tokio_stream::pending::<StateLine>()));
        console.watch("a", Box::pin(tokio_stream::pending::<StateLine>()));
        console.watch("b", Box::pin(tokio_stream::empty::<StateLine>()));
        assert_eq!(console.watching(), 2);
        console.unwatch("a");
        assert_eq!(console.watching(), 1);
        console.shutdown();
        assert_eq!(console.watching(), 0);
    }
}
