//! CLI channel — stdin/stdout REPL for local testing.
//!
//! `/name` lines are commands, `!trigger` lines press a button, anything
//! else is a text message.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Affordance, Channel, EventKind, EventStream, InboundEvent};
use crate::error::ChannelError;

const LOCAL_USER: &str = "local-user";

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel;

impl CliChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn one console line into an event; blank lines yield nothing.
///
/// Whitespace is ignored when spotting commands and triggers, but a text
/// message is passed on exactly as typed.
fn parse_line(line: &str) -> Option<InboundEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let kind = match trimmed.strip_prefix('!') {
        Some(trigger) => EventKind::Trigger(trigger.trim().to_string()),
        None => EventKind::from_text(line),
    };
    Some(InboundEvent::new(LOCAL_USER, LOCAL_USER, kind))
}

fn render(text: &str, affordances: &[Affordance]) -> String {
    let mut out = text.to_string();
    for a in affordances {
        out.push_str(&format!("\n  [{}] (!{})", a.label, a.trigger));
    }
    out
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(event) = parse_line(&line) else {
                            eprint!("> ");
                            continue;
                        };
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send_text(
        &self,
        _chat_id: &str,
        text: &str,
        affordances: &[Affordance],
    ) -> Result<(), ChannelError> {
        println!("\n{}\n", render(text, affordances));
        eprint!("> ");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Command;

    #[test]
    fn cli_channel_name() {
        assert_eq!(CliChannel::new().name(), "cli");
    }

    #[test]
    fn parse_line_classifies_input() {
        assert_eq!(
            parse_line("/start").unwrap().kind,
            EventKind::Command(Command::Start)
        );
        assert_eq!(
            parse_line("!new_task").unwrap().kind,
            EventKind::Trigger("new_task".to_string())
        );
        assert!(parse_line("   ").is_none());
    }

    #[test]
    fn parse_line_keeps_text_verbatim() {
        assert_eq!(
            parse_line("  Пустой склад ").unwrap().kind,
            EventKind::Text("  Пустой склад ".to_string())
        );
        assert_eq!(
            parse_line("  /cancel ").unwrap().kind,
            EventKind::Command(Command::Cancel)
        );
        assert_eq!(
            parse_line(" !new_task ").unwrap().kind,
            EventKind::Trigger("new_task".to_string())
        );
    }

    #[test]
    fn parse_line_uses_fixed_local_identity() {
        let event = parse_line("hello").unwrap();
        assert_eq!(event.user_id.as_str(), "local-user");
        assert_eq!(event.chat_id, "local-user");
    }

    #[test]
    fn render_lists_affordances() {
        let out = render("Готово", &[Affordance::new_task()]);
        assert_eq!(out, "Готово\n  [Новая задача] (!new_task)");
        assert_eq!(render("Готово", &[]), "Готово");
    }
}
