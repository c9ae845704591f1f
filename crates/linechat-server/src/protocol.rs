//! Line-command protocol: parsing and routing.
//!
//! | line                 | effect                             |
//! |----------------------|------------------------------------|
//! | `who`                | online listing, to the sender      |
//! | `rename|<name>`      | change the sender's display name   |
//! | `@<name>|<content>`  | private message to `<name>`        |
//! | anything else        | public broadcast                   |
//!
//! In the private-message target, `\|` is a literal bar and `\\` a literal
//! backslash. Any other backslash is kept as is.

use std::sync::Arc;

use tracing::debug;

use crate::broadcast::BroadcastHub;
use crate::errors::CommandError;
use crate::registry::PresenceRegistry;
use crate::session::Session;

/// Header line of the `who` listing.
pub const WHO_HEADER: &str = "online users:";

const RENAME_PREFIX: &str = "rename|";

/// One parsed client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Blank line; nothing to do.
    Empty,
    /// Online-users listing.
    Who,
    /// Change the sender's name.
    Rename(&'a str),
    /// Direct message to one session.
    Private {
        /// Target name, unescaped.
        to: String,
        /// Message body.
        content: &'a str,
    },
    /// Public chat line.
    Broadcast(&'a str),
}

/// Parse one line (terminator already stripped).
pub fn parse(line: &str) -> Result<Command<'_>, CommandError> {
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    if line == "who" {
        return Ok(Command::Who);
    }
    if let Some(name) = line.strip_prefix(RENAME_PREFIX) {
        if name.is_empty() {
            return Err(CommandError::EmptyName);
        }
        return Ok(Command::Rename(name));
    }
    if let Some(rest) = line.strip_prefix('@') {
        return parse_private(rest);
    }
    Ok(Command::Broadcast(line))
}

fn parse_private(rest: &str) -> Result<Command<'_>, CommandError> {
    let mut to = String::new();
    let mut chars = rest.char_indices().peekable();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next_if(|&(_, next)| next == '|' || next == '\\') {
                Some((_, escaped)) => to.push(escaped),
                None => to.push('\\'),
            },
            '|' => {
                if to.is_empty() {
                    return Err(CommandError::PrivateFormat);
                }
                let content = &rest[idx + 1..];
                if content.is_empty() {
                    return Err(CommandError::EmptyContent);
                }
                return Ok(Command::Private { to, content });
            }
            _ => to.push(ch),
        }
    }
    Err(CommandError::PrivateFormat)
}

/// Routes parsed commands to the registry, the hub, or a single session.
#[derive(Clone)]
pub struct ProtocolDispatcher {
    registry: Arc<PresenceRegistry>,
    hub: BroadcastHub,
}

impl ProtocolDispatcher {
    /// Create a dispatcher over shared state.
    pub fn new(registry: Arc<PresenceRegistry>, hub: BroadcastHub) -> Self {
        Self { registry, hub }
    }

    /// Handle one line from `session`. Errors go back to `session` only.
    pub fn handle_line(&self, session: &Arc<Session>, line: &str) {
        if let Err(err) = self.execute(session, line) {
            debug!(session_id = %session.id(), error = %err, "command rejected");
            let _ = session.send(err.to_string());
        }
    }

    fn execute(&self, session: &Arc<Session>, line: &str) -> Result<(), CommandError> {
        match parse(line)? {
            Command::Empty => {}
            Command::Who => {
                let _ = session.send(WHO_HEADER);
                for entry in self.registry.snapshot() {
                    let _ = session.send(format!("[{}]{}", entry.address, entry.name));
                }
            }
            Command::Rename(new_name) => {
                let _ = self.registry.rename(session, new_name)?;
                let _ = session.send(format!("rename success: {new_name}"));
            }
            Command::Private { to, content } => {
                let target = self
                    .registry
                    .lookup(&to)
                    .ok_or(CommandError::UnknownUser)?;
                let _ = target.send(format!("{} say to you: {content}", session.name()));
            }
            Command::Broadcast(text) => {
                let _ = self.hub.publish(session.announce(text));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastDispatcher;
    use crate::session::OutboundRx;

    fn drain(rx: &mut OutboundRx) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line.to_string());
        }
        out
    }

    struct Fixture {
        registry: Arc<PresenceRegistry>,
        dispatcher: ProtocolDispatcher,
        broadcasts: BroadcastDispatcher,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(PresenceRegistry::new());
            let (hub, broadcasts) = BroadcastHub::new(registry.clone());
            Self {
                dispatcher: ProtocolDispatcher::new(registry.clone(), hub),
                registry,
                broadcasts,
            }
        }

        fn join(&self, addr: &str) -> (Arc<Session>, OutboundRx) {
            let (session, rx) = Session::new(addr);
            self.registry.register(session.clone()).unwrap();
            (session, rx)
        }

        fn published(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(line) = self.broadcasts.queue_mut().try_recv() {
                out.push(line.to_string());
            }
            out
        }
    }

    // ── parse ───────────────────────────────────────────────────────

    #[test]
    fn parse_who() {
        assert_eq!(parse("who"), Ok(Command::Who));
        assert_eq!(parse("who "), Ok(Command::Broadcast("who ")));
    }

    #[test]
    fn parse_rename() {
        assert_eq!(parse("rename|alice"), Ok(Command::Rename("alice")));
        assert_eq!(parse("rename|"), Err(CommandError::EmptyName));
        assert_eq!(parse("rename"), Ok(Command::Broadcast("rename")));
    }

    #[test]
    fn parse_private_message() {
        assert_eq!(
            parse("@bob|hi"),
            Ok(Command::Private {
                to: "bob".into(),
                content: "hi"
            })
        );
    }

    #[test]
    fn parse_private_content_may_contain_bars() {
        assert_eq!(
            parse("@bob|a|b"),
            Ok(Command::Private {
                to: "bob".into(),
                content: "a|b"
            })
        );
    }

    #[test]
    fn parse_private_escaped_bar_in_name() {
        assert_eq!(
            parse(r"@b\|ob|hi"),
            Ok(Command::Private {
                to: "b|ob".into(),
                content: "hi"
            })
        );
        assert_eq!(
            parse(r"@b\\|hi"),
            Ok(Command::Private {
                to: r"b\".into(),
                content: "hi"
            })
        );
    }

    #[test]
    fn parse_private_keeps_lone_backslash_in_name() {
        assert_eq!(
            parse(r"@a\b|hi"),
            Ok(Command::Private {
                to: r"a\b".into(),
                content: "hi"
            })
        );
        assert_eq!(
            parse(r"@x\y\\|hi"),
            Ok(Command::Private {
                to: r"x\y\".into(),
                content: "hi"
            })
        );
    }

    #[test]
    fn parse_private_errors() {
        assert_eq!(parse("@|hi"), Err(CommandError::PrivateFormat));
        assert_eq!(parse("@bob|"), Err(CommandError::EmptyContent));
        assert_eq!(parse("@bob"), Err(CommandError::PrivateFormat));
        assert_eq!(parse("@"), Err(CommandError::PrivateFormat));
        assert_eq!(parse(r"@bob\|hi"), Err(CommandError::PrivateFormat));
    }

    #[test]
    fn parse_plain_and_empty() {
        assert_eq!(parse("hello"), Ok(Command::Broadcast("hello")));
        assert_eq!(parse(""), Ok(Command::Empty));
    }

    // ── dispatch ────────────────────────────────────────────────────

    #[test]
    fn who_lists_everyone_to_requester_only() {
        let mut fx = Fixture::new();
        let (a, mut rx_a) = fx.join("1.1.1.1:1");
        let (_b, mut rx_b) = fx.join("2.2.2.2:2");

        fx.dispatcher.handle_line(&a, "who");
        assert_eq!(
            drain(&mut rx_a),
            vec![
                WHO_HEADER.to_string(),
                "[1.1.1.1:1]1.1.1.1:1".to_string(),
                "[2.2.2.2:2]2.2.2.2:2".to_string(),
            ]
        );
        assert!(drain(&mut rx_b).is_empty());
        assert!(fx.published().is_empty());
    }

    #[test]
    fn rename_confirms_to_sender() {
        let fx = Fixture::new();
        let (a, mut rx_a) = fx.join("1.1.1.1:1");
        fx.dispatcher.handle_line(&a, "rename|alice");
        assert_eq!(drain(&mut rx_a), vec!["rename success: alice"]);
        assert_eq!(a.name(), "alice");
        assert!(fx.registry.contains("alice"));
    }

    #[test]
    fn rename_conflict_reports_and_keeps_name() {
        let fx = Fixture::new();
        let (a, _rx_a) = fx.join("1.1.1.1:1");
        let (b, mut rx_b) = fx.join("2.2.2.2:2");
        fx.dispatcher.handle_line(&a, "rename|alice");
        fx.dispatcher.handle_line(&b, "rename|alice");
        assert_eq!(drain(&mut rx_b), vec!["current username is already in use!"]);
        assert_eq!(b.name(), "2.2.2.2:2");
        assert_eq!(a.name(), "alice");
    }

    #[test]
    fn empty_rename_is_an_error() {
        let fx = Fixture::new();
        let (a, mut rx_a) = fx.join("1.1.1.1:1");
        fx.dispatcher.handle_line(&a, "rename|");
        assert_eq!(drain(&mut rx_a), vec!["username cannot be empty!"]);
        assert_eq!(a.name(), "1.1.1.1:1");
    }

    #[test]
    fn private_message_reaches_target_only() {
        let mut fx = Fixture::new();
        let (a, mut rx_a) = fx.join("1.1.1.1:1");
        let (bob, mut rx_bob) = fx.join("2.2.2.2:2");
        let (_c, mut rx_c) = fx.join("3.3.3.3:3");
        fx.dispatcher.handle_line(&bob, "rename|bob");
        let _ = drain(&mut rx_bob);

        fx.dispatcher.handle_line(&a, "@bob|hi");
        assert_eq!(drain(&mut rx_bob), vec!["1.1.1.1:1 say to you: hi"]);
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_c).is_empty());
        assert!(fx.published().is_empty());
    }

    #[test]
    fn private_message_reaches_name_with_backslash() {
        let mut fx = Fixture::new();
        let (a, mut rx_a) = fx.join("1.1.1.1:1");
        let (target, mut rx_target) = fx.join("2.2.2.2:2");
        fx.dispatcher.handle_line(&target, r"rename|a\b");
        assert_eq!(drain(&mut rx_target), vec![r"rename success: a\b"]);

        fx.dispatcher.handle_line(&a, r"@a\b|hi");
        assert_eq!(drain(&mut rx_target), vec!["1.1.1.1:1 say to you: hi"]);
        assert!(drain(&mut rx_a).is_empty());
        assert!(fx.published().is_empty());
    }

    #[test]
    fn private_message_errors_go_to_sender_only() {
        let mut fx = Fixture::new();
        let (a, mut rx_a) = fx.join("1.1.1.1:1");
        let (bob, mut rx_bob) = fx.join("2.2.2.2:2");
        fx.dispatcher.handle_line(&bob, "rename|bob");
        let _ = drain(&mut rx_bob);

        for line in ["@|hi", "@bob|", "@nosuchuser|hi"] {
            fx.dispatcher.handle_line(&a, line);
        }
        assert_eq!(
            drain(&mut rx_a),
            vec![
                "private message format is wrong! format:'@username|msg'",
                "private message content cannot be empty!",
                "username does not exist!",
            ]
        );
        assert!(drain(&mut rx_bob).is_empty());
        assert!(fx.published().is_empty());
    }

    #[test]
    fn plain_line_is_published_with_prefix() {
        let mut fx = Fixture::new();
        let (a, mut rx_a) = fx.join("1.1.1.1:1");
        fx.dispatcher.handle_line(&a, "rename|alice");
        let _ = drain(&mut rx_a);
        fx.dispatcher.handle_line(&a, "hello");
        assert_eq!(fx.published(), vec!["[1.1.1.1:1]alice: hello"]);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn empty_line_does_nothing() {
        let mut fx = Fixture::new();
        let (a, mut rx_a) = fx.join("1.1.1.1:1");
        fx.dispatcher.handle_line(&a, "");
        assert!(drain(&mut rx_a).is_empty());
        assert!(fx.published().is_empty());
    }
}
