use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Bus name of the coordinator.
pub const MANAGER: &str = "manager";

/// A message in flight between two named parties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Bus-wide send order.
    pub sequence: u64,
    pub sender: String,
    pub recipient: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// Point-to-point mailboxes keyed by recipient name.
///
/// Delivery preserves send order per recipient, and therefore per
/// `(sender, recipient)` pair. There is no broadcast.
#[derive(Debug, Default)]
pub struct MessageBus {
    mailboxes: HashMap<String, VecDeque<Envelope>>,
    next_sequence: u64,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message to the recipient's mailbox and returns its sequence.
    pub fn send(
        &mut self,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        body: impl Into<String>,
    ) -> u64 {
        let recipient = recipient.into();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.mailboxes
            .entry(recipient.clone())
            .or_default()
            .push_back(Envelope {
                sequence,
                sender: sender.into(),
                recipient,
                body: body.into(),
                timestamp: Utc::now(),
            });
        sequence
    }

    /// Drains and returns the named mailbox in delivery order.
    pub fn receive(&mut self, name: &str) -> Vec<Envelope> {
        self.mailboxes
            .get_mut(name)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of undelivered messages waiting for `name`.
    pub fn pending(&self, name: &str) -> usize {
        self.mailboxes.get(name).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_per_sender_recipient() {
        let mut bus = MessageBus::new();
        bus.send("A", "B", "x");
        bus.send("A", "B", "y");

        let bodies: Vec<String> = bus.receive("B").into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["x", "y"]);
    }

    #[test]
    fn test_receive_drains() {
        let mut bus = MessageBus::new();
        bus.send(MANAGER, "agent_1", "hello");
        assert_eq!(bus.pending("agent_1"), 1);
        assert_eq!(bus.receive("agent_1").len(), 1);
        assert_eq!(bus.pending("agent_1"), 0);
        assert!(bus.receive("agent_1").is_empty());
    }

    #[test]
    fn test_mailboxes_are_isolated() {
        let mut bus = MessageBus::new();
        bus.send("agent_1", "agent_2", "for two");
        bus.send("agent_2", "agent_1", "for one");
        bus.send("agent_3", "agent_2", "also for two");

        let two = bus.receive("agent_2");
        assert_eq!(two.len(), 2);
        assert_eq!(two[0].sender, "agent_1");
        assert_eq!(two[1].sender, "agent_3");
        assert!(two[0].sequence < two[1].sequence);
        assert_eq!(bus.receive("agent_1")[0].body, "for one");
        assert!(bus.receive("nobody").is_empty());
    }
}
