//! Named identifier/mask subscriptions and their output channels.

use tokio::sync::broadcast;

use crate::core::message::CanMessage;

/// Sender half of a subscription's output channel.
pub type MessageSender = broadcast::Sender<CanMessage>;

/// Receiver half of a subscription's output channel.
pub type MessageReceiver = broadcast::Receiver<CanMessage>;

/// A named watch rule bound to its own output channel.
///
/// Matches any identifier whose bits agree with the target wherever the mask
/// has a set bit.
#[derive(Debug)]
pub struct Subscription {
    name: String,
    /// Stored pre-masked (`id & mask`).
    target: u32,
    mask: u32,
    output: MessageSender,
}

impl Subscription {
    /// Create a subscription with a fresh output channel.
    pub fn new(name: impl Into<String>, id: u32, mask: u32, buffer_size: usize) -> Self {
        let (output, _) = broadcast::channel(buffer_size.max(1));
        Self {
            name: name.into(),
            target: id & mask,
            mask,
            output,
        }
    }

    /// Subscription (and output channel) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target identifier, already masked.
    pub fn target(&self) -> u32 {
        self.target
    }

    /// Identifier mask.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Whether `can_id` satisfies this rule.
    #[inline]
    pub fn matches(&self, can_id: u32) -> bool {
        can_id & self.mask == self.target
    }

    /// Attach a new consumer to the output channel.
    pub fn subscribe(&self) -> MessageReceiver {
        self.output.subscribe()
    }

    /// Number of attached consumers.
    pub fn receiver_count(&self) -> usize {
        self.output.receiver_count()
    }

    /// Deliver a copy of `msg`. Returns false when nobody is listening.
    #[inline]
    pub fn deliver(&self, msg: &CanMessage) -> bool {
        self.output.send(*msg).is_ok()
    }
}

/// Ordered list of subscriptions with unique names.
///
/// Owns every output channel; dropping a subscription closes its channel and
/// consumers see `RecvError::Closed`.
#[derive(Debug)]
pub struct SubscriptionTable {
    entries: Vec<Subscription>,
    buffer_size: usize,
}

impl SubscriptionTable {
    /// Create an empty table whose channels buffer `buffer_size` messages.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            buffer_size,
        }
    }

    /// Append a subscription. Returns false if the name is taken.
    pub fn insert(&mut self, name: &str, id: u32, mask: u32) -> bool {
        if self.contains(name) {
            return false;
        }
        self.entries
            .push(Subscription::new(name, id, mask, self.buffer_size));
        true
    }

    /// Remove a subscription by name, returning it.
    pub fn remove(&mut self, name: &str) -> Option<Subscription> {
        let idx = self.entries.iter().position(|s| s.name == name)?;
        Some(self.entries.remove(idx))
    }

    /// Look up a subscription by name.
    pub fn get(&self, name: &str) -> Option<&Subscription> {
        self.entries.iter().find(|s| s.name == name)
    }

    /// Check if a name is in use.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Subscription at a table index.
    #[inline]
    pub fn at(&self, idx: usize) -> Option<&Subscription> {
        self.entries.get(idx)
    }

    /// Indices of all subscriptions matching `can_id`, in table order.
    pub fn matching(&self, can_id: u32) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, s)| s.matches(can_id))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Iterate in table order.
    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    /// Number of subscriptions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
