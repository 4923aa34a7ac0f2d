//! Channel model: the classifier's logical grouping of messages

use serde::{Deserialize, Serialize};

/// A channel as presented to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    /// Lower sorts first
    pub display_order: u32,
    /// Number of non-trashed messages currently in the channel
    pub message_count: usize,
}

impl Channel {
    pub fn new(name: impl Into<String>, display_order: u32) -> Self {
        Self {
            name: name.into(),
            display_order,
            message_count: 0,
        }
    }

    pub fn with_message_count(mut self, count: usize) -> Self {
        self.message_count = count;
        self
    }
}

/// Display order given to channels found in the store but missing from the taxonomy
pub const UNLISTED_CHANNEL_ORDER: u32 = 1000;

/// Sort channels by display order, then name
pub fn sort_channels(channels: &mut [Channel]) {
    channels.sort_by(|a, b| {
        a.display_order
            .cmp(&b.display_order)
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_channels() {
        let mut channels = vec![
            Channel::new("Receipts", 3),
            Channel::new("Archive", UNLISTED_CHANNEL_ORDER),
            Channel::new("Urgent", 0),
            Channel::new("People", 1),
        ];
        sort_channels(&mut channels);
        let names: Vec<_> = channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Urgent", "People", "Receipts", "Archive"]);
    }
}
