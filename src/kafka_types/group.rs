use std::collections::HashMap;
use std::fmt;

use super::TopicPartition;

/// Committed offsets of a Consumer Group, indexed by Topic, then by Partition.
pub type GroupOffsets = HashMap<String, HashMap<u32, i64>>;

/// A [`TopicPartition`] consumed by a specific Consumer Group.
///
/// Identifies the Consumer Group offset and lag metrics.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct GroupTopicPartition {
    pub group: String,
    pub topic_partition: TopicPartition,
}

impl GroupTopicPartition {
    pub(crate) fn new(group: impl Into<String>, topic: impl Into<String>, partition: u32) -> Self {
        Self {
            group: group.into(),
            topic_partition: TopicPartition::new(topic, partition),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic_partition.topic
    }

    pub fn partition(&self) -> u32 {
        self.topic_partition.partition
    }
}

impl fmt::Display for GroupTopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.group, self.topic_partition)
    }
}
