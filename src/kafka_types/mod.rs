mod group;
mod topic;
mod topic_partition;

pub use group::{GroupOffsets, GroupTopicPartition};
pub use topic::Topic;
pub use topic_partition::TopicPartition;
