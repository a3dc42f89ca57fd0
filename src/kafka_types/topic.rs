use rdkafka::metadata::MetadataTopic;

use super::TopicPartition;

/// A Topic and the identifiers of its Partitions, as reported by the Cluster metadata.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Topic {
    pub name: String,
    pub partitions: Vec<u32>,
}

impl Topic {
    /// Expand into one [`TopicPartition`] per Partition.
    pub fn topic_partitions(&self) -> impl Iterator<Item = TopicPartition> + '_ {
        self.partitions.iter().map(|p| TopicPartition::new(self.name.clone(), *p))
    }
}

impl From<&MetadataTopic> for Topic {
    fn from(t: &MetadataTopic) -> Self {
        Topic {
            name: t.name().to_owned(),
            partitions: t.partitions().iter().map(|p| p.id() as u32).collect(),
        }
    }
}
