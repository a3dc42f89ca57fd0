use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use rdkafka::{
    consumer::{BaseConsumer, Consumer},
    ClientConfig, Offset, TopicPartitionList,
};
use tokio::{task::spawn_blocking, time::Duration};

use super::{BrokerOffsetReader, ClusterOffsetsResult, GroupDirectory};
use crate::constants::KONSUMER_OFFSETS_DATA_TOPIC;
use crate::kafka_types::{GroupOffsets, Topic, TopicPartition};

/// Names of the Consumer Groups, and the Topics they can have committed offsets for.
type Listing = (Vec<String>, Vec<Topic>);

/// [`GroupDirectory`] backed by the Group Coordinators of a Kafka Cluster.
///
/// Committed offsets are read with one Kafka Consumer per Group, configured with the
/// Group's `group.id` but never subscribed: it doesn't join the Group, so it doesn't
/// trigger rebalances. These Consumers are cached, and dropped once their Group
/// disappears from the Cluster.
///
/// Every call to [`GroupDirectory::list_groups`] also refreshes the catalog of Topics
/// used to ask the Group Coordinator for committed offsets.
pub struct KafkaGroupDirectory {
    client_config: ClientConfig,
    consumer: Arc<BaseConsumer>,
    fetch_timeout: Duration,

    topics: RwLock<Vec<Topic>>,
    group_consumers: Mutex<HashMap<String, Arc<BaseConsumer>>>,
}

impl KafkaGroupDirectory {
    /// Create a new [`KafkaGroupDirectory`]
    ///
    /// # Arguments
    ///
    /// * `client_config` - Kafka client configuration, used to create the per-Group Consumers
    /// * `consumer` - Kafka Consumer used to list Groups and fetch Cluster metadata
    /// * `fetch_timeout` - Maximum time to wait for every request to the Cluster
    pub fn new(
        client_config: ClientConfig,
        consumer: Arc<BaseConsumer>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            client_config,
            consumer,
            fetch_timeout,
            topics: RwLock::new(Vec::new()),
            group_consumers: Mutex::new(HashMap::new()),
        }
    }

    fn group_consumer(&self, group: &str) -> ClusterOffsetsResult<Arc<BaseConsumer>> {
        let mut guard = self.group_consumers.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(c) = guard.get(group) {
            return Ok(c.clone());
        }

        let mut config = self.client_config.clone();
        config.set("group.id", group).set("enable.auto.commit", "false");
        let consumer: Arc<BaseConsumer> = Arc::new(config.create()?);

        trace!("Created Consumer to read committed offsets of Group '{group}'");
        guard.insert(group.to_string(), consumer.clone());
        Ok(consumer)
    }

    fn forget_groups_not_in(&self, groups: &[String]) {
        let known = groups.iter().map(String::as_str).collect::<HashSet<&str>>();

        self.group_consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|g, _| known.contains(g.as_str()));
    }
}

#[async_trait]
impl GroupDirectory for KafkaGroupDirectory {
    async fn list_groups(&self) -> ClusterOffsetsResult<Vec<String>> {
        let consumer = self.consumer.clone();
        let timeout = self.fetch_timeout;

        let (groups, topics) = spawn_blocking(move || -> ClusterOffsetsResult<Listing> {
            let started = Instant::now();
            let groups = consumer
                .fetch_group_list(None, timeout)?
                .groups()
                .iter()
                .map(|g| g.name().to_string())
                .collect::<Vec<String>>();

            let topics = consumer
                .fetch_metadata(None, remaining(timeout, started.elapsed()))?
                .topics()
                .iter()
                // Ignore `__consumer_offsets` topic
                .filter(|mt| mt.name() != KONSUMER_OFFSETS_DATA_TOPIC)
                .map(Topic::from)
                .collect::<Vec<Topic>>();

            Ok((groups, topics))
        })
        .await??;

        debug!("Cluster reports {} Groups and {} Topics", groups.len(), topics.len());
        *self.topics.write().unwrap_or_else(PoisonError::into_inner) = topics;
        self.forget_groups_not_in(&groups);

        Ok(groups)
    }

    async fn fetch_group_offsets(&self, group: &str) -> ClusterOffsetsResult<GroupOffsets> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner).clone();
        if topics.is_empty() {
            return Ok(GroupOffsets::new());
        }

        let consumer = self.group_consumer(group)?;
        let timeout = self.fetch_timeout;

        spawn_blocking(move || -> ClusterOffsetsResult<GroupOffsets> {
            let mut tpl = TopicPartitionList::new();
            for tp in topics.iter().flat_map(Topic::topic_partitions) {
                tpl.add_partition(&tp.topic, tp.partition as i32);
            }

            let mut offsets = GroupOffsets::new();
            for elem in consumer.committed_offsets(tpl, timeout)?.elements() {
                // Partitions the Group never committed to are reported as `Offset::Invalid`
                if let Offset::Offset(o) = elem.offset() {
                    offsets
                        .entry(elem.topic().to_string())
                        .or_default()
                        .insert(elem.partition() as u32, o);
                }
            }

            Ok(offsets)
        })
        .await?
    }
}

/// What is left of `budget` after `elapsed`.
///
/// Requests issued one after the other share a single `budget`, so that together they
/// don't take longer than a single request is allowed to.
fn remaining(budget: Duration, elapsed: Duration) -> Duration {
    budget.saturating_sub(elapsed)
}

/// [`BrokerOffsetReader`] that reads the high watermark from the partition leader.
pub struct KafkaBrokerOffsetReader {
    consumer: Arc<BaseConsumer>,
    fetch_timeout: Duration,
}

impl KafkaBrokerOffsetReader {
    pub fn new(consumer: Arc<BaseConsumer>, fetch_timeout: Duration) -> Self {
        Self {
            consumer,
            fetch_timeout,
        }
    }
}

#[async_trait]
impl BrokerOffsetReader for KafkaBrokerOffsetReader {
    async fn fetch_newest_offset(&self, tp: &TopicPartition) -> ClusterOffsetsResult<i64> {
        let consumer = self.consumer.clone();
        let timeout = self.fetch_timeout;
        let (topic, partition) = (tp.topic.clone(), tp.partition as i32);

        let (_, high) =
            spawn_blocking(move || consumer.fetch_watermarks(&topic, partition, timeout)).await??;

        Ok(high)
    }
}
