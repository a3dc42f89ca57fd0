//! In-memory Cluster, standing in for Kafka in tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use tokio::time::{sleep, Duration};

use crate::cluster_offsets::{BrokerOffsetReader, ClusterOffsetsResult, GroupDirectory};
use crate::kafka_types::{GroupOffsets, TopicPartition};

#[derive(Default)]
struct FakeState {
    groups: BTreeMap<String, GroupOffsets>,
    newest: HashMap<TopicPartition, i64>,
    failing_groups: HashSet<String>,
    failing_partitions: HashSet<TopicPartition>,
    hanging_partitions: HashSet<TopicPartition>,
    directory_down: bool,
    list_delay: Duration,
    in_flight: usize,
    max_in_flight: usize,
    list_calls: usize,
    broker_fetches: usize,
}

#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    fn with_state<T, F: FnOnce(&mut FakeState) -> T>(&self, f: F) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn commit(&self, group: &str, topic: &str, partition: u32, offset: i64) {
        self.with_state(|s| {
            s.groups
                .entry(group.to_string())
                .or_default()
                .entry(topic.to_string())
                .or_default()
                .insert(partition, offset);
        });
    }

    pub fn produce(&self, topic: &str, partition: u32, newest_offset: i64) {
        self.with_state(|s| s.newest.insert(TopicPartition::new(topic, partition), newest_offset));
    }

    pub fn remove_group(&self, group: &str) {
        self.with_state(|s| s.groups.remove(group));
    }

    pub fn fail_group(&self, group: &str) {
        self.with_state(|s| s.failing_groups.insert(group.to_string()));
    }

    pub fn fail_partition(&self, topic: &str, partition: u32) {
        self.with_state(|s| s.failing_partitions.insert(TopicPartition::new(topic, partition)));
    }

    pub fn hang_partition(&self, topic: &str, partition: u32) {
        self.with_state(|s| s.hanging_partitions.insert(TopicPartition::new(topic, partition)));
    }

    pub fn set_directory_down(&self, down: bool) {
        self.with_state(|s| s.directory_down = down);
    }

    /// Every listing of the Groups will take this long.
    pub fn set_list_delay(&self, delay: Duration) {
        self.with_state(|s| s.list_delay = delay);
    }

    pub fn list_calls(&self) -> usize {
        self.with_state(|s| s.list_calls)
    }

    /// Highest number of Group listings observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.with_state(|s| s.max_in_flight)
    }

    pub fn broker_fetches(&self) -> usize {
        self.with_state(|s| s.broker_fetches)
    }
}

#[async_trait]
impl GroupDirectory for FakeCluster {
    async fn list_groups(&self) -> ClusterOffsetsResult<Vec<String>> {
        let delay = self.with_state(|s| {
            s.list_calls += 1;
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
            s.list_delay
        });

        if !delay.is_zero() {
            sleep(delay).await;
        }

        self.with_state(|s| {
            s.in_flight -= 1;
            if s.directory_down {
                let e = KafkaError::GroupListFetch(RDKafkaErrorCode::BrokerTransportFailure);
                return Err(e.into());
            }
            Ok(s.groups.keys().cloned().collect())
        })
    }

    async fn fetch_group_offsets(&self, group: &str) -> ClusterOffsetsResult<GroupOffsets> {
        self.with_state(|s| {
            if s.failing_groups.contains(group) {
                let e = KafkaError::GroupListFetch(RDKafkaErrorCode::CoordinatorNotAvailable);
                return Err(e.into());
            }
            Ok(s.groups.get(group).cloned().unwrap_or_default())
        })
    }
}

#[async_trait]
impl BrokerOffsetReader for FakeCluster {
    async fn fetch_newest_offset(&self, tp: &TopicPartition) -> ClusterOffsetsResult<i64> {
        let hanging = self.with_state(|s| {
            s.broker_fetches += 1;
            s.hanging_partitions.contains(tp)
        });

        if hanging {
            std::future::pending::<()>().await;
        }

        self.with_state(|s| {
            if s.failing_partitions.contains(tp) {
                let e = KafkaError::OffsetFetch(RDKafkaErrorCode::UnknownTopicOrPartition);
                return Err(e.into());
            }
            Ok(s.newest.get(tp).copied().unwrap_or(0))
        })
    }
}
