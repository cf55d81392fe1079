pub mod store;

use crate::client::{ClientError, Position, StartingPoint, StreamClient};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use store::{CheckpointError, CheckpointStore, StoredCheckpoint};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionCheckpoint {
    pub partition_id: String,
    pub position: Position,
}

impl PartitionCheckpoint {
    pub fn new(partition_id: impl Into<String>, position: Position) -> Self {
        Self {
            partition_id: partition_id.into(),
            position,
        }
    }
}

/// Point-in-time read positions, one per partition, in cursor order.
///
/// Serializes as a plain JSON array of `{partition_id, position}` objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint {
    partitions: Vec<PartitionCheckpoint>,
}

impl Checkpoint {
    pub fn new(partitions: Vec<PartitionCheckpoint>) -> Self {
        Self { partitions }
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PartitionCheckpoint> {
        self.partitions.iter()
    }

    pub fn position_of(&self, partition_id: &str) -> Option<&Position> {
        self.partitions
            .iter()
            .find(|p| p.partition_id == partition_id)
            .map(|p| &p.position)
    }
}

impl FromIterator<PartitionCheckpoint> for Checkpoint {
    fn from_iter<I: IntoIterator<Item = PartitionCheckpoint>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for Checkpoint {
    type Item = PartitionCheckpoint;
    type IntoIter = std::vec::IntoIter<PartitionCheckpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions.into_iter()
    }
}

impl<'a> IntoIterator for &'a Checkpoint {
    type Item = &'a PartitionCheckpoint;
    type IntoIter = std::slice::Iter<'a, PartitionCheckpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.partitions.iter()
    }
}

/// Produces the checkpoint a reader starts from.
pub trait CheckpointGenerator: fmt::Display {
    fn generate(&self, client: &dyn StreamClient) -> Result<Checkpoint, ClientError>;
}

/// Resumes from a previously taken checkpoint without asking the stream.
#[derive(Debug, Clone)]
pub struct StaticCheckpointGenerator {
    checkpoint: Checkpoint,
}

impl StaticCheckpointGenerator {
    pub fn new(checkpoint: Checkpoint) -> Self {
        Self { checkpoint }
    }
}

impl CheckpointGenerator for StaticCheckpointGenerator {
    fn generate(&self, _client: &dyn StreamClient) -> Result<Checkpoint, ClientError> {
        Ok(self.checkpoint.clone())
    }
}

impl fmt::Display for StaticCheckpointGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stored checkpoint over {} partitions", self.checkpoint.len())
    }
}

/// Lists the stream's partitions and resolves a starting point in each.
#[derive(Debug, Clone)]
pub struct DynamicCheckpointGenerator {
    start: StartingPoint,
}

impl DynamicCheckpointGenerator {
    pub fn new(start: StartingPoint) -> Self {
        Self { start }
    }
}

impl CheckpointGenerator for DynamicCheckpointGenerator {
    fn generate(&self, client: &dyn StreamClient) -> Result<Checkpoint, ClientError> {
        let partitions = client.list_partitions()?;
        tracing::debug!(
            partitions = partitions.len(),
            start = %self.start,
            "Resolving starting positions"
        );

        partitions
            .into_iter()
            .map(|partition_id| -> Result<PartitionCheckpoint, ClientError> {
                let position = client.resolve_position(&partition_id, &self.start)?;
                Ok(PartitionCheckpoint::new(partition_id, position))
            })
            .collect()
    }
}

impl fmt::Display for DynamicCheckpointGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all partitions from {}", self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InMemoryStream;
    use chrono::Utc;

    #[test]
    fn test_checkpoint_json_layout() {
        let checkpoint = Checkpoint::new(vec![
            PartitionCheckpoint::new("s1", Position::AfterSequence { sequence: 3 }),
            PartitionCheckpoint::new("s2", Position::TrimHorizon),
        ]);

        let json = serde_json::to_string(&checkpoint).unwrap();
        assert_eq!(
            json,
            r#"[{"partition_id":"s1","position":{"type":"after_sequence","sequence":3}},{"partition_id":"s2","position":{"type":"trim_horizon"}}]"#
        );

        let parsed: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, checkpoint);
    }

    #[test]
    fn test_static_generator_returns_checkpoint() {
        let checkpoint = Checkpoint::new(vec![PartitionCheckpoint::new(
            "s1",
            Position::AfterSequence { sequence: 9 },
        )]);
        let generator = StaticCheckpointGenerator::new(checkpoint.clone());
        let stream = InMemoryStream::new();

        assert_eq!(generator.generate(&stream).unwrap(), checkpoint);
    }

    #[test]
    fn test_dynamic_generator_resolves_each_partition() {
        let stream = InMemoryStream::with_partitions(["s1", "s2"]);
        stream.append("s2", Utc::now(), Vec::new());

        let generator = DynamicCheckpointGenerator::new(StartingPoint::Latest);
        let checkpoint = generator.generate(&stream).unwrap();

        assert_eq!(checkpoint.len(), 2);
        assert_eq!(checkpoint.position_of("s1"), Some(&Position::TrimHorizon));
        assert_eq!(
            checkpoint.position_of("s2"),
            Some(&Position::AfterSequence { sequence: 1 })
        );
    }

    #[test]
    fn test_dynamic_generator_propagates_listing_failure() {
        let stream = InMemoryStream::with_partitions(["s1"]);
        stream.fail_listing(Some(ClientError::Transient("throttled".to_string())));

        let generator = DynamicCheckpointGenerator::new(StartingPoint::TrimHorizon);
        assert!(generator.generate(&stream).unwrap_err().is_transient());
    }
}
