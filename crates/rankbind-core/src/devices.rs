//! Accelerator device sets visible to a node

use serde::{Deserialize, Serialize};

use crate::{Rank, RankbindError, RankbindResult};

/// Ordered list of physical accelerator ids visible on a node.
///
/// Position in the list is the local rank; the value is what the driver
/// expects in `CUDA_VISIBLE_DEVICES`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSet {
    ids: Vec<u32>,
}

impl DeviceSet {
    /// Devices `0..count`
    pub fn from_count(count: u32) -> Self {
        Self {
            ids: (0..count).collect(),
        }
    }

    /// Parse a `CUDA_VISIBLE_DEVICES`-style list such as `"0,1,2,3"`
    pub fn parse(value: &str) -> RankbindResult<Self> {
        let value = value.trim();
        if value.is_empty() || value == "NoDevFiles" {
            return Ok(Self::default());
        }

        let mut ids = Vec::new();
        for part in value.split(',') {
            let part = part.trim();
            let id: u32 = part.parse().map_err(|_| {
                RankbindError::Config(format!("Invalid device id '{}' in '{}'", part, value))
            })?;
            if ids.contains(&id) {
                return Err(RankbindError::Config(format!(
                    "Device id {} listed twice in '{}'",
                    id, value
                )));
            }
            ids.push(id);
        }

        Ok(Self { ids })
    }

    pub fn len(&self) -> u32 {
        self.ids.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Physical id for a node-local rank
    pub fn get(&self, local_rank: Rank) -> Option<u32> {
        self.ids.get(local_rank as usize).copied()
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Render back to `CUDA_VISIBLE_DEVICES` form
    pub fn to_env_value(&self) -> String {
        self.ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Per-node count from a Slurm value such as `SLURM_GPUS_PER_NODE` or
/// `SLURM_NTASKS_PER_NODE`.
///
/// Accepts `"4"`, typed GPU requests `"a100:4"` / `"gpu:a100:4"` and the
/// compressed per-node list form `"4(x2)"`, of which the first entry is used.
pub fn parse_per_node_count(value: &str) -> RankbindResult<u32> {
    let first = value.split(',').next().unwrap_or_default().trim();
    let first = match first.find('(') {
        Some(idx) => &first[..idx],
        None => first,
    };
    let count = first.rsplit(':').next().unwrap_or_default();

    count.parse().map_err(|_| {
        RankbindError::Config(format!("Cannot read a per-node count from '{}'", value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_count() {
        let set = DeviceSet::from_count(4);
        assert_eq!(set.ids(), &[0, 1, 2, 3]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_parse_visible_devices() {
        let set = DeviceSet::parse("2, 3,5").unwrap();
        assert_eq!(set.ids(), &[2, 3, 5]);
        assert_eq!(set.get(1), Some(3));
        assert_eq!(set.get(3), None);
        assert_eq!(set.to_env_value(), "2,3,5");
    }

    #[test]
    fn test_parse_empty() {
        assert!(DeviceSet::parse("").unwrap().is_empty());
        assert!(DeviceSet::parse("NoDevFiles").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage_and_duplicates() {
        assert!(DeviceSet::parse("0,x").is_err());
        assert!(DeviceSet::parse("0,1,0").is_err());
    }

    #[test]
    fn test_parse_per_node_count() {
        assert_eq!(parse_per_node_count("4").unwrap(), 4);
        assert_eq!(parse_per_node_count("a100:2").unwrap(), 2);
        assert_eq!(parse_per_node_count("gpu:a100:8").unwrap(), 8);
        assert_eq!(parse_per_node_count("4(x2)").unwrap(), 4);
        assert_eq!(parse_per_node_count("2(x3),1").unwrap(), 2);
        assert!(parse_per_node_count("gpu:").is_err());
    }
}
