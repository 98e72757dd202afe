//! Region registry
//!
//! Holds the committed Region Records. Every role change is a single swap
//! under one write lock, so no reader can ever observe zero or two PRIMARY
//! records.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use super::errors::{RegionError, RegionResult};
use super::record::{HealthVerdict, RegionId, RegionRecord, RegionRole};

/// Shared store of Region Records.
#[derive(Debug)]
pub struct RegionRegistry {
    records: RwLock<BTreeMap<RegionId, RegionRecord>>,
}

impl RegionRegistry {
    /// Build a registry from seeded records.
    ///
    /// Rejects duplicate ids, fewer than two regions, or anything but
    /// exactly one PRIMARY.
    pub fn new(records: Vec<RegionRecord>) -> RegionResult<Self> {
        if records.len() < 2 {
            return Err(RegionError::InvalidTopology(
                "at least two regions are required".into(),
            ));
        }

        let mut seen = HashSet::new();
        for record in &records {
            if !seen.insert(record.region_id.clone()) {
                return Err(RegionError::InvalidTopology(format!(
                    "duplicate region id '{}'",
                    record.region_id
                )));
            }
        }

        let primaries = records.iter().filter(|r| r.is_primary()).count();
        if primaries != 1 {
            return Err(RegionError::SplitBrain { primaries });
        }

        Ok(Self {
            records: RwLock::new(
                records
                    .into_iter()
                    .map(|r| (r.region_id.clone(), r))
                    .collect(),
            ),
        })
    }

    /// Look up one region.
    pub fn get(&self, region_id: &RegionId) -> Option<RegionRecord> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.get(region_id).cloned())
    }

    /// Copy of every record, ordered by region id.
    pub fn snapshot(&self) -> Vec<RegionRecord> {
        self.records
            .read()
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The current PRIMARY.
    pub fn primary(&self) -> Option<RegionRecord> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.values().find(|r| r.is_primary()).cloned())
    }

    /// Every SECONDARY, ordered by region id.
    pub fn secondaries(&self) -> Vec<RegionRecord> {
        self.records
            .read()
            .map(|records| {
                records
                    .values()
                    .filter(|r| r.role == RegionRole::Secondary)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of records holding PRIMARY.
    pub fn primary_count(&self) -> usize {
        self.records
            .read()
            .map(|records| records.values().filter(|r| r.is_primary()).count())
            .unwrap_or(0)
    }

    /// Check the single-writer invariant.
    pub fn verify_single_primary(&self) -> RegionResult<()> {
        match self.primary_count() {
            1 => Ok(()),
            primaries => Err(RegionError::SplitBrain { primaries }),
        }
    }

    /// Record the latest probe outcome. Never touches the role.
    pub fn record_health(
        &self,
        region_id: &RegionId,
        verdict: HealthVerdict,
        checked_at: DateTime<Utc>,
    ) -> RegionResult<()> {
        let mut records = self.records.write().map_err(|_| RegionError::LockPoisoned)?;
        let record = records
            .get_mut(region_id)
            .ok_or_else(|| RegionError::UnknownRegion(region_id.to_string()))?;

        record.last_health_state = verdict;
        record.last_checked_at = Some(checked_at);
        Ok(())
    }

    pub(crate) fn set_fenced(&self, region_id: &RegionId, fenced: bool) -> RegionResult<()> {
        let mut records = self.records.write().map_err(|_| RegionError::LockPoisoned)?;
        let record = records
            .get_mut(region_id)
            .ok_or_else(|| RegionError::UnknownRegion(region_id.to_string()))?;

        record.fenced = fenced;
        Ok(())
    }

    /// Swap roles after a confirmed promotion.
    ///
    /// `from` must be the current PRIMARY and `to` a SECONDARY. The old
    /// primary stays fenced.
    pub(crate) fn commit_promotion(&self, from: &RegionId, to: &RegionId) -> RegionResult<()> {
        let mut records = self.records.write().map_err(|_| RegionError::LockPoisoned)?;

        let from_role = records
            .get(from)
            .map(|r| r.role)
            .ok_or_else(|| RegionError::UnknownRegion(from.to_string()))?;
        let to_role = records
            .get(to)
            .map(|r| r.role)
            .ok_or_else(|| RegionError::UnknownRegion(to.to_string()))?;

        if from_role != RegionRole::Primary || to_role != RegionRole::Secondary {
            return Err(RegionError::InvalidTopology(format!(
                "cannot promote {} ({}) over {} ({})",
                to, to_role, from, from_role
            )));
        }

        if let Some(old) = records.get_mut(from) {
            old.role = RegionRole::Secondary;
            old.fenced = true;
        }
        if let Some(new) = records.get_mut(to) {
            new.role = RegionRole::Primary;
            new.fenced = false;
        }

        Ok(())
    }

    /// Make `region_id` the only PRIMARY.
    ///
    /// Used for operator resolution and journal replay, where the primary is
    /// declared rather than derived from a promotion.
    pub(crate) fn assign_primary(&self, region_id: &RegionId) -> RegionResult<()> {
        let mut records = self.records.write().map_err(|_| RegionError::LockPoisoned)?;
        if !records.contains_key(region_id) {
            return Err(RegionError::UnknownRegion(region_id.to_string()));
        }

        for record in records.values_mut() {
            if &record.region_id == region_id {
                record.role = RegionRole::Primary;
                record.fenced = false;
            } else {
                record.role = RegionRole::Secondary;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> RegionRegistry {
        RegionRegistry::new(vec![
            RegionRecord::new("us-east-1", RegionRole::Primary, "db.use1:5432", "c-use1"),
            RegionRecord::new("us-west-2", RegionRole::Secondary, "db.usw2:5432", "c-usw2"),
        ])
        .unwrap()
    }

    #[test]
    fn test_rejects_two_primaries() {
        let result = RegionRegistry::new(vec![
            RegionRecord::new("a", RegionRole::Primary, "a:1", "ca"),
            RegionRecord::new("b", RegionRole::Primary, "b:1", "cb"),
        ]);
        assert!(matches!(result, Err(RegionError::SplitBrain { primaries: 2 })));
    }

    #[test]
    fn test_rejects_no_primary_and_duplicates() {
        let none = RegionRegistry::new(vec![
            RegionRecord::new("a", RegionRole::Secondary, "a:1", "ca"),
            RegionRecord::new("b", RegionRole::Secondary, "b:1", "cb"),
        ]);
        assert!(matches!(none, Err(RegionError::SplitBrain { primaries: 0 })));

        let dup = RegionRegistry::new(vec![
            RegionRecord::new("a", RegionRole::Primary, "a:1", "ca"),
            RegionRecord::new("a", RegionRole::Secondary, "a:2", "cb"),
        ]);
        assert!(matches!(dup, Err(RegionError::InvalidTopology(_))));
    }

    #[test]
    fn test_commit_promotion_swaps_roles() {
        let registry = seeded();
        let from = RegionId::from("us-east-1");
        let to = RegionId::from("us-west-2");

        registry.commit_promotion(&from, &to).unwrap();

        assert_eq!(registry.primary().unwrap().region_id, to);
        assert!(registry.get(&from).unwrap().fenced);
        assert_eq!(registry.primary_count(), 1);
    }

    #[test]
    fn test_commit_promotion_rejects_wrong_direction() {
        let registry = seeded();
        let result = registry.commit_promotion(&"us-west-2".into(), &"us-east-1".into());

        assert!(result.is_err());
        assert_eq!(registry.primary().unwrap().region_id.as_str(), "us-east-1");
    }

    #[test]
    fn test_record_health_never_changes_role() {
        let registry = seeded();
        let id = RegionId::from("us-east-1");

        registry
            .record_health(&id, HealthVerdict::Unhealthy, Utc::now())
            .unwrap();

        let record = registry.get(&id).unwrap();
        assert_eq!(record.last_health_state, HealthVerdict::Unhealthy);
        assert!(record.last_checked_at.is_some());
        assert_eq!(record.role, RegionRole::Primary);
    }

    #[test]
    fn test_assign_primary_keeps_single_writer() {
        let registry = seeded();
        registry.assign_primary(&"us-west-2".into()).unwrap();

        registry.verify_single_primary().unwrap();
        assert_eq!(registry.secondaries()[0].region_id.as_str(), "us-east-1");
    }

    #[test]
    fn test_unknown_region() {
        let registry = seeded();
        let result = registry.record_health(&"ap-south-1".into(), HealthVerdict::Healthy, Utc::now());
        assert!(matches!(result, Err(RegionError::UnknownRegion(_))));
    }
}
