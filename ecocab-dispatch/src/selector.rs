use std::sync::Arc;

use ecocab_domain::{CandidateFilter, DeviceRegistry, RegistryError, VehicleCandidate};
use ecocab_shared::{haversine_meters, Coordinates};
use uuid::Uuid;

/// A candidate with its great-circle distance from the ride origin.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub candidate: VehicleCandidate,
    pub distance_m: f64,
}

/// Finds and ranks eligible vehicles for a pickup point.
///
/// Side-effect free: the scan never mutates a record. Ranking is ascending
/// distance; ties keep the registry's stable iteration order because the
/// sort is stable.
pub struct CandidateSelector {
    registry: Arc<dyn DeviceRegistry>,
}

impl CandidateSelector {
    pub fn new(registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { registry }
    }

    /// Empty result, never an error, when nobody qualifies.
    pub async fn select(
        &self,
        origin: Coordinates,
        seats_required: u32,
        exclude: &[Uuid],
    ) -> Result<Vec<RankedCandidate>, RegistryError> {
        let filter = CandidateFilter {
            seats_required,
            exclude: exclude.to_vec(),
        };
        let candidates = self.registry.find_candidates(&filter).await?;

        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .map(|candidate| RankedCandidate {
                distance_m: haversine_meters(origin, candidate.location),
                candidate,
            })
            .collect();
        ranked.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        Ok(ranked)
    }
}
