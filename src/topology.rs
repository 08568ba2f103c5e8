//! Topological k-nearest-neighbour management.
//!
//! Each module maintains exactly `k` logical neighbors, independent of
//! physical network topology — maintaining topological rather than metric
//! neighbor sets keeps cohesion at any cluster density (the same principle
//! flocking models use to stay correlated regardless of population size).

use crate::types::*;
use heapless::Vec;

// ============================================================================
// Configuration
// ============================================================================

/// How neighbor distance is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceMetric {
    /// `|my_id - their_id|`.
    #[default]
    Logical,
    /// Squared Euclidean distance between positions.
    Physical,
    /// Heartbeat round-trip time (falls back to `Logical` until an RTT
    /// sample exists).
    Latency,
    /// Application-supplied distance via `Topology::set_distance_fn`.
    Custom,
}

/// Topology engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct TopologyConfig {
    /// Target neighbor count.
    pub k_neighbors: usize,
    /// Distance metric used to rank candidates.
    pub metric: DistanceMetric,
    /// Discovery broadcast cadence (microseconds).
    pub discovery_period: TimeUs,
    /// Minimum time between automatic reelections (microseconds).
    pub reelection_delay: TimeUs,
    /// Below this neighbor count the owning module is DEGRADED; at zero,
    /// ISOLATED.
    pub min_neighbors: usize,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            k_neighbors: K_NEIGHBORS,
            metric: DistanceMetric::Logical,
            discovery_period: 1_000_000,
            reelection_delay: 100_000,
            min_neighbors: 3,
        }
    }
}

// ============================================================================
// Known Module Entry
// ============================================================================

/// A module this node has heard discovery traffic from, whether or not it's
/// currently one of the k neighbors.
#[derive(Debug, Clone, Copy, Default)]
struct KnownModule {
    id: ModuleId,
    position: Position,
    distance: i32,
    last_seen: TimeUs,
    capabilities: Capability,
    /// Set once the heartbeat engine reports this module DEAD; excluded
    /// from reelection until it's heard from again.
    dead: bool,
}

// ============================================================================
// Stats
// ============================================================================

/// Operational counters for a module's topology engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopologyStats {
    /// Number of times `reelect` has rebuilt the k-neighbor set.
    pub reelections: u32,
}

// ============================================================================
// Topology State
// ============================================================================

/// Per-module topology state: the current k-neighbor set, everything known
/// about the wider cluster, and reelection bookkeeping.
pub struct Topology {
    my_id: ModuleId,
    my_position: Position,

    /// Current k-neighbors, sorted by ascending distance.
    neighbors: Vec<Neighbor, K_NEIGHBORS>,

    /// Every module discovered so far, neighbor or not.
    known: Vec<KnownModule, MAX_MODULES>,

    last_discovery: TimeUs,
    last_reelection: TimeUs,

    config: TopologyConfig,
    on_change: Option<fn(&[Neighbor], &[Neighbor])>,
    distance_fn: Option<fn(ModuleId, ModuleId) -> i32>,

    discovery_sequence: u16,
    stats: TopologyStats,
}

impl Topology {
    pub fn new(my_id: ModuleId, my_position: Position, config: Option<TopologyConfig>) -> Self {
        Self {
            my_id,
            my_position,
            neighbors: Vec::new(),
            known: Vec::new(),
            last_discovery: 0,
            last_reelection: 0,
            config: config.unwrap_or_default(),
            on_change: None,
            distance_fn: None,
            discovery_sequence: 0,
            stats: TopologyStats::default(),
        }
    }

    pub fn my_id(&self) -> ModuleId {
        self.my_id
    }

    pub fn stats(&self) -> &TopologyStats {
        &self.stats
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn neighbors(&self) -> &[Neighbor] {
        &self.neighbors
    }

    pub fn is_neighbor(&self, module_id: ModuleId) -> bool {
        self.neighbors.iter().any(|n| n.id == module_id)
    }

    pub fn get_neighbor(&self, module_id: ModuleId) -> Option<&Neighbor> {
        self.neighbors.iter().find(|n| n.id == module_id)
    }

    pub fn get_neighbor_mut(&mut self, module_id: ModuleId) -> Option<&mut Neighbor> {
        self.neighbors.iter_mut().find(|n| n.id == module_id)
    }

    /// Writes a neighbor's health as tracked elsewhere (the heartbeat
    /// engine owns ALIVE/SUSPECT/DEAD transitions; this struct only stores
    /// the last-synced value). A no-op if `module_id` isn't a neighbor.
    pub fn set_neighbor_health(&mut self, module_id: ModuleId, health: HealthState) {
        if let Some(neighbor) = self.get_neighbor_mut(module_id) {
            neighbor.health = health;
        }
    }

    /// Record discovery traffic from another module and reelect if this
    /// gives the k-set a new, closer candidate or we're still below `k`.
    ///
    /// Returns `true` if the neighbor set changed as a result.
    pub fn on_discovery(
        &mut self,
        sender_id: ModuleId,
        sender_position: Position,
        sender_capabilities: Capability,
        now: TimeUs,
    ) -> Result<bool> {
        if sender_id == self.my_id || sender_id == INVALID_MODULE_ID {
            return Err(Error::InvalidArg);
        }

        let distance = self.compute_distance(sender_id, sender_position);

        let mut found = false;
        for known in self.known.iter_mut() {
            if known.id == sender_id {
                known.position = sender_position;
                known.distance = distance;
                known.last_seen = now;
                known.capabilities = sender_capabilities;
                known.dead = false;
                found = true;
                break;
            }
        }

        if !found {
            let entry = KnownModule {
                id: sender_id,
                position: sender_position,
                distance,
                last_seen: now,
                capabilities: sender_capabilities,
                dead: false,
            };
            let _ = self.known.push(entry);
        }

        if let Some(neighbor) = self.get_neighbor_mut(sender_id) {
            neighbor.capabilities = sender_capabilities;
        }

        let farther_than_worst_neighbor = self
            .neighbors
            .iter()
            .map(|n| n.logical_distance)
            .max()
            .map(|max_dist| distance < max_dist)
            .unwrap_or(true);

        let should_reelect = !self.is_neighbor(sender_id)
            && (self.neighbors.len() < self.config.k_neighbors || farther_than_worst_neighbor);

        if should_reelect {
            self.reelect();
            return Ok(true);
        }

        Ok(false)
    }

    /// Mark a known module DEAD: it's excluded from future reelections
    /// until discovery traffic from it is seen again.
    pub fn mark_dead(&mut self, module_id: ModuleId) {
        if let Some(known) = self.known.iter_mut().find(|k| k.id == module_id) {
            known.dead = true;
        }
    }

    /// A neighbor was lost (DEAD or explicitly dropped); remove it and
    /// reelect a replacement from the known set.
    pub fn on_neighbor_lost(&mut self, lost_id: ModuleId) -> Result<()> {
        if let Some(pos) = self.neighbors.iter().position(|n| n.id == lost_id) {
            self.neighbors.remove(pos);
            self.mark_dead(lost_id);
            self.reelect();
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    /// Recompute the k-nearest-neighbor set from all known, non-dead
    /// modules: sort by ascending distance, tie-break by ascending module
    /// id, take the first `k`. Deterministic and excludes DEAD modules so a
    /// reelection can't immediately re-select a module that was just lost.
    pub fn reelect(&mut self) -> usize {
        let old_neighbors = self.neighbors.clone();

        self.known
            .sort_by(|a, b| a.distance.cmp(&b.distance).then(a.id.cmp(&b.id)));

        let mut rebuilt: Vec<Neighbor, K_NEIGHBORS> = Vec::new();
        for known in self.known.iter() {
            if rebuilt.len() >= self.config.k_neighbors {
                break;
            }
            if known.id == self.my_id || known.id == INVALID_MODULE_ID || known.dead {
                continue;
            }

            let health = old_neighbors
                .iter()
                .find(|n| n.id == known.id)
                .map(|n| n.health)
                .unwrap_or(HealthState::Unknown);

            let neighbor = Neighbor {
                id: known.id,
                health,
                last_seen: known.last_seen,
                logical_distance: known.distance,
                capabilities: known.capabilities,
                ..Default::default()
            };
            let _ = rebuilt.push(neighbor);
        }
        debug_assert!(rebuilt.len() <= self.config.k_neighbors, "reelection must never exceed k");
        self.neighbors = rebuilt;
        self.stats.reelections += 1;

        if let Some(callback) = self.on_change {
            callback(&old_neighbors, &self.neighbors);
        }

        self.neighbors.len()
    }

    /// Periodic tick. Returns `true` if the neighbor set changed.
    ///
    /// Two independent cadences: discovery broadcasts fire every
    /// `discovery_period` (signalled via [`Self::discovery_due`], since the
    /// actual send is a HAL concern); below-`k` reelection is retried every
    /// `reelection_delay` in case discovery traffic arrived without
    /// triggering an immediate reelect.
    pub fn tick(&mut self, now: TimeUs) -> bool {
        if self.neighbors.len() < self.config.k_neighbors
            && now.saturating_sub(self.last_reelection) >= self.config.reelection_delay
        {
            self.last_reelection = now;
            let before = self.neighbors.len();
            self.reelect();
            return self.neighbors.len() != before;
        }
        false
    }

    /// Returns `true` and resets the internal timer if a discovery
    /// broadcast is due. The caller is responsible for actually sending it
    /// (via the HAL) using [`Self::create_discovery_message`].
    pub fn discovery_due(&mut self, now: TimeUs) -> bool {
        if now.saturating_sub(self.last_discovery) >= self.config.discovery_period {
            self.last_discovery = now;
            self.discovery_sequence = self.discovery_sequence.wrapping_add(1);
            true
        } else {
            false
        }
    }

    fn compute_distance(&self, id: ModuleId, position: Position) -> i32 {
        match self.config.metric {
            DistanceMetric::Logical => (self.my_id as i32 - id as i32).abs(),
            DistanceMetric::Physical => self.my_position.distance_squared(&position),
            DistanceMetric::Latency => self
                .distance_fn
                .map(|f| f(self.my_id, id))
                .unwrap_or_else(|| (self.my_id as i32 - id as i32).abs()),
            DistanceMetric::Custom => self.distance_fn.map(|f| f(self.my_id, id)).unwrap_or(0),
        }
    }

    pub fn set_on_change(&mut self, callback: fn(&[Neighbor], &[Neighbor])) {
        self.on_change = Some(callback);
    }

    /// Install the callback backing `Latency`/`Custom` distance metrics.
    pub fn set_distance_fn(&mut self, f: fn(ModuleId, ModuleId) -> i32) {
        self.distance_fn = Some(f);
    }

    pub fn create_discovery_message(&self, my_capabilities: Capability) -> DiscoveryMessage {
        DiscoveryMessage {
            sender_id: self.my_id,
            position: self.my_position,
            neighbor_count: self.neighbors.len() as u8,
            capabilities: my_capabilities,
            sequence: self.discovery_sequence,
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Discovery broadcast payload. Encoded to the wire by `wire::encode_discovery`
/// — this struct is the logical shape, not the byte layout.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryMessage {
    pub sender_id: ModuleId,
    pub position: Position,
    pub neighbor_count: u8,
    pub capabilities: Capability,
    pub sequence: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_fills_up_to_k() {
        let mut topo = Topology::new(1, Position::new(0, 0, 0), None);
        topo.on_discovery(2, Position::new(1, 0, 0), 0, 1000).unwrap();
        topo.on_discovery(3, Position::new(2, 0, 0), 0, 1000).unwrap();
        topo.on_discovery(4, Position::new(3, 0, 0), 0, 1000).unwrap();

        assert_eq!(topo.neighbor_count(), 3);
        assert!(topo.is_neighbor(2));
        assert!(topo.is_neighbor(3));
    }

    #[test]
    fn k_neighbor_limit_is_enforced() {
        let config = TopologyConfig {
            k_neighbors: 3,
            ..Default::default()
        };
        let mut topo = Topology::new(1, Position::new(0, 0, 0), Some(config));

        for i in 2..10 {
            topo.on_discovery(i, Position::new(i as i16, 0, 0), 0, 1000).unwrap();
        }

        assert_eq!(topo.neighbor_count(), 3);
    }

    #[test]
    fn reelection_breaks_distance_ties_by_ascending_id() {
        let config = TopologyConfig {
            k_neighbors: 2,
            metric: DistanceMetric::Physical,
            ..Default::default()
        };
        let mut topo = Topology::new(1, Position::new(0, 0, 0), Some(config));

        // Three modules equidistant from us; only 2 make the cut.
        topo.on_discovery(5, Position::new(1, 0, 0), 0, 0).unwrap();
        topo.on_discovery(3, Position::new(-1, 0, 0), 0, 0).unwrap();
        topo.on_discovery(4, Position::new(0, 1, 0), 0, 0).unwrap();

        let ids: heapless::Vec<ModuleId, 3> = topo.neighbors().iter().map(|n| n.id).collect();
        assert_eq!(ids.as_slice(), &[3, 4]);
    }

    #[test]
    fn dead_modules_are_excluded_from_reelection() {
        let config = TopologyConfig {
            k_neighbors: 1,
            ..Default::default()
        };
        let mut topo = Topology::new(1, Position::new(0, 0, 0), Some(config));
        topo.on_discovery(2, Position::new(1, 0, 0), 0, 0).unwrap();
        topo.on_discovery(3, Position::new(2, 0, 0), 0, 0).unwrap();
        assert!(topo.is_neighbor(2));

        topo.on_neighbor_lost(2).unwrap();
        assert!(!topo.is_neighbor(2));
        assert!(topo.is_neighbor(3));
    }

    #[test]
    fn stats_count_reelections() {
        let mut topo = Topology::new(1, Position::new(0, 0, 0), None);
        assert_eq!(topo.stats().reelections, 0);
        topo.on_discovery(2, Position::new(1, 0, 0), 0, 1000).unwrap();
        assert_eq!(topo.stats().reelections, 1);
    }

    #[test]
    fn discovery_updates_neighbor_capabilities() {
        let mut topo = Topology::new(1, Position::new(0, 0, 0), None);
        topo.on_discovery(2, Position::new(1, 0, 0), capability::GATEWAY, 0)
            .unwrap();
        assert_eq!(
            topo.get_neighbor(2).unwrap().capabilities,
            capability::GATEWAY
        );
    }
}
