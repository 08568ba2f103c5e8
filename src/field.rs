//! Coordination field primitives: the shared field region, the seqlock that
//! guards each module's slot, and the engine that publishes, samples,
//! aggregates and decays fields.
//!
//! Modules coordinate indirectly: each publishes a decaying potential field,
//! neighbors sample it and compute a gradient, and task placement follows
//! the gradient rather than any central scheduler (Khatib-style potential
//! field coordination, extended here from spatial avoidance to temporal
//! scheduling).

use crate::fixedpoint::{self, DecayModel, Fixed};
use crate::types::*;
use core::sync::atomic::{fence, AtomicU32, Ordering};

// ============================================================================
// Field Configuration
// ============================================================================

/// Per-component decay/clamp configuration.
#[derive(Debug, Clone, Copy)]
pub struct FieldConfig {
    /// Decay time constant, in seconds (Q16.16).
    pub decay_tau: Fixed,
    /// Decay model applied on sample.
    pub decay_model: DecayModel,
    /// Floor after decay/clamping.
    pub min_value: Fixed,
    /// Ceiling after decay/clamping.
    pub max_value: Fixed,
    /// Value reported when no data has ever been published.
    pub default_value: Fixed,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            decay_tau: Fixed::from_num(0.1),
            decay_model: DecayModel::Exponential,
            min_value: Fixed::ZERO,
            max_value: Fixed::ONE,
            default_value: Fixed::ZERO,
        }
    }
}

// ============================================================================
// Field Region (Shared Memory)
// ============================================================================

const UPDATE_FLAGS_WORDS: usize = (MAX_MODULES + 31) / 32;

/// One module's published field plus the seqlock guarding it.
///
/// Protocol: the writer stores the sequence odd, writes the payload, then
/// stores it even; a reader retries whenever it observes an odd sequence or
/// the sequence changes between its pre- and post-read loads. With a single
/// writer per slot this gives wait-free reads without ever blocking the
/// writer.
#[derive(Debug)]
pub struct CoordField {
    /// The published field. Only ever written by its owning module.
    pub field: Field,
    /// Seqlock counter; odd means a write is in progress.
    pub sequence: AtomicU32,
}

impl CoordField {
    pub const fn new() -> Self {
        Self {
            field: Field::new(),
            sequence: AtomicU32::new(0),
        }
    }
}

impl Default for CoordField {
    fn default() -> Self {
        Self::new()
    }
}

/// Region-wide operational counters, surfaced instead of logging so a
/// caller can watch seqlock contention and decay pressure without this
/// crate depending on a logging framework.
#[derive(Debug)]
pub struct FieldStats {
    /// Torn reads observed across every `sample`/`sample_consistent` call
    /// (the writer was mid-publish, or the sequence changed under us).
    pub seqlock_busy: AtomicU32,
    /// Samples dropped because every component had already decayed to its
    /// configured floor.
    pub expired: AtomicU32,
    /// Slots invalidated by `gc` over the region's lifetime.
    pub gc_reclaimed: AtomicU32,
}

impl FieldStats {
    const fn new() -> Self {
        Self {
            seqlock_busy: AtomicU32::new(0),
            expired: AtomicU32::new(0),
            gc_reclaimed: AtomicU32::new(0),
        }
    }
}

/// The shared field region all modules publish into and sample from.
pub struct FieldRegion {
    fields: [CoordField; MAX_MODULES],
    /// Bitmap of modules updated since the last GC pass.
    update_flags: [AtomicU32; UPDATE_FLAGS_WORDS],
    last_gc: TimeUs,
    stats: FieldStats,
}

impl FieldRegion {
    pub const fn new() -> Self {
        const COORD_FIELD_INIT: CoordField = CoordField::new();
        const UPDATE_FLAGS_INIT: AtomicU32 = AtomicU32::new(0);

        Self {
            fields: [COORD_FIELD_INIT; MAX_MODULES],
            update_flags: [UPDATE_FLAGS_INIT; UPDATE_FLAGS_WORDS],
            last_gc: 0,
            stats: FieldStats::new(),
        }
    }

    /// Seqlock contention and decay counters for this region.
    pub fn stats(&self) -> &FieldStats {
        &self.stats
    }

    /// Borrow a module's seqlock-guarded slot.
    pub fn get_coord(&self, module_id: ModuleId) -> Option<&CoordField> {
        if module_id as usize >= MAX_MODULES {
            return None;
        }
        Some(&self.fields[module_id as usize])
    }

    /// Read a module's field directly, bypassing the seqlock. Only safe
    /// when the caller already holds exclusivity (e.g. single-threaded
    /// host-side tests); prefer `FieldEngine::sample` otherwise.
    pub fn get(&self, module_id: ModuleId) -> Option<&Field> {
        if module_id as usize >= MAX_MODULES {
            return None;
        }
        Some(&self.fields[module_id as usize].field)
    }

    pub fn get_mut(&mut self, module_id: ModuleId) -> Option<&mut Field> {
        if module_id as usize >= MAX_MODULES {
            return None;
        }
        Some(&mut self.fields[module_id as usize].field)
    }

    fn set_update_flag(&self, module_id: ModuleId) {
        let word = (module_id as usize) / 32;
        let bit = 1u32 << ((module_id as usize) % 32);
        if word < UPDATE_FLAGS_WORDS {
            self.update_flags[word].fetch_or(bit, Ordering::Release);
        }
    }

    /// Last garbage-collection timestamp.
    pub fn last_gc(&self) -> TimeUs {
        self.last_gc
    }
}

impl Default for FieldRegion {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Field Engine
// ============================================================================

/// Publishes, samples, aggregates and decays fields against a [`FieldRegion`].
pub struct FieldEngine {
    config: [FieldConfig; FIELD_COUNT],
}

impl FieldEngine {
    pub fn new() -> Self {
        Self {
            config: [FieldConfig::default(); FIELD_COUNT],
        }
    }

    /// Publish this module's field into the region.
    ///
    /// Seqlock write discipline: bump the sequence to odd (write in
    /// progress, `Release` so no reader can observe it as "stable" mid
    /// write), write the payload, fence, then bump to even (write
    /// complete). `&mut FieldRegion` enforces single-writer-per-region at
    /// the type level for this call; the seqlock itself is what lets
    /// concurrent *readers* (via `&FieldRegion`) proceed wait-free.
    pub fn publish(
        &self,
        region: &mut FieldRegion,
        module_id: ModuleId,
        field: &Field,
        now: TimeUs,
    ) -> Result<()> {
        if module_id as usize >= MAX_MODULES || module_id == INVALID_MODULE_ID {
            return Err(Error::InvalidArg);
        }

        let idx = module_id as usize;
        let slot = &mut region.fields[idx];

        let seq = slot.sequence.load(Ordering::Relaxed);
        slot.sequence.store(seq.wrapping_add(1), Ordering::Release);
        fence(Ordering::Release);

        slot.field.components = field.components;
        slot.field.timestamp = now;
        slot.field.source = module_id;
        slot.field.sequence = slot.field.sequence.wrapping_add(1);

        fence(Ordering::Release);
        slot.sequence.store(seq.wrapping_add(2), Ordering::Release);

        region.set_update_flag(module_id);
        Ok(())
    }

    /// Sample a module's field, decay applied, single attempt.
    ///
    /// Returns `Error::Busy` on a torn read (write in progress, or the
    /// sequence changed mid-copy) — callers that want automatic retry
    /// should use [`Self::sample_consistent`].
    pub fn sample(&self, region: &FieldRegion, target_id: ModuleId, now: TimeUs) -> Result<Field> {
        let coord = region.get_coord(target_id).ok_or(Error::InvalidArg)?;

        let seq_before = coord.sequence.load(Ordering::Acquire);
        if seq_before & 1 != 0 {
            region.stats.seqlock_busy.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Busy);
        }
        fence(Ordering::Acquire);

        let field = coord.field;

        fence(Ordering::Acquire);
        let seq_after = coord.sequence.load(Ordering::Acquire);
        if seq_after != seq_before {
            region.stats.seqlock_busy.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Busy);
        }

        if field.source == INVALID_MODULE_ID {
            return Err(Error::NotFound);
        }

        let elapsed = now.saturating_sub(field.timestamp);
        let mut result = field;
        self.apply_decay(&mut result, elapsed);

        if self.is_floored(&result) {
            region.stats.expired.fetch_add(1, Ordering::Relaxed);
            return Err(Error::FieldExpired);
        }

        Ok(result)
    }

    /// Sample with automatic retry on torn reads.
    pub fn sample_consistent(
        &self,
        region: &FieldRegion,
        target_id: ModuleId,
        now: TimeUs,
        max_retries: u32,
    ) -> Result<Field> {
        for _ in 0..max_retries {
            match self.sample(region, target_id, now) {
                Ok(field) => return Ok(field),
                Err(Error::Busy) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(Error::Busy)
    }

    /// Weighted aggregate of a set of neighbors' fields.
    ///
    /// Weight = health_weight × distance_factor, where health_weight is
    /// 1.0/0.5/0.0 for alive/suspect/dead-or-unknown and distance_factor is
    /// `1 / (1 + distance)` in Q16.16 — closer neighbors weighted higher.
    /// DEAD and UNKNOWN neighbors are excluded outright.
    pub fn sample_neighbors(
        &self,
        region: &FieldRegion,
        neighbors: &[Neighbor],
        now: TimeUs,
    ) -> Field {
        let mut aggregate = Field::new();
        let mut total_weight = Fixed::ZERO;

        for neighbor in neighbors {
            if neighbor.health == HealthState::Dead || neighbor.health == HealthState::Unknown {
                continue;
            }

            let Ok(field) = self.sample_consistent(region, neighbor.id, now, 3) else {
                continue;
            };

            let health_weight = match neighbor.health {
                HealthState::Alive => Fixed::ONE,
                HealthState::Suspect => Fixed::from_num(0.5),
                _ => Fixed::ZERO,
            };
            if health_weight <= Fixed::ZERO {
                continue;
            }

            let distance_factor = if neighbor.logical_distance > 0 {
                let distance = Fixed::from_num(neighbor.logical_distance as f32);
                fixedpoint::fixed_div(Fixed::ONE, Fixed::ONE.saturating_add(distance))
            } else {
                Fixed::ONE
            };

            let weight = fixedpoint::fixed_mul(health_weight, distance_factor);

            for i in 0..FIELD_COUNT {
                aggregate.components[i] = aggregate.components[i]
                    .saturating_add(fixedpoint::fixed_mul(field.components[i], weight));
            }
            total_weight = total_weight.saturating_add(weight);
        }

        if total_weight > Fixed::ZERO {
            for i in 0..FIELD_COUNT {
                aggregate.components[i] = fixedpoint::fixed_div(aggregate.components[i], total_weight);
            }
        }

        aggregate
    }

    /// Gradient for one component: positive means neighbors run higher
    /// (this module should pick up more of that load), negative the reverse.
    pub fn gradient(
        &self,
        my_field: &Field,
        neighbor_aggregate: &Field,
        component: FieldComponent,
    ) -> Fixed {
        neighbor_aggregate.get(component).saturating_sub(my_field.get(component))
    }

    /// Gradient for every component, in [`FieldComponent::ALL`] order.
    pub fn gradient_all(
        &self,
        my_field: &Field,
        neighbor_aggregate: &Field,
    ) -> [Fixed; FIELD_COUNT] {
        let mut gradients = [Fixed::ZERO; FIELD_COUNT];
        for (i, component) in FieldComponent::ALL.iter().enumerate() {
            gradients[i] = self.gradient(my_field, neighbor_aggregate, *component);
        }
        gradients
    }

    /// Apply each component's configured decay model and clamp range.
    pub fn apply_decay(&self, field: &mut Field, elapsed_us: TimeUs) {
        for i in 0..FIELD_COUNT {
            let config = &self.config[i];
            let factor = fixedpoint::decay_factor(config.decay_model, config.decay_tau, elapsed_us);
            field.components[i] = fixedpoint::fixed_mul(field.components[i], factor);
            field.components[i] = field.components[i].clamp(config.min_value, config.max_value);
        }
    }

    /// True once every component has decayed to its configured floor —
    /// used by `sample` to report `FieldExpired` instead of a misleadingly
    /// "fresh" all-floor field.
    fn is_floored(&self, field: &Field) -> bool {
        (0..FIELD_COUNT).all(|i| field.components[i] <= self.config[i].min_value)
    }

    /// Garbage-collect slots whose field has gone stale, seqlock-disciplined
    /// so concurrent readers never observe a torn "half cleared" field:
    /// bump to odd, invalidate the source, bump to even — exactly the same
    /// protocol `publish` uses, just writing the empty field.
    pub fn gc(&self, region: &mut FieldRegion, now: TimeUs, max_age_us: TimeUs) -> u32 {
        let mut expired = 0u32;

        for idx in 0..MAX_MODULES {
            let slot = &mut region.fields[idx];
            if slot.field.source == INVALID_MODULE_ID {
                continue;
            }
            if now.saturating_sub(slot.field.timestamp) <= max_age_us {
                continue;
            }

            let seq = slot.sequence.load(Ordering::Relaxed);
            slot.sequence.store(seq.wrapping_add(1), Ordering::Release);
            fence(Ordering::Release);
            slot.field.clear();
            fence(Ordering::Release);
            slot.sequence.store(seq.wrapping_add(2), Ordering::Release);

            expired += 1;
        }

        region.last_gc = now;
        region.stats.gc_reclaimed.fetch_add(expired, Ordering::Relaxed);
        expired
    }

    pub fn set_config(&mut self, component: FieldComponent, config: FieldConfig) {
        self.config[component as usize] = config;
    }

    pub fn get_config(&self, component: FieldComponent) -> &FieldConfig {
        &self.config[component as usize]
    }
}

impl Default for FieldEngine {
    fn default() -> Self {
        Self::new()
    }
}
