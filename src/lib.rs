//! # A field-centric coordination kernel for distributed power-electronics modules
//!
//! There is no central scheduler. Each module publishes a decaying
//! potential field describing its own load/thermal/power state; neighbors
//! sample that field, compute a gradient, and decide locally what to run
//! next — the same kind of indirect coordination Khatib's potential-field
//! obstacle avoidance uses for motion, applied here to task placement
//! across a mesh of embedded controllers.
//!
//! Four engines run inside every [`module::Module`]:
//!
//! - **Field** ([`field`]) — seqlock-guarded publish/sample/gradient over a
//!   shared [`field::FieldRegion`].
//! - **Topology** ([`topology`]) — maintains exactly `k` logical neighbors
//!   (default 7), independent of physical network shape.
//! - **Consensus** ([`consensus`]) — threshold voting with mutual
//!   inhibition for mesh-wide decisions (mode changes, power limits,
//!   shutdown, reformation).
//! - **Heartbeat** ([`heartbeat`]) — ALIVE/SUSPECT/DEAD liveness tracking
//!   that drives topology reelection.
//!
//! ## Quick start
//!
//! ```ignore
//! use swarmkernel::prelude::*;
//!
//! let mut module = Module::new(42, "charger-42", Position::new(1, 2, 0));
//! module.add_task("charge", charge_fn, core::ptr::null_mut(), 0, 1000)?;
//! module.start()?;
//!
//! loop {
//!     let now = hal.time_us();
//!     let outbound = module.tick(&mut field_region, &inbound, now)?;
//!     // hand `outbound` to the HAL/wire layer, fetch the next `inbound` batch
//! }
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

pub mod consensus;
pub mod fixedpoint;
pub mod field;
pub mod hal;
pub mod heartbeat;
pub mod module;
pub mod topology;
pub mod types;
pub mod wire;

pub mod collab;
pub mod mac;

pub use consensus::{Ballot, Consensus, ConsensusConfig, ProposalMessage, ProposalType, VoteMessage};
pub use field::{DecayModel, FieldConfig, FieldEngine, FieldRegion};
pub use hal::{CriticalSection, Hal, MsgType, ReceivedMessage};
pub use heartbeat::{Heartbeat, HeartbeatConfig, HeartbeatMessage};
pub use module::{InboundMessage, InternalTask, Module, ModuleCallbacks, ModuleStatus, OutboundMessage, TaskFn, TaskState};
pub use topology::{DiscoveryMessage, DistanceMetric, Topology, TopologyConfig};
pub use types::*;

/// Commonly used items, for a single glob import.
pub mod prelude {
    pub use crate::consensus::Consensus;
    pub use crate::field::{FieldEngine, FieldRegion};
    pub use crate::hal::Hal;
    pub use crate::heartbeat::Heartbeat;
    pub use crate::module::Module;
    pub use crate::topology::Topology;
    pub use crate::types::*;
}

// ============================================================================
// Version
// ============================================================================

/// Major version.
pub const VERSION_MAJOR: u32 = 2;
/// Minor version.
pub const VERSION_MINOR: u32 = 0;
/// Patch version.
pub const VERSION_PATCH: u32 = 0;
/// Version string.
pub const VERSION_STRING: &str = "2.0.0";

/// Version packed as `major << 16 | minor << 8 | patch`.
pub const fn version() -> u32 {
    (VERSION_MAJOR << 16) | (VERSION_MINOR << 8) | VERSION_PATCH
}

// ============================================================================
// System Initialization
// ============================================================================

/// Global field region. On an embedded target this would live at a fixed
/// memory address shared across cores/DMA; for `std` hosts it's a static.
#[cfg(feature = "std")]
static mut FIELD_REGION: Option<FieldRegion> = None;

/// Initialize the global field region. Call once at startup before
/// creating any modules.
#[cfg(feature = "std")]
pub fn init() -> Result<()> {
    unsafe {
        FIELD_REGION = Some(FieldRegion::new());
    }
    Ok(())
}

/// Borrow the global field region.
///
/// # Panics
/// Panics if [`init`] hasn't been called yet.
#[cfg(feature = "std")]
pub fn get_field_region() -> &'static mut FieldRegion {
    unsafe { FIELD_REGION.as_mut().expect("field region not initialized; call init() first") }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(version(), 0x020000);
        assert_eq!(VERSION_STRING, "2.0.0");
    }

    #[test]
    fn test_init() {
        init().unwrap();
        let region = get_field_region();
        assert!(region.get(1).is_some());
    }
}
