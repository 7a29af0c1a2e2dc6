//! Identity, device, and collection types shared across the workspace.

pub mod collections;
pub mod device;
pub mod identifiers;

pub use collections::{FxHashMap, FxHashSet, SmallVec4};
pub use device::DeviceDescription;
pub use identifiers::{NodeId, NodeIdGenerator};
