//! Local TCP port coordination for plugin servers
//!
//! Every self-hosted plugin gets its own port out of a bounded range. The
//! allocator keeps the bookkeeping and verifies each candidate with a
//! transient bind before handing it out.

pub mod allocator;
pub mod types;

pub use allocator::{BindProbe, PortAllocator, PortRange, TcpBindProbe};
pub use types::{AllocationStatus, PortAllocation, PortStats};
