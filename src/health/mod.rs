//! Host Liveness
//!
//! Pluggable reachability probes and the periodic prober that keeps the
//! registry's status cache current.

pub mod probe;
pub mod prober;

pub use probe::{build_probe, check_host, HttpProbe, LivenessProbe, ProbeTarget, TcpProbe};
pub use prober::{sweep, LivenessProber, DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT};
