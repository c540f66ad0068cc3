//! vmguest-exporter - VMware guest resource metrics for the node-exporter
//! textfile collector.
//!
//! Samples the per-VM accounting counters exposed by the vSphere Guest API
//! (`vmGuestLib`) and writes them out as a flat Prometheus snapshot. One
//! bounded sampling pass per invocation; the binary exits after the write.

pub mod counters;
pub mod export;
pub mod guestlib;
pub mod rates;
pub mod session;
pub mod snapshot;
