//! Per-user sync orchestration: ports, result reporting, and the coordinator.

pub mod ports;
pub mod report;
pub mod service;
