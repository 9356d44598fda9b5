pub mod cluster;
pub mod config;
pub mod crd;
pub mod ocloud;
pub mod remote;
pub mod report;
pub mod samplers;
pub mod soak;
pub mod stability;
pub mod teardown;
pub mod wait;
