pub mod build;
pub mod partuuid;
pub mod teardown;
