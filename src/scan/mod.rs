pub mod runner;

pub use runner::{ClusterTarget, ScanRunner};
