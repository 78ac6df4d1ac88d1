// Library facade so integration tests and other crates can use the modules.
// Linux-only: fail compilation on other platforms unless dev feature enabled.
#[cfg(all(not(target_os = "linux"), not(feature = "allow-nonlinux-dev")))]
compile_error!("funnelpot currently supports only Linux targets (use feature 'allow-nonlinux-dev' for development)");
pub mod capture;
pub mod config;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod netscan;
pub mod ports;
pub mod pubip;
pub mod routes;
pub mod util;

// Re-export commonly used types
pub use capture::{CaptureRecord, RecordStore};
pub use config::Config;
pub use error::{Error, Result};
pub use listener::CaptureListener;
pub use netscan::{PortScanner, ProcNetScanner};
