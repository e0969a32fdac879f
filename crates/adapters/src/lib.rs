// Armory Adapters - Concrete tool integrations
// Each adapter: request validation -> argv -> ToolInvoker -> output parser

pub mod nmap;
pub mod nuclei;
pub mod scratch;
pub mod subfinder;

pub use nmap::{NmapConfig, NmapRequest, NmapResponse, NmapTool};
pub use nuclei::{Finding, NucleiConfig, NucleiRequest, NucleiResponse, NucleiTool};
pub use subfinder::{SubfinderConfig, SubfinderRequest, SubfinderResponse, SubfinderTool};

/// Adapter version reported in tool descriptors
pub const ADAPTER_VERSION: &str = env!("CARGO_PKG_VERSION");
