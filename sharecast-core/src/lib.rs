pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod relay;
pub mod sdp;

pub use config::Config;
pub use error::{Error, Result};
pub use relay::{RelayClient, RelayResponse, RtcEndpoint, StreamSource};
pub use sdp::{LatencyMode, SdpOptimizer};
