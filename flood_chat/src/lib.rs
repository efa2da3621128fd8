pub mod codec;
pub mod config;
pub mod error;
pub mod input;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
pub mod seen;
pub mod sink;
pub mod store;

pub use config::{NodeConfig, SeedPeer};
pub use error::{ChatError, ProtocolError};
pub use node::Node;
pub use protocol::ChatMessage;
pub use registry::{ConnId, ConnectionRegistry, Delivery};
pub use relay::Relay;
pub use router::{Dispatch, FloodRouter, Source};
pub use seen::SeenSet;
pub use sink::{ChannelSink, ConsoleSink, MessageSink, PersistingSink};
pub use store::{MessageStore, StoredMessage};

use tracing_subscriber::EnvFilter;

/// Log to stderr so chat lines on stdout stay readable. `RUST_LOG` overrides
/// the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
