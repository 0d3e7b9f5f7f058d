//! Collector connectivity: channel construction, transport and failover

pub mod channel;
pub mod commands;
pub mod listener;
pub mod manager;
pub mod proto;
pub mod status;
pub mod tcp;

pub use channel::{
    parse_endpoints, AgentIdDecorator, AuthenticationDecorator, ChannelBuilder,
    ChannelDecorator, ChannelPipeline, ChannelSettings, CollectorChannel, Connector, Endpoint,
    StandardChannelBuilder, TlsChannelBuilder,
};
pub use commands::{CommandSink, LoggingCommandSink};
pub use listener::{ChannelListener, ListenerRegistry, StatusCell};
pub use manager::{ChannelManager, ChannelManagerConfig, Resolver, SystemResolver};
pub use status::{ChannelStatus, RpcError, StatusCode};
pub use tcp::{TcpChannel, TcpConnector};
