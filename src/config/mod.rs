pub mod schema;

pub use schema::{
    BridgeConfig, Config, GatewayConfig, GreenApiConfig, ReliabilityConfig, TelegramConfig,
};
