pub mod provider_config;

pub use provider_config::ProviderConfig;
