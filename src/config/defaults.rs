//! Default value functions for configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Port the gateway has always listened on.
pub const DEFAULT_PORT: u16 = 9007;

pub fn default_true() -> bool {
    true
}

pub fn default_listen_address() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT)
}

pub fn default_slack_api_url() -> String {
    "https://slack.com/api".to_string()
}

pub fn default_server_name() -> String {
    "localhost".to_string()
}

pub fn default_sendq() -> usize {
    1024
}

pub fn default_mpim_hide_days() -> u32 {
    50
}

pub fn default_initial_backoff_ms() -> u64 {
    1000
}

pub fn default_max_backoff_secs() -> u64 {
    120
}

pub fn default_max_attempts() -> u32 {
    10
}

pub fn default_upload_max_bytes() -> u64 {
    10 * 1024 * 1024
}
