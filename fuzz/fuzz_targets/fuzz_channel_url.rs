//! Fuzz target for agent channel URL derivation.
//!
//! Any derived URL must use a websocket scheme and end with the connect path.

#![no_main]

use agentlink::channel::{AGENT_CONNECT_PATH, agent_channel_url};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Scheme {
    Http,
    Https,
    Ws,
    Wss,
    Other(String),
}

#[derive(Debug, Arbitrary)]
struct Endpoint {
    scheme: Scheme,
    rest: String,
}

fuzz_target!(|endpoint: Endpoint| {
    let scheme = match &endpoint.scheme {
        Scheme::Http => "http",
        Scheme::Https => "https",
        Scheme::Ws => "ws",
        Scheme::Wss => "wss",
        Scheme::Other(s) => s.as_str(),
    };
    let url = format!("{scheme}://{}", endpoint.rest);

    if let Some(channel) = agent_channel_url(&url) {
        assert!(channel.starts_with("ws://") || channel.starts_with("wss://"));
        assert!(channel.ends_with(AGENT_CONNECT_PATH));
    }
});
