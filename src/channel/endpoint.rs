//! Agent endpoint resolution.

use crate::workspace::Workspace;

/// Service name under which machines advertise the exec agent.
pub const EXEC_AGENT_SERVICE: &str = "exec-agent";

/// Path appended to the agent endpoint to reach the RPC socket.
pub const AGENT_CONNECT_PATH: &str = "/connect";

/// Derive the websocket channel URL from an agent endpoint URL.
///
/// `http` becomes `ws`, `https` becomes `wss`, and `/connect` is appended.
/// Endpoints already using a websocket scheme keep it. Anything else is not an
/// agent endpoint and yields `None`.
#[must_use]
pub fn agent_channel_url(endpoint_url: &str) -> Option<String> {
    let rewritten = if let Some(rest) = endpoint_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = endpoint_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if endpoint_url.starts_with("ws://") || endpoint_url.starts_with("wss://") {
        endpoint_url.to_string()
    } else {
        return None;
    };

    let base = rewritten.strip_suffix('/').unwrap_or(&rewritten);
    Some(format!("{base}{AGENT_CONNECT_PATH}"))
}

/// Resolve the channel URL for `machine` from a workspace snapshot.
///
/// Returns `None` when the workspace has no runtime, the machine is unknown,
/// the machine does not advertise `service`, or the endpoint is not http-family.
#[must_use]
pub fn resolve_channel_url(workspace: &Workspace, machine: &str, service: &str) -> Option<String> {
    let endpoint = workspace.machine(machine)?.server(service)?;
    agent_channel_url(&endpoint.url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::Machine;

    #[test]
    fn test_http_becomes_ws_with_connect() {
        assert_eq!(
            agent_channel_url("http://host/x").as_deref(),
            Some("ws://host/x/connect")
        );
    }

    #[test]
    fn test_https_becomes_wss() {
        assert_eq!(
            agent_channel_url("https://agent.example.com:8443/process").as_deref(),
            Some("wss://agent.example.com:8443/process/connect")
        );
    }

    #[test]
    fn test_trailing_slash_not_doubled() {
        assert_eq!(
            agent_channel_url("http://host:4412/").as_deref(),
            Some("ws://host:4412/connect")
        );
    }

    #[test]
    fn test_ws_scheme_kept() {
        assert_eq!(
            agent_channel_url("ws://host/x").as_deref(),
            Some("ws://host/x/connect")
        );
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        assert_eq!(agent_channel_url("tcp://host:4412"), None);
        assert_eq!(agent_channel_url("host:4412"), None);
        // "http" must be the scheme, not just a prefix of the host.
        assert_eq!(agent_channel_url("httpbin.org/x"), None);
    }

    #[test]
    fn test_resolve_from_workspace() {
        let workspace = Workspace::running()
            .with_machine(
                "dev",
                Machine::default().with_server(EXEC_AGENT_SERVICE, "http://10.0.0.5:4412/process"),
            )
            .with_machine("db", Machine::default().with_server("mysql", "tcp://10.0.0.6:3306"));

        assert_eq!(
            resolve_channel_url(&workspace, "dev", EXEC_AGENT_SERVICE).as_deref(),
            Some("ws://10.0.0.5:4412/process/connect")
        );
        assert_eq!(resolve_channel_url(&workspace, "db", EXEC_AGENT_SERVICE), None);
        assert_eq!(resolve_channel_url(&workspace, "gone", EXEC_AGENT_SERVICE), None);
        assert_eq!(
            resolve_channel_url(&Workspace::default(), "dev", EXEC_AGENT_SERVICE),
            None
        );
    }
}
