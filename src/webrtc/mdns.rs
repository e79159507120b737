use webrtc::ice::mdns::MulticastDnsMode;

/// Parse the configured mDNS mode; unknown values yield `None`
pub fn parse_mdns_mode(raw: &str) -> Option<MulticastDnsMode> {
    let value = raw.trim().to_ascii_lowercase();
    match value.as_str() {
        "disabled" | "off" | "false" | "0" => Some(MulticastDnsMode::Disabled),
        "query" | "query_only" | "query-only" | "" => Some(MulticastDnsMode::QueryOnly),
        "gather" | "query_and_gather" | "query-and-gather" | "on" | "true" | "1" => {
            Some(MulticastDnsMode::QueryAndGather)
        }
        _ => None,
    }
}

pub fn mdns_mode_label(mode: MulticastDnsMode) -> &'static str {
    match mode {
        MulticastDnsMode::Disabled => "disabled",
        MulticastDnsMode::QueryOnly => "query_only",
        MulticastDnsMode::QueryAndGather => "query_and_gather",
    }
}

pub fn mdns_host_name(session_id: &str) -> String {
    format!("{session_id}.local")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        assert_eq!(parse_mdns_mode("off"), Some(MulticastDnsMode::Disabled));
        assert_eq!(parse_mdns_mode(""), Some(MulticastDnsMode::QueryOnly));
        assert_eq!(parse_mdns_mode("Query-And-Gather"), Some(MulticastDnsMode::QueryAndGather));
        assert_eq!(parse_mdns_mode("sometimes"), None);
        assert_eq!(mdns_mode_label(MulticastDnsMode::QueryOnly), "query_only");
    }
}
