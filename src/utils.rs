//! Small shared helpers

use std::net::IpAddr;

use tracing::warn;

/// Matches `pattern` against the start of `text`.  This is the semantics all
/// watch/ignore patterns and PM match expressions use.  Invalid patterns
/// never match.
pub fn match_at_start(pattern: &str, text: &str) -> bool {
    match regex::Regex::new(&format!("^(?:{})", pattern)) {
        Ok(re) => re.is_match(text),
        Err(error) => {
            warn!("ignoring invalid match expression {:?}: {}", pattern, error);
            false
        }
    }
}

/// Reverse-resolves an address to a host name, off the async loop.  Returns
/// None when no PTR record exists or resolution fails.
pub async fn reverse_dns(address: IpAddr) -> Option<String> {
    tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&address).ok())
        .await
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_are_anchored_at_the_start() {
        assert!(match_at_start("Gi1/", "Gi1/1"));
        assert!(!match_at_start("1/1", "Gi1/1"));
        assert!(match_at_start("(ge|xe)-", "xe-0/0/0"));
    }

    #[test]
    fn invalid_patterns_never_match() {
        assert!(!match_at_start("(unclosed", "anything"));
    }
}
