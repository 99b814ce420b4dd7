//! Outbound header sanitization.
//!
//! # Responsibilities
//! - Rewrite X-Forwarded-For before a request reaches an upstream node
//! - Append the gateway's own address when one is configured
//!
//! # Design Decisions
//! - Entries after the first are client-controlled and may be spoofed, so a
//!   backend can opt into keeping only the first one
//! - Stripping and appending are exclusive; a stripped header is final

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Per-backend X-Forwarded-For policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderPolicy {
    /// Keep only the first (client-originating) entry.
    pub strip_trailing_xff: bool,

    /// Address appended to the chain when not stripping.
    pub proxy_ip: Option<String>,
}

impl HeaderPolicy {
    /// Value to send upstream, or `None` to omit the header.
    pub fn forwarded_for(&self, incoming: &str) -> Option<String> {
        let incoming = incoming.trim();

        if self.strip_trailing_xff {
            return incoming
                .split(',')
                .next()
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string);
        }

        match (&self.proxy_ip, incoming.is_empty()) {
            (Some(ip), true) => Some(ip.clone()),
            (Some(ip), false) => Some(format!("{}, {}", incoming, ip)),
            (None, true) => None,
            (None, false) => Some(incoming.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let policy = HeaderPolicy::default();
        assert_eq!(policy.forwarded_for("1.1.1.1, 2.2.2.2").as_deref(), Some("1.1.1.1, 2.2.2.2"));
        assert_eq!(policy.forwarded_for(""), None);
    }

    #[test]
    fn test_strip_trailing_entries() {
        let policy = HeaderPolicy {
            strip_trailing_xff: true,
            proxy_ip: Some("10.0.0.1".into()),
        };
        assert_eq!(policy.forwarded_for("1.1.1.1, 6.6.6.6").as_deref(), Some("1.1.1.1"));
        assert_eq!(policy.forwarded_for(" 1.1.1.1 ").as_deref(), Some("1.1.1.1"));
        assert_eq!(policy.forwarded_for(""), None);
    }

    #[test]
    fn test_append_proxy_ip() {
        let policy = HeaderPolicy {
            strip_trailing_xff: false,
            proxy_ip: Some("10.0.0.1".into()),
        };
        assert_eq!(policy.forwarded_for("1.1.1.1").as_deref(), Some("1.1.1.1, 10.0.0.1"));
        assert_eq!(policy.forwarded_for("").as_deref(), Some("10.0.0.1"));
    }
}
