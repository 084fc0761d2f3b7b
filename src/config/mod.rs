//! Configuration loading and management

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Cross-origin policy applied at the WebSocket handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum CorsPolicy {
    /// Accept any origin, pass headers through untouched
    AllowAll,

    /// CORS checks disabled by the operator
    ///
    /// When `read_cookie` is false, `Cookie` headers are stripped before
    /// authentication so an unvetted origin cannot ride a browser session.
    Disabled { read_cookie: bool },

    /// Only the listed origins may connect
    AllowedOrigins {
        /// Exact origin matches, scheme included (e.g. `https://example.com`)
        #[serde(default)]
        domains: Vec<String>,
        /// Wildcard host patterns (e.g. `*.example.com`)
        #[serde(default)]
        wildcards: Vec<String>,
    },
}

impl CorsPolicy {
    /// Whether the given `Origin` header value is acceptable
    ///
    /// Only meaningful for `AllowedOrigins`; the other policies never reject.
    pub fn origin_allowed(&self, origin: &str) -> bool {
        match self {
            CorsPolicy::AllowAll | CorsPolicy::Disabled { .. } => true,
            CorsPolicy::AllowedOrigins { domains, wildcards } => {
                if domains.iter().any(|d| d == origin) {
                    return true;
                }
                let host = host_of(origin);
                wildcards.iter().any(|w| wildcard_matches(w, host))
            }
        }
    }
}

/// Strip the scheme from an origin, leaving `host[:port]`
fn host_of(origin: &str) -> &str {
    origin
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(origin)
}

/// Match `*.example.com` style patterns against a host
///
/// The wildcard covers exactly one leading label; `example.com` itself does
/// not match `*.example.com`.
fn wildcard_matches(pattern: &str, host: &str) -> bool {
    let Some(suffix) = pattern.strip_prefix("*.") else {
        return pattern == host;
    };
    let host = host.split(':').next().unwrap_or(host);
    match host.strip_suffix(suffix) {
        Some(prefix) => {
            let label = prefix.strip_suffix('.');
            matches!(label, Some(l) if !l.is_empty() && !l.contains('.'))
        }
        None => false,
    }
}

/// Knobs the SQL generators consult when lowering plans
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct SqlGenContext {
    /// Render numeric columns as strings to avoid precision loss in JSON
    #[serde(default)]
    pub stringify_numeric: bool,

    /// Collapse boolean permission expressions where the backend allows it
    #[serde(default)]
    pub collapse_boolean_expressions: bool,
}

/// Complete configuration for the WebSocket transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Seconds between `connection_ka` frames
    #[serde(default = "default_keep_alive")]
    pub keep_alive_delay_secs: u64,

    /// Cross-origin policy for the handshake
    #[serde(default = "default_cors")]
    pub cors: CorsPolicy,

    /// Enforce the query allow-list on every `start`
    #[serde(default)]
    pub enable_allowlist: bool,

    /// SQL-generation knobs passed to plan steps
    #[serde(default)]
    pub sql_gen: SqlGenContext,
}

fn default_keep_alive() -> u64 {
    5
}

fn default_cors() -> CorsPolicy {
    CorsPolicy::AllowAll
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            keep_alive_delay_secs: default_keep_alive(),
            cors: default_cors(),
            enable_allowlist: false,
            sql_gen: SqlGenContext::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work at runtime
    pub fn validate(&self) -> Result<()> {
        if self.keep_alive_delay_secs == 0 {
            anyhow::bail!("keep_alive_delay_secs must be at least 1");
        }
        if let CorsPolicy::AllowedOrigins { domains, wildcards } = &self.cors
            && domains.is_empty()
            && wildcards.is_empty()
        {
            anyhow::bail!("allowed_origins policy requires at least one domain or wildcard");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.keep_alive_delay_secs, 5);
        assert!(!config.enable_allowlist);
        assert!(matches!(config.cors, CorsPolicy::AllowAll));
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
keep_alive_delay_secs: 10
enable_allowlist: true
cors:
  policy: allowed_origins
  domains:
    - "https://example.com"
  wildcards:
    - "*.example.com"
sql_gen:
  stringify_numeric: true
"#;
        let config = GatewayConfig::from_yaml_str(yaml).expect("yaml should parse");
        assert_eq!(config.keep_alive_delay_secs, 10);
        assert!(config.enable_allowlist);
        assert!(config.sql_gen.stringify_numeric);
        assert!(config.cors.origin_allowed("https://example.com"));
    }

    #[test]
    fn test_zero_keepalive_rejected() {
        let yaml = "keep_alive_delay_secs: 0";
        assert!(GatewayConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_empty_allowed_origins_rejected() {
        let yaml = r#"
cors:
  policy: allowed_origins
"#;
        assert!(GatewayConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_allow_all_accepts_anything() {
        assert!(CorsPolicy::AllowAll.origin_allowed("https://evil.test"));
    }

    #[test]
    fn test_exact_domain_match() {
        let policy = CorsPolicy::AllowedOrigins {
            domains: vec!["https://example.com".to_string()],
            wildcards: vec![],
        };
        assert!(policy.origin_allowed("https://example.com"));
        assert!(!policy.origin_allowed("https://evil.test"));
        assert!(!policy.origin_allowed("https://sub.example.com"));
    }

    #[test]
    fn test_wildcard_matches_one_label() {
        let policy = CorsPolicy::AllowedOrigins {
            domains: vec![],
            wildcards: vec!["*.example.com".to_string()],
        };
        assert!(policy.origin_allowed("https://app.example.com"));
        assert!(policy.origin_allowed("https://api.example.com:8443"));
        assert!(!policy.origin_allowed("https://example.com"));
        assert!(!policy.origin_allowed("https://a.b.example.com"));
        assert!(!policy.origin_allowed("https://notexample.com"));
    }

    #[test]
    fn test_disabled_policy_never_rejects() {
        let policy = CorsPolicy::Disabled { read_cookie: false };
        assert!(policy.origin_allowed("https://anything.test"));
    }
}
