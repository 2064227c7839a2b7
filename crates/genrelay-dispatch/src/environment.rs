//! Runtime signals consumed by the server resolver: where the embedding
//! application is served from, and which device class it runs on.

/// Host and port the embedding application is reached at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEnvironment {
    /// Hostname, without port.
    pub hostname: Option<String>,
    /// Port, if known.
    pub port: Option<u16>,
}

impl RuntimeEnvironment {
    /// Build from explicit values.
    pub fn new(hostname: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            hostname: Some(hostname.into()),
            port,
        }
    }

    /// Read `GENRELAY_HOSTNAME` and `GENRELAY_PORT`.
    ///
    /// Unparseable ports are ignored.
    pub fn detect() -> Self {
        Self {
            hostname: std::env::var("GENRELAY_HOSTNAME")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty()),
            port: std::env::var("GENRELAY_PORT")
                .ok()
                .and_then(|p| p.trim().parse().ok()),
        }
    }

    /// Whether this looks like a local development runtime.
    ///
    /// True when the hostname is one of `dev_hostnames` (case-insensitive,
    /// brackets around IPv6 literals ignored) or ends in `.localhost`, or when
    /// the port is one of `dev_ports`.
    pub fn is_local_development(&self, dev_hostnames: &[String], dev_ports: &[u16]) -> bool {
        if let Some(host) = &self.hostname {
            let host = host
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_ascii_lowercase();
            if host.ends_with(".localhost")
                || dev_hostnames
                    .iter()
                    .any(|h| h.trim_start_matches('[').trim_end_matches(']').eq_ignore_ascii_case(&host))
            {
                return true;
            }
        }
        matches!(self.port, Some(p) if dev_ports.contains(&p))
    }
}

/// Decides whether the current runtime belongs to the designated device class.
pub trait DeviceClassifier: Send + Sync {
    /// True for the designated class.
    fn is_designated(&self) -> bool;
}

/// Fixed classification, from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticDeviceClass(pub bool);

impl DeviceClassifier for StaticDeviceClass {
    fn is_designated(&self) -> bool {
        self.0
    }
}

/// Classifies by case-insensitive substrings of a user-agent string.
#[derive(Debug, Clone)]
pub struct UserAgentClassifier {
    user_agent: String,
    markers: Vec<String>,
}

impl UserAgentClassifier {
    /// Markers for handheld devices.
    pub const MOBILE_MARKERS: &'static [&'static str] =
        &["iphone", "ipad", "ipod", "android", "mobile"];

    /// Classify `user_agent` against [`Self::MOBILE_MARKERS`].
    pub fn mobile(user_agent: impl Into<String>) -> Self {
        Self::with_markers(
            user_agent,
            Self::MOBILE_MARKERS.iter().map(|m| m.to_string()).collect(),
        )
    }

    /// Classify `user_agent` against custom markers.
    pub fn with_markers(user_agent: impl Into<String>, markers: Vec<String>) -> Self {
        Self {
            user_agent: user_agent.into().to_lowercase(),
            markers: markers.into_iter().map(|m| m.to_lowercase()).collect(),
        }
    }
}

impl DeviceClassifier for UserAgentClassifier {
    fn is_designated(&self) -> bool {
        self.markers
            .iter()
            .any(|m| !m.is_empty() && self.user_agent.contains(m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_hosts() -> Vec<String> {
        vec!["localhost".into(), "127.0.0.1".into(), "::1".into()]
    }

    #[test]
    fn localhost_is_local_development() {
        let env = RuntimeEnvironment::new("localhost", Some(443));
        assert!(env.is_local_development(&dev_hosts(), &[5173]));
        let env = RuntimeEnvironment::new("LOCALHOST", None);
        assert!(env.is_local_development(&dev_hosts(), &[]));
    }

    #[test]
    fn bracketed_ipv6_loopback_is_local() {
        let env = RuntimeEnvironment::new("[::1]", None);
        assert!(env.is_local_development(&dev_hosts(), &[]));
    }

    #[test]
    fn dot_localhost_suffix_is_local() {
        let env = RuntimeEnvironment::new("app.localhost", None);
        assert!(env.is_local_development(&dev_hosts(), &[]));
    }

    #[test]
    fn dev_port_is_local_on_any_host() {
        let env = RuntimeEnvironment::new("192.168.1.20", Some(5173));
        assert!(env.is_local_development(&dev_hosts(), &[5173, 3000]));
    }

    #[test]
    fn production_host_is_not_local() {
        let env = RuntimeEnvironment::new("app.genrelay.dev", Some(443));
        assert!(!env.is_local_development(&dev_hosts(), &[5173, 3000]));
        assert!(!RuntimeEnvironment::default().is_local_development(&dev_hosts(), &[5173]));
    }

    #[test]
    fn user_agent_classifier() {
        let phone = UserAgentClassifier::mobile(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148",
        );
        assert!(phone.is_designated());
        let desktop =
            UserAgentClassifier::mobile("Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0");
        assert!(!desktop.is_designated());
        let custom = UserAgentClassifier::with_markers("SmartTV/2.0", vec!["smarttv".into()]);
        assert!(custom.is_designated());
    }

    #[test]
    fn static_class() {
        assert!(StaticDeviceClass(true).is_designated());
        assert!(!StaticDeviceClass(false).is_designated());
    }
}
