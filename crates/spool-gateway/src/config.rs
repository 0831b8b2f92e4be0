use spool_common::{CapacityError, Result};
use spool_ledger::{QuotaPolicy, ReservationMode};
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

/// Gateway configuration, read from `SPOOL_*` environment variables.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub quota: QuotaPolicy,
    pub reservation_mode: ReservationMode,
    /// Create the network state on startup when it does not exist yet
    pub bootstrap: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 12345,
            quota: QuotaPolicy::default(),
            reservation_mode: ReservationMode::default(),
            bootstrap: false,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CapacityError::InvalidArgument(format!("{key}={raw}: {e}"))),
        None => Ok(default),
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            host: lookup("SPOOL_HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "SPOOL_PORT", defaults.port)?,
            quota: QuotaPolicy {
                monthly_gb: parse_var(&lookup, "SPOOL_MONTHLY_GRANT_GB", defaults.quota.monthly_gb)?,
                fixed_amount_1_gb: parse_var(
                    &lookup,
                    "SPOOL_FIXED1_GRANT_GB",
                    defaults.quota.fixed_amount_1_gb,
                )?,
                fixed_amount_2_gb: parse_var(
                    &lookup,
                    "SPOOL_FIXED2_GRANT_GB",
                    defaults.quota.fixed_amount_2_gb,
                )?,
            },
            reservation_mode: parse_var(
                &lookup,
                "SPOOL_RESERVATION_MODE",
                defaults.reservation_mode,
            )?,
            bootstrap: parse_var(&lookup, "SPOOL_BOOTSTRAP", defaults.bootstrap)?,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| CapacityError::InvalidArgument(format!("bind address: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 12345);
        assert_eq!(config.quota, QuotaPolicy::default());
        assert_eq!(config.reservation_mode, ReservationMode::Combined);
        assert!(!config.bootstrap);
    }

    #[test]
    fn test_overrides() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("SPOOL_HOST", "127.0.0.1"),
            ("SPOOL_PORT", "8080"),
            ("SPOOL_MONTHLY_GRANT_GB", "250"),
            ("SPOOL_RESERVATION_MODE", "independent"),
            ("SPOOL_BOOTSTRAP", "true"),
        ]))
        .unwrap();

        assert_eq!(config.socket_addr().unwrap().port(), 8080);
        assert_eq!(config.quota.monthly_gb, 250);
        assert_eq!(config.quota.fixed_amount_2_gb, 2000);
        assert_eq!(config.reservation_mode, ReservationMode::Independent);
        assert!(config.bootstrap);
    }

    #[test]
    fn test_bad_values_are_rejected() {
        let err = GatewayConfig::from_lookup(lookup(&[("SPOOL_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, CapacityError::InvalidArgument(_)));

        let err = GatewayConfig::from_lookup(lookup(&[("SPOOL_RESERVATION_MODE", "sum")]))
            .unwrap_err();
        assert!(err.to_string().contains("SPOOL_RESERVATION_MODE"));
    }
}
