use std::{env, fmt::Display, net::IpAddr, str::FromStr, time::Duration as StdDuration};

use bay_payment_engine::{NotifyConfig, RoyaltyConfig};
use bpg_common::{parse_boolean_flag, Secret};
use chrono::Duration;
use log::*;

const DEFAULT_BPG_HOST: &str = "127.0.0.1";
const DEFAULT_BPG_PORT: u16 = 8360;
const DEFAULT_ORDER_LIFETIME: Duration = Duration::minutes(10);
const DEFAULT_NOTIFY_TIMEOUT: StdDuration = StdDuration::from_secs(10);
const DEFAULT_NOTIFY_CONNECT_TIMEOUT: StdDuration = StdDuration::from_secs(5);
const DEFAULT_PROVIDER_TIMEOUT: StdDuration = StdDuration::from_secs(15);

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// The base URL merchants and buyers reach this server on. Used to build cashier page links.
    pub public_url: String,
    pub database_url: String,
    pub redis_url: String,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address,
    /// rather than the connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address, rather
    /// than the connection's remote address.
    pub use_forwarded: bool,
    /// How long a created order stays payable.
    pub order_lifetime: Duration,
    pub admin: AdminConfig,
    pub provider: ProviderConfig,
    pub notify: NotifyHttpConfig,
    /// Circuit-breaker thresholds and the automatic attempt cap for merchant notifications.
    pub notify_policy: NotifyConfig,
    /// Settlement retry, lease and backstop timings.
    pub royalty_policy: RoyaltyConfig,
}

/// Protection for the `/api/v1/admin` scope.
#[derive(Clone, Debug, Default)]
pub struct AdminConfig {
    pub token: Secret<String>,
    /// If supplied, admin requests must come from one of these addresses. To explicitly disable
    /// the whitelist, set `BPG_ADMIN_IP_WHITELIST` to "false", "none", or "0".
    pub whitelist: Option<Vec<IpAddr>>,
}

/// The upstream payment network.
#[derive(Clone, Debug, Default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Our gateway's account at the provider.
    pub partner_id: String,
    pub secret: Secret<String>,
    pub timeout: StdDuration,
}

/// Timeouts for outbound merchant notifications. These are deliberately independent of anything
/// on the inbound request path.
#[derive(Clone, Debug)]
pub struct NotifyHttpConfig {
    pub timeout: StdDuration,
    pub connect_timeout: StdDuration,
}

impl Default for NotifyHttpConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_NOTIFY_TIMEOUT, connect_timeout: DEFAULT_NOTIFY_CONNECT_TIMEOUT }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BPG_HOST.to_string(),
            port: DEFAULT_BPG_PORT,
            public_url: format!("http://{DEFAULT_BPG_HOST}:{DEFAULT_BPG_PORT}"),
            database_url: String::default(),
            redis_url: String::default(),
            use_x_forwarded_for: false,
            use_forwarded: false,
            order_lifetime: DEFAULT_ORDER_LIFETIME,
            admin: AdminConfig::default(),
            provider: ProviderConfig::default(),
            notify: NotifyHttpConfig::default(),
            notify_policy: NotifyConfig::default(),
            royalty_policy: RoyaltyConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("BPG_HOST").ok().unwrap_or_else(|| DEFAULT_BPG_HOST.into());
        let port = env::var("BPG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for BPG_PORT. {e} Using the default, {DEFAULT_BPG_PORT}, instead."
                    );
                    DEFAULT_BPG_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_BPG_PORT);
        let public_url = env::var("BPG_PUBLIC_URL").ok().unwrap_or_else(|| {
            info!("🪛️ BPG_PUBLIC_URL is not set. Falling back to http://{host}:{port}.");
            format!("http://{host}:{port}")
        });
        let database_url = env::var("BPG_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ BPG_DATABASE_URL is not set. Please set it to the URL for the gateway database.");
            String::default()
        });
        let redis_url = env::var("BPG_REDIS_URL").ok().unwrap_or_else(|| {
            error!("🪛️ BPG_REDIS_URL is not set. Please set it to the URL for the shared fast store.");
            String::default()
        });
        let use_x_forwarded_for = parse_boolean_flag(env::var("BPG_USE_X_FORWARDED_FOR").ok(), false);
        let use_forwarded = parse_boolean_flag(env::var("BPG_USE_FORWARDED").ok(), false);
        let order_lifetime = env::var("BPG_ORDER_LIFETIME_SECS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Duration::seconds)
            .unwrap_or(DEFAULT_ORDER_LIFETIME);
        Self {
            host,
            port,
            public_url,
            database_url,
            redis_url,
            use_x_forwarded_for,
            use_forwarded,
            order_lifetime,
            admin: AdminConfig::from_env_or_default(),
            provider: ProviderConfig::from_env_or_default(),
            notify: NotifyHttpConfig::from_env_or_default(),
            notify_policy: notify_policy_from_env_or_default(),
            royalty_policy: royalty_policy_from_env_or_default(),
        }
    }
}

pub fn notify_policy_from_env_or_default() -> NotifyConfig {
    let defaults = NotifyConfig::default();
    NotifyConfig {
        timeout_threshold: parsed_env("BPG_NOTIFY_TIMEOUT_THRESHOLD", defaults.timeout_threshold),
        bad_response_threshold: parsed_env("BPG_NOTIFY_BAD_RESPONSE_THRESHOLD", defaults.bad_response_threshold),
        circuit_secs: parsed_env("BPG_NOTIFY_CIRCUIT_SECS", defaults.circuit_secs),
        counter_ttl_secs: parsed_env("BPG_NOTIFY_COUNTER_TTL_SECS", defaults.counter_ttl_secs),
        max_attempts: parsed_env("BPG_NOTIFY_MAX_ATTEMPTS", defaults.max_attempts),
    }
}

pub fn royalty_policy_from_env_or_default() -> RoyaltyConfig {
    let defaults = RoyaltyConfig::default();
    RoyaltyConfig {
        max_attempts: parsed_env("BPG_ROYALTY_MAX_ATTEMPTS", defaults.max_attempts),
        retry_delay_secs: parsed_env("BPG_ROYALTY_RETRY_DELAY_SECS", defaults.retry_delay_secs),
        merchant_share_bps: parsed_env("BPG_ROYALTY_MERCHANT_SHARE_BPS", defaults.merchant_share_bps),
        stale_lease_secs: parsed_env("BPG_ROYALTY_STALE_LEASE_SECS", defaults.stale_lease_secs),
        backstop_min_age_secs: parsed_env("BPG_ROYALTY_BACKSTOP_MIN_AGE_SECS", defaults.backstop_min_age_secs),
        backstop_batch: parsed_env("BPG_ROYALTY_BACKSTOP_BATCH", defaults.backstop_batch),
    }
}

fn parsed_env<T: FromStr + Display + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(s) => s.parse::<T>().unwrap_or_else(|_| {
            error!("🪛️ {s} is not a valid value for {key}. Using the default, {default}, instead.");
            default
        }),
        Err(_) => default,
    }
}

impl AdminConfig {
    pub fn from_env_or_default() -> Self {
        let token = env::var("BPG_ADMIN_TOKEN").ok().unwrap_or_else(|| {
            error!(
                "🪛️ BPG_ADMIN_TOKEN is not set. The admin API will reject every request until a token is configured."
            );
            String::default()
        });
        let whitelist = env::var("BPG_ADMIN_IP_WHITELIST").ok().and_then(|s| {
            if ["none", "false", "0"].contains(&s.to_lowercase().as_str()) {
                info!(
                    "🪛️ The admin IP whitelist is disabled. If this is not what you want, set \
                     BPG_ADMIN_IP_WHITELIST to a comma-separated list of IP addresses to enable it."
                );
                return None;
            }
            let ip_addrs = s
                .split(',')
                .filter_map(|s| {
                    s.trim()
                        .parse()
                        .map_err(|e| {
                            warn!("🪛️ Ignoring invalid IP address ({s}) in BPG_ADMIN_IP_WHITELIST: {e}");
                            None::<IpAddr>
                        })
                        .ok()
                })
                .collect::<Vec<IpAddr>>();
            Some(ip_addrs)
        });
        match &whitelist {
            Some(whitelist) if whitelist.is_empty() => {
                warn!(
                    "🚨️ The admin IP whitelist was configured, but is empty. The server will run, but won't \
                     authorise any admin requests."
                );
            },
            None => {
                info!("🪛️ No admin IP whitelist is set. Only the admin token will be checked.");
            },
            Some(v) => {
                let addrs = v.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ");
                info!("🪛️ Admin IP whitelist: {addrs}");
            },
        }
        Self { token: Secret::new(token), whitelist }
    }
}

impl ProviderConfig {
    pub fn from_env_or_default() -> Self {
        let base_url = env::var("BPG_PROVIDER_URL").ok().unwrap_or_else(|| {
            error!("🪛️ BPG_PROVIDER_URL is not set. Please set it to the payment provider's gateway URL.");
            String::default()
        });
        let partner_id = env::var("BPG_PROVIDER_PARTNER_ID").ok().unwrap_or_else(|| {
            error!("🪛️ BPG_PROVIDER_PARTNER_ID is not set. Please set it to our account id at the provider.");
            String::default()
        });
        let secret = env::var("BPG_PROVIDER_SECRET").ok().unwrap_or_else(|| {
            error!("🪛️ BPG_PROVIDER_SECRET is not set. Callback verification will fail until it is configured.");
            String::default()
        });
        let timeout = env::var("BPG_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(StdDuration::from_secs)
            .unwrap_or(DEFAULT_PROVIDER_TIMEOUT);
        Self { base_url, partner_id, secret: Secret::new(secret), timeout }
    }
}

impl NotifyHttpConfig {
    pub fn from_env_or_default() -> Self {
        let timeout = env::var("BPG_NOTIFY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(StdDuration::from_secs)
            .unwrap_or(DEFAULT_NOTIFY_TIMEOUT);
        let connect_timeout = env::var("BPG_NOTIFY_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(StdDuration::from_secs)
            .unwrap_or(DEFAULT_NOTIFY_CONNECT_TIMEOUT);
        Self { timeout, connect_timeout }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn policies_come_from_the_environment() {
        env::set_var("BPG_NOTIFY_TIMEOUT_THRESHOLD", "3");
        env::set_var("BPG_NOTIFY_MAX_ATTEMPTS", "8");
        env::set_var("BPG_ROYALTY_RETRY_DELAY_SECS", "120");
        env::set_var("BPG_ROYALTY_MAX_ATTEMPTS", "not-a-number");
        let notify = notify_policy_from_env_or_default();
        let royalty = royalty_policy_from_env_or_default();
        env::remove_var("BPG_NOTIFY_TIMEOUT_THRESHOLD");
        env::remove_var("BPG_NOTIFY_MAX_ATTEMPTS");
        env::remove_var("BPG_ROYALTY_RETRY_DELAY_SECS");
        env::remove_var("BPG_ROYALTY_MAX_ATTEMPTS");

        assert_eq!(notify.timeout_threshold, 3);
        assert_eq!(notify.max_attempts, 8);
        // Unset values keep their defaults, malformed ones fall back to them.
        assert_eq!(notify.bad_response_threshold, NotifyConfig::default().bad_response_threshold);
        assert_eq!(royalty.retry_delay_secs, 120);
        assert_eq!(royalty.max_attempts, RoyaltyConfig::default().max_attempts);
    }
}
