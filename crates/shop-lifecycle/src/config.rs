use crate::Error;
use clap::{Args, Parser};
use core::net::IpAddr;
use core::time::Duration;

/// Lifecycle settings shared by every shop process.
///
/// Flatten this into a binary's own `clap` parser. All values can also be set
/// through environment variables (a `.env` file is honoured when the binary
/// loads it with `dotenvy` before parsing).
///
/// Per-binary defaults such as the service name or a fixed port are applied
/// with [`parse_with_defaults`].
#[derive(Args, Debug, Clone)]
pub struct LifecycleArgs {
    /// Address the gRPC listener binds to.
    ///
    /// Environment variable: `SERVICE_IP`
    #[arg(long, env = "SERVICE_IP", default_value = "0.0.0.0")]
    pub ip: IpAddr,

    /// Port the gRPC listener binds to. `0` allocates a free port at startup.
    ///
    /// An explicit port always wins over allocation.
    ///
    /// Environment variable: `SERVICE_PORT`
    #[arg(long, env = "SERVICE_PORT", default_value_t = 0)]
    pub port: u16,

    /// Address advertised to the registry and used as the health-check host.
    ///
    /// Environment variable: `SERVICE_HOST`
    #[arg(long, env = "SERVICE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Service name registered with the registry.
    ///
    /// Environment variable: `SERVICE_NAME`
    #[arg(long, env = "SERVICE_NAME", default_value = "shop-srv")]
    pub name: String,

    /// Comma separated registry tags.
    ///
    /// Environment variable: `SERVICE_TAGS`
    #[arg(long, env = "SERVICE_TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Consul agent address, with or without an `http://` scheme.
    ///
    /// Environment variable: `REGISTRY_ADDR`
    #[arg(long, env = "REGISTRY_ADDR", default_value = "127.0.0.1:8500")]
    pub registry_addr: String,

    /// Optional Consul ACL token sent as `X-Consul-Token`.
    ///
    /// Environment variable: `REGISTRY_TOKEN`
    #[arg(long, env = "REGISTRY_TOKEN")]
    pub registry_token: Option<String>,

    /// Timeout in seconds for each registry request.
    ///
    /// Environment variable: `REGISTRY_TIMEOUT_SECS`
    #[arg(long, env = "REGISTRY_TIMEOUT_SECS", default_value_t = 5)]
    pub registry_timeout_secs: u64,

    /// Seconds between registry health probes.
    ///
    /// Environment variable: `CHECK_INTERVAL_SECS`
    #[arg(long, env = "CHECK_INTERVAL_SECS", default_value_t = 5)]
    pub check_interval_secs: u64,

    /// Seconds before a registry health probe is considered failed.
    ///
    /// Environment variable: `CHECK_TIMEOUT_SECS`
    #[arg(long, env = "CHECK_TIMEOUT_SECS", default_value_t = 5)]
    pub check_timeout_secs: u64,

    /// Seconds an instance may stay critical before the registry removes it.
    ///
    /// This is the backstop for processes that die without deregistering.
    ///
    /// Environment variable: `DEREGISTER_AFTER_SECS`
    #[arg(long, env = "DEREGISTER_AFTER_SECS", default_value_t = 15)]
    pub deregister_after_secs: u64,

    /// Seconds in-flight requests get to finish during graceful stop before
    /// remaining connections are closed.
    ///
    /// Environment variable: `GRACE_PERIOD_SECS`
    #[arg(long, env = "GRACE_PERIOD_SECS", default_value_t = 10)]
    pub grace_period_secs: u64,

    /// Seconds between HTTP/2 keepalive pings sent to idle clients.
    ///
    /// Environment variable: `KEEPALIVE_INTERVAL_SECS`
    #[arg(long, env = "KEEPALIVE_INTERVAL_SECS", default_value_t = 300)]
    pub keepalive_interval_secs: u64,

    /// Seconds to wait for a keepalive ping acknowledgement before the
    /// connection is considered dead.
    ///
    /// Environment variable: `KEEPALIVE_TIMEOUT_SECS`
    #[arg(long, env = "KEEPALIVE_TIMEOUT_SECS", default_value_t = 1)]
    pub keepalive_timeout_secs: u64,

    /// Seconds after which a client connection is closed and must reconnect.
    /// `0` keeps connections open indefinitely.
    ///
    /// Environment variable: `MAX_CONNECTION_AGE_SECS`
    #[arg(long, env = "MAX_CONNECTION_AGE_SECS", default_value_t = 1800)]
    pub max_connection_age_secs: u64,

    /// Port of the Prometheus metrics listener. `0` disables it.
    ///
    /// Environment variable: `METRICS_PORT`
    #[arg(long, env = "METRICS_PORT", default_value_t = 0)]
    pub metrics_port: u16,
}

/// Connection settings for the registry backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub addr: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

/// Timings submitted with the health-check descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub deregister_after: Duration,
}

/// Validated lifecycle configuration.
///
/// Built once at startup and handed to the orchestrator by value; nothing
/// reads configuration from global state afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    pub name: String,
    pub bind_ip: IpAddr,
    /// `0` means "allocate at startup".
    pub port: u16,
    pub host: String,
    pub tags: Vec<String>,
    pub registry: RegistryConfig,
    pub check: CheckConfig,
    pub grace_period: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    /// `None` keeps client connections open indefinitely.
    pub max_connection_age: Option<Duration>,
    pub metrics_port: Option<u16>,
}

impl TryFrom<LifecycleArgs> for LifecycleConfig {
    type Error = Error;

    fn try_from(args: LifecycleArgs) -> Result<Self, Self::Error> {
        let name = args.name.trim().to_string();
        if name.is_empty() {
            return Err(invalid("SERVICE_NAME must not be empty"));
        }

        let host = args.host.trim().to_string();
        if host.is_empty() {
            return Err(invalid("SERVICE_HOST must not be empty"));
        }

        if args.registry_addr.trim().is_empty() {
            return Err(invalid("REGISTRY_ADDR must not be empty"));
        }

        for (value, var) in [
            (args.check_interval_secs, "CHECK_INTERVAL_SECS"),
            (args.check_timeout_secs, "CHECK_TIMEOUT_SECS"),
            (args.deregister_after_secs, "DEREGISTER_AFTER_SECS"),
            (args.registry_timeout_secs, "REGISTRY_TIMEOUT_SECS"),
            (args.keepalive_timeout_secs, "KEEPALIVE_TIMEOUT_SECS"),
        ] {
            if value == 0 {
                return Err(invalid(&format!("{var} must be greater than 0")));
            }
        }

        if args.metrics_port != 0 && args.metrics_port == args.port {
            return Err(invalid(&format!(
                "METRICS_PORT ({}) must differ from SERVICE_PORT",
                args.metrics_port
            )));
        }

        let tags = args
            .tags
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();

        Ok(Self {
            name,
            bind_ip: args.ip,
            port: args.port,
            host,
            tags,
            registry: RegistryConfig {
                addr: args.registry_addr.trim().to_string(),
                token: args.registry_token.filter(|t| !t.is_empty()),
                timeout: Duration::from_secs(args.registry_timeout_secs),
            },
            check: CheckConfig {
                interval: Duration::from_secs(args.check_interval_secs),
                timeout: Duration::from_secs(args.check_timeout_secs),
                deregister_after: Duration::from_secs(args.deregister_after_secs),
            },
            grace_period: Duration::from_secs(args.grace_period_secs),
            keepalive_interval: Duration::from_secs(args.keepalive_interval_secs),
            keepalive_timeout: Duration::from_secs(args.keepalive_timeout_secs),
            max_connection_age: (args.max_connection_age_secs != 0)
                .then(|| Duration::from_secs(args.max_connection_age_secs)),
            metrics_port: (args.metrics_port != 0).then_some(args.metrics_port),
        })
    }
}

fn invalid(reason: &str) -> Error {
    Error::Config {
        reason: reason.to_string(),
    }
}

/// Parses `P` from the process arguments after overriding argument defaults.
///
/// Each entry pairs an argument id (the field name, e.g. `"port"`) with the
/// default values to use for this binary. Exits with clap's usage message on
/// invalid input.
pub fn parse_with_defaults<P: Parser>(defaults: &[(&'static str, &[&'static str])]) -> P {
    try_parse_from_with_defaults(defaults, std::env::args_os()).unwrap_or_else(|e| e.exit())
}

/// Like [`parse_with_defaults`], parsing `argv` and returning clap's error.
///
/// # Errors
///
/// Returns the clap error for invalid or missing arguments.
pub fn try_parse_from_with_defaults<P, I, T>(
    defaults: &[(&'static str, &[&'static str])],
    argv: I,
) -> Result<P, clap::Error>
where
    P: Parser,
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let mut command = P::command();
    for (id, values) in defaults {
        let values = values.to_vec();
        command = command.mut_arg(*id, move |arg| arg.default_values(values));
    }
    let matches = command.try_get_matches_from(argv)?;
    P::from_arg_matches(&matches)
}
