//! Command line arguments of the service binaries.
//!
//! Both binaries flatten the shared [`LifecycleArgs`]; the constants below
//! hold the per-binary defaults applied with
//! [`parse_with_defaults`](shop_lifecycle::config::parse_with_defaults).

use clap::Parser;
use shop_lifecycle::LifecycleArgs;

/// Defaults for `inventory-srv`: a fixed, well-known port.
pub const INVENTORY_DEFAULTS: &[(&str, &[&str])] = &[
    ("name", &["inventory-srv"]),
    ("port", &["50059"]),
    ("tags", &["inventory", "srv"]),
];

/// Defaults for `userop-srv`: an allocated port and a metrics listener.
pub const USEROP_DEFAULTS: &[(&str, &[&str])] = &[
    ("name", &["userop-srv"]),
    ("port", &["0"]),
    ("metrics_port", &["9108"]),
    ("tags", &["userop", "srv"]),
];

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Inventory gRPC service")]
pub struct InventoryArgs {
    #[command(flatten)]
    pub lifecycle: LifecycleArgs,

    /// Comma separated broker list for the stock reback listener. Without it
    /// the listener is not started.
    ///
    /// Environment variable: `BROKER`
    #[arg(long, env = "BROKER")]
    pub broker: Option<String>,

    /// Topic carrying orders whose stock must be returned.
    ///
    /// Environment variable: `REBACK_TOPIC`
    #[arg(long, env = "REBACK_TOPIC", default_value = "order_reback")]
    pub reback_topic: String,

    /// Consumer group of the reback listener.
    ///
    /// Environment variable: `CONSUMER_GROUP`
    #[arg(long, env = "CONSUMER_GROUP", default_value = "shop-inventory")]
    pub consumer_group: String,
}

#[derive(Parser, Debug, Clone)]
#[command(version, about = "User operations gRPC service")]
pub struct UserOpArgs {
    #[command(flatten)]
    pub lifecycle: LifecycleArgs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use shop_lifecycle::config::try_parse_from_with_defaults;

    fn parse<P: Parser>(defaults: &[(&'static str, &[&'static str])], argv: &[&str]) -> P {
        try_parse_from_with_defaults(defaults, argv.iter().copied()).unwrap()
    }

    #[test]
    fn inventory_defaults_to_fixed_port() {
        let args: InventoryArgs = parse(INVENTORY_DEFAULTS, &["inventory-srv"]);
        assert_eq!(args.lifecycle.name, "inventory-srv");
        assert_eq!(args.lifecycle.port, 50059);
        assert_eq!(args.lifecycle.tags, ["inventory", "srv"]);
        assert_eq!(args.lifecycle.metrics_port, 0);
        assert_eq!(args.reback_topic, "order_reback");
        assert_eq!(args.consumer_group, "shop-inventory");
    }

    #[test]
    fn userop_defaults_to_allocated_port_and_metrics() {
        let args: UserOpArgs = parse(USEROP_DEFAULTS, &["userop-srv"]);
        assert_eq!(args.lifecycle.name, "userop-srv");
        assert_eq!(args.lifecycle.port, 0);
        assert_eq!(args.lifecycle.metrics_port, 9108);
    }

    #[test]
    fn command_line_overrides_binary_defaults() {
        let args: InventoryArgs = parse(
            INVENTORY_DEFAULTS,
            &["inventory-srv", "--port", "0", "--tags", "a,b,c"],
        );
        assert_eq!(args.lifecycle.port, 0);
        assert_eq!(args.lifecycle.tags, ["a", "b", "c"]);
    }
}
