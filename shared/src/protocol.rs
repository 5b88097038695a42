/// Relation consumed by default when a service does not name one
pub const DEFAULT_RELATION: &str = "ceph";

/// Fields read from peers on the consumed relation
pub const FIELD_AUTH: &str = "auth";
pub const FIELD_KEY: &str = "key";
pub const FIELD_PUBLIC_ADDRESS: &str = "ceph-public-address";
pub const FIELD_PRIVATE_ADDRESS: &str = "private-address";

/// Field published on provided relations once a service is running
pub const FIELD_PORTS: &str = "ports";

/// Keys of the configuration context handed to rendering
pub const CTX_MON_HOSTS: &str = "mon_hosts";
pub const CTX_AUTH: &str = "auth";
pub const CTX_KEY: &str = "key";
pub const CTX_USE_SYSLOG: &str = "use_syslog";

/// Local option copied into the context as `use_syslog`
pub const OPTION_USE_SYSLOG: &str = "use-syslog";

/// API path prefix
pub const API_PREFIX: &str = "/v1";
