use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_PUBLISH_BATCH: usize = 64;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_ATTEMPT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_PORT: u16 = 5672;
pub const DEFAULT_CONNECTION_ATTEMPTS: u32 = 3;
pub const DEFAULT_HEARTBEAT_SECS: u16 = 60;

/// The engine only ever uses one channel per connection.
pub const CHANNEL: u16 = 1;

pub const URL_SCHEME: &str = "amqp";
pub const DEFAULT_VHOST: &str = "/";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const PUBLISHER_APP_SUFFIX: &str = "-publisher";
