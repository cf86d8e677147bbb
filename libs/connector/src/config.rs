use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use stomp_client::Headers;

use crate::error::ConfigError;

// ═══════════════════════════════════════════════════════════════
//  Shared connection config
// ═══════════════════════════════════════════════════════════════

/// Параметры подключения к брокеру, общие для source и destination.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// `host:port`, допускается префикс `tcp://`, `stomp://`, `ssl://`, `stomp+ssl://`.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Очередь. Для source может быть пустой при resume: берётся из position.
    #[serde(default)]
    pub queue: String,
    /// Как часто клиент шлёт heartbeat.
    #[serde(default = "default_heartbeat", with = "humantime_serde")]
    pub send_heartbeat: Duration,
    /// Как часто клиент ждёт heartbeat от брокера.
    #[serde(default = "default_heartbeat", with = "humantime_serde")]
    pub recv_heartbeat: Duration,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub receipt_timeout: Duration,
    /// Virtual host для CONNECT. По умолчанию хост из `url`.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub tls: TlsConfig,
}

fn default_heartbeat() -> Duration {
    Duration::from_secs(2)
}
fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"***")
            .field("queue", &self.queue)
            .field("send_heartbeat", &self.send_heartbeat)
            .field("recv_heartbeat", &self.recv_heartbeat)
            .field("connect_timeout", &self.connect_timeout)
            .field("receipt_timeout", &self.receipt_timeout)
            .field("host", &self.host)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Адрес брокера, разобранный из `url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    /// Схема `ssl://` или `stomp+ssl://`.
    pub tls_scheme: bool,
}

impl BrokerAddress {
    /// `host:port` для `TcpStream::connect`.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Config {
    pub fn address(&self) -> Result<BrokerAddress, ConfigError> {
        let url = self.url.trim();
        let (rest, tls_scheme) = match url.split_once("://") {
            None => (url, false),
            Some(("tcp" | "stomp", rest)) => (rest, false),
            Some(("ssl" | "stomp+ssl", rest)) => (rest, true),
            Some((scheme, _)) => {
                return Err(ConfigError::invalid("url", format!("unsupported scheme {scheme:?}")));
            }
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::invalid("url", format!("{url:?} has no port")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(ConfigError::invalid("url", format!("{url:?} has no host")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::invalid("url", format!("invalid port {port:?}")))?;

        Ok(BrokerAddress { host: host.to_string(), port, tls_scheme })
    }

    /// Virtual host для CONNECT.
    pub fn virtual_host(&self, address: &BrokerAddress) -> String {
        self.host.clone().unwrap_or_else(|| address.host.clone())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Missing("url"));
        }
        if self.user.is_empty() {
            return Err(ConfigError::Missing("user"));
        }
        if self.password.is_empty() {
            return Err(ConfigError::Missing("password"));
        }
        let address = self.address()?;
        if address.tls_scheme && !self.tls.enabled {
            return Err(ConfigError::invalid("url", "ssl scheme requires tls.enabled = true"));
        }
        self.tls.validate()
    }
}

// ═══════════════════════════════════════════════════════════════
//  TLS
// ═══════════════════════════════════════════════════════════════

/// mTLS: клиентский сертификат + CA брокера.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    pub ca_cert_path: Option<PathBuf>,
    /// Не проверять сертификат брокера. Только явно, логируется как warn.
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.client_cert_path.is_none() {
            return Err(ConfigError::Missing("tls.client_cert_path"));
        }
        if self.client_key_path.is_none() {
            return Err(ConfigError::Missing("tls.client_key_path"));
        }
        if self.ca_cert_path.is_none() {
            return Err(ConfigError::Missing("tls.ca_cert_path"));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Source
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(flatten)]
    pub connection: Config,
    /// `client-id` заголовок CONNECT (нужен для durable подписок).
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub subscription: SubscriptionConfig,
}

impl SourceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        let has_client_id = self.client_id.as_deref().is_some_and(|id| !id.is_empty());
        if self.subscription.durable_subscription_name.is_some() && !has_client_id {
            return Err(ConfigError::invalid(
                "subscription.durable_subscription_name",
                "durable subscription requires client_id",
            ));
        }
        Ok(())
    }
}

/// Параметры SUBSCRIBE, передаются брокеру как заголовки.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub selector: Option<String>,
    pub prefetch_size: Option<u32>,
    pub priority: Option<u8>,
    pub exclusive: bool,
    pub durable_subscription_name: Option<String>,
    pub no_local: bool,
    pub dispatch_async: bool,
    pub retroactive: bool,
}

impl SubscriptionConfig {
    /// Заголовки SUBSCRIBE. Незаданные опции не передаются.
    pub fn headers(&self) -> Headers {
        let mut headers = Headers::new();
        if let Some(selector) = &self.selector {
            headers.add("selector", selector);
        }
        if let Some(size) = self.prefetch_size {
            headers.add("activemq.prefetchSize", size.to_string());
        }
        if let Some(priority) = self.priority {
            headers.add("activemq.priority", priority.to_string());
        }
        if self.exclusive {
            headers.add("activemq.exclusive", "true");
        }
        if let Some(name) = &self.durable_subscription_name {
            headers.add("activemq.subscriptionName", name);
        }
        if self.no_local {
            headers.add("activemq.noLocal", "true");
        }
        if self.dispatch_async {
            headers.add("activemq.dispatchAsync", "true");
        }
        if self.retroactive {
            headers.add("activemq.retroactive", "true");
        }
        headers
    }
}

// ═══════════════════════════════════════════════════════════════
//  Destination
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct DestinationConfig {
    #[serde(flatten)]
    pub connection: Config,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub format: PayloadFormat,
}

fn default_content_type() -> String {
    "application/json".into()
}

/// Что публикуется в тело SEND.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadFormat {
    /// Запись целиком в JSON.
    #[default]
    Record,
    /// Только payload записи.
    Payload,
}

impl DestinationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        if self.connection.queue.is_empty() {
            return Err(ConfigError::Missing("queue"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        toml::from_str(
            r#"
            url = "localhost:61613"
            user = "admin"
            password = "admin"
            queue = "orders"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn defaults() {
        let config = base();
        assert_eq!(config.send_heartbeat, Duration::from_secs(2));
        assert_eq!(config.recv_heartbeat, Duration::from_secs(2));
        assert_eq!(config.receipt_timeout, Duration::from_secs(30));
        assert!(!config.tls.enabled);
        assert!(!config.tls.insecure_skip_verify);
        config.validate().unwrap();
    }

    #[test]
    fn parses_url_forms() {
        let mut config = base();
        for (url, host, port, tls) in [
            ("localhost:61613", "localhost", 61613, false),
            ("tcp://broker:61613", "broker", 61613, false),
            ("stomp+ssl://broker:61614/", "broker", 61614, true),
            ("ssl://[::1]:61614", "::1", 61614, true),
        ] {
            config.url = url.into();
            let address = config.address().unwrap();
            assert_eq!((address.host.as_str(), address.port, address.tls_scheme), (host, port, tls));
        }
        assert_eq!(config.address().unwrap().authority(), "[::1]:61614");

        for url in ["localhost", "http://broker:80", "broker:port", ":61613"] {
            config.url = url.into();
            assert!(config.address().is_err(), "{url}");
        }
    }

    #[test]
    fn validation_names_missing_field() {
        let mut config = base();
        config.password.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("password"))));

        let mut config = base();
        config.url = "ssl://broker:61614".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field: "url", .. })));

        config.tls.enabled = true;
        config.tls.client_cert_path = Some("client.pem".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("tls.client_key_path"))
        ));
    }

    #[test]
    fn source_subscription_headers() {
        let source: SourceConfig = toml::from_str(
            r#"
            url = "localhost:61613"
            user = "admin"
            password = "admin"
            client_id = "bridge"
            send_heartbeat = "500ms"

            [subscription]
            selector = "region = 'eu'"
            prefetch_size = 10
            exclusive = true
            durable_subscription_name = "bridge-sub"
            "#,
        )
        .unwrap();
        source.validate().unwrap();
        assert_eq!(source.connection.send_heartbeat, Duration::from_millis(500));
        assert!(source.connection.queue.is_empty());

        let headers = source.subscription.headers();
        let collected: Vec<_> = headers.iter().collect();
        assert_eq!(
            collected,
            [
                ("selector", "region = 'eu'"),
                ("activemq.prefetchSize", "10"),
                ("activemq.exclusive", "true"),
                ("activemq.subscriptionName", "bridge-sub"),
            ]
        );
        assert!(SubscriptionConfig::default().headers().is_empty());
    }

    #[test]
    fn durable_subscription_needs_client_id() {
        let mut source = SourceConfig {
            connection: base(),
            client_id: None,
            subscription: SubscriptionConfig::default(),
        };
        source.subscription.durable_subscription_name = Some("sub".into());
        assert!(source.validate().is_err());
    }

    #[test]
    fn destination_requires_queue_and_defaults_to_json_records() {
        let dest: DestinationConfig = toml::from_str(
            r#"
            url = "localhost:61613"
            user = "admin"
            password = "admin"
            "#,
        )
        .unwrap();
        assert_eq!(dest.content_type, "application/json");
        assert_eq!(dest.format, PayloadFormat::Record);
        assert!(matches!(dest.validate(), Err(ConfigError::Missing("queue"))));
    }

    #[test]
    fn debug_hides_password() {
        let rendered = format!("{:?}", base());
        assert!(rendered.contains("***"));
        assert!(!rendered.contains("password: \"admin\""));
    }
}
