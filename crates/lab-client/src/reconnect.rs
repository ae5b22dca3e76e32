//! Connect retries and recovery policy.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::connection::ServerAddress;
use crate::error::{GatewayError, GatewayResult};

/// How `connect()` retries before giving up.
///
/// Attempts are paced at a fixed interval; `timeout` bounds the whole
/// loop and `None` retries until the caller drops the future.
#[derive(Debug, Clone, Copy)]
pub struct ConnectConfig {
    /// Pause between attempts.
    pub retry_interval: Duration,
    /// Overall budget; `None` means retry indefinitely.
    pub timeout: Option<Duration>,
    /// TCP connect timeout of a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        ConnectConfig {
            retry_interval: Duration::from_millis(250),
            timeout: Some(Duration::from_secs(10)),
            attempt_timeout: Duration::from_secs(2),
        }
    }
}

impl ConnectConfig {
    /// Retry forever, for clients that must outwait a server restart.
    pub fn unbounded() -> Self {
        ConnectConfig {
            timeout: None,
            ..ConnectConfig::default()
        }
    }
}

/// Dials one address under a [`ConnectConfig`].
#[derive(Debug, Clone)]
pub(crate) struct ChannelFactory {
    addr: ServerAddress,
    config: ConnectConfig,
}

impl ChannelFactory {
    pub(crate) fn new(addr: ServerAddress, config: ConnectConfig) -> Self {
        ChannelFactory { addr, config }
    }

    pub(crate) fn addr(&self) -> &ServerAddress {
        &self.addr
    }

    /// Dial with fixed-interval retries until connected or out of budget.
    pub(crate) async fn connect(&self) -> GatewayResult<Channel> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let endpoint = Endpoint::from_shared(self.addr.as_str().to_string())?
                .connect_timeout(self.config.attempt_timeout)
                .tcp_keepalive(Some(Duration::from_secs(30)));
            match endpoint.connect().await {
                Ok(channel) => {
                    debug!(addr = %self.addr, attempt, "connected");
                    return Ok(channel);
                }
                Err(err) => {
                    if let Some(budget) = self.config.timeout {
                        if started.elapsed() + self.config.retry_interval >= budget {
                            return Err(GatewayError::ConnectTimeout {
                                addr: self.addr.to_string(),
                                waited: started.elapsed(),
                            });
                        }
                    }
                    debug!(addr = %self.addr, attempt, %err, "connect attempt failed, retrying");
                    tokio::time::sleep(self.config.retry_interval).await;
                }
            }
        }
    }
}

/// Decides whether a gateway keeps trying to recover a lost connection.
///
/// Consulted once per recovery attempt; implementations own their pacing,
/// so a prompting implementation can block on an operator indefinitely.
#[async_trait]
pub trait ReconnectPolicy: Send + Sync {
    /// `attempt` starts at 1. Return `false` to give up and surface the
    /// loss to the caller.
    async fn should_reconnect(&self, attempt: u32, err: &GatewayError) -> bool;
}

/// Retry a bounded number of times with a fixed pause. The default
/// policy for headless clients.
#[derive(Debug, Clone, Copy)]
pub struct AutoReconnect {
    /// Recovery attempts before giving up.
    pub max_attempts: u32,
    /// Pause before each attempt.
    pub pause: Duration,
}

impl Default for AutoReconnect {
    fn default() -> Self {
        AutoReconnect {
            max_attempts: 3,
            pause: Duration::from_millis(500),
        }
    }
}

#[async_trait]
impl ReconnectPolicy for AutoReconnect {
    async fn should_reconnect(&self, attempt: u32, err: &GatewayError) -> bool {
        if attempt > self.max_attempts {
            debug!(attempt, %err, "recovery attempts exhausted");
            return false;
        }
        tokio::time::sleep(self.pause).await;
        true
    }
}

/// Never recover; surface the loss immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

#[async_trait]
impl ReconnectPolicy for NoReconnect {
    async fn should_reconnect(&self, _attempt: u32, _err: &GatewayError) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_connect_times_out_against_a_dead_port() {
        let addr = ServerAddress::instrument("127.0.0.1:1").unwrap();
        let factory = ChannelFactory::new(
            addr,
            ConnectConfig {
                retry_interval: Duration::from_millis(20),
                timeout: Some(Duration::from_millis(100)),
                attempt_timeout: Duration::from_millis(50),
            },
        );
        let started = Instant::now();
        let err = factory.connect().await.unwrap_err();
        assert!(matches!(err, GatewayError::ConnectTimeout { .. }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn auto_reconnect_respects_its_attempt_budget() {
        let policy = AutoReconnect {
            max_attempts: 2,
            pause: Duration::from_millis(1),
        };
        let err = GatewayError::ConnectionLost("test".into());
        assert!(policy.should_reconnect(1, &err).await);
        assert!(policy.should_reconnect(2, &err).await);
        assert!(!policy.should_reconnect(3, &err).await);
    }

    #[tokio::test]
    async fn no_reconnect_never_retries() {
        let err = GatewayError::ConnectionLost("test".into());
        assert!(!NoReconnect.should_reconnect(1, &err).await);
    }
}
