//! Redis-backed solution store for deployments with several frontends.
//!
//! Keys live under `"{prefix}.{id}"` and hold the digits as a plain string.
//! Redis expires keys on its own, so `collect` does nothing here.

use std::time::Duration;

use captcha_common::constants::redis_keys::{DEFAULT_MAX_KEYS, DEFAULT_PREFIX};
use captcha_common::constants::{DEFAULT_REDIS_URL, EXPIRATION_SECS};
use captcha_common::{CaptchaError, CaptchaId, DigitSequence, Result};
use chrono::TimeDelta;
use redis::{Client, Connection, RedisError, RedisResult};

use super::SolutionStore;

/// Limits below this are treated as misconfiguration
const MIN_MAX_KEYS: u64 = 100;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    pub url: String,
    pub prefix: String,
    pub expiration: TimeDelta,
    /// New ids are refused once the database holds more keys than this
    pub max_keys: u64,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            expiration: TimeDelta::seconds(EXPIRATION_SECS),
            max_keys: DEFAULT_MAX_KEYS,
        }
    }
}

/// Redis solution store.
///
/// Each operation opens its own connection from the client, so blocking
/// callers on different threads never queue behind one another.
pub struct RedisStore {
    client: Client,
    prefix: String,
    expire_secs: u64,
    max_keys: u64,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .field("expire_secs", &self.expire_secs)
            .field("max_keys", &self.max_keys)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Validate the URL and prepare the store. No connection is opened here.
    pub fn new(config: RedisStoreConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| CaptchaError::Config(format!("invalid redis url: {}", e)))?;

        let max_keys = if config.max_keys <= MIN_MAX_KEYS {
            DEFAULT_MAX_KEYS
        } else {
            config.max_keys
        };
        let prefix = if config.prefix.is_empty() {
            DEFAULT_PREFIX.to_string()
        } else {
            config.prefix
        };
        // EX requires a positive value
        let expire_secs = u64::try_from(config.expiration.num_seconds())
            .unwrap_or(0)
            .max(1);

        Ok(Self {
            client,
            prefix,
            expire_secs,
            max_keys,
        })
    }

    /// Check that the server is reachable
    pub fn connect(&self) -> Result<()> {
        self.with_conn(|conn| redis::cmd("PING").query::<String>(conn))
            .map(|_| ())
    }

    fn key(&self, id: &CaptchaId) -> String {
        format!("{}.{}", self.prefix, id)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> RedisResult<T>) -> Result<T> {
        let mut conn = self
            .client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(store_error)?;
        f(&mut conn).map_err(store_error)
    }
}

fn store_error(e: RedisError) -> CaptchaError {
    CaptchaError::Store(format!("redis: {}", e))
}

fn decode(raw: Option<String>) -> Result<Option<DigitSequence>> {
    raw.map(|s| {
        DigitSequence::parse(&s)
            .map_err(|_| CaptchaError::Store(format!("corrupt solution value {:?}", s)))
    })
    .transpose()
}

/// `SET key value XX KEEPTTL`: overwrite only an existing key, keeping its
/// remaining lifetime
fn overwrite_existing(conn: &mut Connection, key: &str, value: &str) -> RedisResult<bool> {
    let reply: Option<String> = redis::cmd("SET")
        .arg(key)
        .arg(value)
        .arg("XX")
        .arg("KEEPTTL")
        .query(conn)?;
    Ok(reply.is_some())
}

impl SolutionStore for RedisStore {
    fn set(&self, id: &CaptchaId, digits: DigitSequence) -> Result<()> {
        let key = self.key(id);
        let value = digits.to_string();
        let expire_secs = self.expire_secs;
        let max_keys = self.max_keys;

        self.with_conn(|conn| {
            if overwrite_existing(conn, &key, &value)? {
                return Ok(true);
            }

            let size: u64 = redis::cmd("DBSIZE").query(conn)?;
            if size > max_keys {
                return Ok(false);
            }
            let _: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&value)
                .arg("EX")
                .arg(expire_secs)
                .query(conn)?;
            Ok(true)
        })
        .and_then(|stored| {
            if stored {
                Ok(())
            } else {
                Err(CaptchaError::Store(format!(
                    "too many keys (> {})",
                    self.max_keys
                )))
            }
        })
    }

    fn get(&self, id: &CaptchaId, clear: bool) -> Result<Option<DigitSequence>> {
        let key = self.key(id);
        let raw = if clear {
            self.with_conn(|conn| {
                let (value, _deleted): (Option<String>, i64) =
                    redis::pipe().atomic().get(&key).del(&key).query(conn)?;
                Ok(value)
            })?
        } else {
            self.with_conn(|conn| redis::cmd("GET").arg(&key).query::<Option<String>>(conn))?
        };
        decode(raw)
    }

    fn replace(&self, id: &CaptchaId, digits: DigitSequence) -> Result<bool> {
        let key = self.key(id);
        let value = digits.to_string();
        self.with_conn(|conn| overwrite_existing(conn, &key, &value))
    }

    fn collect(&self) {}
}
