use redis::aio::MultiplexedConnection;

use crate::error::{Error, ErrorDetails};

/// Handle to the backing Redis store.
///
/// Constructed once at process startup and injected into every component;
/// nothing in this crate creates connections per request or reaches for
/// ambient global state.
pub struct RedisClient {
    conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(url).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to create Redis client: {e}"),
            })
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Config {
                    message: format!("Failed to connect to Redis: {e}"),
                })
            })?;
        Ok(Self { conn })
    }

    /// Multiplexed connections are cheap to clone; each caller gets its own
    /// handle over the shared underlying connection.
    pub fn get_connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}
