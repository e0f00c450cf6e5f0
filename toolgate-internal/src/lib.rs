pub mod authz; // authorization pipeline for tool requests
pub mod captcha; // captcha verification against the provider
pub mod config; // environment configuration
pub mod endpoints; // API endpoints
pub mod error; // error handling
pub mod gateway_util; // utilities for gateway
pub mod observability; // utilities for observability (logs, etc.)
pub mod rate_limit; // per-session rate limiting
pub mod redis_client; // redis client
pub mod retention; // submission retention sweeper
pub mod session; // anonymous visitor sessions
pub mod spend; // monthly spend tracking
pub mod tool; // tool runner seam to the LLM backend
