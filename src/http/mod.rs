//! HTTP integration: axum middleware, path filtering and the server.

mod middleware;
mod paths;
mod server;

pub use middleware::{
    bot_throttle_middleware, source_address, BotCheck, BotThrottle, X_BOT_DETECTED,
    X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use paths::PathFilter;
pub use server::{throttled_router, HttpServer};
