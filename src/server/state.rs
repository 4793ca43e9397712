use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Settings;
use crate::hub::Hub;
use crate::infrastructure::redis::RedisClient;
use crate::queue::{MessageQueue, QueueConfig};
use crate::ratelimit::RateLimiter;
use crate::store::{MessageStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub messages: MessageStore,
    pub users: UserStore,
    pub queue: Arc<MessageQueue>,
    pub hub: Arc<Hub>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(settings: Settings, pool: PgPool, redis: Arc<RedisClient>) -> Self {
        let messages = MessageStore::new(pool.clone());
        let users = UserStore::new(pool);
        let queue = Arc::new(MessageQueue::new(
            redis,
            QueueConfig::from(&settings.stream),
            messages.clone(),
        ));
        let hub = Arc::new(Hub::new());
        let rate_limiter = Arc::new(RateLimiter::new(&settings.limiter));

        Self {
            settings: Arc::new(settings),
            messages,
            users,
            queue,
            hub,
            rate_limiter,
        }
    }
}
