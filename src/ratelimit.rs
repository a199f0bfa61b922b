//! Rate Limiter (`spec.md` §4.6, §8): three simultaneous budgets —
//! global, per-entity, and a per-entity cooldown. All three are tested
//! and updated inside a single critical section so concurrent senders
//! observe an atomic admit/reject decision (`spec.md` §5).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{ValidatorCode, ValidatorError};

/// Small fixed capacity suffices: budgets are expressed per second, and
/// `spec.md` §9's Design Notes call for the deques to be boundable to a
/// handful of entries rather than growing unbounded.
const DEQUE_CAPACITY: usize = 16;
const WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub global_rate: u32,
    pub entity_rate: u32,
    pub entity_cooldown_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_rate: 10,
            entity_rate: 2,
            entity_cooldown_ms: 500,
        }
    }
}

struct EntityState {
    deque: VecDeque<Instant>,
    last_admitted: Option<Instant>,
}

impl EntityState {
    fn new() -> Self {
        Self {
            deque: VecDeque::with_capacity(DEQUE_CAPACITY),
            last_admitted: None,
        }
    }
}

struct Budgets {
    global: VecDeque<Instant>,
    per_entity: HashMap<String, EntityState>,
}

/// Lifecycle: initialized empty, pruned on each query, never persisted
/// (`spec.md` §3).
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<Budgets>,
}

fn prune(deque: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = deque.front() {
        if now.duration_since(*front) > WINDOW {
            deque.pop_front();
        } else {
            break;
        }
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(Budgets {
                global: VecDeque::with_capacity(DEQUE_CAPACITY),
                per_entity: HashMap::new(),
            }),
        }
    }

    /// Test all three budgets and, if all pass, record the admission.
    /// This is the single atomic critical section described in
    /// `spec.md` §5.
    pub fn admit(&self, entity_id: &str) -> Result<(), ValidatorError> {
        let now = Instant::now();
        let mut guard = self.state.lock().expect("rate limiter mutex poisoned");

        prune(&mut guard.global, now);
        let entity = guard
            .per_entity
            .entry(entity_id.to_string())
            .or_insert_with(EntityState::new);
        prune(&mut entity.deque, now);

        if let Some(last) = entity.last_admitted {
            let cooldown = Duration::from_millis(self.config.entity_cooldown_ms);
            if now.duration_since(last) < cooldown {
                return Err(ValidatorError::new(
                    ValidatorCode::E020CooldownNotElapsed,
                    format!("{entity_id} cooldown not elapsed"),
                ));
            }
        }

        if entity.deque.len() as u32 >= self.config.entity_rate {
            return Err(ValidatorError::new(
                ValidatorCode::E019RateExceeded,
                format!("{entity_id} exceeded entity_rate"),
            ));
        }
        if guard.global.len() as u32 >= self.config.global_rate {
            return Err(ValidatorError::new(
                ValidatorCode::E019RateExceeded,
                "global_rate exceeded",
            ));
        }

        guard.global.push_back(now);
        if guard.global.len() > DEQUE_CAPACITY {
            guard.global.pop_front();
        }
        let entity = guard.per_entity.get_mut(entity_id).expect("just inserted");
        entity.deque.push_back(now);
        if entity.deque.len() > DEQUE_CAPACITY {
            entity.deque.pop_front();
        }
        entity.last_admitted = Some(now);

        Ok(())
    }
}
