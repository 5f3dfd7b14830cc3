//! NameGenerator port - job 名の生成
//!
//! Jobs created without an explicit name get `<action>-<ulid>` (lowercase).
//! The ULID timestamp comes from the store's clock, so generated names sort
//! in insertion order within a namespace, which keeps the FIFO tie-break
//! (by name) consistent with creation time.

use ulid::Ulid;

use crate::domain::JobAction;
use crate::ports::Clock;

pub trait NameGenerator: Send + Sync {
    fn generate(&self, action: JobAction) -> String;
}

/// ULID ベースの名前生成器
pub struct UlidNameGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidNameGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> NameGenerator for UlidNameGenerator<C> {
    fn generate(&self, action: JobAction) -> String {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        format!("{}-{}", action, ulid.to_string().to_lowercase())
    }
}
