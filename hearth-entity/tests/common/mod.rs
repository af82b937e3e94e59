#![allow(dead_code)]

use hearth_cache::{KeyValueStore, MemoryKvStore};
use hearth_entity::{Hearth, HearthConfig};
use hearth_model::{Entity, EntityMeta, EntityPolicy};
use hearth_types::KeyGroup;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

macro_rules! test_entity {
    ($name:ident, $type_name:literal, $policy:expr, { $($field:ident: $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            #[serde(flatten)]
            pub meta: EntityMeta,
            pub account: u64,
            $(pub $field: $ty,)*
        }

        impl Entity for $name {
            const TYPE_NAME: &'static str = $type_name;
            const POLICY: EntityPolicy = $policy;

            fn meta(&self) -> &EntityMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut EntityMeta {
                &mut self.meta
            }

            fn key_group(&self) -> KeyGroup {
                KeyGroup::new(self.account)
            }
        }
    };
}

test_entity!(Hero, "hero", EntityPolicy::relational(), { name: String, gold: u32 });
test_entity!(Letter, "letter", EntityPolicy::document(), { subject: String });
test_entity!(Banner, "banner", EntityPolicy::relational().distributed(), { motto: String });
test_entity!(Badge, "badge", EntityPolicy::relational().partitioned(), { title: String });

pub fn hero(account: u64, name: &str, gold: u32) -> Hero {
    Hero {
        meta: EntityMeta::new(),
        account,
        name: name.to_string(),
        gold,
    }
}

pub fn letter(account: u64, subject: &str) -> Letter {
    Letter {
        meta: EntityMeta::new(),
        account,
        subject: subject.to_string(),
    }
}

pub fn banner(account: u64, motto: &str) -> Banner {
    Banner {
        meta: EntityMeta::new(),
        account,
        motto: motto.to_string(),
    }
}

pub fn badge(account: u64, title: &str) -> Badge {
    Badge {
        meta: EntityMeta::new(),
        account,
        title: title.to_string(),
    }
}

pub fn test_config() -> HearthConfig {
    let mut config = HearthConfig::default();
    config.node_id = 1;
    config.scheduler.database_threads = 2;
    config.scheduler.message_threads = 2;
    config.cache.group_lock_timeout_ms = 500;
    config
}

/// Runtime with every test type registered and a distributed tier over an
/// in-process store.
pub fn open_hearth() -> Hearth {
    open_with(&test_config())
}

pub fn open_with(config: &HearthConfig) -> Hearth {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
    let hearth = Hearth::open_with_store(config, Some(store)).unwrap();
    hearth.register::<Hero>().unwrap();
    hearth.register::<Letter>().unwrap();
    hearth.register::<Banner>().unwrap();
    hearth.register::<Badge>().unwrap();
    hearth
}

pub fn flush(hearth: &Hearth) {
    assert!(
        hearth.manager().writer().wait_idle(Duration::from_secs(5)),
        "write-behind did not drain"
    );
}
