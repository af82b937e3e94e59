#![allow(dead_code)]

use hearth_model::{AnyEntity, Entity, EntityAction, EntityDescriptor, EntityMeta, EntityPolicy};
use hearth_types::{EntityId, KeyGroup};
use serde::{Deserialize, Serialize};

/// Group-scoped test entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hero {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub account: u64,
    pub gold: u32,
}

impl Entity for Hero {
    const TYPE_NAME: &'static str = "hero";
    const POLICY: EntityPolicy = EntityPolicy::relational();

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

/// Partition-scoped test entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pouch {
    #[serde(flatten)]
    pub meta: EntityMeta,
    pub account: u64,
    pub coins: u32,
}

impl Entity for Pouch {
    const TYPE_NAME: &'static str = "pouch";
    const POLICY: EntityPolicy = EntityPolicy::relational().partitioned();

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

pub fn hero(id: u64, account: u64, version: u32, gold: u32) -> Hero {
    Hero {
        meta: EntityMeta::loaded(EntityId::from_raw(id), version),
        account,
        gold,
    }
}

pub fn pouch(id: u64, account: u64, version: u32, coins: u32) -> Pouch {
    Pouch {
        meta: EntityMeta::loaded(EntityId::from_raw(id), version),
        account,
        coins,
    }
}

pub fn boxed<T: Entity>(entity: T) -> Box<dyn AnyEntity> {
    Box::new(entity)
}

/// Boxed copy of `entity` with `action` pending.
pub fn change<T: Entity>(mut entity: T, action: EntityAction) -> Box<dyn AnyEntity> {
    entity.meta_mut().request(action);
    Box::new(entity)
}

pub fn heroes() -> EntityDescriptor {
    EntityDescriptor::of::<Hero>()
}

pub fn pouches() -> EntityDescriptor {
    EntityDescriptor::of::<Pouch>()
}

pub fn ids(entities: &[Box<dyn AnyEntity>]) -> Vec<u64> {
    entities.iter().map(|e| e.id().as_raw()).collect()
}
