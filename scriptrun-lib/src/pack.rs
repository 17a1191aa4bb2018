use crate::Config;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;

/// An extension made available inside a script's execution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pack {
    pub name: String,
    pub env: BTreeMap<String, String>,
}

pub trait PackResolver {
    fn get_packs(&self) -> Result<Vec<Pack>>;
}

/// Packs declared under `[packs.<name>]` in the configuration.
#[derive(Debug, Clone)]
pub struct ConfigPackResolver {
    config: Config,
}

impl ConfigPackResolver {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl PackResolver for ConfigPackResolver {
    fn get_packs(&self) -> Result<Vec<Pack>> {
        Ok(self
            .config
            .packs
            .iter()
            .filter(|(_, pack)| pack.enabled)
            .map(|(name, pack)| Pack {
                name: name.clone(),
                env: pack.env.clone(),
            })
            .collect())
    }
}
