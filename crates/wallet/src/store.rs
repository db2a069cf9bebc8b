use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use bitcoin::OutPoint;

use crate::channel::OpenChannel;
use crate::error::Error;

/// Durable channel storage, keyed by remote node key and funding outpoint.
/// Channels are persisted as pending at reservation completion and marked
/// open once the funding transaction reaches its confirmation depth.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn persist_channel(&self, channel: &OpenChannel) -> Result<(), Error>;
    async fn mark_channel_open(&self, funding_outpoint: &OutPoint) -> Result<(), Error>;
    async fn channel(
        &self,
        remote_node: &PublicKey,
        funding_outpoint: &OutPoint,
    ) -> Result<Option<OpenChannel>, Error>;
    async fn channels(&self) -> Result<Vec<OpenChannel>, Error>;
    async fn remove_channel(
        &self,
        remote_node: &PublicKey,
        funding_outpoint: &OutPoint,
    ) -> Result<(), Error>;
}

/// In-memory store used by tests and as a reference implementation.
#[derive(Default)]
pub struct MemoryChannelStore {
    channels: RwLock<HashMap<(PublicKey, OutPoint), OpenChannel>>,
}

impl MemoryChannelStore {
    pub fn new() -> Self {
        MemoryChannelStore::default()
    }
}

#[async_trait]
impl ChannelStore for MemoryChannelStore {
    async fn persist_channel(&self, channel: &OpenChannel) -> Result<(), Error> {
        let mut channels = self
            .channels
            .write()
            .map_err(|_| Error::Store("lock poisoned".to_string()))?;
        channels.insert(
            (channel.remote_node, channel.funding_outpoint),
            channel.clone(),
        );
        Ok(())
    }

    async fn mark_channel_open(&self, funding_outpoint: &OutPoint) -> Result<(), Error> {
        let mut channels = self
            .channels
            .write()
            .map_err(|_| Error::Store("lock poisoned".to_string()))?;
        for channel in channels.values_mut() {
            if channel.funding_outpoint == *funding_outpoint {
                channel.is_pending = false;
            }
        }
        Ok(())
    }

    async fn channel(
        &self,
        remote_node: &PublicKey,
        funding_outpoint: &OutPoint,
    ) -> Result<Option<OpenChannel>, Error> {
        let channels = self
            .channels
            .read()
            .map_err(|_| Error::Store("lock poisoned".to_string()))?;
        Ok(channels.get(&(*remote_node, *funding_outpoint)).cloned())
    }

    async fn channels(&self) -> Result<Vec<OpenChannel>, Error> {
        let channels = self
            .channels
            .read()
            .map_err(|_| Error::Store("lock poisoned".to_string()))?;
        Ok(channels.values().cloned().collect())
    }

    async fn remove_channel(
        &self,
        remote_node: &PublicKey,
        funding_outpoint: &OutPoint,
    ) -> Result<(), Error> {
        let mut channels = self
            .channels
            .write()
            .map_err(|_| Error::Store("lock poisoned".to_string()))?;
        channels.remove(&(*remote_node, *funding_outpoint));
        Ok(())
    }
}
