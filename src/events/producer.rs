use crate::config::KafkaSettings;
use crate::error::{AppError, Result};
use anyhow::anyhow;
use chrono::Utc;
use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::client::ClientBuilder;
use rskafka::record::Record;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Configuration for the Kafka producer.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub brokers: Vec<String>,
    pub compression: CompressionType,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub enum CompressionType {
    #[default]
    None,
    Gzip,
    Lz4,
}

impl From<CompressionType> for Compression {
    fn from(ct: CompressionType) -> Self {
        match ct {
            CompressionType::None => Compression::NoCompression,
            CompressionType::Gzip => Compression::Gzip,
            CompressionType::Lz4 => Compression::Lz4,
        }
    }
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            compression: CompressionType::default(),
            retry_count: 3,
            retry_delay_ms: 100,
        }
    }
}

impl From<&KafkaSettings> for ProducerConfig {
    fn from(settings: &KafkaSettings) -> Self {
        Self {
            brokers: settings.broker_list(),
            ..Self::default()
        }
    }
}

/// Kafka event producer.
pub struct EventProducer {
    config: ProducerConfig,
    partition_clients: Arc<RwLock<BTreeMap<String, Arc<PartitionClient>>>>,
    client: Option<Arc<rskafka::client::Client>>,
}

impl EventProducer {
    /// Creates a new event producer with the given configuration.
    pub fn new(config: ProducerConfig) -> Self {
        Self {
            config,
            partition_clients: Arc::new(RwLock::new(BTreeMap::new())),
            client: None,
        }
    }

    /// Connects to the Kafka cluster.
    pub async fn connect(&mut self) -> Result<()> {
        info!("Connecting to Kafka brokers: {:?}", self.config.brokers);

        let client = ClientBuilder::new(self.config.brokers.clone())
            .build()
            .await
            .map_err(AppError::Kafka)?;

        self.client = Some(Arc::new(client));
        info!("Successfully connected to Kafka");
        Ok(())
    }

    /// Gets or creates a partition client for the given topic.
    async fn get_partition_client(&self, topic: &str) -> Result<Arc<PartitionClient>> {
        {
            let clients = self.partition_clients.read().await;
            if let Some(client) = clients.get(topic) {
                return Ok(client.clone());
            }
        }

        let kafka_client = self.client.as_ref().ok_or_else(|| {
            AppError::Internal(anyhow!("Kafka client not connected"))
        })?;

        let partition_client = kafka_client
            .partition_client(topic.to_string(), 0, UnknownTopicHandling::Retry)
            .await
            .map_err(AppError::Kafka)?;

        let client = Arc::new(partition_client);

        {
            let mut clients = self.partition_clients.write().await;
            clients.insert(topic.to_string(), client.clone());
        }

        Ok(client)
    }

    /// Sends a message to the specified topic.
    pub async fn send<T: Serialize>(&self, topic: &str, key: Option<&str>, payload: &T) -> Result<i64> {
        let json = serde_json::to_vec(payload)
            .map_err(|e| AppError::Internal(anyhow!("Failed to serialize payload: {}", e)))?;

        self.send_raw(topic, key, json).await
    }

    /// Sends a raw message to the specified topic, retrying with linear backoff.
    pub async fn send_raw(&self, topic: &str, key: Option<&str>, payload: Vec<u8>) -> Result<i64> {
        let partition_client = self.get_partition_client(topic).await?;

        let record = Record {
            key: key.map(|k| k.as_bytes().to_vec()),
            value: Some(payload),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        };

        let mut last_error = None;
        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                warn!("Retrying Kafka send, attempt {}/{}", attempt, self.config.retry_count);
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms * attempt as u64)).await;
            }

            match partition_client
                .produce(vec![record.clone()], self.config.compression.into())
                .await
            {
                Ok(offsets) => {
                    let offset = offsets.first().copied().unwrap_or(0);
                    debug!("Message sent to topic {} at offset {}", topic, offset);
                    return Ok(offset);
                }
                Err(e) => {
                    error!("Failed to send message to Kafka: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::Internal(anyhow!(
            "Failed to send message after {} retries: {:?}",
            self.config.retry_count,
            last_error
        )))
    }

    /// Checks if the producer is connected.
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Underlying client, for health checks.
    pub fn client(&self) -> Option<Arc<rskafka::client::Client>> {
        self.client.clone()
    }

    /// Gets the producer configuration.
    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }
}
