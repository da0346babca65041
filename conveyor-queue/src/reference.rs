//! Serializable descriptions of queues a role process connects to

use conveyor_config::BrokerConfig;
use conveyor_ipc::IpcTransport;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::broker::BrokerQueue;
use crate::error::{QueueError, QueueResult};
use crate::managed::ManagerClient;
use crate::queue::WorkQueue;

/// Where a pipeline queue lives
///
/// `Managed` queues exist only in the orchestrating host's memory and last
/// as long as its run. `Broker` queues are durable and outlive processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum QueueRef {
    Managed { name: String },
    Broker { name: String, broker: BrokerConfig },
}

impl QueueRef {
    pub fn managed(name: impl Into<String>) -> Self {
        QueueRef::Managed { name: name.into() }
    }

    pub fn broker(name: impl Into<String>, broker: BrokerConfig) -> Self {
        QueueRef::Broker {
            name: name.into(),
            broker,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            QueueRef::Managed { name } | QueueRef::Broker { name, .. } => name,
        }
    }

    pub fn is_managed(&self) -> bool {
        matches!(self, QueueRef::Managed { .. })
    }

    /// Open the queue; managed references need the host connection
    pub async fn connect<T, X>(
        &self,
        manager: Option<&ManagerClient<X>>,
    ) -> QueueResult<Box<dyn WorkQueue<T>>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        X: IpcTransport + 'static,
    {
        match self {
            QueueRef::Managed { name } => {
                let client = manager.ok_or_else(|| QueueError::NoManager(name.clone()))?;
                Ok(Box::new(client.queue::<T>(name.clone())))
            }
            QueueRef::Broker { name, broker } => {
                Ok(Box::new(BrokerQueue::<T>::open(broker, name.clone()).await?))
            }
        }
    }
}
