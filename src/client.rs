use crate::connection::{ControllerLink, LinkConfig, LinkState};
use crate::dispatch::{CommandRequest, DispatchStatus, Dispatcher};
use crate::error::Result;
use crate::sink::{Publication, PushRelay};
use crate::store::{Snapshot, StateStore};
use crate::subscription::StateReceiver;
use crate::types::ChannelCatalog;
use crate::views::{View, ViewContext};
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// The running bridge to one controller
///
/// `Bridge` ties the controller link, the state store and the command
/// dispatcher together. It is cheap to clone; every transport gets its own
/// handle.
#[derive(Clone)]
pub struct Bridge {
    store: Arc<StateStore>,
    link: Arc<ControllerLink>,
    dispatcher: Dispatcher,
    catalog: Arc<ChannelCatalog>,
    started_at: DateTime<Local>,
    publications: broadcast::Sender<Publication>,
}

impl Bridge {
    /// Create the bridge without connecting yet
    pub fn new(config: LinkConfig, catalog: ChannelCatalog) -> Self {
        let store = Arc::new(StateStore::new());
        let link = Arc::new(ControllerLink::new(config));
        let catalog = Arc::new(catalog);
        let dispatcher = Dispatcher::new(store.clone(), link.clone(), catalog.clone());
        let (publications, _) = broadcast::channel(100);

        Self {
            store,
            link,
            dispatcher,
            catalog,
            started_at: Local::now(),
            publications,
        }
    }

    /// Spawn the link task: connect, bootstrap, watch, reconnect
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rio_bridge::{Bridge, ChannelCatalog, LinkConfig};
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let config = LinkConfig {
    ///         host: "192.168.1.50".to_string(),
    ///         ..LinkConfig::default()
    ///     };
    ///     let bridge = Bridge::new(config, ChannelCatalog::default());
    ///     let _link = bridge.start();
    ///
    ///     let status = bridge.dispatch_query("zone=3&action=on&source=2").await;
    ///     println!("dispatch: {}", status.code());
    /// }
    /// ```
    pub fn start(&self) -> JoinHandle<()> {
        tokio::spawn(self.link.clone().run(self.store.clone()))
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn link(&self) -> &Arc<ControllerLink> {
        &self.link
    }

    pub fn catalog(&self) -> &ChannelCatalog {
        &self.catalog
    }

    /// Current state of the whole model
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Render one view of the current state
    pub fn render(&self, view: View) -> Result<serde_json::Value> {
        let snapshot = self.store.snapshot();
        ViewContext {
            snapshot: &snapshot,
            catalog: &self.catalog,
            started_at: self.started_at,
            link_state: self.link.state(),
        }
        .render(view)
    }

    /// Validate a command and send it to the controller
    pub async fn dispatch(&self, request: &CommandRequest) -> DispatchStatus {
        self.dispatcher.dispatch(request).await
    }

    /// Same as [`Bridge::dispatch`] for a `key=value&...` query string
    pub async fn dispatch_query(&self, query: &str) -> DispatchStatus {
        self.dispatcher.dispatch_query(query).await
    }

    /// Subscribe to applied state changes
    pub fn subscribe_state(&self) -> StateReceiver {
        self.store.subscribe()
    }

    /// Messages bound for the publish/subscribe transport
    pub fn publications(&self) -> &broadcast::Sender<Publication> {
        &self.publications
    }

    /// Link lifecycle position
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Build the relay that pushes state changes to `targets`
    pub fn push_relay(&self, targets: &BTreeMap<String, String>) -> Result<PushRelay> {
        PushRelay::new(targets, self.store.clone(), self.publications.clone())
    }
}
