//! Spider collaborator seam
//!
//! The crawler implementation lives outside this crate. It connects through a
//! pair of channels: the coordinator drives it with `SpiderCommand`s and
//! consumes a stream of `SpiderEvent`s in return. Crawl callbacks from the
//! original design become plain event handling on the receiving side.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::grid::instance::Instance;

/// Channel capacity for both directions
const CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Page
// ============================================================================

/// A crawled page with its auditable element ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Page URL
    pub url: String,

    /// Stable ids of the auditable elements found on the page
    pub element_ids: Vec<String>,
}

impl Page {
    pub fn new(url: impl Into<String>, element_ids: Vec<String>) -> Self {
        Self {
            url: url.into(),
            element_ids,
        }
    }
}

// ============================================================================
// Events and commands
// ============================================================================

/// Events emitted by the spider
#[derive(Debug, Clone)]
pub enum SpiderEvent {
    /// A page was fetched and parsed
    Page(Page),

    /// One crawl pass finished (more may follow in distributed crawling)
    RunComplete,

    /// The whole crawl is finished; no further pages will arrive
    CrawlComplete,
}

/// Commands the coordinator sends to the spider
#[derive(Debug, Clone)]
pub enum SpiderCommand {
    /// Begin crawling the configured target
    Start,

    /// Peer list for distributed crawling
    UpdatePeers(Vec<Instance>),

    /// A peer finished crawling; stop waiting on it
    PeerDone(String),
}

// ============================================================================
// Channel plumbing
// ============================================================================

/// Coordinator-side handle: send commands, receive events
pub struct SpiderHandle {
    pub commands: mpsc::Sender<SpiderCommand>,
    pub events: mpsc::Receiver<SpiderEvent>,
}

/// Spider-side handle: receive commands, send events
pub struct SpiderPort {
    pub commands: mpsc::Receiver<SpiderCommand>,
    pub events: mpsc::Sender<SpiderEvent>,
}

/// Create the connected channel pair for a coordinator/spider link
pub fn spider_channel() -> (SpiderHandle, SpiderPort) {
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

    (
        SpiderHandle {
            commands: cmd_tx,
            events: event_rx,
        },
        SpiderPort {
            commands: cmd_rx,
            events: event_tx,
        },
    )
}

/// Spawn a stand-in spider that completes immediately on Start
///
/// Used when no external crawler is attached: the scan degenerates to an
/// empty crawl, which leaves the audit scope to whatever was distributed.
pub fn spawn_null_spider(mut port: SpiderPort) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(cmd) = port.commands.recv().await {
            match cmd {
                SpiderCommand::Start => {
                    let _ = port.events.send(SpiderEvent::RunComplete).await;
                    let _ = port.events.send(SpiderEvent::CrawlComplete).await;
                }
                SpiderCommand::UpdatePeers(_) | SpiderCommand::PeerDone(_) => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_spider_completes_on_start() {
        let (mut handle, port) = spider_channel();
        let _ = spawn_null_spider(port);

        handle.commands.send(SpiderCommand::Start).await.unwrap();

        assert!(matches!(
            handle.events.recv().await,
            Some(SpiderEvent::RunComplete)
        ));
        assert!(matches!(
            handle.events.recv().await,
            Some(SpiderEvent::CrawlComplete)
        ));
    }

    #[tokio::test]
    async fn test_null_spider_ignores_peer_commands() {
        let (handle, port) = spider_channel();
        let _ = spawn_null_spider(port);

        handle
            .commands
            .send(SpiderCommand::UpdatePeers(vec![Instance::new("s:1", "t")]))
            .await
            .unwrap();
        handle
            .commands
            .send(SpiderCommand::PeerDone("s:1".to_string()))
            .await
            .unwrap();
        // No events expected; the channel stays open.
    }
}
