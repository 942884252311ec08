use rc_proto::FrameWriter;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// The hub-global map of currently connected agent ids to the writer half of
/// their connection. Guarded by one `RwLock` per §5: mutations here never
/// cross an `.await` boundary without re-reading.
#[derive(Default)]
pub struct LiveClients {
    inner: RwLock<HashMap<String, FrameWriter>>,
}

impl LiveClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: String, writer: FrameWriter) {
        self.inner.write().await.insert(id, writer);
    }

    pub async fn remove(&self, id: &str) {
        self.inner.write().await.remove(id);
    }

    pub async fn get(&self, id: &str) -> Option<FrameWriter> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.contains_key(id)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// Writes one line to every connected agent. Best-effort: a write error
    /// to one connection does not stop delivery to the others.
    pub async fn broadcast_line(&self, line: &str) {
        let writers: Vec<FrameWriter> = self.inner.read().await.values().cloned().collect();
        for writer in writers {
            let _ = writer.write_line(line).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn loopback_writer() -> FrameWriter {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::net::TcpStream::connect(addr);
        let (accepted, connected) = tokio::join!(listener.accept(), connect);
        let (stream, _) = accepted.unwrap();
        drop(connected.unwrap());
        let (_read, write) = stream.into_split();
        FrameWriter::new(write)
    }

    #[tokio::test]
    async fn insert_get_remove_round_trip() {
        let clients = LiveClients::new();
        assert!(!clients.contains("a").await);

        clients.insert("a".to_string(), loopback_writer().await).await;
        assert!(clients.contains("a").await);
        assert_eq!(clients.ids().await, vec!["a".to_string()]);

        clients.remove("a").await;
        assert!(!clients.contains("a").await);
        assert!(clients.get("a").await.is_none());
    }
}
