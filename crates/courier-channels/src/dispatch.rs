use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{base::BaseAdapter, types::IncomingMessage};

/// Spawn the task that feeds queued messages to the adapter's handler.
///
/// Messages are handled one at a time in queue order, so a transport reader
/// can enqueue and move on without ever waiting for the handler. The task
/// ends on cancellation or once every sender is dropped.
pub fn spawn_dispatcher(
    base: Arc<BaseAdapter>,
    cancel: CancellationToken,
) -> (mpsc::UnboundedSender<IncomingMessage>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<IncomingMessage>();
    let task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            base.dispatch(&msg).await;
        }
        debug!(adapter = %base.id(), "dispatcher stopped");
    });
    (tx, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MessageHandler;
    use crate::types::{Capabilities, ChannelType, ChatType, TransportStyle};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle_incoming(&self, msg: &IncomingMessage) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(msg.id.clone());
            Ok(())
        }
    }

    fn msg(id: &str) -> IncomingMessage {
        IncomingMessage {
            id: id.into(),
            channel_type: ChannelType::Signal,
            chat_id: "c".into(),
            chat_type: ChatType::Direct,
            thread_id: None,
            sender_id: "u".into(),
            sender_name: None,
            text: String::new(),
            attachments: vec![],
            timestamp: 0,
            reply_to: None,
        }
    }

    #[tokio::test]
    async fn delivers_in_order_then_stops_when_senders_drop() {
        let base = Arc::new(BaseAdapter::new(
            "d",
            "D",
            ChannelType::Signal,
            Capabilities::builder(TransportStyle::Socket).build(),
        ));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        base.set_handler(recorder.clone());

        let (tx, task) = spawn_dispatcher(base.clone(), CancellationToken::new());
        for id in ["1", "2", "3"] {
            tx.send(msg(id)).unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(recorder.0.lock().unwrap().as_slice(), ["1", "2", "3"]);
        assert_eq!(base.state().message_count, 3);
    }
}
