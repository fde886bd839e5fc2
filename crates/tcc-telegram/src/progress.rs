use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tcc_core::{
    domain::MessageRef, formatting::escape_html, messaging::port::MessagingPort,
    ports::ProgressSink,
};

/// Renders engine progress by editing one status message in place.
///
/// Edits stop once the job is cancelled so the final summary is not
/// overwritten by a late progress line.
pub struct StatusMessageSink {
    messenger: Arc<dyn MessagingPort>,
    status: MessageRef,
    cancel: CancellationToken,
}

impl StatusMessageSink {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        status: MessageRef,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            messenger,
            status,
            cancel,
        }
    }
}

#[async_trait]
impl ProgressSink for StatusMessageSink {
    async fn report(&self, text: &str) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Err(e) = self
            .messenger
            .edit_html(self.status, &escape_html(text))
            .await
        {
            tracing::debug!(chat_id = self.status.chat_id.0, "progress edit failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tcc_core::{
        domain::{ChatId, MessageId},
        errors::Error,
        Result,
    };

    #[derive(Default)]
    struct RecordingMessenger {
        edits: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl MessagingPort for RecordingMessenger {
        async fn send_html(&self, chat_id: ChatId, _html: &str) -> Result<MessageRef> {
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }

        async fn edit_html(&self, _msg: MessageRef, html: &str) -> Result<()> {
            if self.fail {
                return Err(Error::External("message is not modified".to_string()));
            }
            self.edits.lock().unwrap().push(html.to_string());
            Ok(())
        }

        async fn delete_message(&self, _msg: MessageRef) -> Result<()> {
            Ok(())
        }
    }

    fn status() -> MessageRef {
        MessageRef {
            chat_id: ChatId(10),
            message_id: MessageId(99),
        }
    }

    #[tokio::test]
    async fn edits_status_message_with_escaped_text() {
        let messenger = Arc::new(RecordingMessenger::default());
        let sink = StatusMessageSink::new(messenger.clone(), status(), CancellationToken::new());

        sink.report("📤 Progress: 1/2 <x>").await;

        let edits = messenger.edits.lock().unwrap().clone();
        assert_eq!(edits, vec!["📤 Progress: 1/2 &lt;x&gt;".to_string()]);
    }

    #[tokio::test]
    async fn goes_quiet_after_cancellation() {
        let messenger = Arc::new(RecordingMessenger::default());
        let cancel = CancellationToken::new();
        let sink = StatusMessageSink::new(messenger.clone(), status(), cancel.clone());

        sink.report("first").await;
        cancel.cancel();
        sink.report("second").await;

        assert_eq!(messenger.edits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn edit_failures_are_swallowed() {
        let messenger = Arc::new(RecordingMessenger {
            fail: true,
            ..Default::default()
        });
        let sink = StatusMessageSink::new(messenger, status(), CancellationToken::new());
        sink.report("anything").await;
    }
}
