//! The dispatch loop: drains the inbound queue in passes, keeps the document
//! store current, answers superseded requests as cancelled and runs only the
//! newest request of each command kind.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::document_store::DocumentStore;
use crate::error::ServerError;
use crate::features::{self, FeatureProvider};
use crate::pending::PendingTable;
use crate::protocol::{
    parse_inbound, CommandKind, DocumentChange, FeatureResult, Inbound, MessageId, Notification,
    Request, Response,
};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound for a single feature call; `None` waits indefinitely.
    ///
    /// The deadline only stops the dispatcher from waiting. A call that
    /// overruns keeps its thread on tokio's blocking pool until the feature
    /// returns, so a feature that never returns leaks one pool thread per
    /// timed-out request. Once the pool (512 threads by default) is full,
    /// later calls queue behind the stuck ones and time out too.
    pub feature_timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            feature_timeout: Some(Duration::from_secs(5)),
        }
    }
}

pub struct Dispatcher<P> {
    documents: DocumentStore,
    pending: PendingTable,
    // Every request id accepted since the last reconcile, in arrival order.
    seen: Vec<(MessageId, CommandKind)>,
    features: Arc<P>,
    config: DispatchConfig,
}

impl<P: FeatureProvider> Dispatcher<P> {
    pub fn new(features: Arc<P>, config: DispatchConfig) -> Self {
        Self {
            documents: DocumentStore::new(),
            pending: PendingTable::new(),
            seen: Vec::new(),
            features,
            config,
        }
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    /// Draining step for one frame. Notifications are applied and
    /// acknowledged right away; requests only become pending.
    pub fn accept(&mut self, frame: &[u8], out: &mut Vec<Response>) {
        match parse_inbound(frame) {
            Ok(Inbound::Notification(notification)) => {
                let id = notification.id;
                self.apply(notification);
                out.push(Response::acknowledged(id));
            }
            Ok(Inbound::Request(request)) => {
                tracing::trace!(
                    id = request.id,
                    command = %request.kind(),
                    file = %request.file,
                    "request queued"
                );
                self.seen.push((request.id, request.kind()));
                if let Some(replaced) = self.pending.supersede(request) {
                    tracing::trace!(id = replaced.id, "replaced by a newer request");
                }
            }
            Err(err) => match err.message_id() {
                Some(id) => {
                    tracing::warn!(id, "{err}; answering as cancelled");
                    out.push(Response::cancelled(id));
                }
                None => tracing::warn!("{err}; dropping unanswerable frame"),
            },
        }
    }

    fn apply(&mut self, notification: Notification) {
        let Notification { id, file, change } = notification;
        match change {
            DocumentChange::Upsert(contents) => {
                tracing::trace!(id, %file, bytes = contents.len(), "document updated");
                self.documents.upsert(file, contents);
            }
            DocumentChange::Remove => {
                if self.documents.remove(&file) {
                    tracing::trace!(id, %file, "document removed");
                } else {
                    tracing::warn!(id, %file, "removal of a document that was never opened");
                }
            }
        }
    }

    /// Cancels every request seen since the last pass that is not the
    /// pending one for its kind.
    pub fn reconcile(&mut self, out: &mut Vec<Response>) {
        for (id, kind) in self.seen.drain(..) {
            if self.pending.pending_id(kind) != Some(id) {
                tracing::debug!(id, command = %kind, "superseded");
                out.push(Response::cancelled(id));
            }
        }
    }

    /// Runs each pending request once, in command order, and clears the
    /// table. A failing command is answered as cancelled without affecting
    /// the others.
    pub async fn execute(&mut self, out: &mut Vec<Response>) {
        for request in self.pending.take_all() {
            let id = request.id;
            let kind = request.kind();
            match self.run_feature(request).await {
                Ok(result) => out.push(Response::completed(id, kind, result)),
                Err(err) => {
                    tracing::warn!(id, command = %kind, "{err}; answering as cancelled");
                    out.push(Response::cancelled(id));
                }
            }
        }
    }

    async fn run_feature(&self, request: Request) -> Result<FeatureResult, ServerError> {
        let kind = request.kind();
        let text = if kind.needs_document() {
            self.documents.read(&request.file)?
        } else {
            Arc::new(String::new())
        };

        let provider = Arc::clone(&self.features);
        let call = tokio::task::spawn_blocking(move || {
            features::invoke(provider.as_ref(), &text, &request.command)
        });

        let joined = match self.config.feature_timeout {
            Some(deadline) => timeout(deadline, call).await.map_err(|_| ServerError::Timeout {
                command: kind,
                deadline,
            })?,
            None => call.await,
        };

        match joined {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(ServerError::feature(kind, &err)),
            Err(join_err) => Err(ServerError::Feature {
                command: kind,
                message: format!("feature task aborted: {join_err}"),
            }),
        }
    }

    /// Draining and Reconciling for one batch. Returns the acknowledgements
    /// and cancellations, which can be published before anything executes.
    pub fn drain<I>(&mut self, batch: I) -> Vec<Response>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut out = Vec::new();
        for frame in batch {
            self.accept(frame.as_ref(), &mut out);
        }
        self.reconcile(&mut out);
        out
    }

    /// One full pass over an already drained batch.
    pub async fn run_pass<I>(&mut self, batch: I) -> Vec<Response>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut out = self.drain(batch);
        self.execute(&mut out).await;
        out
    }

    /// Serves until `inbound` closes or the receiver of `outbound` is gone.
    ///
    /// Waits for the first frame, then takes everything queued behind it as
    /// one batch; no frame that arrives mid-pass joins the current pass.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Bytes>,
        outbound: mpsc::Sender<Response>,
    ) {
        let mut pass: u64 = 0;
        while let Some(first) = inbound.recv().await {
            let mut batch = vec![first];
            while let Ok(frame) = inbound.try_recv() {
                batch.push(frame);
            }

            pass += 1;
            let frames = batch.len();
            let drained = self.drain(batch);
            let answered = drained.len();
            if publish(&outbound, drained).await.is_err() {
                break;
            }

            let mut results = Vec::new();
            self.execute(&mut results).await;
            tracing::debug!(
                pass,
                frames,
                responses = answered + results.len(),
                documents = self.documents.len(),
                "pass complete"
            );
            if publish(&outbound, results).await.is_err() {
                break;
            }
        }
        tracing::info!(passes = pass, "stopping dispatch");
    }
}

async fn publish(
    outbound: &mpsc::Sender<Response>,
    responses: Vec<Response>,
) -> Result<(), mpsc::error::SendError<Response>> {
    for response in responses {
        if let Err(closed) = outbound.send(response).await {
            tracing::info!("outbound queue closed");
            return Err(closed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{TextRange, Token};
    use anyhow::{anyhow, Result};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockFeatureProvider {
        autocomplete_called: AtomicUsize,
        highlight_called: AtomicUsize,
        last_word: Mutex<Option<String>>,
        last_text: Mutex<Option<String>>,
        fail_highlight: bool,
        slow_links: Option<Duration>,
    }

    impl FeatureProvider for MockFeatureProvider {
        fn autocomplete(&self, text: &str, _: &[String], current_word: &str) -> Result<Vec<String>> {
            self.autocomplete_called.fetch_add(1, Ordering::SeqCst);
            *self.last_word.lock().unwrap() = Some(current_word.to_owned());
            *self.last_text.lock().unwrap() = Some(text.to_owned());
            Ok(vec![format!("{current_word}!")])
        }

        fn replacements(&self, _: &str, _: &[String], word: &str) -> Result<Vec<String>> {
            Ok(vec![word.to_uppercase()])
        }

        fn highlight(&self, _: &str, language: &str, range: TextRange) -> Result<Vec<Token>> {
            self.highlight_called.fetch_add(1, Ordering::SeqCst);
            if self.fail_highlight {
                return Err(anyhow!("no grammar for {language}"));
            }
            Ok(vec![Token::new(range.start, range.end, language, "")])
        }

        fn editorconfig(&self, path: &Path) -> Result<BTreeMap<String, String>> {
            Ok(BTreeMap::from([("path".to_string(), path.display().to_string())]))
        }

        fn definition(&self, _: &str, _: &[(String, String)], word: &str) -> Result<Vec<Token>> {
            Ok(vec![Token::new(0, word.len(), "definition", word)])
        }

        fn links_and_chars(&self, _: &str, _: TextRange) -> Result<Vec<Token>> {
            if let Some(delay) = self.slow_links {
                std::thread::sleep(delay);
            }
            Ok(vec![])
        }
    }

    fn dispatcher(
        provider: MockFeatureProvider,
    ) -> (Dispatcher<MockFeatureProvider>, Arc<MockFeatureProvider>) {
        let provider = Arc::new(provider);
        let dispatcher = Dispatcher::new(Arc::clone(&provider), DispatchConfig::default());
        (dispatcher, provider)
    }

    fn frame(value: Value) -> Vec<u8> {
        value.to_string().into_bytes()
    }

    fn open(id: u64, file: &str, contents: &str) -> Vec<u8> {
        frame(json!({"id": id, "type": "notification", "file": file, "contents": contents}))
    }

    fn close(id: u64, file: &str) -> Vec<u8> {
        frame(json!({"id": id, "type": "notification", "file": file, "remove": true}))
    }

    fn autocomplete(id: u64, file: &str, word: &str) -> Vec<u8> {
        frame(json!({
            "id": id, "type": "request", "command": "autocomplete",
            "file": file, "keywords": [], "current_word": word
        }))
    }

    fn highlight(id: u64, file: &str) -> Vec<u8> {
        frame(json!({
            "id": id, "type": "request", "command": "highlight",
            "file": file, "language": "python", "range": {"start": 0, "end": 3}
        }))
    }

    fn links(id: u64, file: &str) -> Vec<u8> {
        frame(json!({
            "id": id, "type": "request", "command": "links_and_chars",
            "file": file, "range": {"start": 0, "end": 3}
        }))
    }

    fn by_id(responses: &[Response], id: u64) -> &Response {
        let matching: Vec<_> = responses.iter().filter(|r| r.id == id).collect();
        assert_eq!(matching.len(), 1, "expected exactly one response for {id}");
        matching[0]
    }

    #[tokio::test]
    async fn newest_request_per_kind_wins() {
        let (mut dispatcher, provider) = dispatcher(MockFeatureProvider::default());
        dispatcher.run_pass([open(10, "a.py", "import os")]).await;

        let responses = dispatcher
            .run_pass([
                autocomplete(1, "a.py", "im"),
                autocomplete(2, "a.py", "imp"),
                highlight(3, "a.py"),
            ])
            .await;

        assert_eq!(responses.len(), 3);
        assert!(by_id(&responses, 1).cancelled);
        assert!(by_id(&responses, 1).result.is_none());

        let second = by_id(&responses, 2);
        assert!(!second.cancelled);
        assert_eq!(second.command, Some(CommandKind::Autocomplete));
        assert_eq!(second.result, Some(FeatureResult::Strings(vec!["imp!".into()])));

        let third = by_id(&responses, 3);
        assert!(!third.cancelled);
        assert_eq!(third.command, Some(CommandKind::Highlight));

        assert_eq!(provider.autocomplete_called.load(Ordering::SeqCst), 1);
        assert_eq!(provider.last_word.lock().unwrap().as_deref(), Some("imp"));
    }

    #[tokio::test]
    async fn many_superseded_requests_are_all_cancelled() {
        let (mut dispatcher, provider) = dispatcher(MockFeatureProvider::default());
        let mut batch = vec![open(1, "a.py", "x")];
        batch.extend((2..=20).map(|id| autocomplete(id, "a.py", "x")));

        let responses = dispatcher.run_pass(batch).await;

        assert_eq!(responses.len(), 20);
        for id in 2..20 {
            assert!(by_id(&responses, id).cancelled);
        }
        assert!(!by_id(&responses, 20).cancelled);
        assert_eq!(provider.autocomplete_called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn notifications_apply_before_requests_of_the_same_pass() {
        let (mut dispatcher, provider) = dispatcher(MockFeatureProvider::default());
        let responses = dispatcher
            .run_pass([
                autocomplete(1, "a.py", "w"),
                open(2, "a.py", "first"),
                open(3, "a.py", "second"),
            ])
            .await;

        assert!(!by_id(&responses, 1).cancelled);
        assert_eq!(provider.last_text.lock().unwrap().as_deref(), Some("second"));
        // acknowledgements come first, in drain order
        assert_eq!(responses[0], Response::acknowledged(2));
        assert_eq!(responses[1], Response::acknowledged(3));
    }

    #[tokio::test]
    async fn executed_requests_are_not_repeated_next_pass() {
        let (mut dispatcher, provider) = dispatcher(MockFeatureProvider::default());
        dispatcher
            .run_pass([open(1, "a.py", "x"), autocomplete(2, "a.py", "x")])
            .await;

        let responses = dispatcher.run_pass([open(3, "a.py", "y")]).await;

        assert_eq!(responses, vec![Response::acknowledged(3)]);
        assert_eq!(provider.autocomplete_called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn removing_unknown_file_then_requesting_it_is_cancelled() {
        let (mut dispatcher, provider) = dispatcher(MockFeatureProvider::default());
        let responses = dispatcher.run_pass([close(1, "a.py")]).await;
        assert_eq!(responses, vec![Response::acknowledged(1)]);

        let responses = dispatcher.run_pass([autocomplete(2, "a.py", "x")]).await;
        assert_eq!(responses, vec![Response::cancelled(2)]);
        assert_eq!(provider.autocomplete_called.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn removed_document_is_unknown() {
        let (mut dispatcher, _) = dispatcher(MockFeatureProvider::default());
        let responses = dispatcher
            .run_pass([
                open(1, "a.py", "X"),
                close(2, "a.py"),
                highlight(3, "a.py"),
            ])
            .await;
        assert!(by_id(&responses, 3).cancelled);
        assert!(!dispatcher.documents().contains("a.py"));
    }

    #[tokio::test]
    async fn failing_feature_only_cancels_its_command() {
        let (mut dispatcher, _) = dispatcher(MockFeatureProvider {
            fail_highlight: true,
            ..Default::default()
        });
        let responses = dispatcher
            .run_pass([
                open(1, "a.py", "abc"),
                highlight(2, "a.py"),
                autocomplete(3, "a.py", "a"),
            ])
            .await;

        assert!(by_id(&responses, 2).cancelled);
        assert!(!by_id(&responses, 3).cancelled);
    }

    #[tokio::test]
    async fn slow_feature_hits_deadline() {
        let provider = Arc::new(MockFeatureProvider {
            slow_links: Some(Duration::from_millis(300)),
            ..Default::default()
        });
        let mut dispatcher = Dispatcher::new(
            provider,
            DispatchConfig {
                feature_timeout: Some(Duration::from_millis(20)),
            },
        );
        let responses = dispatcher
            .run_pass([
                open(1, "a.py", "abc"),
                links(2, "a.py"),
                autocomplete(3, "a.py", "a"),
            ])
            .await;

        assert!(by_id(&responses, 2).cancelled);
        assert!(!by_id(&responses, 3).cancelled);
    }

    #[tokio::test]
    async fn editorconfig_does_not_need_an_open_document() {
        let (mut dispatcher, _) = dispatcher(MockFeatureProvider::default());
        let responses = dispatcher
            .run_pass([frame(json!({
                "id": 1, "type": "request", "command": "editorconfig",
                "file": "never-opened.py", "path": "/src/never-opened.py"
            }))])
            .await;

        let response = by_id(&responses, 1);
        assert!(!response.cancelled);
        assert_eq!(
            response.result,
            Some(FeatureResult::Config(BTreeMap::from([(
                "path".to_string(),
                "/src/never-opened.py".to_string()
            )])))
        );
    }

    #[tokio::test]
    async fn malformed_frames_are_cancelled_when_answerable() {
        let (mut dispatcher, _) = dispatcher(MockFeatureProvider::default());
        let responses = dispatcher
            .run_pass([
                frame(json!({"id": 1, "type": "request", "command": "rename", "file": "a"})),
                frame(json!({"id": 2, "type": "gossip"})),
                frame(json!({"type": "request"})),
                b"garbage".to_vec(),
            ])
            .await;

        assert_eq!(responses, vec![Response::cancelled(1), Response::cancelled(2)]);
    }

    #[tokio::test]
    async fn every_id_is_answered_exactly_once() {
        let (mut dispatcher, _) = dispatcher(MockFeatureProvider::default());
        let batch = vec![
            open(1, "a.py", "x"),
            autocomplete(2, "a.py", "x"),
            highlight(3, "a.py"),
            autocomplete(4, "a.py", "x"),
            links(5, "b.py"),
            open(6, "b.py", "y"),
            highlight(7, "a.py"),
            close(8, "a.py"),
        ];
        let responses = dispatcher.run_pass(batch).await;

        let mut ids: Vec<_> = responses.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
        // a.py was removed within the same pass, so its requests find no document
        assert!(by_id(&responses, 4).cancelled);
        assert!(by_id(&responses, 7).cancelled);
        assert!(!by_id(&responses, 5).cancelled);
    }

    #[tokio::test]
    async fn run_drains_queue_and_stops_when_closed() {
        let provider = Arc::new(MockFeatureProvider::default());
        let dispatcher = Dispatcher::new(Arc::clone(&provider), DispatchConfig::default());
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(16);

        inbound_tx.send(Bytes::from(open(1, "a.py", "abc"))).await.unwrap();
        inbound_tx.send(Bytes::from(autocomplete(2, "a.py", "a"))).await.unwrap();
        inbound_tx.send(Bytes::from(autocomplete(3, "a.py", "ab"))).await.unwrap();
        drop(inbound_tx);

        dispatcher.run(inbound_rx, outbound_tx).await;

        let mut responses = Vec::new();
        while let Some(response) = outbound_rx.recv().await {
            responses.push(response);
        }
        assert_eq!(responses.len(), 3);
        assert!(by_id(&responses, 2).cancelled);
        assert!(!by_id(&responses, 3).cancelled);
    }

    #[tokio::test]
    async fn acks_are_published_before_slow_commands_finish() {
        let provider = Arc::new(MockFeatureProvider {
            slow_links: Some(Duration::from_millis(500)),
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(
            provider,
            DispatchConfig {
                feature_timeout: Some(Duration::from_secs(5)),
            },
        );
        let (inbound_tx, inbound_rx) = mpsc::channel(16);
        let (outbound_tx, mut outbound_rx) = mpsc::channel(16);

        inbound_tx.send(Bytes::from(open(1, "a.py", "abc"))).await.unwrap();
        inbound_tx.send(Bytes::from(links(2, "a.py"))).await.unwrap();
        inbound_tx.send(Bytes::from(links(3, "a.py"))).await.unwrap();
        let task = tokio::spawn(dispatcher.run(inbound_rx, outbound_tx));

        let early = Duration::from_millis(250);
        let ack = timeout(early, outbound_rx.recv()).await.unwrap().unwrap();
        assert_eq!(ack, Response::acknowledged(1));
        let superseded = timeout(early, outbound_rx.recv()).await.unwrap().unwrap();
        assert_eq!(superseded, Response::cancelled(2));

        let result = outbound_rx.recv().await.unwrap();
        assert_eq!(result.id, 3);
        assert!(!result.cancelled);

        drop(inbound_tx);
        task.await.unwrap();
        assert!(outbound_rx.recv().await.is_none());
    }
}
