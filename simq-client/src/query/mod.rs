//! Query orchestration
//!
//! [`QueryService`] issues requests over the attached [`MessageChannel`], routes
//! inbound [`ApiMessage`]s into the current [`ResultsContainer`], drives the
//! periodic flush of pending re-ranks, and announces lifecycle changes on the
//! [`EventBus`].
//!
//! Session ids are assigned by the far end. A session becomes current when its
//! start acknowledgement arrives; fragments, end markers and errors carrying any
//! other id are stale and dropped.

mod channel;
mod retrievers;

pub use channel::{ChannelWatch, MessageChannel, SharedChannel};
pub use retrievers::RetrieverState;

use crate::fusion::{ScoreFunction, UnknownScoreFunction};
use crate::history::History;
use crate::results::{ResultsContainer, ResultsSnapshot, UpdateOutcome, ViewReceivers};
use chrono::Utc;
use simq_common::config::{Settings, DEFAULT_SCORE_FUNCTION};
use simq_common::events::{EventBus, QueryChange};
use simq_common::messages::{
    ApiMessage, MediaType, QueryConfig, QueryEnd, QueryError, QueryRequest, QueryStart,
    RetrieverQueryResult, StagedSimilarityQuery,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Period of the debounced flush
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(2500);

/// SOM size used until the caller sets one
pub const DEFAULT_SOM_SIZE: u32 = 16;

/// Number of SOM refinement iterations used until the caller sets one
pub const DEFAULT_SOM_DEEPNESS: u32 = 40;

/// Self-organising map parameters sent with SOM requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SomParameters {
    pub size: u32,
    pub deepness: u32,
}

impl Default for SomParameters {
    fn default() -> Self {
        Self {
            size: DEFAULT_SOM_SIZE,
            deepness: DEFAULT_SOM_DEEPNESS,
        }
    }
}

/// State guarded by the session lock
struct Session {
    settings: Settings,
    score_function: ScoreFunction,
    channel: SharedChannel,
    container: Option<ResultsContainer>,
    /// Query containers (stages) of the last issued similarity query
    container_count: usize,
    /// Overlapping in-flight requests for the current session
    running: u32,
    flush: Option<CancellationToken>,
    som: SomParameters,
}

impl Session {
    fn cancel_flush(&mut self) {
        if let Some(token) = self.flush.take() {
            token.cancel();
        }
    }

    /// Container of session `query_id`, if that session is current
    fn container_for(&mut self, query_id: &str) -> Option<&mut ResultsContainer> {
        match self.container.as_mut() {
            Some(container) if container.query_id() == query_id => Some(container),
            Some(container) => {
                debug!(
                    query_id = %query_id,
                    active = %container.query_id(),
                    "Dropping message for inactive session"
                );
                None
            }
            None => {
                debug!(query_id = %query_id, "Dropping message, no session");
                None
            }
        }
    }

    fn send(&self, request: QueryRequest) -> bool {
        let Some(channel) = self.channel.as_ref() else {
            debug!(request = request.message_type(), "No channel attached, request not sent");
            return false;
        };
        let message_type = request.message_type();
        match channel.send(request) {
            Ok(()) => {
                debug!(request = message_type, "Sent request");
                true
            }
            Err(e) => {
                warn!(request = message_type, error = %e, "Failed to send request");
                false
            }
        }
    }
}

fn score_function_from(settings: &Settings) -> ScoreFunction {
    let name = settings
        .score_function()
        .unwrap_or_else(|| DEFAULT_SCORE_FUNCTION.to_string());
    name.parse().unwrap_or_else(|e: UnknownScoreFunction| {
        warn!(error = %e, "Falling back to default score function");
        ScoreFunction::Temporal
    })
}

/// Client-side orchestrator for similarity queries
pub struct QueryService {
    session: Arc<Mutex<Session>>,
    events: EventBus,
    retrievers: watch::Sender<RetrieverState>,
    views: watch::Sender<Option<ViewReceivers>>,
    history: Option<Arc<dyn History>>,
    shutdown: CancellationToken,
}

impl QueryService {
    pub fn new(settings: Settings) -> Self {
        Self::with_event_bus(settings, EventBus::default())
    }

    pub fn with_event_bus(settings: Settings, events: EventBus) -> Self {
        let score_function = score_function_from(&settings);
        Self {
            session: Arc::new(Mutex::new(Session {
                settings,
                score_function,
                channel: None,
                container: None,
                container_count: 1,
                running: 0,
                flush: None,
                som: SomParameters::default(),
            })),
            events,
            retrievers: watch::channel(RetrieverState::default()).0,
            views: watch::channel(None).0,
            history: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Hand finished sessions with results to `history`
    pub fn with_history(mut self, history: Arc<dyn History>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<QueryChange> {
        self.events.subscribe()
    }

    /// View receivers of the current session; `None` while no session exists
    pub fn subscribe_views(&self) -> watch::Receiver<Option<ViewReceivers>> {
        self.views.subscribe()
    }

    pub fn subscribe_retrievers(&self) -> watch::Receiver<RetrieverState> {
        self.retrievers.subscribe()
    }

    pub fn retrievers(&self) -> RetrieverState {
        self.retrievers.borrow().clone()
    }

    pub async fn is_running(&self) -> bool {
        self.session.lock().await.running > 0
    }

    pub async fn running_count(&self) -> u32 {
        self.session.lock().await.running
    }

    /// Id of the current session
    pub async fn query_id(&self) -> Option<String> {
        let session = self.session.lock().await;
        session.container.as_ref().map(|c| c.query_id().to_string())
    }

    pub async fn score_function(&self) -> ScoreFunction {
        self.session.lock().await.score_function
    }

    pub async fn settings(&self) -> Settings {
        self.session.lock().await.settings.clone()
    }

    /// Run `f` against the current results, if any
    pub async fn with_results<R>(&self, f: impl FnOnce(&ResultsContainer) -> R) -> Option<R> {
        let session = self.session.lock().await;
        session.container.as_ref().map(f)
    }

    /// Snapshot of the current results
    pub async fn snapshot(&self) -> Option<ResultsSnapshot> {
        self.with_results(ResultsContainer::serialize).await
    }

    // ---- channel ----

    /// Attach an outbound channel and ask the far end for its retrievers
    pub async fn attach_channel(&self, channel: Arc<dyn MessageChannel>) {
        let mut session = self.session.lock().await;
        session.channel = Some(channel);
        info!("Query channel attached");
        session.send(QueryRequest::Retrievers);
    }

    pub async fn detach_channel(&self) {
        let mut session = self.session.lock().await;
        if session.channel.take().is_some() {
            info!("Query channel detached");
        }
    }

    pub async fn has_channel(&self) -> bool {
        self.session.lock().await.channel.is_some()
    }

    /// Follow a channel factory: every `Some` attaches, every `None` detaches
    ///
    /// Stops when the factory is dropped or the service shuts down.
    pub fn watch_channel(self: &Arc<Self>, mut factory: ChannelWatch) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let current = factory.borrow_and_update().clone();
                match current {
                    Some(channel) => service.attach_channel(channel).await,
                    None => service.detach_channel().await,
                }
                tokio::select! {
                    _ = service.shutdown.cancelled() => break,
                    changed = factory.changed() => {
                        if changed.is_err() {
                            debug!("Channel factory closed");
                            break;
                        }
                    }
                }
            }
        })
    }

    // ---- outbound ----

    /// Issue a staged similarity query; each entry is one query container
    ///
    /// The session starts when the far end acknowledges it.
    pub async fn find_similar(&self, queries: Vec<StagedSimilarityQuery>) -> bool {
        let mut session = self.session.lock().await;
        if session.channel.is_none() {
            debug!("Similarity query refused, no channel attached");
            return false;
        }
        if session.running > 0 {
            warn!(running = session.running, "Issuing similarity query while another is running");
        }
        let container_count = queries.len().max(1);
        let config = QueryConfig::with_hints(session.settings.query_hints());
        info!(containers = queries.len(), "Issuing similarity query");
        if !session.send(QueryRequest::Temporal { queries, config }) {
            return false;
        }
        session.container_count = container_count;
        true
    }

    /// Issue a More-Like-This query for a segment of the current results
    ///
    /// `categories` are added to the configured defaults for the segment's media
    /// type. When both are empty nothing is sent.
    pub async fn find_more_like_this(&self, segment_id: &str, categories: &[String]) -> bool {
        let session = self.session.lock().await;
        if session.running > 0 {
            warn!(segment_id, "More-Like-This refused, a query is running");
            return false;
        }
        if session.channel.is_none() {
            debug!(segment_id, "More-Like-This refused, no channel attached");
            return false;
        }
        let Some(container) = session.container.as_ref() else {
            warn!(segment_id, "More-Like-This refused, no results");
            return false;
        };
        let Some(object) = container.object_of_segment(segment_id) else {
            warn!(segment_id, "More-Like-This refused, unknown segment");
            return false;
        };
        let Some(mediatype) = object.mediatype else {
            warn!(segment_id, object_id = %object.object_id, "More-Like-This refused, media type unknown");
            return false;
        };

        let defaults = session.settings.mlt_categories(mediatype).unwrap_or_default();
        let mut union: Vec<String> = Vec::with_capacity(defaults.len() + categories.len());
        for category in defaults.iter().chain(categories) {
            if !union.contains(category) {
                union.push(category.clone());
            }
        }
        if union.is_empty() {
            debug!(segment_id, mediatype = %mediatype, "No More-Like-This categories, nothing sent");
            return true;
        }

        info!(segment_id, categories = union.len(), "Issuing More-Like-This query");
        session.send(QueryRequest::MoreLikeThis {
            segment_id: segment_id.to_string(),
            categories: union,
            config: QueryConfig::with_hints(session.settings.query_hints()),
        })
    }

    /// Ask for temporal neighbours of a segment; results merge into the current session
    pub async fn lookup_neighboring_segments(&self, segment_id: &str, count: Option<u32>) -> bool {
        let session = self.session.lock().await;
        let Some(query_id) = session.container.as_ref().map(|c| c.query_id().to_string()) else {
            debug!(segment_id, "Neighbour lookup refused, no session");
            return false;
        };
        session.send(QueryRequest::NeighboringSegments {
            segment_id: segment_id.to_string(),
            count,
            config: QueryConfig::for_session(query_id),
        })
    }

    /// Ask for a single segment; the result merges into the current session
    pub async fn lookup_segment(&self, segment_id: &str) -> bool {
        let session = self.session.lock().await;
        let Some(query_id) = session.container.as_ref().map(|c| c.query_id().to_string()) else {
            debug!(segment_id, "Segment lookup refused, no session");
            return false;
        };
        session.send(QueryRequest::Segment {
            segment_id: segment_id.to_string(),
            config: QueryConfig::for_session(query_id),
        })
    }

    pub async fn request_retrievers(&self) -> bool {
        self.session.lock().await.send(QueryRequest::Retrievers)
    }

    /// Select one of the offered retrievers for SOM requests
    pub fn select_retriever(&self, name: &str) -> bool {
        let mut selected = false;
        self.retrievers.send_if_modified(|state| {
            selected = state.select(name);
            selected
        });
        if !selected {
            warn!(retriever = name, "Retriever not offered");
        }
        selected
    }

    pub async fn set_som_parameters(&self, parameters: SomParameters) {
        self.session.lock().await.som = parameters;
    }

    pub async fn som_parameters(&self) -> SomParameters {
        self.session.lock().await.som
    }

    fn selected_retriever(&self) -> Option<String> {
        self.retrievers.borrow().selected.clone()
    }

    /// Train a self-organising map with the selected retriever
    pub async fn train_som(&self, size: u32) -> bool {
        let Some(retriever) = self.selected_retriever() else {
            warn!("SOM training refused, no retriever selected");
            return false;
        };
        let mut session = self.session.lock().await;
        session.som.size = size;
        session.send(QueryRequest::SomTrain { retriever, size })
    }

    /// Refine the map with relevance feedback
    pub async fn update_som(&self, positives: Vec<String>, negatives: Vec<String>) -> bool {
        let Some(retriever) = self.selected_retriever() else {
            warn!("SOM update refused, no retriever selected");
            return false;
        };
        let session = self.session.lock().await;
        // Map updates start a fresh result set, so no session binding
        session.send(QueryRequest::SomUpdate {
            size: session.som.size,
            retriever,
            deepness: session.som.deepness,
            positives,
            negatives,
            config: QueryConfig::default(),
        })
    }

    /// Replace the cluster view with the members of `cluster_ids`
    pub async fn get_som_clusters(&self, cluster_ids: Vec<String>) -> bool {
        let mut session = self.session.lock().await;
        if session.channel.is_none() {
            debug!("Cluster lookup refused, no channel attached");
            return false;
        }
        let Some(container) = session.container.as_mut() else {
            debug!("Cluster lookup refused, no session");
            return false;
        };
        container.clear_cluster_view();
        let config = QueryConfig::for_session(container.query_id());
        session.send(QueryRequest::SomCluster {
            cids: cluster_ids,
            config,
        })
    }

    // ---- inbound ----

    /// Process inbound messages in arrival order until the sender is dropped
    pub async fn run(&self, mut inbound: mpsc::Receiver<ApiMessage>) {
        info!("Query service inbound loop started");
        while let Some(message) = inbound.recv().await {
            self.dispatch(message).await;
        }
        info!("Query service inbound loop stopped");
    }

    /// Decode and dispatch one JSON message; undecodable messages are ignored
    pub async fn dispatch_json(&self, text: &str) -> bool {
        match ApiMessage::from_json(text) {
            Ok(message) => {
                self.dispatch(message).await;
                true
            }
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable message");
                false
            }
        }
    }

    /// Route one inbound message
    pub async fn dispatch(&self, message: ApiMessage) {
        trace!(
            message = message.message_type(),
            query_id = ?message.query_id(),
            "Dispatching message"
        );
        match message {
            ApiMessage::QueryStart(start) => self.on_start(start).await,
            ApiMessage::QueryEnd(end) => self.on_end(end).await,
            ApiMessage::QueryError(error) => self.on_error(error).await,
            ApiMessage::Retrievers(list) => self.on_retrievers(list),
            fragment => self.on_fragment(fragment).await,
        }
    }

    async fn on_start(&self, start: QueryStart) {
        let mut session = self.session.lock().await;
        let current = session
            .container
            .as_ref()
            .is_some_and(|c| c.query_id() == start.query_id);

        if !current {
            session.cancel_flush();
            if let Some(mut previous) = session.container.take() {
                previous.complete();
                debug!(query_id = %previous.query_id(), "Replaced previous session");
            }
            let fusion = session.score_function.build(session.container_count);
            let container =
                ResultsContainer::new(start.query_id.clone(), fusion, session.container_count);
            self.views.send_replace(container.subscribe());
            session.container = Some(container);
            info!(
                query_id = %start.query_id,
                containers = session.container_count,
                score_function = %session.score_function,
                "Session started"
            );
        }
        if session.flush.is_none() {
            session.flush = Some(self.spawn_flush_timer(start.query_id.clone()));
        }
        session.running += 1;
        drop(session);

        self.events.emit_lossy(QueryChange::Started {
            query_id: start.query_id,
            timestamp: Utc::now(),
        });
    }

    async fn on_end(&self, end: QueryEnd) {
        let mut session = self.session.lock().await;
        let Some(container) = session.container_for(&end.query_id) else {
            return;
        };
        container.do_update();
        let snapshot = (container.segment_count() > 0).then(|| container.serialize());
        session.running = session.running.saturating_sub(1);
        info!(
            query_id = %end.query_id,
            running = session.running,
            "Session ended"
        );
        drop(session);

        if let (Some(history), Some(snapshot)) = (&self.history, snapshot) {
            history.append(snapshot);
        }
        self.events.emit_lossy(QueryChange::Ended {
            query_id: end.query_id,
            timestamp: Utc::now(),
        });
    }

    async fn on_error(&self, error: QueryError) {
        let mut session = self.session.lock().await;
        if session.container_for(&error.query_id).is_none() {
            return;
        }
        session.cancel_flush();
        session.running = session.running.saturating_sub(1);
        warn!(
            query_id = %error.query_id,
            message = %error.message,
            "Session failed"
        );
        drop(session);

        self.events.emit_lossy(QueryChange::Error {
            query_id: error.query_id,
            message: error.message,
            timestamp: Utc::now(),
        });
    }

    fn on_retrievers(&self, list: RetrieverQueryResult) {
        debug!(count = list.content.len(), "Received retriever list");
        self.retrievers.send_modify(|state| state.update(list.content));
    }

    async fn on_fragment(&self, message: ApiMessage) {
        let mut session = self.session.lock().await;
        let Some(query_id) = message.query_id().map(str::to_string) else {
            return;
        };
        let Some(container) = session.container_for(&query_id) else {
            return;
        };
        let accepted = match &message {
            ApiMessage::Object(m) => container.process_object_message(m),
            ApiMessage::Segment(m) => container.process_segment_message(m),
            ApiMessage::Similarity(m) => container.process_similarity_message(m),
            ApiMessage::ObjectMetadata(m) => container.process_object_metadata_message(m),
            ApiMessage::SegmentMetadata(m) => container.process_segment_metadata_message(m),
            ApiMessage::QueryStart(_)
            | ApiMessage::QueryEnd(_)
            | ApiMessage::QueryError(_)
            | ApiMessage::Retrievers(_) => false,
        };
        drop(session);

        if accepted {
            self.events.emit_lossy(QueryChange::Updated {
                query_id,
                timestamp: Utc::now(),
            });
        }
    }

    /// Periodic debounced flush of the current session's container
    ///
    /// Stops on cancellation, on service shutdown, or once the session is no
    /// longer current.
    fn spawn_flush_timer(&self, query_id: String) -> CancellationToken {
        let token = self.shutdown.child_token();
        let cancelled = token.clone();
        let session = Arc::clone(&self.session);

        tokio::spawn(async move {
            let mut timer = interval(FLUSH_INTERVAL);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = timer.tick() => {
                        let mut session = session.lock().await;
                        let Some(container) = session
                            .container
                            .as_mut()
                            .filter(|c| c.query_id() == query_id)
                        else {
                            break;
                        };
                        let outcome = container.check_update();
                        if outcome != UpdateOutcome::Idle {
                            trace!(query_id = %query_id, outcome = ?outcome, "Flush tick");
                        }
                    }
                }
            }
            debug!(query_id = %query_id, "Flush timer stopped");
        });

        token
    }

    // ---- local control ----

    /// Perform pending work of the current results now
    pub async fn flush(&self) -> Option<UpdateOutcome> {
        let mut session = self.session.lock().await;
        session.container.as_mut().map(ResultsContainer::do_update)
    }

    /// Drop the current results; nothing is sent to the far end
    pub async fn clear(&self) {
        let mut session = self.session.lock().await;
        let ended = if session.running > 0 {
            session.running = 0;
            session.container.as_ref().map(|c| c.query_id().to_string())
        } else {
            None
        };
        session.cancel_flush();
        if let Some(mut container) = session.container.take() {
            container.complete();
            info!(query_id = %container.query_id(), "Session cleared");
        }
        self.views.send_replace(None);
        drop(session);

        if let Some(query_id) = ended {
            self.events.emit_lossy(QueryChange::Ended {
                query_id,
                timestamp: Utc::now(),
            });
        }
        self.events.emit_lossy(QueryChange::Clear {
            timestamp: Utc::now(),
        });
    }

    /// Replace the current results with a stored session
    ///
    /// Refused while a query is running.
    pub async fn load(&self, snapshot: &ResultsSnapshot) -> bool {
        let mut session = self.session.lock().await;
        if session.running > 0 {
            warn!(query_id = %snapshot.query_id, "Load refused, a query is running");
            return false;
        }
        session.cancel_flush();
        if let Some(mut previous) = session.container.take() {
            previous.complete();
        }

        session.container_count = snapshot.container_count.max(1);
        let fusion = session.score_function.build(session.container_count);
        let mut container = ResultsContainer::deserialize(snapshot, Arc::clone(&fusion));
        self.views.send_replace(container.subscribe());
        container.set_fusion(fusion);
        info!(
            query_id = %snapshot.query_id,
            segments = container.segment_count(),
            "Loaded session from snapshot"
        );
        session.container = Some(container);
        drop(session);

        self.events.emit_lossy(QueryChange::Started {
            query_id: snapshot.query_id.clone(),
            timestamp: Utc::now(),
        });
        self.events.emit_lossy(QueryChange::Ended {
            query_id: snapshot.query_id.clone(),
            timestamp: Utc::now(),
        });
        true
    }

    /// Swap the configuration; a changed score function re-ranks the current results
    pub async fn set_settings(&self, settings: Settings) {
        let score_function = score_function_from(&settings);
        let mut session = self.session.lock().await;
        session.settings = settings;
        if score_function != session.score_function {
            Self::apply_score_function(&mut session, score_function);
        }
    }

    /// Swap the score function by name
    pub async fn set_score_function(&self, name: &str) -> Result<(), UnknownScoreFunction> {
        let score_function: ScoreFunction = name.parse()?;
        let mut session = self.session.lock().await;
        Self::apply_score_function(&mut session, score_function);
        Ok(())
    }

    fn apply_score_function(session: &mut Session, score_function: ScoreFunction) {
        info!(
            from = %session.score_function,
            to = %score_function,
            "Score function changed"
        );
        session.score_function = score_function;
        let container_count = session.container_count;
        if let Some(container) = session.container.as_mut() {
            container.set_fusion(score_function.build(container_count));
        }
    }

    /// Show or hide results of a media type
    pub async fn toggle_mediatype(&self, mediatype: MediaType, visible: bool) -> bool {
        let mut session = self.session.lock().await;
        match session.container.as_mut() {
            Some(container) => container.toggle_mediatype(mediatype, visible),
            None => false,
        }
    }

    /// Adjust a feature category weight of the current results
    pub async fn set_category_weight(&self, category: &str, weight: f64) -> bool {
        let mut session = self.session.lock().await;
        match session.container.as_mut() {
            Some(container) => container.set_category_weight(category, weight),
            None => false,
        }
    }
}

impl Drop for QueryService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
