//! Agreement collaboration session
//!
//! `SessionEngine` is the transport-free aggregate of the three trackers
//! (clause consensus, message stream, signature gate) plus presence. It
//! applies typed channel notices and exposes snapshots; every mutation
//! goes through the REST backend first, replaces local state from the
//! returned snapshot, and only then produces the broadcast event for the
//! counterpart.
//!
//! `CollaborationSession` wires an engine to a live connector and backend
//! and owns the one background task that applies inbound notices. Both the
//! connector task and the apply task stop inside `close()` — nothing
//! outlives the session to fire callbacks into freed state.

pub mod consensus;
pub mod signing;
pub mod stream;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use bytes::Bytes;

use crate::api::{AgreementBackend, DocumentFormat, SignatureUpload};
use crate::auth::SessionContext;
use crate::channel::{
    ChannelNotice, ClientEvent, ConnectorConfig, ServerEvent, SessionConnector,
};
use crate::model::{
    Agreement, AgreementStatus, ChatMessage, ClauseDef, PartyRole, Preference, ResolutionStatus,
};
use crate::types::{ParleyError, Result};

pub use consensus::{ConsensusTally, ConsensusTracker};
pub use signing::{SignatureGate, SigningStage};
pub use stream::{MessageStream, TypingDebounce, TypingRoster, TypingSignal};

/// One clause as presented to observers, with its derived resolution
#[derive(Debug, Clone)]
pub struct ClauseView {
    pub id: String,
    pub name: String,
    pub category: String,
    pub required: bool,
    pub party_a_preference: Option<Preference>,
    pub party_b_preference: Option<Preference>,
    pub resolution: ResolutionStatus,
}

/// Cloneable view of the whole session for observers
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub agreement_id: String,
    pub title: String,
    pub status: AgreementStatus,
    pub local_role: PartyRole,
    pub connected: bool,
    /// Server-reported participant count; never computed locally
    pub online_count: u32,
    pub clauses: Vec<ClauseView>,
    pub all_clauses_accepted: bool,
    pub can_sign: bool,
    pub signing_stage: SigningStage,
    pub fully_signed: bool,
    pub messages: Vec<ChatMessage>,
    pub unread: u32,
    pub typing: Vec<String>,
}

/// Transport-free session state for one agreement and one local user
#[derive(Debug)]
pub struct SessionEngine {
    agreement_id: String,
    title: String,
    status: AgreementStatus,
    user_id: String,
    display_name: String,
    role: PartyRole,
    consensus: ConsensusTracker,
    stream: MessageStream,
    gate: SignatureGate,
    roster: TypingRoster,
    debounce: TypingDebounce,
    connected: bool,
    online_count: u32,
}

impl SessionEngine {
    /// Build an engine from a fetched agreement snapshot.
    ///
    /// Fails with a terminal `NotParticipant` if the user is neither
    /// Party A nor Party B — no session state is exposed at all.
    pub fn from_agreement(ctx: &SessionContext, agreement: Agreement) -> Result<Self> {
        let role = agreement.role_of(&ctx.user_id).ok_or_else(|| {
            ParleyError::NotParticipant(format!(
                "User {} is not a party to agreement {}",
                ctx.user_id, agreement.id
            ))
        })?;

        let mut gate = SignatureGate::new(role);
        if let Some(sig) = agreement.signature_of(role) {
            if let Some(reference) = sig.artifact.reference() {
                gate.attach_artifact(reference);
            }
            gate.record_signed(role, agreement.fully_signed());
        }
        if let Some(counterpart) = role.counterpart() {
            if agreement.signature_of(counterpart).is_some() {
                gate.record_signed(counterpart, agreement.fully_signed());
            }
        }

        let mut consensus = ConsensusTracker::new();
        consensus.replace_all(agreement.clauses.clone());
        if agreement.fully_signed() {
            consensus.lock();
        }

        Ok(Self {
            agreement_id: agreement.id,
            title: agreement.title,
            status: agreement.status,
            user_id: ctx.user_id.clone(),
            display_name: ctx.display_name.clone(),
            role,
            consensus,
            stream: MessageStream::new(),
            gate,
            roster: TypingRoster::new(),
            debounce: TypingDebounce::new(),
            connected: false,
            online_count: 0,
        })
    }

    pub fn role(&self) -> PartyRole {
        self.role
    }

    pub fn agreement_id(&self) -> &str {
        &self.agreement_id
    }

    /// Seed the message stream with fetched history.
    pub fn load_history(&mut self, history: Vec<ChatMessage>) {
        self.stream.load_history(history);
    }

    /// Replace agreement-level state from a server snapshot.
    fn replace_agreement(&mut self, agreement: Agreement) {
        self.title = agreement.title;
        self.status = agreement.status;
        self.consensus.replace_all(agreement.clauses);
        let fully = agreement.party_a_signature.is_some() && agreement.party_b_signature.is_some();
        if fully {
            self.consensus.lock();
            self.status = AgreementStatus::Signed;
        }
    }

    /// Apply one channel notice in arrival order.
    pub fn apply_notice(&mut self, notice: &ChannelNotice, now: Instant) {
        match notice {
            ChannelNotice::Connected => self.connected = true,
            ChannelNotice::Disconnected { reason } => {
                debug!(reason = %reason, "Session marked disconnected");
                self.connected = false;
            }
            ChannelNotice::Event(event) => self.apply_event(event, now),
        }
    }

    /// Apply one validated server event.
    pub fn apply_event(&mut self, event: &ServerEvent, now: Instant) {
        match event {
            ServerEvent::UserJoined { online_count, .. }
            | ServerEvent::UserLeft { online_count, .. } => {
                self.online_count = *online_count;
            }
            ServerEvent::Message { message } => {
                self.stream.receive(message.clone(), &self.user_id);
            }
            ServerEvent::ClauseUpdated {
                clause_id,
                party,
                value,
                ..
            } => {
                self.consensus.apply_remote_update(clause_id, *party, *value);
            }
            ServerEvent::AgreementStatusChanged { status, .. } => {
                self.status = *status;
                if *status == AgreementStatus::Signed {
                    self.consensus.lock();
                }
            }
            ServerEvent::UserTyping {
                user_id,
                display_name,
                ..
            } => {
                if user_id != &self.user_id {
                    self.roster.note_typing(user_id, display_name, now);
                }
            }
            ServerEvent::UserStoppedTyping { user_id, .. } => {
                self.roster.note_stopped(user_id);
            }
            ServerEvent::AgreementSigned {
                party,
                fully_signed,
                ..
            } => {
                self.gate.record_signed(*party, *fully_signed);
                if *fully_signed {
                    self.status = AgreementStatus::Signed;
                    self.consensus.lock();
                }
            }
            ServerEvent::CustomClauseAdded { clause, .. } => {
                // Our own echo arrives after the snapshot already holds the
                // clause; the duplicate append is refused and that is fine.
                if let Err(e) = self.consensus.append_custom(clause.clone()) {
                    debug!(error = %e, "Custom clause broadcast not applied");
                }
            }
        }
    }

    /// Stage and durably send a chat message. On success the confirmed
    /// entry replaces the optimistic one and the broadcast for the
    /// counterpart is returned; on failure the entry is marked failed and
    /// the error propagates.
    pub async fn send_message(
        &mut self,
        backend: &dyn AgreementBackend,
        body: &str,
    ) -> Result<ClientEvent> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ParleyError::BadRequest("Message body is empty".into()));
        }

        let staged = ChatMessage::outgoing(
            &self.agreement_id,
            &self.user_id,
            &self.display_name,
            self.role,
            body,
        );
        let client_key = staged.client_key;
        self.stream.stage(staged.clone());

        match backend.create_message(&staged).await {
            Ok(confirmed) => {
                self.stream.confirm(confirmed.clone());
                Ok(ClientEvent::SendMessage { message: confirmed })
            }
            Err(e) => {
                self.stream.mark_failed(client_key);
                Err(e)
            }
        }
    }

    /// Durably set our own stance on a clause. Only `acceptable` and
    /// `unacceptable` may be emitted; the counterpart's field is never
    /// written from here.
    pub async fn set_preference(
        &mut self,
        backend: &dyn AgreementBackend,
        clause_id: &str,
        value: Preference,
    ) -> Result<ClientEvent> {
        if !matches!(value, Preference::Acceptable | Preference::Unacceptable) {
            return Err(ParleyError::BadRequest(format!(
                "Stance must be acceptable or unacceptable, got {value:?}"
            )));
        }
        if self.consensus.is_locked() {
            return Err(ParleyError::Precondition(
                "Agreement is fully signed; clauses can no longer change".into(),
            ));
        }
        if self.consensus.get(clause_id).is_none() {
            return Err(ParleyError::BadRequest(format!(
                "Unknown clause: {clause_id}"
            )));
        }

        // No optimistic write: prior state stays until the backend confirms.
        let snapshot = backend
            .update_clause_preference(&self.agreement_id, clause_id, self.role, value)
            .await?;
        self.replace_agreement(snapshot);

        Ok(ClientEvent::UpdateClause {
            agreement_id: self.agreement_id.clone(),
            clause_id: clause_id.to_string(),
            party: self.role,
            value,
        })
    }

    /// Durably append a custom clause.
    pub async fn add_custom_clause(
        &mut self,
        backend: &dyn AgreementBackend,
        clause: ClauseDef,
    ) -> Result<ClientEvent> {
        if self.consensus.is_locked() {
            return Err(ParleyError::Precondition(
                "Agreement is fully signed; clauses can no longer change".into(),
            ));
        }
        let snapshot = backend.add_custom_clause(&self.agreement_id, &clause).await?;
        self.replace_agreement(snapshot);

        Ok(ClientEvent::CustomClauseAdded {
            agreement_id: self.agreement_id.clone(),
            clause,
        })
    }

    /// Upload a signature artifact and attach its reference to the gate.
    pub async fn upload_signature(
        &mut self,
        backend: &dyn AgreementBackend,
        upload: &SignatureUpload,
    ) -> Result<String> {
        let stored = backend.upload_signature(upload).await?;
        self.gate.attach_artifact(&stored.reference);
        Ok(stored.reference)
    }

    /// Reuse a signature reference cached from an earlier agreement.
    pub fn attach_cached_signature(&mut self, reference: &str) {
        self.gate.attach_artifact(reference);
    }

    /// Durably sign the agreement. Preconditions are checked here and
    /// re-verified by the backend.
    pub async fn sign(&mut self, backend: &dyn AgreementBackend) -> Result<ClientEvent> {
        let all_accepted = self.consensus.all_mutually_accepted();
        let reference = self.gate.check_preconditions(all_accepted)?.to_string();

        let snapshot = backend.sign(&self.agreement_id, self.role, &reference).await?;
        let fully = snapshot.fully_signed();
        self.replace_agreement(snapshot);
        self.gate.record_signed(self.role, fully);

        Ok(ClientEvent::AgreementSigned {
            agreement_id: self.agreement_id.clone(),
            party: self.role,
            fully_signed: fully,
        })
    }

    /// Record a local keystroke; returns the typing-start broadcast when
    /// transitioning out of idle. Also clears the unread counter.
    pub fn on_keystroke(&mut self, now: Instant) -> Option<ClientEvent> {
        self.stream.note_local_typing();
        self.debounce.on_keystroke(now).map(|_| ClientEvent::TypingStart {
            agreement_id: self.agreement_id.clone(),
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
        })
    }

    /// Poll the typing debounce; returns the typing-stop broadcast once
    /// the idle window has elapsed.
    pub fn poll_typing_idle(&mut self, now: Instant) -> Option<ClientEvent> {
        self.debounce.poll_idle(now).map(|_| ClientEvent::TypingStop {
            agreement_id: self.agreement_id.clone(),
            user_id: self.user_id.clone(),
        })
    }

    pub fn open_panel(&mut self) {
        self.stream.open_panel();
    }

    pub fn close_panel(&mut self) {
        self.stream.close_panel();
    }

    /// Current derived view of the whole session.
    pub fn snapshot(&self) -> SessionSnapshot {
        let all_accepted = self.consensus.all_mutually_accepted();
        SessionSnapshot {
            agreement_id: self.agreement_id.clone(),
            title: self.title.clone(),
            status: self.status,
            local_role: self.role,
            connected: self.connected,
            online_count: self.online_count,
            clauses: self
                .consensus
                .clauses()
                .iter()
                .map(|entry| ClauseView {
                    id: entry.id.clone(),
                    name: entry.clause.name.clone(),
                    category: entry.clause.category.clone(),
                    required: entry.clause.required,
                    party_a_preference: entry.party_a_preference,
                    party_b_preference: entry.party_b_preference,
                    resolution: entry.resolution(),
                })
                .collect(),
            all_clauses_accepted: all_accepted,
            can_sign: self.gate.can_sign(all_accepted),
            signing_stage: self.gate.stage(),
            fully_signed: self.gate.both_signed(),
            messages: self.stream.messages().to_vec(),
            unread: self.stream.unread(),
            typing: self.roster.who_is_typing(Instant::now()),
        }
    }
}

/// A live collaboration session: engine + backend + channel
pub struct CollaborationSession {
    engine: Arc<RwLock<SessionEngine>>,
    backend: Arc<dyn AgreementBackend>,
    connector: SessionConnector,
    snapshots: watch::Sender<SessionSnapshot>,
    apply_task: JoinHandle<()>,
}

impl CollaborationSession {
    /// Fetch the agreement and history, authorize the user, open the
    /// channel and start applying inbound notices.
    pub async fn open(
        ctx: &SessionContext,
        backend: Arc<dyn AgreementBackend>,
        channel_url: &str,
        agreement_id: &str,
    ) -> Result<Self> {
        let config = ConnectorConfig::new(
            channel_url,
            ctx.token.as_str(),
            agreement_id,
            ctx.user_id.as_str(),
            ctx.display_name.as_str(),
        );
        Self::open_with(ctx, backend, config).await
    }

    /// Like [`open`](Self::open) with explicit channel tuning (timeouts,
    /// reconnect policy).
    pub async fn open_with(
        ctx: &SessionContext,
        backend: Arc<dyn AgreementBackend>,
        config: ConnectorConfig,
    ) -> Result<Self> {
        let agreement_id = config.agreement_id.clone();
        let agreement = backend.fetch_agreement(&agreement_id).await?;
        let mut engine = SessionEngine::from_agreement(ctx, agreement)?;

        let history = backend.fetch_messages(&agreement_id).await?;
        engine.load_history(history);

        if let Some(reference) = &ctx.cached_signature {
            engine.attach_cached_signature(reference);
        }

        info!(
            agreement_id = %agreement_id,
            role = %engine.role(),
            "Opening collaboration session"
        );

        let connector = SessionConnector::open(config);

        let (snapshot_tx, _) = watch::channel(engine.snapshot());
        let engine = Arc::new(RwLock::new(engine));

        let apply_task = tokio::spawn(notice_loop(
            engine.clone(),
            connector.notices(),
            snapshot_tx.clone(),
        ));

        Ok(Self {
            engine,
            backend,
            connector,
            snapshots: snapshot_tx,
            apply_task,
        })
    }

    /// Watch derived session snapshots. The receiver always holds the
    /// latest view.
    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    /// Current view of the session.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.engine.read().await.snapshot()
    }

    pub fn is_online(&self) -> bool {
        self.connector.is_online()
    }

    async fn publish(&self) {
        let snapshot = self.engine.read().await.snapshot();
        let _ = self.snapshots.send(snapshot);
    }

    /// Broadcast an event over the channel, best-effort. The durable write
    /// already happened; a dead channel only delays the counterpart until
    /// their next refresh.
    async fn broadcast(&self, event: ClientEvent) {
        if let Err(e) = self.connector.send(event).await {
            warn!(error = %e, "Broadcast skipped");
        }
    }

    /// Send a chat message (optimistic append + durable write + broadcast).
    pub async fn send_chat(&self, body: &str) -> Result<()> {
        let result = {
            let mut engine = self.engine.write().await;
            engine.send_message(self.backend.as_ref(), body).await
        };
        self.publish().await;
        self.broadcast(result?).await;
        Ok(())
    }

    /// Set our stance on a clause and propagate it.
    pub async fn set_preference(&self, clause_id: &str, value: Preference) -> Result<()> {
        let event = {
            let mut engine = self.engine.write().await;
            engine
                .set_preference(self.backend.as_ref(), clause_id, value)
                .await
        };
        self.publish().await;
        self.broadcast(event?).await;
        Ok(())
    }

    /// Append a custom clause and propagate it.
    pub async fn add_custom_clause(&self, clause: ClauseDef) -> Result<()> {
        let event = {
            let mut engine = self.engine.write().await;
            engine.add_custom_clause(self.backend.as_ref(), clause).await
        };
        self.publish().await;
        self.broadcast(event?).await;
        Ok(())
    }

    /// Upload a signature artifact; returns the reusable reference so the
    /// caller can cache it on the session context.
    pub async fn upload_signature(&self, upload: &SignatureUpload) -> Result<String> {
        let reference = {
            let mut engine = self.engine.write().await;
            engine.upload_signature(self.backend.as_ref(), upload).await
        };
        self.publish().await;
        reference
    }

    /// Sign the agreement and announce it.
    pub async fn sign(&self) -> Result<()> {
        let event = {
            let mut engine = self.engine.write().await;
            engine.sign(self.backend.as_ref()).await
        };
        self.publish().await;
        self.broadcast(event?).await;
        Ok(())
    }

    /// Record a local keystroke, emitting typing-start when needed.
    pub async fn keystroke(&self) {
        let event = {
            let mut engine = self.engine.write().await;
            engine.on_keystroke(Instant::now())
        };
        if let Some(event) = event {
            self.broadcast(event).await;
        }
    }

    /// Drive the typing-stop debounce. Call periodically while composing.
    pub async fn poll_typing(&self) {
        let event = {
            let mut engine = self.engine.write().await;
            engine.poll_typing_idle(Instant::now())
        };
        if let Some(event) = event {
            self.broadcast(event).await;
        }
    }

    /// Download the generated agreement document as opaque bytes.
    pub async fn download_document(&self, format: DocumentFormat) -> Result<Bytes> {
        let agreement_id = self.engine.read().await.agreement_id().to_string();
        self.backend.download_document(&agreement_id, format).await
    }

    pub async fn open_panel(&self) {
        self.engine.write().await.open_panel();
        self.publish().await;
    }

    pub async fn close_panel(&self) {
        self.engine.write().await.close_panel();
        self.publish().await;
    }

    /// Announce leave and stop both background tasks. After this returns,
    /// no task of this session is left running.
    pub async fn close(self) {
        self.connector.close().await;
        if let Err(e) = self.apply_task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Apply task ended abnormally");
            }
        }
    }
}

/// Apply inbound notices to the engine in arrival order and publish the
/// resulting snapshots. Ends when the connector's notice fan-out closes.
async fn notice_loop(
    engine: Arc<RwLock<SessionEngine>>,
    mut notices: broadcast::Receiver<ChannelNotice>,
    snapshots: watch::Sender<SessionSnapshot>,
) {
    loop {
        match notices.recv().await {
            Ok(notice) => {
                let mut engine = engine.write().await;
                engine.apply_notice(&notice, Instant::now());
                let _ = snapshots.send(engine.snapshot());
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Notice stream lagged; snapshots may be momentarily stale");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Notice apply task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SignatureRef;
    use crate::model::{ClauseEntry, Participant};
    use async_trait::async_trait;

    /// Backend that refuses every durable write, for failure-path tests.
    struct DownBackend;

    #[async_trait]
    impl AgreementBackend for DownBackend {
        async fn fetch_agreement(&self, _id: &str) -> Result<Agreement> {
            Err(ParleyError::Backend("backend down".into()))
        }
        async fn fetch_messages(&self, _id: &str) -> Result<Vec<ChatMessage>> {
            Err(ParleyError::Backend("backend down".into()))
        }
        async fn create_message(&self, _message: &ChatMessage) -> Result<ChatMessage> {
            Err(ParleyError::Backend("backend down".into()))
        }
        async fn update_clause_preference(
            &self,
            _id: &str,
            _clause_id: &str,
            _party: PartyRole,
            _value: Preference,
        ) -> Result<Agreement> {
            Err(ParleyError::Backend("backend down".into()))
        }
        async fn add_custom_clause(&self, _id: &str, _clause: &ClauseDef) -> Result<Agreement> {
            Err(ParleyError::Backend("backend down".into()))
        }
        async fn upload_signature(&self, _upload: &SignatureUpload) -> Result<SignatureRef> {
            Err(ParleyError::Backend("backend down".into()))
        }
        async fn sign(
            &self,
            _id: &str,
            _party: PartyRole,
            _reference: &str,
        ) -> Result<Agreement> {
            Err(ParleyError::Backend("backend down".into()))
        }
        async fn download_document(
            &self,
            _id: &str,
            _format: DocumentFormat,
        ) -> Result<Bytes> {
            Err(ParleyError::Backend("backend down".into()))
        }
    }

    fn fixture() -> Agreement {
        Agreement {
            id: "agr-1".into(),
            title: "Mutual NDA".into(),
            status: AgreementStatus::InProgress,
            party_a: Participant {
                user_id: "u-a".into(),
                display_name: "Alice".into(),
                email: None,
            },
            party_b: Some(Participant {
                user_id: "u-b".into(),
                display_name: "Bob".into(),
                email: None,
            }),
            party_b_email: None,
            clauses: vec![ClauseEntry::new(ClauseDef {
                id: "cl-1".into(),
                name: "Confidentiality".into(),
                description: "terms".into(),
                category: "general".into(),
                required: true,
            })],
            party_a_signature: None,
            party_b_signature: None,
        }
    }

    fn engine() -> SessionEngine {
        let ctx = SessionContext::new("u-a", "Alice", "tok");
        SessionEngine::from_agreement(&ctx, fixture()).unwrap()
    }

    #[test]
    fn test_empty_message_never_reaches_backend() {
        let mut engine = engine();
        let err = tokio_test::block_on(engine.send_message(&DownBackend, "   ")).unwrap_err();
        assert!(matches!(err, ParleyError::BadRequest(_)));
        assert!(engine.snapshot().messages.is_empty());
    }

    #[test]
    fn test_failed_send_is_kept_and_marked() {
        let mut engine = engine();
        let err = tokio_test::block_on(engine.send_message(&DownBackend, "hello")).unwrap_err();
        assert!(matches!(err, ParleyError::Backend(_)));

        let snap = engine.snapshot();
        assert_eq!(snap.messages.len(), 1);
        assert_eq!(
            snap.messages[0].delivery,
            crate::model::DeliveryState::Failed
        );
    }

    #[test]
    fn test_failed_preference_update_leaves_state_unchanged() {
        let mut engine = engine();
        let before = engine.snapshot();

        let err = tokio_test::block_on(engine.set_preference(
            &DownBackend,
            "cl-1",
            Preference::Acceptable,
        ))
        .unwrap_err();
        assert!(matches!(err, ParleyError::Backend(_)));

        // No partial or optimistic stance was applied
        let after = engine.snapshot();
        assert_eq!(
            after.clauses[0].party_a_preference,
            before.clauses[0].party_a_preference
        );
        assert_eq!(after.clauses[0].resolution, before.clauses[0].resolution);
    }

    #[test]
    fn test_only_emit_side_values_accepted() {
        let mut engine = engine();
        for value in [Preference::Preferred, Preference::Other] {
            let err = tokio_test::block_on(engine.set_preference(&DownBackend, "cl-1", value))
                .unwrap_err();
            assert!(matches!(err, ParleyError::BadRequest(_)));
        }
    }

    #[test]
    fn test_sign_checks_preconditions_before_backend() {
        let mut engine = engine();
        // No artifact, no consensus: the precondition error names the
        // artifact first, and the down backend is never consulted.
        let err = tokio_test::block_on(engine.sign(&DownBackend)).unwrap_err();
        assert!(matches!(err, ParleyError::Precondition(_)));
    }
}
