//! Classic device shadow over an MQTT [`Session`].
//!
//! The shadow service answers requests published to a thing's reserved `get`
//! and `update` topics on matching `accepted` / `rejected` topics. Replies
//! carry no request identifier, so each kind of request can only have one
//! exchange in flight, and replies are matched by topic alone.
//!
//! A request subscribes to its reply topics once per connection, publishes,
//! then runs the response pump until a reply arrives or
//! [`Options::shadow_timeout_ms`](crate::network::application::mqtt::Options)
//! elapses. The exchange is reset to idle afterwards whatever the outcome, so
//! a reply that turns up after a timeout finds nothing waiting for it and is
//! dropped.
//!
//! ```rust,no_run
//! # use libshadow::network::application::mqtt::Session;
//! # use libshadow::network::application::shadow::Shadow;
//! # fn run<C, K, H, T>(session: Session<C, K, H>, network: &mut T, credentials: &libshadow::network::tls::Credentials<'_>) -> Result<(), libshadow::Error>
//! # where
//! #     C: libshadow::network::Connection,
//! #     K: libshadow::time::Clock,
//! #     H: libshadow::network::application::mqtt::Notify,
//! #     T: libshadow::network::TlsConnect<Connection = C>,
//! # {
//! let mut shadow = Shadow::new(session);
//! shadow.connect(network, credentials, "example-ats.iot.eu-west-1.amazonaws.com", "pump-7")?;
//!
//! shadow.get_shadow_document()?;
//! let target = shadow.shadow_desired_value("temp")?;
//! # let _ = target;
//! shadow.publish_shadow_reported_value("temp", 72)?;
//! # Ok(())
//! # }
//! ```

/// Single-key document helpers.
pub mod document;

/// Reserved topic names.
pub mod topic;

pub use document::{Rejection, ReportedValue, SHADOW_UPDATE_MAX_SIZE};
pub use topic::{SHADOW_TOPIC_MAX_LENGTH, ShadowTopic};

use crate::error::{Error, ProtocolError};
use crate::network::application::mqtt::{
    AckStatus, Intercept, MAX_CLIENT_ID_LEN, MQTT_BUFFER_SIZE, Notify, QoS, Session,
};
use crate::network::tls::{Credentials, TlsConnect};
use crate::network::Connection;
use crate::time::Clock;
use heapless::String;

/// Capacity of the stored get response.
pub const SHADOW_GET_RESPONSE_MAX_SIZE: usize = 256;

/// The two request kinds.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExchangeKind {
    /// `get` request.
    Get,
    /// `update` request.
    Update,
}

impl ExchangeKind {
    fn request(self) -> ShadowTopic {
        match self {
            ExchangeKind::Get => ShadowTopic::Get,
            ExchangeKind::Update => ShadowTopic::Update,
        }
    }

    fn accepted(self) -> ShadowTopic {
        match self {
            ExchangeKind::Get => ShadowTopic::GetAccepted,
            ExchangeKind::Update => ShadowTopic::UpdateAccepted,
        }
    }

    fn rejected(self) -> ShadowTopic {
        match self {
            ExchangeKind::Get => ShadowTopic::GetRejected,
            ExchangeKind::Update => ShadowTopic::UpdateRejected,
        }
    }
}

/// Where an exchange is in its lifecycle.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum ExchangeState {
    /// Nothing outstanding.
    #[default]
    Idle,
    /// Request published, reply not yet seen.
    Awaiting,
    /// Accepted reply received (and stored, for get).
    Accepted,
    /// Rejected reply received.
    Rejected,
    /// Reply too large for the response or packet buffer.
    Overflow,
    /// Accepted get reply that is not UTF-8.
    Malformed,
}

/// Reply bookkeeping, also the interceptor that feeds it.
#[derive(Debug, Default)]
struct ShadowState {
    thing_name: String<MAX_CLIENT_ID_LEN>,
    get: ExchangeState,
    update: ExchangeState,
    get_subscribed: bool,
    update_subscribed: bool,
    document: Option<String<SHADOW_GET_RESPONSE_MAX_SIZE>>,
    last_rejection: Option<Rejection>,
    /// [`Session::connections`] the flags above belong to.
    connection: u32,
}

impl ShadowState {
    fn state(&self, kind: ExchangeKind) -> ExchangeState {
        match kind {
            ExchangeKind::Get => self.get,
            ExchangeKind::Update => self.update,
        }
    }

    fn set(&mut self, kind: ExchangeKind, state: ExchangeState) {
        match kind {
            ExchangeKind::Get => self.get = state,
            ExchangeKind::Update => self.update = state,
        }
    }

    fn subscribed(&self, kind: ExchangeKind) -> bool {
        match kind {
            ExchangeKind::Get => self.get_subscribed,
            ExchangeKind::Update => self.update_subscribed,
        }
    }

    fn set_subscribed(&mut self, kind: ExchangeKind) {
        match kind {
            ExchangeKind::Get => self.get_subscribed = true,
            ExchangeKind::Update => self.update_subscribed = true,
        }
    }

    /// Forgets per-connection state. The stored document survives.
    fn reset_connection(&mut self) {
        self.get = ExchangeState::Idle;
        self.update = ExchangeState::Idle;
        self.get_subscribed = false;
        self.update_subscribed = false;
    }

    fn on_accepted(&mut self, kind: ExchangeKind, payload: &[u8]) {
        if self.state(kind) != ExchangeState::Awaiting {
            debug!("stale {} reply dropped", kind.accepted().suffix());
            return;
        }

        let state = match kind {
            ExchangeKind::Update => ExchangeState::Accepted,
            ExchangeKind::Get => match core::str::from_utf8(payload) {
                Err(_) => ExchangeState::Malformed,
                Ok(text) => match String::try_from(text) {
                    Ok(document) => {
                        self.document = Some(document);
                        ExchangeState::Accepted
                    }
                    Err(_) => {
                        warn!(
                            "shadow document of {} bytes exceeds {}",
                            payload.len(),
                            SHADOW_GET_RESPONSE_MAX_SIZE
                        );
                        ExchangeState::Overflow
                    }
                },
            },
        };
        info!("{} ({} bytes)", kind.accepted().suffix(), payload.len());
        self.set(kind, state);
    }

    fn on_rejected(&mut self, kind: ExchangeKind, payload: &[u8]) {
        if self.state(kind) != ExchangeState::Awaiting {
            debug!("stale {} reply dropped", kind.rejected().suffix());
            return;
        }

        let rejection = Rejection::parse(payload);
        warn!("{}: code {}", kind.rejected().suffix(), rejection.code);
        self.last_rejection = Some(rejection);
        self.set(kind, ExchangeState::Rejected);
    }
}

impl Intercept for ShadowState {
    fn intercept(&mut self, topic: &str, payload: &[u8]) -> bool {
        let Some((kind, thing_name)) = ShadowTopic::parse(topic) else {
            return false;
        };
        if thing_name != self.thing_name.as_str() {
            return false;
        }

        match kind {
            ShadowTopic::GetAccepted => self.on_accepted(ExchangeKind::Get, payload),
            ShadowTopic::GetRejected => self.on_rejected(ExchangeKind::Get, payload),
            ShadowTopic::UpdateAccepted => self.on_accepted(ExchangeKind::Update, payload),
            ShadowTopic::UpdateRejected => self.on_rejected(ExchangeKind::Update, payload),
            // delta and documents belong to the application
            _ => return false,
        }
        true
    }
}

/// Shadow protocol engine wrapping a session.
pub struct Shadow<C, K, H, const N: usize = MQTT_BUFFER_SIZE>
where
    C: Connection,
    K: Clock,
    H: Notify,
{
    session: Session<C, K, H, N>,
    state: ShadowState,
}

impl<C, K, H, const N: usize> Shadow<C, K, H, N>
where
    C: Connection,
    K: Clock,
    H: Notify,
{
    /// Wraps an initialized session.
    pub fn new(session: Session<C, K, H, N>) -> Self {
        Self {
            session,
            state: ShadowState::default(),
        }
    }

    /// Connects the underlying session. See [`Session::connect`].
    ///
    /// Reply subscriptions are made again lazily on the first request after
    /// each connect.
    pub fn connect<T>(
        &mut self,
        network: &mut T,
        credentials: &Credentials<'_>,
        hostname: &str,
        client_id: &str,
    ) -> Result<(), Error>
    where
        T: TlsConnect<Connection = C>,
    {
        self.state.reset_connection();
        self.session.connect(network, credentials, hostname, client_id)?;
        self.sync_connection()
    }

    /// Disconnects the underlying session. See [`Session::disconnect`].
    pub fn disconnect(&mut self) -> Result<(), Error> {
        self.state.reset_connection();
        self.session.disconnect()
    }

    /// Whether the underlying session is connected.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Runs the response pump, routing this thing's shadow replies to the
    /// engine and everything else to the session's handler.
    pub fn process_responses(&mut self) -> Result<(), Error> {
        self.sync_connection()?;
        self.session.process_responses_with(&mut self.state)
    }

    /// The wrapped session.
    pub fn session(&self) -> &Session<C, K, H, N> {
        &self.session
    }

    /// The wrapped session, for raw subscribe/publish.
    ///
    /// Messages received by calling the session's own pump bypass the shadow
    /// engine; use [`Shadow::process_responses`] instead. A reconnect made
    /// through the session is picked up on the next shadow call.
    pub fn session_mut(&mut self) -> &mut Session<C, K, H, N> {
        &mut self.session
    }

    /// Unwraps the session.
    pub fn into_session(self) -> Session<C, K, H, N> {
        self.session
    }

    /// Fetches the thing's shadow document and stores it.
    ///
    /// # Errors
    ///
    /// * [`Error::Timeout`] - no reply within the shadow timeout
    /// * [`Error::BufferTooSmall`] - topic or document too large; a previously
    ///   stored document is left as it was
    /// * [`ProtocolError::Rejected`] - the service refused; see
    ///   [`Shadow::last_rejection`]
    /// * [`ProtocolError::SubscribeRejected`] - the broker refused a reply topic
    /// * [`ProtocolError::MalformedPacket`] - the document is not UTF-8
    pub fn get_shadow_document(&mut self) -> Result<(), Error> {
        self.exchange(ExchangeKind::Get, b"")
    }

    /// Publishes `document` to the update topic and waits for the verdict.
    ///
    /// Fails like [`Shadow::get_shadow_document`].
    pub fn update_shadow_document(&mut self, document: &str) -> Result<(), Error> {
        self.exchange(ExchangeKind::Update, document.as_bytes())
    }

    /// Reports a single value as `{"state":{"reported":{"<key>":<value>}}}`.
    ///
    /// Strings are quoted, numbers and booleans are not. Nothing is escaped.
    pub fn publish_shadow_reported_value<'v>(
        &mut self,
        key: &str,
        value: impl Into<ReportedValue<'v>>,
    ) -> Result<(), Error> {
        let document = document::reported_document(key, value.into())?;
        self.update_shadow_document(&document)
    }

    /// Looks up `key` in the `desired` section of the last stored document.
    ///
    /// Fails with [`Error::NotFound`] if the key is absent or no document has
    /// been retrieved yet.
    pub fn shadow_desired_value(&self, key: &str) -> Result<&str, Error> {
        let document = self.state.document.as_deref().ok_or(Error::NotFound)?;
        document::desired_value(document, key)
    }

    /// The last successfully retrieved shadow document.
    pub fn shadow_document(&self) -> Option<&str> {
        self.state.document.as_deref()
    }

    /// Subscribes to the thing's `update/delta` topic.
    ///
    /// Deltas are delivered to the session's handler. Returns the SUBSCRIBE
    /// packet identifier.
    pub fn subscribe_delta(&mut self) -> Result<u16, Error> {
        self.sync_connection()?;
        let topic = ShadowTopic::UpdateDelta.build(&self.state.thing_name)?;
        self.session.subscribe(&topic, QoS::AtMostOnce)
    }

    /// The most recent rejection received for any request.
    pub fn last_rejection(&self) -> Option<&Rejection> {
        self.state.last_rejection.as_ref()
    }

    /// Current state of one exchange. Idle whenever no call is in progress.
    pub fn exchange_state(&self, kind: ExchangeKind) -> ExchangeState {
        self.state.state(kind)
    }

    fn exchange(&mut self, kind: ExchangeKind, payload: &[u8]) -> Result<(), Error> {
        if !self.session.is_connected() {
            return Err(Error::Protocol(ProtocolError::NotConnected));
        }
        self.sync_connection()?;

        let request = kind.request().build(&self.state.thing_name)?;
        let accepted = kind.accepted().build(&self.state.thing_name)?;
        let rejected = kind.rejected().build(&self.state.thing_name)?;

        self.ensure_subscribed(kind, &accepted, &rejected)?;

        self.state.set(kind, ExchangeState::Awaiting);
        let outcome = match self.session.publish(&request, payload, QoS::AtMostOnce) {
            Ok(()) => self.await_reply(kind),
            Err(e) => Err(e),
        };
        let state = self.state.state(kind);
        self.state.set(kind, ExchangeState::Idle);
        outcome?;

        match state {
            ExchangeState::Accepted => Ok(()),
            ExchangeState::Rejected => Err(Error::Protocol(ProtocolError::Rejected)),
            ExchangeState::Overflow => Err(Error::BufferTooSmall),
            ExchangeState::Malformed => Err(Error::Protocol(ProtocolError::MalformedPacket)),
            ExchangeState::Idle | ExchangeState::Awaiting => {
                warn!("no reply on {} within {} ms", accepted.as_str(), self.timeout_ms());
                Err(Error::Timeout)
            }
        }
    }

    /// Subscribes to both reply topics and waits for their SUBACKs.
    fn ensure_subscribed(
        &mut self,
        kind: ExchangeKind,
        accepted: &str,
        rejected: &str,
    ) -> Result<(), Error> {
        if self.state.subscribed(kind) {
            return Ok(());
        }

        let first = self.session.subscribe(accepted, QoS::AtMostOnce)?;
        let second = match self.session.subscribe(rejected, QoS::AtMostOnce) {
            Ok(id) => id,
            Err(e) => {
                self.session.release_ack(first);
                return Err(e);
            }
        };

        let started = self.session.now_ms();
        let result = loop {
            if let Err(e) = self.process_responses() {
                break Err(e);
            }
            let statuses = [self.session.ack_status(first), self.session.ack_status(second)];
            if statuses.contains(&Some(AckStatus::Failed)) {
                break Err(Error::Protocol(ProtocolError::SubscribeRejected));
            }
            // untracked (None) identifiers cannot be waited on
            if !statuses.contains(&Some(AckStatus::Pending)) {
                break Ok(());
            }
            if self.elapsed_since(started) >= self.timeout_ms() {
                break Err(Error::Timeout);
            }
        };

        self.session.release_ack(first);
        self.session.release_ack(second);
        if result.is_ok() {
            debug!("subscribed to {} replies", kind.request().suffix());
            self.state.set_subscribed(kind);
        }
        result
    }

    /// Pumps until the exchange leaves `Awaiting` or the timeout passes.
    fn await_reply(&mut self, kind: ExchangeKind) -> Result<(), Error> {
        let started = self.session.now_ms();
        loop {
            match self.process_responses() {
                // the reply may be the packet that did not fit
                Err(Error::Protocol(ProtocolError::PacketTooLarge))
                    if self.state.state(kind) == ExchangeState::Awaiting =>
                {
                    warn!("{} reply exceeds the packet buffer", kind.request().suffix());
                    self.state.set(kind, ExchangeState::Overflow);
                    return Ok(());
                }
                result => result?,
            }
            if self.state.state(kind) != ExchangeState::Awaiting
                || self.elapsed_since(started) >= self.timeout_ms()
            {
                return Ok(());
            }
        }
    }

    /// Adopts the session's current connection if it changed underneath,
    /// e.g. by a reconnect through [`Shadow::session_mut`].
    fn sync_connection(&mut self) -> Result<(), Error> {
        let current = self.session.connections();
        if current == self.state.connection {
            return Ok(());
        }

        self.state.reset_connection();
        self.state.thing_name =
            String::try_from(self.session.thing_name()).map_err(|_| Error::BufferTooSmall)?;
        self.state.connection = current;
        Ok(())
    }

    fn timeout_ms(&self) -> u32 {
        self.session.options().shadow_timeout_ms
    }

    fn elapsed_since(&self, started: u32) -> u32 {
        self.session.now_ms().wrapping_sub(started)
    }
}

impl<C, K, H, const N: usize> core::fmt::Debug for Shadow<C, K, H, N>
where
    C: Connection,
    K: Clock,
    H: Notify,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Shadow")
            .field("session", &self.session)
            .field("get", &self.state.get)
            .field("update", &self.state.update)
            .field("has_document", &self.state.document.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awaiting(kind: ExchangeKind) -> ShadowState {
        let mut state = ShadowState {
            thing_name: String::try_from("pump-7").unwrap(),
            ..ShadowState::default()
        };
        state.set(kind, ExchangeState::Awaiting);
        state
    }

    #[test]
    fn claims_only_own_reply_topics() {
        let mut state = awaiting(ExchangeKind::Get);
        assert!(!state.intercept("$aws/things/other/shadow/get/accepted", b"{}"));
        assert!(!state.intercept("$aws/things/pump-7/shadow/update/delta", b"{}"));
        assert!(!state.intercept("telemetry", b"{}"));
        assert_eq!(state.get, ExchangeState::Awaiting);

        assert!(state.intercept("$aws/things/pump-7/shadow/get/accepted", b"{\"state\":{}}"));
        assert_eq!(state.get, ExchangeState::Accepted);
        assert_eq!(state.document.as_deref(), Some("{\"state\":{}}"));
    }

    #[test]
    fn stale_reply_is_claimed_and_ignored() {
        let mut state = awaiting(ExchangeKind::Update);
        state.set(ExchangeKind::Update, ExchangeState::Idle);
        assert!(state.intercept("$aws/things/pump-7/shadow/update/rejected", br#"{"code":400}"#));
        assert_eq!(state.update, ExchangeState::Idle);
        assert!(state.last_rejection.is_none());
    }

    #[test]
    fn oversized_or_invalid_document_keeps_previous() {
        let mut state = awaiting(ExchangeKind::Get);
        state.document = Some(String::try_from("old").unwrap());

        let big = [b' '; SHADOW_GET_RESPONSE_MAX_SIZE + 1];
        state.intercept("$aws/things/pump-7/shadow/get/accepted", &big);
        assert_eq!(state.get, ExchangeState::Overflow);
        assert_eq!(state.document.as_deref(), Some("old"));

        state.set(ExchangeKind::Get, ExchangeState::Awaiting);
        state.intercept("$aws/things/pump-7/shadow/get/accepted", &[0xFF, 0xFE]);
        assert_eq!(state.get, ExchangeState::Malformed);
        assert_eq!(state.document.as_deref(), Some("old"));
    }

    #[test]
    fn rejection_is_recorded() {
        let mut state = awaiting(ExchangeKind::Get);
        state.intercept(
            "$aws/things/pump-7/shadow/get/rejected",
            br#"{"code":404,"message":"No shadow exists"}"#,
        );
        assert_eq!(state.get, ExchangeState::Rejected);
        let rejection = state.last_rejection.as_ref().unwrap();
        assert_eq!(rejection.code, 404);
        assert_eq!(rejection.message.as_str(), "No shadow exists");
    }
}
