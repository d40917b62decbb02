//! Reserved shadow topic names.

use crate::error::Error;
use core::fmt::Write;
use heapless::String;

/// Longest shadow topic that can be built.
pub const SHADOW_TOPIC_MAX_LENGTH: usize = 256;

const PREFIX: &str = "$aws/things/";
const INFIX: &str = "/shadow/";

/// The reserved topics of a thing's classic shadow.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ShadowTopic {
    /// Request the current document.
    Get,
    /// Reply carrying the document.
    GetAccepted,
    /// Reply refusing a get request.
    GetRejected,
    /// Request a state change.
    Update,
    /// Reply acknowledging an update.
    UpdateAccepted,
    /// Reply refusing an update.
    UpdateRejected,
    /// Difference between desired and reported state.
    UpdateDelta,
    /// Full previous/current documents after an update.
    UpdateDocuments,
}

impl ShadowTopic {
    const ALL: [ShadowTopic; 8] = [
        ShadowTopic::Get,
        ShadowTopic::GetAccepted,
        ShadowTopic::GetRejected,
        ShadowTopic::Update,
        ShadowTopic::UpdateAccepted,
        ShadowTopic::UpdateRejected,
        ShadowTopic::UpdateDelta,
        ShadowTopic::UpdateDocuments,
    ];

    /// Topic suffix after `$aws/things/<thing>/shadow/`.
    pub fn suffix(self) -> &'static str {
        match self {
            ShadowTopic::Get => "get",
            ShadowTopic::GetAccepted => "get/accepted",
            ShadowTopic::GetRejected => "get/rejected",
            ShadowTopic::Update => "update",
            ShadowTopic::UpdateAccepted => "update/accepted",
            ShadowTopic::UpdateRejected => "update/rejected",
            ShadowTopic::UpdateDelta => "update/delta",
            ShadowTopic::UpdateDocuments => "update/documents",
        }
    }

    /// Builds the full topic for `thing_name`.
    ///
    /// Fails with [`Error::BufferTooSmall`] instead of truncating.
    pub fn build(self, thing_name: &str) -> Result<String<SHADOW_TOPIC_MAX_LENGTH>, Error> {
        let mut topic = String::new();
        write!(topic, "{}{}{}{}", PREFIX, thing_name, INFIX, self.suffix())
            .map_err(|_| Error::BufferTooSmall)?;
        Ok(topic)
    }

    /// Splits a shadow topic into its kind and thing name.
    ///
    /// Returns `None` for anything that is not one of the reserved topics.
    pub fn parse(topic: &str) -> Option<(ShadowTopic, &str)> {
        let rest = topic.strip_prefix(PREFIX)?;
        let (thing_name, suffix) = rest.split_once(INFIX)?;
        if thing_name.is_empty() {
            return None;
        }
        Self::ALL
            .iter()
            .find(|kind| kind.suffix() == suffix)
            .map(|kind| (*kind, thing_name))
    }
}
