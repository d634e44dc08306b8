//! Error responses written by the protocol worker.
//!
//! Stream-level failures end the session; stanza-level failures are
//! answered and processing continues.

use tracing::{debug, warn};

use crate::error::{ProtocolError, StanzaErrorCondition, StanzaErrorType, StreamErrorCondition, XmlError};
use crate::protocol::SessionState;
use crate::response;
use crate::session::{SessionContext, SessionTerminationCause};
use crate::stanza::{CoreStanza, Stanza};

/// Write `error` and end the session.
pub fn write_error_and_close(session: &SessionContext, error: &Stanza) {
    session.write(error);
    session.end_session(SessionTerminationCause::StreamError);
}

/// Answer a [`ProtocolError`] raised by a handler.
///
/// The pre-built error stanza is sent when present, a `bad-format` stream
/// error otherwise. Either way the session ends.
pub fn handle_protocol_error(session: &SessionContext, error: &ProtocolError, stanza: &Stanza) {
    debug!(
        session_id = %session.id(),
        stanza = %stanza.dense(),
        error = %error,
        "Protocol error"
    );
    match &error.error_stanza {
        Some(error_stanza) => write_error_and_close(session, error_stanza),
        None => {
            let lang = session.xml_lang();
            close_with_stream_error(
                session,
                response::stream_error(
                    StreamErrorCondition::BadFormat,
                    lang.as_deref(),
                    Some(&error.message),
                    None,
                ),
            );
        }
    }
}

/// No handler, or no handler legal in the session's state.
///
/// Before the peer's stream header was answered the error is wrapped in a
/// stream header of our own.
pub fn handle_unsupported_stanza_type(session: &SessionContext, stanza: &Stanza) {
    debug!(
        session_id = %session.id(),
        state = %session.state(),
        stanza = %stanza.dense(),
        "Unsupported stanza type"
    );
    let lang = session.xml_lang();
    let error = response::stream_error(
        StreamErrorCondition::UnsupportedStanzaType,
        lang.as_deref(),
        Some("service unavailable at this session state"),
        None,
    );
    let error = match error {
        Ok(error) if session.state() <= SessionState::Initiated => response::stream_opener_for_error(
            session.role(),
            session.server_entity(),
            Some("1.0"),
            error,
        ),
        other => other,
    };
    close_with_stream_error(session, error);
}

/// A core stanza arrived before authentication.
pub fn handle_not_authorized(session: &SessionContext, stanza: &Stanza) {
    debug!(
        session_id = %session.id(),
        stanza = %stanza.dense(),
        "Rejecting stanza from unauthenticated session"
    );
    let lang = session.xml_lang();
    close_with_stream_error(
        session,
        response::stream_error(
            StreamErrorCondition::NotAuthorized,
            lang.as_deref(),
            Some("could not process incoming stanza"),
            None,
        ),
    );
}

/// `from` does not belong to the session.
///
/// Core stanzas get an `unknown-sender` stanza error and the session stays
/// open; anything else is a stream error.
pub fn handle_wrong_from(session: &SessionContext, stanza: &Stanza, text: &str) {
    debug!(
        session_id = %session.id(),
        stanza = %stanza.dense(),
        reason = text,
        "Rejecting stanza with foreign from"
    );
    if CoreStanza::wrap(stanza).is_some() {
        write_stanza_error(
            session,
            stanza,
            StanzaErrorCondition::UnknownSender,
            StanzaErrorType::Modify,
            text,
        );
    } else {
        let lang = session.xml_lang();
        close_with_stream_error(
            session,
            response::stream_error(StreamErrorCondition::NotAuthorized, lang.as_deref(), Some(text), None),
        );
    }
}

/// Answer `stanza` with a stanza error; the session stays open.
pub fn write_stanza_error(
    session: &SessionContext,
    stanza: &Stanza,
    condition: StanzaErrorCondition,
    error_type: StanzaErrorType,
    text: &str,
) {
    let lang = session.xml_lang();
    match response::stanza_error(condition, stanza, error_type, Some(text), lang.as_deref(), None) {
        Ok(error) => session.write(&error),
        Err(e) => warn!(session_id = %session.id(), error = %e, "Could not build stanza error"),
    }
}

fn close_with_stream_error(session: &SessionContext, error: Result<Stanza, XmlError>) {
    match error {
        Ok(error) => write_error_and_close(session, &error),
        Err(e) => {
            warn!(session_id = %session.id(), error = %e, "Could not build stream error");
            session.end_session(SessionTerminationCause::StreamError);
        }
    }
}
