/*
 * SPDX-FileCopyrightText: Copyright (c) 2021-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */

//! IF-MAP 2.0 SOAP requests and response parsers.

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ProtocolError;
use crate::framer::HttpResponse;

/// Upper bound on one poll result the server is asked to honour.
pub const MAX_POLL_RESULT_SIZE: u32 = 7_500_000;

/// The subscription descends at most this far from the subscriber identity.
pub const SUBSCRIBE_MAX_DEPTH: u32 = 255;

const ENVELOPE_OPEN: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" "#,
    r#"xmlns:ifmap="http://www.trustedcomputinggroup.org/2010/IFMAP/2" "#,
    r#"xmlns:meta="http://www.trustedcomputinggroup.org/2010/IFMAP-METADATA/2">"#,
    "<env:Body>",
);
const ENVELOPE_CLOSE: &str = "</env:Body></env:Envelope>";

/// Everything needed to put an IF-MAP request on the wire.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// Value of the Host header.
    pub host: &'a str,
    /// Base64 `username:password`. None in certificate mode, where the Authorization header is
    /// left out.
    pub b64_auth_str: Option<&'a str>,
}

pub fn new_session_request(ctx: RequestContext<'_>) -> Vec<u8> {
    let body = format!(
        r#"<ifmap:newSession max-poll-result-size="{MAX_POLL_RESULT_SIZE}"></ifmap:newSession>"#
    );
    http_post(ctx, &body)
}

pub fn subscribe_request(
    ctx: RequestContext<'_>,
    session_id: &str,
    subscriber_name: &str,
) -> Vec<u8> {
    let body = format!(
        concat!(
            r#"<ifmap:subscribe session-id="{session_id}">"#,
            r#"<update name="root" match-links="all" max-depth="{max_depth}" result-filter="all">"#,
            r#"<identity type="other" other-type-definition="extended" name="{name}"/>"#,
            "</update></ifmap:subscribe>",
        ),
        session_id = escape(session_id),
        max_depth = SUBSCRIBE_MAX_DEPTH,
        name = escape(subscriber_name),
    );
    http_post(ctx, &body)
}

pub fn poll_request(ctx: RequestContext<'_>, session_id: &str) -> Vec<u8> {
    let body = format!(
        r#"<ifmap:poll session-id="{session_id}"/>"#,
        session_id = escape(session_id)
    );
    http_post(ctx, &body)
}

fn http_post(ctx: RequestContext<'_>, operation: &str) -> Vec<u8> {
    let envelope = format!("{ENVELOPE_OPEN}{operation}{ENVELOPE_CLOSE}");

    let mut request = format!(
        "POST / HTTP/1.1\r\nHost: {}\r\nContent-Type: application/soap+xml\r\n",
        ctx.host
    );
    if let Some(auth) = ctx.b64_auth_str {
        request.push_str(&format!("Authorization: Basic {auth}\r\n"));
    }
    request.push_str(&format!(
        "Content-Length: {}\r\n\r\n{envelope}",
        envelope.len()
    ));
    request.into_bytes()
}

/// The identifiers returned by a successful newSession.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionResult {
    pub publisher_id: String,
    pub session_id: String,
}

pub fn parse_new_session(response: &HttpResponse) -> Result<NewSessionResult, ProtocolError> {
    check_status(response)?;
    let result = find_result(&response.body, "newSession")?;

    match result {
        Some(ResultElement::NewSession {
            publisher_id,
            session_id,
        }) => {
            let publisher_id = publisher_id
                .filter(|id| !id.is_empty())
                .ok_or(ProtocolError::MissingField("ifmap-publisher-id"))?;
            let session_id = session_id
                .filter(|id| !id.is_empty())
                .ok_or(ProtocolError::MissingField("session-id"))?;
            Ok(NewSessionResult {
                publisher_id,
                session_id,
            })
        }
        Some(ResultElement::Error { code, message }) => {
            Err(ProtocolError::ErrorResult { code, message })
        }
        _ => Err(ProtocolError::MissingField("session-id")),
    }
}

pub fn parse_subscribe(response: &HttpResponse) -> Result<(), ProtocolError> {
    check_status(response)?;
    match find_result(&response.body, "subscribe")? {
        Some(ResultElement::SubscribeReceived) => Ok(()),
        Some(ResultElement::Error { code, message }) => {
            Err(ProtocolError::ErrorResult { code, message })
        }
        _ => Err(ProtocolError::MissingSubscribeStatus),
    }
}

/// Validates a poll response. The body itself is handed on untouched.
pub fn parse_poll(response: &HttpResponse) -> Result<(), ProtocolError> {
    check_status(response)?;
    if response.body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ProtocolError::EmptyPollBody);
    }
    match find_result(&response.body, "poll")? {
        Some(ResultElement::PollResult) => Ok(()),
        Some(ResultElement::EndSession) => Err(ProtocolError::SessionEnded),
        Some(ResultElement::Error { code, message }) => {
            Err(ProtocolError::ErrorResult { code, message })
        }
        _ => Err(ProtocolError::MissingPollResult),
    }
}

fn check_status(response: &HttpResponse) -> Result<(), ProtocolError> {
    if response.status != 200 {
        return Err(ProtocolError::HttpStatus {
            status: response.status,
        });
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum ResultElement {
    NewSession {
        publisher_id: Option<String>,
        session_id: Option<String>,
    },
    SubscribeReceived,
    PollResult,
    EndSession,
    Error {
        code: String,
        message: String,
    },
}

/// Walks the envelope and returns the first IF-MAP result element. For an errorResult the
/// errorString text is collected too.
fn find_result(body: &[u8], context: &'static str) -> Result<Option<ResultElement>, ProtocolError> {
    let malformed = |reason: String| ProtocolError::MalformedXml { context, reason };

    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);

    let mut error: Option<(String, String)> = None;
    let mut in_error_string = false;

    loop {
        let event = reader.read_event().map_err(|e| malformed(e.to_string()))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_start = matches!(event, Event::Start(_));
                match e.local_name().as_ref() {
                    b"errorResult" if error.is_none() => {
                        let code = attribute(e, b"errorCode")
                            .map_err(&malformed)?
                            .unwrap_or_default();
                        error = Some((code, String::new()));
                        if !is_start {
                            break;
                        }
                    }
                    b"errorString" if error.is_some() => in_error_string = is_start,
                    _ if error.is_some() => {}
                    b"newSessionResult" => {
                        return Ok(Some(ResultElement::NewSession {
                            publisher_id: attribute(e, b"ifmap-publisher-id").map_err(&malformed)?,
                            session_id: attribute(e, b"session-id").map_err(&malformed)?,
                        }));
                    }
                    b"subscribeReceived" => return Ok(Some(ResultElement::SubscribeReceived)),
                    b"pollResult" => return Ok(Some(ResultElement::PollResult)),
                    b"endSessionResult" => return Ok(Some(ResultElement::EndSession)),
                    _ => {}
                }
            }
            Event::Text(text) if in_error_string => {
                let text = text.unescape().map_err(|e| malformed(e.to_string()))?;
                if let Some((_, message)) = error.as_mut() {
                    message.push_str(&text);
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"errorString" => in_error_string = false,
                b"errorResult" if error.is_some() => break,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(error.map(|(code, message)| ResultElement::Error { code, message }))
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, String> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        if attr.key.local_name().as_ref() == name {
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
