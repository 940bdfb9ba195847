//! Postgres session over the simple-query protocol

use super::state::ConnectionState;
use super::transport::Transport;
use crate::auth::ScramClient;
use crate::driver::{ConnectTarget, Execution, ResultSet};
use crate::protocol::{
    decode_message, encode_message, AuthenticationMessage, BackendMessage, FrontendMessage,
};
use crate::{Error, Result};
use bytes::{Buf, BytesMut};
use std::io;
use tracing::Instrument;

const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Postgres connection
pub struct Connection {
    transport: Transport,
    state: ConnectionState,
    read_buf: BytesMut,
    database: String,
    process_id: Option<i32>,
    secret_key: Option<i32>,
}

impl Connection {
    /// Create connection from transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            state: ConnectionState::Initial,
            read_buf: BytesMut::with_capacity(8192),
            database: String::new(),
            process_id: None,
            secret_key: None,
        }
    }

    /// Get current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Database this session was started against
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Backend process id and cancel key, once startup completed
    pub fn backend_key(&self) -> Option<(i32, i32)> {
        self.process_id.zip(self.secret_key)
    }

    /// Perform startup and authentication
    pub async fn startup(&mut self, target: &ConnectTarget) -> Result<()> {
        async {
            self.state.transition(ConnectionState::AwaitingAuth)?;

            let mut params = vec![
                ("user".to_string(), target.username.clone()),
                ("database".to_string(), target.database.clone()),
                ("application_name".to_string(), "fraiseql-cluster".to_string()),
            ];
            for (k, v) in &target.options {
                params.retain(|(existing, _)| existing != k);
                params.push((k.clone(), v.clone()));
            }

            self.send_message(&FrontendMessage::Startup {
                version: crate::protocol::constants::PROTOCOL_VERSION,
                params,
            })
            .await?;

            self.state.transition(ConnectionState::Authenticating)?;
            self.authenticate(target).await?;

            self.state.transition(ConnectionState::Idle)?;
            self.database = target.database.clone();
            tracing::debug!("startup complete");
            Ok(())
        }
        .instrument(tracing::info_span!(
            "startup",
            user = %target.username,
            database = %target.database,
            host = %target.host
        ))
        .await
    }

    /// Handle authentication, up to the first ReadyForQuery
    async fn authenticate(&mut self, target: &ConnectTarget) -> Result<()> {
        let mut mechanism = crate::metrics::labels::MECHANISM_TRUST;

        loop {
            match self.receive_message().await? {
                BackendMessage::Authentication(auth) => match auth {
                    AuthenticationMessage::Ok => {
                        crate::metrics::counters::auth_successful(mechanism);
                    }
                    AuthenticationMessage::CleartextPassword => {
                        mechanism = crate::metrics::labels::MECHANISM_CLEARTEXT;
                        let password = target
                            .password
                            .as_ref()
                            .ok_or_else(|| Error::Authentication("password required".into()))?;
                        self.send_message(&FrontendMessage::Password(password.clone()))
                            .await?;
                    }
                    AuthenticationMessage::Md5Password => {
                        return Err(Error::Authentication(
                            "MD5 authentication not supported. Use SCRAM-SHA-256 or cleartext password"
                                .into(),
                        ));
                    }
                    AuthenticationMessage::Sasl(mechanisms) => {
                        mechanism = crate::metrics::labels::MECHANISM_SCRAM;
                        self.handle_sasl(&mechanisms, target).await?;
                    }
                    AuthenticationMessage::SaslContinue(_) | AuthenticationMessage::SaslFinal(_) => {
                        return Err(Error::Protocol(
                            "SASL message outside of SASL exchange".into(),
                        ));
                    }
                },
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = Some(process_id);
                    self.secret_key = Some(secret_key);
                }
                BackendMessage::ParameterStatus { name, value } => {
                    tracing::trace!("parameter status: {} = {}", name, value);
                }
                BackendMessage::NoticeResponse(notice) => {
                    tracing::debug!("notice during startup: {}", notice);
                }
                BackendMessage::ReadyForQuery { .. } => return Ok(()),
                BackendMessage::ErrorResponse(err) => {
                    crate::metrics::counters::auth_failed(mechanism);
                    return Err(Error::Server(err));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected message during auth: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// SCRAM-SHA-256 exchange
    async fn handle_sasl(&mut self, mechanisms: &[String], target: &ConnectTarget) -> Result<()> {
        if !mechanisms.iter().any(|m| m == SCRAM_SHA_256) {
            return Err(Error::Authentication(format!(
                "server does not support SCRAM-SHA-256. Available: {}",
                mechanisms.join(", ")
            )));
        }
        let password = target.password.as_ref().ok_or_else(|| {
            Error::Authentication("password required for SCRAM authentication".into())
        })?;

        let mut scram = ScramClient::new(password.as_str());
        self.send_message(&FrontendMessage::SaslInitialResponse {
            mechanism: SCRAM_SHA_256.to_string(),
            data: scram.client_first().into_bytes(),
        })
        .await?;

        let server_first = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslContinue(data)) => data,
            BackendMessage::ErrorResponse(err) => return Err(Error::Server(err)),
            _ => return Err(Error::Protocol("expected SASLContinue".into())),
        };
        let server_first = String::from_utf8(server_first)
            .map_err(|_| Error::Authentication("server first message is not UTF-8".into()))?;

        let client_final = scram
            .client_final(&server_first)
            .map_err(|e| Error::Authentication(e.to_string()))?;
        self.send_message(&FrontendMessage::SaslResponse(client_final.into_bytes()))
            .await?;

        let server_final = match self.receive_message().await? {
            BackendMessage::Authentication(AuthenticationMessage::SaslFinal(data)) => data,
            BackendMessage::ErrorResponse(err) => return Err(Error::Server(err)),
            _ => return Err(Error::Protocol("expected SASLFinal".into())),
        };
        let server_final = String::from_utf8(server_final)
            .map_err(|_| Error::Authentication("server final message is not UTF-8".into()))?;
        scram
            .verify_server_final(&server_final)
            .map_err(|e| Error::Authentication(e.to_string()))?;

        tracing::debug!("SCRAM-SHA-256 authentication successful");
        Ok(())
    }

    /// Execute a simple query.
    ///
    /// Reads until ReadyForQuery so the session is idle again even when the
    /// statement failed; the first ErrorResponse is returned as
    /// [`Error::Server`].
    pub async fn simple_query(&mut self, query: &str) -> Result<Execution> {
        if self.state != ConnectionState::Idle {
            return Err(Error::ConnectionBusy(format!(
                "connection in state: {}",
                self.state
            )));
        }

        self.state.transition(ConnectionState::Busy)?;
        if let Err(e) = self.send_message(&FrontendMessage::Query(query.to_string())).await {
            self.state = ConnectionState::Closed;
            return Err(e);
        }

        let mut execution = Execution::default();
        let mut failure = None;

        loop {
            let msg = match self.receive_message().await {
                Ok(msg) => msg,
                Err(e) => {
                    self.state = ConnectionState::Closed;
                    return Err(e);
                }
            };
            match msg {
                BackendMessage::RowDescription(columns) => {
                    execution.rows = Some(ResultSet {
                        columns,
                        rows: Vec::new(),
                    });
                }
                BackendMessage::DataRow(fields) => {
                    if let Some(ref mut rows) = execution.rows {
                        rows.rows.push(
                            fields
                                .into_iter()
                                .map(|f| f.map(|b| String::from_utf8_lossy(&b).into_owned()))
                                .collect(),
                        );
                    }
                }
                BackendMessage::CommandComplete(tag) => {
                    execution.affected_rows = affected_rows(&tag);
                }
                BackendMessage::ErrorResponse(err) => {
                    failure.get_or_insert(err);
                }
                BackendMessage::ReadyForQuery { .. } => break,
                BackendMessage::EmptyQueryResponse
                | BackendMessage::NoticeResponse(_)
                | BackendMessage::ParameterStatus { .. } => {}
                other => {
                    self.state = ConnectionState::Closed;
                    return Err(Error::Protocol(format!(
                        "unexpected message during query: {:?}",
                        other
                    )));
                }
            }
        }

        self.state.transition(ConnectionState::Idle)?;

        if let Some(err) = failure {
            return Err(Error::Server(err));
        }
        execution.last_insert_id = execution
            .rows
            .as_ref()
            .and_then(|rs| rs.rows.first())
            .and_then(|row| row.first())
            .and_then(|v| v.as_deref())
            .and_then(|v| v.parse().ok());
        Ok(execution)
    }

    /// Send a frontend message
    async fn send_message(&mut self, msg: &FrontendMessage) -> Result<()> {
        let buf = encode_message(msg);
        self.transport.write_all(&buf).await
    }

    /// Receive a backend message
    async fn receive_message(&mut self) -> Result<BackendMessage> {
        loop {
            match decode_message(&self.read_buf) {
                Ok((msg, consumed)) => {
                    self.read_buf.advance(consumed);
                    return Ok(msg);
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {}
                Err(e) => return Err(Error::Protocol(e.to_string())),
            }

            let n = self.transport.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }

    /// Close the connection
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state.transition(ConnectionState::Closed)?;
        let _ = self.send_message(&FrontendMessage::Terminate).await;
        self.transport.shutdown().await
    }
}

/// Row count from a CommandComplete tag (`INSERT 0 5`, `UPDATE 3`, `SELECT 2`)
fn affected_rows(tag: &str) -> u64 {
    let mut parts = tag.split_whitespace();
    match parts.next() {
        Some("INSERT" | "UPDATE" | "DELETE" | "SELECT" | "MERGE" | "MOVE" | "FETCH" | "COPY") => {
            parts.last().and_then(|n| n.parse().ok()).unwrap_or(0)
        }
        _ => 0,
    }
}
