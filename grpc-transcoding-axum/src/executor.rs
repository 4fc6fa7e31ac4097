//! Call execution: from a matched route and an HTTP request to an HTTP
//! response.
//!
//! Unary calls answer with one JSON (or plain text) body. Server streaming
//! calls answer with server-sent events, one `data:` event per message, and a
//! final `error` event if the call fails midway.
//!
//! Both [`ExecutionModel`]s share this code; they differ only in where the
//! call future is polled.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderValue, Method, header};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::LengthLimitError;
use prost_reflect::DynamicMessage;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

use crate::channel::{ManagedChannel, MessageStream, RpcChannel, StreamingFuture, UnaryFuture};
use crate::config::{PrintOptions, TranscodingConfig};
use crate::error::TranscodingError;
use crate::header::HeaderConverter;
use crate::json;
use crate::resolver::ErrorResolver;
use crate::route::RouteMatch;
use crate::transcoder::{Transcoder, Variable};

/// Where RPC calls are driven.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionModel {
    /// Await calls on the request task.
    #[default]
    NonBlocking,
    /// Drive each call on tokio's blocking pool with `Handle::block_on`.
    /// Streams are pumped from that thread through a bounded channel.
    Blocking,
}

impl ExecutionModel {
    async fn unary(self, call: UnaryFuture) -> Result<tonic::Response<DynamicMessage>, Status> {
        match self {
            ExecutionModel::NonBlocking => call.await,
            ExecutionModel::Blocking => {
                let handle = tokio::runtime::Handle::current();
                tokio::task::spawn_blocking(move || handle.block_on(call))
                    .await
                    .unwrap_or_else(|e| Err(Status::internal(format!("blocking call failed: {e}"))))
            }
        }
    }

    async fn server_streaming(
        self,
        call: StreamingFuture,
    ) -> Result<tonic::Response<MessageStream>, Status> {
        match self {
            ExecutionModel::NonBlocking => call.await,
            ExecutionModel::Blocking => {
                let handle = tokio::runtime::Handle::current();
                let (head_tx, head_rx) = oneshot::channel();

                tokio::task::spawn_blocking(move || {
                    let response = match handle.block_on(call) {
                        Ok(response) => response,
                        Err(status) => {
                            let _ = head_tx.send(Err(status));
                            return;
                        }
                    };

                    let (metadata, mut upstream, extensions) = response.into_parts();
                    let (tx, rx) = mpsc::channel(1);
                    let stream: MessageStream = ReceiverStream::new(rx).boxed();
                    if head_tx
                        .send(Ok(tonic::Response::from_parts(metadata, stream, extensions)))
                        .is_err()
                    {
                        return;
                    }

                    loop {
                        let next = handle.block_on(async {
                            tokio::select! {
                                item = upstream.next() => item,
                                _ = tx.closed() => None,
                            }
                        });
                        let Some(item) = next else {
                            break;
                        };
                        if tx.blocking_send(item).is_err() {
                            break;
                        }
                    }
                    // dropping `upstream` here cancels the call if it is still running
                });

                head_rx.await.unwrap_or_else(|_| {
                    Err(Status::internal("blocking call ended without a response"))
                })
            }
        }
    }
}

/// Runs matched requests against the channel.
pub(crate) struct CallExecutor {
    channel: ManagedChannel,
    converter: Arc<dyn HeaderConverter>,
    resolver: Arc<dyn ErrorResolver>,
    config: TranscodingConfig,
}

impl CallExecutor {
    pub(crate) fn new(
        channel: ManagedChannel,
        converter: Arc<dyn HeaderConverter>,
        resolver: Arc<dyn ErrorResolver>,
        config: TranscodingConfig,
    ) -> Self {
        Self {
            channel,
            converter,
            resolver,
            config,
        }
    }

    pub(crate) fn channel(&self) -> &ManagedChannel {
        &self.channel
    }

    pub(crate) async fn execute(
        &self,
        found: RouteMatch,
        request: axum::extract::Request,
    ) -> Result<Response, TranscodingError> {
        let route = found.route().clone();
        let binding = found.binding().clone();
        let method = route.method();

        let streaming = match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => false,
            (false, true) => true,
            _ => return Err(TranscodingError::new_unsupported_method_type(method)),
        };

        let (parts, body) = request.into_parts();
        if streaming && parts.method != Method::GET {
            return Err(TranscodingError::new_method_not_allowed(format!(
                "server streaming method {} only supports GET",
                method.full_name()
            )));
        }

        let body = read_body(body, self.config.max_body_size).await?;
        let variable = Variable::new(body, parts.uri.query(), found.into_path_variables());
        let message = Transcoder::new(variable).into_message(route.input(), binding.body())?;

        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = self.converter.to_metadata(&parts.headers);
        if let Some(timeout) = self.config.call_timeout {
            request.set_timeout(timeout);
        }

        let model = self.config.execution_model;
        let response_body = binding.response_body().map(str::to_owned);

        if !streaming {
            let call = self.channel.unary(method, request);
            return match model.unary(call).await {
                Ok(response) => self.unary_response(response, response_body.as_deref()),
                Err(status) => Ok(self.failed(method.full_name(), &status)),
            };
        }

        let call = self.channel.server_streaming(method, request);
        match model.server_streaming(call).await {
            Ok(response) => {
                Ok(self.streaming_response(method.full_name().to_owned(), response, response_body))
            }
            Err(status) => Ok(self.failed(method.full_name(), &status)),
        }
    }

    fn failed(&self, method: &str, status: &Status) -> Response {
        tracing::debug!(method, code = ?status.code(), message = status.message(), "rpc failed");
        let headers = self.converter.to_headers(status.metadata());
        self.resolver.resolve(status, headers)
    }

    fn unary_response(
        &self,
        response: tonic::Response<DynamicMessage>,
        response_body: Option<&str>,
    ) -> Result<Response, TranscodingError> {
        let (metadata, message, _) = response.into_parts();
        let payload = Transcoder::out(message, response_body);
        let options = &self.config.print_options;
        let text = payload
            .to_json(options)
            .and_then(|value| json::render(&value, options.add_whitespace))
            .map_err(|e| TranscodingError::new_internal(format!("failed to encode response: {e}")))?;

        let mut response = text.into_response();
        let headers = response.headers_mut();
        headers.extend(self.converter.to_headers(&metadata));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(payload.content_type()),
        );
        Ok(response)
    }

    fn streaming_response(
        &self,
        method: String,
        response: tonic::Response<MessageStream>,
        response_body: Option<String>,
    ) -> Response {
        let (metadata, mut upstream, _) = response.into_parts();
        let converter = self.converter.clone();
        let options = self.config.print_options;

        let events = async_stream::stream! {
            let mut guard = DisconnectLog { method, finished: false };
            while let Some(item) = upstream.next().await {
                let event = match item {
                    Ok(message) => message_event(message, response_body.as_deref(), &options),
                    Err(status) => {
                        tracing::debug!(method = %guard.method, code = ?status.code(), message = status.message(), "rpc failed mid-stream");
                        Err(TranscodingError::from_status(&status, &*converter))
                    }
                };
                match event {
                    Ok(event) => yield Ok::<_, Infallible>(event),
                    Err(err) => {
                        yield Ok(error_event(&err));
                        break;
                    }
                }
            }
            guard.finished = true;
        };

        let mut response = Sse::new(events).into_response();
        response
            .headers_mut()
            .extend(self.converter.to_headers(&metadata));
        response
    }
}

/// Logs when the client goes away before the stream ends.
struct DisconnectLog {
    method: String,
    finished: bool,
}

impl Drop for DisconnectLog {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(method = %self.method, "client disconnected, upstream call cancelled");
        }
    }
}

fn message_event(
    message: DynamicMessage,
    response_body: Option<&str>,
    options: &PrintOptions,
) -> Result<Event, TranscodingError> {
    let payload = Transcoder::out(message, response_body);
    let text = payload
        .to_json(options)
        .and_then(|value| json::render(&value, false))
        .map_err(|e| TranscodingError::new_internal(format!("failed to encode response: {e}")))?;
    Ok(Event::default().data(text))
}

fn error_event(err: &TranscodingError) -> Event {
    Event::default().event("error").data(err.to_json().to_string())
}

async fn read_body(body: Body, limit: Option<usize>) -> Result<Bytes, TranscodingError> {
    axum::body::to_bytes(body, limit.unwrap_or(usize::MAX))
        .await
        .map_err(|e| {
            let too_large = std::error::Error::source(&e).is_some_and(|source| source.is::<LengthLimitError>());
            if too_large {
                TranscodingError::new_payload_too_large(format!(
                    "request body exceeds {} bytes",
                    limit.unwrap_or(usize::MAX)
                ))
            } else {
                TranscodingError::new_invalid_argument(format!("failed to read request body: {e}"))
            }
        })
}
