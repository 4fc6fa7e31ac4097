//! Outbound RPC channel abstraction.
//!
//! The gateway talks to the backing service through [`RpcChannel`], which
//! carries [`DynamicMessage`]s so no generated code is needed.
//! [`GrpcChannel`] implements it over a tonic transport channel and
//! [`ManagedChannel`] wraps any channel with in-flight tracking and a bounded
//! graceful shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use http::uri::PathAndQuery;
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use tokio::sync::{Notify, watch};
use tonic::Status;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::{Channel, Endpoint};

/// Stream of response messages from a server streaming call.
pub type MessageStream = BoxStream<'static, Result<DynamicMessage, Status>>;

pub type UnaryFuture = BoxFuture<'static, Result<tonic::Response<DynamicMessage>, Status>>;

pub type StreamingFuture = BoxFuture<'static, Result<tonic::Response<MessageStream>, Status>>;

/// Issues RPC calls with dynamic messages.
///
/// Response metadata must include trailers for unary calls; tonic merges
/// them into the response metadata on its own.
pub trait RpcChannel: Send + Sync + 'static {
    fn unary(&self, method: &MethodDescriptor, request: tonic::Request<DynamicMessage>)
    -> UnaryFuture;

    /// Dropping the returned stream cancels the call.
    fn server_streaming(
        &self,
        method: &MethodDescriptor,
        request: tonic::Request<DynamicMessage>,
    ) -> StreamingFuture;
}

impl<T: RpcChannel + ?Sized> RpcChannel for Arc<T> {
    fn unary(
        &self,
        method: &MethodDescriptor,
        request: tonic::Request<DynamicMessage>,
    ) -> UnaryFuture {
        (**self).unary(method, request)
    }

    fn server_streaming(
        &self,
        method: &MethodDescriptor,
        request: tonic::Request<DynamicMessage>,
    ) -> StreamingFuture {
        (**self).server_streaming(method, request)
    }
}

/// [`RpcChannel`] over a tonic transport [`Channel`].
#[derive(Clone, Debug)]
pub struct GrpcChannel {
    inner: Channel,
}

impl GrpcChannel {
    pub fn new(channel: Channel) -> Self {
        Self { inner: channel }
    }

    /// Create a channel to `uri` that connects on first use.
    pub fn connect_lazy(uri: impl Into<String>) -> Result<Self, tonic::transport::Error> {
        let endpoint = Endpoint::from_shared(uri.into())?;
        Ok(Self::new(endpoint.connect_lazy()))
    }

    async fn ready(&self) -> Result<tonic::client::Grpc<Channel>, Status> {
        let mut grpc = tonic::client::Grpc::new(self.inner.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {e}")))?;
        Ok(grpc)
    }
}

fn rpc_path(method: &MethodDescriptor) -> Result<PathAndQuery, Status> {
    format!("/{}/{}", method.parent_service().full_name(), method.name())
        .parse()
        .map_err(|e| Status::internal(format!("invalid rpc path for {}: {e}", method.full_name())))
}

impl RpcChannel for GrpcChannel {
    fn unary(
        &self,
        method: &MethodDescriptor,
        request: tonic::Request<DynamicMessage>,
    ) -> UnaryFuture {
        let this = self.clone();
        let method = method.clone();
        Box::pin(async move {
            let path = rpc_path(&method)?;
            let mut grpc = this.ready().await?;
            grpc.unary(request, path, DynamicCodec::new(method.output()))
                .await
        })
    }

    fn server_streaming(
        &self,
        method: &MethodDescriptor,
        request: tonic::Request<DynamicMessage>,
    ) -> StreamingFuture {
        let this = self.clone();
        let method = method.clone();
        Box::pin(async move {
            let path = rpc_path(&method)?;
            let mut grpc = this.ready().await?;
            let response = grpc
                .server_streaming(request, path, DynamicCodec::new(method.output()))
                .await?;
            Ok(response.map(|stream| stream.boxed()))
        })
    }
}

/// Protobuf codec for [`DynamicMessage`]; decodes into `response`.
#[derive(Clone, Debug)]
pub struct DynamicCodec {
    response: MessageDescriptor,
}

impl DynamicCodec {
    pub fn new(response: MessageDescriptor) -> Self {
        Self { response }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder(self.response.clone())
    }
}

#[derive(Debug)]
pub struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| Status::internal(format!("failed to encode request: {e}")))
    }
}

#[derive(Debug)]
pub struct DynamicDecoder(MessageDescriptor);

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        DynamicMessage::decode(self.0.clone(), src)
            .map(Some)
            .map_err(|e| Status::internal(format!("failed to decode response: {e}")))
    }
}

#[derive(Debug)]
struct ChannelState {
    closed: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    terminate: watch::Sender<bool>,
}

/// Counts one call as in flight until dropped.
#[derive(Debug)]
struct InFlight(Arc<ChannelState>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_one();
        }
    }
}

/// Resolves once the channel is force-terminated.
async fn terminated(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn terminated_status() -> Status {
    Status::cancelled("channel terminated during shutdown")
}

/// An [`RpcChannel`] with shutdown support.
///
/// After [`shutdown`](Self::shutdown) starts, new calls fail with
/// `UNAVAILABLE`. Calls already running get the grace period, then are
/// cancelled.
#[derive(Clone)]
pub struct ManagedChannel {
    inner: Arc<dyn RpcChannel>,
    state: Arc<ChannelState>,
}

impl std::fmt::Debug for ManagedChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedChannel")
            .field("closed", &self.is_closed())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl ManagedChannel {
    pub fn new<C: RpcChannel>(channel: C) -> Self {
        Self::from_arc(Arc::new(channel))
    }

    pub fn from_arc(channel: Arc<dyn RpcChannel>) -> Self {
        let (terminate, _) = watch::channel(false);
        Self {
            inner: channel,
            state: Arc::new(ChannelState {
                closed: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                terminate,
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    /// Number of calls currently running, streams included.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }

    fn enter(&self) -> Result<InFlight, Status> {
        // increment first so shutdown never misses a call that got past the check
        self.state.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(self.state.clone());
        if self.is_closed() {
            return Err(Status::unavailable("channel is shutting down"));
        }
        Ok(guard)
    }

    /// Stop accepting calls and wait up to `timeout` for running ones.
    ///
    /// Returns `false` if calls had to be cancelled.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.state.closed.store(true, Ordering::Release);

        let drained = tokio::time::timeout(timeout, async {
            while self.in_flight() > 0 {
                self.state.idle.notified().await;
            }
        })
        .await
        .is_ok();

        if drained {
            tracing::debug!("channel drained");
        } else {
            tracing::warn!(
                in_flight = self.in_flight(),
                timeout = ?timeout,
                "calls still running after shutdown timeout, terminating"
            );
            self.state.terminate.send_replace(true);
        }
        drained
    }
}

impl RpcChannel for ManagedChannel {
    fn unary(
        &self,
        method: &MethodDescriptor,
        request: tonic::Request<DynamicMessage>,
    ) -> UnaryFuture {
        let guard = match self.enter() {
            Ok(guard) => guard,
            Err(status) => return Box::pin(async move { Err(status) }),
        };
        let call = self.inner.unary(method, request);
        let rx = self.state.terminate.subscribe();
        Box::pin(async move {
            let _guard = guard;
            tokio::select! {
                result = call => result,
                _ = terminated(rx) => Err(terminated_status()),
            }
        })
    }

    fn server_streaming(
        &self,
        method: &MethodDescriptor,
        request: tonic::Request<DynamicMessage>,
    ) -> StreamingFuture {
        let guard = match self.enter() {
            Ok(guard) => guard,
            Err(status) => return Box::pin(async move { Err(status) }),
        };
        let call = self.inner.server_streaming(method, request);
        let rx = self.state.terminate.subscribe();
        Box::pin(async move {
            let response = tokio::select! {
                result = call => result?,
                _ = terminated(rx.clone()) => return Err(terminated_status()),
            };
            let (metadata, mut inner, extensions) = response.into_parts();
            let stream = async_stream::stream! {
                let _guard = guard;
                let terminated = terminated(rx);
                tokio::pin!(terminated);
                loop {
                    tokio::select! {
                        biased;
                        _ = &mut terminated => {
                            yield Err(terminated_status());
                            break;
                        }
                        item = inner.next() => match item {
                            Some(item) => yield item,
                            None => break,
                        },
                    }
                }
            };
            Ok(tonic::Response::from_parts(
                metadata,
                stream.boxed(),
                extensions,
            ))
        })
    }
}
