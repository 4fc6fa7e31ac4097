//! Descriptor fixtures and a scripted channel shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use futures::StreamExt;
use grpc_transcoding_core::HttpRule;
use prost::Message;
use prost_reflect::{
    DescriptorPool, DynamicMessage, MessageDescriptor, MethodDescriptor, ReflectMessage, Value,
};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, MessageOptions, MethodDescriptorProto, OneofDescriptorProto,
    ServiceDescriptorProto,
};
use tonic::Status;
use tonic::metadata::MetadataMap;

use crate::channel::{MessageStream, RpcChannel, StreamingFuture, UnaryFuture};

pub(crate) const SERVICE: &str = "transcoding.Svc";
pub(crate) const OTHER_SERVICE: &str = "transcoding.Other";

fn scalar(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_owned()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

fn typed(name: &str, number: i32, ty: Type, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_owned()),
        ..scalar(name, number, ty)
    }
}

fn repeated(mut field: FieldDescriptorProto) -> FieldDescriptorProto {
    field.label = Some(Label::Repeated as i32);
    field
}

fn in_oneof(mut field: FieldDescriptorProto, index: i32) -> FieldDescriptorProto {
    field.oneof_index = Some(index);
    field
}

fn message_type(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_owned()),
        field: fields,
        ..Default::default()
    }
}

fn rpc(name: &str, input: &str, output: &str) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_owned()),
        input_type: Some(input.to_owned()),
        output_type: Some(output.to_owned()),
        ..Default::default()
    }
}

fn server_streaming(mut method: MethodDescriptorProto) -> MethodDescriptorProto {
    method.server_streaming = Some(true);
    method
}

fn client_streaming(mut method: MethodDescriptorProto) -> MethodDescriptorProto {
    method.client_streaming = Some(true);
    method
}

fn http_proto() -> FileDescriptorProto {
    let rule = message_type(
        "HttpRule",
        vec![
            scalar("selector", 1, Type::String),
            in_oneof(scalar("get", 2, Type::String), 0),
            in_oneof(scalar("put", 3, Type::String), 0),
            in_oneof(scalar("post", 4, Type::String), 0),
            in_oneof(scalar("delete", 5, Type::String), 0),
            in_oneof(scalar("patch", 6, Type::String), 0),
            scalar("body", 7, Type::String),
            in_oneof(
                typed("custom", 8, Type::Message, ".google.api.CustomHttpPattern"),
                0,
            ),
            repeated(typed(
                "additional_bindings",
                11,
                Type::Message,
                ".google.api.HttpRule",
            )),
            scalar("response_body", 12, Type::String),
        ],
    );
    FileDescriptorProto {
        name: Some("google/api/http.proto".to_owned()),
        package: Some("google.api".to_owned()),
        message_type: vec![
            DescriptorProto {
                oneof_decl: vec![OneofDescriptorProto {
                    name: Some("pattern".to_owned()),
                    ..Default::default()
                }],
                ..rule
            },
            message_type(
                "CustomHttpPattern",
                vec![scalar("kind", 1, Type::String), scalar("path", 2, Type::String)],
            ),
        ],
        syntax: Some("proto3".to_owned()),
        ..Default::default()
    }
}

fn annotations_proto() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some("google/api/annotations.proto".to_owned()),
        package: Some("google.api".to_owned()),
        dependency: vec![
            "google/api/http.proto".to_owned(),
            "google/protobuf/descriptor.proto".to_owned(),
        ],
        extension: vec![FieldDescriptorProto {
            extendee: Some(".google.protobuf.MethodOptions".to_owned()),
            ..typed(
                "http",
                grpc_transcoding_core::HTTP_RULE_EXTENSION_NUMBER as i32,
                Type::Message,
                ".google.api.HttpRule",
            )
        }],
        syntax: Some("proto3".to_owned()),
        ..Default::default()
    }
}

fn test_proto() -> FileDescriptorProto {
    let color = EnumDescriptorProto {
        name: Some("Color".to_owned()),
        value: ["COLOR_UNSPECIFIED", "RED", "GREEN"]
            .iter()
            .enumerate()
            .map(|(number, name)| EnumValueDescriptorProto {
                name: Some((*name).to_owned()),
                number: Some(number as i32),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    let labels_entry = DescriptorProto {
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..message_type(
            "LabelsEntry",
            vec![scalar("key", 1, Type::String), scalar("value", 2, Type::String)],
        )
    };

    let scalars = DescriptorProto {
        nested_type: vec![labels_entry],
        ..message_type(
            "Scalars",
            vec![
                scalar("i32", 1, Type::Int32),
                scalar("i64", 2, Type::Int64),
                scalar("u32", 3, Type::Uint32),
                scalar("u64", 4, Type::Uint64),
                scalar("f32", 5, Type::Float),
                scalar("f64", 6, Type::Double),
                scalar("flag", 7, Type::Bool),
                scalar("text", 8, Type::String),
                scalar("data", 9, Type::Bytes),
                typed("color", 10, Type::Enum, ".transcoding.Color"),
                repeated(scalar("tags", 11, Type::String)),
                typed("nested", 12, Type::Message, ".transcoding.Nested"),
                repeated(typed(
                    "labels",
                    13,
                    Type::Message,
                    ".transcoding.Scalars.LabelsEntry",
                )),
                scalar("s32", 14, Type::Sint32),
                scalar("fx64", 15, Type::Fixed64),
                repeated(typed("children", 16, Type::Message, ".transcoding.Nested")),
            ],
        )
    };

    let messages = vec![
        message_type("Deeper", vec![scalar("level", 1, Type::Int32)]),
        message_type(
            "Nested",
            vec![
                scalar("note", 1, Type::String),
                typed("deeper", 2, Type::Message, ".transcoding.Deeper"),
                repeated(scalar("scores", 3, Type::Int32)),
            ],
        ),
        scalars,
        message_type(
            "Item",
            vec![
                scalar("id", 1, Type::String),
                scalar("name", 2, Type::String),
                scalar("shelf", 3, Type::String),
                repeated(scalar("tags", 4, Type::String)),
                typed("color", 5, Type::Enum, ".transcoding.Color"),
            ],
        ),
        message_type(
            "GetItemRequest",
            vec![
                scalar("id", 1, Type::String),
                scalar("shelf", 2, Type::String),
                scalar("filter", 3, Type::String),
            ],
        ),
        message_type(
            "CreateItemRequest",
            vec![
                scalar("parent", 1, Type::String),
                typed("item", 2, Type::Message, ".transcoding.Item"),
            ],
        ),
        message_type(
            "WatchRequest",
            vec![scalar("filter", 1, Type::String), scalar("limit", 2, Type::Int32)],
        ),
        message_type("ValueRequest", vec![scalar("kind", 1, Type::String)]),
    ];

    let svc = ServiceDescriptorProto {
        name: Some("Svc".to_owned()),
        method: vec![
            rpc("GetItem", ".transcoding.GetItemRequest", ".transcoding.Item"),
            rpc("CreateItem", ".transcoding.CreateItemRequest", ".transcoding.Item"),
            rpc("UpdateItem", ".transcoding.Item", ".transcoding.Item"),
            rpc("GetItemName", ".transcoding.GetItemRequest", ".transcoding.Item"),
            rpc("GetItemTags", ".transcoding.GetItemRequest", ".transcoding.Item"),
            rpc("Echo", ".transcoding.Scalars", ".transcoding.Scalars"),
            rpc("EchoBody", ".transcoding.Scalars", ".transcoding.Scalars"),
            rpc("EchoNested", ".transcoding.Scalars", ".transcoding.Scalars"),
            rpc("Method", ".transcoding.Scalars", ".transcoding.Scalars"),
            rpc(
                "Count",
                ".transcoding.GetItemRequest",
                ".google.protobuf.Int64Value",
            ),
            rpc("GetValue", ".transcoding.ValueRequest", ".google.protobuf.Value"),
            server_streaming(rpc("Watch", ".transcoding.WatchRequest", ".transcoding.Item")),
            client_streaming(rpc("Upload", ".transcoding.Item", ".transcoding.Item")),
            server_streaming(client_streaming(rpc(
                "Chat",
                ".transcoding.Item",
                ".transcoding.Item",
            ))),
        ],
        ..Default::default()
    };

    let other = ServiceDescriptorProto {
        name: Some("Other".to_owned()),
        method: vec![rpc("Ping", ".transcoding.GetItemRequest", ".transcoding.Item")],
        ..Default::default()
    };

    FileDescriptorProto {
        name: Some("transcoding/test.proto".to_owned()),
        package: Some("transcoding".to_owned()),
        dependency: vec![
            "google/api/annotations.proto".to_owned(),
            "google/protobuf/wrappers.proto".to_owned(),
            "google/protobuf/struct.proto".to_owned(),
        ],
        message_type: messages,
        enum_type: vec![color],
        service: vec![svc, other],
        syntax: Some("proto3".to_owned()),
        ..Default::default()
    }
}

/// The `google.api.http` options of the test services, by method name.
fn http_rules() -> Vec<(&'static str, HttpRule)> {
    vec![
        (
            "GetItem",
            HttpRule::get("/v1/items/{id}").with_additional_binding(
                HttpRule::get("/v1/shelves/{shelf}/items/{id}")
                    .with_additional_binding(HttpRule::get("/v1/nested/{id}")),
            ),
        ),
        (
            "CreateItem",
            HttpRule::post("/v1/{parent=shelves/*}/items").with_body("item"),
        ),
        ("UpdateItem", HttpRule::patch("/v1/items/{id}").with_body("*")),
        (
            "GetItemName",
            HttpRule::get("/v1/items/{id}/name").with_response_body("name"),
        ),
        (
            "GetItemTags",
            HttpRule::get("/v1/items/{id}/tags").with_response_body("tags"),
        ),
        ("Echo", HttpRule::get("/v1/echo")),
        ("EchoBody", HttpRule::post("/v1/echo").with_body("*")),
        ("EchoNested", HttpRule::put("/v1/echo/nested").with_body("nested")),
        ("Count", HttpRule::get("/v1/count")),
        ("GetValue", HttpRule::get("/v1/values/{kind}")),
        ("Watch", HttpRule::get("/v1/items:watch")),
        ("Upload", HttpRule::post("/v1/items:upload").with_body("*")),
        ("Chat", HttpRule::post("/v1/chat").with_body("*")),
        ("Ping", HttpRule::get("/v1/items/{id}")),
    ]
}

/// Encode `file` with each method's options carrying its `google.api.http`
/// rule, the way protoc writes them.
fn with_http_options(pool: &DescriptorPool, file: &FileDescriptorProto) -> DynamicMessage {
    let extension = pool
        .get_extension_by_name(grpc_transcoding_core::HTTP_RULE_EXTENSION_NAME)
        .unwrap();
    let rule_descriptor = pool.get_message_by_name("google.api.HttpRule").unwrap();
    let options_descriptor = pool
        .get_message_by_name("google.protobuf.MethodOptions")
        .unwrap();
    let rules = http_rules();

    let mut message = DynamicMessage::new(
        pool.get_message_by_name("google.protobuf.FileDescriptorProto")
            .unwrap(),
    );
    message.transcode_from(file).unwrap();

    let services = message.get_field_by_name_mut("service").unwrap();
    for service in services.as_list_mut().unwrap() {
        let service = service.as_message_mut().unwrap();
        let methods = service.get_field_by_name_mut("method").unwrap();
        for method in methods.as_list_mut().unwrap() {
            let method = method.as_message_mut().unwrap();
            let name = method
                .get_field_by_name("name")
                .unwrap()
                .as_str()
                .unwrap()
                .to_owned();
            let Some((_, rule)) = rules.iter().find(|(n, _)| *n == name) else {
                continue;
            };
            let mut rule_message = DynamicMessage::new(rule_descriptor.clone());
            rule_message.transcode_from(rule).unwrap();
            let mut options = DynamicMessage::new(options_descriptor.clone());
            options.set_extension(&extension, Value::Message(rule_message));
            method.set_field_by_name("options", Value::Message(options));
        }
    }
    message
}

fn base_pool() -> DescriptorPool {
    let mut pool = DescriptorPool::global();
    pool.add_file_descriptor_proto(http_proto()).unwrap();
    pool.add_file_descriptor_proto(annotations_proto()).unwrap();
    pool
}

/// The test pool: well-known types, `google.api` annotations and the
/// `transcoding` package with its http options set.
pub(crate) fn pool() -> DescriptorPool {
    static POOL: OnceLock<DescriptorPool> = OnceLock::new();
    POOL.get_or_init(|| {
        let mut pool = base_pool();
        let file = with_http_options(&pool, &test_proto());
        pool.decode_file_descriptor_proto(file.encode_to_vec().as_slice())
            .unwrap();
        pool
    })
    .clone()
}

/// A serialized `FileDescriptorSet` holding everything [`pool`] has.
pub(crate) fn file_descriptor_set() -> Vec<u8> {
    let pool = base_pool();
    let global = DescriptorPool::global();
    let file_descriptor = pool
        .get_message_by_name("google.protobuf.FileDescriptorProto")
        .unwrap();

    let mut files: Vec<Value> = [
        "google/protobuf/descriptor.proto",
        "google/protobuf/wrappers.proto",
        "google/protobuf/struct.proto",
    ]
    .iter()
    .map(|name| global.get_file_by_name(name).unwrap().file_descriptor_proto().clone())
    .chain([http_proto(), annotations_proto()])
    .map(|file| {
        let mut message = DynamicMessage::new(file_descriptor.clone());
        message.transcode_from(&file).unwrap();
        Value::Message(message)
    })
    .collect();
    files.push(Value::Message(with_http_options(&pool, &test_proto())));

    let mut set = DynamicMessage::new(
        pool.get_message_by_name("google.protobuf.FileDescriptorSet")
            .unwrap(),
    );
    set.set_field_by_name("file", Value::List(files));
    set.encode_to_vec()
}

pub(crate) fn registry() -> crate::ServiceRegistry {
    crate::ServiceRegistry::new(pool())
}

pub(crate) fn descriptor(name: &str) -> MessageDescriptor {
    pool().get_message_by_name(name).unwrap()
}

pub(crate) fn message(name: &str) -> DynamicMessage {
    DynamicMessage::new(descriptor(name))
}

/// A method of `transcoding.Svc`.
pub(crate) fn method(name: &str) -> MethodDescriptor {
    pool()
        .get_service_by_name(SERVICE)
        .unwrap()
        .methods()
        .find(|method| method.name() == name)
        .unwrap()
}

pub(crate) fn item(id: &str) -> DynamicMessage {
    let mut item = message("transcoding.Item");
    item.set_field_by_name("id", Value::String(id.to_owned()));
    item
}

type UnaryReply =
    Arc<dyn Fn(&MethodDescriptor, DynamicMessage) -> Result<tonic::Response<DynamicMessage>, Status> + Send + Sync>;
type StreamReply =
    Arc<dyn Fn(&MethodDescriptor, DynamicMessage) -> Result<tonic::Response<MessageStream>, Status> + Send + Sync>;

/// What the mock saw for one call.
#[derive(Clone, Debug)]
pub(crate) struct RecordedCall {
    pub(crate) method: String,
    pub(crate) message: DynamicMessage,
    pub(crate) metadata: MetadataMap,
}

/// An [`RpcChannel`] with scripted replies that records every call.
#[derive(Clone)]
pub(crate) struct MockChannel {
    unary: UnaryReply,
    streaming: StreamReply,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockChannel {
    /// Replies with the request when the output type matches, otherwise with
    /// an empty output message. Streams send three items.
    pub(crate) fn echo() -> Self {
        Self {
            unary: Arc::new(|method: &MethodDescriptor, message: DynamicMessage| {
                let reply = if message.descriptor() == method.output() {
                    message
                } else {
                    DynamicMessage::new(method.output())
                };
                Ok(tonic::Response::new(reply))
            }),
            streaming: Arc::new(|_: &MethodDescriptor, _: DynamicMessage| {
                Ok(tonic::Response::new(items_stream(&["1", "2", "3"])))
            }),
            delay: None,
            calls: Arc::default(),
        }
    }

    pub(crate) fn with_unary<F>(reply: F) -> Self
    where
        F: Fn(&MethodDescriptor, DynamicMessage) -> Result<tonic::Response<DynamicMessage>, Status>
            + Send
            + Sync
            + 'static,
    {
        Self {
            unary: Arc::new(reply),
            ..Self::echo()
        }
    }

    pub(crate) fn with_streaming<F>(reply: F) -> Self
    where
        F: Fn(&MethodDescriptor, DynamicMessage) -> Result<tonic::Response<MessageStream>, Status>
            + Send
            + Sync
            + 'static,
    {
        Self {
            streaming: Arc::new(reply),
            ..Self::echo()
        }
    }

    /// Streams one item per id.
    pub(crate) fn items(ids: &[&str]) -> Self {
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        Self::with_streaming(move |_, _| {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            Ok(tonic::Response::new(items_stream(&ids)))
        })
    }

    /// Streams items every few milliseconds until dropped.
    pub(crate) fn streaming_forever() -> Self {
        Self::with_streaming(|_, _| {
            let stream = async_stream::stream! {
                let mut n = 0u32;
                loop {
                    yield Ok::<_, Status>(item(&n.to_string()));
                    n += 1;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            };
            Ok(tonic::Response::new(stream.boxed()))
        })
    }

    /// Streams `1`, `2`, `3` with a pause between items and sets the
    /// returned flag when the stream is dropped.
    pub(crate) fn slow_items() -> (Self, Arc<AtomicBool>) {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();
        let channel = Self::with_streaming(move |_, _| {
            let guard = DropFlag(flag.clone());
            let stream = async_stream::stream! {
                let _guard = guard;
                for id in ["1", "2", "3"] {
                    yield Ok::<_, Status>(item(id));
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            };
            Ok(tonic::Response::new(stream.boxed()))
        });
        (channel, dropped)
    }

    /// Every call fails with `status`.
    pub(crate) fn failing(status: Status) -> Self {
        let unary_status = status.clone();
        Self {
            unary: Arc::new(move |_: &MethodDescriptor, _: DynamicMessage| {
                Err(unary_status.clone())
            }),
            streaming: Arc::new(move |_: &MethodDescriptor, _: DynamicMessage| {
                Err(status.clone())
            }),
            delay: None,
            calls: Arc::default(),
        }
    }

    /// Delay unary replies.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn last_call(&self) -> RecordedCall {
        self.calls().pop().expect("no call recorded")
    }

    fn record(&self, method: &MethodDescriptor, request: tonic::Request<DynamicMessage>) -> DynamicMessage {
        let (metadata, _, message) = request.into_parts();
        self.calls.lock().unwrap().push(RecordedCall {
            method: method.full_name().to_owned(),
            message: message.clone(),
            metadata,
        });
        message
    }
}

/// Streams one item per id.
pub(crate) fn items_stream(ids: &[&str]) -> MessageStream {
    let items: Vec<Result<DynamicMessage, Status>> = ids.iter().map(|id| Ok(item(id))).collect();
    futures::stream::iter(items).boxed()
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl RpcChannel for MockChannel {
    fn unary(
        &self,
        method: &MethodDescriptor,
        request: tonic::Request<DynamicMessage>,
    ) -> UnaryFuture {
        let message = self.record(method, request);
        let reply = (self.unary)(method, message);
        let delay = self.delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            reply
        })
    }

    fn server_streaming(
        &self,
        method: &MethodDescriptor,
        request: tonic::Request<DynamicMessage>,
    ) -> StreamingFuture {
        let message = self.record(method, request);
        let reply = (self.streaming)(method, message);
        Box::pin(async move { reply })
    }
}
