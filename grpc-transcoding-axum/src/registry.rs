//! The set of services the gateway exposes.

use grpc_transcoding_core::{HTTP_RULE_EXTENSION_NAME, HttpRule};
use prost_reflect::{DescriptorPool, MethodDescriptor, ServiceDescriptor, Value};

use crate::error::BuildError;

/// Services resolved once at startup, in registration order.
#[derive(Clone, Debug)]
pub struct ServiceRegistry {
    pool: DescriptorPool,
    services: Vec<ServiceDescriptor>,
}

impl ServiceRegistry {
    /// Register every service in `pool`, in file order.
    pub fn new(pool: DescriptorPool) -> Self {
        let services = pool.services().collect();
        Self { pool, services }
    }

    /// Decode a serialized `FileDescriptorSet` (as written by `protoc
    /// --descriptor_set_out`) and register all of its services.
    pub fn from_file_descriptor_set(bytes: &[u8]) -> Result<Self, BuildError> {
        let pool = DescriptorPool::decode(bytes)?;
        Ok(Self::new(pool))
    }

    /// Register only the named services, in the order given.
    pub fn with_services<I, S>(pool: DescriptorPool, names: I) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let services = names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                pool.get_service_by_name(name)
                    .ok_or_else(|| BuildError::UnknownService(name.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { pool, services })
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    /// Read the `google.api.http` option of `method`.
    ///
    /// Returns `None` when the pool does not know the extension or the method
    /// does not set it.
    pub fn http_rule(&self, method: &MethodDescriptor) -> Option<HttpRule> {
        let extension = self.pool.get_extension_by_name(HTTP_RULE_EXTENSION_NAME)?;
        let options = method.options();
        if !options.has_extension(&extension) {
            return None;
        }
        match options.get_extension(&extension).as_ref() {
            Value::Message(rule) => match rule.transcode_to::<HttpRule>() {
                Ok(rule) => Some(rule),
                Err(err) => {
                    tracing::warn!(
                        method = method.full_name(),
                        error = %err,
                        "malformed google.api.http option ignored"
                    );
                    None
                }
            },
            _ => None,
        }
    }
}
