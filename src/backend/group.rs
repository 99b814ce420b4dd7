//! Backend groups.
//!
//! A group is a named, ordered list of shared backends. Calls walk the list
//! in order and fall through to the next backend on failure.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::backend::backend::{Backend, BackendError, ForwardContext};
use crate::config::ValidationError;

#[derive(Debug, Clone)]
pub struct BackendGroup {
    name: String,
    backends: Vec<Arc<Backend>>,
}

impl BackendGroup {
    /// Build a group from backend names. Every name must resolve.
    pub fn new(
        name: impl Into<String>,
        members: &[String],
        backends: &BTreeMap<String, Arc<Backend>>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if members.is_empty() {
            return Err(ValidationError::EmptyGroup(name));
        }

        let backends = members
            .iter()
            .map(|member| {
                backends
                    .get(member)
                    .cloned()
                    .ok_or_else(|| ValidationError::UndefinedBackend(member.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { name, backends })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Forward to the first backend that answers.
    pub async fn forward(&self, body: Bytes, ctx: &ForwardContext) -> Result<Bytes, BackendError> {
        let mut last_error = None;
        for backend in &self.backends {
            if !backend.is_online() {
                continue;
            }
            match backend.forward(body.clone(), ctx).await {
                Ok(response) => return Ok(response),
                Err(e @ BackendError::ResponseTooLarge { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        group = %self.name,
                        backend = %backend.name(),
                        error = %e,
                        "Backend failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| BackendError::Offline(self.name.clone())))
    }
}
