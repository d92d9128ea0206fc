//! `<invoke type="scxml">` support.
//!
//! An invoked chart runs as a child session of the same runtime. Its
//! cancellation token is a child of the parent's, so cancelling the parent
//! cancels every session below it.

use crate::loader::{chart_from_content, is_chart_path, load_chart};
use crate::queue::QueueSender;
use crate::registry::ParentLink;
use crate::runtime::{RuntimeInner, SpawnOptions};
use crate::session::Start;
use rstchart_core::model::Chart;
use rstchart_core::{
    is_scxml_invoke, Event, InvokeActivator, InvokeError, InvokeRequest, InvokedService,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

pub struct ChartInvoker {
    runtime: Weak<RuntimeInner>,
    grace: Duration,
}

impl ChartInvoker {
    pub(crate) fn new(runtime: Weak<RuntimeInner>, grace: Duration) -> Self {
        Self { runtime, grace }
    }

    fn resolve(&self, runtime: &RuntimeInner, request: &InvokeRequest) -> Result<Arc<Chart>, InvokeError> {
        let start_failed = |reason: String| InvokeError::Start { reason };

        if let Some(content) = &request.content {
            return chart_from_content(content)
                .map(Arc::new)
                .map_err(|e| start_failed(e.to_string()));
        }

        let src = request.src.as_deref().ok_or_else(|| {
            start_failed("invoke has neither src nor content".to_string())
        })?;

        if let Some(chart) = runtime.chart(src) {
            return Ok(chart);
        }
        if is_chart_path(src) {
            return load_chart(src).map(Arc::new).map_err(|e| match e {
                crate::loader::LoadError::Io { .. } => InvokeError::SourceNotFound {
                    src: src.to_string(),
                },
                other => start_failed(other.to_string()),
            });
        }

        Err(InvokeError::SourceNotFound {
            src: src.to_string(),
        })
    }
}

impl InvokeActivator for ChartInvoker {
    fn supports(&self, invoke_type: &str) -> bool {
        is_scxml_invoke(invoke_type)
    }

    fn start(&self, request: InvokeRequest) -> Result<Box<dyn InvokedService>, InvokeError> {
        if !self.supports(&request.invoke_type) {
            return Err(InvokeError::UnsupportedType {
                invoke_type: request.invoke_type,
            });
        }
        let runtime = self.runtime.upgrade().ok_or_else(|| InvokeError::Start {
            reason: "runtime is shut down".to_string(),
        })?;
        let chart = self.resolve(&runtime, &request)?;

        let cancel = runtime.child_token(&request.parent_session);
        let options = SpawnOptions {
            session_id: Some(format!("{}-{}", request.invoke_id, uuid::Uuid::new_v4())),
            initial_data: request.params.clone(),
        };
        let parent = ParentLink {
            session_id: request.parent_session.clone(),
            invoke_id: request.invoke_id.clone(),
        };

        let handle = runtime
            .start_session(chart, options, Some(parent), cancel, Start::Fresh, false)
            .map_err(|e| InvokeError::Start {
                reason: e.to_string(),
            })?;

        tracing::debug!(
            "Started invoked session (parent={}, invoke={}, child={})",
            request.parent_session,
            request.invoke_id,
            handle.id()
        );

        Ok(Box::new(ChildSession {
            invoke_id: request.invoke_id,
            sender: handle.sender(),
            cancel: handle.cancel_token(),
            abort: handle.abort_handle(),
            grace: self.grace,
        }))
    }
}

/// The parent's handle on an invoked child session.
struct ChildSession {
    invoke_id: String,
    sender: QueueSender,
    cancel: CancellationToken,
    abort: AbortHandle,
    grace: Duration,
}

impl InvokedService for ChildSession {
    fn send(&self, event: Event) -> Result<(), InvokeError> {
        self.sender
            .try_send(event)
            .map_err(|_| InvokeError::Gone {
                invoke_id: self.invoke_id.clone(),
            })
    }

    fn cancel(&self) {
        self.cancel.cancel();

        let abort = self.abort.clone();
        let grace = self.grace;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    abort.abort();
                });
            }
            Err(_) => abort.abort(),
        }
    }
}
