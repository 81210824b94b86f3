//! Route table built over the template engine
//!
//! A [`Router`] is a flat list of `(compiled-template-string, resource
//! handler, user data)` tuples, built once during server startup and
//! read-only for the rest of the process's life — no lock is needed to
//! read it, matching the "built once at registration; read-only during
//! serving" policy for the routes table.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;

use crate::error::RuntimeError;
use crate::handler::ResourceHandler;
use crate::template::{self, ParamBinding};

/// One registered route: the template it was registered under, the
/// handler it dispatches to, and opaque user data carried alongside it.
pub struct Route {
    pub template: String,
    pub handler: Arc<dyn ResourceHandler>,
    pub user_data: Option<Value>,
}

/// A routes table. Populate it with [`Router::register`] during
/// startup, then share it (typically behind an `Arc`) with every
/// transport; after startup it is never mutated again.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Router { routes: Vec::new() }
    }

    /// Register a resource template. Fails if the template does not
    /// compile; does not check for ambiguity with existing routes
    /// (iteration order is unspecified and the first match wins, so an
    /// ambiguous registration is a configuration error the caller
    /// should have avoided, not one this type detects).
    pub fn register(
        &mut self,
        uri_template: &str,
        handler: Arc<dyn ResourceHandler>,
        user_data: Option<Value>,
    ) -> Result<(), RuntimeError> {
        // Compile eagerly so a malformed template fails at registration
        // time rather than on the first matching request.
        template::validate_template(uri_template)?;

        self.routes.push(Route {
            template: uri_template.to_string(),
            handler,
            user_data,
        });
        Ok(())
    }

    /// Walk the routes table and return the first route whose template
    /// matches `uri`, along with the extracted parameter binding.
    pub fn dispatch(&self, uri: &str) -> Result<(&Route, ParamBinding), RuntimeError> {
        for route in &self.routes {
            if let Ok(binding) = template::template_extract(uri, &route.template) {
                return Ok((route, binding));
            }
        }
        Err(RuntimeError::ResourceNotFound(uri.to_string()))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
