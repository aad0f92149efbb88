//! Groups routes under a shared path prefix.

use std::future::Future;

use serde::Serialize;

use crate::context::Context;
use crate::error::Result;
use crate::route::{join_path, Route, RouteDefinition, RouteSchemas};

#[derive(Debug, Clone)]
pub struct Controller {
    prefix: String,
    routes: Vec<Route>,
}

impl Controller {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            routes: Vec::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Declares a route below this controller's prefix.
    pub fn route<F, Fut, R>(
        &mut self,
        definition: impl Into<RouteDefinition>,
        callback: F,
        schemas: RouteSchemas,
    ) -> &Route
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let RouteDefinition { method, path } = definition.into();
        let full_path = join_path(&[&self.prefix, &path]);

        let index = self.routes.len();
        self.routes.push(Route::new(
            RouteDefinition::new(method, full_path),
            callback,
            schemas,
        ));
        &self.routes[index]
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn into_routes(self) -> Vec<Route> {
        self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use axum::http::Method;
    use serde_json::json;

    #[test]
    fn test_routes_are_prefixed() {
        let mut controller = Controller::new("/thing");
        let root = controller
            .route("/", |_ctx| async { Ok::<_, ApiError>(json!([])) }, RouteSchemas::default())
            .id()
            .to_string();
        let update = controller
            .route(
                RouteDefinition::post("/:id/update"),
                |_ctx| async { Ok::<_, ApiError>(json!({})) },
                RouteSchemas::default(),
            )
            .path()
            .to_string();

        assert_eq!(root, "[GET]:[/thing]");
        assert_eq!(update, "/thing/:id/update");
        assert_eq!(controller.routes().len(), 2);
        assert_eq!(controller.routes()[1].method(), &Method::POST);
    }
}
