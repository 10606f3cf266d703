//! Mounts compiled operations on an axum [`Router`].

use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::routing::{MethodFilter, MethodRouter};
use gob_core::OperationDescriptor;
use gob_core::graphql::path_template::to_axum_route;
use gob_core::openapi::components::SchemaComponents;
use gob_core::openapi::operation::HttpMethod;
use gob_core::openapi::spec::OpenApiSpec;
use gob_core::transform::operations_from_document;
use indexmap::IndexMap;
use log::info;

use crate::BridgeConfig;
use crate::error::MountError;
use crate::executor::Executor;
use crate::handler::OperationHandler;

fn method_filter(method: HttpMethod) -> MethodFilter {
    match method {
        HttpMethod::Get => MethodFilter::GET,
        HttpMethod::Post => MethodFilter::POST,
        HttpMethod::Put => MethodFilter::PUT,
        HttpMethod::Delete => MethodFilter::DELETE,
        HttpMethod::Patch => MethodFilter::PATCH,
    }
}

/// Build a router serving every operation through `executor`.
///
/// Operations sharing a path end up on one route with a method router per
/// operation. Path variables are extracted with axum's `{name}` captures.
pub fn bridge_router<E>(
    operations: &[OperationDescriptor],
    components: &SchemaComponents,
    executor: E,
    config: BridgeConfig,
) -> Result<Router, MountError>
where
    E: Executor + 'static,
{
    let executor: Arc<dyn Executor> = Arc::new(executor);
    let mut routes: IndexMap<String, Vec<(HttpMethod, Arc<OperationHandler>)>> = IndexMap::new();

    for descriptor in operations {
        let handler = OperationHandler::new(
            descriptor.clone(),
            components,
            Arc::clone(&executor),
            config.clone(),
        )
        .map_err(|source| MountError::Schemas {
            operation: descriptor.name().to_string(),
            source,
        })?;
        routes
            .entry(to_axum_route(descriptor.path()))
            .or_default()
            .push((descriptor.method(), Arc::new(handler)));
    }

    let mut router = Router::new();
    for (route, handlers) in routes {
        let mut methods = MethodRouter::new();
        for (method, handler) in handlers {
            info!(
                "mounting `{}` on {} {route}",
                handler.descriptor().name(),
                method.as_str()
            );
            methods = methods.on(method_filter(method), move |request: Request| {
                let handler = Arc::clone(&handler);
                async move { handler.handle(request).await }
            });
        }
        router = router.route(&route, methods);
    }
    Ok(router)
}

/// Build a router from a document written by the compiler. The document must
/// still carry its `x-graphql-*` annotations.
pub fn bridge_router_from_document<E>(
    document: &OpenApiSpec,
    executor: E,
    config: BridgeConfig,
) -> Result<Router, MountError>
where
    E: Executor + 'static,
{
    let operations = operations_from_document(document)?;
    let components = document
        .components
        .as_ref()
        .map(|components| components.schemas.clone())
        .unwrap_or_default();
    bridge_router(&operations, &components, executor, config)
}
