//! The things API: a small to-do collection served through the router.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use validator::{Validate, ValidationError};

use crate::context::Context;
use crate::controller::Controller;
use crate::error::{ApiError, Result};
use crate::route::{RouteDefinition, RouteSchemas};
use crate::validation::{Validated, ValidationTarget};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    pub id: u64,
    #[serde(with = "humantime_serde")]
    pub created_at: SystemTime,
    #[serde(with = "humantime_serde")]
    pub updated_at: SystemTime,
    pub content: String,
    pub is_done: bool,
    #[serde(with = "humantime_serde")]
    pub done_date: Option<SystemTime>,
    pub due_date: Option<String>,
    pub assigned_to_id: Option<u64>,
}

/// Response shape of the list route: a bare JSON array of things.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(transparent)]
pub struct ThingList {
    pub things: Vec<Thing>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateThing {
    #[validate(length(min = 2))]
    pub content: String,
    #[serde(deserialize_with = "Option::deserialize")]
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DoneThing {
    pub is_done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssignThing {
    pub person_id: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ListSearch {
    #[validate(custom(function = "validate_bool_flag"))]
    pub is_done: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ThingParams {
    #[validate(custom(function = "validate_thing_id"))]
    pub id: String,
}

fn validate_thing_id(id: &str) -> std::result::Result<(), ValidationError> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) || id.parse::<u64>().is_err() {
        return Err(ValidationError::new("numeric"));
    }
    Ok(())
}

fn validate_bool_flag(value: &str) -> std::result::Result<(), ValidationError> {
    match value {
        "true" | "false" => Ok(()),
        _ => Err(ValidationError::new("boolean")),
    }
}

fn not_found() -> ApiError {
    ApiError::domain("thing.notFound", StatusCode::NOT_FOUND)
}

/// Storage and business rules behind the things routes.
#[async_trait]
pub trait ThingService: Send + Sync {
    async fn list(&self, is_done: Option<bool>) -> Result<Vec<Thing>>;
    async fn create(&self, data: CreateThing) -> Result<Thing>;
    async fn update(&self, id: u64, data: CreateThing) -> Result<Thing>;
    async fn remove(&self, id: u64) -> Result<Thing>;
    async fn done(&self, id: u64, is_done: bool) -> Result<Thing>;
    async fn assign(&self, id: u64, person_id: u64) -> Result<Thing>;
}

#[derive(Debug, Default)]
pub struct InMemoryThingService {
    things: RwLock<BTreeMap<u64, Thing>>,
    next_id: AtomicU64,
}

impl InMemoryThingService {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, id: u64, f: F) -> Result<Thing>
    where
        F: FnOnce(&mut Thing) + Send,
    {
        let mut things = self.things.write().await;
        let thing = things.get_mut(&id).ok_or_else(not_found)?;
        f(thing);
        thing.updated_at = SystemTime::now();
        Ok(thing.clone())
    }
}

#[async_trait]
impl ThingService for InMemoryThingService {
    async fn list(&self, is_done: Option<bool>) -> Result<Vec<Thing>> {
        let things = self.things.read().await;
        Ok(things
            .values()
            .filter(|thing| is_done.map_or(true, |wanted| thing.is_done == wanted))
            .cloned()
            .collect())
    }

    async fn create(&self, data: CreateThing) -> Result<Thing> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = SystemTime::now();
        let thing = Thing {
            id,
            created_at: now,
            updated_at: now,
            content: data.content,
            is_done: false,
            done_date: None,
            due_date: data.due_date,
            assigned_to_id: None,
        };

        self.things.write().await.insert(id, thing.clone());
        tracing::debug!(thing_id = id, "Created thing");
        Ok(thing)
    }

    async fn update(&self, id: u64, data: CreateThing) -> Result<Thing> {
        self.modify(id, move |thing| {
            thing.content = data.content;
            thing.due_date = data.due_date;
        })
        .await
    }

    async fn remove(&self, id: u64) -> Result<Thing> {
        self.things.write().await.remove(&id).ok_or_else(not_found)
    }

    async fn done(&self, id: u64, is_done: bool) -> Result<Thing> {
        self.modify(id, move |thing| {
            thing.is_done = is_done;
            thing.done_date = is_done.then(SystemTime::now);
        })
        .await
    }

    async fn assign(&self, id: u64, person_id: u64) -> Result<Thing> {
        self.modify(id, move |thing| thing.assigned_to_id = Some(person_id))
            .await
    }
}

/// Registers the things routes under `/thing`.
pub fn thing_controller(service: Arc<dyn ThingService>) -> Controller {
    let mut controller = Controller::new("/thing");
    let by_id = || RouteSchemas::new().params(Validated::<ThingParams>::shared());
    let thing_response = Validated::<Thing>::shared;

    let svc = service.clone();
    controller.route(
        "/",
        move |ctx| list(svc.clone(), ctx),
        RouteSchemas::new()
            .search(Validated::<ListSearch>::shared())
            .response(Validated::<ThingList>::shared()),
    );

    let svc = service.clone();
    controller.route(
        RouteDefinition::post("/"),
        move |ctx| create(svc.clone(), ctx),
        RouteSchemas::new()
            .body(Validated::<CreateThing>::shared())
            .response(thing_response()),
    );

    let svc = service.clone();
    controller.route(
        RouteDefinition::post("/:id/update"),
        move |ctx| update(svc.clone(), ctx),
        by_id()
            .body(Validated::<CreateThing>::shared())
            .response(thing_response()),
    );

    let svc = service.clone();
    controller.route(
        RouteDefinition::post("/:id/remove"),
        move |ctx| remove(svc.clone(), ctx),
        by_id(),
    );

    let svc = service.clone();
    controller.route(
        RouteDefinition::post("/:id/done"),
        move |ctx| done(svc.clone(), ctx),
        by_id()
            .body(Validated::<DoneThing>::shared())
            .response(thing_response()),
    );

    let svc = service;
    controller.route(
        RouteDefinition::post("/:id/assign"),
        move |ctx| assign(svc.clone(), ctx),
        by_id()
            .body(Validated::<AssignThing>::shared())
            .response(thing_response()),
    );

    controller
}

fn thing_id(ctx: &Context) -> Result<u64> {
    let params: ThingParams = ctx.params_as()?;
    params
        .id
        .parse()
        .map_err(|_| ApiError::validation(ValidationTarget::Params, "id: numeric"))
}

async fn list(service: Arc<dyn ThingService>, ctx: Context) -> Result<Vec<Thing>> {
    let search: ListSearch = ctx.search_as()?;
    service.list(search.is_done.map(|flag| flag == "true")).await
}

async fn create(service: Arc<dyn ThingService>, ctx: Context) -> Result<Thing> {
    let body: CreateThing = ctx.body_as().await?;
    service.create(body).await
}

async fn update(service: Arc<dyn ThingService>, ctx: Context) -> Result<Thing> {
    let id = thing_id(&ctx)?;
    let body: CreateThing = ctx.body_as().await?;
    service.update(id, body).await
}

async fn remove(service: Arc<dyn ThingService>, ctx: Context) -> Result<Thing> {
    let id = thing_id(&ctx)?;
    service.remove(id).await
}

async fn done(service: Arc<dyn ThingService>, ctx: Context) -> Result<Thing> {
    let id = thing_id(&ctx)?;
    let body: DoneThing = ctx.body_as().await?;
    service.done(id, body.is_done).await
}

async fn assign(service: Arc<dyn ThingService>, ctx: Context) -> Result<Thing> {
    let id = thing_id(&ctx)?;
    let body: AssignThing = ctx.body_as().await?;
    service.assign(id, body.person_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_data(content: &str) -> CreateThing {
        CreateThing {
            content: content.to_string(),
            due_date: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let service = InMemoryThingService::new();
        let first = service.create(create_data("buy milk")).await.unwrap();
        let second = service.create(create_data("walk dog")).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(service.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_done_filters_list() {
        let service = InMemoryThingService::new();
        let thing = service.create(create_data("buy milk")).await.unwrap();
        service.create(create_data("walk dog")).await.unwrap();

        let done = service.done(thing.id, true).await.unwrap();
        assert!(done.is_done);
        assert!(done.done_date.is_some());

        let finished = service.list(Some(true)).await.unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id, thing.id);
        assert_eq!(service.list(Some(false)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_id_is_domain_not_found() {
        let service = InMemoryThingService::new();
        let err = service.assign(99, 1).await.unwrap_err();

        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "thing.notFound");
    }

    #[tokio::test]
    async fn test_remove_then_update_fails() {
        let service = InMemoryThingService::new();
        let thing = service.create(create_data("buy milk")).await.unwrap();

        assert_eq!(service.remove(thing.id).await.unwrap().id, thing.id);
        assert!(service.update(thing.id, create_data("buy oat milk")).await.is_err());
    }

    #[test]
    fn test_thing_id_validation() {
        assert!(validate_thing_id("42").is_ok());
        assert!(validate_thing_id("").is_err());
        assert!(validate_thing_id("4a").is_err());
        assert!(validate_thing_id("-1").is_err());
    }

    #[test]
    fn test_thing_serializes_camel_case() {
        let thing = Thing {
            id: 1,
            created_at: SystemTime::UNIX_EPOCH,
            updated_at: SystemTime::UNIX_EPOCH,
            content: "buy milk".to_string(),
            is_done: false,
            done_date: None,
            due_date: None,
            assigned_to_id: Some(3),
        };

        let value = serde_json::to_value(&thing).unwrap();
        assert_eq!(value["createdAt"], "1970-01-01T00:00:00Z");
        assert_eq!(value["assignedToId"], 3);
        assert_eq!(value["doneDate"], serde_json::Value::Null);
    }

    #[test]
    fn test_controller_registers_all_routes() {
        let controller = thing_controller(Arc::new(InMemoryThingService::new()));
        let ids: Vec<&str> = controller.routes().iter().map(|r| r.id()).collect();

        assert_eq!(
            ids,
            vec![
                "[GET]:[/thing]",
                "[POST]:[/thing]",
                "[POST]:[/thing/:id/update]",
                "[POST]:[/thing/:id/remove]",
                "[POST]:[/thing/:id/done]",
                "[POST]:[/thing/:id/assign]",
            ]
        );
    }

    #[tokio::test]
    async fn test_list_response_is_validated_array() {
        use crate::request::Request;
        use axum::http::{Method, Uri};

        let service = Arc::new(InMemoryThingService::new());
        service.create(create_data("buy milk")).await.unwrap();
        let controller = thing_controller(service);
        let route = &controller.routes()[0];

        let request = Arc::new(Request::new(Method::GET, Uri::from_static("/thing?isDone=false")));
        let ctx = Context::new(request, route.path(), route.schemas());
        let response = (route.endpoint())(ctx).await.unwrap();

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        let things = body.as_array().unwrap();
        assert_eq!(things.len(), 1);
        assert_eq!(things[0]["content"], "buy milk");
        assert_eq!(things[0]["isDone"], false);
    }
}
