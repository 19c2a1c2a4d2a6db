//! Method registration for the sample models.

use std::sync::Arc;

use http::Method;
use modkit_entity::alias;
use modkit_entity::schema::ITEMS;
use modkit_entity::{
    Api, ApiError, Message, MessageMethod, QueryMethod, Record, RecordMethod, RecordType,
    RequestContext, SchemaError, Value, from_message, to_message,
};

use crate::config::ApiSettings;
use crate::models::Models;

/// Build the demo API over `models`.
///
/// # Errors
/// A `SchemaError` when a method selects fields its record type cannot serve.
pub fn build(settings: &ApiSettings, models: &Models) -> Result<Api, SchemaError> {
    let mut api = Api::new(settings.name.as_str(), settings.version.as_str());
    register_notes(&mut api, &models.note)?;
    register_products(&mut api, &models.product)?;
    register_folders(&mut api, &models.folder, &models.file)?;
    register_tasks(&mut api, &models.task)?;
    api.register(
        RecordMethod::builder("score.insert", &models.score)
            .path("scores")
            .handler(put)?,
    )?;
    Ok(api)
}

fn put(mut record: Record, ctx: &RequestContext) -> Result<Record, ApiError> {
    ctx.store().put(&mut record)?;
    Ok(record)
}

fn register_notes(api: &mut Api, note: &Arc<RecordType>) -> Result<(), SchemaError> {
    api.register(RecordMethod::builder("note.insert", note).path("notes").handler(put)?)?;
    api.register(
        RecordMethod::builder("note.get", note)
            .request_fields([alias::ID])
            .response_fields([alias::ID, "attr1", "attr2", "created"])
            .http_method(Method::GET)
            .path("notes/{id}")
            .handler(|record, _| {
                if record.from_datastore() {
                    Ok(record)
                } else {
                    Err(ApiError::not_found("Note not found."))
                }
            })?,
    )?;
    api.register(
        RecordMethod::builder("note.stamp", note)
            .request_fields(["attr1"])
            .response_fields(["created"])
            .path("notes/stamp")
            .handler(|mut record, ctx| {
                let attr1 = record
                    .get("attr1")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();
                record.set("attr2", format!("{attr1}-stamped"))?;
                put(record, ctx)
            })?,
    )?;
    api.register(
        QueryMethod::builder("note.list", note)
            .query_fields([alias::LIMIT, alias::ORDER, alias::PAGE_TOKEN])
            .path("notes")
            .build()?,
    )?;
    api.register(
        QueryMethod::builder("note.search", note)
            .query_fields(["attr1", "attr2", alias::LIMIT, alias::PAGE_TOKEN])
            .path("notes/search")
            .build()?,
    )?;
    api.register(insert_multi(note)?)?;
    Ok(())
}

fn insert_multi(note: &Arc<RecordType>) -> Result<MessageMethod, SchemaError> {
    let collection = note.collection_schema(None)?;
    let item = note.schema(None)?;
    let record_type = Arc::clone(note);
    let response = Arc::clone(&collection);
    let method = MessageMethod::new(
        "note.insert_multi",
        Arc::clone(&collection),
        collection,
        move |request: &Message, ctx: &RequestContext| {
            let set_ctx = ctx.set_context();
            let mut records = request
                .get(ITEMS)
                .and_then(Value::as_list)
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_message)
                .map(|m| from_message(m, &record_type, &set_ctx))
                .collect::<Result<Vec<_>, _>>()?;
            ctx.store().put_multi(&mut records)?;
            let items = records
                .iter()
                .map(|r| to_message(r, &item).map(Value::Message))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Message::new(Arc::clone(&response)).with(ITEMS, items)?)
        },
    )
    .user_required()
    .path("notes/batch");
    Ok(method)
}

fn register_products(api: &mut Api, product: &Arc<RecordType>) -> Result<(), SchemaError> {
    api.register(
        RecordMethod::builder("product.insert", product)
            .path("products/{id}")
            .handler(|record, ctx| {
                if record.from_datastore() {
                    return Err(ApiError::bad_request("Product already exists."));
                }
                put(record, ctx)
            })?,
    )?;
    api.register(
        RecordMethod::builder("product.update", product)
            .http_method(Method::PUT)
            .path("products/{id}")
            .handler(|record, ctx| {
                if !record.from_datastore() {
                    return Err(ApiError::not_found("Product not found."));
                }
                put(record, ctx)
            })?,
    )?;
    api.register(
        QueryMethod::builder("product.list", product)
            .query_fields(["tags", alias::LIMIT, alias::PAGE_TOKEN])
            .limit_default(5)
            .limit_max(20)
            .path("products")
            .build()?,
    )?;
    Ok(())
}

fn register_folders(
    api: &mut Api,
    folder: &Arc<RecordType>,
    file: &Arc<RecordType>,
) -> Result<(), SchemaError> {
    api.register(RecordMethod::builder("folder.insert", folder).path("folders").handler(put)?)?;
    api.register(
        RecordMethod::builder("file.insert", file)
            .path("folders/{folder}/files/{id}")
            .handler(|record, ctx| {
                if record.from_datastore() {
                    return Err(ApiError::bad_request("File already exists."));
                }
                put(record, ctx)
            })?,
    )?;
    api.register(
        QueryMethod::builder("file.list", file)
            .query_fields(["folder", alias::LIMIT, alias::PAGE_TOKEN])
            .path("folders/{folder}/files")
            .build()?,
    )?;
    Ok(())
}

fn register_tasks(api: &mut Api, task: &Arc<RecordType>) -> Result<(), SchemaError> {
    api.register(
        RecordMethod::builder("task.insert", task)
            .request_fields(["title", "done"])
            .user_required()
            .path("tasks")
            .handler(|mut record, ctx| {
                let owner = ctx.require_user()?.clone();
                record.set("owner", owner)?;
                put(record, ctx)
            })?,
    )?;
    api.register(
        QueryMethod::builder("task.list", task)
            .query_fields(["done", alias::LIMIT, alias::ORDER, alias::PAGE_TOKEN])
            .user_required()
            .path("tasks")
            .handler(|query, ctx| {
                let owner = ctx.require_user()?.clone();
                Ok(query.filter("owner", owner))
            })?,
    )?;
    Ok(())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::StatusCode;
    use modkit_entity::{Endpoint, MemoryDatastore, UserIdentity};
    use serde_json::{Value as Json, json};

    fn demo() -> (Api, RequestContext) {
        let models = Models::declare().unwrap();
        let api = build(&ApiSettings::default(), &models).unwrap();
        (api, RequestContext::new(Arc::new(MemoryDatastore::new())))
    }

    fn call(api: &Api, method: &str, ctx: &RequestContext, body: &Json) -> Json {
        let out = api
            .dispatch(method, ctx, &body.to_string())
            .unwrap_or_else(|p| panic!("{method}: {} {}", p.status, p.detail));
        serde_json::from_str(&out).unwrap()
    }

    #[test]
    fn every_model_is_served() {
        let (api, _) = demo();
        let names: Vec<&str> = api.endpoints().map(Endpoint::name).collect();
        for method in ["note.insert", "product.list", "file.list", "task.list", "score.insert"] {
            assert!(names.contains(&method), "{method}");
        }
        assert_eq!(api.endpoint("note.get").unwrap().http_method(), &Method::GET);
    }

    #[test]
    fn products_are_created_once() {
        let (api, ctx) = demo();
        let body = json!({"id": "cheese", "title": "Brie", "price": 4.5, "tags": ["soft"]});
        let out = call(&api, "product.insert", &ctx, &body);
        assert_eq!(out["id"], "cheese");
        assert!(out["updated"].is_string());

        let again = api
            .dispatch("product.insert", &ctx, &body.to_string())
            .unwrap_err();
        assert_eq!(again.status, StatusCode::BAD_REQUEST);
        assert_eq!(again.detail, "Product already exists.");

        let updated = call(&api, "product.update", &ctx, &json!({"id": "cheese", "price": 5.0}));
        assert_eq!(updated["title"], "Brie");
        assert_eq!(updated["price"], 5.0);

        let missing = api
            .dispatch("product.update", &ctx, r#"{"id": "ham"}"#)
            .unwrap_err();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn product_listing_honors_its_own_limits() {
        let (api, ctx) = demo();
        for i in 0..7 {
            call(&api, "product.insert", &ctx, &json!({"id": format!("p{i}"), "tags": ["x"]}));
        }
        let page = call(&api, "product.list", &ctx, &json!({"tags": "x"}));
        assert_eq!(page["items"].as_array().unwrap().len(), 5);
        assert!(page["nextPageToken"].is_string());

        let too_many = api
            .dispatch("product.list", &ctx, r#"{"limit": 21}"#)
            .unwrap_err();
        assert_eq!(too_many.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn tasks_sort_by_named_order() {
        let (api, ctx) = demo();
        let ctx = ctx.with_user(Some(UserIdentity::new("ann@example.com")));
        for title in ["b", "c", "a"] {
            call(&api, "task.insert", &ctx, &json!({"title": title}));
        }
        let by_title = call(&api, "task.list", &ctx, &json!({}));
        let titles: Vec<&str> = by_title["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, ["a", "b", "c"]);
        assert!(by_title["items"][0]["done"].as_bool().is_some_and(|d| !d));

        let open = call(&api, "task.list", &ctx, &json!({"done": true}));
        assert!(open.get("items").is_none());
    }

    #[test]
    fn files_require_an_existing_folder() {
        let (api, ctx) = demo();
        let orphan = api
            .dispatch("file.insert", &ctx, r#"{"folder": "docs", "id": "a.txt"}"#)
            .unwrap_err();
        assert_eq!(orphan.status, StatusCode::NOT_FOUND);
        assert_eq!(orphan.detail, "Folder docs does not exist.");

        call(&api, "folder.insert", &ctx, &json!({"name": "docs"}));
        let out = call(&api, "file.insert", &ctx, &json!({"folder": "docs", "id": "a.txt", "body": "hi"}));
        assert_eq!(out["folder"], "docs");
        assert_eq!(out["id"], "a.txt");
        let listed = call(&api, "file.list", &ctx, &json!({"folder": "docs"}));
        assert_eq!(listed["items"][0]["body"], "hi");
    }

    #[test]
    fn files_are_not_overwritten() {
        let (api, ctx) = demo();
        call(&api, "folder.insert", &ctx, &json!({"name": "docs"}));
        call(&api, "file.insert", &ctx, &json!({"folder": "docs", "id": "a.txt", "body": "v1"}));
        let again = api
            .dispatch(
                "file.insert",
                &ctx,
                &json!({"folder": "docs", "id": "a.txt", "body": "v2"}).to_string(),
            )
            .unwrap_err();
        assert_eq!(again.status, StatusCode::BAD_REQUEST);
        assert_eq!(again.detail, "File already exists.");
        let listed = call(&api, "file.list", &ctx, &json!({"folder": "docs"}));
        assert_eq!(listed["items"][0]["body"], "v1");
    }

    #[test]
    fn stamp_returns_only_the_creation_time() {
        let (api, ctx) = demo();
        let out = call(&api, "note.stamp", &ctx, &json!({"attr1": "x"}));
        assert_eq!(out.as_object().unwrap().len(), 1);
        let listed = call(&api, "note.search", &ctx, &json!({"attr2": "x-stamped"}));
        assert_eq!(listed["items"][0]["attr1"], "x");
    }
}
